use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
    anonymize::Anonymizer, config::Config, export::SpreadsheetSink, notify::NotificationSender,
    store::SharedStore,
};

#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub config: Config,
    pub notifier: Arc<dyn NotificationSender>,
    pub anonymizer: Arc<dyn Anonymizer>,
    pub sheets: Arc<dyn SpreadsheetSink>,
}

impl FromRef<AppState> for SharedStore {
    fn from_ref(state: &AppState) -> Self {
        state.store.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
