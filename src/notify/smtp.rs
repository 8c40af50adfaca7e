use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
};

use super::{Invitation, NotificationSender, NotifyError};
use crate::config::SmtpConfig;

pub struct SmtpSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpSender {
    /// Authenticated relays get TLS (implicit on 465, STARTTLS elsewhere);
    /// without credentials the host is treated as a local plain relay.
    pub fn new(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let from: Mailbox = config
            .from_address
            .parse()
            .map_err(|e| NotifyError::Address(format!("{}: {}", config.from_address, e)))?;

        let transport = match (&config.username, &config.password) {
            (Some(user), Some(pass)) => {
                let tls = TlsParameters::new(config.host.clone())
                    .map_err(|e| NotifyError::Transport(format!("TLS: {}", e)))?;
                let builder = if config.port == 465 {
                    AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                        .map_err(|e| NotifyError::Transport(e.to_string()))?
                        .tls(Tls::Wrapper(tls))
                } else {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                        .map_err(|e| NotifyError::Transport(e.to_string()))?
                        .tls(Tls::Required(tls))
                };
                builder
                    .port(config.port)
                    .credentials(Credentials::new(user.clone(), pass.clone()))
                    .build()
            }
            _ => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .port(config.port)
                .build(),
        };

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl NotificationSender for SmtpSender {
    async fn send(&self, to: &str, invitation: &Invitation) -> Result<(), NotifyError> {
        let to: Mailbox = to
            .parse()
            .map_err(|e| NotifyError::Address(format!("{}: {}", to, e)))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(Invitation::SUBJECT)
            .header(ContentType::TEXT_PLAIN)
            .body(invitation.body())
            .map_err(|e| NotifyError::Build(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        Ok(())
    }
}
