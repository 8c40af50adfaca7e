// tests/survey_flow_tests.rs

mod common;

use chrono::{Duration, Utc};
use common::{APP_KEY, question_ids, spawn_app, test_config};
use course_eval::{
    models::token::{IssueTokensRequest, NewToken},
    services::issuer::issue_tokens_for_cohort,
    store::Store,
    utils::hash::user_hash,
};
use serde_json::{Value, json};

#[tokio::test]
async fn cohort_issue_submit_reissue_scenario() {
    let app = spawn_app().await;
    let cohort = app.seed_cohort(&["a@school.test", "b@school.test", "d@school.test"]).await;
    let form = app.create_sample_form().await;
    let form_id = form["id"].as_i64().unwrap();
    let ids = question_ids(&form);

    // First issuance: one open token per student.
    let response = app.issue(&cohort, form_id).await;
    assert_eq!(response.status().as_u16(), 201);
    let summary: Value = response.json().await.unwrap();
    assert_eq!(summary, json!({ "issued": 3, "total": 3, "notified": 3 }));

    let first_batch = app.store.tokens().await;
    assert_eq!(first_batch.len(), 3);
    for t in &first_batch {
        assert!(!t.is_used);
        let window = t.expires_at - t.created_at;
        assert!((window - Duration::minutes(60)).num_seconds().abs() <= 5);
    }

    // Invitations carry the link and the module title.
    let sent = app.sender.sent().await;
    assert_eq!(sent.len(), 3);
    let token_a = app.open_token("a@school.test").await;
    let (_, invitation) = sent.iter().find(|(to, _)| to == "a@school.test").unwrap();
    assert_eq!(invitation.survey_url, format!("http://evaluations.test/evaluate/{}", token_a));
    assert_eq!(invitation.module_name, cohort.module.title);

    // Student A submits.
    let response = app
        .submit_survey(
            &token_a,
            &json!({ "answers": { ids[0].to_string(): "Yes", ids[1].to_string(): ["A", "B"], ids[2].to_string(): 8, ids[3].to_string(): "Great labs" } }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);

    let evaluations = app.store.evaluations().await;
    assert_eq!(evaluations.len(), 1);
    assert_eq!(evaluations[0].user_hash, user_hash(&token_a, "a@school.test", APP_KEY));
    assert!(evaluations[0].is_completed());

    let tokens = app.store.tokens().await;
    let a_token = tokens.iter().find(|t| t.token == token_a).unwrap();
    assert!(a_token.is_used);
    assert!(a_token.used_at.is_some());

    // Reissue for the same cohort and form.
    let token_b_old = app.open_token("b@school.test").await;
    let response = app.issue(&cohort, form_id).await;
    assert_eq!(response.status().as_u16(), 201);

    let tokens = app.store.tokens().await;
    assert_eq!(tokens.len(), 6);
    let a_old = tokens.iter().find(|t| t.token == token_a).unwrap();
    assert!(a_old.is_used && a_old.used_at.is_some());
    let b_old = tokens.iter().find(|t| t.token == token_b_old).unwrap();
    assert!(b_old.is_used && b_old.used_at.is_none());
    for student in &cohort.students {
        let open = tokens
            .iter()
            .filter(|t| t.student_email == student.email && !t.is_used)
            .count();
        assert_eq!(open, 1, "student {} must have exactly one open token", student.email);
    }

    // Both batches share today's date; the report covers all six tokens.
    let today = Utc::now().date_naive();
    let response = app
        .admin_get(&format!(
            "/api/admin/reports/{}/{}/{}",
            cohort.module.id, cohort.class.id, today
        ))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let report: Value = response.json().await.unwrap();
    assert_eq!(report["summary"]["total"], 6);
    assert_eq!(report["summary"]["pending"], 3);
    assert_eq!(report["summary"]["completed"], 3);

    // The answered token links back to its answers, list order intact.
    let respondents = report["respondents"].as_array().unwrap();
    let answered: Vec<&Value> = respondents.iter().filter(|r| !r["answers"].is_null()).collect();
    assert_eq!(answered.len(), 1);
    assert_eq!(answered[0]["answers"][ids[1].to_string()]["answer"], json!(["A", "B"]));
    assert_eq!(answered[0]["answers"][ids[1].to_string()]["question"], "Which topics were useful?");
    assert_eq!(report["table"]["rows"][0][2], "A, B");
}

#[tokio::test]
async fn reissue_on_a_later_day_gets_its_own_report() {
    let app = spawn_app().await;
    let cohort = app.seed_cohort(&["a@school.test", "b@school.test", "d@school.test"]).await;
    let form = app.create_sample_form().await;
    let form_id = form["id"].as_i64().unwrap();
    let ids = question_ids(&form);
    app.issue(&cohort, form_id).await;

    let token_a = app.open_token("a@school.test").await;
    let response = app
        .submit_survey(&token_a, &json!({ "answers": { ids[0].to_string(): "No", ids[2].to_string(): 8 } }))
        .await;
    assert_eq!(response.status().as_u16(), 201);

    let tomorrow = Utc::now() + Duration::days(1);
    let summary = issue_tokens_for_cohort(
        app.store.as_ref(),
        app.sender.as_ref(),
        &test_config(),
        IssueTokensRequest {
            module_id: cohort.module.id,
            class_id: Some(cohort.class.id),
            class_group: None,
            form_id,
            validity_minutes: None,
        },
        tomorrow,
    )
    .await
    .unwrap();
    assert_eq!(summary.issued, 3);

    let report_for = |date: chrono::NaiveDate| {
        format!("/api/admin/reports/{}/{}/{}", cohort.module.id, cohort.class.id, date)
    };

    let later: Value = app.admin_get(&report_for(tomorrow.date_naive())).await.json().await.unwrap();
    assert_eq!(later["summary"]["total"], 3);
    assert_eq!(later["summary"]["pending"], 3);
    assert_eq!(later["summary"]["completed"], 0);
    assert!(later["table"]["rows"].as_array().unwrap().is_empty());

    // The first day now only holds consumed or superseded tokens.
    let first: Value = app.admin_get(&report_for(Utc::now().date_naive())).await.json().await.unwrap();
    assert_eq!(first["summary"]["total"], 3);
    assert_eq!(first["summary"]["completed"], 3);
    assert_eq!(first["table"]["rows"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn second_submission_is_rejected_as_already_used() {
    let app = spawn_app().await;
    let cohort = app.seed_cohort(&["a@school.test"]).await;
    let form = app.create_sample_form().await;
    let ids = question_ids(&form);
    app.issue(&cohort, form["id"].as_i64().unwrap()).await;
    let token = app.open_token("a@school.test").await;

    let body = json!({ "answers": { ids[0].to_string(): "No", ids[2].to_string(): 5 } });
    assert_eq!(app.submit_survey(&token, &body).await.status().as_u16(), 201);

    let response = app.submit_survey(&token, &body).await;
    assert_eq!(response.status().as_u16(), 409);
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["reason"], "already_used");

    let response = app.get_survey(&token).await;
    assert_eq!(response.status().as_u16(), 409);
    assert_eq!(app.store.evaluations().await.len(), 1);
}

#[tokio::test]
async fn expired_link_reports_expired_reason() {
    let app = spawn_app().await;
    let cohort = app.seed_cohort(&["a@school.test"]).await;
    let form = app.create_sample_form().await;

    let tokens = app
        .store
        .reissue_tokens(&[NewToken {
            token: "expiredtoken".to_string(),
            module_id: cohort.module.id,
            class_id: cohort.class.id,
            form_id: form["id"].as_i64().unwrap(),
            student_email: "a@school.test".to_string(),
            expires_at: Utc::now() - Duration::minutes(1),
            created_at: Utc::now() - Duration::days(40),
        }])
        .await
        .unwrap();
    assert_eq!(tokens.len(), 1);

    let response = app.get_survey("expiredtoken").await;
    assert_eq!(response.status().as_u16(), 410);
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["reason"], "expired");

    let response = app.submit_survey("expiredtoken", &json!({ "answers": {} })).await;
    assert_eq!(response.status().as_u16(), 410);
}

#[tokio::test]
async fn unknown_link_is_not_found() {
    let app = spawn_app().await;
    let response = app.get_survey("doesnotexist").await;
    assert_eq!(response.status().as_u16(), 404);
    let error: Value = response.json().await.unwrap();
    assert!(error.get("reason").is_none());
}

#[tokio::test]
async fn survey_view_includes_form_tree_without_token_value() {
    let app = spawn_app().await;
    let cohort = app.seed_cohort(&["a@school.test"]).await;
    let form = app.create_sample_form().await;
    app.issue(&cohort, form["id"].as_i64().unwrap()).await;
    let token = app.open_token("a@school.test").await;

    let response = app.get_survey(&token).await;
    assert_eq!(response.status().as_u16(), 200);
    let view: Value = response.json().await.unwrap();
    assert_eq!(view["module"]["id"], cohort.module.id);
    assert_eq!(view["form"]["sections"].as_array().unwrap().len(), 2);
    assert!(!view.to_string().contains(&token));
}

#[tokio::test]
async fn invalid_answers_leave_token_open() {
    let app = spawn_app().await;
    let cohort = app.seed_cohort(&["a@school.test"]).await;
    let form = app.create_sample_form().await;
    let ids = question_ids(&form);
    app.issue(&cohort, form["id"].as_i64().unwrap()).await;
    let token = app.open_token("a@school.test").await;

    // "Yes" reveals section two, whose textarea is required.
    let response = app
        .submit_survey(&token, &json!({ "answers": { ids[0].to_string(): "Yes", ids[2].to_string(): 9 } }))
        .await;
    assert_eq!(response.status().as_u16(), 400);
    let error: Value = response.json().await.unwrap();
    assert!(error["fields"].get(format!("answers.{}", ids[3])).is_some());

    let tokens = app.store.tokens().await;
    assert!(!tokens[0].is_used);
    assert!(app.store.evaluations().await.is_empty());
}

#[tokio::test]
async fn comment_is_anonymized_and_original_hidden() {
    let app = spawn_app().await;
    let cohort = app.seed_cohort(&["a@school.test"]).await;
    let form = app.create_sample_form().await;
    let ids = question_ids(&form);
    app.issue(&cohort, form["id"].as_i64().unwrap()).await;
    let token = app.open_token("a@school.test").await;

    let response = app
        .submit_survey(
            &token,
            &json!({
                "answers": { ids[0].to_string(): "No", ids[2].to_string(): 6 },
                "score": 4,
                "comment": "I sat in the front row & asked > 3 questions"
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);

    let evaluation = app.store.evaluations().await.remove(0);
    assert_eq!(evaluation.original_comment.as_deref(), Some("I sat in the front row & asked > 3 questions"));
    assert_eq!(evaluation.anonymized_comment.as_deref(), Some("[anon] I sat in the front row & asked > 3 questions"));
    assert!(evaluation.is_anonymized);
    assert_eq!(evaluation.score, Some(4));

    let json = serde_json::to_value(&evaluation).unwrap();
    assert!(json.get("original_comment").is_none());
}
