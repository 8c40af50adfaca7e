// tests/admin_tests.rs

mod common;

use chrono::{Duration, Utc};
use common::{JWT_SECRET, question_ids, spawn_app};
use course_eval::{
    export::sanitize_sheet_name,
    models::token::NewToken,
    store::Store,
    utils::jwt::sign_jwt,
};
use serde_json::{Value, json};

#[tokio::test]
async fn admin_routes_require_an_admin_jwt() {
    let app = spawn_app().await;

    let response = app
        .client
        .get(app.url("/api/admin/forms"))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 401);

    let student = sign_jwt("student-9", "student", JWT_SECRET, 600).unwrap();
    let response = app
        .client
        .get(app.url("/api/admin/forms"))
        .bearer_auth(student)
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 403);

    let forged = sign_jwt("staff-1", "admin", "some_other_secret", 600).unwrap();
    let response = app
        .client
        .get(app.url("/api/admin/forms"))
        .bearer_auth(forged)
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn enrollment_lifecycle() {
    let app = spawn_app().await;
    let cohort = app.seed_cohort(&[]).await;
    let student = app.store.add_student("Ada", "L", "ada@home.test", Some("ada@school.test")).await;

    let body = json!({
        "student_id": student.id,
        "module_id": cohort.module.id,
        "class_id": cohort.class.id,
        "start_date": "2024-09-01",
        "end_date": "2025-06-30"
    });
    let response = app.admin_post("/api/admin/enrollments", &body).await;
    assert_eq!(response.status().as_u16(), 201);
    let enrollment: Value = response.json().await.unwrap();
    let id = enrollment["id"].as_i64().unwrap();

    // Same triple again.
    assert_eq!(app.admin_post("/api/admin/enrollments", &body).await.status().as_u16(), 409);

    // Unknown student.
    let mut missing = body.clone();
    missing["student_id"] = json!(999_999);
    assert_eq!(app.admin_post("/api/admin/enrollments", &missing).await.status().as_u16(), 404);

    // End before start.
    let response = app
        .admin_put(
            &format!("/api/admin/enrollments/{}", id),
            &json!({ "start_date": "2025-06-30", "end_date": "2024-09-01" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 400);

    let response = app
        .admin_put(
            &format!("/api/admin/enrollments/{}", id),
            &json!({ "start_date": "2024-10-01", "end_date": "2025-06-30" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let updated: Value = response.json().await.unwrap();
    assert_eq!(updated["start_date"], "2024-10-01");

    let response = app
        .admin_get(&format!(
            "/api/admin/enrollments?module_id={}&class_id={}",
            cohort.module.id, cohort.class.id
        ))
        .await;
    let listed: Vec<Value> = response.json().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["school_email"], "ada@school.test");

    assert_eq!(app.admin_delete(&format!("/api/admin/enrollments/{}", id)).await.status().as_u16(), 204);
    assert_eq!(app.admin_delete(&format!("/api/admin/enrollments/{}", id)).await.status().as_u16(), 404);
}

#[tokio::test]
async fn issuance_by_class_name_uses_school_email() {
    let app = spawn_app().await;
    let cohort = app.seed_cohort(&[]).await;
    let student = app.store.add_student("Ada", "L", "ada@home.test", Some("ada@school.test")).await;
    app.admin_post(
        "/api/admin/enrollments",
        &json!({
            "student_id": student.id,
            "module_id": cohort.module.id,
            "class_id": cohort.class.id,
            "start_date": "2024-09-01",
            "end_date": "2025-06-30"
        }),
    )
    .await;
    let form = app.create_sample_form().await;

    let response = app
        .admin_post(
            "/api/admin/evaluations/send",
            &json!({
                "module_id": cohort.module.id,
                "class_group": cohort.class.name,
                "form_id": form["id"],
                "validity_minutes": 30
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);

    let tokens = app.store.tokens().await;
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].student_email, "ada@school.test");
    assert!(tokens[0].expires_at <= Utc::now() + Duration::minutes(30));
    assert_eq!(tokens[0].token.len(), 64);
}

#[tokio::test]
async fn issuance_input_errors() {
    let app = spawn_app().await;
    let cohort = app.seed_cohort(&[]).await;
    let form = app.create_sample_form().await;
    let form_id = form["id"].as_i64().unwrap();

    // Nobody enrolled.
    let response = app.issue(&cohort, form_id).await;
    assert_eq!(response.status().as_u16(), 422);
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["issued"], 0);

    // Both class selectors at once.
    let response = app
        .admin_post(
            "/api/admin/evaluations/send",
            &json!({
                "module_id": cohort.module.id,
                "class_id": cohort.class.id,
                "class_group": cohort.class.name,
                "form_id": form_id
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 400);

    // Validity override above the 30-day cap.
    let response = app
        .admin_post(
            "/api/admin/evaluations/send",
            &json!({
                "module_id": cohort.module.id,
                "class_id": cohort.class.id,
                "form_id": form_id,
                "validity_minutes": course_eval::config::MAX_TOKEN_VALIDITY_MINUTES + 1
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 400);

    // Unknown module, class name and form.
    let response = app
        .admin_post(
            "/api/admin/evaluations/send",
            &json!({ "module_id": 999_999, "class_id": cohort.class.id, "form_id": form_id }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 404);
    let response = app
        .admin_post(
            "/api/admin/evaluations/send",
            &json!({ "module_id": cohort.module.id, "class_group": "nope", "form_id": form_id }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 404);
    let response = app
        .admin_post(
            "/api/admin/evaluations/send",
            &json!({ "module_id": cohort.module.id, "class_id": cohort.class.id, "form_id": 999_999 }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 404);

    assert!(app.store.tokens().await.is_empty());
}

#[tokio::test]
async fn notification_failure_keeps_tokens() {
    let app = spawn_app().await;
    let cohort = app.seed_cohort(&["a@school.test", "b@school.test"]).await;
    let form = app.create_sample_form().await;
    app.sender.fail_for("b@school.test").await;

    let response = app.issue(&cohort, form["id"].as_i64().unwrap()).await;
    assert_eq!(response.status().as_u16(), 201);
    let summary: Value = response.json().await.unwrap();
    assert_eq!(summary, json!({ "issued": 2, "total": 2, "notified": 1 }));
    assert_eq!(app.store.tokens().await.len(), 2);
}

#[tokio::test]
async fn export_appends_once_per_respondent() {
    let app = spawn_app().await;
    let cohort = app.seed_cohort(&["a@school.test", "b@school.test"]).await;
    let form = app.create_sample_form().await;
    let ids = question_ids(&form);
    app.issue(&cohort, form["id"].as_i64().unwrap()).await;

    let token = app.open_token("a@school.test").await;
    let response = app
        .submit_survey(&token, &json!({ "answers": { ids[0].to_string(): "No", ids[1].to_string(): ["C", "A"], ids[2].to_string(): 3 } }))
        .await;
    assert_eq!(response.status().as_u16(), 201);

    let path = format!(
        "/api/admin/reports/{}/{}/{}?export=true",
        cohort.module.id,
        cohort.class.id,
        Utc::now().date_naive()
    );
    let first: Value = app.admin_get(&path).await.json().await.unwrap();
    assert_eq!(first["export"]["appended"], 1);
    assert_eq!(first["export"]["skipped"], 0);

    let second: Value = app.admin_get(&path).await.json().await.unwrap();
    assert_eq!(second["export"]["appended"], 0);
    assert_eq!(second["export"]["skipped"], 1);

    let workbook = app.sheets.snapshot().await;
    let sheet_name = sanitize_sheet_name(&format!("{} - {}", cohort.module.title, cohort.class.name));
    let sheet = &workbook.sheets[&sheet_name];
    assert_eq!(sheet.headers[0], "Submitted at");
    assert_eq!(sheet.rows.len(), 1);
    assert_eq!(sheet.rows[0][2], "C, A");
}

#[tokio::test]
async fn report_without_tokens_is_not_found() {
    let app = spawn_app().await;
    let cohort = app.seed_cohort(&["a@school.test"]).await;
    let response = app
        .admin_get(&format!(
            "/api/admin/reports/{}/{}/2020-01-01",
            cohort.module.id, cohort.class.id
        ))
        .await;
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn batches_stats_and_purge() {
    let app = spawn_app().await;
    let cohort = app.seed_cohort(&["a@school.test", "b@school.test"]).await;
    let form = app.create_sample_form().await;
    let form_id = form["id"].as_i64().unwrap();
    let ids = question_ids(&form);
    app.issue(&cohort, form_id).await;

    let token = app.open_token("a@school.test").await;
    app.submit_survey(&token, &json!({ "answers": { ids[0].to_string(): "No", ids[2].to_string(): 7 } }))
        .await;

    // A long-expired link for another student, issued in today's batch.
    app.store
        .reissue_tokens(&[NewToken {
            token: "stale".to_string(),
            module_id: cohort.module.id,
            class_id: cohort.class.id,
            form_id,
            student_email: "c@school.test".to_string(),
            expires_at: Utc::now() - Duration::days(30),
            created_at: Utc::now(),
        }])
        .await
        .unwrap();

    let batches: Vec<Value> = app.admin_get("/api/admin/evaluations/batches").await.json().await.unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0]["total_sent"], 3);
    assert_eq!(batches[0]["completed"], 1);
    assert_eq!(batches[0]["expired"], 1);

    let stats: Value = app
        .admin_get(&format!("/api/admin/dashboard/stats?module_id={}", cohort.module.id))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(stats["total_evaluations"], 1);
    assert_eq!(stats["completed_evaluations"], 1);
    assert_eq!(stats["participation_rate"], 33);
    let current = stats["current_academic_year"].as_i64().unwrap();
    assert_eq!(stats["years"], json!([current - 2, current - 1, current, current + 1]));

    let cutoff = (Utc::now() - Duration::days(1)).to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let response = app.admin_delete(&format!("/api/admin/tokens/expired?before={}", cutoff)).await;
    assert_eq!(response.status().as_u16(), 200);
    let purged: Value = response.json().await.unwrap();
    assert_eq!(purged["deleted"], 1);
    assert_eq!(app.store.tokens().await.len(), 2);
}

#[tokio::test]
async fn module_groups_list_enrolled_classes() {
    let app = spawn_app().await;
    let cohort = app.seed_cohort(&["a@school.test"]).await;
    let other = app.store.add_class("ZZ-empty-class").await.unwrap();

    let groups: Vec<Value> = app
        .admin_get(&format!("/api/admin/modules/{}/groups", cohort.module.id))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(groups, vec![json!({ "id": cohort.class.id, "name": cohort.class.name })]);
    assert!(groups.iter().all(|g| g["id"] != other.id));

    let response = app.admin_get("/api/admin/modules/999999/groups").await;
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn recent_tokens_hide_token_values() {
    let app = spawn_app().await;
    let cohort = app.seed_cohort(&["a@school.test", "b@school.test"]).await;
    let form = app.create_sample_form().await;
    app.issue(&cohort, form["id"].as_i64().unwrap()).await;

    let recent: Vec<Value> = app.admin_get("/api/admin/evaluations/recent?limit=1").await.json().await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0]["module_title"], cohort.module.title);
    assert_eq!(recent[0]["status"], "pending");
    assert!(recent[0].get("token").is_none());

    let all: Vec<Value> = app.admin_get("/api/admin/evaluations/recent").await.json().await.unwrap();
    assert_eq!(all.len(), 2);

    let response = app.admin_get("/api/admin/evaluations/recent?limit=0").await;
    assert_eq!(response.status().as_u16(), 400);
}
