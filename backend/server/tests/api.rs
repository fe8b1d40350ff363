use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header::CONTENT_TYPE},
};
use serde_json::{Value, json};
use server::{
    build_router,
    config::Config,
    location::NoLookups,
    state::AppState,
    store::{FeedbackStore, MemoryStore},
};
use tower::ServiceExt;

async fn app() -> (Router, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let state = AppState::from_parts(Config::default(), store.clone(), Arc::new(NoLookups))
        .await
        .unwrap();

    (build_router(state), store)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", "203.0.113.7");
    let request = match body {
        Some(body) => request.body(Body::from(body.to_string())).unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    (status, body)
}

async fn create_owned_form(app: &Router, uid: &str, limit: Option<u64>) -> String {
    let body = json!({
        "name": "Survey",
        "uid": uid,
        "fields": [{ "type": "text", "label": "Name" }],
        "feedbackLimit": limit,
    });
    let (status, body) = send(app, "POST", "/api/forms", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);

    body["data"]["customId"].as_str().unwrap().to_string()
}

async fn create_form(app: &Router, limit: Option<u64>) -> String {
    create_owned_form(app, "owner-1", limit).await
}

fn feedback(form_id: &str) -> Value {
    json!({
        "formId": form_id,
        "formName": "Survey",
        "responses": { "rating": 5 },
        "metadata": { "timeOnPage": 12.5 },
    })
}

fn answered(form_id: &str, name: &str, email: &str) -> Value {
    json!({
        "formId": form_id,
        "formName": "Survey",
        "responses": { "name": name, "email": email },
    })
}

#[tokio::test]
async fn health_is_ok() {
    let (app, _) = app().await;
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn submission_is_created_and_listed() {
    let (app, _) = app().await;
    let form_id = create_form(&app, None).await;

    let (status, body) = send(&app, "POST", "/api/feedback", Some(feedback(&form_id))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["formId"], form_id.as_str());
    assert_eq!(body["data"]["clientIp"], "203.0.113.7");

    let (status, body) = send(&app, "GET", &format!("/api/feedback?form={form_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (_, body) = send(&app, "GET", &format!("/api/forms/{form_id}"), None).await;
    assert_eq!(body["data"]["feedbackCount"], 1);
}

#[tokio::test]
async fn full_form_is_forbidden() {
    let (app, store) = app().await;
    let form_id = create_form(&app, Some(1)).await;

    let (status, _) = send(&app, "POST", "/api/feedback", Some(feedback(&form_id))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app, "POST", "/api/feedback", Some(feedback(&form_id))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Feedback limit reached for this form.");

    assert_eq!(store.entries_for_form(&form_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn paused_form_is_forbidden() {
    let (app, _) = app().await;
    let form_id = create_form(&app, Some(10)).await;

    let (status, body) = send(
        &app,
        "PATCH",
        &format!("/api/forms/{form_id}"),
        Some(json!({ "paused": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["paused"], true);

    let (status, body) = send(&app, "POST", "/api/feedback", Some(feedback(&form_id))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Form is paused and not accepting feedback.");
}

#[tokio::test]
async fn unknown_form_is_not_found() {
    let (app, _) = app().await;

    let (status, _) = send(&app, "POST", "/api/feedback", Some(feedback("missing"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", "/api/feedback?form=missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", "/api/forms/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_bodies_are_bad_requests() {
    let (app, _) = app().await;
    let form_id = create_form(&app, None).await;

    let missing_responses = json!({ "formId": form_id, "formName": "Survey" });
    let (status, body) = send(&app, "POST", "/api/feedback", Some(missing_responses)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let not_an_object = json!({ "formId": form_id, "formName": "Survey", "responses": [1, 2] });
    let (status, _) = send(&app, "POST", "/api/feedback", Some(not_an_object)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let fields = json!([{ "type": "text" }]);
    let (status, _) = send(&app, "POST", "/api/forms", Some(json!({ "name": " ", "uid": "u", "fields": fields }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "PATCH", &format!("/api/forms/{form_id}"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn limit_cannot_drop_below_count() {
    let (app, _) = app().await;
    let form_id = create_form(&app, Some(5)).await;
    for _ in 0..2 {
        send(&app, "POST", "/api/feedback", Some(feedback(&form_id))).await;
    }

    let uri = format!("/api/forms/{form_id}");
    let (status, body) = send(&app, "PATCH", &uri, Some(json!({ "feedbackLimit": 1 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains('2'));

    let (status, body) = send(&app, "PATCH", &uri, Some(json!({ "feedbackLimit": null }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["feedbackLimit"], Value::Null);
}

#[tokio::test]
async fn delete_cascades_to_entries() {
    let (app, store) = app().await;
    let form_id = create_form(&app, None).await;
    for _ in 0..3 {
        send(&app, "POST", "/api/feedback", Some(feedback(&form_id))).await;
    }

    let (status, body) = send(&app, "DELETE", &format!("/api/forms/{form_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["deletedFeedbackCount"], 3);

    assert_eq!(store.stored_entries().await, 0);
    let (status, _) = send(&app, "GET", &format!("/api/forms/{form_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn form_without_fields_is_rejected() {
    let (app, _) = app().await;

    let (status, body) = send(&app, "POST", "/api/forms", Some(json!({ "name": "Survey", "uid": "u" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let untyped = json!({ "name": "Survey", "uid": "u", "fields": [{ "type": "", "label": "Name" }] });
    let (status, _) = send(&app, "POST", "/api/forms", Some(untyped)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn created_form_keeps_its_fields() {
    let (app, _) = app().await;
    let form_id = create_form(&app, None).await;

    let (status, body) = send(&app, "GET", &format!("/api/forms/{form_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["fieldType"][0]["type"], "text");
    assert_eq!(body["data"]["fieldType"][0]["label"], "Name");
}

#[tokio::test]
async fn forms_are_listed_by_owner() {
    let (app, _) = app().await;
    let first = create_owned_form(&app, "alice", None).await;
    let second = create_owned_form(&app, "alice", Some(3)).await;
    create_owned_form(&app, "bob", None).await;

    let (status, body) = send(&app, "GET", "/api/forms?uid=alice", None).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|form| form["customId"].as_str().unwrap())
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&first.as_str()));
    assert!(ids.contains(&second.as_str()));

    let (status, body) = send(&app, "GET", "/api/forms", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn viewing_a_form_counts_views() {
    let (app, store) = app().await;
    let form_id = create_form(&app, Some(2)).await;

    for _ in 0..3 {
        send(&app, "GET", &format!("/api/forms/{form_id}"), None).await;
    }

    let (_, body) = send(&app, "GET", &format!("/api/forms/{form_id}"), None).await;
    assert_eq!(body["data"]["viewCount"], 3);
    assert_eq!(body["data"]["feedbackCount"], 0);

    let form = store.find_form(&form_id).await.unwrap().unwrap();
    assert_eq!(form.view_count, 4);
}

#[tokio::test]
async fn time_on_page_adds_up() {
    let (app, _) = app().await;
    let limited = create_form(&app, Some(5)).await;
    let unlimited = create_form(&app, None).await;

    for form_id in [&limited, &limited, &unlimited] {
        let (status, _) = send(&app, "POST", "/api/feedback", Some(feedback(form_id))).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (_, body) = send(&app, "GET", &format!("/api/forms/{limited}"), None).await;
    assert_eq!(body["data"]["totalTimeSpent"], 25.0);

    let (_, body) = send(&app, "GET", &format!("/api/forms/{unlimited}"), None).await;
    assert_eq!(body["data"]["totalTimeSpent"], 12.5);
}

#[tokio::test]
async fn feedback_is_grouped_by_owner() {
    let (app, _) = app().await;
    let first = create_owned_form(&app, "alice", None).await;
    let second = create_owned_form(&app, "alice", None).await;
    let other = create_owned_form(&app, "bob", None).await;

    for form_id in [&first, &first, &second, &other] {
        send(&app, "POST", "/api/feedback", Some(feedback(form_id))).await;
    }

    let (status, body) = send(&app, "GET", "/api/feedback?uid=alice", None).await;
    assert_eq!(status, StatusCode::OK);
    let grouped = body["data"]["feedbacksByForm"].as_object().unwrap();
    assert_eq!(grouped.len(), 2);
    assert_eq!(grouped[&first].as_array().unwrap().len(), 2);
    assert_eq!(grouped[&second].as_array().unwrap().len(), 1);
    assert!(!grouped.contains_key(&other));

    let (status, body) = send(&app, "GET", "/api/feedback?uid=nobody", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["feedbacksByForm"].as_object().unwrap().is_empty());
}

#[tokio::test]
async fn feedback_search_matches_name_or_email() {
    let (app, _) = app().await;
    let first = create_owned_form(&app, "alice", None).await;
    let second = create_owned_form(&app, "bob", None).await;

    send(&app, "POST", "/api/feedback", Some(answered(&first, "Ada Lovelace", "ada@example.com"))).await;
    send(&app, "POST", "/api/feedback", Some(answered(&second, "Grace", "grace@navy.mil"))).await;
    send(&app, "POST", "/api/feedback", Some(feedback(&second))).await;

    let (status, body) = send(&app, "GET", "/api/feedback?query=LOVELACE", None).await;
    assert_eq!(status, StatusCode::OK);
    let grouped = body["data"]["feedbacksByForm"].as_object().unwrap();
    assert_eq!(grouped.len(), 1);
    assert_eq!(grouped[&first][0]["responses"]["email"], "ada@example.com");

    let (_, body) = send(&app, "GET", "/api/feedback?query=navy", None).await;
    let grouped = body["data"]["feedbacksByForm"].as_object().unwrap();
    assert_eq!(grouped.len(), 1);
    assert_eq!(grouped[&second].as_array().unwrap().len(), 1);

    let (_, body) = send(&app, "GET", "/api/feedback?query=nobody", None).await;
    assert!(body["data"]["feedbacksByForm"].as_object().unwrap().is_empty());
}
