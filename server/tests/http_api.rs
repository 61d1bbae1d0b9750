use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use roster_server::admission::policy::PolicyKind;
use roster_server::admission::RetryPolicy;
use roster_server::config::Config;
use roster_server::handlers::USER_ID_HEADER;
use roster_server::models::{Event, Program};
use roster_server::routes::create_routes;
use roster_server::state::AppState;
use roster_server::store::{MemoryStore, RegistrationStore};

struct TestApp {
    router: Router,
    store: Arc<MemoryStore>,
}

fn test_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(
        store.clone(),
        PolicyKind::Standard.build(),
        RetryPolicy::default(),
    );
    let config = Config::from_lookup(|_| None);
    TestApp {
        router: create_routes(state, &config),
        store,
    }
}

fn request(method: Method, uri: &str, user: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header(USER_ID_HEADER, user);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Option<String>, Value) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let location = response
        .headers()
        .get(header::LOCATION)
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, location, body)
}

fn attendee_body() -> Value {
    json!({ "displayName": "Ada", "email": "ada@example.com", "phone": "555-0100" })
}

#[tokio::test]
async fn test_health_check() {
    let app = test_app();
    let (status, _, body) = send(&app, request(Method::GET, "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test]
async fn test_register_returns_created_with_verification_location() {
    let app = test_app();
    let talk = Program::new("Talk").with_capacity(5);
    let talk_id = talk.id;
    let event = app
        .store
        .save_event(Event::new("org", "Summit").published().with_capacity(10).with_program(talk))
        .await
        .unwrap();

    let mut body = attendee_body();
    body["programIds"] = json!([talk_id]);
    let (status, location, body) = send(
        &app,
        request(
            Method::POST,
            &format!("/events/{}/registrations", event.id),
            Some("u1"),
            Some(body),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    let registration_id = body["data"]["id"].as_str().unwrap().to_string();
    let expected = format!("/verify/{}/{}", event.id, registration_id);
    assert_eq!(location.as_deref(), Some(expected.as_str()));
    assert_eq!(body["data"]["verificationPath"], expected.as_str());
    assert_eq!(body["data"]["quantity"], 1);
    assert_eq!(body["data"]["ticketType"], "default");
    assert_eq!(body["data"]["paymentStatus"], "completed");
    assert_eq!(body["data"]["checkInStatus"], false);

    let (status, _, verified) = send(&app, request(Method::GET, &expected, None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verified["data"]["attendeeDisplayName"], "Ada");
    assert_eq!(verified["data"]["eventTitle"], "Summit");
    assert_eq!(verified["data"]["registeredProgramTitles"], json!(["Talk"]));
}

#[tokio::test]
async fn test_missing_identity_is_unauthorized() {
    let app = test_app();
    let event = app
        .store
        .save_event(Event::new("org", "Summit").published())
        .await
        .unwrap();
    let (status, _, body) = send(
        &app,
        request(
            Method::POST,
            &format!("/events/{}/registrations", event.id),
            None,
            Some(attendee_body()),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_rejections_carry_stable_codes() {
    let app = test_app();
    let event = app
        .store
        .save_event(Event::new("org", "Tiny").published().with_capacity(1))
        .await
        .unwrap();
    let uri = format!("/events/{}/registrations", event.id);

    let (status, _, _) = send(&app, request(Method::POST, &uri, Some("u1"), Some(attendee_body()))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _, body) = send(&app, request(Method::POST, &uri, Some("u2"), Some(attendee_body()))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CAPACITY_EXCEEDED");

    let (status, _, body) = send(
        &app,
        request(Method::POST, &uri, Some("u3"), Some(json!({ "displayName": "No phone" }))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, _, body) = send(
        &app,
        request(Method::POST, "/events/not-a-uuid/registrations", Some("u1"), Some(attendee_body())),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_program_endpoint_reports_unavailable_programs() {
    let app = test_app();
    let lunch = Program::new("Lunch").open_seating();
    let lunch_id = lunch.id;
    let event = app
        .store
        .save_event(Event::new("org", "Summit").published().with_program(lunch))
        .await
        .unwrap();

    let (status, _, body) = send(
        &app,
        request(
            Method::POST,
            &format!("/events/{}/programs/{}/registrations", event.id, lunch_id),
            Some("u1"),
            Some(attendee_body()),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "PROGRAM_UNAVAILABLE");
}

#[tokio::test]
async fn test_roster_is_organizer_only() {
    let app = test_app();
    let event = app
        .store
        .save_event(Event::new("organizer", "Summit").published())
        .await
        .unwrap();
    let uri = format!("/events/{}/registrations", event.id);
    send(&app, request(Method::POST, &uri, Some("u1"), Some(attendee_body()))).await;

    let (status, _, body) = send(&app, request(Method::GET, &uri, Some("u1"), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    let (status, _, body) = send(&app, request(Method::GET, &uri, Some("organizer"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["data"][0]["userId"], "u1");
}

#[tokio::test]
async fn test_status_and_my_registrations() {
    let app = test_app();
    let talk = Program::new("Talk");
    let talk_id = talk.id;
    let event = app
        .store
        .save_event(Event::new("org", "Summit").published().with_program(talk))
        .await
        .unwrap();

    send(
        &app,
        request(
            Method::POST,
            &format!("/events/{}/programs/{}/registrations", event.id, talk_id),
            Some("u1"),
            Some(attendee_body()),
        ),
    )
    .await;

    let (status, _, body) = send(
        &app,
        request(
            Method::GET,
            &format!("/events/{}/registrations/status?programId={}", event.id, talk_id),
            Some("u1"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["registered"], false);
    assert_eq!(body["data"]["registeredForProgram"], true);
    assert_eq!(body["data"]["programIds"], json!([talk_id]));

    let (status, _, body) = send(&app, request(Method::GET, "/me/registrations", Some("u1"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["scope"], "program");
}

#[tokio::test]
async fn test_verify_unknown_registration_is_not_found() {
    let app = test_app();
    let event = app
        .store
        .save_event(Event::new("org", "Summit").published())
        .await
        .unwrap();
    let (status, _, body) = send(
        &app,
        request(
            Method::GET,
            &format!("/verify/{}/{}", event.id, uuid::Uuid::new_v4()),
            None,
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}
