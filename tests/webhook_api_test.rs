// Integration tests for the provider-facing webhook endpoint

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use mailbridge::api::{create_webhook_router, ApiState};
use mailbridge::broker::TokenBroker;
use mailbridge::crypto::SecretCipher;
use mailbridge::oauth::{FlowEngine, MemoryStateStore, StateStore};
use mailbridge::provider::ProviderKind;
use mailbridge::store::{Database, NewCredential, NewSubscription};
use mailbridge::subscription::SubscriptionManager;
use mailbridge::webhook::Ingestor;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn test_state() -> Arc<ApiState> {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let cipher = Arc::new(SecretCipher::from_key_material("test-passphrase").unwrap());
    let states: Arc<dyn StateStore> = Arc::new(MemoryStateStore::default());
    let flow = Arc::new(FlowEngine::new(db.clone(), cipher.clone(), states));
    let broker = Arc::new(TokenBroker::new(db.clone(), cipher.clone()));
    let subscriptions = Arc::new(SubscriptionManager::new(db.clone(), broker.clone()));
    let ingestor = Arc::new(Ingestor::new(db.clone()));

    Arc::new(ApiState {
        db,
        cipher,
        broker,
        flow,
        subscriptions,
        ingestor,
        admin_token: None,
        service_secret: None,
    })
}

/// Seed a credential with one subscription under external id "ext-1".
fn seed_subscription(state: &ApiState) {
    let descriptor = ProviderKind::Ms365.descriptor(None);
    let cred = state
        .db
        .create_credential(NewCredential {
            name: "acme".to_string(),
            display_name: "Acme".to_string(),
            provider: ProviderKind::Ms365,
            client_id: "client-1".to_string(),
            encrypted_client_secret: state.cipher.encrypt("s3cret").unwrap(),
            redirect_uri: "https://app.example.com/callback".to_string(),
            tenant_id: None,
            authorization_url: descriptor.authorize_url,
            token_url: descriptor.token_url,
            scopes: descriptor.default_scopes,
        })
        .unwrap();

    state
        .db
        .insert_subscription(NewSubscription {
            credential_id: cred.id,
            provider: ProviderKind::Ms365,
            external_subscription_id: "ext-1".to_string(),
            resource_path: "me/mailFolders('inbox')/messages".to_string(),
            notification_url: "https://hooks.example.com/webhooks/notifications".to_string(),
            change_types: vec!["created".to_string()],
            expires_at: Some(Utc::now() + Duration::hours(72)),
        })
        .unwrap();
}

fn app(state: Arc<ApiState>) -> Router {
    create_webhook_router(state)
}

fn notification_body(message_id: &str) -> String {
    json!({ "value": [{
        "subscriptionId": "ext-1",
        "changeType": "created",
        "resource": format!("Users/u1/Messages/{}", message_id),
        "resourceData": { "id": message_id }
    }]})
    .to_string()
}

async fn post_notifications(app: Router, body: String) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/notifications")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_validation_token_echoed_as_plain_text() {
    let state = test_state();

    let response = app(state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/notifications?validationToken=token%20with%20spaces")
                .body(Body::from("ignored body"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/plain"
    );

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"token with spaces");
}

#[tokio::test]
async fn test_notification_batch_accepted_and_stored() {
    let state = test_state();
    seed_subscription(&state);

    let (status, body) = post_notifications(app(state), notification_body("msg-1")).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["stored"], 1);
    assert_eq!(body["duplicates"], 0);
    assert_eq!(body["total"], 1);
}

#[tokio::test]
async fn test_redelivery_counted_once() {
    let state = test_state();
    seed_subscription(&state);

    let (_, first) = post_notifications(app(state.clone()), notification_body("msg-1")).await;
    assert_eq!(first["stored"], 1);

    let (status, second) = post_notifications(app(state), notification_body("msg-1")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(second["stored"], 0);
    assert_eq!(second["duplicates"], 1);
    assert_eq!(second["total"], 1);
}

#[tokio::test]
async fn test_unknown_subscription_still_acknowledged() {
    let state = test_state();
    // No subscriptions seeded at all

    let (status, body) = post_notifications(app(state), notification_body("msg-1")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["stored"], 0);
    assert_eq!(body["total"], 1);
}

#[tokio::test]
async fn test_malformed_body_still_acknowledged() {
    let state = test_state();

    let (status, body) = post_notifications(app(state), "{not json".to_string()).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["stored"], 0);
    assert_eq!(body["total"], 0);
}
