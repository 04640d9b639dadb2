// Integration tests for admin credential CRUD

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use mailbridge::api::{create_credential_router, ApiState};
use mailbridge::broker::TokenBroker;
use mailbridge::crypto::SecretCipher;
use mailbridge::oauth::{FlowEngine, MemoryStateStore, StateStore};
use mailbridge::provider::AccountIdentity;
use mailbridge::store::Database;
use mailbridge::subscription::SubscriptionManager;
use mailbridge::webhook::Ingestor;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const ADMIN_TOKEN: &str = "test-admin-token";

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
        admin_token: Some(ADMIN_TOKEN.to_string()),
        service_secret: None,
    })
}

fn app(state: Arc<ApiState>) -> Router {
    create_credential_router(state)
}

fn create_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/credentials")
        .header("authorization", format!("Bearer {}", ADMIN_TOKEN))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn sample_credential() -> Value {
    json!({
        "name": "acme-mail",
        "provider": "ms365",
        "client_id": "client-1",
        "client_secret": "s3cret",
        "redirect_uri": "https://app.example.com/callback"
    })
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_create_applies_provider_defaults() {
    let state = test_state();

    let response = app(state)
        .oneshot(create_request(sample_credential()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = body_json(response).await;
    assert_eq!(body["name"], "acme-mail");
    assert_eq!(body["display_name"], "acme-mail");
    assert_eq!(body["provider"], "ms365");
    assert_eq!(body["status"], "pending");
    assert_eq!(
        body["authorization_url"],
        "https://login.microsoftonline.com/common/oauth2/v2.0/authorize"
    );
    assert_eq!(body["scopes"].as_array().unwrap().len(), 4);

    // Secret material never appears in responses
    assert!(body.get("client_secret").is_none());
    assert!(body.get("encrypted_client_secret").is_none());
}

#[tokio::test]
async fn test_create_with_tenant_scopes_endpoints() {
    let state = test_state();
    let mut req = sample_credential();
    req["tenant_id"] = json!("contoso-tenant");

    let response = app(state).oneshot(create_request(req)).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(
        body["token_url"],
        "https://login.microsoftonline.com/contoso-tenant/oauth2/v2.0/token"
    );
}

#[tokio::test]
async fn test_duplicate_name_conflicts() {
    let state = test_state();

    let response = app(state.clone())
        .oneshot(create_request(sample_credential()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let mut other = sample_credential();
    other["client_id"] = json!("client-2");
    let response = app(state).oneshot(create_request(other)).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_missing_admin_token_rejected() {
    let state = test_state();

    let response = app(state)
        .oneshot(
            Request::builder()
                .uri("/api/credentials")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_wrong_admin_token_rejected() {
    let state = test_state();

    let response = app(state)
        .oneshot(
            Request::builder()
                .uri("/api/credentials")
                .header("authorization", "Bearer wrong-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_get_and_list() {
    let state = test_state();

    let created = body_json(
        app(state.clone())
            .oneshot(create_request(sample_credential()))
            .await
            .unwrap(),
    )
    .await;
    let id = created["id"].as_str().unwrap();

    let response = app(state.clone())
        .oneshot(
            Request::builder()
                .uri(format!("/api/credentials/{}", id))
                .header("authorization", format!("Bearer {}", ADMIN_TOKEN))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app(state)
        .oneshot(
            Request::builder()
                .uri("/api/credentials")
                .header("authorization", format!("Bearer {}", ADMIN_TOKEN))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let list = body_json(response).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_update_secret_resets_connected_status() {
    let state = test_state();

    let created = body_json(
        app(state.clone())
            .oneshot(create_request(sample_credential()))
            .await
            .unwrap(),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();

    state
        .db
        .mark_credential_connected(
            &id,
            &AccountIdentity {
                email: Some("alice@contoso.com".to_string()),
                external_id: Some("acct-1".to_string()),
                display_name: Some("Alice".to_string()),
            },
        )
        .unwrap();

    let response = app(state)
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri(format!("/api/credentials/{}", id))
                .header("authorization", format!("Bearer {}", ADMIN_TOKEN))
                .header("content-type", "application/json")
                .body(Body::from(json!({ "client_secret": "rotated" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "pending");
}

#[tokio::test]
async fn test_update_display_name_keeps_status() {
    let state = test_state();

    let created = body_json(
        app(state.clone())
            .oneshot(create_request(sample_credential()))
            .await
            .unwrap(),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();

    state
        .db
        .mark_credential_connected(
            &id,
            &AccountIdentity {
                email: Some("alice@contoso.com".to_string()),
                external_id: None,
                display_name: None,
            },
        )
        .unwrap();

    let response = app(state)
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri(format!("/api/credentials/{}", id))
                .header("authorization", format!("Bearer {}", ADMIN_TOKEN))
                .header("content-type", "application/json")
                .body(Body::from(json!({ "display_name": "Acme Corp" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let body = body_json(response).await;
    assert_eq!(body["display_name"], "Acme Corp");
    assert_eq!(body["status"], "connected");
}

#[tokio::test]
async fn test_delete_then_missing() {
    let state = test_state();

    let created = body_json(
        app(state.clone())
            .oneshot(create_request(sample_credential()))
            .await
            .unwrap(),
    )
    .await;
    let id = created["id"].as_str().unwrap();

    let response = app(state.clone())
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/credentials/{}", id))
                .header("authorization", format!("Bearer {}", ADMIN_TOKEN))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app(state)
        .oneshot(
            Request::builder()
                .uri(format!("/api/credentials/{}", id))
                .header("authorization", format!("Bearer {}", ADMIN_TOKEN))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
