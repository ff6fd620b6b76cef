use hexapure::auth::{IdentityProvider, RestIdentity};
use hexapure::Error;
use reqwest::Client;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn identity(server: &MockServer) -> RestIdentity {
    RestIdentity::with_client(&server.uri(), "anon-key", Client::new())
}

#[tokio::test]
async fn sign_up_sends_display_name() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/signup"))
        .and(header("apikey", "anon-key"))
        .and(body_partial_json(json!({
            "email": "new@example.com",
            "data": {"display_name": "Neha"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "jwt",
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": "refresh",
            "user": {
                "id": "user-1",
                "email": "new@example.com",
                "user_metadata": {"display_name": "Neha"}
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let identity = identity(&server)
        .sign_up("new@example.com", "secret1", "Neha")
        .await
        .unwrap();
    assert_eq!(identity.user_id, "user-1");
    assert_eq!(identity.display_name.as_deref(), Some("Neha"));
    assert_eq!(identity.access_token.as_deref(), Some("jwt"));
}

#[tokio::test]
async fn sign_in_uses_password_grant() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "jwt",
            "expires_in": 3600,
            "user": {"id": "user-2", "email": "me@example.com"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let identity = identity(&server)
        .sign_in("me@example.com", "secret1")
        .await
        .unwrap();
    assert_eq!(identity.user_id, "user-2");
    assert_eq!(identity.email, "me@example.com");
    assert!(!identity.is_expired());
}

#[tokio::test]
async fn rejected_credentials_are_auth_errors() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Invalid login credentials"
        })))
        .mount(&server)
        .await;

    let result = identity(&server).sign_in("me@example.com", "wrong").await;
    match result {
        Err(e @ Error::Auth(_)) => assert!(!e.is_recoverable()),
        other => panic!("expected auth error, got {:?}", other),
    }
}

#[tokio::test]
async fn sign_out_revokes_the_access_token() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "jwt",
            "user": {"id": "user-3", "email": "bye@example.com"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/logout"))
        .and(header("Authorization", "Bearer jwt"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = identity(&server);
    let signed_in = client.sign_in("bye@example.com", "secret1").await.unwrap();
    client.sign_out(&signed_in).await.unwrap();
}
