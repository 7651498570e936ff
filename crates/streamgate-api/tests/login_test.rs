#![allow(clippy::unwrap_used)]
// Integration tests for the OAuth2 password-grant login provider.

use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use streamgate_api::{Error, PasswordLogin};

async fn setup() -> (MockServer, PasswordLogin) {
    let server = MockServer::start().await;
    let login = PasswordLogin::with_client(
        reqwest::Client::new(),
        &server.uri(),
        "consumer-key",
        SecretString::from("consumer-secret".to_owned()),
        "integration@example.com",
        SecretString::from("hunter2".to_owned()),
    )
    .unwrap();
    (server, login)
}

#[tokio::test]
async fn test_password_grant_yields_bearer_credentials() {
    let (server, login) = setup().await;

    Mock::given(method("POST"))
        .and(path("/services/oauth2/token"))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains("client_id=consumer-key"))
        .and(body_string_contains("username=integration%40example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "00Dxx!token",
            "instance_url": "https://na1.example.com",
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let creds = login.login().await.unwrap();
    assert_eq!(creds.server_identity(), "https://na1.example.com");
    assert_eq!(creds.authorization(), "Bearer 00Dxx!token");
}

#[tokio::test]
async fn test_missing_instance_url_falls_back_to_server() {
    let (server, login) = setup().await;

    Mock::given(method("POST"))
        .and(path("/services/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "abc"
        })))
        .mount(&server)
        .await;

    let creds = login.login().await.unwrap();
    assert_eq!(creds.server_identity(), server.uri());
    assert_eq!(creds.authorization(), "Bearer abc");
}

#[tokio::test]
async fn test_rejected_login_is_authentication_error() {
    let (server, login) = setup().await;

    Mock::given(method("POST"))
        .and(path("/services/oauth2/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "authentication failure"
        })))
        .mount(&server)
        .await;

    let result = login.login().await;
    assert!(
        matches!(result, Err(Error::Authentication { .. })),
        "expected Authentication error, got: {result:?}"
    );
}
