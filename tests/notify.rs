use hexapure::config::MailerConfig;
use hexapure::models::ContactForm;
use hexapure::notify::{FunctionNotifier, Mailer, Notifier};
use hexapure::Error;
use reqwest::Client;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn form(subject: &str) -> ContactForm {
    ContactForm {
        name: "Kiran".into(),
        company: Some("Acme Farms".into()),
        phone: None,
        email: "kiran@example.com".into(),
        subject: subject.into(),
        message: "Our tank overflows".into(),
    }
}

#[tokio::test]
async fn function_notifier_posts_the_form() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/functions/v1/send-email"))
        .and(header("apikey", "anon-key"))
        .and(body_partial_json(json!({"email": "kiran@example.com", "subject": "Quote"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "message": "Emails sent successfully"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/functions/v1/send-email", server.uri());
    let notifier = FunctionNotifier::with_client(&url, "anon-key", Client::new());
    notifier.notify(&form("Quote")).await.unwrap();
}

#[tokio::test]
async fn function_failure_carries_details() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/functions/v1/send-email"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": "Failed to send emails",
            "details": "Brevo API error"
        })))
        .mount(&server)
        .await;

    let url = format!("{}/functions/v1/send-email", server.uri());
    let notifier = FunctionNotifier::with_client(&url, "anon-key", Client::new());
    match notifier.notify(&form("Quote")).await {
        Err(Error::Function(message)) => assert!(message.contains("Brevo API error")),
        other => panic!("expected function error, got {:?}", other),
    }
}

#[tokio::test]
async fn reported_failure_is_an_error_even_with_ok_status() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "error": "quota exceeded"
        })))
        .mount(&server)
        .await;

    let notifier = FunctionNotifier::with_client(&server.uri(), "anon-key", Client::new());
    assert!(matches!(
        notifier.notify(&form("Quote")).await,
        Err(Error::Function(_))
    ));
}

fn mailer(server: &MockServer) -> Mailer {
    let config = MailerConfig {
        api_key: Some("brevo-key".into()),
        api_url: server.uri(),
        from_email: "noreply@hexapure.test".into(),
        admin_email: "admin@hexapure.test".into(),
    };
    Mailer::with_client(&config, Client::new())
}

#[tokio::test]
async fn mailer_sends_confirmation_then_admin_notice() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/smtp/email"))
        .and(header("api-key", "brevo-key"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"messageId": "m"})))
        .expect(2)
        .mount(&server)
        .await;

    mailer(&server)
        .send_contact_emails(&form("URGENT: overflow"))
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let bodies: Vec<Value> = requests
        .iter()
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();

    assert_eq!(bodies[0]["to"][0]["email"], "kiran@example.com");
    assert_eq!(bodies[0]["sender"]["name"], "Hexapure");
    assert_eq!(bodies[0]["subject"], "Thank you for contacting Hexapure!");

    assert_eq!(bodies[1]["to"][0]["email"], "admin@hexapure.test");
    assert_eq!(bodies[1]["sender"]["email"], "noreply@hexapure.test");
    assert!(bodies[1]["textContent"]
        .as_str()
        .unwrap()
        .contains("HIGH - Contains urgent keyword"));
}

#[tokio::test]
async fn provider_rejection_stops_before_admin_notice() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/smtp/email"))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
        .expect(1)
        .mount(&server)
        .await;

    assert!(matches!(
        mailer(&server).send_contact_emails(&form("Quote")).await,
        Err(Error::Function(_))
    ));
}
