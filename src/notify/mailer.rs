//! Transactional email through the Brevo HTTP API

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::info;

use super::Notifier;
use crate::config::MailerConfig;
use crate::error::{Error, Result};
use crate::fetch::{http_client, Fetch};
use crate::models::ContactForm;

const NOT_PROVIDED: &str = "Not provided";
const CONTACT_PHONE: &str = "+91 89034 88003";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmailAddress {
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendEmailBody {
    sender: EmailAddress,
    to: Vec<EmailAddress>,
    subject: String,
    html_content: String,
    text_content: String,
}

/// Subject and bodies of one email
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailContent {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Subjects mentioning "urgent" get high priority
pub fn is_urgent(subject: &str) -> bool {
    subject.to_lowercase().contains("urgent")
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn or_not_provided(value: &Option<String>) -> &str {
    value.as_deref().filter(|v| !v.trim().is_empty()).unwrap_or(NOT_PROVIDED)
}

fn detail_rows(form: &ContactForm) -> Vec<(&'static str, String)> {
    vec![
        ("Name", form.name.clone()),
        ("Company", or_not_provided(&form.company).to_string()),
        ("Email", form.email.clone()),
        ("Phone", or_not_provided(&form.phone).to_string()),
        ("Subject", form.subject.clone()),
    ]
}

fn html_details(form: &ContactForm) -> String {
    let mut html = String::new();
    for (label, value) in detail_rows(form) {
        html.push_str(&format!("<p><strong>{}:</strong> {}</p>\n", label, escape_html(&value)));
    }
    html.push_str(&format!(
        "<p><strong>Message:</strong></p>\n<p style=\"border-left: 4px solid #2E8B57; padding: 15px;\">{}</p>\n",
        escape_html(&form.message)
    ));
    html
}

fn text_details(form: &ContactForm) -> String {
    let mut text = String::new();
    for (label, value) in detail_rows(form) {
        text.push_str(&format!("{}: {}\n", label, value));
    }
    text.push_str(&format!("Message: {}\n", form.message));
    text
}

/// Acknowledgement sent to the person who filled in the form
pub fn confirmation_email(form: &ContactForm) -> EmailContent {
    let html = format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<body style=\"font-family: Arial, sans-serif; color: #333;\">\n\
         <h1>Thank You for Reaching Out!</h1>\n\
         <h2>Hello {name}!</h2>\n\
         <p>Thank you for contacting Hexapure. We have received your enquiry and our team will review it shortly.</p>\n\
         <h3>Your Message Details:</h3>\n{details}\
         <p>Our typical response time is <strong>24-48 hours</strong>. If your enquiry is urgent, please call us at <strong>{phone}</strong>.</p>\n\
         <p>Best regards,<br><strong>The Hexapure Team</strong></p>\n\
         <p style=\"font-size: 12px; color: #666;\">Hexapure - Leaders in Eco-Friendly Wastewater Solutions</p>\n\
         </body>\n</html>\n",
        name = escape_html(&form.name),
        details = html_details(form),
        phone = CONTACT_PHONE,
    );
    let text = format!(
        "Thank you for contacting Hexapure!\n\nHello {name}!\n\n\
         We have received your enquiry and our team will review it shortly.\n\n\
         Your Message Details:\n{details}\n\
         Our typical response time is 24-48 hours. If your enquiry is urgent, please call us at {phone}.\n\n\
         Best regards,\nThe Hexapure Team\n",
        name = form.name,
        details = text_details(form),
        phone = CONTACT_PHONE,
    );
    EmailContent {
        subject: "Thank you for contacting Hexapure!".to_string(),
        html,
        text,
    }
}

/// Notice sent to the company inbox
pub fn admin_notification(form: &ContactForm, submitted_at: DateTime<Utc>) -> EmailContent {
    let priority = if is_urgent(&form.subject) {
        "HIGH - Contains urgent keyword"
    } else {
        "Normal"
    };
    let submitted = submitted_at.format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let html = format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<body style=\"font-family: Arial, sans-serif; color: #333;\">\n\
         <h1>New Contact Form Submission</h1>\n\
         <h3>Customer Information:</h3>\n{details}\
         <p><strong>Submitted on:</strong> {submitted}</p>\n\
         <p><strong>Action Required:</strong> Please respond to this enquiry within 24-48 hours.</p>\n\
         <p><strong>Priority:</strong> {priority}</p>\n\
         <p>Please log in to the admin dashboard to manage this enquiry.</p>\n\
         <p style=\"font-size: 12px; color: #666;\">This is an automated message. Please do not reply to this email.</p>\n\
         </body>\n</html>\n",
        details = html_details(form),
        submitted = submitted,
        priority = priority,
    );
    let text = format!(
        "New Contact Form Submission - Hexapure\n\nCustomer Information:\n{details}\
         Submitted on: {submitted}\n\n\
         Action Required: Please respond to this enquiry within 24-48 hours.\n\
         Priority: {priority}\n\n\
         Please log in to the admin dashboard to manage this enquiry.\n",
        details = text_details(form),
        submitted = submitted,
        priority = priority,
    );
    EmailContent {
        subject: "New Contact Form Submission - Hexapure".to_string(),
        html,
        text,
    }
}

/// Sends the confirmation and the admin notice through Brevo
#[derive(Clone)]
pub struct Mailer {
    config: MailerConfig,
    client: Client,
}

impl Mailer {
    pub fn new(config: &MailerConfig, timeout: Option<std::time::Duration>) -> Result<Self> {
        Ok(Self::with_client(config, http_client(timeout)?))
    }

    pub fn with_client(config: &MailerConfig, client: Client) -> Self {
        Self {
            config: config.clone(),
            client,
        }
    }

    async fn send(&self, sender_name: &str, to: &str, to_name: &str, content: EmailContent) -> Result<()> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::config("BREVO_API_KEY"))?;

        let body = SendEmailBody {
            sender: EmailAddress {
                email: self.config.from_email.clone(),
                name: Some(sender_name.to_string()),
            },
            to: vec![EmailAddress {
                email: to.to_string(),
                name: Some(to_name.to_string()),
            }],
            subject: content.subject,
            html_content: content.html,
            text_content: content.text,
        };

        let url = format!("{}/v3/smtp/email", self.config.api_url.trim_end_matches('/'));
        let response = Fetch::post(&self.client, &url)
            .header("api-key", api_key)
            .header("Accept", "application/json")
            .json(&body)?
            .execute_raw()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(Error::function(format!("Brevo send failed (status={}): {}", status, text)))
    }

    /// Validate the form, email the submitter, then the admin inbox
    pub async fn send_contact_emails(&self, form: &ContactForm) -> Result<()> {
        form.validate()?;

        self.send("Hexapure", &form.email, &form.name, confirmation_email(form))
            .await?;
        info!("Confirmation email sent to {}", form.email);

        self.send(
            "Hexapure System",
            &self.config.admin_email,
            "Hexapure Admin",
            admin_notification(form, Utc::now()),
        )
        .await?;
        info!("Notification email sent to admin");
        Ok(())
    }
}

#[async_trait]
impl Notifier for Mailer {
    async fn notify(&self, form: &ContactForm) -> Result<()> {
        self.send_contact_emails(form).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn form(subject: &str) -> ContactForm {
        ContactForm {
            name: "Priya <script>".into(),
            company: Some("".into()),
            phone: None,
            email: "priya@example.com".into(),
            subject: subject.into(),
            message: "Tank & pipes".into(),
        }
    }

    #[test]
    fn urgent_subjects_are_high_priority() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        let urgent = admin_notification(&form("URGENT: overflow"), at);
        assert!(urgent.text.contains("Priority: HIGH - Contains urgent keyword"));
        assert!(urgent.text.contains("Submitted on: 2024-05-01 09:30:00 UTC"));

        let normal = admin_notification(&form("Quote"), at);
        assert!(normal.text.contains("Priority: Normal"));
    }

    #[test]
    fn user_input_is_escaped_in_html_only() {
        let email = confirmation_email(&form("Quote"));
        assert!(email.html.contains("Priya &lt;script&gt;"));
        assert!(email.html.contains("Tank &amp; pipes"));
        assert!(email.text.contains("Hello Priya <script>!"));
        assert!(email.text.contains("Company: Not provided"));
    }

    #[tokio::test]
    async fn missing_fields_are_rejected_before_sending() {
        let mailer = Mailer::new(&MailerConfig::default(), None).unwrap();
        let mut incomplete = form("Quote");
        incomplete.message = String::new();
        assert!(matches!(
            mailer.send_contact_emails(&incomplete).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn missing_api_key_is_a_config_error() {
        let mailer = Mailer::new(&MailerConfig::default(), None).unwrap();
        assert!(matches!(
            mailer.send_contact_emails(&form("Quote")).await,
            Err(Error::Config(_))
        ));
    }
}
