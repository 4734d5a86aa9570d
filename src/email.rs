use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{error, info};

use crate::config::SmtpConfig;

#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub reply_to: Option<String>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutboundEmail) -> anyhow::Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn from_config(cfg: &SmtpConfig) -> anyhow::Result<Self> {
        let transport = if cfg.username.is_empty() {
            // Unauthenticated relay, e.g. a local dev catcher.
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&cfg.host)
                .port(cfg.port)
                .build()
        } else {
            let creds = Credentials::new(cfg.username.clone(), cfg.password.clone());
            AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.host)
                .context("smtp relay")?
                .port(cfg.port)
                .credentials(creds)
                .build()
        };
        let from = cfg.from_address.parse().context("smtp from address")?;
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: OutboundEmail) -> anyhow::Result<()> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .to(email.to.parse().context("recipient address")?)
            .subject(email.subject)
            .header(ContentType::TEXT_PLAIN);
        if let Some(reply_to) = email.reply_to {
            builder = builder.reply_to(reply_to.parse().context("reply-to address")?);
        }
        let message = builder.body(email.body)?;
        self.transport.send(message).await.context("smtp send")?;
        Ok(())
    }
}

/// Stand-in when SMTP is unconfigured and in tests: drops the message after
/// logging recipient and subject (never the body, which may carry a code).
pub struct NoopMailer;

#[async_trait]
impl Mailer for NoopMailer {
    async fn send(&self, email: OutboundEmail) -> anyhow::Result<()> {
        info!(to = %email.to, subject = %email.subject, "mailer unconfigured, dropping email");
        Ok(())
    }
}

/// Hands the send off to its own task so a slow relay never delays the HTTP
/// response. Failures are logged, not surfaced.
pub fn deliver(mailer: Arc<dyn Mailer>, email: OutboundEmail) {
    tokio::spawn(async move {
        let to = email.to.clone();
        if let Err(e) = mailer.send(email).await {
            error!(error = %e, %to, "email delivery failed");
        }
    });
}

pub fn verification_email(to: &str, code: &str) -> OutboundEmail {
    OutboundEmail {
        to: to.to_string(),
        subject: "Verify your email".into(),
        body: format!(
            "Your verification code is: {code}\n\n\
             The code is valid for 5 minutes. If you did not request it,\n\
             you can ignore this message.\n"
        ),
        reply_to: None,
    }
}

pub fn password_reset_email(to: &str, code: &str) -> OutboundEmail {
    OutboundEmail {
        to: to.to_string(),
        subject: "Password reset code".into(),
        body: format!(
            "Your password reset code is: {code}\n\n\
             The code is valid for 5 minutes. If you did not request a\n\
             reset, your password is still safe and no action is needed.\n"
        ),
        reply_to: None,
    }
}

pub fn feedback_email(
    admin: &str,
    name: &str,
    sender: &str,
    subject: Option<&str>,
    message: &str,
) -> OutboundEmail {
    OutboundEmail {
        to: admin.to_string(),
        subject: format!("New feedback: {}", subject.unwrap_or("No subject")),
        body: format!(
            "New feedback received\n\
             ---------------------\n\
             Name: {name}\n\
             Email: {sender}\n\
             Subject: {}\n\n\
             Message:\n{message}\n",
            subject.unwrap_or("N/A")
        ),
        reply_to: Some(sender.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_body_contains_code_once() {
        let email = verification_email("a@example.com", "042137");
        assert_eq!(email.to, "a@example.com");
        assert_eq!(email.body.matches("042137").count(), 1);
        assert!(email.reply_to.is_none());
    }

    #[test]
    fn reset_body_contains_code_once() {
        let email = password_reset_email("a@example.com", "990001");
        assert_eq!(email.body.matches("990001").count(), 1);
    }

    #[test]
    fn feedback_sets_reply_to_submitter() {
        let email = feedback_email("admin@example.com", "Ada", "ada@example.com", None, "hi");
        assert_eq!(email.to, "admin@example.com");
        assert_eq!(email.reply_to.as_deref(), Some("ada@example.com"));
        assert!(email.subject.contains("No subject"));
        assert!(email.body.contains("hi"));
    }

    #[tokio::test]
    async fn noop_mailer_accepts_anything() {
        let mailer = NoopMailer;
        let ok = mailer
            .send(verification_email("x@example.com", "000000"))
            .await;
        assert!(ok.is_ok());
    }
}
