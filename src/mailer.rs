use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};
use tracing::info;

use crate::config::SmtpConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl Mail {
    pub fn confirmation(to: &str, username: &str, link: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: "Confirm your registration".into(),
            body: format!(
                "Hello {username},\n\n\
                 Please confirm your email address by opening the link below:\n\n\
                 {link}\n\n\
                 If you did not sign up, you can ignore this message."
            ),
        }
    }

    pub fn password_reset(to: &str, username: &str, link: &str, ttl_minutes: i64) -> Self {
        Self {
            to: to.to_string(),
            subject: "Reset your password".into(),
            body: format!(
                "Hello {username},\n\n\
                 Someone asked to reset the password of your account. \
                 Open the link below within {ttl_minutes} minutes to choose a new one:\n\n\
                 {link}\n\n\
                 If it was not you, your current password keeps working."
            ),
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &Mail) -> anyhow::Result<()>;
}

/// Writes mail to the log instead of delivering it.
#[derive(Clone, Debug)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: &Mail) -> anyhow::Result<()> {
        info!(
            to = %mail.to,
            subject = %mail.subject,
            body = %mail.body,
            "mail not delivered (no SMTP configured)"
        );
        Ok(())
    }
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    /// Plain SMTP to a relay; TLS termination belongs to the relay.
    pub fn new(cfg: &SmtpConfig, from: &str) -> Self {
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&cfg.host).port(cfg.port);
        if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        Self {
            transport: builder.build(),
            from: from.to_string(),
        }
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: &Mail) -> anyhow::Result<()> {
        let message = Message::builder()
            .from(self.from.parse().context("parse sender address")?)
            .to(mail.to.parse().context("parse recipient address")?)
            .subject(&mail.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body.clone())
            .context("build message")?;
        self.transport.send(message).await.context("smtp send")?;
        info!(to = %mail.to, subject = %mail.subject, "mail sent");
        Ok(())
    }
}
