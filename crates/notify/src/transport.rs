//! The three notification transports: shell, email, webhook.
//! Each implements one `Transport` trait so the engine can dispatch
//! without knowing the concrete backend.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use sha2::Sha256;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::TransportError;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn dispatch(&self, address: &str, subject: &str, body: &str) -> Result<(), TransportError>;
}

/// Names that must not be overridden when building the shell command's
/// environment, mirroring the pack's spawn-hardening idiom.
fn is_dangerous_env_var(name: &str) -> bool {
    const BLOCKED: &[&str] = &[
        "LD_PRELOAD",
        "LD_LIBRARY_PATH",
        "PATH",
        "HOME",
        "SHELL",
        "IFS",
        "BASH_ENV",
        "ENV",
    ];
    BLOCKED.contains(&name.to_ascii_uppercase().as_str())
}

/// Runs a configured shell command template, passing the alert fields as
/// `CRAB_ALERT_*` environment variables.
pub struct ShellTransport {
    pub command_template: String,
}

#[async_trait]
impl Transport for ShellTransport {
    async fn dispatch(&self, address: &str, subject: &str, body: &str) -> Result<(), TransportError> {
        let mut env: HashMap<&str, &str> = HashMap::new();
        env.insert("CRAB_ALERT_ADDRESS", address);
        env.insert("CRAB_ALERT_SUBJECT", subject);
        env.insert("CRAB_ALERT_BODY", body);

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command_template)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        for (key, value) in env {
            if !is_dangerous_env_var(key) {
                cmd.env(key, value);
            }
        }

        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(TransportError::ShellExitStatus(
                output.status.code().unwrap_or(-1),
            ));
        }
        Ok(())
    }
}

/// SMTP dispatch via `lettre`, configured under `[transport:email]`.
pub struct EmailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailTransport {
    pub fn new(
        smtp_host: &str,
        smtp_port: u16,
        from: &str,
        credentials: Option<(String, String)>,
    ) -> Result<Self, TransportError> {
        let from = from
            .parse()
            .map_err(|e| TransportError::EmailAddress(from.to_string(), e))?;
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)
            .map_err(TransportError::Smtp)?
            .port(smtp_port);
        if let Some((user, pass)) = credentials {
            builder = builder.credentials(Credentials::new(user, pass));
        }
        Ok(Self {
            mailer: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Transport for EmailTransport {
    async fn dispatch(&self, address: &str, subject: &str, body: &str) -> Result<(), TransportError> {
        let to: Mailbox = address
            .parse()
            .map_err(|e| TransportError::EmailAddress(address.to_string(), e))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .body(body.to_string())?;
        self.mailer.send(message).await?;
        Ok(())
    }
}

/// POSTs a JSON body, optionally HMAC-SHA256 signed with a shared
/// secret, the same scheme applied symmetrically outbound as inbound
/// webhook verification normally checks.
pub struct WebhookTransport {
    client: reqwest::Client,
    secret: Option<String>,
}

impl WebhookTransport {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            secret,
        }
    }
}

type HmacSha256 = Hmac<Sha256>;

#[async_trait]
impl Transport for WebhookTransport {
    async fn dispatch(&self, address: &str, subject: &str, body: &str) -> Result<(), TransportError> {
        let payload = serde_json::json!({ "subject": subject, "body": body });
        let bytes = serde_json::to_vec(&payload).expect("json serialization of string fields cannot fail");

        let mut request = self.client.post(address).header("content-type", "application/json");
        if let Some(secret) = &self.secret {
            let mut mac =
                HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts keys of any length");
            mac.update(&bytes);
            let signature = hex::encode(mac.finalize().into_bytes());
            request = request.header("x-crab-signature", format!("sha256={signature}"));
        }

        let response = request.body(bytes).send().await?;
        if !response.status().is_success() {
            return Err(TransportError::WebhookStatus(response.status().as_u16()));
        }
        Ok(())
    }
}
