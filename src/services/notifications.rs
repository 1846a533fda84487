//! Outbound email. A failed send is an error for the caller; settlement
//! treats it as fatal to the enclosing transaction.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::config::MailConfig;
use crate::errors::ServiceError;

#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    /// Template name understood by the relay
    pub template: String,
    pub data: serde_json::Value,
    pub attachments: Vec<Attachment>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<(), ServiceError>;
}

pub type SharedNotifier = Arc<dyn Notifier>;

#[derive(Serialize)]
struct RelayAttachment<'a> {
    filename: &'a str,
    content_type: &'a str,
    content_base64: String,
}

#[derive(Serialize)]
struct RelayPayload<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    template: &'a str,
    data: &'a serde_json::Value,
    attachments: Vec<RelayAttachment<'a>>,
}

/// Posts messages as JSON to an HTTP mail relay.
pub struct HttpMailRelay {
    client: Client,
    relay_url: String,
    from_address: String,
}

impl HttpMailRelay {
    pub fn new(relay_url: impl Into<String>, config: &MailConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| {
                ServiceError::InternalError(format!("failed to build mail client: {}", e))
            })?;

        Ok(Self {
            client,
            relay_url: relay_url.into(),
            from_address: config.from_address.clone(),
        })
    }
}

#[async_trait]
impl Notifier for HttpMailRelay {
    #[instrument(skip(self, message), fields(to = %message.to, template = %message.template))]
    async fn send(&self, message: EmailMessage) -> Result<(), ServiceError> {
        let payload = RelayPayload {
            from: &self.from_address,
            to: &message.to,
            subject: &message.subject,
            template: &message.template,
            data: &message.data,
            attachments: message
                .attachments
                .iter()
                .map(|a| RelayAttachment {
                    filename: &a.filename,
                    content_type: &a.content_type,
                    content_base64: BASE64.encode(&a.content),
                })
                .collect(),
        };

        let response = self
            .client
            .post(&self.relay_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("mail relay unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "mail relay responded with {}",
                response.status()
            )));
        }

        info!("email handed to relay");
        Ok(())
    }
}

/// Logs messages instead of sending them. Used when no relay is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: EmailMessage) -> Result<(), ServiceError> {
        info!(
            to = %message.to,
            subject = %message.subject,
            template = %message.template,
            attachments = message.attachments.len(),
            "email not sent, no mail relay configured"
        );
        Ok(())
    }
}

/// Picks the relay when one is configured.
pub fn notifier_from_config(config: &MailConfig) -> Result<SharedNotifier, ServiceError> {
    match &config.relay_url {
        Some(url) => Ok(Arc::new(HttpMailRelay::new(url.clone(), config)?)),
        None => Ok(Arc::new(LogNotifier)),
    }
}
