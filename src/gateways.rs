use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::config::AppConfig;

/// Outbound email delivery. Production posts to an HTTP mail gateway;
/// tests swap in a recording fake.
#[async_trait]
pub trait EmailSender: Send + Sync + 'static {
    async fn send_email(
        &self,
        to: &str,
        from: &str,
        from_name: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<()>;
}

/// Outbound SMS delivery. The gateway confirms delivery synchronously.
#[async_trait]
pub trait SmsSender: Send + Sync + 'static {
    async fn send_sms(&self, to: &str, message: &str) -> Result<()>;
}

pub struct HttpEmailGateway {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpEmailGateway {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[async_trait]
impl EmailSender for HttpEmailGateway {
    async fn send_email(
        &self,
        to: &str,
        from: &str,
        from_name: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<()> {
        let payload = json!({
            "to": to,
            "from": from,
            "from_name": from_name,
            "subject": subject,
            "html": html_body,
        });

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("email gateway returned {status}: {body}"));
        }

        Ok(())
    }
}

pub struct HttpSmsGateway {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpSmsGateway {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[async_trait]
impl SmsSender for HttpSmsGateway {
    async fn send_sms(&self, to: &str, message: &str) -> Result<()> {
        let payload = json!({
            "to": to,
            "message": message,
        });

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("sms gateway returned {status}: {body}"));
        }

        Ok(())
    }
}

pub fn email_sender_from_config(config: &AppConfig) -> Arc<dyn EmailSender> {
    match &config.email_gateway_url {
        Some(url) => Arc::new(HttpEmailGateway::new(
            url.clone(),
            config.gateway_api_key.clone(),
        )),
        None => Arc::new(LoggingGateway),
    }
}

pub fn sms_sender_from_config(config: &AppConfig) -> Arc<dyn SmsSender> {
    match &config.sms_gateway_url {
        Some(url) => Arc::new(HttpSmsGateway::new(
            url.clone(),
            config.gateway_api_key.clone(),
        )),
        None => Arc::new(LoggingGateway),
    }
}

/// Stands in when no gateway endpoint is configured. Logs the would-be send
/// and reports success so local environments keep functioning.
pub struct LoggingGateway;

#[async_trait]
impl EmailSender for LoggingGateway {
    async fn send_email(
        &self,
        to: &str,
        _from: &str,
        _from_name: &str,
        subject: &str,
        _html_body: &str,
    ) -> Result<()> {
        tracing::info!(recipient = %to, %subject, "email gateway not configured; logging send");
        Ok(())
    }
}

#[async_trait]
impl SmsSender for LoggingGateway {
    async fn send_sms(&self, to: &str, message: &str) -> Result<()> {
        tracing::info!(recipient = %to, %message, "sms gateway not configured; logging send");
        Ok(())
    }
}
