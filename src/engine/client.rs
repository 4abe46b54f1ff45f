//! HTTP client for the remote fraud-analysis engine.
//!
//! The engine takes the agent's invoices and mission order as a multipart
//! form and answers with a JSON object, which is handed back untouched as
//! the raw payload.

use super::FraudEngine;
use crate::models::{RawPayload, StoredDocument};
use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Path of the detection endpoint, relative to the engine URL.
pub const DETECT_PATH: &str = "/detecter_fraude/";

/// Configuration for the engine client.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub url: String,
    pub timeout_seconds: u64,
    /// Extra attempts after a transport failure.
    pub retries: u32,
    pub show_progress: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".to_string(),
            timeout_seconds: 120,
            retries: 1,
            show_progress: true,
        }
    }
}

impl EngineConfig {
    pub fn endpoint(&self) -> String {
        format!("{}{}", self.url.trim_end_matches('/'), DETECT_PATH)
    }
}

pub struct EngineClient {
    config: EngineConfig,
    http_client: reqwest::Client,
}

impl EngineClient {
    pub fn new(config: EngineConfig) -> Result<Self> {
        info!("Using fraud-analysis engine at {}", config.endpoint());

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn send_once(
        &self,
        invoices: &[StoredDocument],
        mission_order: &StoredDocument,
    ) -> Result<RawPayload> {
        let url = self.config.endpoint();
        let form = build_form(invoices, mission_order)?;

        let response = self
            .http_client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow!("Request timed out after {}s", self.config.timeout_seconds)
                } else if e.is_connect() {
                    anyhow!("Cannot connect to fraud-analysis engine at {}", self.config.url)
                } else {
                    anyhow!("Failed to send request: {}", e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Engine error {}: {}", status, body));
        }

        let body = response
            .text()
            .await
            .context("Failed to read engine response")?;
        parse_payload(&body)
    }

    fn spinner(&self, invoice_count: usize) -> Option<ProgressBar> {
        if !self.config.show_progress {
            return None;
        }
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("Analyzing {} invoice(s)...", invoice_count));
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    }
}

impl FraudEngine for EngineClient {
    async fn detect(
        &self,
        invoices: &[StoredDocument],
        mission_order: &StoredDocument,
    ) -> Result<RawPayload> {
        let spinner = self.spinner(invoices.len());
        let attempts = self.config.retries + 1;
        let mut last_error = anyhow!("engine was not called");

        for attempt in 1..=attempts {
            debug!(
                "Engine request attempt {}/{} with {} invoice(s)",
                attempt,
                attempts,
                invoices.len()
            );
            match self.send_once(invoices, mission_order).await {
                Ok(payload) => {
                    if let Some(pb) = &spinner {
                        pb.finish_with_message("Analysis received");
                    }
                    return Ok(payload);
                }
                Err(e) => {
                    warn!("Engine request attempt {} failed: {}", attempt, e);
                    last_error = e;
                }
            }
        }

        if let Some(pb) = &spinner {
            pb.abandon_with_message("Analysis failed");
        }
        Err(last_error)
    }
}

/// Multipart form with one `factures` part per invoice and the
/// `ordre_mission` part.
pub fn build_form(
    invoices: &[StoredDocument],
    mission_order: &StoredDocument,
) -> Result<Form> {
    let mut form = Form::new();
    for invoice in invoices {
        form = form.part("factures", document_part(invoice)?);
    }
    Ok(form.part("ordre_mission", document_part(mission_order)?))
}

fn document_part(document: &StoredDocument) -> Result<Part> {
    Part::bytes(document.data.clone())
        .file_name(document.file_name.clone())
        .mime_str(&document.content_type)
        .with_context(|| {
            format!(
                "Invalid content type '{}' for {}",
                document.content_type, document.file_name
            )
        })
}

/// Parse an engine response body. Anything but a JSON object is an error.
pub fn parse_payload(body: &str) -> Result<RawPayload> {
    let value: Value = serde_json::from_str(body).context("Failed to parse engine response")?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!(
            "Engine returned {} instead of a JSON object",
            json_kind(&other)
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
