//! REST client for the Azure AI Document Intelligence invoice model.
//!
//! Analysis is a long-running operation: the `:analyze` POST answers
//! `202 Accepted` with an `Operation-Location` header, which is polled until
//! the status is `succeeded` or `failed`.

use crate::config::{ExtractionConfig, ENV_DI_ENDPOINT, ENV_DI_KEY};
use crate::error::{ExtractionError, InvoiceAuditError};
use crate::pipeline::extract::{AnalyzedDocument, DocumentAnalyzer};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const OPERATION_LOCATION_HEADER: &str = "Operation-Location";

/// Polling response for an analyze operation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeOperation {
    status: OperationStatus,
    #[serde(default)]
    analyze_result: Option<AnalyzedDocument>,
    #[serde(default)]
    error: Option<ServiceError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
enum OperationStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// [`DocumentAnalyzer`] backed by the Document Intelligence REST API.
pub struct AzureDocumentAnalyzer {
    client: reqwest::Client,
    analyze_url: String,
    api_key: String,
    poll_interval: Duration,
    max_polls: u32,
    request_timeout_secs: u64,
}

impl std::fmt::Debug for AzureDocumentAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureDocumentAnalyzer")
            .field("analyze_url", &self.analyze_url)
            .field("max_polls", &self.max_polls)
            .finish_non_exhaustive()
    }
}

impl AzureDocumentAnalyzer {
    /// Build a client from config. Endpoint and key are both required.
    pub fn new(config: &ExtractionConfig) -> Result<Self, InvoiceAuditError> {
        let endpoint = config.endpoint.as_deref().ok_or_else(|| {
            InvoiceAuditError::ExtractorNotConfigured(format!(
                "no endpoint; set {} or pass --di-endpoint",
                ENV_DI_ENDPOINT
            ))
        })?;
        let api_key = config.api_key.clone().ok_or_else(|| {
            InvoiceAuditError::ExtractorNotConfigured(format!(
                "no key; set {} or pass --di-key",
                ENV_DI_KEY
            ))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| InvoiceAuditError::Internal(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            analyze_url: analyze_url(endpoint, &config.model_id, &config.api_version),
            api_key,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_polls: config.max_polls,
            request_timeout_secs: config.request_timeout_secs,
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> ExtractionError {
        if e.is_timeout() {
            ExtractionError::Timeout {
                secs: self.request_timeout_secs,
            }
        } else {
            ExtractionError::Request {
                detail: e.to_string(),
            }
        }
    }

    async fn submit(&self, bytes: &[u8]) -> Result<String, ExtractionError> {
        let response = self
            .client
            .post(&self.analyze_url)
            .header(SUBSCRIPTION_KEY_HEADER, &self.api_key)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status != StatusCode::ACCEPTED && !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .headers()
            .get(OPERATION_LOCATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ExtractionError::MalformedResponse {
                detail: format!("HTTP {} without {} header", status, OPERATION_LOCATION_HEADER),
            })
    }

    async fn poll(&self, operation_url: &str) -> Result<AnalyzedDocument, ExtractionError> {
        for attempt in 1..=self.max_polls {
            let response = self
                .client
                .get(operation_url)
                .header(SUBSCRIPTION_KEY_HEADER, &self.api_key)
                .send()
                .await
                .map_err(|e| self.transport_error(e))?;

            let status = response.status();
            let wait = retry_after(response.headers()).unwrap_or(self.poll_interval);
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ExtractionError::Http {
                    status: status.as_u16(),
                    body,
                });
            }

            let operation: AnalyzeOperation =
                response
                    .json()
                    .await
                    .map_err(|e| ExtractionError::MalformedResponse {
                        detail: e.to_string(),
                    })?;

            match operation.status {
                OperationStatus::Succeeded => {
                    return operation.analyze_result.ok_or_else(|| {
                        ExtractionError::MalformedResponse {
                            detail: "succeeded without analyzeResult".into(),
                        }
                    });
                }
                OperationStatus::Failed | OperationStatus::Canceled => {
                    let err = operation.error.unwrap_or_default();
                    return Err(ExtractionError::AnalysisFailed {
                        code: err.code,
                        message: err.message,
                    });
                }
                OperationStatus::NotStarted
                | OperationStatus::Running
                | OperationStatus::Unknown => {
                    debug!(
                        "Analysis {:?} (poll {}/{}), waiting {:?}",
                        operation.status, attempt, self.max_polls, wait
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }

        Err(ExtractionError::PollExhausted {
            attempts: self.max_polls,
        })
    }
}

#[async_trait]
impl DocumentAnalyzer for AzureDocumentAnalyzer {
    async fn analyze(&self, bytes: &[u8]) -> Result<AnalyzedDocument, ExtractionError> {
        info!("Submitting {} bytes for invoice analysis", bytes.len());
        let operation_url = self.submit(bytes).await?;
        self.poll(&operation_url).await
    }
}

/// `{endpoint}/documentintelligence/documentModels/{model}:analyze?api-version={version}`
fn analyze_url(endpoint: &str, model_id: &str, api_version: &str) -> String {
    format!(
        "{}/documentintelligence/documentModels/{}:analyze?api-version={}",
        endpoint.trim_end_matches('/'),
        model_id,
        api_version
    )
}

/// `Retry-After` in whole seconds, if the service sent one.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn analyze_url_is_built_from_config() {
        let url = analyze_url("https://di.example.com/", "prebuilt-invoice", "2024-11-30");
        assert_eq!(
            url,
            "https://di.example.com/documentintelligence/documentModels/prebuilt-invoice:analyze?api-version=2024-11-30"
        );
    }

    #[test]
    fn missing_endpoint_or_key_is_a_config_error() {
        let err = AzureDocumentAnalyzer::new(&ExtractionConfig::default()).unwrap_err();
        assert!(matches!(err, InvoiceAuditError::ExtractorNotConfigured(_)));

        let only_endpoint = ExtractionConfig {
            endpoint: Some("https://di.example.com".into()),
            ..ExtractionConfig::default()
        };
        let err = AzureDocumentAnalyzer::new(&only_endpoint).unwrap_err();
        assert!(err.to_string().contains(ENV_DI_KEY));
    }

    #[test]
    fn retry_after_seconds_are_honoured() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("2"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(2)));
    }

    #[test]
    fn operation_payloads_deserialize() {
        let running: AnalyzeOperation = serde_json::from_str(r#"{"status":"running"}"#).unwrap();
        assert_eq!(running.status, OperationStatus::Running);

        let failed: AnalyzeOperation = serde_json::from_str(
            r#"{"status":"failed","error":{"code":"InvalidContent","message":"corrupt"}}"#,
        )
        .unwrap();
        assert_eq!(failed.status, OperationStatus::Failed);
        assert_eq!(failed.error.unwrap().code, "InvalidContent");

        let done: AnalyzeOperation = serde_json::from_str(
            r#"{"status":"succeeded","analyzeResult":{"pages":[{"pageNumber":1,"width":8.5,"height":11}],"documents":[]}}"#,
        )
        .unwrap();
        assert_eq!(done.analyze_result.unwrap().pages.len(), 1);

        let odd: AnalyzeOperation = serde_json::from_str(r#"{"status":"paused"}"#).unwrap();
        assert_eq!(odd.status, OperationStatus::Unknown);
    }
}
