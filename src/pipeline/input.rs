//! Input resolution: turn a path or URL into an in-memory [`SourceDocument`].
//!
//! Every document is identified by the SHA-256 of its bytes rather than by
//! file name. Two uploads called `invoice.pdf` are different documents; the
//! same bytes uploaded twice are the same document and hit the session cache.

use crate::error::{DocumentError, InvoiceAuditError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Content-derived identity of a document (lower-case hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    /// Hash the raw document bytes.
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether the document needs PDF rendering or plain image decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Pdf,
    Raster,
}

impl DocumentKind {
    /// Detect the kind from magic bytes, falling back to the file extension.
    pub fn detect(name: &str, bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"%PDF") {
            return Some(DocumentKind::Pdf);
        }
        if bytes.starts_with(b"\x89PNG\r\n\x1a\n") || bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(DocumentKind::Raster);
        }
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("pdf") => Some(DocumentKind::Pdf),
            Some("png") | Some("jpg") | Some("jpeg") => Some(DocumentKind::Raster),
            _ => None,
        }
    }

    pub fn is_pdf(self) -> bool {
        self == DocumentKind::Pdf
    }
}

/// One uploaded invoice held in memory.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    name: String,
    bytes: Arc<[u8]>,
    kind: DocumentKind,
    id: DocumentId,
}

impl SourceDocument {
    /// Wrap bytes whose kind is already known.
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>, kind: DocumentKind) -> Self {
        let bytes: Vec<u8> = bytes.into();
        let id = DocumentId::of(&bytes);
        Self {
            name: name.into(),
            bytes: Arc::from(bytes),
            kind,
            id,
        }
    }

    /// Wrap bytes and detect their kind.
    pub fn from_bytes(
        name: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Result<Self, InvoiceAuditError> {
        let name = name.into();
        let bytes: Vec<u8> = bytes.into();
        let kind = DocumentKind::detect(&name, &bytes).ok_or_else(|| {
            InvoiceAuditError::UnsupportedDocument {
                name: name.clone(),
                magic: bytes.iter().take(4).copied().collect(),
            }
        })?;
        Ok(Self::new(name, bytes, kind))
    }

    /// Original file name as uploaded.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Shared handle to the bytes, cheap to move into blocking tasks.
    pub fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load a document from a local path or an HTTP(S) URL.
pub async fn load_document(
    input: &str,
    timeout_secs: u64,
) -> Result<SourceDocument, InvoiceAuditError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        load_local(Path::new(input)).await
    }
}

/// An input that never became a [`SourceDocument`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFailure {
    /// The path or URL as given.
    pub input: String,
    pub error: DocumentError,
}

/// Load every input in order, collecting failures instead of stopping.
///
/// Successfully loaded documents keep their relative order.
pub async fn load_documents(
    inputs: &[String],
    timeout_secs: u64,
) -> (Vec<SourceDocument>, Vec<InputFailure>) {
    let mut docs = Vec::with_capacity(inputs.len());
    let mut failures = Vec::new();
    for input in inputs {
        match load_document(input, timeout_secs).await {
            Ok(doc) => docs.push(doc),
            Err(e) => {
                warn!("Skipping '{}': {}", input, e);
                failures.push(InputFailure {
                    input: input.clone(),
                    error: DocumentError::from(&e),
                });
            }
        }
    }
    (docs, failures)
}

async fn load_local(path: &Path) -> Result<SourceDocument, InvoiceAuditError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => InvoiceAuditError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => InvoiceAuditError::FileNotFound {
            path: path.to_path_buf(),
        },
    })?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let doc = SourceDocument::from_bytes(name, bytes)?;
    debug!(
        "Loaded {} ({:?}, {} bytes, id {})",
        path.display(),
        doc.kind(),
        doc.bytes().len(),
        doc.id().short()
    );
    Ok(doc)
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<SourceDocument, InvoiceAuditError> {
    info!("Downloading invoice from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| InvoiceAuditError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            InvoiceAuditError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            InvoiceAuditError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(InvoiceAuditError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| InvoiceAuditError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    SourceDocument::from_bytes(filename_from_url(url), bytes.to_vec())
}

/// Last path segment of the URL, or a generic name.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded-invoice".to_string()
}
