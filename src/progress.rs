//! Progress-callback trait for per-document audit events.
//!
//! Inject an [`Arc<dyn AuditProgressCallback>`] via
//! [`crate::config::AuditConfigBuilder::progress_callback`] to receive events
//! as the batch moves through its documents. The CLI uses this to drive an
//! `indicatif` progress bar; a server could forward the same events to a
//! websocket.
//!
//! # Example
//!
//! ```rust
//! use invoice_audit::{AuditConfig, AuditProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl AuditProgressCallback for Counter {
//!     fn on_document_complete(&self, _index: usize, _total: usize, name: &str, score: u8) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{name}: {score}/100");
//!     }
//! }
//!
//! let config = AuditConfig::builder()
//!     .progress_callback(Arc::new(Counter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the batch pipeline as it processes each document.
///
/// All methods default to no-ops. `index` is 1-based in upload order.
/// With `document_concurrency > 1` the per-document methods may be called
/// from several tasks at once.
pub trait AuditProgressCallback: Send + Sync {
    /// Called once before the first document.
    fn on_batch_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called when a document enters the pipeline.
    fn on_document_start(&self, index: usize, total: usize, name: &str) {
        let _ = (index, total, name);
    }

    /// Called when a document has a risk score.
    fn on_document_complete(&self, index: usize, total: usize, name: &str, risk_score: u8) {
        let _ = (index, total, name, risk_score);
    }

    /// Called when a document failed a stage.
    fn on_document_error(&self, index: usize, total: usize, name: &str, error: &str) {
        let _ = (index, total, name, error);
    }

    /// Called once after every document has been attempted.
    fn on_batch_complete(&self, total_documents: usize, audited: usize) {
        let _ = (total_documents, audited);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl AuditProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::AuditConfig`].
pub type ProgressCallback = Arc<dyn AuditProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tracking {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
    }

    impl AuditProgressCallback for Tracking {
        fn on_document_start(&self, _index: usize, _total: usize, _name: &str) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_complete(&self, _index: usize, _total: usize, _name: &str, _score: u8) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_error(&self, _index: usize, _total: usize, _name: &str, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_document_start(1, 2, "a.pdf");
        cb.on_document_complete(1, 2, "a.pdf", 12);
        cb.on_document_error(2, 2, "b.pdf", "boom");
        cb.on_batch_complete(2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracking = Arc::new(Tracking::default());
        let cb: ProgressCallback = tracking.clone();
        cb.on_document_start(1, 2, "a.pdf");
        cb.on_document_complete(1, 2, "a.pdf", 40);
        cb.on_document_start(2, 2, "b.pdf");
        cb.on_document_error(2, 2, "b.pdf", "render failed");
        assert_eq!(tracking.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracking.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracking.errors.load(Ordering::SeqCst), 1);
    }
}
