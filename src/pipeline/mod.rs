//! Pipeline stages for invoice redaction and risk assessment.
//!
//! Each submodule implements one transformation step and is testable on its
//! own. The two remote services (document understanding, vision LLM) sit
//! behind traits so stages can be exercised without network access.
//!
//! ## Data Flow
//!
//! ```text
//! input ─┬─▶ extract ──▶ normalize ─┐
//!        │   (fields)    (0..1000)  │
//!        └─▶ render ────────────────┴─▶ redact ──▶ encode ──▶ assess ──▶ postprocess ──▶ score
//!            (page 1)                   (mask)     (JPEG)     (VLM)      (cleanup)        (0-100)
//! ```
//!
//! 1. [`input`]     : read a path or download a URL; hash the bytes for identity
//! 2. [`extract`]   : map the analysis result to invoice fields and PII regions;
//!    [`docintel`] is the REST client behind it
//! 3. [`normalize`] : rescale polygons to the canonical 1000×1000 space
//! 4. [`render`]    : rasterise page 1 (pdfium, `spawn_blocking`) or decode an image
//! 5. [`redact`]    : paint opaque black over each region
//! 6. [`encode`]    : JPEG-encode the redacted raster
//! 7. [`assess`]    : drive the vision-model call with retry/backoff
//! 8. [`postprocess`] : deterministic clean-up of the narrative
//! 9. [`score`]     : pull `RISK_SCORE: N` out of the narrative

pub mod assess;
pub mod docintel;
pub mod encode;
pub mod extract;
pub mod input;
pub mod normalize;
pub mod postprocess;
pub mod redact;
pub mod render;
pub mod score;
