//! Service layer for Kotoscan business logic.
//!
//! Domain logic separated from transport concerns. Services are consumed
//! by the HTTP server but know nothing about axum.

pub mod annotate;
pub mod ingest;
pub mod scan;

pub use annotate::{AnnotateError, AnnotationService};
pub use scan::{ScanService, UploadError};
