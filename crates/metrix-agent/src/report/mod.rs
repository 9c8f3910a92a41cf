//! Delivery of snapshots to the server.
//!
//! Both transports share one send path: encode, encrypt (optional), compress
//! (optional), tag. A failed report is logged by the caller and not retried.

mod grpc;
mod http;

pub(crate) use grpc::GrpcReporter;
pub(crate) use http::HttpReporter;

use metrix_core::collector::Snapshot;
use metrix_core::security::{CryptoError, IntegrityError};

#[derive(Debug, thiserror::Error)]
pub(crate) enum ReportError {
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server answered {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("rpc: {0}")]
    Rpc(#[from] tonic::Status),
    #[error("rpc transport: {0}")]
    Transport(#[from] tonic::transport::Error),
    #[error("invalid metadata value: {0}")]
    Metadata(String),
}

/// A transport able to deliver one snapshot as a batch.
pub(crate) trait Reporter {
    /// Returns the number of metrics the server accepted.
    async fn report(&mut self, snapshot: &Snapshot) -> Result<usize, ReportError>;
}

/// Sends through whichever transport was configured.
pub(crate) enum AnyReporter {
    Http(HttpReporter),
    Grpc(GrpcReporter),
}

impl Reporter for AnyReporter {
    async fn report(&mut self, snapshot: &Snapshot) -> Result<usize, ReportError> {
        match self {
            AnyReporter::Http(r) => r.report(snapshot).await,
            AnyReporter::Grpc(r) => r.report(snapshot).await,
        }
    }
}
