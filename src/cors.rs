//! Access-control collaborator boundary.
//!
//! The engine never interprets access-control semantics itself; a request
//! may carry a collaborator that appends the access-control request headers
//! before a transfer and validates the response headers after it.

use crate::request::DownloadRequest;
use anyhow::Result;

/// Hooks for cross-origin access-control negotiation.
pub trait AccessControl: Send + Sync {
    /// Appends access-control request headers to the outgoing header lines.
    fn update_request(&self, headers: &mut Vec<String>);

    /// Validates a completed response. An error marks the request failed
    /// with the returned message.
    fn validate_response(&self, request: &mut DownloadRequest) -> Result<()>;
}
