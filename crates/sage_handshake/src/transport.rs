//! Transport seam: one request, one response.
//!
//! Any transport that can carry a request and hand back the peer's bytes
//! works; deadlines and cancellation belong to the caller (wrap the future
//! in `tokio::time::timeout` — in-flight secrets are owned by handshake
//! state that scrubs itself when the future is dropped).

use async_trait::async_trait;

use crate::error::HandshakeError;
use crate::wire::HandshakeRequest;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver the request and return the responder's raw response bytes.
    async fn round_trip(&self, request: &HandshakeRequest) -> Result<Vec<u8>, HandshakeError>;
}
