use std::future::Future;

use requirements_mcp_core::jsonrpc::{BatchProcessor, InvocationContext};
use tokio_util::sync::CancellationToken;

use crate::forwarder::{ForwardError, HttpForwarder};

/// Where the bridge sends each frame read from stdin. An empty reply means
/// there is nothing to write back.
pub trait Upstream: Send + Sync + 'static {
    fn forward(
        &self,
        frame: Vec<u8>,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<Vec<u8>, ForwardError>> + Send;
}

impl Upstream for HttpForwarder {
    async fn forward(
        &self,
        frame: Vec<u8>,
        cancel: CancellationToken,
    ) -> Result<Vec<u8>, ForwardError> {
        HttpForwarder::forward(self, frame, &cancel).await
    }
}

/// Serves frames from an in-process method table.
impl Upstream for BatchProcessor {
    async fn forward(
        &self,
        frame: Vec<u8>,
        cancel: CancellationToken,
    ) -> Result<Vec<u8>, ForwardError> {
        let ctx = InvocationContext::new(cancel.clone());
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ForwardError::Cancelled),
            reply = self.handle(&ctx, &frame) => Ok(reply.unwrap_or_default()),
        }
    }
}
