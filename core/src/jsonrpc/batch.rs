use futures::future::join_all;
use serde_json::Value;

use crate::error::RpcError;
use crate::jsonrpc::message::{RequestId, Response};
use crate::jsonrpc::processor::{InvocationContext, Processor, encode_response};
use crate::jsonrpc::validator::validate_batch;

/// Accepts either a single message or a batch array and routes it through a
/// [`Processor`].
#[derive(Clone)]
pub struct BatchProcessor {
    processor: Processor,
}

impl BatchProcessor {
    pub fn new(processor: Processor) -> Self {
        Self { processor }
    }

    pub fn processor(&self) -> &Processor {
        &self.processor
    }

    /// `None` when there is nothing to write back: a lone notification, or a
    /// batch made only of notifications.
    pub async fn handle(&self, ctx: &InvocationContext, bytes: &[u8]) -> Option<Vec<u8>> {
        let value: Value = match serde_json::from_slice(bytes) {
            Ok(value) => value,
            Err(e) => {
                return Some(encode_response(&Response::error(
                    RequestId::Null,
                    RpcError::parse_error(e.to_string()),
                )));
            }
        };

        match value {
            batch @ Value::Array(_) => {
                let responses = self.handle_batch(ctx, batch).await?;
                match serde_json::to_vec(&responses) {
                    Ok(bytes) => Some(bytes),
                    Err(err) => {
                        tracing::error!(error = %err, "failed to serialize batch response");
                        Some(encode_response(&Response::error(
                            RequestId::Null,
                            RpcError::internal(err.to_string()),
                        )))
                    }
                }
            }
            single => self
                .processor
                .handle_value(ctx, single)
                .await
                .map(|response| encode_response(&response)),
        }
    }

    /// Runs every element concurrently and returns the responses in input
    /// order, notifications omitted. A batch that is empty or not an array is
    /// answered with a single invalid-request error object, not an array.
    pub async fn handle_batch(&self, ctx: &InvocationContext, batch: Value) -> Option<BatchReply> {
        let issues = match validate_batch(&batch) {
            Ok(issues) => issues,
            Err(error) => {
                return Some(BatchReply::Single(Response::error(RequestId::Null, error)));
            }
        };
        if !issues.is_empty() {
            tracing::debug!(invalid = issues.len(), "batch has invalid elements");
        }
        // validate_batch only accepts arrays
        let Value::Array(items) = batch else {
            return None;
        };

        tracing::debug!(size = items.len(), "processing batch");
        let responses: Vec<Response> = join_all(
            items
                .into_iter()
                .map(|item| self.processor.handle_value(ctx, item)),
        )
        .await
        .into_iter()
        .flatten()
        .collect();

        if responses.is_empty() {
            None
        } else {
            Some(BatchReply::Many(responses))
        }
    }
}

/// What a batch turns into on the wire.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum BatchReply {
    Single(Response),
    Many(Vec<Response>),
}
