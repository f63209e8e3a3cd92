use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::error::{HandlerError, RpcError};
use crate::jsonrpc::mapper::ErrorMapper;
use crate::jsonrpc::message::{FALLBACK_INTERNAL_ERROR, Request, RequestId, Response};
use crate::jsonrpc::validator;
use crate::redact::mask_sensitive;

/// Who is calling, as established by whatever sits in front of the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: String,
    pub username: Option<String>,
}

/// Per-invocation context handed to handlers.
#[derive(Debug, Clone, Default)]
pub struct InvocationContext {
    caller: Option<CallerIdentity>,
    cancel: CancellationToken,
    request_id: Option<RequestId>,
}

impl InvocationContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            caller: None,
            cancel,
            request_id: None,
        }
    }

    pub fn with_caller(mut self, caller: CallerIdentity) -> Self {
        self.caller = Some(caller);
        self
    }

    pub fn caller(&self) -> Option<&CallerIdentity> {
        self.caller.as_ref()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Id of the request being served; `None` for notifications.
    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    fn for_request(&self, id: Option<RequestId>) -> Self {
        Self {
            caller: self.caller.clone(),
            cancel: self.cancel.clone(),
            request_id: id,
        }
    }
}

/// A method implementation.
pub trait Handler: Send + Sync + 'static {
    fn call(
        &self,
        ctx: InvocationContext,
        params: Option<Value>,
    ) -> BoxFuture<'static, Result<Value, HandlerError>>;
}

impl<F, Fut> Handler for F
where
    F: Fn(InvocationContext, Option<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    fn call(
        &self,
        ctx: InvocationContext,
        params: Option<Value>,
    ) -> BoxFuture<'static, Result<Value, HandlerError>> {
        Box::pin(self(ctx, params))
    }
}

/// Decode `params` into a typed struct; failures are invalid-params.
/// Missing params decode as an empty object.
pub fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, HandlerError> {
    let value = match params {
        None | Some(Value::Null) => Value::Object(Default::default()),
        Some(value) => value,
    };
    serde_json::from_value(value).map_err(|e| RpcError::invalid_params(e.to_string()).into())
}

#[derive(Debug, Error, PartialEq)]
pub enum RegistrationError {
    #[error("invalid method name: {0}")]
    InvalidName(RpcError),

    #[error("method '{0}' is already registered")]
    Duplicate(String),
}

/// Registration phase. Single-threaded; [`ProcessorBuilder::build`] freezes
/// the table.
#[derive(Default)]
pub struct ProcessorBuilder {
    handlers: HashMap<String, Arc<dyn Handler>>,
    mapper: ErrorMapper,
}

impl ProcessorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mapper(mut self, mapper: ErrorMapper) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn register<H: Handler>(
        &mut self,
        method: impl Into<String>,
        handler: H,
    ) -> Result<&mut Self, RegistrationError> {
        let method = method.into();
        validator::validate_method_name(&method).map_err(RegistrationError::InvalidName)?;
        if self.handlers.contains_key(&method) {
            return Err(RegistrationError::Duplicate(method));
        }
        self.handlers.insert(method, Arc::new(handler));
        Ok(self)
    }

    pub fn build(self) -> Processor {
        Processor {
            handlers: Arc::new(self.handlers),
            mapper: self.mapper,
        }
    }
}

/// Executes single requests and notifications against a frozen method table.
/// Cloning shares the table.
#[derive(Clone)]
pub struct Processor {
    handlers: Arc<HashMap<String, Arc<dyn Handler>>>,
    mapper: ErrorMapper,
}

impl Processor {
    pub fn builder() -> ProcessorBuilder {
        ProcessorBuilder::new()
    }

    pub fn has(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.handlers.keys().cloned().collect();
        methods.sort();
        methods
    }

    /// Handle one encoded message. `None` means nothing is to be written
    /// (the message was a notification).
    pub async fn handle(&self, ctx: &InvocationContext, bytes: &[u8]) -> Option<Vec<u8>> {
        let value: Value = match serde_json::from_slice(bytes) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(error = %e, "rejecting unparseable message");
                return Some(encode_response(&Response::error(
                    RequestId::Null,
                    RpcError::parse_error(e.to_string()),
                )));
            }
        };
        self.handle_value(ctx, value)
            .await
            .map(|response| encode_response(&response))
    }

    /// Handle one decoded message.
    pub async fn handle_value(&self, ctx: &InvocationContext, value: Value) -> Option<Response> {
        match Request::from_value(value) {
            Ok(request) => self.dispatch(ctx, request).await,
            Err(err) => {
                tracing::debug!(id = %err.id, code = err.error.code, "rejecting invalid request");
                Some(err.into_response())
            }
        }
    }

    /// Run a validated request through its handler.
    pub async fn dispatch(&self, ctx: &InvocationContext, request: Request) -> Option<Response> {
        let notification = request.is_notification();
        let id = request.response_id();
        let method = request.method;

        let Some(handler) = self.handlers.get(&method).cloned() else {
            if notification {
                tracing::debug!(method = %method, "ignoring notification for unknown method");
                return None;
            }
            tracing::debug!(method = %method, id = %id, "method not found");
            return Some(Response::error(id, RpcError::method_not_found(&method)));
        };

        tracing::debug!(method = %method, id = %id, notification, "dispatching");
        let outcome = handler
            .call(ctx.for_request(request.id), request.params)
            .await;

        if notification {
            if let Err(err) = outcome {
                tracing::warn!(
                    method = %method,
                    error = %mask_sensitive(&err.to_string()),
                    "notification handler failed"
                );
            }
            return None;
        }

        Some(match outcome {
            Ok(result) => Response::success(id, result),
            Err(err) => {
                let mapped = self.mapper.map(&err);
                tracing::debug!(
                    method = %method,
                    id = %id,
                    code = mapped.code,
                    cause = %mask_sensitive(&err.to_string()),
                    "handler failed"
                );
                Response::error(id, mapped)
            }
        })
    }
}

/// Encode a response, falling back to a canned internal error.
pub fn encode_response(response: &Response) -> Vec<u8> {
    response.to_bytes().unwrap_or_else(|err| {
        tracing::error!(error = %err, "failed to serialize response");
        FALLBACK_INTERNAL_ERROR.to_vec()
    })
}
