//! JSON-RPC 2.0 engine: message model, validation, error mapping and
//! dispatch of single and batch messages.

pub mod batch;
pub mod mapper;
pub mod message;
pub mod processor;
pub mod validator;

pub use batch::{BatchProcessor, BatchReply};
pub use mapper::ErrorMapper;
pub use message::{JSONRPC_VERSION, MessageError, Notification, Outcome, Request, RequestId, Response};
pub use processor::{
    CallerIdentity, Handler, InvocationContext, Processor, ProcessorBuilder, RegistrationError,
    parse_params,
};
