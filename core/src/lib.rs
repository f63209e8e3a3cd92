pub mod config;
pub mod error;
pub mod jsonrpc;
pub mod redact;
pub mod secure;
