//! RPC service front.
//!
//! - `service`: in-process [`Executor`](crate::executor::Executor) over the engine
//! - `http`: axum routes exposing any executor
//! - `client`: executor talking to a remote service

mod client;
mod http;
mod service;

pub use client::RemoteExecutor;
pub use http::{create_router, serve, serve_on};
pub use service::ExecutionService;
