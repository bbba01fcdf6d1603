//! GeeRPC Server
//!
//! This crate provides the server half of GeeRPC: a service catalog that
//! exposes registered methods as `"ServiceName.MethodName"` targets, a TCP
//! accept/serve loop with per-request handler tasks and a handle timeout,
//! and an HTTP adapter that accepts `CONNECT` and then speaks the normal
//! wire protocol over the hijacked byte stream.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde::{Deserialize, Serialize};
//! use geerpc_server::{Server, Service};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Args {
//!     num1: i64,
//!     num2: i64,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = Service::builder("Foo")
//!         .method("Sum", |args: Args, reply: &mut i64| -> Result<(), String> {
//!             *reply = args.num1 + args.num2;
//!             Ok(())
//!         })
//!         .build()?;
//!
//!     let server = Arc::new(Server::new());
//!     server.register(service)?;
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:9999").await?;
//!     server.accept(listener).await;
//!     Ok(())
//! }
//! ```

pub mod http;
pub mod server;
pub mod service;

pub use server::Server;
pub use service::{MethodInfo, Service, ServiceBuilder};
