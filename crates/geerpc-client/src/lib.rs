//! GeeRPC Client
//!
//! This crate provides the client half of GeeRPC:
//!
//! - [`Client`] multiplexes any number of concurrent calls over a single
//!   connection, correlating responses by sequence number.
//! - [`Discovery`] resolves server addresses under a selection policy,
//!   either from a fixed list ([`MultiServersDiscovery`]) or from a
//!   registry endpoint ([`RegistryDiscovery`]).
//! - [`XClient`] combines the two: single calls against one discovered
//!   server, or a broadcast across all of them.
//!
//! # Usage
//!
//! ```no_run
//! use serde::{Deserialize, Serialize};
//! use geerpc_client::Client;
//! use geerpc_common::Options;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Args {
//!     num1: i64,
//!     num2: i64,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::dial("127.0.0.1:9999", Options::default()).await?;
//!     let sum: i64 = client.call("Foo.Sum", &Args { num1: 2, num2: 3 }).await?;
//!     assert_eq!(sum, 5);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod discovery;
pub mod xclient;

pub use client::{Call, Client};
pub use discovery::{
    Discovery, MultiServersDiscovery, RegistryDiscovery, SelectMode, DEFAULT_REFRESH_INTERVAL,
};
pub use xclient::XClient;
