//! GeeRPC Common Types and Wire Protocol
//!
//! This crate provides the protocol definitions, codec layer and framing
//! helpers shared by the GeeRPC client, server and registry crates.
//!
//! # Wire Protocol
//!
//! Every connection starts with a single handshake frame carrying
//! [`Options`] encoded as JSON, independent of the codec the peers go on to
//! use. After the handshake the connection carries an unbounded sequence of
//! `{Header, Body}` frame pairs, both encoded with the codec named in the
//! handshake.
//!
//! All frames share one format:
//!
//! ```text
//! [4-byte length as u32 big-endian] [payload]
//! ```
//!
//! # Components
//!
//! - [`protocol`] - [`Header`], handshake [`Options`] and protocol constants
//! - [`codec`] - the named codec table ([`WireCodec`])
//! - [`frame`] - length-prefixed frame I/O over split stream halves
//! - [`error`] - the shared [`RpcError`] type
//!
//! # Example
//!
//! ```
//! use geerpc_common::{Header, Options, WireCodec};
//!
//! let opt = Options::default();
//! let codec = WireCodec::from_name(&opt.codec_type).unwrap();
//!
//! let header = Header {
//!     service_method: "Foo.Sum".to_string(),
//!     seq: 1,
//!     error: String::new(),
//! };
//! let bytes = codec.encode(&header).unwrap();
//! let decoded: Header = codec.decode(&bytes).unwrap();
//! assert_eq!(header, decoded);
//! ```

pub mod codec;
pub mod error;
pub mod frame;
pub mod protocol;

pub use codec::WireCodec;
pub use error::{Result, RpcError};
pub use frame::{FrameReader, FrameWriter, MAX_FRAME_SIZE};
pub use protocol::{
    Header, Options, CONNECTED_STATUS, DEFAULT_DEBUG_PATH, DEFAULT_REGISTRY_PATH, DEFAULT_RPC_PATH,
    MAGIC_NUMBER, SERVERS_HEADER, SERVER_HEADER,
};
