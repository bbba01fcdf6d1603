use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("rpc client: connect timeout: expect within {0:?}")]
    ConnectTimeout(Duration),

    #[error("rpc client: call failed: {0}")]
    Cancelled(String),

    #[error("rpc client: connection is shut down")]
    Shutdown,

    #[error("rpc client: connection error: {0}")]
    Disconnected(String),

    #[error("unknown codec {0}")]
    UnknownCodec(String),

    #[error("unexpected HTTP response: {0}")]
    UnexpectedHttpResponse(String),

    #[error("rpc client err: wrong format '{0}', expect protocol@addr")]
    BadRpcAddress(String),

    #[error("rpc: invalid service method")]
    InvalidServiceMethod,

    #[error("rpc: service not found: {0}")]
    ServiceNotFound(String),

    #[error("rpc: method not found: {0}")]
    MethodNotFound(String),

    #[error("rpc: service already defined: {0}")]
    ServiceAlreadyDefined(String),

    #[error("rpc server: no eligible methods in type {0}")]
    NoEligibleMethods(String),

    #[error("rpc server: invalid service name: {0}")]
    InvalidServiceName(String),

    #[error("rpc server: invalid method name: {0}")]
    InvalidMethodName(String),

    /// An error string carried back in a response header, either produced by
    /// the remote user method or composed by the remote server.
    #[error("{0}")]
    Remote(String),

    #[error("reading body: {0}")]
    ReadingBody(String),

    #[error("frame too large: {0} bytes (max {1} bytes)")]
    FrameTooLarge(usize, usize),

    #[error("rpc discovery: no available servers")]
    NoAvailableServers,

    #[error("registry error: {0}")]
    Registry(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("serialization error: {0}")]
    Binary(#[from] postcard::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RpcError>;
