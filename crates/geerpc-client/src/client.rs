//! The multiplexing client.
//!
//! A [`Client`] owns one connection and one background receive task. Any
//! number of calls may be outstanding at once; responses are matched to
//! callers by sequence number, so they may arrive in any order.
//!
//! Two locks guard the client. The `sending` lock is the async mutex over
//! the framed write half, held while a header+body pair goes out so frames
//! from concurrent calls never interleave. The `state` lock is a sync mutex
//! over the sequence counter, the pending-call map and the two lifecycle
//! flags; it is never held across I/O.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use geerpc_common::{
    FrameReader, FrameWriter, Header, Options, Result, RpcError, WireCodec, CONNECTED_STATUS,
    DEFAULT_RPC_PATH,
};

type BoxedReadHalf = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriteHalf = Box<dyn AsyncWrite + Send + Unpin>;

/// Upper bound on an HTTP response head during the CONNECT handshake.
const MAX_RESPONSE_HEAD: usize = 8 * 1024;

/// One completed invocation, delivered on the call's `done` channel.
///
/// The reply stays in its wire encoding until the caller asks for it, so
/// the receive task never needs to know reply types.
pub struct Call {
    pub seq: u64,
    pub service_method: String,
    pub error: Option<RpcError>,
    codec: WireCodec,
    reply_bytes: Vec<u8>,
}

impl Call {
    /// Decodes the reply body.
    pub fn reply<R: DeserializeOwned>(&self) -> Result<R> {
        self.codec
            .decode(&self.reply_bytes)
            .map_err(|err| RpcError::ReadingBody(err.to_string()))
    }

    /// The call's error if it failed, otherwise the decoded reply.
    pub fn into_result<R: DeserializeOwned>(self) -> Result<R> {
        match self.error {
            Some(err) => Err(err),
            None => self.reply(),
        }
    }
}

struct PendingCall {
    service_method: String,
    done: mpsc::Sender<Call>,
}

struct ClientState {
    seq: u64,
    pending: HashMap<u64, PendingCall>,
    /// The user called [`Client::close`].
    closing: bool,
    /// The connection died under us.
    shutdown: bool,
}

struct ClientInner {
    codec: WireCodec,
    writer: Mutex<FrameWriter<BoxedWriteHalf>>,
    state: StdMutex<ClientState>,
}

impl ClientInner {
    fn register_call(&self, service_method: &str, done: mpsc::Sender<Call>) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        if state.closing || state.shutdown {
            return Err(RpcError::Shutdown);
        }
        let seq = state.seq;
        state.seq += 1;
        state.pending.insert(
            seq,
            PendingCall {
                service_method: service_method.to_string(),
                done,
            },
        );
        Ok(seq)
    }

    fn remove_call(&self, seq: u64) -> Option<PendingCall> {
        self.state.lock().unwrap().pending.remove(&seq)
    }

    /// Marks the client shut down and delivers `make_err()` to every
    /// outstanding call. Takes the sending lock first so an in-flight send
    /// cannot race the drain.
    async fn terminate_calls(&self, make_err: impl Fn() -> RpcError) {
        let _sending = self.writer.lock().await;
        let drained: Vec<(u64, PendingCall)> = {
            let mut state = self.state.lock().unwrap();
            state.shutdown = true;
            state.pending.drain().collect()
        };
        for (seq, pending) in drained {
            let call = Call {
                seq,
                service_method: pending.service_method,
                error: Some(make_err()),
                codec: self.codec,
                reply_bytes: Vec::new(),
            };
            let _ = pending.done.send(call).await;
        }
    }
}

/// Removes a pending call when a caller stops waiting for it. A response
/// that arrives later finds no waiter and is drained by the receive task.
struct EvictOnDrop<'a> {
    inner: &'a Arc<ClientInner>,
    seq: u64,
}

impl Drop for EvictOnDrop<'_> {
    fn drop(&mut self) {
        self.inner.remove_call(self.seq);
    }
}

/// An RPC client multiplexing concurrent calls over a single connection.
pub struct Client {
    inner: Arc<ClientInner>,
    receive_task: JoinHandle<()>,
}

impl Drop for Client {
    fn drop(&mut self) {
        self.receive_task.abort();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Performs the handshake over an established stream and starts the
    /// background receive task.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::UnknownCodec`] if the options name a codec this
    /// process has not registered, or the write error if sending the
    /// options frame fails.
    pub async fn new<S>(stream: S, opt: Options) -> Result<Client>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let codec = WireCodec::from_name(&opt.codec_type)
            .ok_or_else(|| RpcError::UnknownCodec(opt.codec_type.clone()))?;

        let (read_half, write_half) = tokio::io::split(stream);
        let mut writer = FrameWriter::new(Box::new(write_half) as BoxedWriteHalf);

        // The handshake always goes out as JSON so the peer can decode it
        // before a codec has been agreed on.
        writer.write_frame(&serde_json::to_vec(&opt)?).await?;
        writer.flush().await?;

        let inner = Arc::new(ClientInner {
            codec,
            writer: Mutex::new(writer),
            state: StdMutex::new(ClientState {
                seq: 1,
                pending: HashMap::new(),
                closing: false,
                shutdown: false,
            }),
        });

        let reader = FrameReader::new(Box::new(read_half) as BoxedReadHalf);
        let receive_task = tokio::spawn(receive(inner.clone(), reader));

        Ok(Client {
            inner,
            receive_task,
        })
    }

    /// True iff the client has neither been closed nor lost its connection.
    pub fn is_available(&self) -> bool {
        let state = self.inner.state.lock().unwrap();
        !state.closing && !state.shutdown
    }

    /// Shuts the client down and fails every outstanding call. Idempotent.
    pub async fn close(&self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.closing {
                return;
            }
            state.closing = true;
        }
        {
            let mut writer = self.inner.writer.lock().await;
            let _ = writer.shutdown().await;
        }
        self.inner.terminate_calls(|| RpcError::Shutdown).await;
    }

    /// Enqueues an asynchronous call.
    ///
    /// The completed [`Call`] is delivered on `done`, which is necessarily
    /// buffered (tokio rejects zero-capacity channels at construction), and
    /// is signaled exactly once per call this method returns a sequence
    /// number for. The frames are written on a detached task so a caller
    /// that stops waiting cannot tear a half-written frame.
    pub fn go<A: Serialize>(
        &self,
        service_method: &str,
        args: &A,
        done: mpsc::Sender<Call>,
    ) -> Result<u64> {
        let body = self.inner.codec.encode(args)?;
        let seq = self.inner.register_call(service_method, done)?;

        let header = Header {
            service_method: service_method.to_string(),
            seq,
            error: String::new(),
        };
        let header_bytes = match self.inner.codec.encode(&header) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.inner.remove_call(seq);
                return Err(err);
            }
        };

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut writer = inner.writer.lock().await;
            if let Err(err) = writer.write_message(&header_bytes, &body).await {
                drop(writer);
                // The call never reached the wire; complete it here.
                if let Some(pending) = inner.remove_call(seq) {
                    let call = Call {
                        seq,
                        service_method: pending.service_method,
                        error: Some(RpcError::Disconnected(err.to_string())),
                        codec: inner.codec,
                        reply_bytes: Vec::new(),
                    };
                    let _ = pending.done.send(call).await;
                }
            }
        });

        Ok(seq)
    }

    /// Invokes a method and waits for its reply.
    ///
    /// Cancellation-safe: dropping the returned future (for example by
    /// racing it against a deadline) removes the call from the pending set,
    /// and any response that later arrives for it is discarded.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let (done, mut completed) = mpsc::channel(1);
        let seq = self.go(service_method, args, done)?;
        let _evict = EvictOnDrop {
            inner: &self.inner,
            seq,
        };
        match completed.recv().await {
            Some(call) => call.into_result(),
            None => Err(RpcError::Shutdown),
        }
    }

    /// [`Client::call`] bounded by a deadline. `Duration::ZERO` means no
    /// limit.
    pub async fn call_timeout<A, R>(
        &self,
        service_method: &str,
        args: &A,
        timeout: Duration,
    ) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        if timeout.is_zero() {
            return self.call(service_method, args).await;
        }
        match tokio::time::timeout(timeout, self.call(service_method, args)).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Cancelled("context deadline exceeded".to_string())),
        }
    }

    /// Dials a TCP server.
    pub async fn dial(addr: &str, opt: Options) -> Result<Client> {
        let stream = connect_transport(TcpStream::connect(addr), &opt).await?;
        with_handshake(stream, opt, Client::new).await
    }

    /// Dials a Unix-domain socket server.
    #[cfg(unix)]
    pub async fn dial_unix(path: &str, opt: Options) -> Result<Client> {
        let stream = connect_transport(tokio::net::UnixStream::connect(path), &opt).await?;
        with_handshake(stream, opt, Client::new).await
    }

    /// Dials a server mounted in HTTP mode, entering via CONNECT.
    pub async fn dial_http(addr: &str, opt: Options) -> Result<Client> {
        let stream = connect_transport(TcpStream::connect(addr), &opt).await?;
        with_handshake(stream, opt, new_http_client).await
    }

    /// Dials an address of the form `"protocol@address"`, e.g.
    /// `"tcp@127.0.0.1:9999"`, `"http@10.0.0.1:80"` or `"unix@/tmp/sock"`.
    pub async fn xdial(rpc_addr: &str, opt: Options) -> Result<Client> {
        let mut parts = rpc_addr.split('@');
        let (Some(protocol), Some(addr), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(RpcError::BadRpcAddress(rpc_addr.to_string()));
        };
        match protocol {
            "http" => Client::dial_http(addr, opt).await,
            "tcp" => Client::dial(addr, opt).await,
            #[cfg(unix)]
            "unix" => Client::dial_unix(addr, opt).await,
            _ => Err(RpcError::BadRpcAddress(rpc_addr.to_string())),
        }
    }
}

/// Phase one of connection establishment: the transport dial, bounded by
/// the connect timeout. Dial errors surface verbatim.
async fn connect_transport<S>(
    connect: impl Future<Output = std::io::Result<S>>,
    opt: &Options,
) -> Result<S> {
    let timeout = opt.connect_timeout();
    if timeout.is_zero() {
        return Ok(connect.await?);
    }
    match tokio::time::timeout(timeout, connect).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(RpcError::ConnectTimeout(timeout)),
    }
}

/// Phase two: the handshake, raced against the same connect timeout. On
/// expiry the handshake future is dropped, which closes the connection.
async fn with_handshake<S, F, Fut>(stream: S, opt: Options, handshake: F) -> Result<Client>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    F: FnOnce(S, Options) -> Fut,
    Fut: Future<Output = Result<Client>>,
{
    let timeout = opt.connect_timeout();
    if timeout.is_zero() {
        return handshake(stream, opt).await;
    }
    let handshake = handshake(stream, opt);
    tokio::select! {
        result = handshake => result,
        _ = tokio::time::sleep(timeout) => Err(RpcError::ConnectTimeout(timeout)),
    }
}

/// CONNECT preamble in front of the normal handshake.
async fn new_http_client<S>(mut stream: S, opt: Options) -> Result<Client>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let connect = format!("CONNECT {} HTTP/1.0\n\n", DEFAULT_RPC_PATH);
    stream.write_all(connect.as_bytes()).await?;

    let head = read_response_head(&mut stream).await?;
    let status_line = head.lines().next().unwrap_or("").trim_end();
    let status = status_line.split_once(' ').map(|(_, s)| s).unwrap_or("");
    if status != CONNECTED_STATUS {
        return Err(RpcError::UnexpectedHttpResponse(status.to_string()));
    }
    Client::new(stream, opt).await
}

/// Reads an HTTP response head byte by byte up to the blank line, so no
/// bytes of the RPC stream behind it are consumed.
async fn read_response_head<S>(stream: &mut S) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut head = Vec::new();
    loop {
        let byte = stream.read_u8().await?;
        head.push(byte);
        if head.ends_with(b"\r\n\r\n") || head.ends_with(b"\n\n") {
            break;
        }
        if head.len() > MAX_RESPONSE_HEAD {
            return Err(RpcError::UnexpectedHttpResponse(
                "response head too large".to_string(),
            ));
        }
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

/// The background receive loop: reads every header+body frame pair,
/// matches it to the pending call by sequence number and signals the
/// waiter. A pair with no waiter (cancelled or unknown) is discarded. Any
/// read failure terminates all outstanding calls with the error.
async fn receive(inner: Arc<ClientInner>, mut reader: FrameReader<BoxedReadHalf>) {
    let codec = inner.codec;
    loop {
        let header: Header = match reader.read_frame().await {
            Ok(frame) => match codec.decode(&frame) {
                Ok(header) => header,
                Err(err) => {
                    inner
                        .terminate_calls(|| RpcError::Disconnected(err.to_string()))
                        .await;
                    return;
                }
            },
            Err(err) => {
                inner
                    .terminate_calls(|| RpcError::Disconnected(err.to_string()))
                    .await;
                return;
            }
        };

        // The body frame is always consumed, waiter or not, to keep the
        // stream aligned on frame-pair boundaries.
        let body = match reader.read_frame().await {
            Ok(body) => body,
            Err(err) => {
                inner
                    .terminate_calls(|| RpcError::Disconnected(err.to_string()))
                    .await;
                return;
            }
        };

        let Some(pending) = inner.remove_call(header.seq) else {
            debug!(seq = header.seq, "no waiter for response, discarding");
            continue;
        };

        let call = if header.error.is_empty() {
            Call {
                seq: header.seq,
                service_method: pending.service_method,
                error: None,
                codec,
                reply_bytes: body,
            }
        } else {
            Call {
                seq: header.seq,
                service_method: pending.service_method,
                error: Some(RpcError::Remote(header.error)),
                codec,
                reply_bytes: Vec::new(),
            }
        };
        let _ = pending.done.send(call).await;
    }
}
