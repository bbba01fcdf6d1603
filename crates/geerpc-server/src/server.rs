//! The server: accept loop, per-connection handshake and serve loop,
//! request handler tasks and the handle timeout.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use geerpc_common::{
    FrameReader, FrameWriter, Header, Options, Result, RpcError, WireCodec, MAGIC_NUMBER,
};

use crate::service::{MethodSpec, Service};

/// Dispatches requests to registered services.
///
/// Lookup is concurrent; registration is write-once per service name.
pub struct Server {
    services: RwLock<HashMap<String, Arc<Service>>>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a service in the catalog.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::ServiceAlreadyDefined`] if a service of the same
    /// name is already registered.
    pub fn register(&self, service: Service) -> Result<()> {
        let mut services = self.services.write().unwrap();
        if services.contains_key(service.name()) {
            return Err(RpcError::ServiceAlreadyDefined(service.name().to_string()));
        }
        services.insert(service.name().to_string(), Arc::new(service));
        Ok(())
    }

    /// Resolves a `"ServiceName.MethodName"` target, splitting on the last
    /// dot.
    fn find_method(&self, service_method: &str) -> Result<Arc<MethodSpec>> {
        let dot = service_method
            .rfind('.')
            .ok_or(RpcError::InvalidServiceMethod)?;
        let (service_name, method_name) = (&service_method[..dot], &service_method[dot + 1..]);

        let service = self
            .services
            .read()
            .unwrap()
            .get(service_name)
            .cloned()
            .ok_or_else(|| RpcError::ServiceNotFound(service_name.to_string()))?;
        service
            .method(method_name)
            .ok_or_else(|| RpcError::MethodNotFound(service_method.to_string()))
    }

    /// Snapshot of all registered services, sorted by name. Used by the
    /// debug listing.
    pub fn services(&self) -> Vec<(String, Arc<Service>)> {
        let mut services: Vec<(String, Arc<Service>)> = self
            .services
            .read()
            .unwrap()
            .iter()
            .map(|(name, service)| (name.clone(), service.clone()))
            .collect();
        services.sort_by(|a, b| a.0.cmp(&b.0));
        services
    }

    /// Accepts connections until the listener fails, serving each on its
    /// own task.
    pub async fn accept(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "connection established");
                    let server = self.clone();
                    tokio::spawn(async move {
                        server.serve_conn(stream).await;
                        debug!(%peer, "connection closed");
                    });
                }
                Err(err) => {
                    warn!("accept failed: {}", err);
                    return;
                }
            }
        }
    }

    /// Serves one connection: reads the handshake, then the request stream.
    ///
    /// A malformed handshake, a magic-number mismatch or an unknown codec
    /// closes the connection without a response.
    pub async fn serve_conn<S>(self: Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = FrameReader::new(read_half);

        let opt: Options = match reader.read_frame().await {
            Ok(frame) => match serde_json::from_slice(&frame) {
                Ok(opt) => opt,
                Err(err) => {
                    debug!("invalid options frame: {}", err);
                    return;
                }
            },
            Err(_) => return,
        };
        if opt.magic_number != MAGIC_NUMBER {
            debug!("magic number mismatch: {:#x}", opt.magic_number);
            return;
        }
        let codec = match WireCodec::from_name(&opt.codec_type) {
            Some(codec) => codec,
            None => {
                debug!("unknown codec type: {}", opt.codec_type);
                return;
            }
        };

        self.serve_codec(codec, opt.handle_timeout(), reader, FrameWriter::new(write_half))
            .await;
    }

    /// The serve loop: one header+body frame pair per request, one handler
    /// task per request. All in-flight handlers are awaited before the
    /// connection winds down.
    async fn serve_codec<R, W>(
        self: Arc<Self>,
        codec: WireCodec,
        handle_timeout: Duration,
        mut reader: FrameReader<R>,
        writer: FrameWriter<W>,
    ) where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer = Arc::new(Mutex::new(writer));
        let mut handlers = JoinSet::new();

        loop {
            // Header read or decode failure means the connection is dead.
            let header: Header = match reader.read_frame().await {
                Ok(frame) => match codec.decode(&frame) {
                    Ok(header) => header,
                    Err(err) => {
                        debug!("cannot decode request header: {}", err);
                        break;
                    }
                },
                Err(_) => break,
            };

            let body = match reader.read_frame().await {
                Ok(body) => body,
                Err(err) => {
                    // The header arrived intact, so the caller can still be
                    // told why its body was rejected.
                    let mut header = header;
                    header.error = err.to_string();
                    if write_response(codec, &writer, &header, None).await.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let server = self.clone();
            let writer = writer.clone();
            handlers.spawn(async move {
                server
                    .handle_request(codec, handle_timeout, header, body, writer)
                    .await;
            });
        }

        while handlers.join_next().await.is_some() {}
    }

    /// Resolves and invokes one request, racing the method against the
    /// handle timeout. Exactly one response goes out per request; a late
    /// completion of a timed-out method is discarded.
    async fn handle_request<W>(
        self: Arc<Self>,
        codec: WireCodec,
        handle_timeout: Duration,
        mut header: Header,
        body: Vec<u8>,
        writer: Arc<Mutex<FrameWriter<W>>>,
    ) where
        W: AsyncWrite + Send + Unpin,
    {
        debug!(seq = header.seq, method = %header.service_method, "handling request");

        let method = match self.find_method(&header.service_method) {
            Ok(method) => method,
            Err(err) => {
                header.error = err.to_string();
                let _ = write_response(codec, &writer, &header, None).await;
                return;
            }
        };

        // The argument is decoded before the race starts and the reply is
        // encoded after it ends: the handle timeout covers the user
        // method's execution only.
        let args = match method.decode_args(codec, &body) {
            Ok(args) => args,
            Err(err) => {
                header.error = err;
                let _ = write_response(codec, &writer, &header, None).await;
                return;
            }
        };

        // User methods may block, so they run off the async threads.
        let runner = method.clone();
        let work = tokio::task::spawn_blocking(move || runner.call(args));

        let outcome = if handle_timeout.is_zero() {
            work.await
        } else {
            tokio::select! {
                outcome = work => outcome,
                _ = tokio::time::sleep(handle_timeout) => {
                    header.error = format!(
                        "rpc server: request handle timeout: expect within {:?}",
                        handle_timeout
                    );
                    let _ = write_response(codec, &writer, &header, None).await;
                    return;
                }
            }
        };

        match outcome {
            Ok(Ok(reply)) => match method.encode_reply(codec, reply) {
                Ok(reply) => {
                    let _ = write_response(codec, &writer, &header, Some(reply.as_slice())).await;
                }
                Err(err) => {
                    header.error = err;
                    let _ = write_response(codec, &writer, &header, None).await;
                }
            },
            Ok(Err(call_error)) => {
                header.error = call_error;
                let _ = write_response(codec, &writer, &header, None).await;
            }
            Err(join_error) => {
                header.error = format!("rpc server: method aborted: {}", join_error);
                let _ = write_response(codec, &writer, &header, None).await;
            }
        }
    }
}

/// Sends one response: the header frame followed by the reply frame, under
/// the per-connection send lock. `None` stands for the nil body of error
/// responses.
async fn write_response<W>(
    codec: WireCodec,
    writer: &Arc<Mutex<FrameWriter<W>>>,
    header: &Header,
    body: Option<&[u8]>,
) -> Result<()>
where
    W: AsyncWrite + Send + Unpin,
{
    let header_bytes = codec.encode(header)?;
    let nil_body;
    let body = match body {
        Some(body) => body,
        None => {
            nil_body = codec.encode(&())?;
            &nil_body
        }
    };

    let mut writer = writer.lock().await;
    let result = writer.write_message(&header_bytes, body).await;
    if let Err(ref err) = result {
        warn!(seq = header.seq, "failed to send response: {}", err);
    }
    result
}
