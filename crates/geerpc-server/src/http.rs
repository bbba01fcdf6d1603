//! HTTP transport adapter.
//!
//! A server mounted in HTTP mode accepts `CONNECT` on the RPC path, takes
//! over the byte stream and proceeds into the normal handshake + serve
//! loop. A plain HTTP framework cannot hand the raw stream back after
//! routing, so the adapter speaks just enough HTTP itself. A secondary
//! debug path serves an HTML listing of registered services and per-method
//! call counts.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, warn};

use geerpc_common::{CONNECTED_STATUS, DEFAULT_DEBUG_PATH, DEFAULT_RPC_PATH};

use crate::server::Server;

/// Upper bound on an incoming request head; anything longer is not a
/// handshake this adapter serves.
const MAX_REQUEST_HEAD: usize = 8 * 1024;

impl Server {
    /// Serves RPC-over-HTTP on the default paths.
    pub async fn serve_http(self: Arc<Self>, listener: TcpListener) {
        self.serve_http_at(listener, DEFAULT_RPC_PATH, DEFAULT_DEBUG_PATH)
            .await
    }

    /// Serves RPC-over-HTTP with caller-chosen RPC and debug paths.
    pub async fn serve_http_at(
        self: Arc<Self>,
        listener: TcpListener,
        rpc_path: &str,
        debug_path: &str,
    ) {
        let rpc_path = rpc_path.to_string();
        let debug_path = debug_path.to_string();
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "http connection established");
                    let server = self.clone();
                    let rpc_path = rpc_path.clone();
                    let debug_path = debug_path.clone();
                    tokio::spawn(async move {
                        server.handle_http(stream, &rpc_path, &debug_path).await;
                    });
                }
                Err(err) => {
                    warn!("accept failed: {}", err);
                    return;
                }
            }
        }
    }

    async fn handle_http<S>(self: Arc<Self>, mut stream: S, rpc_path: &str, debug_path: &str)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let head = match read_request_head(&mut stream).await {
            Ok(head) => head,
            Err(err) => {
                debug!("failed to read request head: {}", err);
                return;
            }
        };
        let request_line = head.lines().next().unwrap_or("");
        let mut parts = request_line.split_whitespace();
        let (method, path) = (parts.next().unwrap_or(""), parts.next().unwrap_or(""));

        if method == "CONNECT" && path == rpc_path {
            let status = format!("HTTP/1.0 {}\n\n", CONNECTED_STATUS);
            if stream.write_all(status.as_bytes()).await.is_err() {
                return;
            }
            self.serve_conn(stream).await;
        } else if method == "GET" && path == debug_path {
            let body = self.debug_html();
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes()).await;
        } else {
            let body = "405 must CONNECT\n";
            let response = format!(
                "HTTP/1.1 405 Method Not Allowed\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes()).await;
        }
    }

    /// Renders the debug listing: every service with its methods and call
    /// counts.
    pub fn debug_html(&self) -> String {
        let mut html = String::from("<html>\n<body>\n<title>GeeRPC Services</title>\n");
        for (name, service) in self.services() {
            html.push_str("<hr>\n");
            html.push_str(&format!("Service {}\n", name));
            html.push_str("<hr>\n<table>\n");
            html.push_str("<th align=center>Method</th><th align=center>Calls</th>\n");
            for info in service.method_infos() {
                html.push_str(&format!(
                    "<tr>\n<td align=left font=fixed>{}({}, &mut {}) error</td>\n<td align=center>{}</td>\n</tr>\n",
                    info.name, info.arg_type, info.reply_type, info.num_calls
                ));
            }
            html.push_str("</table>\n");
        }
        html.push_str("</body>\n</html>");
        html
    }
}

/// Reads an HTTP request head byte by byte up to the blank line. The head
/// is tiny and arrives before any pipelined data, so this never
/// over-reads into the RPC stream that follows a CONNECT.
async fn read_request_head<S>(stream: &mut S) -> std::io::Result<String>
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
        if head.len() > MAX_REQUEST_HEAD {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "request head too large",
            ));
        }
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}
