//! Blocking WebSocket push channel (`tungstenite`).
//!
//! The TCP connect, the HTTP upgrade and every later read run under explicit
//! timeouts, so a silent or blackholed server shows up as a failed attempt instead
//! of a stalled loop. Only `ws://` endpoints are supported.

use crate::services::realtime::{PushChannel, TransportError};
use http::HeaderValue;
use http::header::AUTHORIZATION;
use log::{debug, info};
use std::io::ErrorKind;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tungstenite::client::IntoClientRequest;
use tungstenite::handshake::HandshakeError;
use tungstenite::handshake::client::Request;
use tungstenite::{Message, WebSocket};

const MIN_TIMEOUT: Duration = Duration::from_millis(1);
const DEFAULT_WS_PORT: u16 = 80;

/// Check that `url` is a `ws://` URL this channel can open.
pub fn supported_url(url: &str) -> Result<(), String> {
    let request = url
        .into_client_request()
        .map_err(|e| format!("invalid WebSocket url {}: {}", url, e))?;
    match request.uri().scheme_str() {
        Some("ws") => Ok(()),
        Some("wss") => Err(format!(
            "{} uses wss://, which this build does not support; point it at a ws:// endpoint \
             (for example behind a TLS-terminating proxy)",
            url
        )),
        other => Err(format!("{} has unsupported scheme {:?}, expected ws://", url, other.unwrap_or(""))),
    }
}

pub struct WebSocketChannel {
    url: String,
    token: Option<String>,
    subscribe_frame: Option<String>,
    socket: Option<WebSocket<TcpStream>>,
}

impl WebSocketChannel {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        WebSocketChannel {
            url: url.into(),
            token,
            subscribe_frame: Some(serde_json::json!({ "type": "subscribe", "topic": "zones" }).to_string()),
            socket: None,
        }
    }

    /// Frame sent right after the handshake; `None` sends nothing.
    pub fn with_subscribe_frame(mut self, frame: Option<String>) -> Self {
        self.subscribe_frame = frame;
        self
    }

    fn request(&self) -> Result<Request, TransportError> {
        supported_url(&self.url).map_err(TransportError::Connect)?;
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connect(format!("invalid url {}: {}", self.url, e)))?;
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| TransportError::Connect(format!("invalid token: {}", e)))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        Ok(request)
    }

    /// Open the TCP stream with `timeout` on the connect and on every read and write.
    fn open_stream(request: &Request, timeout: Duration) -> Result<TcpStream, TransportError> {
        let uri = request.uri();
        let host = uri
            .host()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
            .ok_or_else(|| TransportError::Connect(format!("no host in {}", uri)))?;
        let port = uri.port_u16().unwrap_or(DEFAULT_WS_PORT);
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| TransportError::Connect(format!("cannot resolve {}:{}: {}", host, port, e)))?;

        let timeout = timeout.max(MIN_TIMEOUT);
        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    let configured = stream
                        .set_read_timeout(Some(timeout))
                        .and_then(|_| stream.set_write_timeout(Some(timeout)))
                        .and_then(|_| stream.set_nodelay(true));
                    return match configured {
                        Ok(()) => Ok(stream),
                        Err(e) => Err(TransportError::Connect(format!("socket setup failed: {}", e))),
                    };
                }
                Err(e) => {
                    debug!("TCP connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }
        Err(TransportError::Connect(match last_error {
            Some(e) if e.kind() == ErrorKind::TimedOut => {
                format!("{}:{} did not accept within {}ms", host, port, timeout.as_millis())
            }
            Some(e) => format!("{}:{}: {}", host, port, e),
            None => format!("{}:{} resolved to no addresses", host, port),
        }))
    }
}

impl PushChannel for WebSocketChannel {
    fn connect(&mut self, timeout: Duration) -> Result<(), TransportError> {
        self.close();

        let request = self.request()?;
        let stream = Self::open_stream(&request, timeout)?;
        // the stream's read timeout bounds the upgrade; expiry surfaces as `Interrupted`
        let timed_out = || {
            TransportError::Connect(format!(
                "handshake with {} timed out after {}ms",
                self.url,
                timeout.max(MIN_TIMEOUT).as_millis()
            ))
        };
        let (mut socket, response) = tungstenite::client(request, stream).map_err(|e| match e {
            HandshakeError::Interrupted(_) => timed_out(),
            HandshakeError::Failure(tungstenite::Error::Io(e)) if e.kind() == ErrorKind::TimedOut => timed_out(),
            HandshakeError::Failure(e) => TransportError::Connect(format!("handshake failed: {}", e)),
        })?;
        debug!("WebSocket handshake with {} returned {}", self.url, response.status());

        if let Some(frame) = &self.subscribe_frame {
            socket
                .send(Message::Text(frame.clone()))
                .map_err(|e| TransportError::Connect(format!("subscribe failed: {}", e)))?;
        }
        info!("WebSocket connected to {}", self.url);
        self.socket = Some(socket);
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<String>, TransportError> {
        let socket = self.socket.as_mut().ok_or(TransportError::Closed)?;
        socket
            .get_mut()
            .set_read_timeout(Some(timeout.max(MIN_TIMEOUT)))
            .map_err(|e| TransportError::Receive(e.to_string()))?;

        match socket.read() {
            Ok(Message::Text(text)) => Ok(Some(text)),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => Ok(Some(text)),
                Err(e) => {
                    debug!("Skipping non-UTF-8 binary frame: {}", e);
                    Ok(None)
                }
            },
            Ok(Message::Close(frame)) => {
                debug!("WebSocket closed by server: {:?}", frame);
                self.socket = None;
                Err(TransportError::Closed)
            }
            // pings are answered by tungstenite on the next read/write
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => Ok(None),
            Err(tungstenite::Error::Io(e)) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(tungstenite::Error::ConnectionClosed) => {
                self.socket = None;
                Err(TransportError::Closed)
            }
            Err(e) => {
                self.socket = None;
                Err(TransportError::Receive(e.to_string()))
            }
        }
    }

    fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            let _ = socket.close(None);
            let _ = socket.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Instant;
    use tungstenite::handshake::server::{ErrorResponse, Request as ServerRequest, Response as ServerResponse};

    const TIMEOUT: Duration = Duration::from_millis(300);

    fn listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let url = format!("ws://{}/ws", listener.local_addr().expect("local addr"));
        (listener, url)
    }

    /// Accept one WebSocket client, report its subscribe frame and bearer header, then
    /// run `serve` on the open socket.
    fn serve_once<F>(listener: TcpListener, serve: F) -> mpsc::Receiver<(Option<String>, String)>
    where
        F: FnOnce(&mut WebSocket<TcpStream>) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut auth = None;
            let mut socket = tungstenite::accept_hdr(stream, |req: &ServerRequest, res: ServerResponse| -> Result<ServerResponse, ErrorResponse> {
                auth = req
                    .headers()
                    .get(AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Ok(res)
            })
            .expect("server handshake");
            let subscribe = match socket.read().expect("subscribe frame") {
                Message::Text(text) => text,
                other => panic!("unexpected first frame {other:?}"),
            };
            tx.send((auth, subscribe)).expect("report handshake");
            serve(&mut socket);
        });
        rx
    }

    #[test]
    fn text_frame_is_delivered_after_authorised_subscribe() {
        let (listener, url) = listener();
        let handshake = serve_once(listener, |socket| {
            socket
                .send(Message::Text(r#"{"type":"zone_deleted","zone_id":"a"}"#.to_string()))
                .expect("send frame");
            // hold the socket open until the client has read the frame
            let _ = socket.read();
        });

        let mut channel = WebSocketChannel::new(url, Some("secret".to_string()));
        channel.connect(TIMEOUT).expect("connect");
        let (auth, subscribe) = handshake.recv_timeout(Duration::from_secs(5)).expect("handshake seen");
        assert_eq!(auth.as_deref(), Some("Bearer secret"));
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&subscribe).expect("subscribe is json"),
            serde_json::json!({ "type": "subscribe", "topic": "zones" })
        );

        let mut frame = None;
        for _ in 0..20 {
            if let Some(text) = channel.recv(TIMEOUT).expect("connection stays up") {
                frame = Some(text);
                break;
            }
        }
        assert_eq!(frame.as_deref(), Some(r#"{"type":"zone_deleted","zone_id":"a"}"#));
        channel.close();
    }

    #[test]
    fn close_frame_ends_the_connection() {
        let (listener, url) = listener();
        let _handshake = serve_once(listener, |socket| {
            socket.close(None).expect("send close");
            // drive the closing handshake
            while socket.read().is_ok() {}
        });

        let mut channel = WebSocketChannel::new(url, None);
        channel.connect(TIMEOUT).expect("connect");
        let mut outcome = Ok(None);
        for _ in 0..20 {
            outcome = channel.recv(TIMEOUT);
            if outcome.is_err() {
                break;
            }
        }
        assert_eq!(outcome, Err(TransportError::Closed));
        assert_eq!(channel.recv(TIMEOUT), Err(TransportError::Closed));
    }

    #[test]
    fn idle_connection_yields_nothing_within_the_timeout() {
        let (listener, url) = listener();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let _handshake = serve_once(listener, move |_socket| {
            let _ = done_rx.recv_timeout(Duration::from_secs(5));
        });

        let mut channel = WebSocketChannel::new(url, None);
        channel.connect(TIMEOUT).expect("connect");
        let started = Instant::now();
        assert_eq!(channel.recv(Duration::from_millis(50)), Ok(None));
        assert!(started.elapsed() < Duration::from_secs(2));
        let _ = done_tx.send(());
    }

    #[test]
    fn silent_server_fails_connect_within_the_timeout() {
        let (listener, url) = listener();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let server = thread::spawn(move || {
            // accept the TCP connection but never answer the upgrade
            let _held = listener.accept().expect("accept");
            let _ = done_rx.recv_timeout(Duration::from_secs(5));
        });

        let mut channel = WebSocketChannel::new(url, None);
        let started = Instant::now();
        let result = channel.connect(Duration::from_millis(200));
        let elapsed = started.elapsed();
        let _ = done_tx.send(());
        let _ = server.join();

        match result {
            Err(TransportError::Connect(message)) => assert!(message.contains("timed out"), "{message}"),
            other => panic!("expected connect error, got {other:?}"),
        }
        assert!(elapsed < Duration::from_secs(2), "connect took {elapsed:?}");
    }

    #[test]
    fn wss_urls_are_rejected_up_front() {
        assert!(supported_url("ws://localhost:8123/api/heating/ws").is_ok());
        let err = supported_url("wss://example.org/ws").unwrap_err();
        assert!(err.contains("wss://"), "{err}");
        assert!(supported_url("http://example.org/ws").is_err());

        let mut channel = WebSocketChannel::new("wss://example.org/ws", None);
        assert!(matches!(channel.connect(TIMEOUT), Err(TransportError::Connect(_))));
    }
}
