//! HTTP transport implementation.
//!
//! This module provides an HTTP-based transport for the sync engine.
//! The actual HTTP client is abstracted via a trait to allow different
//! implementations (reqwest, hyper, in-process loopback, etc.).
//!
//! Requests and responses are JSON-encoded protocol types. The push channel
//! is a server-sent-events stream whose `data:` frames each carry one
//! [`ChangeEvent`].

use crate::error::{SyncError, SyncResult};
use crate::token::TokenProvider;
use crate::transport::{EventReceiver, PushChannel, SyncTransport};
use eventsource_stream::Eventsource;
use filesync_protocol::{
    decode, encode, endpoints, ChangeEvent, FileContent, FileRecord, Method, PathQuery, Timestamp,
};
use futures::executor::block_on_stream;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Cursor, ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

/// A complete HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    /// Creates a `200 OK` response.
    pub fn ok(body: Vec<u8>) -> Self {
        Self::new(200, body)
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns the body as lossy UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A streaming HTTP response.
pub struct HttpStream {
    /// Status code.
    pub status: u16,
    /// Body reader, read incrementally as data arrives.
    pub body: Box<dyn Read + Send>,
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. An `Err`
/// means the request never produced a response (unreachable, timeout).
pub trait HttpClient: Send + Sync {
    /// Sends a GET request.
    fn get(&self, url: &str, bearer: Option<&str>) -> Result<HttpResponse, String>;

    /// Sends a POST request with a JSON body.
    fn post(&self, url: &str, body: Vec<u8>, bearer: Option<&str>)
        -> Result<HttpResponse, String>;

    /// Opens a long-lived GET request whose body is read as a stream.
    fn open_stream(&self, url: &str, bearer: Option<&str>) -> Result<HttpStream, String>;
}

/// HTTP-based sync transport.
pub struct HttpTransport<C: HttpClient, P: TokenProvider> {
    /// Base URL of the sync server (e.g., "http://localhost:5000").
    base_url: String,
    /// HTTP client implementation.
    client: Arc<C>,
    /// Bearer token source.
    tokens: P,
    /// Connection state.
    connected: AtomicBool,
    /// Last error message.
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient, P: TokenProvider> HttpTransport<C, P> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: Arc<C>, tokens: P) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            tokens,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Returns false after a request failed to reach the server.
    ///
    /// The flag is informational: the next successful request clears it.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    fn set_error(&self, err: &str) {
        *self.last_error.write() = Some(err.to_string());
        self.connected.store(false, Ordering::SeqCst);
    }

    fn clear_error(&self) {
        *self.last_error.write() = None;
        self.connected.store(true, Ordering::SeqCst);
    }

    fn call(&self, method: Method, endpoint: &str, body: Option<Vec<u8>>) -> SyncResult<Vec<u8>> {
        let token = self.tokens.token()?;
        let url = self.url(endpoint);
        let result = match method {
            Method::Get => self.client.get(&url, Some(&token)),
            Method::Post => self
                .client
                .post(&url, body.unwrap_or_default(), Some(&token)),
        };

        let response = result.map_err(|e| {
            self.set_error(&e);
            SyncError::transport_retryable(e)
        })?;
        self.clear_error();
        self.check_status(response.status, response.body)
    }

    fn check_status(&self, status: u16, body: Vec<u8>) -> SyncResult<Vec<u8>> {
        if (200..300).contains(&status) {
            return Ok(body);
        }
        let message = String::from_utf8_lossy(&body).into_owned();
        match status {
            401 => {
                self.tokens.invalidate();
                Err(SyncError::NotAuthorized(message))
            }
            403 => Err(SyncError::AccessDenied(message)),
            status => Err(SyncError::ServerError { status, message }),
        }
    }

    fn post_json<Req: Serialize>(&self, endpoint: &str, request: &Req) -> SyncResult<Vec<u8>> {
        let body = encode(request)?;
        self.call(Method::Post, endpoint, Some(body))
    }

    fn decode_response<Res: DeserializeOwned>(bytes: &[u8]) -> SyncResult<Res> {
        decode(bytes).map_err(|e| SyncError::Protocol(format!("Failed to decode response: {}", e)))
    }
}

impl<C: HttpClient, P: TokenProvider> SyncTransport for HttpTransport<C, P> {
    fn list_paths(&self) -> SyncResult<Vec<FileRecord>> {
        let body = self.call(Method::Get, endpoints::LIST_PATHS, None)?;
        Self::decode_response(&body)
    }

    fn create(
        &self,
        path: &str,
        last_modified: Timestamp,
        is_directory: bool,
        content: Option<&[u8]>,
    ) -> SyncResult<()> {
        let command = ChangeEvent::Created {
            path: path.to_string(),
            last_modified,
            is_directory,
            content: content.map(<[u8]>::to_vec),
        };
        self.post_json(endpoints::CREATE, &command).map(|_| ())
    }

    fn update(&self, path: &str, last_modified: Timestamp, content: &[u8]) -> SyncResult<()> {
        let command = ChangeEvent::updated(path, last_modified, content.to_vec());
        self.post_json(endpoints::UPDATE, &command).map(|_| ())
    }

    fn delete(&self, path: &str) -> SyncResult<()> {
        self.post_json(endpoints::DELETE, &ChangeEvent::deleted(path))
            .map(|_| ())
    }

    fn rename(&self, path: &str, new_path: &str) -> SyncResult<()> {
        self.post_json(endpoints::RENAME, &ChangeEvent::renamed(path, new_path))
            .map(|_| ())
    }

    fn get_content(&self, path: &str) -> SyncResult<Vec<u8>> {
        let body = self.post_json(endpoints::CONTENT, &PathQuery::new(path))?;
        let content: FileContent = Self::decode_response(&body)?;
        Ok(content.content)
    }
}

impl<C: HttpClient, P: TokenProvider> PushChannel for HttpTransport<C, P> {
    fn subscribe(&self) -> SyncResult<EventReceiver> {
        let token = self.tokens.token()?;
        let mut stream = self
            .client
            .open_stream(&self.url(endpoints::EVENTS), Some(&token))
            .map_err(|e| {
                self.set_error(&e);
                SyncError::transport_retryable(e)
            })?;
        self.clear_error();

        if !(200..300).contains(&stream.status) {
            let mut body = Vec::new();
            stream.body.read_to_end(&mut body)?;
            self.check_status(stream.status, body)?;
        }

        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("filesync-events".into())
            .spawn(move || pump_events(stream.body, tx))?;
        Ok(rx)
    }
}

/// Decodes SSE frames until the stream ends or the subscriber goes away.
fn pump_events(body: Box<dyn Read + Send>, tx: Sender<SyncResult<ChangeEvent>>) {
    let chunks = futures::stream::iter(ReadChunks { body, done: false });
    for frame in block_on_stream(chunks.eventsource()) {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                let _ = tx.send(Err(SyncError::transport_retryable(e.to_string())));
                return;
            }
        };
        if frame.data.is_empty() {
            continue;
        }
        let item = decode::<ChangeEvent>(frame.data.as_bytes()).map_err(SyncError::from);
        if let Err(e) = &item {
            warn!(error = %e, event = %frame.event, "undecodable push frame");
        }
        if tx.send(item).is_err() {
            debug!("push subscriber gone, closing event stream");
            return;
        }
    }
    let _ = tx.send(Err(SyncError::transport_retryable("event stream closed")));
}

/// Yields a blocking body as a sequence of byte chunks.
struct ReadChunks {
    body: Box<dyn Read + Send>,
    done: bool,
}

impl Iterator for ReadChunks {
    type Item = std::io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = vec![0; 4096];
        loop {
            match self.body.read(&mut buf) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(n) => {
                    buf.truncate(n);
                    return Some(Ok(buf));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Encodes one event as an SSE frame.
pub fn sse_frame(event: &ChangeEvent) -> SyncResult<Vec<u8>> {
    let json = encode(event)?;
    let mut frame = Vec::with_capacity(json.len() + 8);
    frame.extend_from_slice(b"data: ");
    frame.extend_from_slice(&json);
    frame.extend_from_slice(b"\n\n");
    Ok(frame)
}

/// Presents a channel of events as an SSE byte stream.
pub struct EventStreamReader {
    events: Receiver<ChangeEvent>,
    pending: Cursor<Vec<u8>>,
}

impl EventStreamReader {
    /// Wraps a receiver. The stream ends when the channel disconnects.
    pub fn new(events: Receiver<ChangeEvent>) -> Self {
        Self {
            events,
            pending: Cursor::new(Vec::new()),
        }
    }
}

impl Read for EventStreamReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            let n = self.pending.read(buf)?;
            if n > 0 || buf.is_empty() {
                return Ok(n);
            }
            let Ok(event) = self.events.recv() else {
                return Ok(0);
            };
            let frame = sse_frame(&event).map_err(std::io::Error::other)?;
            self.pending = Cursor::new(frame);
        }
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer: Send + Sync {
    /// Handles a request and returns the response.
    fn handle(&self, method: Method, path: &str, bearer: Option<&str>, body: &[u8])
        -> HttpResponse;

    /// Opens a push subscription, or returns the error response.
    fn subscribe(&self, bearer: Option<&str>) -> Result<Receiver<ChangeEvent>, HttpResponse>;
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    fn path_of(url: &str) -> &str {
        url.find("/api/").map(|i| &url[i..]).unwrap_or(url)
    }
}

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    fn get(&self, url: &str, bearer: Option<&str>) -> Result<HttpResponse, String> {
        Ok(self
            .server
            .handle(Method::Get, Self::path_of(url), bearer, &[]))
    }

    fn post(
        &self,
        url: &str,
        body: Vec<u8>,
        bearer: Option<&str>,
    ) -> Result<HttpResponse, String> {
        Ok(self
            .server
            .handle(Method::Post, Self::path_of(url), bearer, &body))
    }

    fn open_stream(&self, _url: &str, bearer: Option<&str>) -> Result<HttpStream, String> {
        match self.server.subscribe(bearer) {
            Ok(events) => Ok(HttpStream {
                status: 200,
                body: Box::new(EventStreamReader::new(events)),
            }),
            Err(response) => Ok(HttpStream {
                status: response.status,
                body: Box::new(Cursor::new(response.body)),
            }),
        }
    }
}
