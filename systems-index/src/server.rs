//! Query server.
//!
//! Clients talk to the server over TCP. Every message in either direction is
//! a frame: a 4-byte little-endian length followed by that many bytes of JSON.
//!
//! ```text
//! -> {"op": "typeahead", "input": "Sol", "token": "Bearer secret"}
//! <- {"reply": "names", "names": ["Sol", "Solati"]}
//! -> {"op": "stats"}
//! <- {"reply": "stats", "stats": {"SizeBytes": 126, "Nodes": 6, "NodeSize": 21}}
//! -> {"op": "ping"}
//! <- {"reply": "pong"}
//! ```
//!
//! Failures come back as `{"reply": "error", "code": 400 | 403 | 500, "message": ...}`.
//! A failure answers the one request it belongs to; the connection and every
//! other client keep going.
//!
//! When access control is on, `token` must read `Bearer <token>`. The scheme
//! is matched ignoring case and the token is the second space-separated
//! word; anything after it is ignored. A bare token is refused.
//!
//! Stopping a [`Listener`] closes the read side of every open connection and
//! waits for their threads, so no request is answered once
//! [`Listener::run`] has returned.

use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::AccessControlConfig;
use crate::stats::IndexStats;
use crate::trie::Trie;

/// Largest frame either side will accept.
pub const MAX_FRAME_LEN: u32 = 1 << 20;

#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    #[error("connection I/O failed")]
    Io(#[from] io::Error),

    #[error("malformed JSON message")]
    Json(#[from] serde_json::Error),

    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    FrameTooLarge(usize),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(flatten)]
    pub query: Query,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Query {
    Ping,
    Typeahead { input: String },
    Stats,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "reply", rename_all = "lowercase")]
pub enum Response {
    Pong,
    Names { names: Vec<String> },
    Stats { stats: IndexStats },
    Error { code: u16, message: String },
}

impl Response {
    fn error(code: u16, message: impl Into<String>) -> Self {
        Response::Error {
            code,
            message: message.into(),
        }
    }
}

pub struct Server {
    trie: Arc<Trie>,
    access: AccessControlConfig,
}

impl Server {
    pub fn new(trie: Arc<Trie>, access: AccessControlConfig) -> Self {
        Self { trie, access }
    }

    pub fn trie(&self) -> &Arc<Trie> {
        &self.trie
    }

    pub fn handle(&self, request: &Request) -> Response {
        if !self.authorized(request.token.as_deref()) {
            return Response::error(403, "Missing or incorrect bearer token.");
        }

        match &request.query {
            Query::Ping => Response::Pong,
            Query::Stats => Response::Stats {
                stats: self.trie.stats(),
            },
            Query::Typeahead { input } => match self.trie.search(input) {
                Ok(names) => Response::Names { names },
                Err(err) => {
                    tracing::warn!(input = %input, error = %err, "typeahead query failed");
                    Response::error(500, "Index lookup failed.")
                }
            },
        }
    }

    /// Decodes one request frame and answers it.
    pub fn handle_frame(&self, frame: &[u8]) -> Response {
        match serde_json::from_slice::<Request>(frame) {
            Ok(request) => self.handle(&request),
            Err(err) => {
                tracing::debug!(%err, "rejecting malformed request");
                Response::error(400, format!("Malformed request: {err}"))
            }
        }
    }

    /// Answers frames from `stream` until the peer hangs up.
    pub fn serve_connection<S: Read + Write>(&self, mut stream: S) -> Result<(), ProtocolError> {
        while let Some(frame) = read_frame(&mut stream)? {
            let response = self.handle_frame(&frame);
            write_frame(&mut stream, &serde_json::to_vec(&response)?)?;
        }
        Ok(())
    }

    fn authorized(&self, token: Option<&str>) -> bool {
        if !self.access.require_access_token {
            return true;
        }
        let mut parts = token.unwrap_or_default().split(' ');
        match (parts.next(), parts.next()) {
            (Some(scheme), Some(token)) if scheme.eq_ignore_ascii_case("bearer") => {
                token == self.access.access_token
            }
            _ => false,
        }
    }
}

/// Accepts connections and hands each one to its own thread.
pub struct Listener {
    listener: TcpListener,
    stop: Arc<AtomicBool>,
}

/// Makes a running [`Listener`] return.
#[derive(Clone)]
pub struct Stopper {
    stop: Arc<AtomicBool>,
    addr: SocketAddr,
}

impl Stopper {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        // Wake the blocking accept so the flag gets seen.
        let _ = TcpStream::connect(self.addr);
    }
}

impl Listener {
    pub fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(addr)?,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stopper(&self) -> io::Result<Stopper> {
        Ok(Stopper {
            stop: Arc::clone(&self.stop),
            addr: self.local_addr()?,
        })
    }

    /// Serves until [`Stopper::stop`] is called, then shuts down the read
    /// side of every open connection and waits for its thread. A thread
    /// finishes writing the answer it is working on and then sees end of
    /// stream.
    pub fn run(self, server: Arc<Server>) -> io::Result<()> {
        tracing::info!(addr = %self.local_addr()?, "listening");
        let mut clients: Vec<(TcpStream, JoinHandle<()>)> = Vec::new();
        for stream in self.listener.incoming() {
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            let stream = match stream {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!(%err, "failed to accept connection");
                    continue;
                }
            };
            let control = match stream.try_clone() {
                Ok(control) => control,
                Err(err) => {
                    tracing::warn!(%err, "unable to track connection, dropping it");
                    continue;
                }
            };

            clients.retain(|(_, handle)| !handle.is_finished());
            let server = Arc::clone(&server);
            let handle = thread::Builder::new()
                .name("sx-client".into())
                .spawn(move || serve_client(&server, stream))?;
            clients.push((control, handle));
        }

        tracing::info!(open = clients.len(), "stopped accepting connections");
        for (control, handle) in clients {
            // Already closed by the peer is fine.
            let _ = control.shutdown(Shutdown::Read);
            if handle.join().is_err() {
                tracing::warn!("client thread panicked");
            }
        }
        tracing::info!("all connections closed");
        Ok(())
    }
}

fn serve_client(server: &Server, stream: TcpStream) {
    let peer = stream.peer_addr().ok();
    tracing::debug!(?peer, "client connected");
    if let Err(err) = server.serve_connection(stream) {
        tracing::warn!(?peer, error = %err, "client connection failed");
    }
    tracing::debug!(?peer, "client disconnected");
}

/// Reads one frame. `Ok(None)` means the peer closed the connection.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>, ProtocolError> {
    let mut len = [0u8; 4];
    match reader.read_exact(&mut len) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let len = u32::from_le_bytes(len);
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len as usize));
    }
    let mut frame = vec![0u8; len as usize];
    reader.read_exact(&mut frame)?;
    Ok(Some(frame))
}

pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), ProtocolError> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|&len| len <= MAX_FRAME_LEN)
        .ok_or(ProtocolError::FrameTooLarge(payload.len()))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Sends `request` on `stream` and waits for the answer.
pub fn call<S: Read + Write>(stream: &mut S, request: &Request) -> Result<Response, ProtocolError> {
    write_frame(stream, &serde_json::to_vec(request)?)?;
    let frame = read_frame(stream)?.ok_or_else(|| {
        ProtocolError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "server closed the connection",
        ))
    })?;
    Ok(serde_json::from_slice(&frame)?)
}
