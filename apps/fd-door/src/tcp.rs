// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Serve the handle table over TCP, one worker thread per connection.
// Author: Lukas Bower

//! Connection-oriented transport.
//!
//! Each connection carries strictly alternating request/response frames. A
//! connection ends when the peer disconnects, idles past the configured
//! timeout, sends an undecodable frame, or (by default) after a successful
//! `close` that leaves the connection holding no references. Whatever the
//! reason, references the connection acquired and never closed are released
//! through its [`ConnectionLedger`].

use std::fmt;
use std::io::{BufReader, ErrorKind as IoErrorKind};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use fd_table::HandleTable;
use fd_wire::{
    decode_request, encode_response, peek_tag, read_frame, write_frame, ErrorKind, FrameError,
    Response,
};
use log::{debug, error, info, warn};

use crate::config::DEFAULT_IDLE_TIMEOUT_MS;
use crate::dispatch::dispatch;
use crate::ledger::ConnectionLedger;

/// Interval at which the accept loop re-checks the stop flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Per-connection behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpSettings {
    /// Idle read timeout; a silent peer is disconnected after this long.
    pub idle_timeout: Duration,
    /// Disconnect after answering a successful `close` once the connection
    /// holds no other references.
    pub teardown_on_close: bool,
}

impl Default for TcpSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_millis(DEFAULT_IDLE_TIMEOUT_MS),
            teardown_on_close: true,
        }
    }
}

/// TCP front-end for a shared [`HandleTable`].
pub struct TcpServer {
    table: Arc<HandleTable>,
    settings: TcpSettings,
    local_addr: SocketAddr,
    listener: Option<TcpListener>,
    shutdown: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
}

impl fmt::Debug for TcpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpServer")
            .field("local_addr", &self.local_addr)
            .field("settings", &self.settings)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl TcpServer {
    /// Bind the listening socket without accepting yet.
    pub fn bind(
        addr: impl ToSocketAddrs,
        settings: TcpSettings,
        table: Arc<HandleTable>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).context("failed to bind TCP listener")?;
        let local_addr = listener
            .local_addr()
            .context("failed to query TCP listener address")?;
        Ok(Self {
            table,
            settings,
            local_addr,
            listener: Some(listener),
            shutdown: Arc::new(AtomicBool::new(false)),
            acceptor: None,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// True between [`start`](Self::start) and [`stop`](Self::stop).
    pub fn is_running(&self) -> bool {
        self.acceptor.is_some()
    }

    /// Begin accepting connections on a background thread.
    pub fn start(&mut self) -> Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow!("TCP server on {} already started", self.local_addr))?;
        listener
            .set_nonblocking(true)
            .context("failed to make TCP listener non-blocking")?;
        let table = Arc::clone(&self.table);
        let shutdown = Arc::clone(&self.shutdown);
        let settings = self.settings;
        let acceptor = thread::Builder::new()
            .name("fd-door-tcp".into())
            .spawn(move || accept_loop(listener, table, settings, shutdown))
            .context("failed to spawn TCP accept thread")?;
        info!("TCP transport listening on {}", self.local_addr);
        self.acceptor = Some(acceptor);
        Ok(())
    }

    /// Stop accepting, wait for in-flight connections to finish, then release
    /// the listening socket.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(acceptor) = self.acceptor.take() {
            if acceptor.join().is_err() {
                error!("TCP accept thread panicked");
            }
            info!("TCP transport on {} stopped", self.local_addr);
        }
        self.listener = None;
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: TcpListener,
    table: Arc<HandleTable>,
    settings: TcpSettings,
    shutdown: Arc<AtomicBool>,
) {
    let mut workers: Vec<JoinHandle<()>> = Vec::new();
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let connection = match Connection::new(
                    stream,
                    peer,
                    Arc::clone(&table),
                    settings,
                    Arc::clone(&shutdown),
                ) {
                    Ok(connection) => connection,
                    Err(err) => {
                        warn!("dropping connection from {peer}: {err:#}");
                        continue;
                    }
                };
                match thread::Builder::new()
                    .name(format!("fd-door-conn-{peer}"))
                    .spawn(move || connection.serve())
                {
                    Ok(worker) => workers.push(worker),
                    Err(err) => warn!("failed to spawn worker for {peer}: {err}"),
                }
            }
            Err(err) if err.kind() == IoErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(err) => {
                warn!("TCP accept failed: {err}");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
        workers.retain(|worker| !worker.is_finished());
    }

    debug!(
        "TCP listener draining {} active connection(s)",
        workers.len()
    );
    for worker in workers {
        if worker.join().is_err() {
            error!("TCP connection worker panicked");
        }
    }
}

/// Why a connection ended.
#[derive(Debug)]
enum Teardown {
    PeerClosed,
    CloseRequested,
    IdleTimeout,
    DecodeFailure,
    Transport(String),
    ServerStopping,
}

impl fmt::Display for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Teardown::PeerClosed => f.write_str("peer closed the connection"),
            Teardown::CloseRequested => f.write_str("close completed"),
            Teardown::IdleTimeout => f.write_str("idle timeout"),
            Teardown::DecodeFailure => f.write_str("undecodable request"),
            Teardown::Transport(err) => write!(f, "transport error: {err}"),
            Teardown::ServerStopping => f.write_str("server stopping"),
        }
    }
}

struct Connection {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
    peer: SocketAddr,
    table: Arc<HandleTable>,
    settings: TcpSettings,
    shutdown: Arc<AtomicBool>,
    ledger: ConnectionLedger,
}

impl Connection {
    fn new(
        stream: TcpStream,
        peer: SocketAddr,
        table: Arc<HandleTable>,
        settings: TcpSettings,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self> {
        stream
            .set_nonblocking(false)
            .context("failed to make connection blocking")?;
        stream
            .set_read_timeout(Some(settings.idle_timeout))
            .context("failed to configure idle timeout")?;
        stream
            .set_write_timeout(Some(settings.idle_timeout))
            .context("failed to configure write timeout")?;
        let reader = BufReader::new(stream.try_clone().context("failed to clone TCP stream")?);
        Ok(Self {
            writer: stream,
            reader,
            peer,
            table,
            settings,
            shutdown,
            ledger: ConnectionLedger::new(),
        })
    }

    fn serve(mut self) {
        info!("client connected: {}", self.peer);
        let reason = self.run();
        let released = self.ledger.release_all(&self.table);
        if released > 0 {
            info!(
                "client {} disconnected ({reason}); released {released} reference(s) it left open",
                self.peer
            );
        } else {
            info!("client {} disconnected ({reason})", self.peer);
        }
        let _ = self.writer.shutdown(Shutdown::Both);
    }

    fn run(&mut self) -> Teardown {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Teardown::ServerStopping;
            }
            let frame = match read_frame(&mut self.reader) {
                Ok(Some(frame)) => frame,
                Ok(None) => return Teardown::PeerClosed,
                Err(err) if err.is_timeout() => return Teardown::IdleTimeout,
                Err(FrameError::TooLarge { limit }) => {
                    warn!("client {} sent a frame over {limit} bytes", self.peer);
                    let response = Response::error(
                        None,
                        ErrorKind::DecodeError,
                        format!("frame exceeds {limit} bytes"),
                    );
                    let _ = self.respond(&response);
                    return Teardown::DecodeFailure;
                }
                Err(FrameError::Io(err)) => return Teardown::Transport(err.to_string()),
            };

            let request = match decode_request(&frame) {
                Ok(request) => request,
                Err(err) => {
                    warn!("client {} sent an undecodable request: {err}", self.peer);
                    let response =
                        Response::error(peek_tag(&frame), ErrorKind::DecodeError, err.to_string());
                    let _ = self.respond(&response);
                    return Teardown::DecodeFailure;
                }
            };

            let dispatched = dispatch(&self.table, &request);
            let closed = self.ledger.record(&dispatched.effect);
            if let Err(reason) = self.respond(&dispatched.response) {
                return reason;
            }
            // Other references still held keep the connection alive; ending
            // it here would release descriptors the peer still uses.
            if closed && self.settings.teardown_on_close && self.ledger.is_empty() {
                return Teardown::CloseRequested;
            }
        }
    }

    fn respond(&mut self, response: &Response) -> Result<(), Teardown> {
        let bytes = encode_response(response).map_err(|err| {
            error!("failed to encode response for {}: {err}", self.peer);
            Teardown::Transport(err.to_string())
        })?;
        write_frame(&mut self.writer, &bytes).map_err(|err| Teardown::Transport(err.to_string()))
    }
}
