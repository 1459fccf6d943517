// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Stream client for the fd-door TCP transport.
// Author: Lukas Bower

//! TCP client backend.

use std::collections::{BTreeMap, BTreeSet};
use std::io::BufReader;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use fd_wire::{
    decode_response, encode_request, read_frame, write_frame, ErrorKind, Fd, FrameError, Request,
    RequestBody, ResponseBody,
};
use log::debug;

use super::{ClientError, RemoteTable, DEFAULT_CLIENT_TIMEOUT};

/// Client speaking newline-framed envelopes over one TCP connection.
///
/// The connection is opened lazily on the first request and re-opened after
/// the server tears it down. The server releases whatever a connection still
/// holds when it ends, so descriptors opened on an ended connection are
/// remembered as stale and refused locally with
/// [`ClientError::StaleDescriptor`] instead of reaching whichever entry now
/// owns the value.
#[derive(Debug)]
pub struct TcpClient {
    addr: SocketAddr,
    timeout: Duration,
    teardown_on_close: bool,
    stream: Option<TcpStream>,
    reader: Option<BufReader<TcpStream>>,
    held: BTreeMap<Fd, u32>,
    stale: BTreeSet<Fd>,
}

impl TcpClient {
    /// Create a client targeting `addr` without connecting yet.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            timeout: DEFAULT_CLIENT_TIMEOUT,
            teardown_on_close: true,
            stream: None,
            reader: None,
            held: BTreeMap::new(),
            stale: BTreeSet::new(),
        }
    }

    /// Override the connect/read/write timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether the server drops the connection after a close that leaves it
    /// holding nothing. Must match the server's `teardown_on_close`.
    pub fn with_teardown_on_close(mut self, teardown: bool) -> Self {
        self.teardown_on_close = teardown;
        self
    }

    /// True while a connection is held.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// True if `fd` was opened on a connection that has since ended, or was
    /// closed by this client, and has not been handed out to it again.
    pub fn is_stale(&self, fd: Fd) -> bool {
        self.stale.contains(&fd)
    }

    /// Drop the current connection; the next request reconnects.
    ///
    /// The server releases every reference the connection still held, so
    /// those descriptors become stale.
    pub fn disconnect(&mut self) {
        self.reader = None;
        self.stream = None;
        let held = std::mem::take(&mut self.held);
        self.stale.extend(held.into_keys());
    }

    fn connect(&self) -> Result<TcpStream, ClientError> {
        let stream =
            TcpStream::connect_timeout(&self.addr, self.timeout).map_err(ClientError::from_io)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        Ok(stream)
    }

    fn ensure_connection(&mut self) -> Result<(), ClientError> {
        if self.stream.is_none() {
            let stream = self.connect()?;
            let reader_stream = stream.try_clone()?;
            self.reader = Some(BufReader::new(reader_stream));
            self.stream = Some(stream);
            debug!("connected to {}", self.addr);
        }
        Ok(())
    }

    fn round_trip(&mut self, payload: &[u8]) -> Result<Vec<u8>, ClientError> {
        self.ensure_connection()?;
        let stream = self.stream.as_mut().ok_or(ClientError::Disconnected)?;
        write_frame(stream, payload).map_err(ClientError::from_io)?;
        let reader = self.reader.as_mut().ok_or(ClientError::Disconnected)?;
        match read_frame(reader) {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(ClientError::Disconnected),
            Err(FrameError::Io(err)) => Err(ClientError::from_io(err)),
            Err(err @ FrameError::TooLarge { .. }) => {
                Err(ClientError::UnexpectedReply(err.to_string()))
            }
        }
    }

    fn track(&mut self, request: &RequestBody, reply: &ResponseBody) {
        match (request, reply) {
            (RequestBody::Open { .. }, ResponseBody::Opened { fd }) => {
                *self.held.entry(*fd).or_insert(0) += 1;
                self.stale.remove(fd);
            }
            (RequestBody::Close { fd }, ResponseBody::Closed { .. }) => {
                if let Some(count) = self.held.get_mut(fd) {
                    *count -= 1;
                    if *count == 0 {
                        self.held.remove(fd);
                        self.stale.insert(*fd);
                    }
                }
                if self.teardown_on_close && self.held.is_empty() {
                    self.disconnect();
                }
            }
            // The server ends the connection after answering an undecodable
            // request.
            (
                _,
                ResponseBody::Error {
                    kind: ErrorKind::DecodeError,
                    ..
                },
            ) => self.disconnect(),
            _ => {}
        }
    }
}

fn target_fd(body: &RequestBody) -> Option<Fd> {
    match body {
        RequestBody::Open { .. } => None,
        RequestBody::Close { fd } | RequestBody::Read { fd } | RequestBody::Write { fd, .. } => {
            Some(*fd)
        }
    }
}

impl RemoteTable for TcpClient {
    fn transact(&mut self, body: RequestBody) -> Result<ResponseBody, ClientError> {
        if let Some(fd) = target_fd(&body).filter(|fd| self.stale.contains(fd)) {
            return Err(ClientError::StaleDescriptor(fd));
        }
        let request = Request::new(body);
        let payload = encode_request(&request)?;
        let frame = match self.round_trip(&payload) {
            Ok(frame) => frame,
            Err(err) => {
                self.disconnect();
                return Err(err);
            }
        };
        let response = match decode_response(&frame) {
            Ok(response) => response,
            Err(err) => {
                self.disconnect();
                return Err(err.into());
            }
        };
        self.track(&request.body, &response.body);
        Ok(response.body)
    }
}
