// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Datagram client for the fd-door UDP transport.
// Author: Lukas Bower

//! UDP client backend.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use fd_wire::{
    decode_response, encode_request, Request, RequestBody, ResponseBody, MAX_DATAGRAM_LEN,
};
use log::debug;

use super::{ClientError, RemoteTable, DEFAULT_CLIENT_TIMEOUT};

/// Client sending one datagram per request.
///
/// Every request carries a fresh tag. Replies from other addresses or with
/// another tag (late answers to earlier, timed-out requests) are discarded.
#[derive(Debug)]
pub struct UdpClient {
    socket: UdpSocket,
    server: SocketAddr,
    timeout: Duration,
    read_retries: u32,
    next_tag: u32,
    buf: Vec<u8>,
}

impl UdpClient {
    /// Bind an ephemeral local socket for talking to `server`.
    pub fn connect(server: SocketAddr) -> Result<Self, ClientError> {
        let local: SocketAddr = if server.is_ipv6() {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        Ok(Self {
            socket,
            server,
            timeout: DEFAULT_CLIENT_TIMEOUT,
            read_retries: 0,
            next_tag: 1,
            buf: vec![0u8; MAX_DATAGRAM_LEN],
        })
    }

    /// Override how long to wait for each reply.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resend `read` requests up to `retries` extra times after a timeout.
    pub fn with_read_retries(mut self, retries: u32) -> Self {
        self.read_retries = retries;
        self
    }

    /// Local address of the client socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn next_tag(&mut self) -> u32 {
        let tag = self.next_tag;
        self.next_tag = self.next_tag.wrapping_add(1).max(1);
        tag
    }

    fn attempt(&mut self, body: &RequestBody) -> Result<ResponseBody, ClientError> {
        let tag = self.next_tag();
        let payload = encode_request(&Request::tagged(tag, body.clone()))?;
        self.socket.send_to(&payload, self.server)?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ClientError::Timeout);
            }
            self.socket.set_read_timeout(Some(remaining))?;
            let (len, from) = self
                .socket
                .recv_from(&mut self.buf)
                .map_err(ClientError::from_io)?;
            if from != self.server {
                debug!("discarding datagram from unexpected peer {from}");
                continue;
            }
            let response = match decode_response(&self.buf[..len]) {
                Ok(response) => response,
                Err(err) => {
                    debug!("discarding undecodable reply: {err}");
                    continue;
                }
            };
            if response.tag != Some(tag) {
                debug!(
                    "discarding reply tagged {:?} while waiting for {tag}",
                    response.tag
                );
                continue;
            }
            return Ok(response.body);
        }
    }

    fn retries_for(&self, body: &RequestBody) -> u32 {
        match body {
            RequestBody::Read { .. } => self.read_retries,
            _ => 0,
        }
    }
}

impl RemoteTable for UdpClient {
    fn transact(&mut self, body: RequestBody) -> Result<ResponseBody, ClientError> {
        let retries = self.retries_for(&body);
        let mut attempt = 0;
        loop {
            match self.attempt(&body) {
                Err(ClientError::Timeout) if attempt < retries => {
                    attempt += 1;
                    debug!("{} timed out, retry {attempt}/{retries}", body.operation());
                }
                result => return result,
            }
        }
    }
}
