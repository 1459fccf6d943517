// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Serve the handle table over UDP, one datagram per request.
// Author: Lukas Bower

//! Connectionless transport.
//!
//! Datagrams are processed sequentially on a single thread. Every request
//! datagram is answered with exactly one response datagram sent to the
//! observed sender address; the server neither retries nor acknowledges.
//! All senders share the one handle table, and a vanished sender keeps its
//! references until an explicit close arrives.

use std::fmt;
use std::io::ErrorKind as IoErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use fd_table::HandleTable;
use fd_wire::{
    decode_request, encode_response, peek_tag, ErrorKind, Response, MAX_DATAGRAM_LEN,
};
use log::{error, info, warn};

use crate::dispatch::dispatch;

/// Interval at which the receive loop re-checks the stop flag.
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// UDP front-end for a shared [`HandleTable`].
pub struct UdpServer {
    table: Arc<HandleTable>,
    local_addr: SocketAddr,
    socket: Option<UdpSocket>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl fmt::Debug for UdpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpServer")
            .field("local_addr", &self.local_addr)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl UdpServer {
    /// Bind the socket without serving yet.
    pub fn bind(addr: impl ToSocketAddrs, table: Arc<HandleTable>) -> Result<Self> {
        let socket = UdpSocket::bind(addr).context("failed to bind UDP socket")?;
        let local_addr = socket
            .local_addr()
            .context("failed to query UDP socket address")?;
        Ok(Self {
            table,
            local_addr,
            socket: Some(socket),
            shutdown: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// True between [`start`](Self::start) and [`stop`](Self::stop).
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Begin serving datagrams on a background thread.
    pub fn start(&mut self) -> Result<()> {
        let socket = self
            .socket
            .take()
            .ok_or_else(|| anyhow!("UDP server on {} already started", self.local_addr))?;
        socket
            .set_read_timeout(Some(RECV_POLL_INTERVAL))
            .context("failed to configure UDP poll interval")?;
        let table = Arc::clone(&self.table);
        let shutdown = Arc::clone(&self.shutdown);
        let worker = thread::Builder::new()
            .name("fd-door-udp".into())
            .spawn(move || serve_datagrams(socket, table, shutdown))
            .context("failed to spawn UDP thread")?;
        info!("UDP transport listening on {}", self.local_addr);
        self.worker = Some(worker);
        Ok(())
    }

    /// Stop after the datagram currently being handled, then close the socket.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("UDP thread panicked");
            }
            info!("UDP transport on {} stopped", self.local_addr);
        }
        self.socket = None;
    }
}

impl Drop for UdpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve_datagrams(socket: UdpSocket, table: Arc<HandleTable>, shutdown: Arc<AtomicBool>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
    while !shutdown.load(Ordering::SeqCst) {
        let (len, peer) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(err) if matches!(err.kind(), IoErrorKind::WouldBlock | IoErrorKind::TimedOut) => {
                continue;
            }
            Err(err) => {
                warn!("UDP receive failed: {err}");
                continue;
            }
        };
        let datagram = &buf[..len];
        let response = match decode_request(datagram) {
            Ok(request) => dispatch(&table, &request).response,
            Err(err) => {
                warn!("undecodable datagram from {peer}: {err}");
                Response::error(peek_tag(datagram), ErrorKind::DecodeError, err.to_string())
            }
        };
        match encode_response(&response) {
            Ok(bytes) => {
                if let Err(err) = socket.send_to(&bytes, peer) {
                    warn!("failed to answer {peer}: {err}");
                }
            }
            Err(err) => error!("failed to encode response for {peer}: {err}"),
        }
    }
}
