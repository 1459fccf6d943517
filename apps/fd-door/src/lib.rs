// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Expose the fd-door handle table over TCP and UDP.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! fd-door serves one shared descriptor table to remote peers.
//!
//! Peers open named resources, receive small integer descriptors, and read,
//! write or close through those descriptors. Opens of the same name share a
//! single reference-counted entry. Both transports feed the same
//! [`HandleTable`], so a descriptor obtained over TCP is valid over UDP.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use fd_table::HandleTable;
use log::info;

pub mod client;
pub mod config;
pub mod dispatch;
pub mod ledger;
pub mod tcp;
pub mod udp;

pub use client::{ClientError, RemoteTable, TcpClient, UdpClient};
pub use config::FdDoorConfig;
pub use dispatch::{dispatch, Dispatched, Effect};
pub use ledger::ConnectionLedger;
pub use tcp::{TcpServer, TcpSettings};
pub use udp::UdpServer;

/// Running server: the shared table plus whichever transports are enabled.
#[derive(Debug)]
pub struct FdDoor {
    table: Arc<HandleTable>,
    tcp: Option<TcpServer>,
    udp: Option<UdpServer>,
}

impl FdDoor {
    /// Build the table, bind the enabled transports and start serving.
    pub fn start(config: &FdDoorConfig) -> Result<Self> {
        config.validate()?;
        let table = Arc::new(config.build_table());
        Self::start_with_table(config, table)
    }

    /// Serve an existing table.
    pub fn start_with_table(config: &FdDoorConfig, table: Arc<HandleTable>) -> Result<Self> {
        let mut door = Self {
            table,
            tcp: None,
            udp: None,
        };
        if config.tcp.enabled {
            let mut server = TcpServer::bind(
                config.tcp.bind.as_str(),
                config.tcp_settings(),
                Arc::clone(&door.table),
            )?;
            server.start()?;
            door.tcp = Some(server);
        }
        if config.udp.enabled {
            let mut server = UdpServer::bind(config.udp.bind.as_str(), Arc::clone(&door.table))?;
            server.start()?;
            door.udp = Some(server);
        }
        info!(
            "fd-door serving {} descriptor(s) (tcp: {:?}, udp: {:?})",
            door.table.max_descriptors(),
            door.tcp_addr(),
            door.udp_addr()
        );
        Ok(door)
    }

    /// Shared handle table.
    pub fn table(&self) -> &Arc<HandleTable> {
        &self.table
    }

    /// Bound TCP address, when the transport is enabled.
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp.as_ref().map(TcpServer::local_addr)
    }

    /// Bound UDP address, when the transport is enabled.
    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.udp.as_ref().map(UdpServer::local_addr)
    }

    /// Stop both transports, letting in-flight requests complete.
    pub fn stop(&mut self) {
        if let Some(mut server) = self.tcp.take() {
            server.stop();
        }
        if let Some(mut server) = self.udp.take() {
            server.stop();
        }
        info!(
            "fd-door stopped with {} entries still open",
            self.table.len()
        );
    }
}

impl Drop for FdDoor {
    fn drop(&mut self) {
        if self.tcp.is_some() || self.udp.is_some() {
            self.stop();
        }
    }
}
