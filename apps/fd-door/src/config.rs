// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Load and validate fd-door server configuration from TOML.
// Author: Lukas Bower

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use fd_table::{HandleTable, ResourceRegistry, DEFAULT_MAX_DESCRIPTORS};
use serde::Deserialize;

use crate::tcp::TcpSettings;

/// Default TCP listen address.
pub const DEFAULT_TCP_BIND: &str = "127.0.0.1:5432";

/// Default UDP listen address.
pub const DEFAULT_UDP_BIND: &str = "127.0.0.1:5433";

/// Default idle timeout for stream connections, in milliseconds.
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 2_000;

/// Top-level fd-door configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FdDoorConfig {
    /// Handle table sizing and resource settings.
    pub table: TableConfig,
    /// Connection-oriented transport.
    pub tcp: TcpConfig,
    /// Connectionless transport.
    pub udp: UdpConfig,
}

/// Handle table settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TableConfig {
    /// Size of the descriptor space.
    pub max_descriptors: u32,
    /// Directory holding files created for `text` resources.
    pub text_root: PathBuf,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            max_descriptors: DEFAULT_MAX_DESCRIPTORS,
            text_root: PathBuf::from("."),
        }
    }
}

/// TCP transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TcpConfig {
    /// Serve the TCP transport.
    pub enabled: bool,
    /// Listen address.
    pub bind: String,
    /// Idle timeout before a silent connection is torn down.
    pub idle_timeout_ms: u64,
    /// Tear the connection down after a successful `close` that leaves it
    /// holding nothing.
    pub teardown_on_close: bool,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: DEFAULT_TCP_BIND.to_owned(),
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            teardown_on_close: true,
        }
    }
}

/// UDP transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UdpConfig {
    /// Serve the UDP transport.
    pub enabled: bool,
    /// Listen address.
    pub bind: String,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: DEFAULT_UDP_BIND.to_owned(),
        }
    }
}

impl FdDoorConfig {
    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read fd-door config {}", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("invalid fd-door config {}", path.display()))
    }

    /// Parse and validate configuration text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("invalid fd-door TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.table.max_descriptors == 0 {
            return Err(anyhow!("table max_descriptors must be >= 1"));
        }
        if self.tcp.idle_timeout_ms == 0 {
            return Err(anyhow!("tcp idle_timeout_ms must be >= 1"));
        }
        if !self.tcp.enabled && !self.udp.enabled {
            return Err(anyhow!("at least one of tcp or udp must be enabled"));
        }
        Ok(())
    }

    /// Build the handle table described by this configuration.
    pub fn build_table(&self) -> HandleTable {
        HandleTable::new(
            ResourceRegistry::builtin(self.table.text_root.clone()),
            self.table.max_descriptors,
        )
    }

    /// Stream transport settings.
    pub fn tcp_settings(&self) -> TcpSettings {
        TcpSettings {
            idle_timeout: Duration::from_millis(self.tcp.idle_timeout_ms),
            teardown_on_close: self.tcp.teardown_on_close,
        }
    }
}
