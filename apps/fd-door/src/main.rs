// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: CLI entry point for the fd-door server and its one-shot client.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! CLI entry point for fd-door.

use std::io::{self, Read};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use env_logger::Env;
use log::{info, warn, LevelFilter};

use fd_door::{FdDoor, FdDoorConfig, RemoteTable, TcpClient, UdpClient};
use fd_wire::Fd;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum TransportKind {
    Tcp,
    Udp,
}

/// fd-door command-line arguments.
#[derive(Debug, Parser)]
#[command(author = "Lukas Bower", version, about = "Remote descriptor table service", long_about = None)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the handle table until stdin reaches end of file.
    Serve {
        /// Path to an fd-door TOML configuration.
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Override the TCP listen address.
        #[arg(long, value_name = "ADDR")]
        tcp: Option<String>,

        /// Override the UDP listen address.
        #[arg(long, value_name = "ADDR")]
        udp: Option<String>,

        /// Override the descriptor space size.
        #[arg(long)]
        max_descriptors: Option<u32>,

        /// Override the directory used for `text` resources.
        #[arg(long, value_name = "DIR")]
        text_root: Option<PathBuf>,
    },
    /// Issue one request against a running server and print the reply.
    Call {
        /// Transport used to reach the server.
        #[arg(long, value_enum, default_value = "tcp")]
        transport: TransportKind,

        /// Server address.
        #[arg(long)]
        addr: SocketAddr,

        /// Reply timeout in milliseconds.
        #[arg(long, default_value_t = 5_000)]
        timeout_ms: u64,

        #[command(subcommand)]
        op: CallOp,
    },
}

#[derive(Debug, Subcommand)]
enum CallOp {
    /// Open a named resource.
    ///
    /// Over TCP the descriptor is released as soon as this one-shot
    /// connection closes, so the printed value cannot be reused by a later
    /// `call`; use `--transport udp` to keep it open.
    Open {
        /// Resource name.
        name: String,
        /// Resource type tag.
        #[arg(default_value = fd_table::DEFAULT_TYPE_TAG)]
        type_tag: String,
    },
    /// Drop one reference to a descriptor.
    Close {
        /// Descriptor.
        fd: Fd,
    },
    /// Read the current value behind a descriptor.
    Read {
        /// Descriptor.
        fd: Fd,
    },
    /// Write a value through a descriptor.
    Write {
        /// Descriptor.
        fd: Fd,
        /// Value to write.
        value: String,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let mut builder =
        env_logger::Builder::from_env(Env::default().default_filter_or(default_level.as_str()));
    builder.format_timestamp_millis();
    let _ = builder.try_init();
}

fn serve(
    config_path: Option<PathBuf>,
    tcp: Option<String>,
    udp: Option<String>,
    max_descriptors: Option<u32>,
    text_root: Option<PathBuf>,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => FdDoorConfig::load(&path)?,
        None => FdDoorConfig::default(),
    };
    if let Some(addr) = tcp {
        config.tcp.bind = addr;
    }
    if let Some(addr) = udp {
        config.udp.bind = addr;
    }
    if let Some(max) = max_descriptors {
        config.table.max_descriptors = max;
    }
    if let Some(root) = text_root {
        config.table.text_root = root;
    }
    config.validate().context("invalid fd-door settings")?;
    info!("close stdin (Ctrl-D) to stop");
    serve_until_eof(&config, io::stdin().lock())
}

/// Serve until `input` reaches end of file, then stop and drain every
/// transport.
fn serve_until_eof(config: &FdDoorConfig, mut input: impl Read) -> Result<()> {
    let mut door = FdDoor::start(config).context("failed to start fd-door")?;
    let mut sink = Vec::new();
    if let Err(err) = input.read_to_end(&mut sink) {
        warn!("stop signal input failed: {err}");
    }
    door.stop();
    Ok(())
}

fn one_shot_warning(transport: TransportKind, op: &CallOp) -> Option<&'static str> {
    match (transport, op) {
        (TransportKind::Tcp, CallOp::Open { .. }) => Some(
            "the descriptor is released when this TCP connection closes; \
             use --transport udp to keep it open",
        ),
        _ => None,
    }
}

fn call(transport: TransportKind, addr: SocketAddr, timeout: Duration, op: CallOp) -> Result<()> {
    let mut client: Box<dyn RemoteTable> = match transport {
        TransportKind::Tcp => Box::new(TcpClient::new(addr).with_timeout(timeout)),
        TransportKind::Udp => Box::new(
            UdpClient::connect(addr)
                .context("failed to bind UDP client socket")?
                .with_timeout(timeout),
        ),
    };
    let client = client.as_mut();
    if let Some(note) = one_shot_warning(transport, &op) {
        warn!("{note}");
    }
    match op {
        CallOp::Open { name, type_tag } => {
            let fd = client.open(&name, &type_tag)?;
            println!("fd {fd}");
        }
        CallOp::Close { fd } => {
            let remaining = client.close(fd)?;
            println!("closed fd {fd} ({remaining} remaining)");
        }
        CallOp::Read { fd } => {
            println!("{}", client.read(fd)?);
        }
        CallOp::Write { fd, value } => {
            client.write(fd, &value)?;
            println!("ok");
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.command {
        Command::Serve {
            config,
            tcp,
            udp,
            max_descriptors,
            text_root,
        } => serve(config, tcp, udp, max_descriptors, text_root),
        Command::Call {
            transport,
            addr,
            timeout_ms,
            op,
        } => call(transport, addr, Duration::from_millis(timeout_ms), op),
    }
}
