// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Client-side access to a remote fd-door handle table.
// Author: Lukas Bower

//! Client backends for the fd-door transports.
//!
//! Both backends implement [`RemoteTable`], which turns the four table
//! operations into request envelopes and maps replies back into typed
//! results. A client never has more than one request in flight.

use std::io;
use std::time::Duration;

use fd_wire::{CodecError, ErrorKind, Fd, RequestBody, ResponseBody};
use thiserror::Error;

pub mod tcp;
pub mod udp;

pub use tcp::TcpClient;
pub use udp::UdpClient;

/// Default timeout applied to every client round trip.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors surfaced to callers of a [`RemoteTable`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// Socket-level failure.
    #[error("transport I/O failed: {0}")]
    Io(#[from] io::Error),
    /// Request could not be encoded or reply could not be decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// No reply arrived before the deadline.
    #[error("timed out waiting for a reply")]
    Timeout,
    /// Server answered with an error response.
    #[error("server reported {kind}: {message}")]
    Remote {
        /// Error category reported by the server.
        kind: ErrorKind,
        /// Server-side detail.
        message: String,
    },
    /// Server answered with a reply that does not match the request.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
    /// Server closed the connection before replying.
    #[error("connection closed by server")]
    Disconnected,
    /// Descriptor belongs to a connection that has ended and was refused
    /// without contacting the server.
    #[error("fd {0} was released with its connection")]
    StaleDescriptor(Fd),
}

impl ClientError {
    /// Wire-level category for this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Io(_) | ClientError::Disconnected => ErrorKind::TransportError,
            ClientError::Codec(_) | ClientError::UnexpectedReply(_) => ErrorKind::DecodeError,
            ClientError::Timeout => ErrorKind::Timeout,
            ClientError::Remote { kind, .. } => *kind,
            ClientError::StaleDescriptor(_) => ErrorKind::NotFound,
        }
    }

    pub(crate) fn from_io(err: io::Error) -> Self {
        if matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        ) {
            ClientError::Timeout
        } else {
            ClientError::Io(err)
        }
    }
}

/// Operations every fd-door client offers.
pub trait RemoteTable {
    /// Send one request and wait for its reply.
    ///
    /// Error replies are returned as `Ok(ResponseBody::Error { .. })`; the
    /// provided methods convert them into [`ClientError::Remote`].
    fn transact(&mut self, body: RequestBody) -> Result<ResponseBody, ClientError>;

    /// Open `name` as a resource of `type_tag`.
    fn open(&mut self, name: &str, type_tag: &str) -> Result<Fd, ClientError> {
        self.open_with_hint(name, type_tag, None)
    }

    /// Open with the optional third argument the server accepts and ignores.
    fn open_with_hint(
        &mut self,
        name: &str,
        type_tag: &str,
        hint: Option<&str>,
    ) -> Result<Fd, ClientError> {
        let body = RequestBody::Open {
            name: name.to_owned(),
            type_tag: type_tag.to_owned(),
            hint: hint.map(str::to_owned),
        };
        match expect_success(self.transact(body)?)? {
            ResponseBody::Opened { fd } => Ok(fd),
            other => Err(unexpected("open", &other)),
        }
    }

    /// Drop one reference; returns the references remaining on the entry.
    fn close(&mut self, fd: Fd) -> Result<u32, ClientError> {
        match expect_success(self.transact(RequestBody::Close { fd })?)? {
            ResponseBody::Closed { remaining } => Ok(remaining),
            other => Err(unexpected("close", &other)),
        }
    }

    /// Read the current value of `fd`.
    fn read(&mut self, fd: Fd) -> Result<String, ClientError> {
        match expect_success(self.transact(RequestBody::Read { fd })?)? {
            ResponseBody::Read { value } => Ok(value),
            other => Err(unexpected("read", &other)),
        }
    }

    /// Write `value` to `fd`.
    fn write(&mut self, fd: Fd, value: &str) -> Result<(), ClientError> {
        let body = RequestBody::Write {
            fd,
            value: value.to_owned(),
        };
        match expect_success(self.transact(body)?)? {
            ResponseBody::Written => Ok(()),
            other => Err(unexpected("write", &other)),
        }
    }
}

fn expect_success(body: ResponseBody) -> Result<ResponseBody, ClientError> {
    match body {
        ResponseBody::Error { kind, message } => Err(ClientError::Remote { kind, message }),
        other => Ok(other),
    }
}

fn unexpected(op: &str, body: &ResponseBody) -> ClientError {
    ClientError::UnexpectedReply(format!("{op} answered with {body:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Scripted {
        sent: Vec<RequestBody>,
        replies: VecDeque<ResponseBody>,
    }

    impl RemoteTable for Scripted {
        fn transact(&mut self, body: RequestBody) -> Result<ResponseBody, ClientError> {
            self.sent.push(body);
            self.replies.pop_front().ok_or(ClientError::Disconnected)
        }
    }

    #[test]
    fn provided_methods_map_replies() {
        let mut client = Scripted::default();
        client.replies.extend([
            ResponseBody::Opened { fd: 3 },
            ResponseBody::Written,
            ResponseBody::Read {
                value: "hi".into(),
            },
            ResponseBody::Closed { remaining: 0 },
        ]);
        assert_eq!(client.open_with_hint("a", "default", Some("m")).unwrap(), 3);
        client.write(3, "hi").unwrap();
        assert_eq!(client.read(3).unwrap(), "hi");
        assert_eq!(client.close(3).unwrap(), 0);
        assert_eq!(
            client.sent[0],
            RequestBody::Open {
                name: "a".into(),
                type_tag: "default".into(),
                hint: Some("m".into()),
            }
        );
    }

    #[test]
    fn remote_errors_and_mismatches_surface() {
        let mut client = Scripted::default();
        client.replies.extend([
            ResponseBody::Error {
                kind: ErrorKind::NotFound,
                message: "fd 9 is not open".into(),
            },
            ResponseBody::Written,
        ]);
        let err = client.read(9).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(matches!(client.close(1), Err(ClientError::UnexpectedReply(_))));
        assert_eq!(client.read(1).unwrap_err().kind(), ErrorKind::TransportError);
    }

    #[test]
    fn timeouts_are_classified() {
        let err = ClientError::from_io(io::Error::from(io::ErrorKind::WouldBlock));
        assert!(matches!(err, ClientError::Timeout));
        let err = ClientError::from_io(io::Error::from(io::ErrorKind::ConnectionReset));
        assert_eq!(err.kind(), ErrorKind::TransportError);
    }
}
