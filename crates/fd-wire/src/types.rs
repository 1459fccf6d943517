// Author: Lukas Bower
// Purpose: Define fd-door wire types and constants shared across components.

//! Data model for fd-door request and response envelopes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Small integer handle identifying one open table entry.
pub type Fd = u32;

/// Largest stream frame accepted by the server, excluding the terminator.
pub const MAX_FRAME_LEN: usize = 32 * 1024;

/// Receive buffer size for datagram transports.
pub const MAX_DATAGRAM_LEN: usize = 65_507;

/// Closed set of operations a remote caller may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Open (or share) a named resource.
    Open,
    /// Drop one reference to an open descriptor.
    Close,
    /// Read the current value of a resource.
    Read,
    /// Write a value to a resource.
    Write,
}

impl Operation {
    /// All supported operations.
    pub const ALL: [Operation; 4] = [
        Operation::Open,
        Operation::Close,
        Operation::Read,
        Operation::Write,
    ];

    /// Render the canonical wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Open => "open",
            Operation::Close => "close",
            Operation::Read => "read",
            Operation::Write => "write",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == value)
            .ok_or(())
    }
}

/// Typed request payload, one variant per [`Operation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    /// `open(name, type_tag[, hint])`.
    Open {
        /// Deduplication key of the resource.
        name: String,
        /// Registry tag selecting the resource implementation.
        type_tag: String,
        /// Optional legacy hint; accepted but never used for resolution.
        hint: Option<String>,
    },
    /// `close(fd)`.
    Close {
        /// Descriptor to release.
        fd: Fd,
    },
    /// `read(fd)`.
    Read {
        /// Descriptor to read.
        fd: Fd,
    },
    /// `write(fd, value)`.
    Write {
        /// Descriptor to write.
        fd: Fd,
        /// Value handed to the resource.
        value: String,
    },
}

impl RequestBody {
    /// Operation implemented by this payload.
    pub fn operation(&self) -> Operation {
        match self {
            RequestBody::Open { .. } => Operation::Open,
            RequestBody::Close { .. } => Operation::Close,
            RequestBody::Read { .. } => Operation::Read,
            RequestBody::Write { .. } => Operation::Write,
        }
    }
}

/// Request envelope after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Optional correlation tag echoed by the server.
    pub tag: Option<u32>,
    /// Operation payload.
    pub body: RequestBody,
}

impl Request {
    /// Build an untagged request.
    pub fn new(body: RequestBody) -> Self {
        Self { tag: None, body }
    }

    /// Build a request carrying a correlation tag.
    pub fn tagged(tag: u32, body: RequestBody) -> Self {
        Self {
            tag: Some(tag),
            body,
        }
    }
}

/// Raw envelope as it appears on the wire: an operation name plus ordered
/// arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Operation name.
    pub op: String,
    /// Ordered, operation-specific arguments.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Optional correlation tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<u32>,
}

impl From<&Request> for Envelope {
    fn from(request: &Request) -> Self {
        let args = match &request.body {
            RequestBody::Open {
                name,
                type_tag,
                hint,
            } => {
                let mut args = vec![Value::from(name.as_str()), Value::from(type_tag.as_str())];
                if let Some(hint) = hint {
                    args.push(Value::from(hint.as_str()));
                }
                args
            }
            RequestBody::Close { fd } | RequestBody::Read { fd } => vec![Value::from(*fd)],
            RequestBody::Write { fd, value } => vec![Value::from(*fd), Value::from(value.as_str())],
        };
        Self {
            op: request.body.operation().as_str().to_owned(),
            args,
            tag: request.tag,
        }
    }
}

/// Error categories reported back to remote callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unknown descriptor on close/read/write.
    NotFound,
    /// Unrecognised resource type tag.
    UnknownType,
    /// No descriptor available.
    ResourceExhausted,
    /// Peer stayed idle past the connection timeout.
    Timeout,
    /// Malformed envelope or unsupported operation.
    DecodeError,
    /// Send or receive failure.
    TransportError,
    /// Argument rejected by the table or a resource (for example an empty name).
    InvalidArgument,
    /// The backing resource failed while serving the request.
    ResourceFailure,
}

impl ErrorKind {
    /// Render the canonical wire label.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::UnknownType => "unknown_type",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::Timeout => "timeout",
            ErrorKind::DecodeError => "decode_error",
            ErrorKind::TransportError => "transport_error",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::ResourceFailure => "resource_failure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response payload, internally tagged by `reply` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum ResponseBody {
    /// Descriptor bound to the requested name.
    Opened {
        /// Descriptor value.
        fd: Fd,
    },
    /// One reference dropped.
    Closed {
        /// Opens still sharing the entry; zero once it is released.
        remaining: u32,
    },
    /// Write accepted by the resource.
    Written,
    /// Current resource value.
    Read {
        /// Value returned by the resource.
        value: String,
    },
    /// Request failed.
    Error {
        /// Error category.
        kind: ErrorKind,
        /// Human-readable detail.
        message: String,
    },
}

/// Response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Result payload.
    #[serde(flatten)]
    pub body: ResponseBody,
    /// Tag copied from the request, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<u32>,
}

impl Response {
    /// Build a response for the supplied request tag.
    pub fn new(tag: Option<u32>, body: ResponseBody) -> Self {
        Self { body, tag }
    }

    /// Build an error response.
    pub fn error(tag: Option<u32>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(
            tag,
            ResponseBody::Error {
                kind,
                message: message.into(),
            },
        )
    }

    /// Return the error kind if this is an error response.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.body {
            ResponseBody::Error { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_names_are_a_closed_set() {
        assert_eq!("open".parse::<Operation>(), Ok(Operation::Open));
        assert_eq!("write".parse::<Operation>(), Ok(Operation::Write));
        assert!("OPEN".parse::<Operation>().is_err());
        assert!("_next_fd".parse::<Operation>().is_err());
        assert!("__init__".parse::<Operation>().is_err());
    }

    #[test]
    fn envelope_keeps_open_hint_last() {
        let request = Request::new(RequestBody::Open {
            name: "out.txt".into(),
            type_tag: "text".into(),
            hint: Some("filetypes".into()),
        });
        let envelope = Envelope::from(&request);
        assert_eq!(envelope.op, "open");
        assert_eq!(
            envelope.args,
            vec![
                Value::from("out.txt"),
                Value::from("text"),
                Value::from("filetypes")
            ]
        );
        assert_eq!(envelope.tag, None);
    }

    #[test]
    fn error_kind_labels_match_serde() {
        for kind in [
            ErrorKind::NotFound,
            ErrorKind::UnknownType,
            ErrorKind::ResourceExhausted,
            ErrorKind::Timeout,
            ErrorKind::DecodeError,
            ErrorKind::TransportError,
            ErrorKind::InvalidArgument,
            ErrorKind::ResourceFailure,
        ] {
            let json = serde_json::to_value(kind).expect("serialise kind");
            assert_eq!(json, Value::from(kind.as_str()));
        }
    }
}
