// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Encode and decode fd-door envelopes as JSON.
// Author: Lukas Bower

//! JSON encode/decode helpers for fd-door envelopes.

use serde_json::Value;
use thiserror::Error;

use crate::types::*;

/// Errors raised while encoding or decoding envelopes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Frame contained no bytes (or only whitespace).
    #[error("empty frame")]
    Empty,
    /// Frame exceeded the transport limit.
    #[error("frame exceeds {limit} bytes")]
    FrameTooLarge {
        /// Maximum accepted frame length.
        limit: usize,
    },
    /// Frame was not a well-formed envelope.
    #[error("malformed envelope: {0}")]
    Malformed(String),
    /// Operation name outside the supported set.
    #[error("unsupported operation {0:?}")]
    UnknownOperation(String),
    /// Argument count does not match the operation.
    #[error("{op} expects {expected} arguments, got {actual}")]
    Arity {
        /// Operation being decoded.
        op: Operation,
        /// Accepted argument counts.
        expected: &'static str,
        /// Argument count observed on the wire.
        actual: usize,
    },
    /// Argument present but of the wrong shape.
    #[error("{op} argument `{field}` must be {expected}")]
    InvalidArgument {
        /// Operation being decoded.
        op: Operation,
        /// Name of the offending argument.
        field: &'static str,
        /// Description of the accepted shape.
        expected: &'static str,
    },
    /// Serialisation failed.
    #[error("failed to encode envelope: {0}")]
    Encode(String),
}

/// Encode a request as a JSON envelope.
pub fn encode_request(request: &Request) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(&Envelope::from(request)).map_err(|err| CodecError::Encode(err.to_string()))
}

/// Decode and validate a request envelope.
pub fn decode_request(bytes: &[u8]) -> Result<Request, CodecError> {
    let envelope: Envelope = parse_json(bytes)?;
    Request::try_from(envelope)
}

/// Encode a response envelope.
pub fn encode_response(response: &Response) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(response).map_err(|err| CodecError::Encode(err.to_string()))
}

/// Decode a response envelope.
pub fn decode_response(bytes: &[u8]) -> Result<Response, CodecError> {
    parse_json(bytes)
}

/// Best-effort extraction of the correlation tag from a request frame that
/// may fail full validation.
pub fn peek_tag(bytes: &[u8]) -> Option<u32> {
    let value: Value = serde_json::from_slice(trim(bytes)).ok()?;
    let tag = value.get("tag")?.as_u64()?;
    u32::try_from(tag).ok()
}

fn parse_json<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    let bytes = trim(bytes);
    if bytes.is_empty() {
        return Err(CodecError::Empty);
    }
    serde_json::from_slice(bytes).map_err(|err| CodecError::Malformed(err.to_string()))
}

fn trim(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |idx| idx + 1);
    &bytes[start..end]
}

impl TryFrom<Envelope> for Request {
    type Error = CodecError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        let op: Operation = envelope
            .op
            .parse()
            .map_err(|()| CodecError::UnknownOperation(envelope.op.clone()))?;
        let args = envelope.args;
        let body = match op {
            Operation::Open => {
                check_arity(op, &args, 2, 3, "2 or 3")?;
                RequestBody::Open {
                    name: string_arg(op, &args, 0, "name")?,
                    type_tag: string_arg(op, &args, 1, "type")?,
                    hint: match args.get(2) {
                        Some(_) => Some(string_arg(op, &args, 2, "hint")?),
                        None => None,
                    },
                }
            }
            Operation::Close => {
                check_arity(op, &args, 1, 1, "1")?;
                RequestBody::Close {
                    fd: fd_arg(op, &args, 0)?,
                }
            }
            Operation::Read => {
                check_arity(op, &args, 1, 1, "1")?;
                RequestBody::Read {
                    fd: fd_arg(op, &args, 0)?,
                }
            }
            Operation::Write => {
                check_arity(op, &args, 2, 2, "2")?;
                RequestBody::Write {
                    fd: fd_arg(op, &args, 0)?,
                    value: string_arg(op, &args, 1, "value")?,
                }
            }
        };
        Ok(Request {
            tag: envelope.tag,
            body,
        })
    }
}

fn check_arity(
    op: Operation,
    args: &[Value],
    min: usize,
    max: usize,
    expected: &'static str,
) -> Result<(), CodecError> {
    if (min..=max).contains(&args.len()) {
        Ok(())
    } else {
        Err(CodecError::Arity {
            op,
            expected,
            actual: args.len(),
        })
    }
}

fn string_arg(
    op: Operation,
    args: &[Value],
    index: usize,
    field: &'static str,
) -> Result<String, CodecError> {
    args.get(index)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or(CodecError::InvalidArgument {
            op,
            field,
            expected: "a string",
        })
}

fn fd_arg(op: Operation, args: &[Value], index: usize) -> Result<Fd, CodecError> {
    args.get(index)
        .and_then(Value::as_u64)
        .and_then(|raw| Fd::try_from(raw).ok())
        .ok_or(CodecError::InvalidArgument {
            op,
            field: "fd",
            expected: "an unsigned 32-bit integer",
        })
}
