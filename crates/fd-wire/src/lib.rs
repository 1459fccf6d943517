// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Provide fd-door envelope types, the JSON codec and line framing.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Envelope types and codec primitives shared by the fd-door server, its
//! clients and the handle table.
//!
//! A request envelope is a JSON object carrying an operation name and an
//! ordered argument list. Decoding matches the operation name against the
//! closed [`Operation`] set and validates the per-operation arity before a
//! typed [`Request`] is produced; nothing on the wire is ever resolved to an
//! arbitrary server-side routine.

mod codec;
mod frame;
mod types;

pub use codec::{
    decode_request, decode_response, encode_request, encode_response, peek_tag, CodecError,
};
pub use frame::{read_frame, write_frame, FrameError};
pub use types::*;
