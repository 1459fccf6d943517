// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Route decoded requests onto the shared handle table.
// Author: Lukas Bower

//! Single point where a validated [`Request`] meets the [`HandleTable`].

use fd_table::{CloseReport, Handle, HandleTable, TableError};
use fd_wire::{ErrorKind, Request, RequestBody, Response, ResponseBody};
use log::{debug, warn};

/// Table-side consequence of a request, consumed by connection ledgers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// The request did not change reference counts.
    None,
    /// One reference was acquired.
    Opened(Handle),
    /// One reference was dropped.
    Closed(CloseReport),
}

/// Response plus the effect it had on the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    /// Response to send back to the caller.
    pub response: Response,
    /// Reference-count effect of the request.
    pub effect: Effect,
}

/// Execute `request` against `table`.
///
/// Every failure, exhaustion included, is turned into an error response for
/// the calling peer; nothing here terminates the server.
pub fn dispatch(table: &HandleTable, request: &Request) -> Dispatched {
    let outcome = match &request.body {
        RequestBody::Open {
            name,
            type_tag,
            hint,
        } => {
            if let Some(hint) = hint {
                debug!("ignoring open hint {hint:?} for {name}");
            }
            table
                .open_handle(name, type_tag)
                .map(|handle| (ResponseBody::Opened { fd: handle.fd }, Effect::Opened(handle)))
        }
        RequestBody::Close { fd } => table.close(*fd).map(|report| {
            (
                ResponseBody::Closed {
                    remaining: report.remaining,
                },
                Effect::Closed(report),
            )
        }),
        RequestBody::Read { fd } => table
            .read(*fd)
            .map(|value| (ResponseBody::Read { value }, Effect::None)),
        RequestBody::Write { fd, value } => table
            .write(*fd, value)
            .map(|()| (ResponseBody::Written, Effect::None)),
    };

    match outcome {
        Ok((body, effect)) => Dispatched {
            response: Response::new(request.tag, body),
            effect,
        },
        Err(err) => Dispatched {
            response: error_response(request, &err),
            effect: Effect::None,
        },
    }
}

fn error_response(request: &Request, err: &TableError) -> Response {
    let kind = err.kind();
    if matches!(kind, ErrorKind::ResourceExhausted | ErrorKind::ResourceFailure) {
        warn!("{} failed: {err}", request.body.operation());
    } else {
        debug!("{} failed: {err}", request.body.operation());
    }
    Response::error(request.tag, kind, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fd_table::{ResourceRegistry, DEFAULT_TYPE_TAG};

    fn open(name: &str) -> Request {
        Request::new(RequestBody::Open {
            name: name.into(),
            type_tag: DEFAULT_TYPE_TAG.into(),
            hint: None,
        })
    }

    #[test]
    fn open_write_read_close() {
        let table = HandleTable::with_defaults();
        let opened = dispatch(&table, &open("a"));
        let Effect::Opened(handle) = opened.effect else {
            panic!("expected open effect, got {:?}", opened.effect);
        };
        assert_eq!(opened.response.body, ResponseBody::Opened { fd: handle.fd });

        let fd = handle.fd;
        let written = dispatch(
            &table,
            &Request::new(RequestBody::Write {
                fd,
                value: "hello".into(),
            }),
        );
        assert_eq!(written.response.body, ResponseBody::Written);

        let read = dispatch(&table, &Request::tagged(5, RequestBody::Read { fd }));
        assert_eq!(read.response.tag, Some(5));
        assert_eq!(
            read.response.body,
            ResponseBody::Read {
                value: "hello".into()
            }
        );

        let closed = dispatch(&table, &Request::new(RequestBody::Close { fd }));
        assert_eq!(closed.response.body, ResponseBody::Closed { remaining: 0 });
        assert!(matches!(closed.effect, Effect::Closed(report) if report.handle == handle));
    }

    #[test]
    fn failures_become_error_responses() {
        let table = HandleTable::new(ResourceRegistry::in_memory(), 1);
        let unknown = dispatch(&table, &Request::tagged(1, RequestBody::Close { fd: 9 }));
        assert_eq!(unknown.response.error_kind(), Some(ErrorKind::NotFound));
        assert_eq!(unknown.response.tag, Some(1));
        assert_eq!(unknown.effect, Effect::None);

        let bad_type = dispatch(
            &table,
            &Request::new(RequestBody::Open {
                name: "a".into(),
                type_tag: "filetypes".into(),
                hint: None,
            }),
        );
        assert_eq!(bad_type.response.error_kind(), Some(ErrorKind::UnknownType));

        dispatch(&table, &open("first"));
        let exhausted = dispatch(&table, &open("second"));
        assert_eq!(
            exhausted.response.error_kind(),
            Some(ErrorKind::ResourceExhausted)
        );
        assert_eq!(exhausted.effect, Effect::None);
    }
}
