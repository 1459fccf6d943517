// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Track references a stream connection holds so teardown releases them.
// Author: Lukas Bower

use std::collections::BTreeMap;

use fd_table::{Handle, HandleTable};
use log::debug;

use crate::dispatch::Effect;

/// References acquired by one connection and not yet closed by it.
#[derive(Debug, Default)]
pub struct ConnectionLedger {
    held: BTreeMap<Handle, u32>,
}

impl ConnectionLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for a dispatched request. Returns `true` for a successful close.
    pub fn record(&mut self, effect: &Effect) -> bool {
        match effect {
            Effect::None => false,
            Effect::Opened(handle) => {
                *self.held.entry(*handle).or_insert(0) += 1;
                false
            }
            Effect::Closed(report) => {
                if let Some(count) = self.held.get_mut(&report.handle) {
                    *count -= 1;
                    if *count == 0 {
                        self.held.remove(&report.handle);
                    }
                }
                true
            }
        }
    }

    /// Total references currently held.
    pub fn held(&self) -> u32 {
        self.held.values().sum()
    }

    /// True when the connection holds nothing.
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Release every reference still held; returns how many were dropped.
    ///
    /// Entries closed by other peers in the meantime are skipped.
    pub fn release_all(&mut self, table: &HandleTable) -> u32 {
        let mut released = 0;
        for (handle, count) in std::mem::take(&mut self.held) {
            for _ in 0..count {
                match table.release(handle) {
                    Ok(_) => released += 1,
                    Err(err) => {
                        debug!("skipping ledger entry fd {}: {err}", handle.fd);
                        break;
                    }
                }
            }
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fd_table::DEFAULT_TYPE_TAG;

    #[test]
    fn releases_only_what_was_left_open() {
        let table = HandleTable::with_defaults();
        let mut ledger = ConnectionLedger::new();
        let a = table.open_handle("a", DEFAULT_TYPE_TAG).unwrap();
        ledger.record(&Effect::Opened(a));
        ledger.record(&Effect::Opened(table.open_handle("a", DEFAULT_TYPE_TAG).unwrap()));
        let b = table.open_handle("b", DEFAULT_TYPE_TAG).unwrap();
        ledger.record(&Effect::Opened(b));
        assert_eq!(ledger.held(), 3);

        let report = table.close(b.fd).unwrap();
        assert!(ledger.record(&Effect::Closed(report)));
        assert_eq!(ledger.held(), 2);

        assert_eq!(ledger.release_all(&table), 2);
        assert!(ledger.is_empty());
        assert!(table.is_empty());
    }

    #[test]
    fn other_peers_keep_their_references() {
        let table = HandleTable::with_defaults();
        let mine = table.open_handle("shared", DEFAULT_TYPE_TAG).unwrap();
        let theirs = table.open_handle("shared", DEFAULT_TYPE_TAG).unwrap();
        assert_eq!(mine, theirs);

        let mut ledger = ConnectionLedger::new();
        ledger.record(&Effect::Opened(mine));
        assert_eq!(ledger.release_all(&table), 1);
        assert_eq!(table.refcount(mine.fd), Some(1));
    }

    #[test]
    fn stale_handles_are_skipped() {
        let table = HandleTable::with_defaults();
        let mut ledger = ConnectionLedger::new();
        let old = table.open_handle("a", DEFAULT_TYPE_TAG).unwrap();
        ledger.record(&Effect::Opened(old));
        table.close(old.fd).unwrap();
        let newer = table.open_handle("b", DEFAULT_TYPE_TAG).unwrap();
        assert_eq!(newer.fd, old.fd);

        assert_eq!(ledger.release_all(&table), 0);
        assert_eq!(table.refcount(newer.fd), Some(1));
    }
}
