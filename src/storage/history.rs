// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Append-only history database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `audit_events`: event_id → serialized AuditEvent (JSON bytes)
//! - `principal_event_index`: composite key
//!   (`principal_hex|!timestamp_be|event_id`) → event type
//!
//! The inverted timestamp in the index key makes a forward range scan
//! return newest events first.

use std::path::Path;

use alloy::primitives::Address;
use redb::{Database, ReadableTable, TableDefinition};

use super::audit::AuditEvent;

/// Primary table: event_id → serialized AuditEvent (JSON bytes).
const AUDIT_EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("audit_events");

/// Index: composite key → event type.
/// Key format: `principal_hex|!timestamp_be|event_id` for newest-first
/// range scans.
const PRINCIPAL_EVENT_INDEX: TableDefinition<&[u8], &str> =
    TableDefinition::new("principal_event_index");

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type HistoryResult<T> = Result<T, HistoryError>;

/// Build a composite key for the principal_event_index table.
///
/// The inverted timestamp ensures newest-first ordering when scanning
/// forward.
fn make_index_key(principal: Address, timestamp_millis: i64, event_id: &str) -> Vec<u8> {
    let hex = format!("{principal:#x}");
    let mut key = Vec::with_capacity(hex.len() + 1 + 8 + 1 + event_id.len());
    key.extend_from_slice(hex.as_bytes());
    key.push(b'|');
    key.extend_from_slice(&(!(timestamp_millis as u64)).to_be_bytes());
    key.push(b'|');
    key.extend_from_slice(event_id.as_bytes());
    key
}

/// Append-only audit history.
pub struct HistoryDb {
    db: Database,
}

impl HistoryDb {
    /// Open (or create) the history database at `path`.
    pub fn open(path: impl AsRef<Path>) -> HistoryResult<Self> {
        let db = Database::create(path)?;
        Ok(Self { db })
    }

    /// Append one committed event.
    pub fn append(&self, event: &AuditEvent) -> HistoryResult<()> {
        let serialized = serde_json::to_vec(event)?;
        let index_key = make_index_key(
            event.principal,
            event.timestamp.timestamp_millis(),
            &event.event_id,
        );

        let txn = self.db.begin_write()?;
        {
            let mut events = txn.open_table(AUDIT_EVENTS)?;
            events.insert(event.event_id.as_str(), serialized.as_slice())?;
            let mut index = txn.open_table(PRINCIPAL_EVENT_INDEX)?;
            index.insert(index_key.as_slice(), event.event_type.as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Up to `limit` events for a principal, newest first.
    pub fn events_for_principal(
        &self,
        principal: Address,
        limit: usize,
    ) -> HistoryResult<Vec<AuditEvent>> {
        let txn = self.db.begin_read()?;
        let index = match txn.open_table(PRINCIPAL_EVENT_INDEX) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let events = txn.open_table(AUDIT_EVENTS)?;

        let mut prefix = format!("{principal:#x}").into_bytes();
        prefix.push(b'|');

        let mut out = Vec::new();
        for entry in index.range(prefix.as_slice()..)? {
            let (key, _) = entry?;
            let key_bytes = key.value();
            if !key_bytes.starts_with(&prefix) || out.len() >= limit {
                break;
            }
            // event_id is everything after the second separator.
            let event_id = &key_bytes[prefix.len() + 8 + 1..];
            let Ok(event_id) = std::str::from_utf8(event_id) else {
                continue;
            };
            if let Some(raw) = events.get(event_id)? {
                out.push(serde_json::from_slice(raw.value())?);
            }
        }
        Ok(out)
    }
}
