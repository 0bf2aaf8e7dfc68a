// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit events for security-sensitive operations.
//!
//! Every committed mutating dispatch appends one event to the history
//! database. The event model is deliberately flat: a type, the caller
//! principal, an optional affected resource, and free-form JSON details.

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Types of auditable events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Wallet lifecycle
    WalletCreated,
    OwnershipTransferred,

    // Encumbrance
    EncumbranceEntered,
    MessageSigned,
    TypedDataSigned,

    // Key export
    KeyExportRequested,
    KeyExported,
    KeyDestroyed,

    // Ethereum-transaction policy
    SubLeaseEntered,
    DepositCommitted,
    DepositProved,
    LocalFundsDeposited,
    LocalFundsFinalized,
    TransactionCommitted,
    TransactionSigned,
    InclusionProved,
    CommitmentRequirementReleased,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::WalletCreated => "wallet_created",
            AuditEventType::OwnershipTransferred => "ownership_transferred",
            AuditEventType::EncumbranceEntered => "encumbrance_entered",
            AuditEventType::MessageSigned => "message_signed",
            AuditEventType::TypedDataSigned => "typed_data_signed",
            AuditEventType::KeyExportRequested => "key_export_requested",
            AuditEventType::KeyExported => "key_exported",
            AuditEventType::KeyDestroyed => "key_destroyed",
            AuditEventType::SubLeaseEntered => "sub_lease_entered",
            AuditEventType::DepositCommitted => "deposit_committed",
            AuditEventType::DepositProved => "deposit_proved",
            AuditEventType::LocalFundsDeposited => "local_funds_deposited",
            AuditEventType::LocalFundsFinalized => "local_funds_finalized",
            AuditEventType::TransactionCommitted => "transaction_committed",
            AuditEventType::TransactionSigned => "transaction_signed",
            AuditEventType::InclusionProved => "inclusion_proved",
            AuditEventType::CommitmentRequirementReleased => "commitment_requirement_released",
        }
    }
}

/// One audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID.
    pub event_id: String,
    /// When the event committed (host dispatch timestamp).
    pub timestamp: DateTime<Utc>,
    /// Block in which the event committed.
    pub block: u64,
    /// Type of event.
    pub event_type: AuditEventType,
    /// Caller principal of the dispatch.
    pub principal: Address,
    /// Affected resource (wallet address, deposit hash, …), if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Additional details as JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AuditEvent {
    pub fn new(
        event_type: AuditEventType,
        principal: Address,
        timestamp: DateTime<Utc>,
        block: u64,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            block,
            event_type,
            principal,
            resource: None,
            details: None,
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_without_empty_fields() {
        let event = AuditEvent::new(
            AuditEventType::WalletCreated,
            Address::repeat_byte(1),
            Utc::now(),
            7,
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "wallet_created");
        assert!(json.get("resource").is_none());
        assert!(json.get("details").is_none());
    }
}
