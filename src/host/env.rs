// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Block environment supplied by the confidential host.
//!
//! The only time observable to the kernel is the host's block number
//! (monotone, advances between dispatches) and a wall-clock timestamp used
//! solely for lease-expiry comparisons. Finalization logic reasons in
//! strict block-number inequalities; it never reads the wall clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};

/// The host's view of time for the current dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEnv {
    /// Current block height. Multiple dispatches may share a block.
    pub number: u64,
    /// Wall-clock timestamp of the current dispatch.
    pub timestamp: DateTime<Utc>,
}

impl BlockEnv {
    /// Environment at genesis, before the host's first advance.
    pub fn genesis(timestamp: DateTime<Utc>) -> Self {
        Self {
            number: 0,
            timestamp,
        }
    }

    /// Move to a new block height and dispatch timestamp.
    ///
    /// The block number may repeat (several operations in one block) but
    /// must never decrease.
    pub fn advance(&mut self, number: u64, timestamp: DateTime<Utc>) -> KernelResult<()> {
        if number < self.number {
            return Err(KernelError::NonMonotonicBlock);
        }
        self.number = number;
        self.timestamp = timestamp;
        Ok(())
    }
}
