// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Host-supplied primitives.
//!
//! The kernel runs inside a confidential host that provides entropy,
//! cryptography, a monotone block environment, and the caller principal of
//! each dispatched operation. This module realizes the cryptographic
//! primitives in software (the enclave's CPU is the trust boundary; there
//! is no external HSM) and models the block environment the host advances
//! between dispatches.
//!
//! Caller principals are threaded through every kernel operation as an
//! explicit `Address` parameter; the kernel exposes no way to forge them.

pub mod crypto;
pub mod env;

pub use crypto::SecpKeypair;
pub use env::BlockEnv;
