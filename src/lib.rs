//! Fixed-supply Dikasteria (DIKA) token ledger.
//!
//! This crate exposes the two building blocks the `dika` CLI is assembled
//! from:
//!
//! * [`account`] — opaque 20-byte account identities, parsed from hex or
//!   derived from Ed25519 public keys.
//! * [`ledger`] — the balance/allowance state machine: genesis, transfers,
//!   approvals, delegated transfers, the append-only event log, and
//!   snapshot/state-root helpers for persistence.
//!
//! The modules never infer a caller identity themselves; whatever boundary
//! layer drives them (the CLI in `main.rs`, a test, an embedding service)
//! authenticates callers and passes identities in explicitly.

pub mod account;
pub mod ledger;
