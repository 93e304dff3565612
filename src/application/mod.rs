//! Application layer: orchestrates the domain types over the storage,
//! gateway and clock ports.
//!
//! [`engine::LedgerEngine`] is the entry point. Each component guards its own
//! check-then-write sequences with per-entity async locks and commits
//! cross-entity changes as one `WriteSet`.

pub mod analytics;
pub mod checkout;
pub mod engine;
pub mod escrow;
pub mod events;
pub mod ledger;
pub mod locks;
pub mod payment_methods;
pub mod promo;
pub mod subscription;
