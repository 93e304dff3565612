//! Ledger entities, their state machines and the ports the application layer
//! depends on. Nothing in here performs I/O.

pub mod analytics;
pub mod checkout;
pub mod escrow;
pub mod events;
pub mod money;
pub mod payment_method;
pub mod ports;
pub mod promo;
pub mod subscription;
pub mod transaction;

/// Opaque identifier of a platform user (client, freelancer, or the platform).
pub type UserId = String;
