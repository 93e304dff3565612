//! Adapters between the engine and the outside world: CSV files in and out,
//! and JSON-lines command replay.

pub mod csv;
pub mod jsonl;
