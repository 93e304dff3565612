//! Batch replay of JSON-lines command files.

pub mod command;
pub mod runner;
