//! aerolog - the durability core of a distributed log-storage node
//!
//! Every entry appended to any ledger on this node is first recorded in the
//! write-ahead journal, forced to stable storage, and only then acknowledged.
//!
//! # Design Principles
//!
//! - Durability over throughput
//! - Determinism over optimization
//! - Simplicity over cleverness
//! - Explicit failure over silent recovery
//!
//! # Invariants Enforced
//!
//! - DUR-1: fsync before acknowledgment
//! - ORD-1: per-ledger acknowledgment order equals append order
//! - MARK-1: the last log mark advances monotonically
//! - REC-1: torn tails replay cleanly
//! - REC-2: halt on corrupt records and missing recovery logs
//! - GC-1: compaction keeps the retention window below the marked journal

pub mod config;
pub mod journal;
pub mod observability;
