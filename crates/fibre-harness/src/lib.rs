#![forbid(unsafe_code)]

//! Deterministic testing for the fibre reconciler.
//!
//! - **[`MemoryHost`]**: an in-memory host tree with an operation log,
//!   markup serialization and failure injection.
//! - **[`TestRoot`]**: one root over a `MemoryHost` and a manual clock,
//!   pumped explicitly (`flush_all`, `flush_units`, `advance_time`).
//!
//! # Quick Start
//!
//! ```
//! use fibre_harness::{HostOp, TestRoot};
//! use fibre_reconciler::host;
//!
//! let mut t = TestRoot::new();
//! t.render(host("ul").child(host("li").child("one"))).unwrap();
//! t.flush_all().unwrap();
//! assert_eq!(t.serialize(), "<ul><li>one</li></ul>");
//! assert!(t.take_mutations().iter().any(|op| matches!(op, HostOp::Append { .. })));
//! ```

pub mod memory_host;
pub mod test_root;

pub use memory_host::{AttrDiff, HostOp, MemoryHost, NodeId, TEXT_ATTR};
pub use test_root::{MAX_FLUSH_SLICES, TestRoot};

// Re-export the clock so tests need only this crate and the reconciler.
pub use fibre_scheduler::ManualClock;
