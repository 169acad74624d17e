#![warn(missing_docs)]
//! jobpool Ordering Primitives
//!
//! Reassembles out-of-order job completions into submission order:
//! - [`MinHeap`]: binary min-heap keyed by submission index
//! - [`OrderedDispatcher`]: lock-protected reorder buffer that releases the
//!   contiguous prefix of completed indices to user callbacks
//!
//! Neither type knows about processes or IPC; the pool orchestrator feeds the
//! dispatcher from its worker lanes.

mod dispatcher;
mod heap;

pub use dispatcher::{ErrorCallback, OrderedDispatcher, SuccessCallback};
pub use heap::{HeapEntry, HeapError, MinHeap};

/// Alias documenting what the dispatcher orders by
pub type SubmissionIndex = usize;
