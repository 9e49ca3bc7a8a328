//! Lock-free per-task counters.

mod atomic;

pub use atomic::{TaskCounters, TaskCountersSnapshot};
