//! Watch mode: filesystem notifications, per-project debounce, and
//! dispatch of reconciliation cycles onto the blocking pool.

mod debounce;
mod error;
pub mod paths;
mod runtime;

pub use debounce::Debouncer;
pub use error::DaemonError;
pub use paths::WatchFilter;
pub use runtime::{init_tracing, run, start_blocking, watch, watch_message, WatchSettings};
