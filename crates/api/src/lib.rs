//! HTTP API: a thin JSON adapter over the queue's `AppContext`.

pub mod app;

/// Listen address used when `QUEUECTL_ADDR` is unset.
pub const DEFAULT_ADDR: &str = "127.0.0.1:5000";

/// Data directory used when `QUEUECTL_HOME` is unset.
pub const DEFAULT_HOME: &str = ".";
