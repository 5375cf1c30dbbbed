//! Staff alert dispatch for the temple command center: automated delivery through a
//! messaging gateway, degrading to a pre-filled manual link when automation fails.

pub mod config;
pub mod dispatch;
pub mod gateway;
pub mod store;
pub mod sync;
pub mod transport;
