//! Integration tests for the directory: notifications, cache-aside reads,
//! compliance commands and degraded mode.

mod support;

mod cache;
mod consumption;
mod degraded;
mod notifications;
mod projection;
