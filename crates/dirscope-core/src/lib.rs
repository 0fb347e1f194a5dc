//! Core types for dirscope.
//!
//! This crate provides the data structures shared by the scanning engine and
//! its consumers: the concurrently built [`TreeNode`] tree, error and warning
//! types, and scan configuration.

mod config;
mod error;
mod node;

pub use config::{
    DEFAULT_POLL_INTERVAL, DEFAULT_STOP_GRACE_PERIOD, MIN_POOL_SIZE, ScanConfig,
    ScanConfigBuilder,
};
pub use error::{ScanError, ScanWarning, WarningKind};
pub use node::{Descendants, TreeNode};
