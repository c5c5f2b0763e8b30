//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

#![allow(dead_code)]

/// Success - operation completed without errors, or the picker was cancelled
pub const SUCCESS: i32 = 0;

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Config error - configuration file unreadable or invalid
pub const CONFIG_ERROR: i32 = 2;

/// Selection error - unknown, ambiguous or unusable context
pub const SELECTION_ERROR: i32 = 3;

/// Store error - a kubeconfig store failed to initialize, search or fetch
pub const STORE_ERROR: i32 = 4;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// Usage error - invalid arguments or options (following sysexits.h convention)
pub const USAGE_ERROR: i32 = 64;
