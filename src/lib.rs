// ABOUTME: Library root for sshman - exposes public types for testing.
// ABOUTME: The main binary is in main.rs.

pub mod config;
pub mod error;
pub mod output;
pub mod ssh;
