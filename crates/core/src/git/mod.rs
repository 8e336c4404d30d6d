//! Git operations for wikisync.

pub mod client;
pub mod diff;

pub use client::{GitClient, GitIdentity};
pub use diff::{DiffEntry, DiffStats};
