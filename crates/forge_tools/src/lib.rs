//! # Forge Development Tools
//!
//! Command-line tools for development:
//! - Content catalog validation
//! - Snapshot and module chunk inspection

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod decode;
pub mod validate;
