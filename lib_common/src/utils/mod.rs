//! # Utilities Module
//!
//! This module serves as a collection point for general-purpose utility
//! functions and helper modules shared across the `lib_common` crate.
//!
//! ## Contained Modules:
//!
//! - **`misc`**: A submodule for miscellaneous functions, including system
//!   information retrieval (`sys_info`).

#![doc(html_logo_url = "https://example.com/logo.png")] // Placeholder
#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Miscellaneous utility functions, including system information and general helpers.
pub mod misc;