//! Utility Module
//!
//! - [`io`]: little-endian byte helpers for the key codec and catalogue
//! - [`time`]: wall-clock conversions and a small stopwatch

pub mod io;
pub mod time;

pub use time::Stopwatch;
