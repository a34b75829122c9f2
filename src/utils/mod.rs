//! Ambient helpers: logging setup, dev6 capture, numeric conversions.
pub mod devlog;
pub mod logger;
pub mod num;
