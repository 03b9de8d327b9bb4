// src/lib.rs
//! GPS Provider Library
//!
//! A streaming NMEA-0183 decoder and GPS fix-state coordinator: bytes
//! from a positioning device go in, periodic location and satellite
//! status callbacks come out.

pub mod config;
pub mod error;
pub mod gps;
pub mod session;

// Re-export main types for convenience
pub use error::{GpsError, Result};
pub use gps::data::{FixFlags, GpsFix, SvInfo, SvStatus};
pub use session::{GpsCallbacks, GpsSession, PositionMode, SessionState};
