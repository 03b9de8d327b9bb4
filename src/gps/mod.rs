// src/gps/mod.rs
//! NMEA decoding and fix accumulation

pub mod data;
pub mod nmea;
pub mod token;

pub use data::{FixFlags, GpsFix, SvInfo, SvStatus};
pub use nmea::NmeaReader;
