// src/gps/data.rs
//! GPS fix, satellite status and date-state records

use chrono::{Datelike, Local, LocalResult, NaiveDate, TimeZone, Utc};
use std::ops::{BitOr, BitOrAssign};

/// Validity flags for the fields of a [`GpsFix`].
///
/// The flag set is the single source of truth for which fields are
/// meaningful; a field may hold a stale value while its flag is clear.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixFlags(u32);

impl FixFlags {
    pub const LAT_LONG: FixFlags = FixFlags(0x01);
    pub const ALTITUDE: FixFlags = FixFlags(0x02);
    pub const SPEED: FixFlags = FixFlags(0x04);
    pub const BEARING: FixFlags = FixFlags(0x08);
    pub const ACCURACY: FixFlags = FixFlags(0x10);

    pub fn empty() -> Self {
        FixFlags(0)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, other: FixFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: FixFlags) {
        self.0 |= other.0;
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

impl BitOr for FixFlags {
    type Output = FixFlags;

    fn bitor(self, rhs: FixFlags) -> FixFlags {
        FixFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for FixFlags {
    fn bitor_assign(&mut self, rhs: FixFlags) {
        self.0 |= rhs.0;
    }
}

/// A single consistent snapshot of position and motion data.
///
/// Cleared flags mean the numeric fields carry stale values from an
/// earlier sentence; consumers must consult [`GpsFix::flags`] first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpsFix {
    pub flags: FixFlags,
    pub latitude: f64,
    pub longitude: f64,
    /// Meters above the geoid.
    pub altitude: f64,
    /// Meters per second.
    pub speed: f64,
    /// Degrees from true north.
    pub bearing: f64,
    /// DOP reported by GSA, reused as accuracy.
    pub accuracy: f64,
    /// Milliseconds since the UNIX epoch, UTC.
    pub timestamp_ms: i64,
}

/// Upper bound on tracked satellites.
pub const MAX_SVS: usize = 32;

/// One visible satellite as reported by a GSV sentence.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SvInfo {
    pub prn: i32,
    pub elevation: f64,
    pub azimuth: f64,
    pub snr: f64,
}

/// Satellite visibility accumulated across a GSV sequence plus the
/// used-in-fix information from GSA/GGA.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SvStatus {
    /// Visible satellites, filled incrementally; bounded by [`MAX_SVS`].
    pub sv_list: Vec<SvInfo>,
    /// Bit `prn - 1` set for each PRN used in the current fix.
    pub used_in_fix_mask: u32,
    /// Used-satellite count from GGA; sentinel -1 when unknown.
    pub num_used_svs: i32,
    /// Set when a GSV sequence completes or a GSA update lands;
    /// cleared when the status is delivered.
    pub changed: bool,
}

impl SvStatus {
    pub fn num_svs(&self) -> usize {
        self.sv_list.len()
    }
}

/// UTC date carried across sentences.
///
/// RMC and ZDA supply a date; GGA/GLL carry only a time-of-day and reuse
/// the last known date. The first bare time field seen with no date yet
/// established defaults to the current UTC date.
#[derive(Debug, Clone)]
pub struct DateState {
    pub year: i32,
    pub month: i32,
    pub day: i32,
    /// UTC-minus-local seconds, computed once at construction and added
    /// to every locally-constructed timestamp.
    utc_offset: i64,
}

impl DateState {
    pub fn new() -> Self {
        let utc_offset = Utc::now()
            .naive_utc()
            .signed_duration_since(Local::now().naive_local())
            .num_seconds();
        Self {
            year: -1,
            month: -1,
            day: -1,
            utc_offset,
        }
    }

    pub fn is_set(&self) -> bool {
        self.year >= 0
    }

    /// Falls back to today's UTC date when no sentence has supplied one.
    pub fn default_if_unset(&mut self) {
        if !self.is_set() {
            let today = Utc::now().date_naive();
            self.year = today.year();
            self.month = today.month() as i32;
            self.day = today.day() as i32;
        }
    }

    /// Millisecond epoch timestamp for the carried date at the given
    /// time of day, or `None` when the fields do not form a valid date.
    pub fn timestamp_ms(&self, hour: i32, minute: i32, seconds: f64) -> Option<i64> {
        if hour < 0 || minute < 0 || seconds < 0.0 {
            return None;
        }
        let date = NaiveDate::from_ymd_opt(self.year, self.month as u32, self.day as u32)?;
        let dt = date.and_hms_opt(hour as u32, minute as u32, seconds as u32)?;
        let epoch = match Local.from_local_datetime(&dt) {
            LocalResult::Single(t) => t.timestamp(),
            LocalResult::Ambiguous(t, _) => t.timestamp(),
            LocalResult::None => dt.and_utc().timestamp(),
        };
        Some((epoch + self.utc_offset) * 1000)
    }
}

impl Default for DateState {
    fn default() -> Self {
        Self::new()
    }
}
