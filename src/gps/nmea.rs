// src/gps/nmea.rs
//! NMEA sentence reassembly and parsing
//!
//! [`NmeaReader`] owns the current fix and satellite-status state and is
//! the single accumulator shared between the ingestion and delivery
//! paths. Bytes go in one at a time; completed sentences mutate the
//! accumulated state according to fixed per-sentence field offsets.

use super::data::{DateState, FixFlags, GpsFix, SvInfo, SvStatus, MAX_SVS};
use super::token::{degrees_minutes, parse_float, parse_int, Token, Tokenizer};
use log::debug;

/// Maximum NMEA sentence length, excluding the terminator.
pub const NMEA_MAX_SIZE: usize = 83;

/// Sentences shorter than this are discarded unparsed.
const MIN_SENTENCE_LEN: usize = 9;

/// Knots to meters per second.
const KNOTS_TO_MPS: f64 = 0.514444;

/// GSA reports this DOP value when it has no accuracy data.
const NO_ACCURACY: f64 = 99.99;

/// Streaming NMEA reader: line assembler plus fix accumulator.
pub struct NmeaReader {
    line: [u8; NMEA_MAX_SIZE + 1],
    pos: usize,
    overflow: bool,
    pub fix: GpsFix,
    pub sv_status: SvStatus,
    date: DateState,
}

impl NmeaReader {
    pub fn new() -> Self {
        Self {
            line: [0; NMEA_MAX_SIZE + 1],
            pos: 0,
            overflow: false,
            fix: GpsFix::default(),
            sv_status: SvStatus::default(),
            date: DateState::new(),
        }
    }

    /// Feeds one raw byte to the line assembler.
    ///
    /// Returns `true` when the byte completed a sentence and a parse was
    /// attempted. On buffer overflow the assembler discards input until
    /// the next newline; overflowed partial data is never parsed.
    pub fn put_byte(&mut self, c: u8) -> bool {
        if self.overflow {
            self.overflow = c != b'\n';
            return false;
        }
        if self.pos >= self.line.len() - 1 {
            self.overflow = true;
            self.pos = 0;
            return false;
        }
        self.line[self.pos] = c;
        self.pos += 1;
        if c == b'\n' {
            let line = self.line;
            let len = self.pos;
            self.parse_sentence(&line[..len]);
            self.pos = 0;
            return true;
        }
        false
    }

    /// Parses one complete sentence and folds it into the accumulator.
    pub fn parse_sentence(&mut self, line: &[u8]) {
        if line.len() < MIN_SENTENCE_LEN {
            debug!("sentence too short, discarded");
            return;
        }
        let tzer = Tokenizer::new(line);
        let tok = tzer.get(0);
        if tok.len() < 5 {
            debug!("sentence id too short, ignored");
            return;
        }
        // skip the two-character talker prefix
        match &tok.bytes()[2..5] {
            b"GGA" => self.parse_gga(&tzer),
            b"GLL" => self.parse_gll(&tzer),
            b"GSA" => self.parse_gsa(&tzer),
            b"GSV" => self.parse_gsv(&tzer),
            b"RMC" => self.parse_rmc(&tzer),
            b"VTG" => self.parse_vtg(&tzer),
            b"ZDA" => self.parse_zda(&tzer),
            other => debug!(
                "unknown sentence type {}, ignored",
                String::from_utf8_lossy(other)
            ),
        }
    }

    /// GGA: fix data. The fix-quality field gates the whole sentence.
    fn parse_gga(&mut self, tzer: &Tokenizer) {
        let quality = tzer.get(6);
        if !quality.first().is_some_and(|c| c > b'0') {
            return;
        }
        self.update_time(tzer.get(1));
        self.update_latlong(
            tzer.get(2),
            tzer.get(3).first().unwrap_or(0),
            tzer.get(4),
            tzer.get(5).first().unwrap_or(0),
        );
        self.update_altitude(tzer.get(9));
        self.sv_status.num_used_svs = parse_int(tzer.get(7));
    }

    /// GLL: position only, gated on status 'A'.
    fn parse_gll(&mut self, tzer: &Tokenizer) {
        if tzer.get(6).first() != Some(b'A') {
            return;
        }
        self.update_time(tzer.get(5));
        self.update_latlong(
            tzer.get(1),
            tzer.get(2).first().unwrap_or(0),
            tzer.get(3),
            tzer.get(4).first().unwrap_or(0),
        );
    }

    /// GSA: DOP and PRNs used in the fix. Mode '1' means no fix.
    fn parse_gsa(&mut self, tzer: &Tokenizer) {
        match tzer.get(2).first() {
            None | Some(b'1') => return,
            _ => {}
        }
        self.update_accuracy(tzer.get(15));
        self.sv_status.used_in_fix_mask = 0;
        for i in 3..=14 {
            let prn = parse_int(tzer.get(i));
            if prn > 0 && prn < 32 {
                self.sv_status.used_in_fix_mask |= 1 << (prn - 1);
                self.sv_status.changed = true;
            }
        }
    }

    /// GSV: satellites in view, assembled across a numbered sequence.
    fn parse_gsv(&mut self, tzer: &Tokenizer) {
        let total_svs = parse_int(tzer.get(3));
        if total_svs <= 0 {
            return;
        }
        let total_sentences = parse_int(tzer.get(1));
        let sentence = parse_int(tzer.get(2));
        if sentence == 1 {
            self.sv_status.changed = false;
            self.sv_status.sv_list.clear();
        }
        for i in 0..4 {
            if self.sv_status.num_svs() >= total_svs as usize
                || self.sv_status.num_svs() >= MAX_SVS
            {
                break;
            }
            self.sv_status.sv_list.push(SvInfo {
                prn: parse_int(tzer.get(i * 4 + 4)),
                elevation: parse_float(tzer.get(i * 4 + 5)),
                azimuth: parse_float(tzer.get(i * 4 + 6)),
                snr: parse_float(tzer.get(i * 4 + 7)),
            });
        }
        // the sequence is complete only on its last sentence
        if sentence == total_sentences {
            self.sv_status.changed = true;
        }
    }

    /// RMC: recommended minimum, gated on status 'A'. Carries the date.
    fn parse_rmc(&mut self, tzer: &Tokenizer) {
        if tzer.get(2).first() != Some(b'A') {
            return;
        }
        self.update_date(tzer.get(9), tzer.get(1));
        self.update_latlong(
            tzer.get(3),
            tzer.get(4).first().unwrap_or(0),
            tzer.get(5),
            tzer.get(6).first().unwrap_or(0),
        );
        self.update_bearing(tzer.get(8));
        self.update_speed(tzer.get(7));
    }

    /// VTG: track and ground speed, gated on a usable mode indicator.
    fn parse_vtg(&mut self, tzer: &Tokenizer) {
        match tzer.get(9).first() {
            None | Some(b'N') => return,
            _ => {}
        }
        self.update_bearing(tzer.get(1));
        self.update_speed(tzer.get(5));
    }

    /// ZDA: explicit date and time of day.
    fn parse_zda(&mut self, tzer: &Tokenizer) {
        if !tzer.get(4).is_empty() {
            self.update_cdate(tzer.get(2), tzer.get(3), tzer.get(4));
        }
        if !tzer.get(1).is_empty() {
            self.update_time(tzer.get(1));
        }
    }

    /// Updates the fix timestamp from an `hhmmss.sss` field, reusing the
    /// carried date (or today's, the first time no date is known).
    fn update_time(&mut self, tok: Token) {
        if tok.len() < 6 {
            return;
        }
        self.date.default_if_unset();
        let hour = parse_int(tok.slice(0, 2));
        let minute = parse_int(tok.slice(2, 4));
        let seconds = parse_float(tok.slice(4, tok.len()));
        if let Some(ts) = self.date.timestamp_ms(hour, minute, seconds) {
            self.fix.timestamp_ms = ts;
        }
    }

    /// Updates the carried date from an RMC `ddmmyy` field, then the time.
    fn update_date(&mut self, date: Token, time: Token) {
        if date.len() != 6 {
            debug!("date field not properly formatted");
            return;
        }
        let day = parse_int(date.slice(0, 2));
        let month = parse_int(date.slice(2, 4));
        let year = parse_int(date.slice(4, 6));
        if day < 0 || month < 0 || year < 0 {
            debug!("date field not properly formatted");
            return;
        }
        self.date.year = year + 2000;
        self.date.month = month;
        self.date.day = day;
        self.update_time(time);
    }

    /// Updates the carried date from ZDA's separate day/month/year fields.
    fn update_cdate(&mut self, day: Token, month: Token, year: Token) {
        if day.len() < 2 || month.len() < 2 || year.len() < 4 {
            return;
        }
        self.date.day = parse_int(day.slice(0, 2));
        self.date.month = parse_int(month.slice(0, 2));
        self.date.year = parse_int(year);
    }

    /// Updates position from a lat/lon token pair plus hemisphere bytes.
    ///
    /// Tokens shorter than 6 bytes reject the position update only;
    /// other fields of the same sentence still apply.
    fn update_latlong(&mut self, lat: Token, lat_hemi: u8, lon: Token, lon_hemi: u8) {
        if lat.len() < 6 {
            debug!("latitude field too short, position ignored");
            return;
        }
        if lon.len() < 6 {
            debug!("longitude field too short, position ignored");
            return;
        }
        let mut latitude = degrees_minutes(lat);
        if lat_hemi == b'S' {
            latitude = -latitude;
        }
        let mut longitude = degrees_minutes(lon);
        if lon_hemi == b'W' {
            longitude = -longitude;
        }
        self.fix.flags.insert(FixFlags::LAT_LONG);
        self.fix.latitude = latitude;
        self.fix.longitude = longitude;
    }

    fn update_altitude(&mut self, tok: Token) {
        if tok.is_empty() {
            return;
        }
        self.fix.flags.insert(FixFlags::ALTITUDE);
        self.fix.altitude = parse_float(tok);
    }

    /// Accuracy reuses GSA's DOP field; 99.99 is its "no data" sentinel.
    fn update_accuracy(&mut self, tok: Token) {
        if tok.is_empty() {
            return;
        }
        self.fix.accuracy = parse_float(tok);
        if self.fix.accuracy == NO_ACCURACY {
            return;
        }
        self.fix.flags.insert(FixFlags::ACCURACY);
    }

    fn update_bearing(&mut self, tok: Token) {
        if tok.is_empty() {
            return;
        }
        self.fix.flags.insert(FixFlags::BEARING);
        self.fix.bearing = parse_float(tok);
    }

    fn update_speed(&mut self, tok: Token) {
        if tok.is_empty() {
            return;
        }
        self.fix.flags.insert(FixFlags::SPEED);
        self.fix.speed = parse_float(tok) * KNOTS_TO_MPS;
    }
}

impl Default for NmeaReader {
    fn default() -> Self {
        Self::new()
    }
}
