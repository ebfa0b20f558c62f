//! NMEA 0183 framing and the RMC (recommended minimum) sentence.
//!
//! ```text
//! $GPRMC,hhmmss.000,A,DDMM.mmm,N,DDDMM.mmm,E,S.SS,C.CC,ddmmyy,,,S*hh<CR><LF>
//! ```
//!
//! Fields: UTC time, status (A = valid), latitude + hemisphere, longitude +
//! hemisphere, speed over ground (knots), track made good (degrees true),
//! date, magnetic variation (empty), and FAA mode (S = simulator).

use crate::position::Position;
use chrono::DateTime;
use tracing::warn;

/// Date field emitted by the simulator. Receivers under test only care
/// about the time of day, so the date is a fixed placeholder.
pub const FIX_DATE: &str = "280511";

/// XOR of every byte of a sentence body (the bytes between `$` and `*`).
pub fn checksum(body: &[u8]) -> u8 {
    body.iter().fold(0, |acc, byte| acc ^ byte)
}

/// Wrap a body as `$<body>*<HH>\r\n`.
pub fn frame(body: &str) -> String {
    format!("${body}*{:02X}\r\n", checksum(body.as_bytes()))
}

/// Check that a framed sentence carries the checksum of its body.
///
/// Returns `false` for anything not shaped like `$...*HH`.
pub fn verify(sentence: &str) -> bool {
    let trimmed = sentence.trim_end_matches(['\r', '\n']);
    let Some(rest) = trimmed.strip_prefix('$') else {
        return false;
    };
    let Some((body, sum)) = rest.rsplit_once('*') else {
        return false;
    };
    u8::from_str_radix(sum, 16).is_ok_and(|sum| checksum(body.as_bytes()) ^ sum == 0)
}

/// Time-of-day field for an epoch timestamp, `HHMMSS.000` in UTC.
///
/// Fractional seconds are truncated. A clock outside the representable
/// range renders as `000000.000` and logs a warning.
pub fn utc_time_field(epoch_seconds: f64) -> String {
    let whole = epoch_seconds.floor() as i64;
    match DateTime::from_timestamp(whole, 0) {
        Some(time) => time.format("%H%M%S.000").to_string(),
        None => {
            warn!(epoch_seconds, "Simulated clock out of range, emitting 000000.000");
            "000000.000".to_string()
        }
    }
}

/// Build a complete RMC sentence.
pub fn rmc(epoch_seconds: f64, position: &Position, speed_knots: f64, course: f64) -> String {
    let body = format!(
        "GPRMC,{},A,{},{:.2},{:.2},{},,,S",
        utc_time_field(epoch_seconds),
        position,
        speed_knots,
        course,
        FIX_DATE
    );
    frame(&body)
}
