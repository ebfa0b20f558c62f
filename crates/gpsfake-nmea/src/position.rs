//! Geographic position with NMEA degrees-and-minutes rendering.

use std::fmt;

/// Signed latitude/longitude in degrees.
///
/// Values are not range-checked; out-of-range coordinates render as-is.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    latitude: f64,
    longitude: f64,
}

impl Position {
    /// Create a position from signed degrees.
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Latitude in signed degrees (north positive).
    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    /// Longitude in signed degrees (east positive).
    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Latitude as `DDMM.mmm`.
    pub fn latitude_text(&self) -> String {
        degrees_minutes(self.latitude)
    }

    /// Longitude as `DDMM.mmm` (degrees are padded to two digits, not three).
    pub fn longitude_text(&self) -> String {
        degrees_minutes(self.longitude)
    }

    /// `'N'` or `'S'`.
    pub fn latitude_hemisphere(&self) -> char {
        if self.latitude < 0.0 {
            'S'
        } else {
            'N'
        }
    }

    /// `'E'` or `'W'`.
    pub fn longitude_hemisphere(&self) -> char {
        if self.longitude < 0.0 {
            'W'
        } else {
            'E'
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.latitude_text(),
            self.latitude_hemisphere(),
            self.longitude_text(),
            self.longitude_hemisphere()
        )
    }
}

fn degrees_minutes(value: f64) -> String {
    let magnitude = value.abs();
    let degrees = magnitude.floor();
    format!("{:02}{:06.3}", degrees as u64, (magnitude - degrees) * 60.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_northern_eastern_text() {
        let pos = Position::new(57.70723, 11.695213333333333);
        assert_eq!(pos.latitude_text(), "5742.434");
        assert_eq!(pos.longitude_text(), "1141.713");
        assert_eq!(pos.to_string(), "5742.434,N,1141.713,E");
    }

    #[test]
    fn test_southern_western_text() {
        let pos = Position::new(-33.5, -70.25);
        assert_eq!(pos.latitude_hemisphere(), 'S');
        assert_eq!(pos.longitude_hemisphere(), 'W');
        assert_eq!(pos.to_string(), "3330.000,S,7015.000,W");
    }

    #[test]
    fn test_small_values_are_zero_padded() {
        let pos = Position::new(0.05, 0.0);
        assert_eq!(pos.latitude_text(), "0003.000");
        assert_eq!(pos.longitude_text(), "0000.000");
        assert_eq!(pos.latitude_hemisphere(), 'N');
        assert_eq!(pos.longitude_hemisphere(), 'E');
    }

    #[test]
    fn test_out_of_range_passes_through() {
        let pos = Position::new(123.5, 200.25);
        assert_eq!(pos.latitude_text(), "12330.000");
        assert_eq!(pos.longitude_text(), "20015.000");
    }
}
