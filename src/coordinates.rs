//! Degrees-minutes-seconds ↔ decimal-degree conversion for plot boundaries.
//!
//! Parsing never fails loudly: a malformed coordinate yields `None` and the
//! caller skips that point.

use std::sync::OnceLock;

use regex::Regex;

/// Which axis a decimal degree belongs to (decides the hemisphere letters).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Latitude,
    Longitude,
}

fn dms_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // D°M'S.ss"H; prime and double-prime variants show up in pasted GPS exports.
        Regex::new(r#"^\s*(\d+)\s*°\s*(\d+)\s*['′’]\s*(\d+(?:\.\d+)?)\s*(?:"|″|”|'')\s*([NSEWnsew])\s*$"#)
            .expect("static DMS regex")
    })
}

/// Parse a `D°M'S.ss"H` string into signed decimal degrees.
///
/// South and West are negative. The result is rounded to 8 decimal places.
pub fn dms_to_decimal(dms: &str) -> Option<f64> {
    let caps = dms_regex().captures(dms)?;

    let degrees: f64 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: f64 = caps.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(3)?.as_str().parse().ok()?;
    let hemisphere = caps.get(4)?.as_str().to_ascii_uppercase();

    if minutes >= 60.0 || seconds >= 60.0 {
        return None;
    }

    let magnitude = degrees + minutes / 60.0 + seconds / 3600.0;
    let limit = match hemisphere.as_str() {
        "N" | "S" => 90.0,
        _ => 180.0,
    };
    if magnitude > limit {
        return None;
    }

    let signed = match hemisphere.as_str() {
        "S" | "W" => -magnitude,
        _ => magnitude,
    };

    Some(round_to(signed, 8))
}

impl Axis {
    /// Largest valid magnitude in degrees.
    pub fn limit(self) -> f64 {
        match self {
            Axis::Latitude => 90.0,
            Axis::Longitude => 180.0,
        }
    }

    pub fn contains(self, value: f64) -> bool {
        value.is_finite() && value.abs() <= self.limit()
    }
}

/// Format decimal degrees as `D°M'S.s"H` for the given axis.
///
/// Out-of-range input is clamped to the axis limit; callers validate with
/// [`Axis::contains`] first.
pub fn decimal_to_dms(value: f64, axis: Axis) -> String {
    let hemisphere = match (axis, value < 0.0) {
        (Axis::Latitude, false) => 'N',
        (Axis::Latitude, true) => 'S',
        (Axis::Longitude, false) => 'E',
        (Axis::Longitude, true) => 'W',
    };

    let magnitude = value.abs().min(axis.limit());
    let mut degrees = magnitude.trunc() as u32;
    let minutes_full = (magnitude - degrees as f64) * 60.0;
    let mut minutes = minutes_full.trunc() as u32;
    let mut seconds = round_to((minutes_full - minutes as f64) * 60.0, 1);

    // 59.96" rounds to 60.0" and has to carry.
    if seconds >= 60.0 {
        seconds -= 60.0;
        minutes = minutes.saturating_add(1);
    }
    if minutes >= 60 {
        minutes -= 60;
        degrees = degrees.saturating_add(1);
    }

    format!("{}°{}'{:.1}\"{}", degrees, minutes, seconds, hemisphere)
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
