use std::time::Duration as StdDuration;

use humantime::{format_duration, parse_duration};

use crate::error::{Error, Result};

/// Format seconds as `hh:mm:ss`. Hours are not wrapped at 24.
pub fn format_hms(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

/// Human readable duration, e.g. `1h 30m`.
pub fn format_human(seconds: i64) -> String {
    if seconds <= 0 {
        return "0s".to_string();
    }
    format_duration(StdDuration::from_secs(seconds as u64)).to_string()
}

/// Parse `hh:mm:ss` into seconds. Minutes and seconds must be below 60.
pub fn parse_hms(text: &str) -> Result<i64> {
    let invalid = || {
        Error::validation(
            "parse time",
            None,
            format!("'{}' is not in hh:mm:ss format (e.g. 01:30:00)", text.trim()),
        )
    };
    let parts: Vec<&str> = text.trim().split(':').collect();
    if parts.len() != 3 {
        return Err(invalid());
    }
    let mut values = [0i64; 3];
    for (value, part) in values.iter_mut().zip(&parts) {
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        *value = part.parse().map_err(|_| invalid())?;
    }
    let [hours, minutes, seconds] = values;
    if minutes >= 60 || seconds >= 60 {
        return Err(invalid());
    }
    hours
        .checked_mul(3600)
        .and_then(|h| h.checked_add(minutes * 60 + seconds))
        .ok_or_else(invalid)
}

/// Parse time worked: `hh:mm:ss`, or a duration such as `1h 30m`.
pub fn parse_time_spent(text: &str) -> Result<i64> {
    if text.contains(':') {
        return parse_hms(text);
    }
    parse_humantime("parse time", text)
}

/// Parse an estimate given in hours (`1.5`) or as a duration (`90m`).
pub fn parse_estimate(text: &str) -> Result<i64> {
    let text = text.trim();
    if let Ok(hours) = text.parse::<f64>() {
        if !hours.is_finite() || hours < 0.0 {
            return Err(Error::validation(
                "parse estimate",
                None,
                "estimate must be a non-negative number of hours",
            ));
        }
        return Ok((hours * 3600.0).round() as i64);
    }
    parse_humantime("parse estimate", text)
}

fn parse_humantime(op: &'static str, text: &str) -> Result<i64> {
    let duration = parse_duration(text.trim())
        .map_err(|err| Error::validation(op, None, format!("'{}': {}", text.trim(), err)))?;
    i64::try_from(duration.as_secs())
        .map_err(|_| Error::validation(op, None, format!("'{}' is too long", text.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_hms() {
        assert_eq!(format_hms(0), "00:00:00");
        assert_eq!(format_hms(5400), "01:30:00");
        assert_eq!(format_hms(100 * 3600 + 61), "100:01:01");
        assert_eq!(format_hms(-3), "00:00:00");
    }

    #[test]
    fn parses_hms() {
        assert_eq!(parse_hms("01:30:00").unwrap(), 5400);
        assert_eq!(parse_hms(" 0:00:05 ").unwrap(), 5);
        for bad in ["1:30", "aa:00:00", "01:60:00", "01:00:99", "-1:00:00", "::"] {
            assert!(parse_hms(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn parses_time_spent_in_either_form() {
        assert_eq!(parse_time_spent("00:45:00").unwrap(), 2700);
        assert_eq!(parse_time_spent("45m").unwrap(), 2700);
        assert!(parse_time_spent("soon").is_err());
    }

    #[test]
    fn parses_estimates() {
        assert_eq!(parse_estimate("1.5").unwrap(), 5400);
        assert_eq!(parse_estimate("2h 15m").unwrap(), 8100);
        assert_eq!(parse_estimate("0").unwrap(), 0);
        assert!(parse_estimate("-1").is_err());
        assert!(parse_estimate("NaN").is_err());
    }

    #[test]
    fn formats_human() {
        assert_eq!(format_human(5400), "1h 30m");
        assert_eq!(format_human(0), "0s");
    }
}
