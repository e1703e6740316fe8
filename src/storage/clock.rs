//! Timestamp source for log rows.

use crate::error::ConfigError;
use chrono::{Local, Utc};
use chrono_tz::Tz;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Formats "now" in local time or a fixed IANA timezone.
#[derive(Debug, Clone, Copy)]
pub enum Clock {
    Local,
    Zone(Tz),
}

impl Clock {
    pub fn from_timezone(timezone: Option<&str>) -> Result<Self, ConfigError> {
        match timezone {
            None => Ok(Self::Local),
            Some(name) => name
                .parse::<Tz>()
                .map(Self::Zone)
                .map_err(|e| ConfigError::Invalid(format!("timezone {name:?}: {e}"))),
        }
    }

    pub fn now(&self) -> String {
        match self {
            Self::Local => Local::now().format(TIMESTAMP_FORMAT).to_string(),
            Self::Zone(tz) => Utc::now()
                .with_timezone(tz)
                .format(TIMESTAMP_FORMAT)
                .to_string(),
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::Local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    #[test]
    fn test_formats_parse_back() {
        for clock in [Clock::Local, Clock::from_timezone(Some("Asia/Tokyo")).unwrap()] {
            let ts = clock.now();
            assert!(NaiveDateTime::parse_from_str(&ts, TIMESTAMP_FORMAT).is_ok(), "{ts}");
        }
    }

    #[test]
    fn test_unknown_timezone() {
        assert!(Clock::from_timezone(Some("Nowhere/Land")).is_err());
        assert!(matches!(Clock::from_timezone(None), Ok(Clock::Local)));
    }
}
