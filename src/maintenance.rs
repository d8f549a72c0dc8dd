//! Maintenance window evaluation
//!
//! Clusters may restrict disruptive operations (CA renewal, certificate
//! rotation) to a set of maintenance windows, expressed as cron schedules.
//! No configured windows means maintenance is always permitted.

use crate::error::{OperatorError, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

/// Check whether `now` falls inside at least one of the configured windows.
///
/// `None` or an empty list means no restriction, so the answer is always
/// `true`. An expression that fails to parse is a configuration error and is
/// never silently treated as "always open".
pub fn is_maintenance_window_satisfied(
    windows: Option<&Vec<String>>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let windows = match windows {
        Some(w) if !w.is_empty() => w,
        _ => return Ok(true),
    };

    for expr in windows {
        let schedule = Schedule::from_str(expr).map_err(|e| {
            OperatorError::InvalidConfig(format!(
                "invalid maintenance window '{}': {}",
                expr, e
            ))
        })?;
        if schedule.includes(now) {
            return Ok(true);
        }
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_no_windows_always_satisfied() {
        let now = Utc::now();
        assert!(is_maintenance_window_satisfied(None, now).unwrap());
        assert!(is_maintenance_window_satisfied(Some(&vec![]), now).unwrap());
    }

    #[test]
    fn test_window_match() {
        // Sunday 2026-01-04 02:30:00 UTC
        let now = Utc.with_ymd_and_hms(2026, 1, 4, 2, 30, 0).unwrap();

        // Every second of 00:00-04:59 on Sundays
        let windows = vec!["* * 0-4 ? * SUN".to_string()];
        assert!(is_maintenance_window_satisfied(Some(&windows), now).unwrap());
    }

    #[test]
    fn test_window_miss() {
        // Wednesday 2026-01-07 12:00:00 UTC
        let now = Utc.with_ymd_and_hms(2026, 1, 7, 12, 0, 0).unwrap();

        let windows = vec!["* * 0-4 ? * SUN".to_string()];
        assert!(!is_maintenance_window_satisfied(Some(&windows), now).unwrap());
    }

    #[test]
    fn test_any_window_suffices() {
        let now = Utc.with_ymd_and_hms(2026, 1, 7, 12, 0, 0).unwrap();

        let windows = vec![
            "* * 0-4 ? * SUN".to_string(),
            "* * * ? * WED".to_string(),
        ];
        assert!(is_maintenance_window_satisfied(Some(&windows), now).unwrap());
    }

    #[test]
    fn test_invalid_expression_is_config_error() {
        let now = Utc::now();
        let windows = vec!["not a cron expression".to_string()];
        let err = is_maintenance_window_satisfied(Some(&windows), now).unwrap_err();
        assert!(matches!(err, OperatorError::InvalidConfig(_)));
        assert!(!err.is_retryable());
    }
}
