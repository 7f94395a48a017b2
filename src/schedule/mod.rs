//! Charge time calculation.
//!
//! Pure time-window arithmetic: given the mode, the configured window and
//! the current time, produce the absolute `(start, target)` pair the
//! provider should converge toward. No caching, no side effects.

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, NaiveTime, TimeZone};

use crate::config::{ChargingConfig, ChargingMode, SECONDS_PER_DAY};

/// One day in epoch milliseconds
pub const DAY_IN_MS: i64 = 86_400_000;

/// Supplies the next scheduled wake alarm, used only in auto mode
pub trait AlarmSource: Send + Sync {
    /// Epoch milliseconds of the next scheduled wake alarm, if any
    fn next_alarm(&self) -> Option<i64>;
}

/// Transient start/target pair, produced fresh on every evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargeTime {
    /// Epoch ms at which charging control should begin pacing
    pub start_time: i64,
    /// Epoch ms by which the battery should be full
    pub target_time: i64,
}

/// Compute the charge window for a time-based mode.
///
/// Returns `None` in auto mode when no alarm is scheduled; the caller must
/// cancel any pending notification because there is nothing to target.
/// Limit and none modes never reach this calculator.
pub fn compute_charge_time<Tz: TimeZone>(
    mode: ChargingMode,
    config: &ChargingConfig,
    now: DateTime<Tz>,
    alarms: &dyn AlarmSource,
) -> Option<ChargeTime> {
    let current_time = now.timestamp_millis();

    match mode {
        ChargingMode::Auto => {
            // Use the next alarm as the target time
            let target_time = alarms.next_alarm()?;
            Some(ChargeTime {
                start_time: current_time,
                target_time,
            })
        }
        ChargingMode::Manual => {
            let mut start_time = time_of_day_to_epoch_ms(config.start_time, &now);
            let mut target_time = time_of_day_to_epoch_ms(config.target_time, &now);

            // A window whose start is numerically after its target crosses
            // midnight; pick the day shift from where "now" sits.
            if start_time > target_time {
                if current_time > target_time {
                    target_time += DAY_IN_MS;
                } else {
                    start_time -= DAY_IN_MS;
                }
            }

            Some(ChargeTime {
                start_time,
                target_time,
            })
        }
        ChargingMode::None | ChargingMode::Limit => {
            log::error!("Charge time requested for non time-based mode {:?}", mode);
            None
        }
    }
}

/// Convert seconds-of-day on today's calendar date (in `now`'s zone) to
/// UTC epoch milliseconds.
fn time_of_day_to_epoch_ms<Tz: TimeZone>(seconds: u32, now: &DateTime<Tz>) -> i64 {
    let mut date = now.date_naive();
    let mut seconds = seconds;

    // 86400 is a valid setting meaning next midnight
    if seconds >= SECONDS_PER_DAY {
        date += Duration::days(1);
        seconds = 0;
    }

    let time = NaiveTime::from_num_seconds_from_midnight_opt(seconds, 0).unwrap_or(NaiveTime::MIN);
    resolve_local(&now.timezone(), date.and_time(time)).timestamp_millis()
}

fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earlier, _) => earlier,
        // Spring-forward gap: the wall time does not exist on this day
        LocalResult::None => match tz.from_local_datetime(&(naive + Duration::hours(1))) {
            LocalResult::Single(dt) => dt,
            LocalResult::Ambiguous(earlier, _) => earlier,
            LocalResult::None => tz.from_utc_datetime(&naive),
        },
    }
}

/// Format epoch milliseconds as a UTC wall-clock string for logs and dumps
pub fn ms_to_string(ms: i64) -> String {
    match DateTime::from_timestamp_millis(ms) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => format!("<invalid time {}>", ms),
    }
}
