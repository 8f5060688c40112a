//! Release date and time helpers
//!
//! Historical schema versions stored show release times as epoch
//! milliseconds, weekdays and episode air dates as free text. The migration
//! chain converts those through a [`ReleaseCalendar`]; [`StandardCalendar`]
//! is the implementation configured from [`CalendarConfig`].

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone};
use chrono_tz::Tz;

use crate::config::CalendarConfig;
use crate::error::{Result, StoreError};

/// Sentinel for an unknown release time or air date
pub const UNKNOWN: i64 = -1;

/// Weekday value for shows released every day
pub const RELEASE_WEEKDAY_DAILY: i32 = 0;

/// Weekday value when the source text could not be parsed
pub const RELEASE_WEEKDAY_UNKNOWN: i32 = -1;

const MINUTES_PER_DAY: i64 = 24 * 60;

/// Release times were captured on a UTC-8 clock without daylight saving.
const RELEASE_TIME_OFFSET_MINUTES: i64 = -8 * 60;

/// Converts legacy free-text release data into the current encodings.
pub trait ReleaseCalendar {
    /// Map a weekday name to 0 (daily), 1..=7 (Monday..Sunday) or -1.
    fn parse_release_weekday(&self, raw: &str) -> i32;

    /// Turn a `YYYY-MM-DD` air date into UTC epoch milliseconds, or -1.
    ///
    /// `show_timezone` is the show's own IANA zone if it has one.
    fn parse_episode_release_date(&self, first_aired: &str, show_timezone: Option<&str>) -> i64;
}

/// Re-encode a release time stored as epoch milliseconds as `HHMM`.
pub fn encode_release_time(millis: i64) -> i32 {
    if millis == UNKNOWN {
        return UNKNOWN as i32;
    }
    let minutes = millis.div_euclid(60_000) + RELEASE_TIME_OFFSET_MINUTES;
    let minute_of_day = minutes.rem_euclid(MINUTES_PER_DAY);
    ((minute_of_day / 60) * 100 + minute_of_day % 60) as i32
}

/// Strip a leading English article for sorting.
pub fn trim_leading_article(title: &str) -> &str {
    for article in ["The ", "the ", "An ", "an ", "A ", "a "] {
        if let Some(rest) = title.strip_prefix(article) {
            if !rest.is_empty() {
                return rest;
            }
        }
    }
    title
}

#[derive(Debug, Clone)]
enum DeviceZone {
    Named(Tz),
    Local,
}

/// Calendar backed by the IANA database from `chrono-tz`.
#[derive(Debug, Clone)]
pub struct StandardCalendar {
    default_show_zone: Option<Tz>,
    release_time: NaiveTime,
    device_zone: DeviceZone,
}

impl StandardCalendar {
    pub fn from_config(config: &CalendarConfig) -> Result<Self> {
        let default_show_zone = match config.default_show_timezone.trim() {
            "" => None,
            name => Some(parse_zone(name)?),
        };
        let release_time = NaiveTime::parse_from_str(config.default_release_time.trim(), "%H:%M")
            .map_err(|_| StoreError::InvalidReleaseTime(config.default_release_time.clone()))?;
        let device_zone = match config.device_timezone.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => DeviceZone::Named(parse_zone(name)?),
            _ => DeviceZone::Local,
        };

        Ok(Self {
            default_show_zone,
            release_time,
            device_zone,
        })
    }

    fn to_utc_millis(&self, local: NaiveDateTime, show_timezone: Option<&str>) -> Option<i64> {
        let show_zone = show_timezone
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .and_then(|name| name.parse::<Tz>().ok())
            .or(self.default_show_zone);

        match (show_zone, &self.device_zone) {
            (Some(zone), _) => local_to_millis(&zone, local),
            (None, DeviceZone::Named(zone)) => local_to_millis(zone, local),
            (None, DeviceZone::Local) => local_to_millis(&Local, local),
        }
    }
}

impl ReleaseCalendar for StandardCalendar {
    fn parse_release_weekday(&self, raw: &str) -> i32 {
        let day = raw.trim().to_ascii_lowercase();
        match day.as_str() {
            "daily" => RELEASE_WEEKDAY_DAILY,
            "monday" | "mon" => 1,
            "tuesday" | "tue" => 2,
            "wednesday" | "wed" => 3,
            "thursday" | "thu" => 4,
            "friday" | "fri" => 5,
            "saturday" | "sat" => 6,
            "sunday" | "sun" => 7,
            _ => RELEASE_WEEKDAY_UNKNOWN,
        }
    }

    fn parse_episode_release_date(&self, first_aired: &str, show_timezone: Option<&str>) -> i64 {
        let Ok(date) = NaiveDate::parse_from_str(first_aired.trim(), "%Y-%m-%d") else {
            return UNKNOWN;
        };
        self.to_utc_millis(date.and_time(self.release_time), show_timezone)
            .unwrap_or(UNKNOWN)
    }
}

fn parse_zone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| StoreError::UnknownTimeZone(name.to_string()))
}

fn local_to_millis<Z: TimeZone>(zone: &Z, local: NaiveDateTime) -> Option<i64> {
    // a time inside a DST gap does not exist; move past the gap
    zone.from_local_datetime(&local)
        .earliest()
        .or_else(|| zone.from_local_datetime(&(local + TimeDelta::hours(1))).earliest())
        .map(|dt| dt.timestamp_millis())
}
