// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Per-domain day/month message counters.
//!
//! A small state file below the domain storage root records the last seen
//! civil day and month together with the running counters, so quotas
//! survive restarts. Counters roll only when the current day or month
//! differs from the stored one; setting the clock back within the same
//! day therefore has no effect.

use chrono::{Datelike, NaiveDate};
use std::fs;
use std::path::PathBuf;

const QUOTA_FILE: &str = "quota";

#[derive(Debug)]
pub struct QuotaTracker {
    state_path: PathBuf,

    /// Days since the common era of the last seen day.
    day_key: i32,

    /// Months since year zero of the last seen month.
    month_key: i32,

    day_count: u64,
    month_count: u64,
}

fn day_key_of(date: NaiveDate) -> i32 {
    date.num_days_from_ce()
}

#[allow(clippy::cast_possible_wrap)]
fn month_key_of(date: NaiveDate) -> i32 {
    date.year() * 12 + date.month0() as i32
}

impl QuotaTracker {
    /// Load or initialise the tracker below `domain_root`.
    #[must_use]
    pub fn load(domain_root: &std::path::Path, today: NaiveDate) -> Self {
        let state_path = domain_root.join(QUOTA_FILE);
        let mut tracker = Self {
            state_path,
            day_key: day_key_of(today),
            month_key: month_key_of(today),
            day_count: 0,
            month_count: 0,
        };

        if let Ok(content) = fs::read_to_string(&tracker.state_path) {
            let fields: Vec<i64> = content
                .split_whitespace()
                .filter_map(|part| part.parse().ok())
                .collect();
            if let [day_key, month_key, day_count, month_count] = fields[..] {
                #[allow(clippy::cast_possible_truncation)]
                {
                    tracker.day_key = day_key as i32;
                    tracker.month_key = month_key as i32;
                }
                #[allow(clippy::cast_sign_loss)]
                {
                    tracker.day_count = day_count.max(0) as u64;
                    tracker.month_count = month_count.max(0) as u64;
                }
            }
            tracker.roll(today);
        }

        tracker
    }

    fn save(&self) {
        let content = format!(
            "{} {} {} {}\n",
            self.day_key, self.month_key, self.day_count, self.month_count
        );
        if let Some(parent) = self.state_path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Err(err) = fs::write(&self.state_path, content) {
            log::error!("quota: failed to persist {:?}: {err}", self.state_path);
        }
    }

    /// Reset counters whose civil period changed; returns true on a roll.
    pub fn roll(&mut self, today: NaiveDate) -> bool {
        let mut rolled = false;
        let day_key = day_key_of(today);
        if day_key != self.day_key {
            self.day_key = day_key;
            self.day_count = 0;
            rolled = true;
        }
        let month_key = month_key_of(today);
        if month_key != self.month_key {
            self.month_key = month_key;
            self.month_count = 0;
            rolled = true;
        }
        if rolled {
            self.save();
        }
        rolled
    }

    /// Whether one more message fits the quotas; zero disables a quota.
    #[must_use]
    pub fn check(&self, day_quota: u64, month_quota: u64) -> bool {
        (day_quota == 0 || self.day_count < day_quota)
            && (month_quota == 0 || self.month_count < month_quota)
    }

    /// Count one accepted message.
    pub fn record(&mut self, today: NaiveDate) {
        self.roll(today);
        self.day_count += 1;
        self.month_count += 1;
    }

    /// Periodic housekeeping: roll if the period changed and persist the
    /// counters.
    pub fn tick(&mut self, today: NaiveDate) {
        self.roll(today);
        self.save();
    }

    #[must_use]
    pub const fn day_count(&self) -> u64 {
        self.day_count
    }

    #[must_use]
    pub const fn month_count(&self) -> u64 {
        self.month_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::utils::random_string;

    fn temp_root() -> PathBuf {
        let root = std::env::temp_dir()
            .join("kestrel-tests")
            .join(format!("quota-{}", random_string(8)));
        fs::create_dir_all(&root).unwrap();
        root
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn test_quota_enforcement() {
        let root = temp_root();
        let today = date(2024, 3, 14);
        let mut tracker = QuotaTracker::load(&root, today);

        assert!(tracker.check(2, 0));
        tracker.record(today);
        tracker.record(today);
        assert!(!tracker.check(2, 0));
        assert!(tracker.check(0, 3));
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_day_roll_keeps_month() {
        let root = temp_root();
        let mut tracker = QuotaTracker::load(&root, date(2024, 3, 14));
        tracker.record(date(2024, 3, 14));
        tracker.record(date(2024, 3, 14));

        assert!(tracker.roll(date(2024, 3, 15)));
        assert_eq!(tracker.day_count(), 0);
        assert_eq!(tracker.month_count(), 2);

        assert!(tracker.roll(date(2024, 4, 1)));
        assert_eq!(tracker.month_count(), 0);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_clock_set_back_same_day_is_noop() {
        let root = temp_root();
        let mut tracker = QuotaTracker::load(&root, date(2024, 3, 14));
        tracker.record(date(2024, 3, 14));

        assert!(!tracker.roll(date(2024, 3, 14)));
        assert_eq!(tracker.day_count(), 1);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_counters_survive_reload() {
        let root = temp_root();
        let today = date(2024, 3, 14);
        let mut tracker = QuotaTracker::load(&root, today);
        tracker.record(today);
        tracker.tick(today);

        let tracker = QuotaTracker::load(&root, today);
        assert_eq!(tracker.day_count(), 1);
        assert_eq!(tracker.month_count(), 1);
        fs::remove_dir_all(&root).unwrap();
    }
}
