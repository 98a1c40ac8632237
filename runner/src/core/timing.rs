//! Hierarchical elapsed-time accounting and lazy overflow detection.
//!
//! Timers only accumulate while running; a suspended session stops every timer,
//! so paused time never counts. Overflow is evaluated on demand, never by a
//! background task.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::TimeScope;
use crate::definition::TimeLimits;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer {
    pub accumulated_ms: i64,
    pub running_since: Option<DateTime<Utc>>,
}

impl Timer {
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        let running = self
            .running_since
            .map(|since| (now - since).num_milliseconds().max(0))
            .unwrap_or(0);
        self.accumulated_ms + running
    }

    fn start(&mut self, now: DateTime<Utc>) {
        if self.running_since.is_none() {
            self.running_since = Some(now);
        }
    }

    fn stop(&mut self, now: DateTime<Utc>) {
        if let Some(since) = self.running_since.take() {
            self.accumulated_ms += (now - since).num_milliseconds().max(0);
        }
    }
}

/// Elapsed-time accumulators keyed by scope key (`test:T`, `part:P`, `section:S`, `item:I.0`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTimers {
    timers: BTreeMap<String, Timer>,
}

impl SessionTimers {
    /// Run exactly the timers in `active`; every other running timer stops.
    pub fn sync(&mut self, active: &[String], now: DateTime<Utc>) {
        for (key, timer) in &mut self.timers {
            if !active.contains(key) {
                timer.stop(now);
            }
        }
        for key in active {
            self.timers.entry(key.clone()).or_default().start(now);
        }
    }

    pub fn stop_all(&mut self, now: DateTime<Utc>) {
        for timer in self.timers.values_mut() {
            timer.stop(now);
        }
    }

    pub fn start(&mut self, key: &str, now: DateTime<Utc>) {
        self.timers.entry(key.to_string()).or_default().start(now);
    }

    pub fn stop(&mut self, key: &str, now: DateTime<Utc>) {
        if let Some(timer) = self.timers.get_mut(key) {
            timer.stop(now);
        }
    }

    /// Stop `key` and account `duration_secs` for the running segment instead of wall time.
    pub fn stop_with_duration(&mut self, key: &str, duration_secs: f64, now: DateTime<Utc>) {
        let timer = self.timers.entry(key.to_string()).or_default();
        match timer.running_since.take() {
            Some(_) => timer.accumulated_ms += secs_to_ms(duration_secs),
            None => timer.stop(now),
        }
    }

    pub fn is_running(&self, key: &str) -> bool {
        self.timers
            .get(key)
            .is_some_and(|timer| timer.running_since.is_some())
    }

    pub fn elapsed_secs(&self, key: &str, now: DateTime<Utc>) -> f64 {
        self.timers
            .get(key)
            .map(|timer| timer.elapsed_ms(now) as f64 / 1000.0)
            .unwrap_or(0.0)
    }
}

fn secs_to_ms(secs: f64) -> i64 {
    (secs.max(0.0) * 1000.0).round() as i64
}

/// One active scope with its declared limits.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeLimits<'a> {
    pub scope: TimeScope,
    pub source: &'a str,
    pub key: String,
    pub limits: Option<&'a TimeLimits>,
}

/// Time constraint snapshot for one scope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeConstraint {
    pub scope: TimeScope,
    pub source: String,
    pub elapsed: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl TimeConstraint {
    /// A constraint declaring a minimum or a maximum.
    pub fn is_regular(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }

    pub fn max_remaining(&self) -> Option<f64> {
        self.max.map(|max| (max - self.elapsed).max(0.0))
    }

    pub fn min_remaining(&self) -> Option<f64> {
        self.min.map(|min| (min - self.elapsed).max(0.0))
    }

    pub fn overflows(&self) -> bool {
        self.max.is_some_and(|max| self.elapsed > max)
    }

    pub fn underflows(&self) -> bool {
        self.min.is_some_and(|min| self.elapsed < min)
    }
}

/// Detected duration overflow for a single scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overflow {
    pub scope: TimeScope,
    pub source: String,
}

/// Build constraints for the active scopes, skipping closed ones.
pub fn constraints(
    scopes: &[ScopeLimits<'_>],
    timers: &SessionTimers,
    closed: &BTreeSet<String>,
    now: DateTime<Utc>,
) -> Vec<TimeConstraint> {
    scopes
        .iter()
        .filter(|scope| !closed.contains(&scope.key))
        .map(|scope| TimeConstraint {
            scope: scope.scope,
            source: scope.source.to_string(),
            elapsed: timers.elapsed_secs(&scope.key, now),
            min: scope.limits.and_then(|limits| limits.min_time),
            max: scope.limits.and_then(|limits| limits.max_time),
        })
        .collect()
}

/// First overflowing constraint by precedence: test, part, section, item.
pub fn first_overflow(constraints: &[TimeConstraint]) -> Option<Overflow> {
    constraints
        .iter()
        .filter(|constraint| constraint.overflows())
        .min_by_key(|constraint| constraint.scope)
        .map(|constraint| Overflow {
            scope: constraint.scope,
            source: constraint.source.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn limits(min: Option<f64>, max: Option<f64>) -> TimeLimits {
        TimeLimits {
            min_time: min,
            max_time: max,
        }
    }

    #[test]
    fn paused_time_is_not_counted() {
        let mut timers = SessionTimers::default();
        let key = "test:T".to_string();
        timers.sync(std::slice::from_ref(&key), t0());
        timers.stop_all(t0() + Duration::seconds(10));
        // 50 seconds suspended
        timers.sync(std::slice::from_ref(&key), t0() + Duration::seconds(60));
        let elapsed = timers.elapsed_secs(&key, t0() + Duration::seconds(65));
        assert!((elapsed - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn sync_stops_timers_left_behind() {
        let mut timers = SessionTimers::default();
        timers.sync(&["item:A.0".to_string()], t0());
        timers.sync(&["item:B.0".to_string()], t0() + Duration::seconds(5));
        assert!(!timers.is_running("item:A.0"));
        assert!(timers.is_running("item:B.0"));
        let elapsed = timers.elapsed_secs("item:A.0", t0() + Duration::seconds(100));
        assert!((elapsed - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn client_duration_replaces_running_segment() {
        let mut timers = SessionTimers::default();
        timers.start("item:A.0", t0());
        timers.stop_with_duration("item:A.0", 2.5, t0() + Duration::seconds(30));
        let elapsed = timers.elapsed_secs("item:A.0", t0() + Duration::seconds(60));
        assert!((elapsed - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn overflow_prefers_broader_scope() {
        let mut timers = SessionTimers::default();
        let now = t0();
        timers.sync(&["test:T".to_string(), "item:I.0".to_string()], now);
        let test_limits = limits(None, Some(10.0));
        let item_limits = limits(None, Some(5.0));
        let scopes = vec![
            ScopeLimits {
                scope: TimeScope::Item,
                source: "I",
                key: "item:I.0".to_string(),
                limits: Some(&item_limits),
            },
            ScopeLimits {
                scope: TimeScope::Test,
                source: "T",
                key: "test:T".to_string(),
                limits: Some(&test_limits),
            },
        ];
        let later = now + Duration::seconds(20);
        let all = constraints(&scopes, &timers, &BTreeSet::new(), later);
        let overflow = first_overflow(&all).expect("overflow");
        assert_eq!(overflow.scope, TimeScope::Test);
        assert_eq!(overflow.source, "T");
    }

    #[test]
    fn closed_scopes_do_not_overflow() {
        let mut timers = SessionTimers::default();
        timers.start("item:I.0", t0());
        let item_limits = limits(None, Some(1.0));
        let scopes = vec![ScopeLimits {
            scope: TimeScope::Item,
            source: "I",
            key: "item:I.0".to_string(),
            limits: Some(&item_limits),
        }];
        let closed = BTreeSet::from(["item:I.0".to_string()]);
        let all = constraints(&scopes, &timers, &closed, t0() + Duration::seconds(5));
        assert!(first_overflow(&all).is_none());
    }

    #[test]
    fn regular_constraints_declare_min_or_max() {
        let open = TimeConstraint {
            scope: TimeScope::Section,
            source: "S".to_string(),
            elapsed: 3.0,
            min: None,
            max: None,
        };
        assert!(!open.is_regular());
        let bounded = TimeConstraint {
            min: Some(10.0),
            max: Some(20.0),
            ..open
        };
        assert!(bounded.is_regular());
        assert!(bounded.underflows());
        assert_eq!(bounded.max_remaining(), Some(17.0));
        assert_eq!(bounded.min_remaining(), Some(7.0));
    }
}
