// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Throttle engine (C10): rolling-5h and DST-correct weekly token-budget
//! windows, and the `ok → soft → hard → pause` state machine gating the
//! scheduler and asking live workers to checkpoint.

use chrono::{Datelike, LocalResult, NaiveDate, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use parking_lot::Mutex;
use ralph_core::domain::{ThrottleWindow, WindowKind};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleState {
    Ok,
    Soft,
    Hard,
    Pause,
}

#[derive(Debug, Clone)]
pub struct ThrottleWindowReport {
    pub kind: WindowKind,
    pub observed: u64,
    pub budget: u64,
    pub pct: f64,
}

#[derive(Debug, Clone)]
pub struct ThrottleReport {
    pub state: ThrottleState,
    pub resume_at_ms: Option<u64>,
    pub windows: Vec<ThrottleWindowReport>,
}

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub soft_pct: f64,
    pub hard_pct: f64,
    pub pause_grace_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self { soft_pct: 70.0, hard_pct: 90.0, pause_grace_ms: 10 * 60_000 }
    }
}

/// A fixed weekday/hour/minute reset point in an IANA time zone.
/// `day_of_week` follows the JS `Date.getDay()` convention: 0 = Sunday.
#[derive(Debug, Clone)]
pub struct WeeklySchedule {
    pub day_of_week: u8,
    pub hour: u32,
    pub minute: u32,
    pub time_zone: String,
}

#[derive(Debug, Error)]
pub enum ThrottleError {
    #[error("unknown IANA time zone `{0}`")]
    UnknownTimeZone(String),
    #[error("day_of_week must be 0..=6, got {0}")]
    InvalidDayOfWeek(u8),
    #[error("date arithmetic ran off the end of the calendar")]
    DateOverflow,
}

fn weekday_from_index(day_of_week: u8) -> Result<Weekday, ThrottleError> {
    match day_of_week {
        0 => Ok(Weekday::Sun),
        1 => Ok(Weekday::Mon),
        2 => Ok(Weekday::Tue),
        3 => Ok(Weekday::Wed),
        4 => Ok(Weekday::Thu),
        5 => Ok(Weekday::Fri),
        6 => Ok(Weekday::Sat),
        other => Err(ThrottleError::InvalidDayOfWeek(other)),
    }
}

fn resolve_local_time(tz: &Tz, date: NaiveDate, hour: u32, minute: u32) -> Option<chrono::DateTime<Tz>> {
    let naive = date.and_hms_opt(hour, minute, 0)?;
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt),
        // Ambiguous (fall-back fold): the earlier of the two instants is
        // the one that occurs first in absolute time.
        LocalResult::Ambiguous(a, b) => Some(if a < b { a } else { b }),
        // Nonexistent (spring-forward gap): this exact wall-clock time
        // never happens on this date; the caller moves to the next day.
        LocalResult::None => None,
    }
}

/// The first occurrence of `schedule` strictly after `now_ms`,
/// DST-correct because each candidate is resolved by formatting in the
/// configured zone rather than by adding a fixed 7×24h offset.
pub fn next_weekly_reset(schedule: &WeeklySchedule, now_ms: u64) -> Result<u64, ThrottleError> {
    let tz: Tz = schedule.time_zone.parse().map_err(|_| ThrottleError::UnknownTimeZone(schedule.time_zone.clone()))?;
    let weekday = weekday_from_index(schedule.day_of_week)?;
    let now = Utc.timestamp_millis_opt(now_ms as i64).single().unwrap_or_else(Utc::now);
    let local_now = now.with_timezone(&tz);

    let mut candidate_date = local_now.date_naive();
    for _ in 0..14 {
        if candidate_date.weekday() == weekday {
            if let Some(candidate_local) = resolve_local_time(&tz, candidate_date, schedule.hour, schedule.minute) {
                if candidate_local > local_now {
                    return Ok(candidate_local.with_timezone(&Utc).timestamp_millis() as u64);
                }
            }
        }
        candidate_date = candidate_date.succ_opt().ok_or(ThrottleError::DateOverflow)?;
    }
    unreachable!("a matching weekday occurs at least once within any 14-day span")
}

/// The most recent occurrence of `schedule` at or before `now_ms`; used
/// to measure the realized interval between resets across a DST
/// boundary.
pub fn previous_weekly_reset(schedule: &WeeklySchedule, now_ms: u64) -> Result<u64, ThrottleError> {
    let tz: Tz = schedule.time_zone.parse().map_err(|_| ThrottleError::UnknownTimeZone(schedule.time_zone.clone()))?;
    let weekday = weekday_from_index(schedule.day_of_week)?;
    let now = Utc.timestamp_millis_opt(now_ms as i64).single().unwrap_or_else(Utc::now);
    let local_now = now.with_timezone(&tz);

    let mut candidate_date = local_now.date_naive();
    for _ in 0..14 {
        if candidate_date.weekday() == weekday {
            if let Some(candidate_local) = resolve_local_time(&tz, candidate_date, schedule.hour, schedule.minute) {
                if candidate_local <= local_now {
                    return Ok(candidate_local.with_timezone(&Utc).timestamp_millis() as u64);
                }
            }
        }
        candidate_date = candidate_date.pred_opt().ok_or(ThrottleError::DateOverflow)?;
    }
    unreachable!("a matching weekday occurs at least once within any 14-day span")
}

fn classify_pct(pct: f64, config: &ThrottleConfig) -> ThrottleState {
    if pct >= config.hard_pct {
        ThrottleState::Hard
    } else if pct >= config.soft_pct {
        ThrottleState::Soft
    } else {
        ThrottleState::Ok
    }
}

/// Tracks the `ok → soft → hard → pause` state machine across calls,
/// since the `hard → pause` transition depends on how long the engine
/// has continuously observed `hard`, not on any single evaluation.
pub struct ThrottleEngine {
    config: ThrottleConfig,
    weekly: Option<WeeklySchedule>,
    hard_since_ms: Mutex<Option<u64>>,
}

impl ThrottleEngine {
    pub fn new(config: ThrottleConfig, weekly: Option<WeeklySchedule>) -> Self {
        Self { config, weekly, hard_since_ms: Mutex::new(None) }
    }

    pub fn evaluate(&self, windows: &[ThrottleWindow], now_ms: u64) -> ThrottleReport {
        let reports: Vec<ThrottleWindowReport> = windows
            .iter()
            .map(|w| ThrottleWindowReport { kind: w.window_kind, observed: w.observed_tokens, budget: w.budget_tokens, pct: w.pct() })
            .collect();

        let tentative = reports.iter().map(|r| classify_pct(r.pct, &self.config)).max_by_key(|s| match s {
            ThrottleState::Ok => 0,
            ThrottleState::Soft => 1,
            ThrottleState::Hard => 2,
            ThrottleState::Pause => 3,
        });
        let tentative = tentative.unwrap_or(ThrottleState::Ok);

        let state = if tentative == ThrottleState::Hard {
            let mut hard_since = self.hard_since_ms.lock();
            let since = *hard_since.get_or_insert(now_ms);
            if now_ms.saturating_sub(since) >= self.config.pause_grace_ms {
                ThrottleState::Pause
            } else {
                ThrottleState::Hard
            }
        } else {
            *self.hard_since_ms.lock() = None;
            tentative
        };

        let resume_at_ms = match (state, &self.weekly) {
            (ThrottleState::Hard | ThrottleState::Pause, Some(schedule)) => next_weekly_reset(schedule, now_ms).ok(),
            _ => None,
        };

        ThrottleReport { state, resume_at_ms, windows: reports }
    }
}

#[cfg(test)]
#[path = "throttle_tests.rs"]
mod tests;
