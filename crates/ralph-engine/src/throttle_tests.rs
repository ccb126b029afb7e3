// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::Timelike;

fn window(kind: WindowKind, observed: u64, budget: u64) -> ThrottleWindow {
    ThrottleWindow { provider_id: "anthropic".into(), window_kind: kind, budget_tokens: budget, observed_tokens: observed }
}

#[test]
fn below_soft_threshold_is_ok() {
    let engine = ThrottleEngine::new(ThrottleConfig::default(), None);
    let report = engine.evaluate(&[window(WindowKind::Rolling5h, 10, 100)], 0);
    assert_eq!(report.state, ThrottleState::Ok);
    assert!(report.resume_at_ms.is_none());
}

#[test]
fn crossing_soft_pct_transitions_to_soft() {
    let engine = ThrottleEngine::new(ThrottleConfig::default(), None);
    let report = engine.evaluate(&[window(WindowKind::Rolling5h, 75, 100)], 0);
    assert_eq!(report.state, ThrottleState::Soft);
}

#[test]
fn crossing_hard_pct_transitions_to_hard_before_grace_elapses() {
    let engine = ThrottleEngine::new(ThrottleConfig::default(), None);
    let report = engine.evaluate(&[window(WindowKind::Rolling5h, 95, 100)], 1_000);
    assert_eq!(report.state, ThrottleState::Hard);
}

#[test]
fn hard_persisting_past_grace_period_transitions_to_pause() {
    let config = ThrottleConfig { pause_grace_ms: 5_000, ..ThrottleConfig::default() };
    let engine = ThrottleEngine::new(config, None);
    assert_eq!(engine.evaluate(&[window(WindowKind::Rolling5h, 95, 100)], 0).state, ThrottleState::Hard);
    assert_eq!(engine.evaluate(&[window(WindowKind::Rolling5h, 95, 100)], 4_000).state, ThrottleState::Hard);
    let report = engine.evaluate(&[window(WindowKind::Rolling5h, 95, 100)], 6_000);
    assert_eq!(report.state, ThrottleState::Pause);
}

#[test]
fn dropping_back_below_hard_resets_the_grace_timer() {
    let config = ThrottleConfig { pause_grace_ms: 5_000, ..ThrottleConfig::default() };
    let engine = ThrottleEngine::new(config, None);
    assert_eq!(engine.evaluate(&[window(WindowKind::Rolling5h, 95, 100)], 0).state, ThrottleState::Hard);
    assert_eq!(engine.evaluate(&[window(WindowKind::Rolling5h, 50, 100)], 1_000).state, ThrottleState::Soft);
    // hard_since was cleared, so re-entering hard restarts the grace clock.
    assert_eq!(engine.evaluate(&[window(WindowKind::Rolling5h, 95, 100)], 2_000).state, ThrottleState::Hard);
    assert_eq!(engine.evaluate(&[window(WindowKind::Rolling5h, 95, 100)], 6_000).state, ThrottleState::Hard);
}

#[test]
fn dst_weekly_reset_lands_on_the_expected_local_wall_clock_time() {
    let schedule = WeeklySchedule { day_of_week: 1, hour: 19, minute: 5, time_zone: "America/Indiana/Indianapolis".to_string() };
    let now_ms = chrono::DateTime::parse_from_rfc3339("2026-03-09T22:00:00Z").unwrap().timestamp_millis() as u64;

    let next = next_weekly_reset(&schedule, now_ms).unwrap();
    let tz: Tz = schedule.time_zone.parse().unwrap();
    let next_local = Utc.timestamp_millis_opt(next as i64).unwrap().with_timezone(&tz);
    assert_eq!(next_local.weekday(), Weekday::Mon);
    assert_eq!(next_local.hour(), 19);
    assert_eq!(next_local.minute(), 5);

    let previous = previous_weekly_reset(&schedule, next.saturating_sub(60_000)).unwrap();
    let gap_hours = (next - previous) as f64 / 3_600_000.0;
    assert!(gap_hours >= 6.8 * 24.0 && gap_hours <= 7.2 * 24.0, "gap was {gap_hours} hours");
}

#[test]
fn hard_state_carries_a_weekly_resume_timestamp_when_configured() {
    let schedule = WeeklySchedule { day_of_week: 1, hour: 19, minute: 5, time_zone: "America/Indiana/Indianapolis".to_string() };
    let engine = ThrottleEngine::new(ThrottleConfig::default(), Some(schedule));
    let now_ms = chrono::DateTime::parse_from_rfc3339("2026-03-09T22:00:00Z").unwrap().timestamp_millis() as u64;
    let report = engine.evaluate(&[window(WindowKind::Weekly, 95, 100)], now_ms);
    assert_eq!(report.state, ThrottleState::Hard);
    assert!(report.resume_at_ms.is_some());
}

#[test]
fn unknown_time_zone_is_a_typed_error() {
    let schedule = WeeklySchedule { day_of_week: 1, hour: 0, minute: 0, time_zone: "Not/AZone".to_string() };
    assert!(matches!(next_weekly_reset(&schedule, 0), Err(ThrottleError::UnknownTimeZone(_))));
}
