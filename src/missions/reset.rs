//! Recurring mission reset sweep
//!
//! Run once per external tick. Every mission that is due gets its own
//! transaction: re-lock the mission row, re-check that it is still due,
//! zero the affected users' progress and completion, advance `reset_time`,
//! commit. A mission that fails is logged and skipped; the sweep goes on.

use chrono::{DateTime, Duration, Months, TimeZone, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::model::{Frequency, Mission};
use crate::storage::{Store, StoreError, StoreResult};

/// Next reset boundary for `frequency`, measured from the UTC midnight of
/// `now` (never from the previous `reset_time`, so a missed run does not
/// compound drift). `None` for one-time missions.
pub fn next_reset(frequency: Frequency, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let midnight = now.date_naive().and_hms_opt(0, 0, 0)?;
    let midnight = Utc.from_utc_datetime(&midnight);
    match frequency {
        Frequency::OneTime => None,
        Frequency::Daily => midnight.checked_add_signed(Duration::days(1)),
        Frequency::Weekly => midnight.checked_add_signed(Duration::days(7)),
        Frequency::Monthly => midnight.checked_add_months(Months::new(1)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissionReset {
    pub mission_id: i64,
    pub users: usize,
    pub progress_rows: u64,
    pub next_reset: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedReset {
    pub mission_id: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Missions that matched the due predicate at the start of the sweep
    pub examined: usize,
    pub reset: Vec<MissionReset>,
    /// Due at listing time but no longer due once locked (another sweep won)
    pub skipped: Vec<i64>,
    pub failed: Vec<FailedReset>,
}

impl SweepReport {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

pub struct ResetScheduler<S: Store> {
    store: Arc<S>,
}

impl<S: Store> ResetScheduler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> StoreResult<SweepReport> {
        let due = {
            let mut tx = self.store.begin().await?;
            tx.due_missions(now).await?
        };

        let mut report = SweepReport {
            examined: due.len(),
            ..Default::default()
        };

        for mission in &due {
            match self.reset_one(mission.id, now).await {
                Ok(Some(done)) => report.reset.push(done),
                Ok(None) => report.skipped.push(mission.id),
                Err(e) => {
                    warn!(mission_id = mission.id, error = %e, "Mission reset failed");
                    report.failed.push(FailedReset {
                        mission_id: mission.id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            examined = report.examined,
            reset = report.reset.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Reset sweep finished"
        );
        Ok(report)
    }

    /// Reset one mission in its own transaction. `Ok(None)` when it is no
    /// longer due.
    async fn reset_one(&self, mission_id: i64, now: DateTime<Utc>) -> StoreResult<Option<MissionReset>> {
        let mut tx = self.store.begin().await?;

        let Some(mission) = tx.lock_mission(mission_id).await? else {
            return Ok(None);
        };
        if !mission.is_due(now) {
            debug!(mission_id, "No longer due");
            return Ok(None);
        }
        let next = next_boundary(&mission, now)?;

        let users = if mission.for_all {
            tx.all_user_ids().await?
        } else {
            tx.mission_participants(mission_id).await?
        };

        // UserMission rows before progress rows, the order record() locks them in
        tx.reset_mission_completions(mission_id, &users).await?;
        let progress_rows = tx.reset_mission_progress(mission_id, &users).await?;
        tx.set_reset_time(mission_id, next).await?;
        tx.commit().await?;

        debug!(mission_id, users = users.len(), progress_rows, %next, "Mission reset");
        Ok(Some(MissionReset {
            mission_id,
            users: users.len(),
            progress_rows,
            next_reset: next,
        }))
    }
}

fn next_boundary(mission: &Mission, now: DateTime<Utc>) -> StoreResult<DateTime<Utc>> {
    next_reset(mission.frequency, now).ok_or_else(|| {
        StoreError::Corrupt(format!(
            "mission {} has no next reset for {:?}",
            mission.id, mission.frequency
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_daily_is_next_midnight() {
        assert_eq!(
            next_reset(Frequency::Daily, at(2026, 10, 18, 15)),
            Some(at(2026, 10, 19, 0))
        );
        // exactly at midnight still moves a full day
        assert_eq!(
            next_reset(Frequency::Daily, at(2026, 10, 18, 0)),
            Some(at(2026, 10, 19, 0))
        );
    }

    #[test]
    fn test_weekly_and_monthly() {
        assert_eq!(
            next_reset(Frequency::Weekly, at(2026, 12, 28, 9)),
            Some(at(2027, 1, 4, 0))
        );
        assert_eq!(
            next_reset(Frequency::Monthly, at(2026, 10, 18, 9)),
            Some(at(2026, 11, 18, 0))
        );
        // clamps to the end of a shorter month
        assert_eq!(
            next_reset(Frequency::Monthly, at(2027, 1, 31, 9)),
            Some(at(2027, 2, 28, 0))
        );
    }

    #[test]
    fn test_one_time_never_resets() {
        assert_eq!(next_reset(Frequency::OneTime, at(2026, 10, 18, 9)), None);
    }

    #[test]
    fn test_boundary_ignores_previous_reset_time() {
        // a run three days late lands on tomorrow, not on old + 1 day
        let late_run = at(2026, 10, 21, 6);
        assert_eq!(next_reset(Frequency::Daily, late_run), Some(at(2026, 10, 22, 0)));
    }
}
