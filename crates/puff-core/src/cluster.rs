//! Batch session clustering.
//!
//! Rebuilds session history from an ascending list of event timestamps. This
//! is the batch counterpart of the incremental engine. Consecutive events
//! split only when their gap is strictly longer than the timeout
//! ([`IdleTimeout::separates`]), and the trailing cluster stays active while
//! `now` is no more than the timeout past its end. Away from a gap of exactly
//! the timeout, replaying events yields the same boundaries as appending them
//! one at a time.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::session::{ActiveSession, FinalizedSession};
use crate::types::IdleTimeout;

/// A contiguous run of events with no idle gap longer than the timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Cluster {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub count: u32,
}

impl Cluster {
    const fn open(at: DateTime<Utc>) -> Self {
        Self {
            start: at,
            end: at,
            count: 1,
        }
    }

    fn into_finalized(self) -> FinalizedSession {
        FinalizedSession::from_window(self.start, self.end, self.count)
    }

    fn into_active(self) -> ActiveSession {
        ActiveSession::from_window(self.start, self.end, self.count)
    }
}

/// Groups ascending timestamps into clusters.
///
/// Timestamps must be sorted ascending (the store returns them that way).
pub fn cluster_timestamps<I>(timestamps: I, timeout: IdleTimeout) -> Vec<Cluster>
where
    I: IntoIterator<Item = DateTime<Utc>>,
{
    let mut clusters = Vec::new();
    let mut current: Option<Cluster> = None;

    for ts in timestamps {
        current = Some(match current {
            None => Cluster::open(ts),
            Some(cluster) => {
                debug_assert!(ts >= cluster.end, "timestamps must be ascending");
                if timeout.separates(ts.signed_duration_since(cluster.end)) {
                    clusters.push(cluster);
                    Cluster::open(ts)
                } else {
                    Cluster {
                        end: ts,
                        count: cluster.count.saturating_add(1),
                        ..cluster
                    }
                }
            }
        });
    }
    clusters.extend(current);
    clusters
}

/// The complete session state derived from an event log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcilePlan {
    /// Completed sessions, ascending by end.
    pub finalized: Vec<FinalizedSession>,
    /// The trailing session, if it is still within the idle timeout of `now`.
    pub active: Option<ActiveSession>,
}

impl ReconcilePlan {
    /// Total number of events covered by the plan.
    pub fn event_count(&self) -> u64 {
        let finalized: u64 = self
            .finalized
            .iter()
            .map(|session| u64::from(session.count()))
            .sum();
        finalized + self.active.map_or(0, |active| u64::from(active.count()))
    }
}

/// Plans a full rebuild of session state from ascending timestamps.
///
/// The last cluster stays active when `now - end` is at most the timeout;
/// every other cluster is finalized.
pub fn plan_reconciliation(
    timestamps: &[DateTime<Utc>],
    now: DateTime<Utc>,
    timeout: IdleTimeout,
) -> ReconcilePlan {
    let mut clusters = cluster_timestamps(timestamps.iter().copied(), timeout);

    let active = match clusters.last() {
        Some(last) if !timeout.separates(now.signed_duration_since(last.end)) => {
            clusters.pop().map(Cluster::into_active)
        }
        _ => None,
    };

    ReconcilePlan {
        finalized: clusters.into_iter().map(Cluster::into_finalized).collect(),
        active,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn at(minutes: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + Duration::minutes(minutes)
    }

    fn times(minutes: &[i64]) -> Vec<DateTime<Utc>> {
        minutes.iter().copied().map(at).collect()
    }

    #[test]
    fn empty_log_has_no_clusters() {
        assert!(cluster_timestamps(Vec::new(), IdleTimeout::DEFAULT).is_empty());
        let plan = plan_reconciliation(&[], at(0), IdleTimeout::DEFAULT);
        assert_eq!(plan, ReconcilePlan::default());
    }

    #[test]
    fn splits_on_gap_longer_than_timeout() {
        let clusters = cluster_timestamps(times(&[0, 5, 20]), IdleTimeout::DEFAULT);
        assert_eq!(
            clusters,
            vec![
                Cluster {
                    start: at(0),
                    end: at(5),
                    count: 2
                },
                Cluster {
                    start: at(20),
                    end: at(20),
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn gap_equal_to_timeout_stays_in_cluster() {
        let clusters = cluster_timestamps(times(&[0, 12]), IdleTimeout::DEFAULT);
        assert_eq!(
            clusters,
            vec![Cluster {
                start: at(0),
                end: at(12),
                count: 2
            }]
        );

        let just_over = vec![at(0), at(12) + Duration::milliseconds(1)];
        assert_eq!(cluster_timestamps(just_over, IdleTimeout::DEFAULT).len(), 2);
    }

    #[test]
    fn tail_exactly_timeout_old_stays_active() {
        let plan = plan_reconciliation(&times(&[0]), at(12), IdleTimeout::DEFAULT);
        assert!(plan.finalized.is_empty());
        assert_eq!(plan.active, Some(ActiveSession::start(at(0))));

        let later = at(12) + Duration::milliseconds(1);
        let plan = plan_reconciliation(&times(&[0]), later, IdleTimeout::DEFAULT);
        assert_eq!(plan.finalized.len(), 1);
        assert!(plan.active.is_none());
    }

    #[test]
    fn duplicate_timestamps_share_a_cluster() {
        let clusters = cluster_timestamps(times(&[3, 3, 3]), IdleTimeout::DEFAULT);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].count, 3);
    }

    #[test]
    fn trailing_cluster_within_timeout_stays_active() {
        let plan = plan_reconciliation(&times(&[0, 5, 20]), at(25), IdleTimeout::DEFAULT);
        assert_eq!(plan.finalized.len(), 1);
        assert_eq!(plan.finalized[0].start_ts(), at(0));
        assert_eq!(plan.finalized[0].end_ts(), at(5));
        assert_eq!(plan.finalized[0].count(), 2);

        let active = plan.active.expect("trailing session should be active");
        assert_eq!(active.start_ts(), at(20));
        assert_eq!(active.last_event_ts(), at(20));
        assert_eq!(active.count(), 1);
    }

    #[test]
    fn stale_trailing_cluster_is_finalized() {
        let plan = plan_reconciliation(&times(&[0, 5, 20]), at(40), IdleTimeout::DEFAULT);
        assert_eq!(plan.finalized.len(), 2);
        assert!(plan.active.is_none());
    }

    #[test]
    fn plan_conserves_event_count() {
        let stamps = times(&[0, 1, 2, 30, 31, 60, 100, 101, 102, 103]);
        for now in [103, 110, 200] {
            let plan = plan_reconciliation(&stamps, at(now), IdleTimeout::DEFAULT);
            assert_eq!(plan.event_count(), stamps.len() as u64);
        }
    }

    #[test]
    fn plan_is_deterministic() {
        let stamps = times(&[0, 5, 20, 50, 51]);
        let first = plan_reconciliation(&stamps, at(55), IdleTimeout::DEFAULT);
        let second = plan_reconciliation(&stamps, at(55), IdleTimeout::DEFAULT);
        assert_eq!(first, second);
    }

    #[test]
    fn matches_incremental_appends() {
        let timeout = IdleTimeout::DEFAULT;
        let stamps = times(&[0, 4, 17, 18, 29, 29, 60, 71]);

        let mut finalized = Vec::new();
        let mut active: Option<ActiveSession> = None;
        for ts in &stamps {
            if let Some(session) = active.filter(|s| s.is_timed_out(*ts, timeout)) {
                finalized.push(session.finalize());
                active = None;
            }
            active = Some(active.map_or_else(|| ActiveSession::start(*ts), |s| s.extend(*ts)));
        }

        let plan = plan_reconciliation(&stamps, at(72), timeout);
        assert_eq!(plan.finalized, finalized);
        assert_eq!(plan.active, active);
    }
}
