//! Autoscaling controller.
//!
//! A fixed-interval loop: snapshot the queue, [`decide`], clamp to the
//! configured bounds, apply through the pool and record the outcome. The
//! decision function is pure; cooldowns are committed only after a
//! successful apply.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use riskflow_state::QueueMetricsSnapshot;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use crate::config::ScalingConfig;
use crate::error::CoreResult;
use crate::metrics::METRICS;
use crate::obs;
use crate::pool::ScaleTarget;

/// Source of queue snapshots for the controller.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn snapshot(&self) -> CoreResult<QueueMetricsSnapshot>;
}

/// Controller state between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ScalerState {
    Stable,
    CoolingDown { until: DateTime<Utc> },
}

impl ScalerState {
    pub fn is_cooling(&self, now: DateTime<Utc>) -> bool {
        matches!(self, ScalerState::CoolingDown { until } if now < *until)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScalingAction {
    ScaleUp { by: usize },
    ScaleDown { by: usize },
    Emergency { by: usize },
    NoOp,
}

impl std::fmt::Display for ScalingAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalingAction::ScaleUp { by } => write!(f, "scale_up(+{by})"),
            ScalingAction::ScaleDown { by } => write!(f, "scale_down(-{by})"),
            ScalingAction::Emergency { by } => write!(f, "emergency(+{by})"),
            ScalingAction::NoOp => write!(f, "noop"),
        }
    }
}

/// One tick's verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalingDecision {
    pub action: ScalingAction,
    pub from: usize,
    pub to: usize,
    pub reason: String,
    /// Cooldown expiry this decision establishes once applied.
    pub cooldown_until: Option<DateTime<Utc>>,
    pub snapshot: QueueMetricsSnapshot,
}

impl ScalingDecision {
    fn noop(workers: usize, reason: impl Into<String>, snapshot: &QueueMetricsSnapshot) -> Self {
        Self {
            action: ScalingAction::NoOp,
            from: workers,
            to: workers,
            reason: reason.into(),
            cooldown_until: None,
            snapshot: snapshot.clone(),
        }
    }

    /// Build a decision moving to `target`, downgraded to `NoOp` when the
    /// target equals the current count.
    fn towards(
        kind: fn(usize) -> ScalingAction,
        workers: usize,
        target: usize,
        reason: String,
        cooldown_until: Option<DateTime<Utc>>,
        snapshot: &QueueMetricsSnapshot,
    ) -> Self {
        if target == workers {
            return Self::noop(workers, format!("{reason}; already at {workers} workers"), snapshot);
        }
        Self {
            action: kind(target.abs_diff(workers)),
            from: workers,
            to: target,
            reason,
            cooldown_until,
            snapshot: snapshot.clone(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.action == ScalingAction::NoOp
    }
}

/// How a decision was carried out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    Skipped,
    Applied { workers: usize },
    Failed { error: String },
}

/// Audit entry for one tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalingRecord {
    pub decision: ScalingDecision,
    pub outcome: ApplyOutcome,
}

/// End of a cooldown started at `now`, saturating at the latest representable time.
fn cooldown_until(now: DateTime<Utc>, cooldown: std::time::Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(cooldown)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Decide what to do for one tick.
///
/// `recent` holds previous snapshots, oldest first; scale-down requires the
/// last `scale_down_stable_ticks` readings (this one included) to be low.
/// Time is taken from `snapshot.taken_at`.
pub fn decide(
    config: &ScalingConfig,
    state: ScalerState,
    workers: usize,
    snapshot: &QueueMetricsSnapshot,
    recent: &[QueueMetricsSnapshot],
) -> ScalingDecision {
    let now = snapshot.taken_at;
    let pending = snapshot.total_pending();
    let cooling = state.is_cooling(now);
    let (min, max) = (config.min_workers, config.max_workers);

    if workers < min {
        return ScalingDecision::towards(
            |by| ScalingAction::ScaleUp { by },
            workers,
            min,
            format!("{workers} workers below floor of {min}"),
            None,
            snapshot,
        );
    }
    if workers > max {
        return ScalingDecision::towards(
            |by| ScalingAction::ScaleDown { by },
            workers,
            max,
            format!("{workers} workers above ceiling of {max}"),
            None,
            snapshot,
        );
    }

    if pending > config.emergency_threshold {
        return ScalingDecision::towards(
            |by| ScalingAction::Emergency { by },
            workers,
            max,
            format!(
                "{pending} pending exceeds emergency threshold {}",
                config.emergency_threshold
            ),
            Some(cooldown_until(now, config.scale_up_cooldown())),
            snapshot,
        );
    }

    if pending > config.scale_up_threshold {
        if cooling {
            return ScalingDecision::noop(
                workers,
                format!("{pending} pending but cooling down"),
                snapshot,
            );
        }
        return ScalingDecision::towards(
            |by| ScalingAction::ScaleUp { by },
            workers,
            config.clamp(workers + config.scale_step),
            format!(
                "{pending} pending exceeds scale-up threshold {}",
                config.scale_up_threshold
            ),
            Some(cooldown_until(now, config.scale_up_cooldown())),
            snapshot,
        );
    }

    if pending < config.scale_down_threshold {
        let needed = config.scale_down_stable_ticks.saturating_sub(1);
        let sustained = recent.len() >= needed
            && recent
                .iter()
                .rev()
                .take(needed)
                .all(|s| s.total_pending() < config.scale_down_threshold);
        if !sustained {
            return ScalingDecision::noop(
                workers,
                format!("{pending} pending, waiting for a sustained low"),
                snapshot,
            );
        }
        if cooling {
            return ScalingDecision::noop(
                workers,
                format!("{pending} pending but cooling down"),
                snapshot,
            );
        }
        return ScalingDecision::towards(
            |by| ScalingAction::ScaleDown { by },
            workers,
            config.clamp(workers.saturating_sub(config.scale_step)),
            format!(
                "{pending} pending below scale-down threshold {}",
                config.scale_down_threshold
            ),
            Some(cooldown_until(now, config.scale_down_cooldown())),
            snapshot,
        );
    }

    ScalingDecision::noop(workers, format!("{pending} pending within band"), snapshot)
}

struct ControllerState {
    scaler: ScalerState,
    recent: VecDeque<QueueMetricsSnapshot>,
    history: VecDeque<ScalingRecord>,
}

/// Periodic controller driving a [`ScaleTarget`] from a [`MetricsSource`].
pub struct AutoscalingController {
    config: ScalingConfig,
    source: Arc<dyn MetricsSource>,
    target: Arc<dyn ScaleTarget>,
    state: Mutex<ControllerState>,
}

impl AutoscalingController {
    pub fn new(
        config: ScalingConfig,
        source: Arc<dyn MetricsSource>,
        target: Arc<dyn ScaleTarget>,
    ) -> Self {
        Self {
            config,
            source,
            target,
            state: Mutex::new(ControllerState {
                scaler: ScalerState::Stable,
                recent: VecDeque::new(),
                history: VecDeque::new(),
            }),
        }
    }

    pub fn config(&self) -> &ScalingConfig {
        &self.config
    }

    pub async fn state(&self) -> ScalerState {
        self.state.lock().await.scaler
    }

    /// Recorded ticks, oldest first.
    pub async fn history(&self) -> Vec<ScalingRecord> {
        self.state.lock().await.history.iter().cloned().collect()
    }

    /// Run one control cycle and return its record.
    pub async fn tick(&self) -> ScalingRecord {
        let snapshot = match self.source.snapshot().await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "metrics snapshot failed, skipping tick");
                None
            }
        };
        let workers = self.target.current_workers().await;
        let mut state = self.state.lock().await;

        let record = match snapshot {
            None => {
                let empty = QueueMetricsSnapshot::empty(Utc::now());
                ScalingRecord {
                    decision: ScalingDecision::noop(workers, "metrics unavailable", &empty),
                    outcome: ApplyOutcome::Skipped,
                }
            }
            Some(snapshot) => {
                let now = snapshot.taken_at;
                if !state.scaler.is_cooling(now) {
                    state.scaler = ScalerState::Stable;
                }
                let recent: Vec<QueueMetricsSnapshot> = state.recent.iter().cloned().collect();
                let decision = decide(&self.config, state.scaler, workers, &snapshot, &recent);

                state.recent.push_back(snapshot);
                while state.recent.len() > self.config.scale_down_stable_ticks {
                    state.recent.pop_front();
                }

                let outcome = self.apply(&decision, &mut state).await;
                ScalingRecord { decision, outcome }
            }
        };

        obs::emit_scaling_decision(&record.decision);
        state.history.push_back(record.clone());
        while state.history.len() > self.config.history_len {
            state.history.pop_front();
        }
        drop(state);

        METRICS.flush();
        record
    }

    async fn apply(&self, decision: &ScalingDecision, state: &mut ControllerState) -> ApplyOutcome {
        if decision.is_noop() {
            return ApplyOutcome::Skipped;
        }
        match self.target.apply(decision.to).await {
            Ok(workers) => {
                if let Some(until) = decision.cooldown_until {
                    state.scaler = ScalerState::CoolingDown { until };
                }
                if matches!(decision.action, ScalingAction::ScaleDown { .. }) {
                    state.recent.clear();
                }
                METRICS.inc_scaling_applied();
                debug!(workers, "scaling applied");
                ApplyOutcome::Applied { workers }
            }
            Err(e) => {
                obs::emit_scaling_apply_failed(decision, &e);
                METRICS.inc_scaling_failed();
                ApplyOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Tick every `interval` until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("autoscaling controller stopped");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(pending: usize, at: DateTime<Utc>) -> QueueMetricsSnapshot {
        let mut snap = QueueMetricsSnapshot::empty(at);
        snap.lanes[2].pending_jobs = pending;
        snap
    }

    #[test]
    fn floor_is_restored_regardless_of_cooldown() {
        let config = ScalingConfig::default();
        let now = Utc::now();
        let state = ScalerState::CoolingDown {
            until: now + chrono::Duration::seconds(300),
        };
        let d = decide(&config, state, 0, &snapshot(0, now), &[]);
        assert_eq!(d.action, ScalingAction::ScaleUp { by: 2 });
        assert_eq!(d.to, 2);
        assert_eq!(d.cooldown_until, None);
    }

    #[test]
    fn ceiling_is_enforced() {
        let config = ScalingConfig::default();
        let d = decide(&config, ScalerState::Stable, 12, &snapshot(50, Utc::now()), &[]);
        assert_eq!(d.action, ScalingAction::ScaleDown { by: 4 });
        assert_eq!(d.to, 8);
    }

    #[test]
    fn scale_up_sets_cooldown() {
        let config = ScalingConfig::default();
        let now = Utc::now();
        let d = decide(&config, ScalerState::Stable, 3, &snapshot(30, now), &[]);
        assert_eq!(d.action, ScalingAction::ScaleUp { by: 1 });
        assert_eq!(d.to, 4);
        assert_eq!(d.cooldown_until, Some(now + chrono::Duration::seconds(120)));
    }

    #[test]
    fn out_of_range_cooldown_saturates() {
        let config = ScalingConfig {
            scale_up_cooldown_secs: u64::MAX,
            ..ScalingConfig::default()
        };
        let now = Utc::now();
        let d = decide(&config, ScalerState::Stable, 3, &snapshot(150, now), &[]);
        assert_eq!(d.action, ScalingAction::Emergency { by: 5 });
        assert_eq!(d.cooldown_until, Some(DateTime::<Utc>::MAX_UTC));

        let late = DateTime::<Utc>::MAX_UTC - chrono::Duration::seconds(10);
        let d = decide(&ScalingConfig::default(), ScalerState::Stable, 3, &snapshot(30, late), &[]);
        assert_eq!(d.action, ScalingAction::ScaleUp { by: 1 });
        assert_eq!(d.cooldown_until, Some(DateTime::<Utc>::MAX_UTC));
    }

    #[test]
    fn scale_up_at_ceiling_is_noop() {
        let config = ScalingConfig::default();
        let d = decide(&config, ScalerState::Stable, 8, &snapshot(30, Utc::now()), &[]);
        assert!(d.is_noop());
        assert_eq!(d.to, 8);
    }

    #[test]
    fn cooldown_blocks_regular_scaling() {
        let config = ScalingConfig::default();
        let now = Utc::now();
        let state = ScalerState::CoolingDown {
            until: now + chrono::Duration::seconds(60),
        };
        assert!(decide(&config, state, 3, &snapshot(30, now), &[]).is_noop());

        let later = now + chrono::Duration::seconds(61);
        let d = decide(&config, state, 3, &snapshot(30, later), &[]);
        assert_eq!(d.action, ScalingAction::ScaleUp { by: 1 });
    }

    #[test]
    fn emergency_bypasses_cooldown() {
        let config = ScalingConfig::default();
        let now = Utc::now();
        let state = ScalerState::CoolingDown {
            until: now + chrono::Duration::seconds(100),
        };
        let d = decide(&config, state, 3, &snapshot(150, now), &[]);
        assert_eq!(d.action, ScalingAction::Emergency { by: 5 });
        assert_eq!(d.to, 8);
    }

    #[test]
    fn scale_down_needs_sustained_low() {
        let config = ScalingConfig::default();
        let now = Utc::now();
        let low = snapshot(1, now);

        assert!(decide(&config, ScalerState::Stable, 5, &low, &[]).is_noop());
        assert!(decide(&config, ScalerState::Stable, 5, &low, &[snapshot(2, now)]).is_noop());
        assert!(decide(
            &config,
            ScalerState::Stable,
            5,
            &low,
            &[snapshot(2, now), snapshot(40, now)]
        )
        .is_noop());

        let d = decide(
            &config,
            ScalerState::Stable,
            5,
            &low,
            &[snapshot(2, now), snapshot(0, now)],
        );
        assert_eq!(d.action, ScalingAction::ScaleDown { by: 1 });
        assert_eq!(d.cooldown_until, Some(now + chrono::Duration::seconds(600)));
    }

    #[test]
    fn scale_down_at_floor_is_noop() {
        let config = ScalingConfig::default();
        let now = Utc::now();
        let recent = [snapshot(0, now), snapshot(0, now)];
        let d = decide(&config, ScalerState::Stable, 2, &snapshot(0, now), &recent);
        assert!(d.is_noop());
    }

    #[test]
    fn target_always_within_bounds() {
        let config = ScalingConfig::default();
        let now = Utc::now();
        let recent = [snapshot(0, now), snapshot(0, now)];
        for workers in 0..=12 {
            for pending in [0, 3, 10, 26, 99, 101, 1000] {
                let d = decide(&config, ScalerState::Stable, workers, &snapshot(pending, now), &recent);
                if !d.is_noop() {
                    assert!(
                        (config.min_workers..=config.max_workers).contains(&d.to),
                        "workers={workers} pending={pending} -> {}",
                        d.to
                    );
                }
            }
        }
    }
}
