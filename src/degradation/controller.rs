use std::{collections::VecDeque, time::Duration};

use chrono::Utc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::DispatchError;

use super::{
    config::DegradationConfig,
    state::{DegradationMode, DegradationState, Transition},
};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Backoff/degradation state machine.
///
/// `NORMAL → THROTTLED → PAUSED` on sustained breaches, with `OFFLOADED`
/// taking the place of `PAUSED` while a remote runtime is reachable. Any
/// non-normal mode returns to `NORMAL` after `recovery_window` healthy
/// snapshots in a row.
pub struct DegradationController {
    config: DegradationConfig,
    state: DegradationState,
    publisher: watch::Sender<DegradationState>,
    transitions: VecDeque<Transition>,
}

impl DegradationController {
    pub fn new(config: DegradationConfig) -> Self {
        let state = DegradationState::new();
        let (publisher, _) = watch::channel(state.clone());
        Self {
            transitions: VecDeque::with_capacity(config.transition_log_capacity.max(1)),
            config,
            state,
            publisher,
        }
    }

    pub fn state(&self) -> &DegradationState {
        &self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<DegradationState> {
        self.publisher.subscribe()
    }

    pub fn gate(&self) -> AdmissionGate {
        AdmissionGate {
            receiver: self.subscribe(),
            backoff: Duration::from_millis(self.config.backoff_ms),
        }
    }

    pub fn recent_transitions(&self) -> Vec<Transition> {
        self.transitions.iter().cloned().collect()
    }

    /// Feed one pressure reading. Returns the transition it caused, if any.
    pub fn observe(&mut self, pressure: f64, remote_available: bool) -> Option<Transition> {
        let mode = self.state.current_mode;

        if mode == DegradationMode::Offloaded && !remote_available {
            self.state.consecutive_breaches = 0;
            self.state.consecutive_healthy = 0;
            return Some(self.transition(
                DegradationMode::Throttled,
                pressure,
                "remote runtime no longer reachable",
            ));
        }

        let transition = if pressure > self.config.warning_threshold {
            self.state.consecutive_healthy = 0;
            self.state.consecutive_breaches += 1;

            if self.state.consecutive_breaches >= self.config.breach_window {
                self.state.consecutive_breaches = 0;
                self.escalation_target(mode, remote_available).map(|next| {
                    let reason = format!(
                        "{} consecutive snapshots above {:.2}",
                        self.config.breach_window, self.config.warning_threshold
                    );
                    self.transition(next, pressure, &reason)
                })
            } else {
                None
            }
        } else {
            self.state.consecutive_breaches = 0;
            if mode.is_normal() {
                self.state.consecutive_healthy = 0;
                None
            } else {
                self.state.consecutive_healthy += 1;
                if self.state.consecutive_healthy >= self.config.recovery_window {
                    self.state.consecutive_healthy = 0;
                    let reason = format!(
                        "{} consecutive healthy snapshots",
                        self.config.recovery_window
                    );
                    Some(self.transition(DegradationMode::Normal, pressure, &reason))
                } else {
                    None
                }
            }
        };

        if transition.is_none() {
            self.publisher.send_replace(self.state.clone());
        }
        transition
    }

    fn escalation_target(
        &self,
        mode: DegradationMode,
        remote_available: bool,
    ) -> Option<DegradationMode> {
        let can_offload = self.config.offload_enabled && remote_available;
        match mode {
            DegradationMode::Normal => Some(DegradationMode::Throttled),
            DegradationMode::Throttled if can_offload => Some(DegradationMode::Offloaded),
            DegradationMode::Throttled => Some(DegradationMode::Paused),
            DegradationMode::Paused if can_offload => Some(DegradationMode::Offloaded),
            DegradationMode::Paused | DegradationMode::Offloaded => None,
        }
    }

    fn transition(&mut self, to: DegradationMode, pressure: f64, reason: &str) -> Transition {
        let record = Transition {
            from: self.state.current_mode,
            to,
            at: Utc::now(),
            pressure,
            reason: reason.to_string(),
        };

        if to.is_normal() {
            log_info!(
                "degradation {} -> {} ({reason})",
                record.from.as_str(),
                to.as_str()
            );
        } else {
            log_warn!(
                "degradation {} -> {} at pressure {:.2} ({reason})",
                record.from.as_str(),
                to.as_str(),
                pressure
            );
        }

        self.state.current_mode = to;
        self.state.last_transition_at = Some(record.at);

        if self.transitions.len() >= self.config.transition_log_capacity.max(1) {
            self.transitions.pop_front();
        }
        self.transitions.push_back(record.clone());
        self.publisher.send_replace(self.state.clone());

        record
    }
}

/// Read side used by the dispatcher to hold admission while paused.
#[derive(Clone)]
pub struct AdmissionGate {
    receiver: watch::Receiver<DegradationState>,
    backoff: Duration,
}

impl AdmissionGate {
    pub fn current(&self) -> DegradationState {
        self.receiver.borrow().clone()
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Wait out `PAUSED` in `backoff` steps.
    ///
    /// Rejects immediately when the caller set `no_wait`, or when the next
    /// backoff step would exceed `max_wait`.
    pub async fn admit(
        &self,
        job_id: &str,
        no_wait: bool,
        max_wait: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<(), DispatchError> {
        let mut waited = Duration::ZERO;

        loop {
            if self.receiver.borrow().current_mode != DegradationMode::Paused {
                return Ok(());
            }

            let over_budget = max_wait
                .map(|limit| waited + self.backoff > limit)
                .unwrap_or(false);
            if no_wait || over_budget {
                log_warn!("job {job_id} rejected: engine paused");
                return Err(DispatchError::DegradedRejection {
                    backoff: self.backoff,
                });
            }

            log_info!("job {job_id} held for {:?} while paused", self.backoff);
            tokio::select! {
                _ = tokio::time::sleep(self.backoff) => {}
                _ = cancel.cancelled() => {
                    return Err(DispatchError::Cancelled { job_id: job_id.to_string() });
                }
            }
            waited += self.backoff;
        }
    }
}
