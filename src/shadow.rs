//! Dual-path routing for staged rollout.
//!
//! [`ShadowComparator`] wraps two routers. In `Shadow` mode both run on every
//! utterance, the legacy decision is returned unchanged and the pair is
//! recorded in the session's routing log. A failing or panicking candidate
//! is recorded, never propagated. In `Active` mode the candidate decides and
//! the legacy router is the error fallback.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::config::{RolloutMode, ShadowConfig};
use crate::error::Result;
use crate::executor::truncate_chars;
use crate::router::{Router, RoutingDecision};
use crate::session::{RoutingLog, RoutingLogEntry, SessionContext};
use crate::types::Utterance;

/// Outcome of one guarded candidate run.
enum Attempt {
    Decided(RoutingDecision),
    Failed(String),
}

pub struct ShadowComparator {
    legacy: Arc<dyn Router>,
    candidate: Arc<dyn Router>,
    mode: Mutex<RolloutMode>,
    preview_chars: usize,
}

impl ShadowComparator {
    pub fn new(legacy: Arc<dyn Router>, candidate: Arc<dyn Router>, config: &ShadowConfig) -> Self {
        Self {
            legacy,
            candidate,
            mode: Mutex::new(config.mode),
            preview_chars: config.message_preview_chars,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RolloutMode> {
        self.mode.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn mode(&self) -> RolloutMode {
        *self.lock()
    }

    pub fn set_mode(&self, mode: RolloutMode) {
        let mut current = self.lock();
        if *current != mode {
            info!(from = ?*current, to = ?mode, "Routing rollout mode changed");
            *current = mode;
        }
    }

    pub fn routing_log<'a>(&self, session: &'a SessionContext) -> &'a RoutingLog {
        &session.routing_log
    }

    pub fn clear_routing_log(&self, session: &mut SessionContext) {
        session.routing_log.clear();
    }

    /// Fraction of logged comparisons that agreed; `None` before the first.
    pub fn agreement_rate(&self, session: &SessionContext) -> Option<f32> {
        session.routing_log.agreement_rate()
    }

    /// Run the candidate, turning errors and panics into `Failed`.
    async fn attempt(&self, utterance: &Utterance, session: &mut SessionContext) -> Attempt {
        let run = AssertUnwindSafe(self.candidate.route(utterance, session)).catch_unwind();
        match run.await {
            Ok(Ok(decision)) => Attempt::Decided(decision),
            Ok(Err(e)) => {
                error!(router = self.candidate.name(), error = %e, "Candidate router failed");
                Attempt::Failed(e.to_string())
            }
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(router = self.candidate.name(), panic = %detail, "Candidate router panicked");
                Attempt::Failed(format!("panic: {}", detail))
            }
        }
    }

    fn record(
        &self,
        session: &mut SessionContext,
        utterance: &Utterance,
        legacy: &RoutingDecision,
        attempt: &Attempt,
    ) {
        let entry = match attempt {
            Attempt::Decided(candidate) => RoutingLogEntry {
                timestamp: Utc::now(),
                message_preview: truncate_chars(&utterance.text, self.preview_chars),
                legacy_route: legacy.route.tag().to_string(),
                new_route: candidate.route.tag().to_string(),
                new_handler: Some(candidate.handler.name().to_string()),
                new_confidence: Some(candidate.confidence),
                agreement: agree(legacy, candidate),
                error: None,
            },
            Attempt::Failed(e) => RoutingLogEntry {
                timestamp: Utc::now(),
                message_preview: truncate_chars(&utterance.text, self.preview_chars),
                legacy_route: legacy.route.tag().to_string(),
                new_route: "error".to_string(),
                new_handler: None,
                new_confidence: None,
                agreement: false,
                error: Some(e.clone()),
            },
        };
        if entry.agreement {
            debug!(route = %entry.legacy_route, "Shadow routing agreed");
        } else {
            info!(
                legacy = %entry.legacy_route,
                candidate = %entry.new_route,
                "Shadow routing diverged"
            );
        }
        session.routing_log.push(entry);
    }
}

/// Two decisions agree when they pick the same route, or when they carry the
/// same sequence of (operation, object type).
pub fn agree(legacy: &RoutingDecision, candidate: &RoutingDecision) -> bool {
    if legacy.route == candidate.route {
        return true;
    }
    let shape = |d: &RoutingDecision| {
        d.operations()
            .iter()
            .map(|op| (op.kind, op.object_type))
            .collect::<Vec<_>>()
    };
    let (a, b) = (shape(legacy), shape(candidate));
    !a.is_empty() && a == b
}

#[async_trait]
impl Router for ShadowComparator {
    fn name(&self) -> &'static str {
        "shadow"
    }

    async fn route(
        &self,
        utterance: &Utterance,
        session: &mut SessionContext,
    ) -> Result<RoutingDecision> {
        match self.mode() {
            RolloutMode::Disabled => self.candidate.route(utterance, session).await,

            RolloutMode::Shadow => {
                // the candidate must not see or leave anything the legacy path depends on
                let mut scratch = session.clone();
                let legacy = self.legacy.route(utterance, session).await?;
                let attempt = self.attempt(utterance, &mut scratch).await;
                self.record(session, utterance, &legacy, &attempt);
                Ok(legacy)
            }

            RolloutMode::Active => match self.attempt(utterance, session).await {
                Attempt::Decided(decision) => Ok(decision),
                Attempt::Failed(reason) => {
                    warn!(reason = %reason, "Falling back to legacy router");
                    self.legacy.route(utterance, session).await.map_err(|e| {
                        error!(error = %e, "Legacy fallback failed as well");
                        e
                    })
                }
            },
        }
    }
}
