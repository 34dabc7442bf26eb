//! Per-request lifecycle
//!
//! Received → Decoding → Decoded → ExtractingFeatures → Featurized →
//! Predicting → Completed, with Failed reachable from any non-terminal stage.

use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::trace;
use uuid::Uuid;

use crate::error::ErrorKind;

/// Stage of one inference request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStage {
    Received,
    Decoding,
    Decoded,
    ExtractingFeatures,
    Featurized,
    Predicting,
    Completed,
    Failed(ErrorKind),
}

impl RequestStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStage::Completed | RequestStage::Failed(_))
    }

    /// The only stage reachable by normal progress
    fn successor(self) -> Option<RequestStage> {
        use RequestStage::*;
        match self {
            Received => Some(Decoding),
            Decoding => Some(Decoded),
            Decoded => Some(ExtractingFeatures),
            ExtractingFeatures => Some(Featurized),
            Featurized => Some(Predicting),
            Predicting => Some(Completed),
            Completed | Failed(_) => None,
        }
    }

    pub fn can_transition_to(self, next: RequestStage) -> bool {
        match next {
            RequestStage::Failed(_) => !self.is_terminal(),
            other => self.successor() == Some(other),
        }
    }
}

/// Rejected stage change
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Illegal request transition {from:?} → {to:?}")]
pub struct IllegalTransition {
    pub from: RequestStage,
    pub to: RequestStage,
}

/// Wall-clock time spent in each working stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StageTimings {
    pub decode: f64,
    pub features: f64,
    pub predict: f64,
    pub total: f64,
}

/// One request as it moves through the pipeline
#[derive(Debug)]
pub struct InferenceRequest {
    request_id: Uuid,
    stage: RequestStage,
    received_at: Instant,
    stage_started_at: Instant,
    timings: StageTimings,
}

impl InferenceRequest {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            request_id: Uuid::new_v4(),
            stage: RequestStage::Received,
            received_at: now,
            stage_started_at: now,
            timings: StageTimings::default(),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn stage(&self) -> RequestStage {
        self.stage
    }

    /// Move to `next`, recording how long the finished working stage took
    pub fn transition_to(&mut self, next: RequestStage) -> Result<(), IllegalTransition> {
        if !self.stage.can_transition_to(next) {
            return Err(IllegalTransition {
                from: self.stage,
                to: next,
            });
        }

        let now = Instant::now();
        let elapsed = millis(now - self.stage_started_at);
        match self.stage {
            RequestStage::Decoding => self.timings.decode = elapsed,
            RequestStage::ExtractingFeatures => self.timings.features = elapsed,
            RequestStage::Predicting => self.timings.predict = elapsed,
            _ => {}
        }
        if next.is_terminal() {
            self.timings.total = millis(now - self.received_at);
        }

        trace!(request_id = %self.request_id, from = ?self.stage, to = ?next, "Stage transition");
        self.stage = next;
        self.stage_started_at = now;
        Ok(())
    }

    pub fn timings(&self) -> StageTimings {
        self.timings
    }
}

impl Default for InferenceRequest {
    fn default() -> Self {
        Self::new()
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
