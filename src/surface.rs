use std::collections::HashMap;
use std::ops::Range;

use anyhow::Result;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::accumulator::{ContactSample, Sampled, StrokeAccumulator};
use crate::config::Profile;
use crate::error::InkError;
use crate::recognition::{Alphabet, RecognitionOutcome, ResultAggregator};
use crate::region::{CameraPose, CaptureFrame, RegionComputer, mark_capture_set};
use crate::scheduler::{IdleFrom, PredictionScheduler, Trigger};
use crate::stroke::{CapturedStroke, Stroke};

#[derive(Debug, Clone)]
pub struct SurfaceSettings {
    pub line_fidelity: f64,
    pub z_offset: f32,
    pub bound_size_factor: f32,
    pub predict_delay: f64,
    pub idle_from: IdleFrom,
    /// Seconds a dispatched request may stay unanswered.
    pub timeout: f64,
    pub invert: bool,
    pub alphabet: Alphabet,
}

impl SurfaceSettings {
    pub fn from_profile(p: &Profile) -> Result<Self> {
        Ok(Self {
            line_fidelity: p.writing.line_fidelity,
            z_offset: p.writing.z_offset,
            bound_size_factor: p.writing.bound_size_factor,
            predict_delay: p.writing.predict_delay,
            idle_from: p.writing.idle_from,
            timeout: p.recognition.timeout_ms as f64 / 1000.0,
            invert: p.recognition.invert,
            alphabet: p.alphabet()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceState {
    Idle,
    Writing,
}

/// Everything the capture backend needs to image and classify one batch of
/// strokes.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureRequest {
    pub id: u64,
    pub generation: u64,
    pub trigger: &'static str,
    pub start: usize,
    pub end: usize,
    pub frame: CaptureFrame,
    pub camera: CameraPose,
    pub invert: bool,
    pub strokes: Vec<CapturedStroke>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecognitionReply {
    pub id: u64,
    pub generation: u64,
    pub confidences: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReplyDisposition {
    Appended(RecognitionOutcome),
    /// Reply for a cleared generation, or for a request that already expired.
    Stale,
}

#[derive(Debug, Clone)]
struct Pending {
    range: Range<usize>,
    deadline: f64,
}

#[derive(Debug)]
pub struct WritingSurface {
    strokes: Vec<Stroke>,
    accumulator: StrokeAccumulator,
    scheduler: PredictionScheduler,
    region: RegionComputer,
    aggregator: ResultAggregator,
    alphabet: Alphabet,
    idle_from: IdleFrom,
    timeout: f64,
    invert: bool,
    generation: u64,
    next_id: u64,
    pending: HashMap<u64, Pending>,
}

impl WritingSurface {
    pub fn new(settings: &SurfaceSettings, now: f64) -> Self {
        Self {
            strokes: Vec::new(),
            accumulator: StrokeAccumulator::new(settings.line_fidelity, settings.z_offset),
            scheduler: PredictionScheduler::new(settings.predict_delay, now),
            region: RegionComputer::new(settings.bound_size_factor),
            aggregator: ResultAggregator::new(),
            alphabet: settings.alphabet.clone(),
            idle_from: settings.idle_from,
            timeout: settings.timeout,
            invert: settings.invert,
            generation: 0,
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Takes new settings without touching strokes or text.
    pub fn apply(&mut self, settings: &SurfaceSettings) {
        self.accumulator
            .set_fidelity(settings.line_fidelity, settings.z_offset);
        self.scheduler.set_auto_delay(settings.predict_delay);
        self.region = RegionComputer::new(settings.bound_size_factor);
        self.alphabet = settings.alphabet.clone();
        self.idle_from = settings.idle_from;
        self.timeout = settings.timeout;
        self.invert = settings.invert;
    }

    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn last_submitted(&self) -> usize {
        self.scheduler.last_submitted()
    }

    pub fn text(&self) -> &str {
        self.aggregator.text()
    }

    pub fn last_outcome(&self) -> Option<&RecognitionOutcome> {
        self.aggregator.last()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn state(&self) -> SurfaceState {
        if self.accumulator.is_writing() {
            SurfaceState::Writing
        } else {
            SurfaceState::Idle
        }
    }

    pub fn begin_or_extend(&mut self, sample: &ContactSample, now: f64) {
        let sampled = self
            .accumulator
            .begin_or_extend(sample, now, self.strokes.len());
        if self.idle_from == IdleFrom::Contact || sampled != Sampled::Gated {
            self.scheduler.note_activity(now);
        }
    }

    pub fn end_contact(&mut self) {
        if let Some(stroke) = self.accumulator.end() {
            self.strokes.push(stroke);
        }
    }

    /// Explicit recognition request. `None` when nothing new was drawn.
    pub fn predict_now(&mut self, now: f64) -> Option<CaptureRequest> {
        let range = self.scheduler.manual(self.strokes.len())?;
        Some(self.dispatch(range, Trigger::Manual, now))
    }

    /// One scheduler step: expires overdue requests, then runs the idle
    /// debounce.
    pub fn tick(&mut self, now: f64) -> Option<CaptureRequest> {
        self.expire(now);
        let range = self.scheduler.tick(now, self.strokes.len())?;
        Some(self.dispatch(range, Trigger::Auto, now))
    }

    /// Drops all strokes, the open stroke, the text and every in-flight
    /// request. Replies to earlier dispatches are ignored from here on.
    pub fn clear(&mut self, now: f64) {
        self.strokes.clear();
        self.accumulator.discard();
        self.aggregator.clear();
        self.scheduler.reset(now);
        self.pending.clear();
        self.generation += 1;
        info!("surface cleared (generation {})", self.generation);
    }

    pub fn toggle_invert(&mut self) -> bool {
        self.invert = !self.invert;
        info!("capture invert: {}", self.invert);
        self.invert
    }

    pub fn on_reply(&mut self, reply: &RecognitionReply) -> Result<ReplyDisposition, InkError> {
        if reply.generation != self.generation {
            debug!(
                "dropping reply {} from generation {} (now {})",
                reply.id, reply.generation, self.generation
            );
            return Ok(ReplyDisposition::Stale);
        }
        let Some(pending) = self.pending.remove(&reply.id) else {
            debug!("dropping reply {} with no pending request", reply.id);
            return Ok(ReplyDisposition::Stale);
        };
        debug!("reply {} covers strokes {:?}", reply.id, pending.range);
        let outcome = self
            .aggregator
            .on_recognized(&reply.confidences, &self.alphabet)?;
        Ok(ReplyDisposition::Appended(outcome))
    }

    pub fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "state": self.state(),
            "strokes": self.strokes.len(),
            "open_points": self.accumulator.open_stroke().map(Stroke::len),
            "last_contact": self.accumulator.last_contact(),
            "last_point": self.accumulator.last_point(),
            "idle_since": self.scheduler.last_activity(),
            "auto_predict": self.scheduler.auto_enabled(),
            "last_submitted": self.last_submitted(),
            "generation": self.generation,
            "pending": self.pending_count(),
            "alphabet_size": self.alphabet.len(),
            "invert": self.invert,
            "text": self.text(),
            "last": self.last_outcome(),
        })
    }

    fn dispatch(&mut self, range: Range<usize>, trigger: Trigger, now: f64) -> CaptureRequest {
        mark_capture_set(&mut self.strokes, range.start);
        let frame = self.region.compute(&self.strokes, range.start);
        let strokes = self.strokes[range.clone()]
            .iter()
            .map(Stroke::captured)
            .collect();

        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(
            id,
            Pending {
                range: range.clone(),
                deadline: now + self.timeout,
            },
        );
        info!(
            "request {id}: strokes {}..{} size {:.4} ({trigger:?})",
            range.start, range.end, frame.size
        );

        CaptureRequest {
            id,
            generation: self.generation,
            trigger: match trigger {
                Trigger::Manual => "manual",
                Trigger::Auto => "auto",
            },
            start: range.start,
            end: range.end,
            camera: frame.camera_pose(),
            frame,
            invert: self.invert,
            strokes,
        }
    }

    fn expire(&mut self, now: f64) {
        self.pending.retain(|id, p| {
            let alive = now < p.deadline;
            if !alive {
                warn!("request {id} for strokes {:?} timed out", p.range);
            }
            alive
        });
    }
}
