use std::ops::Range;

use log::debug;

/// Which timestamp counts as the last activity for the idle debounce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdleFrom {
    /// Any contact sample, including ones dropped by fidelity gating.
    #[default]
    Contact,
    /// Only samples that became points.
    Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Manual,
    Auto,
}

#[derive(Debug)]
pub struct PredictionScheduler {
    last_submitted: usize,
    last_activity: f64,
    auto_delay: f64,
}

impl PredictionScheduler {
    pub fn new(auto_delay: f64, now: f64) -> Self {
        Self {
            last_submitted: 0,
            last_activity: now,
            auto_delay,
        }
    }

    pub fn set_auto_delay(&mut self, auto_delay: f64) {
        self.auto_delay = auto_delay;
    }

    pub fn auto_enabled(&self) -> bool {
        self.auto_delay > 0.0
    }

    pub fn last_submitted(&self) -> usize {
        self.last_submitted
    }

    pub fn last_activity(&self) -> f64 {
        self.last_activity
    }

    pub fn note_activity(&mut self, now: f64) {
        self.last_activity = now;
    }

    /// Explicit request: everything not yet submitted, if anything.
    pub fn manual(&mut self, stroke_count: usize) -> Option<Range<usize>> {
        self.take(stroke_count, Trigger::Manual)
    }

    /// Idle debounce, evaluated once per tick.
    pub fn tick(&mut self, now: f64, stroke_count: usize) -> Option<Range<usize>> {
        if !self.auto_enabled() || self.last_submitted >= stroke_count {
            return None;
        }
        if now - self.last_activity < self.auto_delay {
            return None;
        }
        let range = self.take(stroke_count, Trigger::Auto)?;
        self.last_activity = now;
        Some(range)
    }

    pub fn reset(&mut self, now: f64) {
        self.last_submitted = 0;
        self.last_activity = now;
    }

    fn take(&mut self, stroke_count: usize, trigger: Trigger) -> Option<Range<usize>> {
        if self.last_submitted >= stroke_count {
            return None;
        }
        let range = self.last_submitted..stroke_count;
        debug!("{trigger:?} dispatch over strokes {range:?}");
        self.last_submitted = stroke_count;
        Some(range)
    }
}
