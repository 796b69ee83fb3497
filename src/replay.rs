use anyhow::{Result, anyhow};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::accumulator::ContactSample;
use crate::config::Profile;
use crate::contact::{Collision, ContactSource, PenTipSource, ScreenRaySource};
use crate::geometry::{Pos3, Ray, Vec3};
use crate::recognition::RecognitionOutcome;
use crate::surface::{
    CaptureRequest, RecognitionReply, ReplyDisposition, SurfaceSettings, SurfaceState,
    WritingSurface,
};

/// Recorded event script. Every event carries a `kind` and a timestamp `t`
/// in seconds that never goes backwards. The surface is ticked at each
/// event's time before the event applies, as the daemon ticks between input
/// batches.
#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    pub events: Vec<ScriptEvent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScriptEvent {
    /// Raw world-space sample.
    Contact {
        t: f64,
        point: [f32; 3],
        normal: [f32; 3],
        up: [f32; 3],
    },
    /// Collider touching the surface.
    Tip {
        t: f64,
        collider: u32,
        point: [f32; 3],
    },
    TipEnd {
        t: f64,
        collider: u32,
    },
    /// Normalized pointer position over the surface rectangle.
    Pointer {
        t: f64,
        x: f32,
        y: f32,
    },
    PointerUp {
        t: f64,
    },
    End {
        t: f64,
    },
    Predict {
        t: f64,
    },
    Tick {
        t: f64,
    },
    Clear {
        t: f64,
    },
    Invert {
        t: f64,
    },
    /// Classifier answer; without `id` it answers the latest request.
    Result {
        t: f64,
        #[serde(default)]
        id: Option<u64>,
        confidences: Vec<f32>,
    },
}

impl ScriptEvent {
    pub fn time(&self) -> f64 {
        match self {
            ScriptEvent::Contact { t, .. }
            | ScriptEvent::Tip { t, .. }
            | ScriptEvent::TipEnd { t, .. }
            | ScriptEvent::Pointer { t, .. }
            | ScriptEvent::PointerUp { t }
            | ScriptEvent::End { t }
            | ScriptEvent::Predict { t }
            | ScriptEvent::Tick { t }
            | ScriptEvent::Clear { t }
            | ScriptEvent::Invert { t }
            | ScriptEvent::Result { t, .. } => *t,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ReplayOutcome {
    Appended {
        id: u64,
        outcome: RecognitionOutcome,
    },
    Stale {
        id: u64,
    },
    Rejected {
        id: u64,
        error: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub requests: Vec<CaptureRequest>,
    pub outcomes: Vec<ReplayOutcome>,
    pub strokes: usize,
    pub last_submitted: usize,
    pub generation: u64,
    pub text: String,
}

impl Script {
    pub fn parse(txt: &str) -> Result<Self> {
        let script: Script = serde_json::from_str(txt)?;
        let mut last = f64::NEG_INFINITY;
        for (i, ev) in script.events.iter().enumerate() {
            let t = ev.time();
            if !t.is_finite() || t < last {
                return Err(anyhow!("event {i}: time {t} goes backwards or is not finite"));
            }
            last = t;
        }
        Ok(script)
    }
}

struct Replay {
    surface: WritingSurface,
    tip: PenTipSource,
    screen: ScreenRaySource,
    tip_down: bool,
    pointer: Option<Ray>,
    report: ReplayReport,
}

impl Replay {
    fn new(profile: &Profile) -> Result<Self> {
        let settings = SurfaceSettings::from_profile(profile)?;
        let pose = profile.surface.pose();
        Ok(Self {
            surface: WritingSurface::new(&settings, 0.0),
            tip: PenTipSource::new(pose, profile.surface.pen_tip),
            screen: ScreenRaySource::new(pose, profile.surface.half_extents),
            tip_down: false,
            pointer: None,
            report: ReplayReport {
                requests: Vec::new(),
                outcomes: Vec::new(),
                strokes: 0,
                last_submitted: 0,
                generation: 0,
                text: String::new(),
            },
        })
    }

    fn record(&mut self, request: Option<CaptureRequest>) {
        if let Some(req) = request {
            self.report.requests.push(req);
        }
    }

    fn step(&mut self, ev: &ScriptEvent) -> Result<()> {
        let now = ev.time();
        let req = self.surface.tick(now);
        self.record(req);

        match ev {
            ScriptEvent::Contact {
                point, normal, up, ..
            } => {
                let sample = ContactSample {
                    point: Pos3::from(*point),
                    normal: Vec3::from(*normal),
                    up: Vec3::from(*up),
                };
                self.surface.begin_or_extend(&sample, now);
            }
            ScriptEvent::Tip {
                collider, point, ..
            } => {
                let contact = Collision {
                    collider: *collider,
                    point: Pos3::from(*point),
                };
                if self.tip_down {
                    self.tip.on_continue(&contact, &mut self.surface, now);
                } else {
                    self.tip.on_begin(&contact, &mut self.surface, now);
                    self.tip_down = self.surface.state() == SurfaceState::Writing;
                }
            }
            ScriptEvent::TipEnd { collider, .. } => {
                let contact = Collision {
                    collider: *collider,
                    point: Pos3::origin(),
                };
                self.tip.on_end(&contact, &mut self.surface);
                if self.surface.state() == SurfaceState::Idle {
                    self.tip_down = false;
                }
            }
            ScriptEvent::Pointer { x, y, .. } => {
                let down = self.pointer.is_some();
                self.pointer = self.screen.pointer_ray(*x, *y);
                if let Some(ray) = self.pointer.as_ref() {
                    if down {
                        self.screen.on_continue(ray, &mut self.surface, now);
                    } else {
                        self.screen.on_begin(ray, &mut self.surface, now);
                    }
                }
            }
            ScriptEvent::PointerUp { .. } => match self.pointer.take() {
                Some(ray) => self.screen.on_end(&ray, &mut self.surface),
                None => self.surface.end_contact(),
            },
            ScriptEvent::End { .. } => self.surface.end_contact(),
            ScriptEvent::Predict { .. } => {
                let req = self.surface.predict_now(now);
                if req.is_none() {
                    debug!("t={now}: predict with nothing new");
                }
                self.record(req);
            }
            ScriptEvent::Tick { .. } => {}
            ScriptEvent::Clear { .. } => {
                self.surface.clear(now);
                self.pointer = None;
                self.tip_down = false;
            }
            ScriptEvent::Invert { .. } => {
                self.surface.toggle_invert();
            }
            ScriptEvent::Result {
                id, confidences, ..
            } => {
                let target = match id {
                    Some(id) => self.report.requests.iter().find(|r| r.id == *id),
                    None => self.report.requests.last(),
                }
                .ok_or_else(|| anyhow!("t={now}: result with no matching request"))?;
                let reply = RecognitionReply {
                    id: target.id,
                    generation: target.generation,
                    confidences: confidences.clone(),
                };
                let outcome = match self.surface.on_reply(&reply) {
                    Ok(ReplyDisposition::Appended(outcome)) => ReplayOutcome::Appended {
                        id: reply.id,
                        outcome,
                    },
                    Ok(ReplyDisposition::Stale) => ReplayOutcome::Stale { id: reply.id },
                    Err(e) => ReplayOutcome::Rejected {
                        id: reply.id,
                        error: e.to_string(),
                    },
                };
                self.report.outcomes.push(outcome);
            }
        }
        Ok(())
    }

    fn finish(mut self) -> ReplayReport {
        self.report.strokes = self.surface.strokes().len();
        self.report.last_submitted = self.surface.last_submitted();
        self.report.generation = self.surface.generation();
        self.report.text = self.surface.text().to_string();
        self.report
    }
}

pub fn run_script(script: &Script, profile: &Profile) -> Result<ReplayReport> {
    let mut replay = Replay::new(profile)?;
    for ev in &script.events {
        replay.step(ev)?;
    }
    let report = replay.finish();
    info!(
        "replay: {} requests, {} results, text '{}'",
        report.requests.len(),
        report.outcomes.len(),
        report.text
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> Profile {
        Profile::parse(include_str!("../profiles/default.toml")).unwrap()
    }

    fn run(json: &str) -> ReplayReport {
        run_script(&Script::parse(json).unwrap(), &profile()).unwrap()
    }

    fn hot(index: usize) -> String {
        let mut v = vec![0.0f32; 62];
        v[index] = 0.9;
        serde_json::to_string(&v).unwrap()
    }

    #[test]
    fn pointer_strokes_frame_covers_outlier() {
        // square of side 0.2 in pointer space, then one point 0.4 to its side
        let report = run(r#"{"events": [
            {"kind": "pointer", "t": 0.0, "x": 0.3, "y": 0.3},
            {"kind": "pointer", "t": 0.1, "x": 0.5, "y": 0.3},
            {"kind": "pointer", "t": 0.2, "x": 0.5, "y": 0.5},
            {"kind": "pointer", "t": 0.3, "x": 0.3, "y": 0.5},
            {"kind": "pointer_up", "t": 0.4},
            {"kind": "pointer", "t": 0.5, "x": 0.9, "y": 0.5},
            {"kind": "pointer_up", "t": 0.6},
            {"kind": "predict", "t": 1.0}
        ]}"#);
        assert_eq!(report.strokes, 2);
        assert_eq!(report.last_submitted, 2);
        assert_eq!(report.requests.len(), 1);
        let req = &report.requests[0];
        assert_eq!(req.strokes[0].points.len(), 4);
        assert!((req.frame.size - 0.6).abs() < 1e-4, "size {}", req.frame.size);
    }

    #[test]
    fn results_build_text_and_clear_drops_late_reply() {
        let json = format!(
            r#"{{"events": [
                {{"kind": "contact", "t": 0.0, "point": [0, 0, 0], "normal": [0, 0, -1], "up": [0, 1, 0]}},
                {{"kind": "end", "t": 0.1}},
                {{"kind": "predict", "t": 0.2}},
                {{"kind": "result", "t": 0.3, "confidences": {a}}},
                {{"kind": "contact", "t": 0.4, "point": [1, 0, 0], "normal": [0, 0, -1], "up": [0, 1, 0]}},
                {{"kind": "end", "t": 0.5}},
                {{"kind": "predict", "t": 0.6}},
                {{"kind": "clear", "t": 0.7}},
                {{"kind": "result", "t": 0.8, "confidences": {b}}}
            ]}}"#,
            a = hot(10),
            b = hot(11)
        );
        let report = run(&json);
        assert_eq!(report.requests.len(), 2);
        assert!(matches!(
            report.outcomes[0],
            ReplayOutcome::Appended { id: 1, outcome } if outcome.character == 'a'
        ));
        assert!(matches!(report.outcomes[1], ReplayOutcome::Stale { id: 2 }));
        assert_eq!(report.text, "");
        assert_eq!(report.strokes, 0);
        assert_eq!(report.last_submitted, 0);
        assert_eq!(report.generation, 1);
    }

    #[test]
    fn tip_contacts_only_from_pen_collider() {
        let report = run(r#"{"events": [
            {"kind": "tip", "t": 0.0, "collider": 7, "point": [0.0, 0.0, 0.0]},
            {"kind": "tip", "t": 0.1, "collider": 1, "point": [0.0, 0.0, 0.02]},
            {"kind": "tip", "t": 0.2, "collider": 1, "point": [0.1, 0.0, -0.02]},
            {"kind": "tip_end", "t": 0.3, "collider": 7},
            {"kind": "tip", "t": 0.4, "collider": 1, "point": [0.2, 0.0, 0.0]},
            {"kind": "tip_end", "t": 0.5, "collider": 1},
            {"kind": "predict", "t": 0.6}
        ]}"#);
        assert_eq!(report.strokes, 1);
        let pts = &report.requests[0].strokes[0].points;
        assert_eq!(pts.len(), 3);
        // projected onto the page, then lifted by z_offset towards the writer
        assert!(pts.iter().all(|p| (p[2] - 0.01).abs() < 1e-5));
    }

    #[test]
    fn auto_predict_fires_once_after_idle() {
        let fast = include_str!("../profiles/default.toml")
            .replace("predict_delay = -1.0", "predict_delay = 2.0");
        let profile = Profile::parse(&fast).unwrap();
        let script = Script::parse(
            r#"{"events": [
                {"kind": "contact", "t": 0.0, "point": [0, 0, 0], "normal": [0, 0, -1], "up": [0, 1, 0]},
                {"kind": "end", "t": 0.1},
                {"kind": "tick", "t": 1.9},
                {"kind": "tick", "t": 2.1},
                {"kind": "tick", "t": 5.0}
            ]}"#,
        )
        .unwrap();
        let report = run_script(&script, &profile).unwrap();
        assert_eq!(report.requests.len(), 1);
        assert_eq!(report.requests[0].trigger, "auto");
    }

    #[test]
    fn rejects_time_going_backwards() {
        let err = Script::parse(
            r#"{"events": [{"kind": "tick", "t": 1.0}, {"kind": "tick", "t": 0.5}]}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn result_without_request_is_an_error() {
        let script =
            Script::parse(r#"{"events": [{"kind": "result", "t": 0.0, "confidences": [1.0]}]}"#)
                .unwrap();
        assert!(run_script(&script, &profile()).is_err());
    }
}
