use anyhow::Result;
use log::{debug, error, info, warn};
use std::{
    sync::mpsc::{Receiver, Sender, TryRecvError},
    thread,
    time::{Duration, Instant},
};

use evdev::{AbsoluteAxisCode, Device, EventType, KeyCode, SynchronizationCode};

use crate::backend::{self, CaptureBackend};
use crate::config::Profile;
use crate::contact::{ContactSource, ScreenRaySource};
use crate::geometry::Ray;
use crate::input;
use crate::surface::{
    CaptureRequest, RecognitionReply, ReplyDisposition, SurfaceSettings, WritingSurface,
};
use crate::tracker::{PenEvent, PenTracker};

/// Requests from the IPC side, executed on the surface thread.
pub enum SurfaceCommand {
    Clear,
    PredictNow,
    ToggleInvert,
    Status(Sender<serde_json::Value>),
    UpdateProfile(Box<Profile>),
}

struct PenDevice {
    dev: Device,
    tracker: PenTracker,
    last_ray: Option<Ray>,
}

/// Everything the surface thread owns.
struct SurfaceLoop {
    profile: Profile,
    surface: WritingSurface,
    source: ScreenRaySource,
    backend: Box<dyn CaptureBackend>,
    replies: Sender<RecognitionReply>,
    started: Instant,
    devices: usize,
}

impl SurfaceLoop {
    fn new(profile: Profile, replies: Sender<RecognitionReply>) -> Result<Self> {
        let settings = SurfaceSettings::from_profile(&profile)?;
        let source = ScreenRaySource::new(profile.surface.pose(), profile.surface.half_extents);
        let backend = backend::from_profile(&profile, replies.clone());
        info!("surface: using '{}' backend", backend.name());
        Ok(Self {
            surface: WritingSurface::new(&settings, 0.0),
            profile,
            source,
            backend,
            replies,
            started: Instant::now(),
            devices: 0,
        })
    }

    fn now(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn submit(&mut self, request: Option<CaptureRequest>) {
        if let Some(req) = request {
            if let Err(e) = self.backend.submit(&req) {
                error!("request {}: submit failed: {e}", req.id);
            }
        }
    }

    fn apply(&mut self, cmd: SurfaceCommand) {
        let now = self.now();
        match cmd {
            SurfaceCommand::Clear => self.surface.clear(now),
            SurfaceCommand::PredictNow => {
                let req = self.surface.predict_now(now);
                if req.is_none() {
                    debug!("predict: nothing new to submit");
                }
                self.submit(req);
            }
            SurfaceCommand::ToggleInvert => {
                self.surface.toggle_invert();
            }
            SurfaceCommand::Status(tx) => {
                let mut status = self.surface.status();
                status["devices"] = serde_json::json!(self.devices);
                status["backend"] = serde_json::json!(self.backend.name());
                let _ = tx.send(status);
            }
            SurfaceCommand::UpdateProfile(profile) => match SurfaceSettings::from_profile(&profile) {
                Ok(settings) => {
                    self.surface.apply(&settings);
                    self.source =
                        ScreenRaySource::new(profile.surface.pose(), profile.surface.half_extents);
                    self.backend = backend::from_profile(&profile, self.replies.clone());
                    self.profile = *profile;
                    info!("surface: profile applied");
                }
                Err(e) => error!("surface: profile rejected: {e}"),
            },
        }
    }

    fn on_pen(&mut self, pen: &mut Option<Ray>, ev: PenEvent) {
        let now = self.now();
        match ev {
            PenEvent::Down { x_norm, y_norm } => {
                *pen = self.source.pointer_ray(x_norm, y_norm);
                if let Some(ray) = pen.as_ref() {
                    self.source.on_begin(ray, &mut self.surface, now);
                }
            }
            PenEvent::Move { x_norm, y_norm } => {
                *pen = self.source.pointer_ray(x_norm, y_norm);
                if let Some(ray) = pen.as_ref() {
                    self.source.on_continue(ray, &mut self.surface, now);
                }
            }
            PenEvent::Up => match pen.take() {
                Some(ray) => self.source.on_end(&ray, &mut self.surface),
                None => self.surface.end_contact(),
            },
        }
    }

    fn drain_replies(&mut self, rx: &Receiver<RecognitionReply>) {
        while let Ok(reply) = rx.try_recv() {
            match self.surface.on_reply(&reply) {
                Ok(ReplyDisposition::Appended(outcome)) => {
                    info!("text now '{}' (+{})", self.surface.text(), outcome.character)
                }
                Ok(ReplyDisposition::Stale) => debug!("reply {} dropped as stale", reply.id),
                Err(e) => warn!("reply {} rejected: {e}", reply.id),
            }
        }
    }
}

fn open_devices() -> Vec<PenDevice> {
    let mut devs = vec![];
    for d in input::discover_pointers() {
        match Device::open(&d.path) {
            Ok(mut dev) => {
                if let Err(e) = dev.set_nonblocking(true) {
                    warn!("failed to set {} nonblocking: {e}", d.path);
                    continue;
                }
                let mut tracker = PenTracker::new();
                if let Some((x0, x1, y0, y1)) = input::abs_ranges(&dev) {
                    tracker.set_norm_ranges(x0, x1, y0, y1);
                }
                info!("pen device: {} ({})", d.name, d.path);
                devs.push(PenDevice {
                    dev,
                    tracker,
                    last_ray: None,
                });
            }
            Err(e) => warn!("failed to open {}: {e}", d.path),
        }
    }
    devs
}

pub fn run_pipeline(profile: Profile, rx_cmd: Receiver<SurfaceCommand>) -> Result<()> {
    let (tx_reply, rx_reply) = backend::reply_channel();
    let mut lp = SurfaceLoop::new(profile, tx_reply)?;

    let mut devs = open_devices();
    lp.devices = devs.len();
    if devs.is_empty() {
        warn!("no pen devices detected; surface only takes commands");
    }

    loop {
        let mut any_event = false;

        for pd in devs.iter_mut() {
            let Ok(events) = pd.dev.fetch_events() else {
                continue;
            };
            let mut pending = Vec::new();
            let mut keys = Vec::new();
            for ev in events {
                any_event = true;
                if ev.event_type() == EventType::ABSOLUTE {
                    match ev.code() {
                        c if c == AbsoluteAxisCode::ABS_X.0 => pd.tracker.on_pos_x(ev.value()),
                        c if c == AbsoluteAxisCode::ABS_Y.0 => pd.tracker.on_pos_y(ev.value()),
                        _ => {}
                    }
                } else if ev.event_type() == EventType::KEY {
                    if ev.code() == KeyCode::BTN_TOUCH.0 {
                        pd.tracker.on_touch(ev.value() != 0);
                    } else if ev.value() == 1 {
                        keys.push(ev.code());
                    }
                } else if ev.event_type() == EventType::SYNCHRONIZATION
                    && ev.code() == SynchronizationCode::SYN_REPORT.0
                {
                    if let Some(pen) = pd.tracker.on_syn_report() {
                        pending.push(pen);
                    }
                }
            }

            for pen in pending {
                lp.on_pen(&mut pd.last_ray, pen);
            }
            for code in keys {
                match super::dispatch::dispatch_key(code, &lp.profile) {
                    Ok(Some(cmd)) => lp.apply(cmd),
                    Ok(None) => {}
                    Err(e) => error!("dispatch failed: {e}"),
                }
            }
        }

        loop {
            match rx_cmd.try_recv() {
                Ok(cmd) => lp.apply(cmd),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Ok(()),
            }
        }

        lp.drain_replies(&rx_reply);
        let now = lp.now();
        let req = lp.surface.tick(now);
        lp.submit(req);

        if !any_event {
            thread::sleep(Duration::from_millis(4));
        }
    }
}
