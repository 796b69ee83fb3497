use log::debug;

use crate::geometry::{Pos3, Vec3};
use crate::stroke::Stroke;

// sample clocks are f64 seconds; 0.3 - 0.2 < 0.1 without this slack
const TIME_EPS: f64 = 1e-9;

/// One contact reading from an adapter, in world space.
#[derive(Debug, Clone, Copy)]
pub struct ContactSample {
    pub point: Pos3,
    /// Direction the stroke is drawn towards (into the surface).
    pub normal: Vec3,
    pub up: Vec3,
}

/// What a call to [`StrokeAccumulator::begin_or_extend`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sampled {
    Opened,
    Appended,
    Gated,
}

#[derive(Debug)]
pub struct StrokeAccumulator {
    fidelity: f64,
    z_offset: f32,
    open: Option<Stroke>,
    last_sample: Option<f64>,
    last_contact: Option<f64>,
    last_point: Option<f64>,
}

impl StrokeAccumulator {
    pub fn new(fidelity: f64, z_offset: f32) -> Self {
        Self {
            fidelity: fidelity.max(0.0),
            z_offset,
            open: None,
            last_sample: None,
            last_contact: None,
            last_point: None,
        }
    }

    pub fn set_fidelity(&mut self, fidelity: f64, z_offset: f32) {
        self.fidelity = fidelity.max(0.0);
        self.z_offset = z_offset;
    }

    pub fn is_writing(&self) -> bool {
        self.open.is_some()
    }

    pub fn open_stroke(&self) -> Option<&Stroke> {
        self.open.as_ref()
    }

    /// Time of the last contact sample, accepted or not.
    pub fn last_contact(&self) -> Option<f64> {
        self.last_contact
    }

    /// Time of the last sample that became a point.
    pub fn last_point(&self) -> Option<f64> {
        self.last_point
    }

    /// Opens a stroke if none is open, otherwise appends `sample.point` once
    /// the fidelity interval has elapsed since the previous point.
    /// `next_index` is the index the stroke will take in the surface list.
    pub fn begin_or_extend(&mut self, sample: &ContactSample, now: f64, next_index: usize) -> Sampled {
        self.last_contact = Some(now);

        let mut outcome = Sampled::Appended;
        if self.open.is_none() {
            debug!("stroke {next_index}: opened");
            self.open = Some(Stroke::open(next_index, sample.point, sample.normal, sample.up));
            self.last_sample = None;
            outcome = Sampled::Opened;
        }

        if let Some(last) = self.last_sample {
            if now - last + TIME_EPS < self.fidelity {
                return Sampled::Gated;
            }
        }

        // nudge off the surface so the line does not z-fight with it
        let offset = sample.point - sample.normal * self.z_offset;
        if let Some(stroke) = self.open.as_mut() {
            stroke.push_world(&offset);
        }
        self.last_sample = Some(now);
        self.last_point = Some(now);
        outcome
    }

    /// Finalizes the open stroke, if any, and hands it back for the surface
    /// to append.
    pub fn end(&mut self) -> Option<Stroke> {
        let mut stroke = self.open.take()?;
        stroke.finalize();
        self.last_sample = None;
        debug!("stroke {}: finalized with {} points", stroke.index(), stroke.len());
        Some(stroke)
    }

    /// Drops the open stroke and all timing state.
    pub fn discard(&mut self) {
        self.open = None;
        self.last_sample = None;
        self.last_contact = None;
        self.last_point = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(x: f32, y: f32) -> ContactSample {
        ContactSample {
            point: Pos3::new(x, y, 0.0),
            normal: Vec3::z(),
            up: Vec3::y(),
        }
    }

    #[test]
    fn spaced_calls_are_all_materialized() {
        let mut acc = StrokeAccumulator::new(0.25, 0.01);
        let times = [0.0, 0.25, 0.5, 0.75, 1.5];
        for (i, t) in times.iter().enumerate() {
            acc.begin_or_extend(&sample(i as f32, 0.0), *t, 0);
        }
        let stroke = acc.end().unwrap();
        assert_eq!(stroke.len(), times.len());
        assert!(stroke.is_finalized());
    }

    #[test]
    fn decimal_spacing_keeps_every_point() {
        let mut acc = StrokeAccumulator::new(0.1, 0.01);
        for i in 0..8 {
            let t = i as f64 * 0.1;
            assert_ne!(acc.begin_or_extend(&sample(i as f32, 0.0), t, 0), Sampled::Gated, "t={t}");
        }
        assert_eq!(acc.end().unwrap().len(), 8);

        let mut acc = StrokeAccumulator::new(0.02, 0.01);
        let mut t = 0.0;
        for i in 0..50 {
            acc.begin_or_extend(&sample(i as f32, 0.0), t, 0);
            t += 0.02;
        }
        assert_eq!(acc.end().unwrap().len(), 50);
    }

    #[test]
    fn rapid_calls_collapse_to_first_point() {
        let mut acc = StrokeAccumulator::new(0.5, 0.01);
        assert_eq!(acc.begin_or_extend(&sample(0.0, 0.0), 1.0, 0), Sampled::Opened);
        assert_eq!(acc.begin_or_extend(&sample(1.0, 0.0), 1.1, 0), Sampled::Gated);
        assert_eq!(acc.begin_or_extend(&sample(2.0, 0.0), 1.2, 0), Sampled::Gated);
        assert_eq!(acc.begin_or_extend(&sample(3.0, 0.0), 1.49, 0), Sampled::Gated);
        let stroke = acc.end().unwrap();
        assert_eq!(stroke.len(), 1);
    }

    #[test]
    fn gated_calls_refresh_contact_time_only() {
        let mut acc = StrokeAccumulator::new(0.5, 0.01);
        acc.begin_or_extend(&sample(0.0, 0.0), 1.0, 0);
        acc.begin_or_extend(&sample(0.0, 1.0), 1.2, 0);
        assert_eq!(acc.last_contact(), Some(1.2));
        assert_eq!(acc.last_point(), Some(1.0));
    }

    #[test]
    fn point_is_offset_against_normal() {
        let mut acc = StrokeAccumulator::new(0.0, 0.01);
        acc.begin_or_extend(&sample(0.0, 0.0), 0.0, 0);
        let stroke = acc.end().unwrap();
        let p = stroke.world_points().next().unwrap();
        assert!((p.z + 0.01).abs() < 1e-5);
    }

    #[test]
    fn end_without_open_stroke_is_noop() {
        let mut acc = StrokeAccumulator::new(0.1, 0.01);
        assert!(acc.end().is_none());
        assert!(!acc.is_writing());
    }
}
