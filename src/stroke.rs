use serde::Serialize;

use crate::geometry::{Orientation, Pos3, Pose, Vec3};

#[derive(Debug, Clone)]
pub struct Stroke {
    index: usize,
    pose: Pose,
    normal: Vec3,
    up: Vec3,
    points: Vec<Vec3>,
    finalized: bool,
    /// Part of the capture set of the most recent recognition request.
    pub included: bool,
}

/// World-space view of one stroke as handed to the capture backend.
#[derive(Debug, Clone, Serialize)]
pub struct CapturedStroke {
    pub index: usize,
    pub normal: [f32; 3],
    pub up: [f32; 3],
    pub points: Vec<[f32; 3]>,
}

impl Stroke {
    /// Opens a stroke anchored at `anchor`, facing `normal` with `up` as the
    /// up reference.
    pub fn open(index: usize, anchor: Pos3, normal: Vec3, up: Vec3) -> Self {
        Self {
            index,
            pose: Pose::new(anchor, Orientation::look(&normal, &up)),
            normal,
            up,
            points: Vec::new(),
            finalized: false,
            included: false,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn orientation(&self) -> &Orientation {
        &self.pose.orientation
    }

    /// Normal as supplied at creation.
    pub fn normal(&self) -> Vec3 {
        self.normal
    }

    pub fn up(&self) -> Vec3 {
        self.up
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn local_points(&self) -> &[Vec3] {
        &self.points
    }

    pub fn world_points(&self) -> impl Iterator<Item = Pos3> + '_ {
        self.local_points().iter().map(|p| self.pose.to_world(p))
    }

    /// Appends a world-space point, stored in the stroke's local frame.
    /// Finalized strokes are immutable; returns whether the point was taken.
    pub(crate) fn push_world(&mut self, world: &Pos3) -> bool {
        if self.finalized {
            return false;
        }
        self.points.push(self.pose.to_local(world));
        true
    }

    pub(crate) fn finalize(&mut self) {
        self.finalized = true;
    }

    pub fn captured(&self) -> CapturedStroke {
        CapturedStroke {
            index: self.index,
            normal: self.normal().into(),
            up: self.up().into(),
            points: self.world_points().map(|p| [p.x, p.y, p.z]).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::approx_v;

    #[test]
    fn points_are_stored_locally_and_returned_in_world() {
        let mut s = Stroke::open(0, Pos3::new(1.0, 0.0, 0.0), -Vec3::y(), Vec3::z());
        let p = Pos3::new(1.5, 0.0, 0.25);
        assert!(s.push_world(&p));
        // right = +X, up = +Z for this orientation
        assert!(approx_v(&s.local_points()[0], &Vec3::new(0.5, 0.25, 0.0)));
        let back: Vec<Pos3> = s.world_points().collect();
        assert!(approx_v(&back[0].coords, &p.coords));
    }

    #[test]
    fn finalized_stroke_rejects_points() {
        let mut s = Stroke::open(3, Pos3::origin(), Vec3::z(), Vec3::y());
        s.finalize();
        assert!(!s.push_world(&Pos3::new(1.0, 1.0, 0.0)));
        assert!(s.is_empty());
        assert_eq!(s.index(), 3);
    }
}
