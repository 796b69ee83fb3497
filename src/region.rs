use serde::Serialize;

use crate::geometry::{Orientation, Pos3, Vec3, forward_axis, up_axis};
use crate::stroke::Stroke;

/// Where and how large the capture of the current strokes should be.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CaptureFrame {
    pub size: f32,
    pub center: [f32; 3],
    pub normal: [f32; 3],
    pub up_normal: [f32; 3],
}

/// Placement for an orthographic imaging device derived from a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CameraPose {
    pub position: [f32; 3],
    /// `[x, y, z, w]`
    pub rotation: [f32; 4],
    pub half_extent: f32,
}

impl CaptureFrame {
    pub fn center(&self) -> Vec3 {
        Vec3::from(self.center)
    }

    pub fn normal(&self) -> Vec3 {
        Vec3::from(self.normal)
    }

    pub fn up_normal(&self) -> Vec3 {
        Vec3::from(self.up_normal)
    }

    /// Camera one unit behind the center, looking along the normal.
    pub fn camera_pose(&self) -> CameraPose {
        let position = self.center() - self.normal();
        CameraPose {
            position: position.into(),
            rotation: Orientation::look(&self.normal(), &self.up_normal()).quaternion(),
            half_extent: self.size,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RegionComputer {
    bound_size_factor: f32,
}

impl RegionComputer {
    pub fn new(bound_size_factor: f32) -> Self {
        Self { bound_size_factor }
    }

    /// Bounding frame of every stroke at index `>= start`.
    ///
    /// Each point is projected onto its own stroke's right/up axes, so strokes
    /// drawn under different orientations each contribute in their own plane.
    pub fn compute(&self, strokes: &[Stroke], start: usize) -> CaptureFrame {
        let mut x_min = f32::INFINITY;
        let mut x_max = f32::NEG_INFINITY;
        let mut y_min = f32::INFINITY;
        let mut y_max = f32::NEG_INFINITY;

        let mut point_sum = Vec3::zeros();
        let mut point_count = 0usize;
        let mut normal_sum = Vec3::zeros();
        let mut up_sum = Vec3::zeros();
        let mut stroke_count = 0usize;

        for stroke in strokes.iter().skip(start) {
            let orientation = stroke.orientation();
            normal_sum += orientation.forward();
            up_sum += orientation.up();
            stroke_count += 1;

            let right = orientation.right();
            let up = orientation.up();
            for p in stroke.world_points() {
                let x = p.coords.dot(&right);
                let y = p.coords.dot(&up);
                x_min = x_min.min(x);
                x_max = x_max.max(x);
                y_min = y_min.min(y);
                y_max = y_max.max(y);
                point_sum += p.coords;
                point_count += 1;
            }
        }

        let size = if point_count > 0 {
            (x_max - x_min).abs().max((y_max - y_min).abs()) * self.bound_size_factor
        } else {
            0.0
        };
        let center = if point_count > 0 {
            Pos3::from(point_sum / point_count as f32)
        } else {
            Pos3::origin()
        };
        let normal = average_direction(normal_sum, stroke_count).unwrap_or_else(forward_axis);
        let up_normal = average_direction(up_sum, stroke_count).unwrap_or_else(up_axis);

        CaptureFrame {
            size,
            center: center.coords.into(),
            normal: normal.into(),
            up_normal: up_normal.into(),
        }
    }
}

fn average_direction(sum: Vec3, count: usize) -> Option<Vec3> {
    if count == 0 {
        return None;
    }
    (sum / count as f32).try_normalize(1e-6)
}

/// Flags strokes at index `>= start` as the current capture set and clears
/// the flag on the rest.
pub fn mark_capture_set(strokes: &mut [Stroke], start: usize) {
    for (i, stroke) in strokes.iter_mut().enumerate() {
        stroke.included = i >= start;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{approx, approx_v};

    // facing +Z with +Y up, so in-plane x/y are world x/y
    fn flat_stroke(index: usize, pts: &[(f32, f32)]) -> Stroke {
        let mut s = Stroke::open(index, Pos3::origin(), Vec3::z(), Vec3::y());
        for (x, y) in pts {
            s.push_world(&Pos3::new(*x, *y, 0.0));
        }
        s.finalize();
        s
    }

    #[test]
    fn empty_input_yields_defaults() {
        let f = RegionComputer::new(1.0).compute(&[], 0);
        assert_eq!(f.size, 0.0);
        assert_eq!(f.center, [0.0, 0.0, 0.0]);
        assert_eq!(f.normal, [0.0, 0.0, 1.0]);
        assert_eq!(f.up_normal, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn empty_strokes_contribute_orientation_only() {
        let strokes = vec![flat_stroke(0, &[])];
        let f = RegionComputer::new(1.0).compute(&strokes, 0);
        assert_eq!(f.size, 0.0);
        assert_eq!(f.center, [0.0, 0.0, 0.0]);
        assert!(approx_v(&f.normal(), &Vec3::z()));
    }

    #[test]
    fn size_takes_larger_extent_and_factor() {
        let strokes = vec![flat_stroke(0, &[(0.0, 0.0), (2.0, 0.5)])];
        let f = RegionComputer::new(1.5).compute(&strokes, 0);
        assert!(approx(f.size, 3.0));
        assert!(approx_v(&f.center(), &Vec3::new(1.0, 0.25, 0.0)));
    }

    #[test]
    fn strokes_before_start_are_excluded() {
        let strokes = vec![
            flat_stroke(0, &[(-10.0, -10.0), (10.0, 10.0)]),
            flat_stroke(1, &[(0.0, 0.0), (1.0, 1.0)]),
        ];
        let rc = RegionComputer::new(1.0);
        let f = rc.compute(&strokes, 1);
        assert!(approx(f.size, 1.0));
        assert!(approx_v(&f.center(), &Vec3::new(0.5, 0.5, 0.0)));

        // dropping the trailing stroke changes the result
        let g = rc.compute(&strokes[..1], 1);
        assert_ne!(f, g);
        assert_eq!(g.size, 0.0);
    }

    #[test]
    fn compute_is_pure() {
        let strokes = vec![
            flat_stroke(0, &[(0.0, 0.0), (1.0, 0.0)]),
            flat_stroke(1, &[(0.3, 2.0)]),
        ];
        let rc = RegionComputer::new(1.2);
        assert_eq!(rc.compute(&strokes, 0), rc.compute(&strokes, 0));
    }

    #[test]
    fn normals_average_per_stroke_not_per_point() {
        let mut a = Stroke::open(0, Pos3::origin(), Vec3::z(), Vec3::y());
        for i in 0..10 {
            a.push_world(&Pos3::new(i as f32, 0.0, 0.0));
        }
        let mut b = Stroke::open(1, Pos3::origin(), Vec3::x(), Vec3::y());
        b.push_world(&Pos3::new(0.0, 1.0, 0.0));
        let f = RegionComputer::new(1.0).compute(&[a, b], 0);
        let expected = Vec3::new(1.0, 0.0, 1.0).normalize();
        assert!(approx_v(&f.normal(), &expected));
    }

    #[test]
    fn each_stroke_projects_onto_its_own_axes() {
        // right +X, up +Y
        let a = flat_stroke(0, &[(0.0, 0.0), (1.0, 0.0)]);
        // facing +X with +Z up: right +Y, up +Z
        let mut b = Stroke::open(1, Pos3::origin(), Vec3::x(), Vec3::z());
        b.push_world(&Pos3::new(0.0, 0.0, 3.0));
        assert!(approx_v(&b.orientation().right(), &Vec3::y()));

        let f = RegionComputer::new(1.0).compute(&[a, b], 0);
        // in a's frame alone the z extent would vanish and size would be 1
        assert!(approx(f.size, 3.0));
        assert!(approx_v(&f.center(), &Vec3::new(1.0 / 3.0, 0.0, 1.0)));
    }

    #[test]
    fn opposite_normals_fall_back_to_forward() {
        let a = flat_stroke(0, &[(0.0, 0.0)]);
        let mut b = Stroke::open(1, Pos3::origin(), -Vec3::z(), Vec3::y());
        b.push_world(&Pos3::new(1.0, 0.0, 0.0));
        let f = RegionComputer::new(1.0).compute(&[a, b], 0);
        assert_eq!(f.normal, [0.0, 0.0, 1.0]);
    }

    #[test]
    fn camera_sits_behind_center() {
        let frame = CaptureFrame {
            size: 2.0,
            center: [1.0, 1.0, 0.0],
            normal: [0.0, 0.0, 1.0],
            up_normal: [0.0, 1.0, 0.0],
        };
        let cam = frame.camera_pose();
        assert_eq!(cam.position, [1.0, 1.0, -1.0]);
        assert_eq!(cam.half_extent, 2.0);
    }

    #[test]
    fn mark_capture_set_tags_suffix() {
        let mut strokes = vec![flat_stroke(0, &[]), flat_stroke(1, &[]), flat_stroke(2, &[])];
        mark_capture_set(&mut strokes, 1);
        let flags: Vec<bool> = strokes.iter().map(|s| s.included).collect();
        assert_eq!(flags, vec![false, true, true]);
    }
}
