use crate::accumulator::ContactSample;
use crate::geometry::{Plane, Pos3, Pose, Ray, Vec3};
use crate::surface::WritingSurface;

pub trait ContactSource {
    type Contact;

    /// Maps a raw contact to a sample on the surface, or `None` if it does
    /// not belong to this source.
    fn resolve(&self, contact: &Self::Contact) -> Option<ContactSample>;

    fn on_begin(&self, contact: &Self::Contact, surface: &mut WritingSurface, now: f64) {
        if let Some(sample) = self.resolve(contact) {
            surface.begin_or_extend(&sample, now);
        }
    }

    fn on_continue(&self, contact: &Self::Contact, surface: &mut WritingSurface, now: f64) {
        self.on_begin(contact, surface, now);
    }

    fn on_end(&self, _contact: &Self::Contact, surface: &mut WritingSurface) {
        surface.end_contact();
    }
}

/// A collision reported by the physics side.
#[derive(Debug, Clone, Copy)]
pub struct Collision {
    pub collider: u32,
    pub point: Pos3,
}

/// Writing with a dedicated pen-tip collider touching the surface.
#[derive(Debug, Clone)]
pub struct PenTipSource {
    pose: Pose,
    pen_tip: u32,
}

impl PenTipSource {
    pub fn new(pose: Pose, pen_tip: u32) -> Self {
        Self { pose, pen_tip }
    }
}

impl ContactSource for PenTipSource {
    type Contact = Collision;

    fn resolve(&self, contact: &Collision) -> Option<ContactSample> {
        if contact.collider != self.pen_tip {
            return None;
        }
        let up = self.pose.orientation.up();
        // raw contact points jitter; flatten them onto the surface plane
        let plane = Plane::new(up, self.pose.position)?;
        Some(ContactSample {
            point: plane.project(&contact.point),
            normal: -up,
            up: self.pose.orientation.forward(),
        })
    }

    fn on_end(&self, contact: &Collision, surface: &mut WritingSurface) {
        if contact.collider == self.pen_tip {
            surface.end_contact();
        }
    }
}

/// Writing with a pointer whose ray is cast onto the surface's rectangle.
#[derive(Debug, Clone)]
pub struct ScreenRaySource {
    pose: Pose,
    half_extents: [f32; 2],
}

impl ScreenRaySource {
    pub fn new(pose: Pose, half_extents: [f32; 2]) -> Self {
        Self { pose, half_extents }
    }

    /// Ray straight down onto the surface at normalized pointer coordinates
    /// (`0..1`, x growing to the writer's right, y towards the bottom edge).
    pub fn pointer_ray(&self, nx: f32, ny: f32) -> Option<Ray> {
        let [hx, hz] = self.half_extents;
        // local +x points to the writer's left when looking down at the page
        let local = Vec3::new((1.0 - nx * 2.0) * hx, 0.0, (1.0 - ny * 2.0) * hz);
        let up = self.pose.orientation.up();
        Ray::new(self.pose.to_world(&local) + up, -up)
    }

    fn hit(&self, ray: &Ray) -> Option<(Pos3, Vec3)> {
        let up = self.pose.orientation.up();
        let plane = Plane::new(up, self.pose.position)?;
        let t = plane.raycast(ray)?;
        let point = ray.at(t);

        let local = self.pose.to_local(&point);
        let [hx, hz] = self.half_extents;
        if local.x.abs() > hx || local.z.abs() > hz {
            return None;
        }
        // collider normal on the side the ray came from
        let normal = if ray.direction.dot(&up) <= 0.0 { up } else { -up };
        Some((point, normal))
    }
}

impl ContactSource for ScreenRaySource {
    type Contact = Ray;

    fn resolve(&self, ray: &Ray) -> Option<ContactSample> {
        let (point, hit_normal) = self.hit(ray)?;
        Some(ContactSample {
            point,
            normal: -hit_normal,
            up: self.pose.orientation.forward(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Orientation, approx_v};
    use crate::recognition::Alphabet;
    use crate::scheduler::IdleFrom;
    use crate::surface::SurfaceSettings;

    // desk surface: normal +Z, page top +Y
    fn desk() -> Pose {
        Pose::new(Pos3::origin(), Orientation::look(&Vec3::y(), &Vec3::z()))
    }

    fn surface() -> WritingSurface {
        let settings = SurfaceSettings {
            line_fidelity: 0.0,
            z_offset: 0.0,
            bound_size_factor: 1.0,
            predict_delay: -1.0,
            idle_from: IdleFrom::Contact,
            timeout: 1.0,
            invert: false,
            alphabet: Alphabet::default(),
        };
        WritingSurface::new(&settings, 0.0)
    }

    #[test]
    fn pen_tip_projects_onto_plane() {
        let src = PenTipSource::new(desk(), 7);
        let sample = src
            .resolve(&Collision {
                collider: 7,
                point: Pos3::new(0.2, 0.3, -0.05),
            })
            .unwrap();
        assert!(approx_v(&sample.point.coords, &Vec3::new(0.2, 0.3, 0.0)));
        assert!(approx_v(&sample.normal, &-Vec3::z()));
        assert!(approx_v(&sample.up, &Vec3::y()));
    }

    #[test]
    fn pen_tip_ignores_other_colliders() {
        let src = PenTipSource::new(desk(), 7);
        let mut s = surface();
        let tip = Collision {
            collider: 7,
            point: Pos3::new(0.0, 0.0, 0.0),
        };
        let finger = Collision {
            collider: 2,
            point: Pos3::new(0.1, 0.0, 0.0),
        };
        src.on_begin(&tip, &mut s, 0.0);
        src.on_continue(&finger, &mut s, 0.1);
        src.on_end(&finger, &mut s);
        assert!(s.strokes().is_empty());
        src.on_end(&tip, &mut s);
        assert_eq!(s.strokes().len(), 1);
        assert_eq!(s.strokes()[0].len(), 1);
    }

    #[test]
    fn ray_hits_inside_rectangle_only() {
        let src = ScreenRaySource::new(desk(), [0.5, 0.5]);
        let down = Ray::new(Pos3::new(0.1, 0.2, 3.0), -Vec3::z()).unwrap();
        let sample = src.resolve(&down).unwrap();
        assert!(approx_v(&sample.point.coords, &Vec3::new(0.1, 0.2, 0.0)));
        assert!(approx_v(&sample.normal, &-Vec3::z()));

        let outside = Ray::new(Pos3::new(0.9, 0.2, 3.0), -Vec3::z()).unwrap();
        assert!(src.resolve(&outside).is_none());

        let parallel = Ray::new(Pos3::new(0.0, 0.0, 3.0), Vec3::x()).unwrap();
        assert!(src.resolve(&parallel).is_none());
    }

    #[test]
    fn pointer_ray_maps_towards_top_left() {
        let src = ScreenRaySource::new(desk(), [0.5, 0.25]);
        let ray = src.pointer_ray(0.1, 0.1).unwrap();
        let sample = src.resolve(&ray).unwrap();
        assert!(approx_v(&sample.point.coords, &Vec3::new(-0.4, 0.2, 0.0)));
    }

    #[test]
    fn drag_builds_one_stroke_per_press() {
        let src = ScreenRaySource::new(desk(), [1.0, 1.0]);
        let mut s = surface();
        for (i, nx) in [0.2f32, 0.4, 0.6].iter().enumerate() {
            let ray = src.pointer_ray(*nx, 0.5).unwrap();
            if i == 0 {
                src.on_begin(&ray, &mut s, i as f64);
            } else {
                src.on_continue(&ray, &mut s, i as f64);
            }
        }
        let last = src.pointer_ray(0.6, 0.5).unwrap();
        src.on_end(&last, &mut s);
        assert_eq!(s.strokes().len(), 1);
        assert_eq!(s.strokes()[0].len(), 3);
    }
}
