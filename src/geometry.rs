use nalgebra::{Point3, Unit, UnitQuaternion, Vector3};

pub type Vec3 = Vector3<f32>;
pub type Pos3 = Point3<f32>;

const EPS: f32 = 1e-6;

pub fn forward_axis() -> Vec3 {
    Vec3::z()
}

pub fn up_axis() -> Vec3 {
    Vec3::y()
}

/// Rotation that maps local +Z onto `forward` and local +Y as close to `up`
/// as the two allow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Orientation {
    rotation: UnitQuaternion<f32>,
}

impl Orientation {
    pub fn look(forward: &Vec3, up: &Vec3) -> Self {
        let dir = forward.try_normalize(EPS).unwrap_or_else(forward_axis);
        let mut up = *up;
        if up.cross(&dir).norm() < EPS {
            // up parallel to forward (or zero); pick any axis that is not
            up = if dir.y.abs() < 0.99 { up_axis() } else { forward_axis() };
        }
        Self {
            rotation: UnitQuaternion::face_towards(&dir, &up),
        }
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * forward_axis()
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * up_axis()
    }

    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::x()
    }

    pub fn rotate(&self, v: &Vec3) -> Vec3 {
        self.rotation * v
    }

    pub fn unrotate(&self, v: &Vec3) -> Vec3 {
        self.rotation.inverse_transform_vector(v)
    }

    /// Unit quaternion as `[x, y, z, w]`.
    pub fn quaternion(&self) -> [f32; 4] {
        let q = self.rotation.quaternion();
        [q.i, q.j, q.k, q.w]
    }
}

/// Position plus orientation; maps between a local frame and world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Pos3,
    pub orientation: Orientation,
}

impl Pose {
    pub fn new(position: Pos3, orientation: Orientation) -> Self {
        Self {
            position,
            orientation,
        }
    }

    pub fn to_world(&self, local: &Vec3) -> Pos3 {
        self.position + self.orientation.rotate(local)
    }

    pub fn to_local(&self, world: &Pos3) -> Vec3 {
        self.orientation.unrotate(&(world - self.position))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Ray {
    pub origin: Pos3,
    pub direction: Unit<Vec3>,
}

impl Ray {
    pub fn new(origin: Pos3, direction: Vec3) -> Option<Self> {
        Unit::try_new(direction, EPS).map(|direction| Self { origin, direction })
    }

    pub fn at(&self, t: f32) -> Pos3 {
        self.origin + self.direction.into_inner() * t
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Plane {
    pub normal: Unit<Vec3>,
    pub point: Pos3,
}

impl Plane {
    pub fn new(normal: Vec3, point: Pos3) -> Option<Self> {
        Unit::try_new(normal, EPS).map(|normal| Self { normal, point })
    }

    /// Distance along `ray` to the plane, or `None` if the ray is parallel to
    /// it or the plane lies behind the origin.
    pub fn raycast(&self, ray: &Ray) -> Option<f32> {
        let denom = self.normal.dot(&ray.direction.into_inner());
        if denom.abs() < EPS {
            return None;
        }
        let t = self.normal.dot(&(self.point - ray.origin)) / denom;
        (t >= 0.0).then_some(t)
    }

    /// Moves `p` along the plane normal until it lies on the plane.
    pub fn project(&self, p: &Pos3) -> Pos3 {
        let dist = self.normal.dot(&(p - self.point));
        p - self.normal.into_inner() * dist
    }
}

#[cfg(test)]
pub(crate) fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-4
}

#[cfg(test)]
pub(crate) fn approx_v(a: &Vec3, b: &Vec3) -> bool {
    (a - b).norm() < 1e-4
}
