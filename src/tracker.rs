//! Single-pointer tracking for pens, tablets and touchscreens.

/// Contact transition produced by one SYN_REPORT.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PenEvent {
    Down { x_norm: f32, y_norm: f32 },
    Move { x_norm: f32, y_norm: f32 },
    Up,
}

#[derive(Debug)]
pub struct PenTracker {
    // normalization
    x_min: i32,
    x_max: i32,
    y_min: i32,
    y_max: i32,
    pub x_norm: f32,
    pub y_norm: f32,
    seen_x: bool,
    seen_y: bool,
    touching: bool,
    was_touching: bool,
    dirty: bool,
}

impl Default for PenTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PenTracker {
    pub fn new() -> Self {
        Self {
            x_min: 0,
            x_max: 4096,
            y_min: 0,
            y_max: 4096,
            x_norm: 0.0,
            y_norm: 0.0,
            seen_x: false,
            seen_y: false,
            touching: false,
            was_touching: false,
            dirty: false,
        }
    }

    pub fn set_norm_ranges(&mut self, x_min: i32, x_max: i32, y_min: i32, y_max: i32) {
        self.x_min = x_min;
        self.x_max = x_max.max(x_min + 1);
        self.y_min = y_min;
        self.y_max = y_max.max(y_min + 1);
    }

    pub fn on_pos_x(&mut self, raw: i32) {
        self.x_norm = ((raw - self.x_min) as f32 / (self.x_max - self.x_min) as f32).clamp(0.0, 1.0);
        self.seen_x = true;
        self.dirty = true;
    }

    pub fn on_pos_y(&mut self, raw: i32) {
        self.y_norm = ((raw - self.y_min) as f32 / (self.y_max - self.y_min) as f32).clamp(0.0, 1.0);
        self.seen_y = true;
        self.dirty = true;
    }

    /// The last position survives touch-up: the kernel drops unchanged ABS
    /// values, so a tap at the release point reports no coordinates.
    pub fn on_touch(&mut self, down: bool) {
        self.touching = down;
    }

    pub fn on_syn_report(&mut self) -> Option<PenEvent> {
        let has_pos = self.seen_x && self.seen_y;
        let moved = std::mem::take(&mut self.dirty);
        let (x_norm, y_norm) = (self.x_norm, self.y_norm);

        let ev = match (self.was_touching, self.touching && has_pos) {
            (false, true) => Some(PenEvent::Down { x_norm, y_norm }),
            (true, true) if moved => Some(PenEvent::Move { x_norm, y_norm }),
            (true, true) => None,
            (true, false) => Some(PenEvent::Up),
            (false, false) => None,
        };
        self.was_touching = self.touching && has_pos;
        ev
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn down_move_up_sequence() {
        let mut t = PenTracker::new();
        t.set_norm_ranges(0, 100, 0, 200);

        t.on_touch(true);
        assert_eq!(t.on_syn_report(), None, "no position yet");

        t.on_pos_x(50);
        t.on_pos_y(100);
        assert_eq!(
            t.on_syn_report(),
            Some(PenEvent::Down {
                x_norm: 0.5,
                y_norm: 0.5
            })
        );
        assert_eq!(t.on_syn_report(), None);

        t.on_pos_x(100);
        assert_eq!(
            t.on_syn_report(),
            Some(PenEvent::Move {
                x_norm: 1.0,
                y_norm: 0.5
            })
        );

        t.on_touch(false);
        assert_eq!(t.on_syn_report(), Some(PenEvent::Up));
        assert_eq!(t.on_syn_report(), None);
    }

    #[test]
    fn retap_at_release_point_reuses_last_position() {
        let mut t = PenTracker::new();
        t.set_norm_ranges(0, 100, 0, 200);
        t.on_touch(true);
        t.on_pos_x(50);
        t.on_pos_y(100);
        assert!(matches!(t.on_syn_report(), Some(PenEvent::Down { .. })));
        t.on_touch(false);
        assert_eq!(t.on_syn_report(), Some(PenEvent::Up));

        t.on_touch(true);
        assert_eq!(
            t.on_syn_report(),
            Some(PenEvent::Down {
                x_norm: 0.5,
                y_norm: 0.5
            })
        );
    }

    #[test]
    fn positions_are_clamped() {
        let mut t = PenTracker::new();
        t.set_norm_ranges(10, 20, 10, 20);
        t.on_pos_x(-5);
        t.on_pos_y(99);
        assert_eq!((t.x_norm, t.y_norm), (0.0, 1.0));
    }
}
