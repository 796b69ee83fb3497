//! Input device discovery (evdev 0.13.2 compatible)

use evdev::{AbsoluteAxisCode, Device, EventType, KeyCode};

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
}

/// Absolute pointers with a contact button: pens, tablets, single-touch
/// screens.
pub fn is_pointer(dev: &Device) -> bool {
    let has_abs = dev.supported_events().contains(EventType::ABSOLUTE);
    let has_xy = dev.supported_absolute_axes().is_some_and(|a| {
        a.contains(AbsoluteAxisCode::ABS_X) && a.contains(AbsoluteAxisCode::ABS_Y)
    });
    let has_touch = dev.supported_keys().is_some_and(|k| {
        k.contains(KeyCode::BTN_TOUCH) || k.contains(KeyCode::BTN_TOOL_PEN)
    });
    has_abs && has_xy && has_touch
}

pub fn discover_pointers() -> Vec<DeviceInfo> {
    let mut out = vec![];
    if let Ok(rd) = std::fs::read_dir("/dev/input") {
        for e in rd.flatten() {
            let p = e.path();
            if p.file_name()
                .and_then(|s| s.to_str())
                .is_some_and(|s| s.starts_with("event"))
            {
                if let Ok(dev) = Device::open(&p) {
                    if is_pointer(&dev) {
                        out.push(DeviceInfo {
                            path: p.display().to_string(),
                            name: dev.name().unwrap_or("unknown").to_string(),
                        });
                    }
                }
            }
        }
    }
    out
}

/// Raw `(x_min, x_max, y_min, y_max)` reported by the device.
pub fn abs_ranges(dev: &Device) -> Option<(i32, i32, i32, i32)> {
    let mut x = None;
    let mut y = None;
    for (axis, info) in dev.get_absinfo().ok()? {
        if axis == AbsoluteAxisCode::ABS_X {
            x = Some((info.minimum(), info.maximum()));
        } else if axis == AbsoluteAxisCode::ABS_Y {
            y = Some((info.minimum(), info.maximum()));
        }
    }
    let ((x_min, x_max), (y_min, y_max)) = (x?, y?);
    Some((x_min, x_max, y_min, y_max))
}
