use anyhow::{Result, anyhow};
use evdev::KeyCode;

use super::pipeline::SurfaceCommand;
use crate::config::Profile;

/// Binding name for a stylus button, as used in `[bindings]`.
pub fn binding_for_key(code: u16) -> Option<&'static str> {
    match code {
        c if c == KeyCode::BTN_STYLUS.0 => Some("stylus.button"),
        c if c == KeyCode::BTN_STYLUS2.0 => Some("stylus.button2"),
        c if c == KeyCode::BTN_TOOL_RUBBER.0 => Some("stylus.eraser"),
        _ => None,
    }
}

pub fn parse_action(action: &str) -> Option<SurfaceCommand> {
    match action.trim() {
        "clear" => Some(SurfaceCommand::Clear),
        "predict" => Some(SurfaceCommand::PredictNow),
        "invert" => Some(SurfaceCommand::ToggleInvert),
        _ => None,
    }
}

/// Command bound to a key press, if the profile binds one.
pub fn dispatch_key(code: u16, profile: &Profile) -> Result<Option<SurfaceCommand>> {
    let Some(key) = binding_for_key(code) else {
        return Ok(None);
    };
    let Some(action) = profile.bindings.get(key) else {
        return Ok(None);
    };
    parse_action(action)
        .map(Some)
        .ok_or_else(|| anyhow!("unknown action mapping for {} -> '{}'", key, action))
}
