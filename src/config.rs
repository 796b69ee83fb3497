use anyhow::{Context, Result, anyhow};
use directories::UserDirs;
use log::info;
use serde::{Deserialize, Deserializer};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use crate::geometry::{Orientation, Pos3, Pose, Vec3};
use crate::input;
use crate::recognition::{Alphabet, EMNIST_BYCLASS};
use crate::scheduler::IdleFrom;

#[derive(Debug, Clone, Deserialize)]
pub struct Meta {
    pub name: Option<String>,
    #[serde(default)]
    pub allow_commands: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WritingConfig {
    /// Seconds between accepted points. Smaller values give finer lines.
    pub line_fidelity: f64,
    #[serde(default = "default_bound_size_factor")]
    pub bound_size_factor: f32,
    /// Idle seconds before auto prediction; negative turns it off.
    #[serde(default = "default_predict_delay")]
    pub predict_delay: f64,
    #[serde(default = "default_z_offset")]
    pub z_offset: f32,
    #[serde(default)]
    pub idle_from: IdleFrom,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecognitionConfig {
    #[serde(default = "default_alphabet")]
    pub alphabet: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_invert")]
    pub invert: bool,
    /// Classifier command line; needs `meta.allow_commands`.
    pub command: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SurfaceConfig {
    #[serde(default)]
    pub position: [f32; 3],
    /// Surface normal, pointing towards the writer.
    pub up: [f32; 3],
    /// Top edge direction of the page.
    pub forward: [f32; 3],
    /// Half size of the writable rectangle along local x and z.
    pub half_extents: [f32; 2],
    #[serde(default = "default_pen_tip")]
    pub pen_tip: u32,
}

fn default_bound_size_factor() -> f32 {
    1.0
}
fn default_predict_delay() -> f64 {
    -1.0
}
fn default_z_offset() -> f32 {
    0.01
}
fn default_alphabet() -> String {
    EMNIST_BYCLASS.to_string()
}
fn default_timeout_ms() -> u64 {
    5000
}
fn default_invert() -> bool {
    true
}
fn default_pen_tip() -> u32 {
    1
}

impl SurfaceConfig {
    pub fn pose(&self) -> Pose {
        Pose::new(
            Pos3::from(self.position),
            Orientation::look(&Vec3::from(self.forward), &Vec3::from(self.up)),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub meta: Meta,
    pub writing: WritingConfig,
    pub recognition: RecognitionConfig,
    pub surface: SurfaceConfig,

    // nested/dotted tables flattened into "a.b" -> "value"
    #[serde(default, deserialize_with = "deserialize_bindings_flat")]
    pub bindings: HashMap<String, String>,
}

impl Profile {
    pub fn alphabet(&self) -> Result<Alphabet> {
        Alphabet::new(&self.recognition.alphabet).map_err(|e| anyhow!("{e}"))
    }

    pub fn parse(txt: &str) -> Result<Self> {
        let profile: Profile = toml::from_str(txt)?;
        validate_profile(&profile)?;
        Ok(profile)
    }
}

fn deserialize_bindings_flat<'de, D>(
    de: D,
) -> std::result::Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = toml::Value::deserialize(de)?;
    let table = match val {
        toml::Value::Table(t) => t,
        other => {
            return Err(serde::de::Error::custom(format!(
                "bindings must be a table, got {:?}",
                other.type_str()
            )));
        }
    };

    let mut out = HashMap::new();
    flatten_table("", &table, &mut out).map_err(serde::de::Error::custom)?;
    Ok(out)
}

fn flatten_table(
    prefix: &str,
    table: &toml::value::Table,
    out: &mut HashMap<String, String>,
) -> std::result::Result<(), String> {
    for (k, v) in table {
        let key = if prefix.is_empty() {
            k.clone()
        } else {
            format!("{prefix}.{k}")
        };
        match v {
            toml::Value::String(s) => {
                out.insert(key, s.clone());
            }
            toml::Value::Table(sub) => {
                flatten_table(&key, sub, out)?;
            }
            other => {
                return Err(format!(
                    "binding '{}' value must be a string, got {}",
                    key,
                    other.type_str()
                ));
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ConfigState {
    pub active_name: String,
    pub profile: Profile,
    pub config_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub active_ptr: PathBuf,
    pub detected_devices: Vec<String>,
}

pub fn config_dir() -> Result<PathBuf> {
    let dirs = UserDirs::new().ok_or_else(|| anyhow!("cannot locate home directory"))?;
    Ok(dirs.home_dir().join(".config").join("inkctl"))
}

fn default_profile_text() -> &'static str {
    include_str!("../profiles/default.toml")
}

impl ConfigState {
    pub fn load_or_install_default() -> Result<Self> {
        let mut state = Self::load_or_install_in(&config_dir()?)?;
        state.detected_devices = input::discover_pointers()
            .into_iter()
            .map(|d| format!("{} ({})", d.name, d.path))
            .collect();
        Ok(state)
    }

    pub fn load_or_install_in(cfgdir: &Path) -> Result<Self> {
        let profdir = cfgdir.join("profiles");
        fs::create_dir_all(&profdir)
            .with_context(|| format!("failed to create {}", profdir.display()))?;

        let def_path = profdir.join("default.toml");
        if !def_path.exists() {
            fs::write(&def_path, default_profile_text())?;
            info!("installed default profile at {}", def_path.display());
        }

        let active_ptr = cfgdir.join("active");
        if !active_ptr.exists() {
            fs::write(&active_ptr, b"default")?;
        }

        let active_name = fs::read_to_string(&active_ptr)?.trim().to_string();
        let profile = load_profile(&profdir, &active_name)?;

        Ok(Self {
            active_name,
            profile,
            config_dir: cfgdir.to_path_buf(),
            profiles_dir: profdir,
            active_ptr,
            detected_devices: Vec::new(),
        })
    }

    /// Re-reads the active profile. On error the previous profile stays.
    pub fn reload(&mut self) -> Result<()> {
        self.profile = load_profile(&self.profiles_dir, &self.active_name)?;
        Ok(())
    }

    pub fn set_active(&mut self, name: &str) -> Result<()> {
        let p = self.profiles_dir.join(format!("{name}.toml"));
        if !p.exists() {
            return Err(anyhow!("profile not found: {}", p.display()));
        }
        let profile = load_profile(&self.profiles_dir, name)?;
        fs::write(&self.active_ptr, name.as_bytes())?;
        self.active_name = name.to_string();
        self.profile = profile;
        Ok(())
    }

    pub fn active_path(&self) -> PathBuf {
        self.profiles_dir.join(format!("{}.toml", self.active_name))
    }

    pub fn list_profiles(&self) -> Vec<String> {
        let mut v = Vec::new();
        if let Ok(rd) = fs::read_dir(&self.profiles_dir) {
            for e in rd.flatten() {
                let path = e.path();
                if path.extension().is_some_and(|ext| ext == "toml") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        v.push(stem.to_string());
                    }
                }
            }
        }
        v.sort();
        v
    }

    pub fn doctor_report(&self) -> serde_json::Value {
        serde_json::json!({
            "input_group_member": check_in_input_group(),
            "profiles_dir": self.profiles_dir,
            "active_profile": self.active_name,
            "profile_name": self.profile.meta.name,
            "active_profile_path": self.active_path(),
            "devices": self.detected_devices,
            "classifier_command": self.profile.recognition.command,
            "commands_allowed": self.profile.meta.allow_commands,
            "hints": {
                "add_user_to_input_group": "sudo usermod -aG input $USER && newgrp input"
            }
        })
    }
}

fn load_profile(profdir: &Path, name: &str) -> Result<Profile> {
    let path = profdir.join(format!("{name}.toml"));
    let txt = fs::read_to_string(&path)
        .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
    Profile::parse(&txt).map_err(|e| anyhow!("failed to load {}: {e}", path.display()))
}

pub const BINDING_ACTIONS: [&str; 3] = ["clear", "predict", "invert"];

fn validate_profile(p: &Profile) -> Result<()> {
    let w = &p.writing;
    if !(w.line_fidelity > 0.0) {
        return Err(anyhow!("writing.line_fidelity must be a positive duration"));
    }
    if !(w.bound_size_factor > 0.0) {
        return Err(anyhow!("writing.bound_size_factor must be positive"));
    }
    if !w.z_offset.is_finite() {
        return Err(anyhow!("writing.z_offset must be finite"));
    }

    p.alphabet()?;
    if p.recognition.timeout_ms == 0 {
        return Err(anyhow!("recognition.timeout_ms must be positive"));
    }
    if p.recognition.command.is_some() && !p.meta.allow_commands {
        return Err(anyhow!(
            "recognition.command is set but allow_commands=false"
        ));
    }

    let s = &p.surface;
    let up = Vec3::from(s.up);
    let fwd = Vec3::from(s.forward);
    if up.norm() < 1e-6 || fwd.norm() < 1e-6 || up.cross(&fwd).norm() < 1e-6 {
        return Err(anyhow!("surface.up and surface.forward must be non-zero and not parallel"));
    }
    if s.half_extents.iter().any(|h| !(*h > 0.0)) {
        return Err(anyhow!("surface.half_extents must be positive"));
    }

    for (k, v) in &p.bindings {
        if k.trim().is_empty() {
            return Err(anyhow!("empty binding key"));
        }
        if !BINDING_ACTIONS.contains(&v.trim()) {
            return Err(anyhow!("binding '{}' has invalid action '{}'", k, v));
        }
    }
    Ok(())
}

fn check_in_input_group() -> bool {
    if let Ok(s) = fs::read_to_string("/etc/group") {
        let user = whoami::username();
        for line in s.lines() {
            if line.starts_with("input:") {
                if line
                    .split(':')
                    .nth(3)
                    .unwrap_or("")
                    .split(',')
                    .any(|u| u == user)
                {
                    return true;
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn embedded_default_profile_is_valid() {
        let p = Profile::parse(default_profile_text()).unwrap();
        assert_eq!(p.writing.predict_delay, -1.0);
        assert_eq!(p.writing.idle_from, IdleFrom::Contact);
        assert_eq!(p.alphabet().unwrap().len(), 62);
        assert_eq!(p.bindings.get("stylus.button").map(String::as_str), Some("predict"));
    }

    #[test]
    fn install_then_reload_and_switch() {
        let dir = TempDir::new().unwrap();
        let mut st = ConfigState::load_or_install_in(dir.path()).unwrap();
        assert_eq!(st.active_name, "default");
        assert_eq!(st.list_profiles(), vec!["default".to_string()]);

        let fast = default_profile_text().replace("predict_delay = -1.0", "predict_delay = 2.0");
        fs::write(st.profiles_dir.join("fast.toml"), fast).unwrap();
        st.set_active("fast").unwrap();
        assert_eq!(st.profile.writing.predict_delay, 2.0);
        assert_eq!(fs::read_to_string(&st.active_ptr).unwrap(), "fast");

        assert!(st.set_active("missing").is_err());
        assert_eq!(st.active_name, "fast");
    }

    #[test]
    fn broken_reload_keeps_last_good_profile() {
        let dir = TempDir::new().unwrap();
        let mut st = ConfigState::load_or_install_in(dir.path()).unwrap();
        fs::write(st.active_path(), "not = [valid").unwrap();
        assert!(st.reload().is_err());
        assert_eq!(st.profile.writing.bound_size_factor, 1.0);
    }

    #[test]
    fn rejects_bad_values() {
        let base = default_profile_text();
        let cases = [
            base.replace("line_fidelity = 0.02", "line_fidelity = 0.0"),
            base.replace("line_fidelity = 0.02", "line_fidelity = -0.5"),
            base.replace("bound_size_factor = 1.0", "bound_size_factor = 0.0"),
            base.replace("timeout_ms = 5000", "timeout_ms = 0"),
            base.replace("forward = [0.0, 1.0, 0.0]", "forward = [0.0, 0.0, 1.0]"),
            base.replace("\"predict\"", "\"launch\""),
            base.replace("# command = ", "command = "),
        ];
        for txt in cases {
            assert!(Profile::parse(&txt).is_err(), "accepted:\n{txt}");
        }
    }
}
