use crate::dashboard::node::ConfigNode;
use anyhow::Context;
use eframe::egui;
use serde::Deserialize;
use std::path::{Path, PathBuf};

fn default_true() -> bool {
    true
}

fn default_title() -> String {
    "Dashboard".to_string()
}

fn default_instance_name() -> String {
    sysinfo::System::host_name()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "dashboard".to_string())
}

/// Location of the configuration file when none is given on the command line.
pub fn default_config_path() -> PathBuf {
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("dashboard.yml")
}

pub fn default_pid_path() -> PathBuf {
    dirs_next::runtime_dir()
        .or_else(dirs_next::cache_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("deskboard.pid")
}

pub fn default_cache_root() -> PathBuf {
    dirs_next::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("deskboard")
}

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs_next::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FontConfig {
    /// Path of a TTF/OTF file used as the proportional font.
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub size: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WindowOptions {
    #[serde(default)]
    pub screen: Option<usize>,
    #[serde(default)]
    pub position: Option<[f32; 2]>,
    #[serde(default)]
    pub size: Option<[f32; 2]>,
    #[serde(default)]
    pub stay_on_bottom: bool,
    #[serde(default = "default_true")]
    pub frameless: bool,
    #[serde(default)]
    pub tool: bool,
    #[serde(default)]
    pub allow_resize: bool,
    #[serde(default = "default_true")]
    pub maximize: bool,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub font: Option<FontConfig>,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            screen: None,
            position: None,
            size: None,
            stay_on_bottom: false,
            frameless: true,
            tool: false,
            allow_resize: false,
            maximize: true,
            title: default_title(),
            font: None,
        }
    }
}

impl WindowOptions {
    pub fn viewport(&self) -> egui::ViewportBuilder {
        let mut vp = egui::ViewportBuilder::default()
            .with_title(self.title.clone())
            .with_decorations(!self.frameless)
            .with_resizable(self.allow_resize)
            .with_maximized(self.maximize)
            .with_taskbar(!self.tool);
        if let Some([w, h]) = self.size {
            vp = vp.with_inner_size([w, h]);
        }
        if let Some([x, y]) = self.position {
            vp = vp.with_position([x, y]);
        }
        if self.stay_on_bottom {
            vp = vp.with_window_level(egui::WindowLevel::AlwaysOnBottom);
        }
        if let Some(screen) = self.screen.filter(|s| *s != 0) {
            tracing::warn!(screen, "screen selection is not supported, using the primary screen");
        }
        vp
    }
}

/// `pid_file: <path>`, `pid_file: true` for the default location or
/// `pid_file: false` / `null` to disable single-instance enforcement.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PidFileSetting {
    Enabled(bool),
    Path(PathBuf),
}

impl Default for PidFileSetting {
    fn default() -> Self {
        Self::Enabled(true)
    }
}

impl PidFileSetting {
    pub fn resolve(&self) -> Option<PathBuf> {
        match self {
            PidFileSetting::Enabled(true) => Some(default_pid_path()),
            PidFileSetting::Enabled(false) => None,
            PidFileSetting::Path(p) => Some(expand_tilde(p)),
        }
    }
}

fn deserialize_pid_file<'de, D>(de: D) -> Result<PidFileSetting, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<PidFileSetting>::deserialize(de)?.unwrap_or(PidFileSetting::Enabled(false)))
}

/// Root of the configuration file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DashboardConfig {
    #[serde(default)]
    pub window_options: WindowOptions,
    pub central_widget: ConfigNode,
    #[serde(default)]
    pub overlay_widget: Option<ConfigNode>,
    #[serde(default)]
    pub plugins: Vec<ConfigNode>,
    #[serde(default, deserialize_with = "deserialize_pid_file")]
    pub pid_file: PidFileSetting,
    #[serde(default = "default_true")]
    pub show_error_messages: bool,
    #[serde(default = "default_instance_name")]
    pub instance_name: String,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub debug_logging: bool,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl DashboardConfig {
    pub fn new(central_widget: ConfigNode) -> Self {
        Self {
            window_options: WindowOptions::default(),
            central_widget,
            overlay_widget: None,
            plugins: Vec::new(),
            pid_file: PidFileSetting::Enabled(false),
            show_error_messages: true,
            instance_name: default_instance_name(),
            cache_dir: None,
            debug_logging: false,
            log_file: None,
        }
    }

    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        let mut cfg: Self = serde_yaml::from_str(content)?;
        cfg.cache_dir = cfg.cache_dir.as_deref().map(expand_tilde);
        cfg.log_file = cfg.log_file.as_deref().map(expand_tilde);
        Ok(cfg)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn cache_root(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = DashboardConfig::from_yaml_str("central_widget:\n  type: clock\n").unwrap();
        assert_eq!(cfg.central_widget.type_name, "clock");
        assert!(cfg.show_error_messages);
        assert_eq!(cfg.pid_file, PidFileSetting::Enabled(true));
        assert_eq!(cfg.window_options, WindowOptions::default());
        assert!(cfg.window_options.frameless);
        assert!(!cfg.window_options.allow_resize);
        assert!(cfg.window_options.maximize);
        assert!(cfg.plugins.is_empty());
    }

    #[test]
    fn pid_file_accepts_path_bool_and_null() {
        let path = DashboardConfig::from_yaml_str(
            "pid_file: /tmp/x.pid\ncentral_widget: {type: clock}\n",
        )
        .unwrap();
        assert_eq!(path.pid_file.resolve(), Some(PathBuf::from("/tmp/x.pid")));
        let off = DashboardConfig::from_yaml_str("pid_file: null\ncentral_widget: {type: clock}\n")
            .unwrap();
        assert_eq!(off.pid_file.resolve(), None);
    }

    #[test]
    fn unknown_root_key_is_rejected() {
        assert!(DashboardConfig::from_yaml_str("central_widget: {type: clock}\nbogus: 1\n").is_err());
    }

    #[test]
    fn tilde_is_expanded() {
        if let Some(home) = dirs_next::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/x")), home.join("x"));
        }
        assert_eq!(expand_tilde(Path::new("/abs")), PathBuf::from("/abs"));
    }
}
