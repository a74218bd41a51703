use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub bindings: BindingsConfig,
    #[serde(default)]
    pub keycodes: KeycodesConfig,
    #[serde(default)]
    pub behavior: BehaviorConfig,
    #[serde(default)]
    pub popup: PopupConfig,
}

/// Which of the two configured sources a value refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Primary,
    Secondary,
}

impl Role {
    pub fn other(self) -> Self {
        match self {
            Role::Primary => Role::Secondary,
            Role::Secondary => Role::Primary,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "SourcesConfig::default_primary")]
    pub primary: String,
    #[serde(default = "SourcesConfig::default_secondary")]
    pub secondary: String,
    #[serde(default = "SourcesConfig::default_primary_label")]
    pub primary_label: String,
    #[serde(default = "SourcesConfig::default_secondary_label")]
    pub secondary_label: String,
}

impl SourcesConfig {
    fn default_primary() -> String { "xkb:us::eng".into() }
    fn default_secondary() -> String { "mozc-jp".into() }
    fn default_primary_label() -> String { "primary".into() }
    fn default_secondary_label() -> String { "secondary".into() }

    /// Classify an observed identifier. Anything else is foreign.
    pub fn role_of(&self, id: &str) -> Option<Role> {
        if id == self.primary {
            Some(Role::Primary)
        } else if id == self.secondary {
            Some(Role::Secondary)
        } else {
            None
        }
    }

    pub fn id(&self, role: Role) -> &str {
        match role {
            Role::Primary => &self.primary,
            Role::Secondary => &self.secondary,
        }
    }

    pub fn label(&self, role: Role) -> &str {
        match role {
            Role::Primary => &self.primary_label,
            Role::Secondary => &self.secondary_label,
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            primary: Self::default_primary(),
            secondary: Self::default_secondary(),
            primary_label: Self::default_primary_label(),
            secondary_label: Self::default_secondary_label(),
        }
    }
}

/// A key name plus modifier names, resolved through `keys::parse_chord`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingConfig {
    pub key: String,
    #[serde(default)]
    pub modifiers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingsConfig {
    #[serde(default = "BindingsConfig::default_toggle")]
    pub toggle: BindingConfig,
    #[serde(default = "BindingsConfig::default_debug")]
    pub debug: BindingConfig,
}

impl BindingsConfig {
    fn default_toggle() -> BindingConfig {
        BindingConfig {
            key: "space".into(),
            modifiers: vec!["ctrl".into()],
        }
    }

    fn default_debug() -> BindingConfig {
        BindingConfig {
            key: "d".into(),
            modifiers: vec!["ctrl".into(), "alt".into(), "shift".into()],
        }
    }
}

impl Default for BindingsConfig {
    fn default() -> Self {
        Self {
            toggle: Self::default_toggle(),
            debug: Self::default_debug(),
        }
    }
}

/// Physical key codes forced alongside every source write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeycodesConfig {
    #[serde(default = "KeycodesConfig::default_primary")]
    pub primary: u16,
    #[serde(default = "KeycodesConfig::default_secondary")]
    pub secondary: u16,
    #[serde(default = "KeycodesConfig::default_refresh_dummy")]
    pub refresh_dummy: u16,
}

impl KeycodesConfig {
    fn default_primary() -> u16 { 94 } // KEY_MUHENKAN
    fn default_secondary() -> u16 { 92 } // KEY_HENKAN
    fn default_refresh_dummy() -> u16 { 190 } // KEY_F20

    pub fn for_role(&self, role: Role) -> u16 {
        match role {
            Role::Primary => self.primary,
            Role::Secondary => self.secondary,
        }
    }

    /// Every code the engine may leave pressed, deduplicated.
    pub fn all(&self) -> Vec<u16> {
        let mut codes = vec![self.primary, self.secondary, self.refresh_dummy];
        codes.sort_unstable();
        codes.dedup();
        codes
    }
}

impl Default for KeycodesConfig {
    fn default() -> Self {
        Self {
            primary: Self::default_primary(),
            secondary: Self::default_secondary(),
            refresh_dummy: Self::default_refresh_dummy(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortcutFallbackConfig {
    #[serde(default = "ShortcutFallbackConfig::default_modifiers")]
    pub modifiers: Vec<String>,
    #[serde(default = "ShortcutFallbackConfig::default_key")]
    pub key: String,
    #[serde(default = "ShortcutFallbackConfig::default_press_delay_us")]
    pub press_delay_us: u64,
    #[serde(default = "ShortcutFallbackConfig::default_interval")]
    pub interval_ms: u64,
    #[serde(default = "ShortcutFallbackConfig::default_max_presses")]
    pub max_presses: u32,
}

impl ShortcutFallbackConfig {
    fn default_modifiers() -> Vec<String> { vec!["super".into()] }
    fn default_key() -> String { "space".into() }
    fn default_press_delay_us() -> u64 { 10_000 }
    fn default_interval() -> u64 { 150 }
    fn default_max_presses() -> u32 { 3 }

    pub fn binding(&self) -> BindingConfig {
        BindingConfig {
            key: self.key.clone(),
            modifiers: self.modifiers.clone(),
        }
    }
}

impl Default for ShortcutFallbackConfig {
    fn default() -> Self {
        Self {
            modifiers: Self::default_modifiers(),
            key: Self::default_key(),
            press_delay_us: Self::default_press_delay_us(),
            interval_ms: Self::default_interval(),
            max_presses: Self::default_max_presses(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorConfig {
    #[serde(default = "BehaviorConfig::default_watchdog_interval")]
    pub watchdog_interval_ms: u64,
    #[serde(default = "BehaviorConfig::default_retry_interval")]
    pub retry_interval_ms: u64,
    #[serde(default = "BehaviorConfig::default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "BehaviorConfig::default_apply_delay")]
    pub apply_delay_ms: u64,
    #[serde(default = "BehaviorConfig::default_focus_delay")]
    pub focus_delay_ms: u64,
    #[serde(default = "BehaviorConfig::default_debounce_threshold")]
    pub debounce_threshold_ms: u64,
    /// Source-changed notifications this soon after the last apply are echoes.
    #[serde(default = "BehaviorConfig::default_echo_window")]
    pub echo_window_ms: u64,
    #[serde(default = "BehaviorConfig::default_alert_duration")]
    pub alert_duration_ms: u64,
    #[serde(default = "BehaviorConfig::default_alert_delay")]
    pub alert_delay_ms: u64,
    #[serde(default = "BehaviorConfig::default_key_up_delay")]
    pub key_up_delay_ms: u64,
    #[serde(default = "BehaviorConfig::default_true")]
    pub show_alert: bool,
    #[serde(default = "BehaviorConfig::default_true")]
    pub use_source_changed_watcher: bool,
    #[serde(default = "BehaviorConfig::default_source_poll_interval")]
    pub source_poll_interval_ms: u64,
    #[serde(default = "BehaviorConfig::default_true")]
    pub use_shortcut_fallback: bool,
    #[serde(default)]
    pub use_bounce_fallback: bool,
    #[serde(default = "BehaviorConfig::default_bounce_target")]
    pub bounce_target: Role,
    #[serde(default = "BehaviorConfig::default_bounce_delay")]
    pub bounce_delay_ms: u64,
    #[serde(default)]
    pub use_foreign_app_nudge: bool,
    #[serde(default = "BehaviorConfig::default_nudge_delay")]
    pub nudge_delay_ms: u64,
    #[serde(default = "BehaviorConfig::default_nudge_apps")]
    pub nudge_apps: Vec<String>,
    #[serde(default)]
    pub shortcut_fallback: ShortcutFallbackConfig,
}

impl BehaviorConfig {
    fn default_watchdog_interval() -> u64 { 30_000 }
    fn default_retry_interval() -> u64 { 100 }
    fn default_retry_count() -> u32 { 5 }
    fn default_apply_delay() -> u64 { 100 }
    fn default_focus_delay() -> u64 { 150 }
    fn default_debounce_threshold() -> u64 { 200 }
    fn default_echo_window() -> u64 { 500 }
    fn default_alert_duration() -> u64 { 600 }
    fn default_alert_delay() -> u64 { 30 }
    fn default_key_up_delay() -> u64 { 3 }
    fn default_true() -> bool { true }
    fn default_source_poll_interval() -> u64 { 250 }
    fn default_bounce_target() -> Role { Role::Secondary }
    fn default_bounce_delay() -> u64 { 80 }
    fn default_nudge_delay() -> u64 { 20 }
    fn default_nudge_apps() -> Vec<String> {
        vec!["firefox".into(), "chromium".into(), "google-chrome".into()]
    }

    pub fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            watchdog_interval_ms: Self::default_watchdog_interval(),
            retry_interval_ms: Self::default_retry_interval(),
            retry_count: Self::default_retry_count(),
            apply_delay_ms: Self::default_apply_delay(),
            focus_delay_ms: Self::default_focus_delay(),
            debounce_threshold_ms: Self::default_debounce_threshold(),
            echo_window_ms: Self::default_echo_window(),
            alert_duration_ms: Self::default_alert_duration(),
            alert_delay_ms: Self::default_alert_delay(),
            key_up_delay_ms: Self::default_key_up_delay(),
            show_alert: true,
            use_source_changed_watcher: true,
            source_poll_interval_ms: Self::default_source_poll_interval(),
            use_shortcut_fallback: true,
            use_bounce_fallback: false,
            bounce_target: Self::default_bounce_target(),
            bounce_delay_ms: Self::default_bounce_delay(),
            use_foreign_app_nudge: false,
            nudge_delay_ms: Self::default_nudge_delay(),
            nudge_apps: Self::default_nudge_apps(),
            shortcut_fallback: ShortcutFallbackConfig::default(),
        }
    }
}

/// Look of the on-screen label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopupConfig {
    #[serde(default = "PopupConfig::default_font_size")]
    pub font_size: u32,
}

impl PopupConfig {
    fn default_font_size() -> u32 { 28 }
}

impl Default for PopupConfig {
    fn default() -> Self {
        Self {
            font_size: Self::default_font_size(),
        }
    }
}

impl Config {
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("imsync")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        toml::from_str(&contents).with_context(|| "parsing config TOML")
    }
}

pub fn socket_path() -> PathBuf {
    // IMSYNC_SOCK overrides for testing.
    if let Ok(path) = std::env::var("IMSYNC_SOCK") {
        return PathBuf::from(path);
    }
    dirs::runtime_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("imsync.sock")
}
