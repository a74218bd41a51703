use serde::{Deserialize, Serialize};

/// Messages from daemon to popup/clients (JSON-lines over Unix socket).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DaemonMsg {
    /// Show a transient label; the popup hides it after `duration_ms`.
    #[serde(rename = "show_alert")]
    ShowAlert {
        id: u64,
        text: String,
        duration_ms: u64,
    },
    /// Force-close the label with this id if it is still shown.
    #[serde(rename = "close_alert")]
    CloseAlert { id: u64 },
    /// Status response.
    #[serde(rename = "status")]
    Status {
        desired: Option<String>,
        observed: Option<String>,
        primary: String,
        secondary: String,
        hotkeys_enabled: bool,
        version: String,
    },
    /// Acknowledgement for commands.
    #[serde(rename = "ack")]
    Ack { ok: bool, message: String },
}

/// Messages from clients to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMsg {
    /// Same as pressing the toggle hotkey.
    #[serde(rename = "toggle")]
    Toggle,
    /// Apply a specific source.
    #[serde(rename = "apply")]
    Apply {
        source: String,
        #[serde(default)]
        force: bool,
    },
    /// The focused window changed, optionally naming the new app.
    #[serde(rename = "focus_changed")]
    FocusChanged {
        #[serde(default)]
        app: Option<String>,
    },
    /// The system woke up or the screen was unlocked.
    #[serde(rename = "wake")]
    Wake,
    /// An external watcher saw the active source change.
    #[serde(rename = "source_changed")]
    SourceChanged { source: String },
    /// Request current status.
    #[serde(rename = "get_status")]
    GetStatus,
    /// Popup client announcing itself (for routing alerts).
    #[serde(rename = "register_popup")]
    RegisterPopup,
}

/// Serialize a message as a JSON line (with trailing newline).
pub fn encode(msg: &impl Serialize) -> String {
    // Derived Serialize on these enums cannot fail.
    let mut s = serde_json::to_string(msg).unwrap_or_default();
    s.push('\n');
    s
}

/// Deserialize a JSON line. Returns None on empty/whitespace input.
pub fn decode_daemon(line: &str) -> Option<DaemonMsg> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

pub fn decode_client(line: &str) -> Option<ClientMsg> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}
