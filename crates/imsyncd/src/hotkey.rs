use crate::grabber;
use crate::router::{Hotkey, Signal};
use anyhow::{bail, Result};
use imsync_core::config::Config;
use imsync_core::keys::{self, Chord, Modifiers};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Resolve the configured bindings. Invalid ones are skipped.
pub fn parse_bindings(config: &Config) -> Vec<(Chord, Hotkey)> {
    let configured = [
        (Hotkey::Toggle, &config.bindings.toggle),
        (Hotkey::Debug, &config.bindings.debug),
    ];
    configured
        .into_iter()
        .filter_map(|(hotkey, binding)| match keys::parse_chord(binding) {
            Ok(chord) => Some((chord, hotkey)),
            Err(e) => {
                warn!(?hotkey, error = %e, "invalid hotkey binding, skipped");
                None
            }
        })
        .collect()
}

/// Tracks held modifiers on one keyboard and matches presses against
/// the bindings. Modifiers must match exactly.
#[derive(Debug, Clone)]
pub struct ChordMatcher {
    bindings: Vec<(Chord, Hotkey)>,
    held: Vec<u16>,
}

impl ChordMatcher {
    pub fn new(bindings: Vec<(Chord, Hotkey)>) -> Self {
        Self { bindings, held: Vec::new() }
    }

    fn modifiers(&self) -> Modifiers {
        let mut mods = Modifiers::NONE;
        for m in self.held.iter().filter_map(|&code| keys::keycode_to_modifier(code)) {
            mods.insert(m);
        }
        mods
    }

    /// Feed one key event (`value`: 0 release, 1 press, 2 repeat).
    pub fn feed(&mut self, code: u16, value: i32) -> Option<Hotkey> {
        if keys::keycode_to_modifier(code).is_some() {
            match value {
                0 => self.held.retain(|&c| c != code),
                1 if !self.held.contains(&code) => self.held.push(code),
                _ => {}
            }
            return None;
        }
        if value != 1 {
            return None;
        }
        let mods = self.modifiers();
        self.bindings
            .iter()
            .find(|(chord, _)| chord.code == code && chord.modifiers == mods)
            .map(|(_, hotkey)| *hotkey)
    }
}

/// One listener task per keyboard. Enabled while any task is alive, or
/// always when there is nothing to intercept.
pub struct HotkeyTap {
    bindings: Vec<(Chord, Hotkey)>,
    tx: mpsc::UnboundedSender<Signal>,
    tasks: Vec<JoinHandle<()>>,
}

impl HotkeyTap {
    pub fn new(bindings: Vec<(Chord, Hotkey)>, tx: mpsc::UnboundedSender<Signal>) -> Self {
        if bindings.is_empty() {
            warn!("no valid hotkey bindings, hotkey interception disabled");
        }
        Self {
            bindings,
            tx,
            tasks: Vec::new(),
        }
    }

    pub fn start(&mut self) -> Result<()> {
        self.stop();
        if self.bindings.is_empty() {
            return Ok(());
        }
        let keyboards = grabber::find_keyboards()?;
        if keyboards.is_empty() {
            bail!("no keyboards found, check permissions (group 'input' or udev rules)");
        }
        for path in keyboards {
            let matcher = ChordMatcher::new(self.bindings.clone());
            let tx = self.tx.clone();
            self.tasks.push(tokio::spawn(async move {
                if let Err(e) = grabber::watch_device(path.clone(), matcher, tx).await {
                    error!(path = %path.display(), error = %e, "hotkey listener failed");
                }
            }));
        }
        info!(keyboards = self.tasks.len(), "hotkey interception started");
        Ok(())
    }

    pub fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.bindings.is_empty() || self.tasks.iter().any(|t| !t.is_finished())
    }
}
