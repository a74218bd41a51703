use crate::hotkey::ChordMatcher;
use crate::router::Signal;
use crate::uinput_emitter::DEVICE_NAME;
use anyhow::{Context, Result};
use evdev::{Device, EventType};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Find all keyboard devices under /dev/input/.
pub fn find_keyboards() -> Result<Vec<PathBuf>> {
    let mut keyboards = Vec::new();
    let input_dir = Path::new("/dev/input");

    for entry in std::fs::read_dir(input_dir).context("reading /dev/input")? {
        let path = entry?.path();

        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if !name.starts_with("event") {
            continue;
        }

        match Device::open(&path) {
            Ok(dev) => {
                // Our own synthesized keys must never look like hotkeys.
                if dev.name().is_some_and(|n| n == DEVICE_NAME) {
                    debug!(path = %path.display(), "skipping own virtual device");
                    continue;
                }
                if is_keyboard(&dev) {
                    info!(path = %path.display(), name = ?dev.name(), "found keyboard");
                    keyboards.push(path);
                }
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "skipping device");
            }
        }
    }

    Ok(keyboards)
}

/// A device is a keyboard if it reports letter keys and Enter.
fn is_keyboard(dev: &Device) -> bool {
    let Some(keys) = dev.supported_keys() else {
        return false;
    };
    keys.contains(evdev::Key::KEY_A) && keys.contains(evdev::Key::KEY_Z) && keys.contains(evdev::Key::KEY_ENTER)
}

/// Read a keyboard without grabbing it and forward matched hotkeys.
/// Runs until the receiver is dropped or the device errors.
pub async fn watch_device(path: PathBuf, mut matcher: ChordMatcher, tx: mpsc::UnboundedSender<Signal>) -> Result<()> {
    let dev = Device::open(&path).with_context(|| format!("opening {}", path.display()))?;
    let dev_name = dev.name().unwrap_or("unknown").to_string();
    debug!(device = %dev_name, path = %path.display(), "listening for hotkeys");

    let mut stream = dev.into_event_stream().context("creating event stream")?;
    loop {
        let event = match stream.next_event().await {
            Ok(event) => event,
            Err(e) => {
                warn!(device = %dev_name, error = %e, "device error, hotkey listener stopping");
                break;
            }
        };
        if event.event_type() != EventType::KEY {
            continue;
        }
        if let Some(hotkey) = matcher.feed(event.code(), event.value()) {
            debug!(device = %dev_name, ?hotkey, "hotkey pressed");
            if tx.send(Signal::Hotkey(hotkey)).is_err() {
                break;
            }
        }
    }
    Ok(())
}
