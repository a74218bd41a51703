use anyhow::{Context, Result};
use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AttributeSet, EventType, InputEvent, Key};
use imsync_core::keys::Chord;
use std::time::Duration;
use tracing::info;

/// Name of our virtual keyboard; the hotkey listener skips it.
pub const DEVICE_NAME: &str = "imsync virtual keyboard";

pub trait EventEmitter {
    fn emit_events(&mut self, events: &[InputEvent]) -> Result<()>;
}

impl EventEmitter for VirtualDevice {
    fn emit_events(&mut self, events: &[InputEvent]) -> Result<()> {
        self.emit(events)?;
        Ok(())
    }
}

pub fn create_virtual_device() -> Result<VirtualDevice> {
    let mut keys = AttributeSet::<Key>::new();
    for code in 0..=255u16 {
        keys.insert(Key::new(code));
    }

    let vdev = VirtualDeviceBuilder::new()
        .context("creating VirtualDeviceBuilder")?
        .name(DEVICE_NAME)
        .with_keys(&keys)
        .context("setting keys")?
        .build()
        .context("building virtual device")?;

    info!("virtual uinput device created");
    Ok(vdev)
}

fn syn() -> InputEvent {
    InputEvent::new(EventType::SYNCHRONIZATION, 0, 0)
}

/// Press or release a single key. Each change is its own emit so the
/// kernel registers it before the next.
pub fn post_key(emitter: &mut impl EventEmitter, code: u16, pressed: bool) -> Result<()> {
    let value = if pressed { 1 } else { 0 };
    emitter.emit_events(&[InputEvent::new(EventType::KEY, code, value), syn()])
}

/// Modifiers down, key tap, modifiers up in reverse order. The key is held
/// for `press_delay`.
pub fn post_chord(emitter: &mut impl EventEmitter, chord: &Chord, press_delay: Duration) -> Result<()> {
    let modifiers = chord.modifiers.keycodes();
    for &code in &modifiers {
        post_key(emitter, code, true)?;
    }
    post_key(emitter, chord.code, true)?;
    std::thread::sleep(press_delay);
    post_key(emitter, chord.code, false)?;
    for &code in modifiers.iter().rev() {
        post_key(emitter, code, false)?;
    }
    Ok(())
}
