use gtk4_layer_shell::{Edge, KeyboardMode, Layer, LayerShell};
use tracing::info;

/// Turn the window into a centered overlay surface on compositors that
/// speak wlr-layer-shell. Returns false elsewhere (GNOME, X11), where the
/// label stays a plain undecorated window.
pub fn try_init_layer_shell(window: &gtk4::Window) -> bool {
    if !gtk4_layer_shell::is_supported() {
        info!("layer-shell not supported on this compositor");
        return false;
    }

    window.init_layer_shell();
    window.set_layer(Layer::Overlay);
    // The label must never take focus from the app being typed into.
    window.set_keyboard_mode(KeyboardMode::None);
    for edge in [Edge::Top, Edge::Bottom, Edge::Left, Edge::Right] {
        window.set_anchor(edge, false);
    }
    window.set_exclusive_zone(-1);

    info!("layer-shell initialized");
    true
}
