use gtk4::prelude::*;
use tracing::{debug, warn};

use crate::layer_shell;

/// Build the hidden label window. Returns the window and its label.
pub fn build_popup(app: &gtk4::Application, font_size: u32) -> (gtk4::Window, gtk4::Label) {
    let window = gtk4::Window::builder()
        .application(app)
        .title("imsync")
        .decorated(false)
        .resizable(false)
        .default_width(1)
        .default_height(1)
        .build();

    if !layer_shell::try_init_layer_shell(&window) {
        debug!("using a plain window for the label");
    }

    let label = gtk4::Label::new(None);
    label.set_halign(gtk4::Align::Center);
    label.set_valign(gtk4::Align::Center);

    let css_provider = gtk4::CssProvider::new();
    css_provider.load_from_data(&format!(
        "
        window {{
            background-color: rgba(30, 30, 30, 0.9);
            border-radius: 14px;
        }}
        label {{
            color: white;
            font-size: {}px;
            font-weight: bold;
            padding: 16px 28px;
        }}
        ",
        font_size,
    ));
    match gtk4::gdk::Display::default() {
        Some(display) => gtk4::style_context_add_provider_for_display(
            &display,
            &css_provider,
            gtk4::STYLE_PROVIDER_PRIORITY_APPLICATION,
        ),
        None => warn!("no display, label will be unstyled"),
    }

    window.set_child(Some(&label));
    window.set_visible(false);

    (window, label)
}

pub fn show_label(window: &gtk4::Window, label: &gtk4::Label, text: &str) {
    label.set_text(text);
    window.set_visible(true);
    debug!(text, "label shown");
}

pub fn hide_label(window: &gtk4::Window) {
    window.set_visible(false);
    debug!("label hidden");
}
