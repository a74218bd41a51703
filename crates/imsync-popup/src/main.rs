mod alert;
mod ipc_client;
mod layer_shell;
mod window;

use alert::AlertState;
use anyhow::Result;
use gtk4::glib;
use gtk4::prelude::*;
use imsync_core::config::Config;
use imsync_core::ipc::DaemonMsg;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use tracing::{info, warn};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("imsync_popup=info".parse()?))
        .init();

    info!("imsync-popup starting");

    let config = Config::load().unwrap_or_else(|e| {
        warn!(error = %format!("{e:#}"), "config unreadable, using defaults");
        Config::default()
    });
    let font_size = config.popup.font_size;

    let app = gtk4::Application::builder()
        .flags(gtk4::gio::ApplicationFlags::NON_UNIQUE)
        .build();

    app.connect_activate(move |app| {
        let (popup_window, popup_label) = window::build_popup(app, font_size);

        let (rx, stream) = match ipc_client::connect() {
            Ok(conn) => {
                info!("connected to imsyncd");
                conn
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "failed to connect to daemon, nothing to show");
                return;
            }
        };

        let popup_window = Rc::new(popup_window);
        let popup_label = Rc::new(popup_label);
        let state = Rc::new(RefCell::new(AlertState::default()));

        // Poll daemon messages on the GTK main loop.
        glib::timeout_add_local(Duration::from_millis(16), move || {
            // Hold the write half for as long as we listen.
            let _registered = &stream;
            while let Ok(msg) = rx.try_recv() {
                match msg {
                    DaemonMsg::ShowAlert { id, text, duration_ms } => {
                        state.borrow_mut().show(id);
                        window::show_label(&popup_window, &popup_label, &text);

                        let pw = Rc::clone(&popup_window);
                        let st = Rc::clone(&state);
                        glib::timeout_add_local_once(Duration::from_millis(duration_ms), move || {
                            if st.borrow_mut().close(id) {
                                window::hide_label(&pw);
                            }
                        });
                    }
                    DaemonMsg::CloseAlert { id } => {
                        if state.borrow_mut().close(id) {
                            window::hide_label(&popup_window);
                        }
                    }
                    _ => {}
                }
            }
            glib::ControlFlow::Continue
        });
    });

    app.run_with_args::<&str>(&[]);
    Ok(())
}
