use anyhow::{Context, Result};
use imsync_core::config;
use imsync_core::ipc::{self, ClientMsg, DaemonMsg};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::sync::mpsc as std_mpsc;
use tracing::{info, warn};

/// Register with the daemon as a popup. Daemon messages arrive on the
/// returned receiver; the stream must be kept alive by the caller.
pub fn connect() -> Result<(std_mpsc::Receiver<DaemonMsg>, UnixStream)> {
    let socket_path = config::socket_path();
    let stream = UnixStream::connect(&socket_path)
        .with_context(|| format!("connecting to {}", socket_path.display()))?;

    let mut write_stream = stream.try_clone().context("cloning stream")?;
    write_stream
        .write_all(ipc::encode(&ClientMsg::RegisterPopup).as_bytes())
        .context("sending register")?;

    let (tx, rx) = std_mpsc::channel();
    std::thread::spawn(move || {
        for line in BufReader::new(stream).lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "IPC read error");
                    break;
                }
            };
            let Some(msg) = ipc::decode_daemon(&line) else {
                continue;
            };
            if tx.send(msg).is_err() {
                break;
            }
        }
        info!("daemon connection closed");
    });

    Ok((rx, write_stream))
}
