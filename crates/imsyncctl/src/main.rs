use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use imsync_core::config;
use imsync_core::ipc::{self, ClientMsg, DaemonMsg};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;

#[derive(Parser)]
#[command(name = "imsyncctl", about = "Control the imsyncd daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show daemon status
    Status,
    /// Switch between the primary and secondary source
    Toggle,
    /// Make a specific source active
    Apply {
        /// Input source id (e.g., xkb:us::eng, mozc-jp)
        source: String,
        /// Apply even if the source already looks active
        #[arg(long)]
        force: bool,
    },
    /// Report that the focused window changed
    Focus {
        /// Application id of the newly focused window
        #[arg(long)]
        app: Option<String>,
    },
    /// Report a wake from sleep or a screen unlock
    Wake,
    /// Report that the active source changed
    SourceChanged {
        /// Input source id now active
        source: String,
    },
}

impl Command {
    fn into_msg(self) -> ClientMsg {
        match self {
            Command::Status => ClientMsg::GetStatus,
            Command::Toggle => ClientMsg::Toggle,
            Command::Apply { source, force } => ClientMsg::Apply { source, force },
            Command::Focus { app } => ClientMsg::FocusChanged { app },
            Command::Wake => ClientMsg::Wake,
            Command::SourceChanged { source } => ClientMsg::SourceChanged { source },
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let socket_path = config::socket_path();
    let stream = UnixStream::connect(&socket_path).with_context(|| {
        format!("connecting to imsyncd at {}\nIs the daemon running?", socket_path.display())
    })?;

    let mut writer = stream.try_clone().context("cloning stream")?;
    let reader = BufReader::new(stream);

    let line = ipc::encode(&cli.command.into_msg());
    writer.write_all(line.as_bytes()).context("sending command")?;

    for line in reader.lines() {
        let line = line.context("reading response")?;
        let Some(resp) = ipc::decode_daemon(&line) else {
            continue;
        };
        match resp {
            DaemonMsg::Status {
                desired,
                observed,
                primary,
                secondary,
                hotkeys_enabled,
                version,
            } => {
                println!("imsyncd v{}", version);
                println!("  primary:   {}", primary);
                println!("  secondary: {}", secondary);
                println!("  desired:   {}", desired.as_deref().unwrap_or("-"));
                println!("  observed:  {}", observed.as_deref().unwrap_or("-"));
                println!("  hotkeys:   {}", if hotkeys_enabled { "on" } else { "off" });
            }
            DaemonMsg::Ack { ok, message } => {
                if ok {
                    println!("{}", message);
                } else {
                    eprintln!("error: {}", message);
                    std::process::exit(1);
                }
            }
            _ => continue,
        }
        break;
    }

    Ok(())
}
