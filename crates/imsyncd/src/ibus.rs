use anyhow::{bail, Context, Result};
use std::process::Command;

/// Run the `ibus` CLI and return trimmed stdout.
fn ibus(args: &[&str]) -> Result<String> {
    let output = Command::new("ibus")
        .args(args)
        .output()
        .with_context(|| format!("running ibus {}", args.join(" ")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("ibus {} failed: {}", args.join(" "), stderr.trim());
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

pub fn current_engine() -> Result<String> {
    let engine = ibus(&["engine"])?;
    if engine.is_empty() {
        bail!("ibus reported no active engine");
    }
    Ok(engine)
}

pub fn set_engine(id: &str) -> Result<()> {
    ibus(&["engine", id]).map(|_| ())
}

pub fn list_engines() -> Result<Vec<String>> {
    Ok(parse_engine_list(&ibus(&["list-engine"])?))
}

/// Parse `ibus list-engine` output:
///
/// ```text
/// language: English
///   xkb:us::eng - English (US)
/// ```
pub fn parse_engine_list(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| line.starts_with(char::is_whitespace))
        .filter_map(|line| line.trim().split(" - ").next())
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect()
}
