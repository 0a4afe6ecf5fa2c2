//! External command execution for shell and pipe recipes.

use crate::graph::Command;
use anyhow::{bail, Context};
use std::process::Stdio;

/// Run a command to completion.  stdin is never inherited: a build step
/// must not block on terminal input.  With `capture`, stdout goes to a
/// freshly truncated file at that path (the pipe variant); otherwise
/// stdio is left alone and the command writes its products itself.
pub fn run_command(command: &Command, capture: Option<&str>) -> anyhow::Result<()> {
    let (program, args) = command.argv.split_first().context("empty command line")?;
    let mut cmd = std::process::Command::new(program);
    cmd.args(args).stdin(Stdio::null());
    for (key, value) in &command.env {
        cmd.env(key, value);
    }
    if let Some(path) = capture {
        let out = std::fs::File::create(path).with_context(|| format!("create {}", path))?;
        cmd.stdout(Stdio::from(out));
    }
    let status = cmd.status().with_context(|| format!("spawn {}", program))?;
    if status.success() {
        return Ok(());
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            match sig {
                libc::SIGINT => bail!("interrupted"),
                _ => bail!("killed by signal {}", sig),
            }
        }
    }
    match status.code() {
        Some(code) => bail!("exited with status {}", code),
        None => bail!("terminated abnormally"),
    }
}
