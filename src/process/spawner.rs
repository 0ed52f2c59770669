use crate::error::{Result, WardenError};
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Metadata returned when spawning a process
#[derive(Debug)]
pub struct SpawnedProcess {
    /// The child process handle
    pub child: Child,

    /// Process ID assigned by the OS; also the process group id
    pub pid: u32,
}

/// Spawn `command` through `shell -c`
///
/// The child leads its own process group so that a stop can signal every
/// process the command forks. stdin is closed, stdout and stderr are piped.
pub fn spawn_command(shell: &Path, command: &str) -> Result<SpawnedProcess> {
    if command.trim().is_empty() {
        return Err(WardenError::SpawnError("Command is empty".to_string()));
    }

    let mut cmd = Command::new(shell);
    cmd.arg("-c").arg(command);

    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    #[cfg(unix)]
    cmd.process_group(0);

    let child = cmd.spawn().map_err(|e| {
        WardenError::SpawnError(format!(
            "Failed to spawn '{}' via {}: {}",
            command,
            shell.display(),
            e
        ))
    })?;

    let pid = child.id().ok_or_else(|| {
        WardenError::SpawnError(format!("Failed to get PID for '{}'", command))
    })?;

    Ok(SpawnedProcess { child, pid })
}
