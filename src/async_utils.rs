//! Helpers for running external commands and writing files from async code.

use std::{fs, io::Write as _, process::Output};

use tempfile::NamedTempFile;

use crate::prelude::*;

/// Report any command failures, and include any error output.
///
/// Standard output is logged at `debug`, and standard error at `warn` if
/// there is any.
pub fn check_for_command_failure(command_name: &str, output: &Output) -> Result<()> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    debug!(command_name, output = %stdout, "Standard output from command");
    if !stderr.trim().is_empty() {
        warn!(command_name, output = %stderr, "Standard error from command");
    }

    if output.status.success() {
        Ok(())
    } else if let Some(exit_code) = output.status.code() {
        Err(anyhow!(
            "{} failed with exit code {} and error output:\n{}",
            command_name,
            exit_code,
            stderr,
        ))
    } else {
        Err(anyhow!("{} failed with error output:\n{}", command_name, stderr))
    }
}

/// Replace the contents of `path` with `contents`.
///
/// We write to a temporary file in the same directory and rename it into
/// place, so readers never see a half-written file. An existing file keeps
/// its permissions. A new file gets the same mode a plain create would give
/// it under the current umask.
pub async fn write_atomically(path: &Path, contents: Vec<u8>) -> EngineResult<()> {
    let target = path.to_owned();
    tokio::task::spawn_blocking(move || write_atomically_blocking(&target, &contents))
        .await
        .map_err(|err| EngineError::plugin(anyhow!("write task panicked: {err}")))?
}

fn write_atomically_blocking(path: &Path, contents: &[u8]) -> EngineResult<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = temp_file_in(dir).map_err(|err| EngineError::io(path, err))?;
    match fs::metadata(path) {
        Ok(existing) => tmp
            .as_file()
            .set_permissions(existing.permissions())
            .map_err(|err| EngineError::io(path, err))?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(EngineError::io(path, err)),
    }
    tmp.write_all(contents)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|err| EngineError::io(path, err))?;
    tmp.persist(path)
        .map_err(|err| EngineError::io(path, err.error))?;
    Ok(())
}

/// Create a temp file in `dir` with the default mode for new files, rather
/// than `tempfile`'s private `0o600`.
#[cfg(unix)]
fn temp_file_in(dir: &Path) -> std::io::Result<NamedTempFile> {
    use std::os::unix::fs::PermissionsExt as _;

    tempfile::Builder::new()
        .permissions(fs::Permissions::from_mode(0o666))
        .tempfile_in(dir)
}

#[cfg(not(unix))]
fn temp_file_in(dir: &Path) -> std::io::Result<NamedTempFile> {
    NamedTempFile::new_in(dir)
}
