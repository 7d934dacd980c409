use std::path::{Path, PathBuf};
use std::process::Command;
use std::{env, fmt};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessInfoError {
    #[error("I/O error occurred: {0}")]
    IoError(#[from] std::io::Error),

    #[error("UTF-8 error occurred: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),

    #[error("command failed with non-zero exit status ({status}): {stderr}")]
    ExitStatusError { status: i32, stderr: String },

    #[error("failed to execute the command: {0}")]
    ExecutionError(String),
}

/// Host/process context stamped onto the daemon's startup log line and used as
/// the default fallback greeting host name when none is configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub process_current_exe: String,
    pub process_basename: String,
    pub process_pid: i64,
    pub process_user: String,
    pub process_host: String,
}

impl fmt::Display for ProcessInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (pid {}) running as {} on {}",
            self.process_basename, self.process_pid, self.process_user, self.process_host
        )
    }
}

pub fn get_process_info() -> Result<ProcessInfo, ProcessInfoError> {
    let current_exe = env::current_exe()?;
    let basename = process_basename(&current_exe)?;
    let pid = std::process::id() as i64;
    let user = process_user()?;
    let host = process_host()?;

    Ok(ProcessInfo {
        process_current_exe: current_exe.to_string_lossy().into_owned(),
        process_basename: basename,
        process_pid: pid,
        process_user: user,
        process_host: host,
    })
}

fn process_basename(exe_path: &Path) -> Result<String, ProcessInfoError> {
    let filename = exe_path
        .file_name()
        .and_then(|f| f.to_str())
        .ok_or_else(|| {
            ProcessInfoError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                "failed to read executable file name",
            ))
        })?;
    let basename = Path::new(filename)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(filename);
    Ok(basename.to_string())
}

fn process_user() -> Result<String, ProcessInfoError> {
    let program = if cfg!(target_os = "windows") {
        "whoami"
    } else {
        "whoami"
    };
    match Command::new(program).output() {
        Ok(output) if output.status.success() => {
            Ok(std::str::from_utf8(&output.stdout)?.trim().to_string())
        }
        Ok(output) => Err(ProcessInfoError::ExitStatusError {
            status: output.status.code().unwrap_or(-1),
            stderr: std::str::from_utf8(&output.stderr)?.trim().to_string(),
        }),
        Err(e) => Err(ProcessInfoError::ExecutionError(e.to_string())),
    }
}

fn process_host() -> Result<String, ProcessInfoError> {
    Ok(PathBuf::from(
        std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
    )
    .to_string_lossy()
    .into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_basename_strips_extension() {
        assert_eq!(
            process_basename(Path::new("/usr/local/bin/ftpd.exe")).unwrap(),
            "ftpd"
        );
        assert_eq!(
            process_basename(Path::new("/usr/local/bin/ftpd")).unwrap(),
            "ftpd"
        );
    }

    #[test]
    fn get_process_info_succeeds() {
        let info = get_process_info().unwrap();
        assert!(info.process_pid > 0);
        assert!(!info.process_basename.is_empty());
    }
}
