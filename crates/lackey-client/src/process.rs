//! Locating, launching, and terminating the datalackey daemon process.

use std::env;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::SpawnError;

/// Log target for process management.
const PROCESS_TARGET: &str = "lackey_client::process";

/// Name of the daemon executable.
const DAEMON_NAME: &str = "datalackey";

/// Installation directories searched before `PATH`.
const LIBEXEC_DIRS: &[&str] = &["/usr/local/libexec", "/usr/libexec"];

/// File permission covers the daemon accepts for its storage directory.
const PERMISSION_COVERS: &[&str] = &["600", "660", "666"];

/// Options for launching the daemon.
///
/// Storage is either in memory or under a directory; the two are
/// mutually exclusive. Unset directory and permissions default to the
/// working directory and a cover derived from the process umask.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Explicit daemon executable; located automatically when unset.
    pub executable: Option<PathBuf>,
    /// Keep all data in memory.
    pub memory: bool,
    /// Store data under this directory.
    pub directory: Option<PathBuf>,
    /// File permission cover: `600`, `660`, or `666`.
    pub permissions: Option<String>,
}

impl LaunchConfig {
    /// Validates the options and fills in directory and permission
    /// defaults for directory-backed storage.
    ///
    /// # Errors
    ///
    /// Returns [`SpawnError::MemoryWithDirectory`] when memory storage is
    /// combined with directory options, [`SpawnError::MissingDirectory`]
    /// when the requested directory does not exist, and
    /// [`SpawnError::InvalidPermissions`] for an unsupported cover.
    pub fn validated(mut self) -> Result<Self, SpawnError> {
        if self.memory {
            if self.directory.is_some() || self.permissions.is_some() {
                return Err(SpawnError::MemoryWithDirectory);
            }
            return Ok(self);
        }

        let directory = match self.directory.take() {
            Some(directory) => {
                if !directory.is_dir() {
                    return Err(SpawnError::MissingDirectory {
                        path: directory.display().to_string(),
                    });
                }
                directory
            }
            None => env::current_dir().map_err(|source| SpawnError::SpawnFailed {
                message: "cannot determine working directory".to_owned(),
                source,
            })?,
        };
        self.directory = Some(directory);

        match &self.permissions {
            Some(cover) => {
                if !PERMISSION_COVERS.contains(&cover.as_str()) {
                    return Err(SpawnError::InvalidPermissions {
                        value: cover.clone(),
                    });
                }
            }
            None => self.permissions = Some(default_permissions().to_owned()),
        }
        Ok(self)
    }
}

/// Derives the widest permission cover the umask leaves open.
#[cfg(unix)]
fn default_permissions() -> &'static str {
    // Reading the umask requires setting it; restore immediately.
    let mask = unsafe { libc::umask(0) };
    unsafe {
        libc::umask(mask);
    }
    if mask & 0o77 == 0 {
        "666"
    } else if mask & 0o70 == 0 {
        "660"
    } else {
        "600"
    }
}

#[cfg(not(unix))]
fn default_permissions() -> &'static str {
    "600"
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Finds an executable: as given (absolute or relative to the working
/// directory), then in the extra directories, then on `PATH`.
#[must_use]
pub fn locate_executable(name: &str, extra_dirs: &[PathBuf]) -> Option<PathBuf> {
    let direct = Path::new(name);
    if is_executable(direct) {
        return Some(direct.to_path_buf());
    }
    let path_dirs = env::var_os("PATH")
        .map(|paths| env::split_paths(&paths).collect::<Vec<_>>())
        .unwrap_or_default();
    extra_dirs
        .iter()
        .cloned()
        .chain(path_dirs)
        .map(|directory| directory.join(name))
        .find(|candidate| is_executable(candidate))
}

/// A running daemon process with piped stdio.
#[derive(Debug)]
pub struct LackeyProcess {
    child: Child,
    executable: PathBuf,
    exit_code: Option<i32>,
}

impl LackeyProcess {
    /// Validates the configuration, locates the executable, and spawns
    /// the daemon with JSON commands on stdin and stdout.
    ///
    /// # Errors
    ///
    /// Returns a validation error from [`LaunchConfig::validated`],
    /// [`SpawnError::BinaryNotFound`] when no executable can be located,
    /// or [`SpawnError::SpawnFailed`] when spawning fails.
    pub fn launch(config: &LaunchConfig) -> Result<Self, SpawnError> {
        let config = config.clone().validated()?;
        let executable = match &config.executable {
            Some(path) => {
                if !is_executable(path) {
                    return Err(SpawnError::BinaryNotFound {
                        command: path.display().to_string(),
                    });
                }
                path.clone()
            }
            None => {
                let extra: Vec<PathBuf> = LIBEXEC_DIRS.iter().map(PathBuf::from).collect();
                locate_executable(DAEMON_NAME, &extra).ok_or(SpawnError::BinaryNotFound {
                    command: DAEMON_NAME.to_owned(),
                })?
            }
        };

        let mut command = Command::new(&executable);
        command
            .args(["--command-in", "stdin", "JSON", "--command-out", "stdout", "JSON"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if config.memory {
            command.arg("--memory");
        }
        if let Some(directory) = &config.directory {
            command.arg("--directory").arg(directory);
        }
        if let Some(permissions) = &config.permissions {
            command.args(["--permissions", permissions]);
        }

        let child = command.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                SpawnError::BinaryNotFound {
                    command: executable.display().to_string(),
                }
            } else {
                SpawnError::SpawnFailed {
                    message: format!("failed to start {}", executable.display()),
                    source,
                }
            }
        })?;

        debug!(
            target: PROCESS_TARGET,
            executable = %executable.display(),
            pid = child.id(),
            "daemon spawned"
        );

        Ok(Self {
            child,
            executable,
            exit_code: None,
        })
    }

    /// The executable the daemon was launched from.
    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Takes the daemon's stdin for the engine's outbound channel.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Takes the daemon's stdout for the engine's inbound channel.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Takes the daemon's stderr, typically handed to a
    /// [`crate::StoringReader`] or [`crate::DiscardReader`].
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Closes the daemon's stdin and waits for it to exit, recording the
    /// exit code.
    pub fn finish(&mut self) -> Option<i32> {
        drop(self.child.stdin.take());
        match self.child.wait() {
            Ok(status) => self.exit_code = status.code(),
            Err(error) => {
                warn!(
                    target: PROCESS_TARGET,
                    error = %error,
                    "failed to wait for daemon exit"
                );
            }
        }
        self.exit_code
    }

    /// The exit code recorded by [`LackeyProcess::finish`].
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }
}

impl Drop for LackeyProcess {
    fn drop(&mut self) {
        if self.exit_code.is_some() {
            return;
        }
        match self.child.try_wait() {
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => {
                if let Err(error) = self.child.kill() {
                    warn!(
                        target: PROCESS_TARGET,
                        error = %error,
                        "failed to kill daemon on drop"
                    );
                } else {
                    let _ = self.child.wait();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use rstest::rstest;

    use super::{LaunchConfig, locate_executable};
    use crate::errors::SpawnError;

    #[rstest]
    fn memory_excludes_directory_options() {
        let config = LaunchConfig {
            memory: true,
            directory: Some(PathBuf::from("/tmp")),
            ..LaunchConfig::default()
        };
        assert!(matches!(
            config.validated(),
            Err(SpawnError::MemoryWithDirectory)
        ));
    }

    #[rstest]
    fn memory_alone_validates() {
        let config = LaunchConfig {
            memory: true,
            ..LaunchConfig::default()
        };
        let validated = config.validated().expect("validation failed");
        assert!(validated.directory.is_none());
        assert!(validated.permissions.is_none());
    }

    #[rstest]
    fn missing_directory_is_rejected() {
        let temp = tempfile::tempdir().expect("temp dir");
        let gone = temp.path().join("no-such-dir");
        let config = LaunchConfig {
            directory: Some(gone),
            ..LaunchConfig::default()
        };
        assert!(matches!(
            config.validated(),
            Err(SpawnError::MissingDirectory { .. })
        ));
    }

    #[rstest]
    fn existing_directory_is_accepted_and_permissions_defaulted() {
        let temp = tempfile::tempdir().expect("temp dir");
        let config = LaunchConfig {
            directory: Some(temp.path().to_path_buf()),
            ..LaunchConfig::default()
        };
        let validated = config.validated().expect("validation failed");
        assert_eq!(validated.directory, Some(temp.path().to_path_buf()));
        let cover = validated.permissions.expect("missing permissions");
        assert!(["600", "660", "666"].contains(&cover.as_str()));
    }

    #[rstest]
    fn unsupported_permissions_are_rejected() {
        let temp = tempfile::tempdir().expect("temp dir");
        let config = LaunchConfig {
            directory: Some(temp.path().to_path_buf()),
            permissions: Some("644".to_owned()),
            ..LaunchConfig::default()
        };
        assert!(matches!(
            config.validated(),
            Err(SpawnError::InvalidPermissions { .. })
        ));
    }

    #[rstest]
    fn locate_misses_nonexistent_executable() {
        assert!(locate_executable("no-such-binary-hopefully", &[]).is_none());
    }

    #[cfg(unix)]
    #[rstest]
    fn locate_finds_executable_in_extra_dir() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("temp dir");
        let path = temp.path().join("fake-lackey");
        std::fs::write(&path, b"#!/bin/sh\n").expect("write stub");
        let mut permissions = std::fs::metadata(&path).expect("metadata").permissions();
        permissions.set_mode(0o755);
        std::fs::set_permissions(&path, permissions).expect("set permissions");

        let found = locate_executable("fake-lackey", &[temp.path().to_path_buf()]);
        assert_eq!(found, Some(path));
    }
}
