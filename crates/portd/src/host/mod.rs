//! Collaborator capabilities consumed by the command handlers.
//!
//! - **FileStore**: read/write/exists on one host's files
//! - **ProcessHost**: spawn scripts, query them, copy files between hosts
//!
//! The local implementations in [`local`] model each host as a directory.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod local;

pub use local::{LocalFileStore, LocalProcessHost};

/// Process id. `0` is never a valid pid and signals a failed spawn.
pub type Pid = u32;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid path '{0}'")]
    InvalidPath(String),
    #[error("unknown host '{0}'")]
    UnknownHost(String),
    #[error("failed to start {script} on {host}")]
    SpawnFailed { script: String, host: String },
    #[error("failed to deploy {files} to {host}")]
    DeployFailed { files: String, host: String },
}

impl HostError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteMode {
    #[default]
    #[serde(rename = "w")]
    Overwrite,
    #[serde(rename = "a")]
    Append,
}

/// How a running process is identified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessTarget {
    Pid(Pid),
    Script(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub filename: String,
    pub threads: u32,
    pub args: Vec<String>,
}

/// Snapshot of one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub hostname: String,
    pub files: Vec<String>,
    pub processes: Vec<ProcessInfo>,
}

#[async_trait]
pub trait FileStore: Send + Sync {
    /// Contents of `path`. A missing file reads as the empty string.
    async fn read(&self, path: &str) -> Result<String, HostError>;

    /// Write `lines` joined with newlines.
    async fn write(&self, path: &str, lines: &[String], mode: WriteMode) -> Result<(), HostError>;

    async fn exists(&self, path: &str) -> Result<bool, HostError>;
}

#[async_trait]
pub trait ProcessHost: Send + Sync {
    /// Start `script` on `host`. Returns the pid, or `0` if it could not start.
    async fn spawn(
        &self,
        script: &str,
        host: &str,
        threads: u32,
        args: &[String],
    ) -> Result<Pid, HostError>;

    async fn is_running(
        &self,
        target: &ProcessTarget,
        host: &str,
        args: &[String],
    ) -> Result<bool, HostError>;

    /// Copy files from the home host to `destination`. `false` if any copy failed.
    async fn copy_files(&self, files: &[String], destination: &str) -> Result<bool, HostError>;

    async fn describe(&self, host: &str) -> Result<HostInfo, HostError>;
}

/// Resolve a host-relative path under `root`.
///
/// Leading slashes are ignored (`/data.txt` is `root/data.txt`); `..` is rejected.
pub(crate) fn sandbox_path(root: &Path, path: &str) -> Result<PathBuf, HostError> {
    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(HostError::InvalidPath(path.to_string()));
            }
        }
    }
    if depth == 0 {
        return Err(HostError::InvalidPath(path.to_string()));
    }
    Ok(resolved)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_path_strips_leading_slash() {
        let root = Path::new("/srv/hosts/home");
        assert_eq!(
            sandbox_path(root, "/data.txt").unwrap(),
            PathBuf::from("/srv/hosts/home/data.txt")
        );
        assert_eq!(
            sandbox_path(root, "lib/./util.sh").unwrap(),
            PathBuf::from("/srv/hosts/home/lib/util.sh")
        );
    }

    #[test]
    fn sandbox_path_rejects_escape_and_empty() {
        let root = Path::new("/srv/hosts/home");
        assert!(matches!(
            sandbox_path(root, "../other/secret"),
            Err(HostError::InvalidPath(_))
        ));
        assert!(matches!(sandbox_path(root, "/"), Err(HostError::InvalidPath(_))));
        assert!(matches!(sandbox_path(root, ""), Err(HostError::InvalidPath(_))));
    }

    #[test]
    fn write_mode_wire_names() {
        assert_eq!(serde_json::to_string(&WriteMode::Overwrite).unwrap(), r#""w""#);
        assert_eq!(
            serde_json::from_str::<WriteMode>(r#""a""#).unwrap(),
            WriteMode::Append
        );
    }
}
