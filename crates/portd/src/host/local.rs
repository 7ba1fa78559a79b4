//! Local sandbox collaborators.
//!
//! Directory layout: `{root}/{host}/...`. Every host is a directory; a file
//! handle like `/lib/util.sh` on host `n00dles` is `{root}/n00dles/lib/util.sh`.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

use super::{
    FileStore, HostError, HostInfo, Pid, ProcessHost, ProcessInfo, ProcessTarget, WriteMode,
    sandbox_path,
};

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

/// File store rooted at one host directory.
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn read(&self, path: &str) -> Result<String, HostError> {
        let full = sandbox_path(&self.root, path)?;
        match tokio::fs::read_to_string(&full).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(HostError::io(&full, e)),
        }
    }

    async fn write(&self, path: &str, lines: &[String], mode: WriteMode) -> Result<(), HostError> {
        let full = sandbox_path(&self.root, path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| HostError::io(parent, e))?;
        }

        let data = lines.join("\n");
        match mode {
            WriteMode::Overwrite => tokio::fs::write(&full, data)
                .await
                .map_err(|e| HostError::io(&full, e)),
            WriteMode::Append => {
                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&full)
                    .await
                    .map_err(|e| HostError::io(&full, e))?;
                file.write_all(data.as_bytes())
                    .await
                    .map_err(|e| HostError::io(&full, e))?;
                file.flush().await.map_err(|e| HostError::io(&full, e))
            }
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, HostError> {
        let full = sandbox_path(&self.root, path)?;
        match tokio::fs::metadata(&full).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(HostError::io(&full, e)),
        }
    }
}

struct ProcessRecord {
    host: String,
    info: ProcessInfo,
    child: Child,
}

/// Process host over the local filesystem and OS processes.
///
/// Only processes started through this instance are tracked. Exited
/// processes are reaped lazily on every query.
pub struct LocalProcessHost {
    root: PathBuf,
    home: String,
    processes: DashMap<Pid, ProcessRecord>,
}

impl LocalProcessHost {
    pub fn new(root: impl Into<PathBuf>, home: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            home: home.into(),
            processes: DashMap::new(),
        }
    }

    pub fn home(&self) -> &str {
        &self.home
    }

    fn host_dir(&self, host: &str) -> Result<PathBuf, HostError> {
        sandbox_path(&self.root, host).map_err(|_| HostError::UnknownHost(host.to_string()))
    }

    fn reap(&self) {
        let mut finished = Vec::new();
        for mut entry in self.processes.iter_mut() {
            let pid = *entry.key();
            match entry.value_mut().child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!(pid, %status, "Process exited");
                    finished.push(pid);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(pid, error = %e, "Failed to poll process; dropping it");
                    finished.push(pid);
                }
            }
        }
        for pid in finished {
            self.processes.remove(&pid);
        }
    }
}

#[async_trait]
impl ProcessHost for LocalProcessHost {
    async fn spawn(
        &self,
        script: &str,
        host: &str,
        threads: u32,
        args: &[String],
    ) -> Result<Pid, HostError> {
        if threads == 0 {
            tracing::warn!(script, host, "Refusing to start script with zero threads");
            return Ok(0);
        }

        let host_dir = self.host_dir(host)?;
        if !is_dir(&host_dir).await {
            tracing::warn!(script, host, "Cannot start script on unknown host");
            return Ok(0);
        }
        let script_path = sandbox_path(&host_dir, script)?;

        let child = Command::new(&script_path)
            .args(args)
            .current_dir(&host_dir)
            .env("PORTD_HOST", host)
            .env("PORTD_THREADS", threads.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(script, host, error = %e, "Failed to start script");
                return Ok(0);
            }
        };

        let Some(pid) = child.id() else {
            tracing::warn!(script, host, "Script exited before its pid was known");
            return Ok(0);
        };

        self.processes.insert(
            pid,
            ProcessRecord {
                host: host.to_string(),
                info: ProcessInfo {
                    pid,
                    filename: script.to_string(),
                    threads,
                    args: args.to_vec(),
                },
                child,
            },
        );
        Ok(pid)
    }

    async fn is_running(
        &self,
        target: &ProcessTarget,
        host: &str,
        args: &[String],
    ) -> Result<bool, HostError> {
        self.reap();
        let running = match target {
            ProcessTarget::Pid(pid) => self.processes.contains_key(pid),
            ProcessTarget::Script(script) => self.processes.iter().any(|entry| {
                let record = entry.value();
                record.host == host && record.info.filename == *script && record.info.args == args
            }),
        };
        Ok(running)
    }

    async fn copy_files(&self, files: &[String], destination: &str) -> Result<bool, HostError> {
        let source_root = self.host_dir(&self.home)?;
        let dest_root = self.host_dir(destination)?;
        if !is_dir(&dest_root).await {
            tracing::warn!(host = destination, "Cannot copy files to unknown host");
            return Ok(false);
        }

        let mut all_copied = true;
        for file in files {
            let source = sandbox_path(&source_root, file)?;
            let dest = sandbox_path(&dest_root, file)?;
            if source == dest {
                continue;
            }
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| HostError::io(parent, e))?;
            }
            if let Err(e) = tokio::fs::copy(&source, &dest).await {
                tracing::warn!(file = %file, host = destination, error = %e, "Failed to copy file");
                all_copied = false;
            }
        }
        Ok(all_copied)
    }

    async fn describe(&self, host: &str) -> Result<HostInfo, HostError> {
        let dir = self.host_dir(host)?;
        if !is_dir(&dir).await {
            return Err(HostError::UnknownHost(host.to_string()));
        }

        let mut files = Vec::new();
        let mut pending = vec![dir.clone()];
        while let Some(current) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&current)
                .await
                .map_err(|e| HostError::io(&current, e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| HostError::io(&current, e))?
            {
                let path = entry.path();
                if is_dir(&path).await {
                    pending.push(path);
                } else if let Ok(relative) = path.strip_prefix(&dir) {
                    files.push(format!("/{}", relative.display()));
                }
            }
        }
        files.sort();

        self.reap();
        let mut processes: Vec<ProcessInfo> = self
            .processes
            .iter()
            .filter(|entry| entry.value().host == host)
            .map(|entry| entry.value().info.clone())
            .collect();
        processes.sort_by_key(|p| p.pid);

        Ok(HostInfo {
            hostname: host.to_string(),
            files,
            processes,
        })
    }
}
