//! Thin services over the host collaborators.
//!
//! Handlers never talk to a [`FileStore`] or [`ProcessHost`] directly; they go
//! through these, which add logging and turn sentinel results (pid `0`, a
//! failed copy) into [`HostError`]s.

use std::sync::Arc;

use crate::host::{FileStore, HostError, HostInfo, Pid, ProcessHost, ProcessTarget, WriteMode};

/// File access on the daemon's host.
#[derive(Clone)]
pub struct Io {
    store: Arc<dyn FileStore>,
}

impl Io {
    pub fn new(store: Arc<dyn FileStore>) -> Self {
        Self { store }
    }

    pub async fn read(&self, handle: &str) -> Result<String, HostError> {
        self.store.read(handle).await
    }

    pub async fn write(
        &self,
        handle: &str,
        lines: &[String],
        mode: WriteMode,
    ) -> Result<(), HostError> {
        tracing::trace!(%handle, lines = lines.len(), ?mode, "Writing file");
        self.store.write(handle, lines, mode).await
    }

    pub async fn exists(&self, file: &str) -> Result<bool, HostError> {
        self.store.exists(file).await
    }
}

/// Copies files from the home host to other hosts.
#[derive(Clone)]
pub struct Deployer {
    host: Arc<dyn ProcessHost>,
}

impl Deployer {
    pub fn new(host: Arc<dyn ProcessHost>) -> Self {
        Self { host }
    }

    pub async fn deploy(&self, destination: &str, files: &[String]) -> Result<(), HostError> {
        let listing = files.join(", ");
        tracing::info!("deploying {} to {}", listing, destination);
        if self.host.copy_files(files, destination).await? {
            Ok(())
        } else {
            Err(HostError::DeployFailed {
                files: listing,
                host: destination.to_string(),
            })
        }
    }
}

/// Starts and inspects scripts.
#[derive(Clone)]
pub struct Executor {
    host: Arc<dyn ProcessHost>,
}

impl Executor {
    pub fn new(host: Arc<dyn ProcessHost>) -> Self {
        Self { host }
    }

    pub async fn execute(
        &self,
        host: &str,
        threads: u32,
        script: &str,
        args: &[String],
    ) -> Result<Pid, HostError> {
        let pid = self.host.spawn(script, host, threads, args).await?;
        if pid == 0 {
            return Err(HostError::SpawnFailed {
                script: script.to_string(),
                host: host.to_string(),
            });
        }
        tracing::info!(pid, threads, "Started {} [{}] on {}", script, args.join(", "), host);
        Ok(pid)
    }

    pub async fn is_running(
        &self,
        target: &ProcessTarget,
        host: &str,
        args: &[String],
    ) -> Result<bool, HostError> {
        self.host.is_running(target, host, args).await
    }

    pub async fn describe(&self, host: &str) -> Result<HostInfo, HostError> {
        self.host.describe(host).await
    }
}

/// Deploy-then-run, composed from an [`Executor`] and a [`Deployer`].
#[derive(Clone)]
pub struct Evaluator {
    executor: Executor,
    deployer: Deployer,
}

impl Evaluator {
    pub fn new(executor: Executor, deployer: Deployer) -> Self {
        Self { executor, deployer }
    }

    /// Both services over the same process host.
    pub fn over(host: Arc<dyn ProcessHost>) -> Self {
        Self::new(Executor::new(Arc::clone(&host)), Deployer::new(host))
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn deployer(&self) -> &Deployer {
        &self.deployer
    }

    pub async fn execute(
        &self,
        host: &str,
        threads: u32,
        script: &str,
        args: &[String],
    ) -> Result<Pid, HostError> {
        self.executor.execute(host, threads, script, args).await
    }

    pub async fn deploy(&self, destination: &str, files: &[String]) -> Result<(), HostError> {
        self.deployer.deploy(destination, files).await
    }

    /// Copy `script` and `support_files` to `target`, then start it there.
    pub async fn launch(
        &self,
        target: &str,
        script: &str,
        threads: u32,
        args: &[String],
        support_files: &[String],
    ) -> Result<Pid, HostError> {
        let mut files = Vec::with_capacity(support_files.len() + 1);
        files.push(script.to_string());
        files.extend(support_files.iter().cloned());

        self.deployer.deploy(target, &files).await?;
        self.executor.execute(target, threads, script, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::{MemoryFileStore, StubProcessHost};

    #[tokio::test]
    async fn io_delegates_to_store() {
        let io = Io::new(Arc::new(MemoryFileStore::default().with_file("/a.txt", "x")));
        assert_eq!(io.read("/a.txt").await.unwrap(), "x");
        assert!(io.exists("/a.txt").await.unwrap());

        io.write("/b.txt", &["1".to_string(), "2".to_string()], WriteMode::Overwrite)
            .await
            .unwrap();
        assert_eq!(io.read("/b.txt").await.unwrap(), "1\n2");
    }

    #[tokio::test]
    async fn zero_pid_is_spawn_failure() {
        let executor = Executor::new(Arc::new(StubProcessHost::default()));
        let err = executor.execute("n00dles", 1, "hack.sh", &[]).await.unwrap_err();
        assert_eq!(err.to_string(), "failed to start hack.sh on n00dles");
    }

    #[tokio::test]
    async fn failed_copy_is_deploy_failure() {
        let deployer = Deployer::new(Arc::new(StubProcessHost::default()));
        let err = deployer
            .deploy("n00dles", &["a.sh".to_string(), "b.sh".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "failed to deploy a.sh, b.sh to n00dles");
    }

    #[tokio::test]
    async fn launch_deploys_script_and_support_files_first() {
        let host = Arc::new(StubProcessHost {
            next_pid: 12,
            copy_ok: true,
            ..Default::default()
        });
        let evaluator = Evaluator::over(host.clone());

        let pid = evaluator
            .launch("n00dles", "hack.sh", 4, &["n00dles".to_string()], &["lib.sh".to_string()])
            .await
            .unwrap();
        assert_eq!(pid, 12);

        let copied = host.copied.lock().unwrap();
        assert_eq!(
            copied.as_slice(),
            &[(
                vec!["hack.sh".to_string(), "lib.sh".to_string()],
                "n00dles".to_string()
            )]
        );
        let spawned = host.spawned.lock().unwrap();
        assert_eq!(spawned[0].0, "hack.sh");
        assert_eq!(spawned[0].2, 4);
    }

    #[tokio::test]
    async fn launch_stops_when_deploy_fails() {
        let host = Arc::new(StubProcessHost {
            next_pid: 12,
            ..Default::default()
        });
        let evaluator = Evaluator::over(host.clone());

        let err = evaluator.launch("n00dles", "hack.sh", 1, &[], &[]).await.unwrap_err();
        assert!(matches!(err, HostError::DeployFailed { .. }));
        assert!(host.spawned.lock().unwrap().is_empty());
    }
}
