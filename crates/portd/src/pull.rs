//! Manifest-driven script downloader.
//!
//! Fetches `{base_url}{manifest_path}` into the home host, then every manifest
//! line of the form `./some/file.sh` from `{base_url}/some/file.sh` to
//! `/some/file.sh`. Other lines are skipped. A failed download is logged and
//! counted; only a missing manifest fails the pull.

use std::time::Duration;

use crate::host::{HostError, WriteMode};
use crate::services::Io;

const PORTD_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, thiserror::Error)]
pub enum PullError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error(transparent)]
    Host(#[from] HostError),
}

#[derive(Debug, Clone)]
pub struct PullConfig {
    pub base_url: String,
    pub manifest_path: String,
    pub timeout: Duration,
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9182".to_string(),
            manifest_path: "/resources/manifest.txt".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of one pull.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PullSummary {
    pub fetched: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Where a manifest line is downloaded from and to.
#[derive(Debug, PartialEq, Eq)]
struct Transfer {
    source: String,
    dest: String,
}

fn transfer_for(base_url: &str, line: &str) -> Option<Transfer> {
    let dest = line.strip_prefix('.')?;
    if !dest.starts_with('/') {
        return None;
    }
    Some(Transfer {
        source: format!("{}{}", base_url.trim_end_matches('/'), dest),
        dest: dest.to_string(),
    })
}

pub struct ManifestPuller {
    config: PullConfig,
    client: reqwest::Client,
    io: Io,
}

impl ManifestPuller {
    pub fn new(config: PullConfig, io: Io) -> Result<Self, PullError> {
        let client = reqwest::Client::builder()
            .user_agent(format!("portd/{PORTD_VERSION}"))
            .timeout(config.timeout)
            .build()
            .map_err(PullError::Client)?;
        Ok(Self { config, client, io })
    }

    pub async fn pull(&self) -> Result<PullSummary, PullError> {
        let manifest_url = format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.manifest_path
        );
        tracing::info!(url = %manifest_url, "Getting manifest");
        self.fetch_to(&manifest_url, &self.config.manifest_path).await?;

        let manifest = self.io.read(&self.config.manifest_path).await?;
        let lines: Vec<&str> = manifest
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        tracing::info!(files = lines.len(), "Manifest read");

        let mut summary = PullSummary::default();
        for line in lines {
            let Some(transfer) = transfer_for(&self.config.base_url, line) else {
                tracing::warn!(%line, "Could not read manifest line");
                summary.skipped += 1;
                continue;
            };
            match self.fetch_to(&transfer.source, &transfer.dest).await {
                Ok(()) => summary.fetched += 1,
                Err(e) => {
                    tracing::warn!(url = %transfer.source, error = %e, "Download failed");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            fetched = summary.fetched,
            failed = summary.failed,
            skipped = summary.skipped,
            "Pull complete"
        );
        Ok(summary)
    }

    async fn fetch_to(&self, url: &str, dest: &str) -> Result<(), PullError> {
        let fetch_err = |source| PullError::Fetch {
            url: url.to_string(),
            source,
        };
        let body = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(fetch_err)?
            .text()
            .await
            .map_err(fetch_err)?;

        self.io
            .write(dest, &[body], WriteMode::Overwrite)
            .await?;
        tracing::debug!(%url, %dest, "Downloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::host::testing::MemoryFileStore;

    #[test]
    fn manifest_lines_map_to_transfers() {
        assert_eq!(
            transfer_for("http://localhost:9182/", "./bin/daemon.sh"),
            Some(Transfer {
                source: "http://localhost:9182/bin/daemon.sh".to_string(),
                dest: "/bin/daemon.sh".to_string(),
            })
        );
        assert_eq!(transfer_for("http://x", "bin/daemon.sh"), None);
        assert_eq!(transfer_for("http://x", "../daemon.sh"), None);
    }

    fn puller(server: &MockServer, store: Arc<MemoryFileStore>) -> ManifestPuller {
        let config = PullConfig {
            base_url: server.uri(),
            ..Default::default()
        };
        ManifestPuller::new(config, Io::new(store)).unwrap()
    }

    #[tokio::test]
    async fn pulls_every_manifest_entry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resources/manifest.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "./bin/daemon.sh\n\n./lib/helpers.sh\nREADME\n./missing.sh\n",
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bin/daemon.sh"))
            .respond_with(ResponseTemplate::new(200).set_body_string("echo daemon"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/lib/helpers.sh"))
            .respond_with(ResponseTemplate::new(200).set_body_string("echo helpers"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing.sh"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryFileStore::default());
        let summary = puller(&server, store.clone()).pull().await.unwrap();

        assert_eq!(
            summary,
            PullSummary {
                fetched: 2,
                failed: 1,
                skipped: 1,
            }
        );
        assert_eq!(store.contents("/bin/daemon.sh").as_deref(), Some("echo daemon"));
        assert_eq!(store.contents("/lib/helpers.sh").as_deref(), Some("echo helpers"));
        assert!(store.contents("/resources/manifest.txt").is_some());
        assert!(store.contents("/missing.sh").is_none());
    }

    #[tokio::test]
    async fn missing_manifest_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = puller(&server, Arc::new(MemoryFileStore::default()))
            .pull()
            .await
            .unwrap_err();
        assert!(matches!(err, PullError::Fetch { .. }));
    }
}
