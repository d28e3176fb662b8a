use std::{path::PathBuf, sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use update_models::{AgentRelease, AgentUpdate};
use uuid::Uuid;

use crate::{
    error::{AgentError, AgentResult},
    installer::{InstallOutcome, Installer},
    source::UpdateSource,
    state::VersionStore,
    verifier::{Verdict, Verifier, discard_artifact},
    version::{is_newer, parse_version},
};

/// What a single check pass ended with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    UpToDate,
    /// A newer release exists but automatic installation is off.
    Available { version: String },
    /// Verified and installed. The version marker was updated.
    Installed { version: String },
    /// Verified but the installer did not run.
    Downloaded { version: String },
    /// Every newer candidate was rejected or failed.
    NothingInstalled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub version: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    pub current_version: String,
    pub outcome: CheckOutcome,
    pub rejected: Vec<Rejection>,
}

struct Candidate {
    update_id: Uuid,
    update: AgentUpdate,
}

pub struct UpdateAgent {
    source: Arc<dyn UpdateSource>,
    verifier: Verifier,
    installer: Arc<dyn Installer>,
    versions: VersionStore,
    download_dir: PathBuf,
    auto_install: bool,
    interval: Duration,
}

impl UpdateAgent {
    pub fn new(
        source: Arc<dyn UpdateSource>,
        verifier: Verifier,
        installer: Arc<dyn Installer>,
        versions: VersionStore,
        download_dir: PathBuf,
    ) -> Self {
        Self {
            source,
            verifier,
            installer,
            versions,
            download_dir,
            auto_install: true,
            interval: Duration::from_secs(60 * 60),
        }
    }

    pub fn with_auto_install(mut self, auto_install: bool) -> Self {
        self.auto_install = auto_install;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Check immediately, then every interval, until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "Update agent started. Check interval: {} minutes",
            self.interval.as_secs() / 60
        );
        loop {
            match self.check_once(&cancel).await {
                Ok(report) => info!("Update check finished: {:?}", report.outcome),
                Err(e) if e.is_cancelled() => break,
                Err(e) => error!("Error checking for updates: {}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = cancel.cancelled() => break,
            }
        }
        info!("Update agent stopped");
    }

    /// Newer releases, highest version first.
    fn candidates(releases: Vec<AgentRelease>, current: &str) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = releases
            .into_iter()
            .filter_map(|release| match release.update {
                Some(update) => Some(Candidate {
                    update_id: release.update_id,
                    update,
                }),
                None => {
                    warn!("Release {} has no update attached, skipping", release.id);
                    None
                }
            })
            .filter(|c| is_newer(&c.update.version, current))
            .collect();
        candidates.sort_by(|a, b| {
            parse_version(&b.update.version).cmp(&parse_version(&a.update.version))
        });
        candidates.dedup_by(|a, b| a.update.version == b.update.version);
        candidates
    }

    #[instrument(skip_all)]
    pub async fn check_once(&self, cancel: &CancellationToken) -> AgentResult<CheckReport> {
        let current = self.versions.current().await;
        info!("Checking for updates (current version {})", current);

        let releases = self.source.active_releases().await?;
        if releases.is_empty() {
            info!("No active releases available");
        }
        let candidates = Self::candidates(releases, &current);

        let mut report = CheckReport {
            current_version: current,
            outcome: CheckOutcome::UpToDate,
            rejected: Vec::new(),
        };
        let Some(newest) = candidates.first() else {
            info!("Already on version {} or newer", report.current_version);
            return Ok(report);
        };
        if !self.auto_install {
            info!(
                "New update {} available, auto-install disabled",
                newest.update.version
            );
            report.outcome = CheckOutcome::Available {
                version: newest.update.version.clone(),
            };
            return Ok(report);
        }

        report.outcome = CheckOutcome::NothingInstalled;
        for candidate in candidates {
            let version = candidate.update.version.clone();
            match self.try_install(&candidate, cancel).await {
                Ok(Some(outcome)) => {
                    report.outcome = outcome;
                    break;
                }
                Ok(None) => report.rejected.push(Rejection {
                    version,
                    reason: "verification failed".to_string(),
                }),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    error!("Failed to download or install update {}: {}", version, e);
                    report.rejected.push(Rejection {
                        version,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Download, verify and install one candidate. `Ok(None)` means the
    /// artifact failed verification and was deleted.
    async fn try_install(
        &self,
        candidate: &Candidate,
        cancel: &CancellationToken,
    ) -> AgentResult<Option<CheckOutcome>> {
        let version = &candidate.update.version;
        let dest = self.download_dir.join(artifact_file_name(version));

        info!("Downloading update {} to {}", version, dest.display());
        let size = self.source.download(candidate.update_id, &dest, cancel).await?;
        if cancel.is_cancelled() {
            discard_artifact(&dest).await;
            return Err(AgentError::Cancelled);
        }
        info!("Downloaded {} bytes, verifying", size);

        let verdict = self
            .verifier
            .verify_file(
                &dest,
                &candidate.update.file_hash,
                &candidate.update.digital_signature,
                version,
            )
            .await?;
        if verdict != Verdict::Verified {
            return Ok(None);
        }

        match self.installer.install(&dest, version).await? {
            InstallOutcome::Installed => {
                self.versions.persist(version).await?;
                info!("Now running version {}", version);
                Ok(Some(CheckOutcome::Installed {
                    version: version.clone(),
                }))
            }
            InstallOutcome::Skipped => Ok(Some(CheckOutcome::Downloaded {
                version: version.clone(),
            })),
        }
    }
}

fn artifact_file_name(version: &str) -> String {
    let safe: String = version
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("update-{safe}.bin")
}
