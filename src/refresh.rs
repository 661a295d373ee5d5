use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ArtifactError;
use crate::routes::ArtifactType;

/// A persisted, versioned result object owned by the artifact store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub project_id: String,
    pub artifact_type: ArtifactType,
    pub version: u64,
    pub data: Value,
    pub updated_at: DateTime<Utc>,
}

/// Read side of the artifact store.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch_artifact(
        &self,
        project_id: &str,
        artifact_type: ArtifactType,
    ) -> Result<Artifact, ArtifactError>;
}

/// Local copy of the latest artifacts for one project. Writes never move a
/// type backwards to an older version, so repeated refreshes are harmless.
#[derive(Clone, Default)]
pub struct ArtifactCache {
    inner: Arc<Mutex<HashMap<ArtifactType, Artifact>>>,
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `artifact` unless a newer version is already cached.
    /// Returns whether the cache now holds this artifact.
    pub async fn store(&self, artifact: Artifact) -> bool {
        let mut map = self.inner.lock().await;
        match map.get(&artifact.artifact_type) {
            Some(current) if current.version > artifact.version => {
                debug!(
                    artifact = %artifact.artifact_type,
                    cached = current.version,
                    fetched = artifact.version,
                    "keeping newer cached artifact"
                );
                false
            }
            _ => {
                map.insert(artifact.artifact_type, artifact);
                true
            }
        }
    }

    pub async fn get(&self, artifact_type: ArtifactType) -> Option<Artifact> {
        self.inner.lock().await.get(&artifact_type).cloned()
    }
}

/// Bounded retry with exponential backoff for post-completion re-fetches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshPolicy {
    pub initial_delay_ms: u64,
    /// Extra pass for tools whose persistence trails their completion event.
    pub lag_delay_ms: u64,
    pub max_attempts: u32,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            lag_delay_ms: 2000,
            max_attempts: 3,
            backoff_factor: 2.0,
            max_delay_ms: 4000,
        }
    }
}

impl RefreshPolicy {
    /// Delay before each fetch pass.
    pub fn passes(&self, lagging: bool) -> Vec<Duration> {
        let mut passes = vec![Duration::from_millis(self.initial_delay_ms)];
        if lagging {
            passes.push(Duration::from_millis(self.lag_delay_ms));
        }
        passes
    }

    /// Delay before retry number `attempt` (1-based) within a pass.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(attempt as i32);
        let ms = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(ms as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed {
        tool: String,
        artifact: ArtifactType,
        version: u64,
    },
    Missing {
        tool: String,
        artifact: ArtifactType,
    },
    Cancelled {
        tool: String,
        artifact: ArtifactType,
    },
}

/// Schedules delayed artifact re-fetches after tools complete. Scoped to one
/// run; `cancel` stops every pending refresh.
pub struct ArtifactRefresher {
    fetcher: Arc<dyn ArtifactFetcher>,
    cache: ArtifactCache,
    policy: RefreshPolicy,
    project_id: String,
    cancel: CancellationToken,
    tasks: JoinSet<RefreshOutcome>,
}

impl ArtifactRefresher {
    pub fn new(
        fetcher: Arc<dyn ArtifactFetcher>,
        cache: ArtifactCache,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            cache,
            policy: RefreshPolicy::default(),
            project_id: project_id.into(),
            cancel: CancellationToken::new(),
            tasks: JoinSet::new(),
        }
    }

    pub fn with_policy(mut self, policy: RefreshPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Start a background refresh. Must be called inside a tokio runtime.
    pub fn schedule(&mut self, tool: &str, artifact: ArtifactType, lagging: bool) {
        let job = RefreshJob {
            fetcher: Arc::clone(&self.fetcher),
            cache: self.cache.clone(),
            policy: self.policy.clone(),
            project_id: self.project_id.clone(),
            tool: tool.to_string(),
            artifact,
            cancel: self.cancel.child_token(),
        };
        debug!(tool, artifact = %artifact, lagging, "scheduling artifact refresh");
        self.tasks.spawn(job.run(lagging));
    }

    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every scheduled refresh to finish.
    pub async fn settle(&mut self) -> Vec<RefreshOutcome> {
        let mut outcomes = Vec::new();
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(error = %e, "artifact refresh task failed"),
            }
        }
        outcomes
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel and forget every scheduled refresh so the refresher can serve
    /// the next run.
    pub fn reset(&mut self) {
        self.cancel.cancel();
        self.tasks.abort_all();
        self.tasks = JoinSet::new();
        self.cancel = CancellationToken::new();
    }
}

impl Drop for ArtifactRefresher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct RefreshJob {
    fetcher: Arc<dyn ArtifactFetcher>,
    cache: ArtifactCache,
    policy: RefreshPolicy,
    project_id: String,
    tool: String,
    artifact: ArtifactType,
    cancel: CancellationToken,
}

impl RefreshJob {
    async fn run(self, lagging: bool) -> RefreshOutcome {
        let mut version = None;
        for delay in self.policy.passes(lagging) {
            if !self.sleep(delay).await {
                return self.cancelled();
            }
            match self.fetch_with_retry().await {
                Ok(Some(artifact)) => {
                    let fetched = artifact.version;
                    if self.cache.store(artifact).await {
                        version = Some(fetched);
                    }
                }
                Ok(None) => {}
                Err(()) => return self.cancelled(),
            }
        }

        match version {
            Some(version) => {
                info!(tool = %self.tool, artifact = %self.artifact, version, "artifact refreshed");
                RefreshOutcome::Refreshed {
                    tool: self.tool,
                    artifact: self.artifact,
                    version,
                }
            }
            None => {
                warn!(tool = %self.tool, artifact = %self.artifact, "artifact not available after retries");
                RefreshOutcome::Missing {
                    tool: self.tool,
                    artifact: self.artifact,
                }
            }
        }
    }

    /// `Err(())` means the refresh was cancelled while waiting.
    async fn fetch_with_retry(&self) -> Result<Option<Artifact>, ()> {
        for attempt in 0..self.policy.max_attempts.max(1) {
            if attempt > 0 && !self.sleep(self.policy.retry_delay(attempt)).await {
                return Err(());
            }
            match self
                .fetcher
                .fetch_artifact(&self.project_id, self.artifact)
                .await
            {
                Ok(artifact) => return Ok(Some(artifact)),
                Err(ArtifactError::NotFound { .. }) => {
                    debug!(artifact = %self.artifact, attempt, "artifact not persisted yet");
                }
                Err(e) => {
                    warn!(artifact = %self.artifact, attempt, error = %e, "artifact fetch failed");
                }
            }
        }
        Ok(None)
    }

    /// Returns false if cancelled before the delay elapsed.
    async fn sleep(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn cancelled(self) -> RefreshOutcome {
        debug!(tool = %self.tool, artifact = %self.artifact, "artifact refresh cancelled");
        RefreshOutcome::Cancelled {
            tool: self.tool,
            artifact: self.artifact,
        }
    }
}
