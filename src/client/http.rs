use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{drive, ChatTurn, TurnOutcome, UiSink};
use crate::config::ClientConfig;
use crate::error::{ArtifactError, StreamError};
use crate::refresh::{Artifact, ArtifactFetcher};
use crate::routes::ArtifactType;

/// Posts a chat request and renders the streamed response into a turn.
pub struct StreamClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl StreamClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Run one turn to completion. On any error or cancellation the turn is
    /// aborted and its partial state discarded.
    pub async fn send<U: UiSink>(
        &self,
        request: &Value,
        mut turn: ChatTurn<U>,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, StreamError> {
        let url = format!("{}{}", self.config.base_url, self.config.chat_path);
        debug!(url = %url, "sending chat request");

        let response = match self.client.post(&url).json(request).send().await {
            Ok(response) => response,
            Err(e) => {
                turn.abort();
                return Err(StreamError::Request(e.to_string()));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            turn.abort();
            return Err(StreamError::Http {
                status: status.as_u16(),
                body,
            });
        }

        match drive(&mut turn, response.bytes_stream(), &cancel).await {
            Ok(()) => Ok(turn.finish().await),
            Err(e) => {
                warn!(error = %e, "chat stream interrupted");
                turn.abort();
                Err(e)
            }
        }
    }
}

/// Reads artifacts from `GET {base}/projects/{project}/artifacts/{type}`.
pub struct HttpArtifactFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpArtifactFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl ArtifactFetcher for HttpArtifactFetcher {
    async fn fetch_artifact(
        &self,
        project_id: &str,
        artifact_type: ArtifactType,
    ) -> Result<Artifact, ArtifactError> {
        let url = format!(
            "{}/projects/{}/artifacts/{}",
            self.base_url,
            urlencoding::encode(project_id),
            artifact_type.as_str()
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ArtifactError::Store(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ArtifactError::NotFound {
                project: project_id.to_string(),
                artifact_type: artifact_type.to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ArtifactError::Store(format!("{status}: {body}")));
        }

        response
            .json::<Artifact>()
            .await
            .map_err(|e| ArtifactError::Parse(e.to_string()))
    }
}
