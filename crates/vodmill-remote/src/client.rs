//! HTTP client for remote encoding agents.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use vodmill_models::{ChunkSpec, EncodeProfile, TaskId};

use crate::error::{RemoteError, RemoteResult};
use crate::registry::AgentInfo;

/// Parameters shipped to a remote agent for one encode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEncodeRequest {
    pub task_id: TaskId,
    /// URL the agent fetches the source bytes from
    pub source_url: String,
    pub profile: EncodeProfile,
    /// Time range for chunked encodes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk: Option<ChunkSpec>,
}

/// Status reported by an agent for a dispatched task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum RemoteTaskStatus {
    Running {
        #[serde(default)]
        progress: u8,
    },
    Completed {
        output_url: String,
    },
    Failed {
        message: String,
    },
}

/// Transport to a remote agent. Trait seam so the gateway is testable
/// without a live agent.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Submit a task to an agent. A non-2xx response is a rejection.
    async fn dispatch(&self, agent: &AgentInfo, request: &RemoteEncodeRequest)
        -> RemoteResult<()>;

    /// Poll an agent for the status of a dispatched task. Doubles as the
    /// heartbeat: a successful poll proves the agent is alive.
    async fn poll(&self, agent: &AgentInfo, task_id: &TaskId) -> RemoteResult<RemoteTaskStatus>;

    /// Tell an agent to abort a dispatched task.
    async fn cancel(&self, agent: &AgentInfo, task_id: &TaskId) -> RemoteResult<()>;
}

/// `AgentClient` over plain HTTP.
pub struct HttpAgentClient {
    http: reqwest::Client,
}

impl HttpAgentClient {
    pub fn new(request_timeout: Duration) -> RemoteResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn dispatch(
        &self,
        agent: &AgentInfo,
        request: &RemoteEncodeRequest,
    ) -> RemoteResult<()> {
        let url = format!("{}/encode", agent.base_url);
        let response = self.http.post(&url).json(request).send().await?;

        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RemoteError::AgentRejected {
                agent: agent.name.clone(),
                message,
            });
        }
        Ok(())
    }

    async fn poll(&self, agent: &AgentInfo, task_id: &TaskId) -> RemoteResult<RemoteTaskStatus> {
        let url = format!("{}/tasks/{}", agent.base_url, task_id);
        let response = self.http.get(&url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    async fn cancel(&self, agent: &AgentInfo, task_id: &TaskId) -> RemoteResult<()> {
        let url = format!("{}/tasks/{}/cancel", agent.base_url, task_id);
        self.http.post(&url).send().await?.error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AgentInfo;
    use serde_json::json;
    use vodmill_models::{Codec, ProfileCatalog};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn agent_at(url: &str) -> AgentInfo {
        AgentInfo::new("test-agent", url, vec![Codec::H264], 2)
    }

    fn request() -> RemoteEncodeRequest {
        RemoteEncodeRequest {
            task_id: TaskId::from_string("t1"),
            source_url: "http://orchestrator/media/m1.mp4".to_string(),
            profile: ProfileCatalog::standard().get("720p").unwrap().clone(),
            chunk: None,
        }
    }

    #[tokio::test]
    async fn test_dispatch_posts_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/encode"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpAgentClient::new(Duration::from_secs(5)).unwrap();
        client
            .dispatch(&agent_at(&server.uri()), &request())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/encode"))
            .respond_with(ResponseTemplate::new(429).set_body_string("at capacity"))
            .mount(&server)
            .await;

        let client = HttpAgentClient::new(Duration::from_secs(5)).unwrap();
        let err = client
            .dispatch(&agent_at(&server.uri()), &request())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::AgentRejected { .. }));
    }

    #[tokio::test]
    async fn test_poll_parses_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks/t1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"state": "running", "progress": 62})),
            )
            .mount(&server)
            .await;

        let client = HttpAgentClient::new(Duration::from_secs(5)).unwrap();
        let status = client
            .poll(&agent_at(&server.uri()), &TaskId::from_string("t1"))
            .await
            .unwrap();
        assert!(matches!(status, RemoteTaskStatus::Running { progress: 62 }));
    }
}
