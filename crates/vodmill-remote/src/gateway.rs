//! Remote dispatch supervision.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use vodmill_models::TaskId;

use crate::client::{AgentClient, RemoteEncodeRequest, RemoteTaskStatus};
use crate::error::{RemoteError, RemoteResult};
use crate::registry::{AgentInfo, AgentRegistry};

/// Gateway tuning knobs.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// How often to poll a dispatched task
    pub poll_interval: Duration,
    /// Agent silence tolerated before the task is declared lost
    pub heartbeat_timeout: Duration,
    /// Heartbeat age beyond which an agent is not selected for dispatch
    pub selection_freshness: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(60),
            selection_freshness: Duration::from_secs(120),
        }
    }
}

/// Outcome of a completed remote encode.
#[derive(Debug, Clone)]
pub struct RemoteOutcome {
    /// Where the agent placed the encoded output
    pub output_url: String,
}

/// Forwards claimed tasks to registered remote agents and supervises
/// them through polling.
///
/// Additive capacity only: when no agent qualifies, `execute` returns
/// `NoCapacity` and the caller runs the task locally instead.
pub struct RemoteGateway {
    registry: Arc<AgentRegistry>,
    client: Arc<dyn AgentClient>,
    config: GatewayConfig,
}

impl RemoteGateway {
    pub fn new(
        registry: Arc<AgentRegistry>,
        client: Arc<dyn AgentClient>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            registry,
            client,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Whether any agent could currently take a task for this codec.
    pub async fn has_capacity(&self, codec: vodmill_models::Codec) -> bool {
        let freshness = chrono::Duration::from_std(self.config.selection_freshness)
            .unwrap_or_else(|_| chrono::Duration::seconds(120));
        self.registry.select(codec, freshness).await.is_some()
    }

    /// Dispatch one encode to a remote agent and supervise it to a
    /// terminal state, reporting progress through the callback.
    pub async fn execute<F>(
        &self,
        request: RemoteEncodeRequest,
        progress: F,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> RemoteResult<RemoteOutcome>
    where
        F: Fn(u8) + Send,
    {
        let freshness = chrono::Duration::from_std(self.config.selection_freshness)
            .unwrap_or_else(|_| chrono::Duration::seconds(120));
        let agent = self
            .registry
            .select(request.profile.codec, freshness)
            .await
            .ok_or(RemoteError::NoCapacity)?;

        if !self.registry.reserve(&agent.id).await {
            return Err(RemoteError::NoCapacity);
        }

        let result = self
            .supervise(&agent, request, progress, &mut cancel_rx)
            .await;
        self.registry.release(&agent.id).await;
        result
    }

    async fn supervise<F>(
        &self,
        agent: &AgentInfo,
        request: RemoteEncodeRequest,
        progress: F,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> RemoteResult<RemoteOutcome>
    where
        F: Fn(u8) + Send,
    {
        let task_id = request.task_id.clone();
        self.client.dispatch(agent, &request).await?;
        info!(task_id = %task_id, agent = %agent.name, "Task dispatched to remote agent");

        let mut last_contact = Utc::now();
        let heartbeat_timeout = chrono::Duration::from_std(self.config.heartbeat_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));

        loop {
            if *cancel_rx.borrow() {
                let _ = self.client.cancel(agent, &task_id).await;
                return Err(RemoteError::Cancelled);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = cancel_rx.changed() => {
                    if changed.is_ok() && *cancel_rx.borrow() {
                        let _ = self.client.cancel(agent, &task_id).await;
                        return Err(RemoteError::Cancelled);
                    }
                }
            }

            match self.client.poll(agent, &task_id).await {
                Ok(RemoteTaskStatus::Running { progress: pct }) => {
                    last_contact = Utc::now();
                    self.registry.record_heartbeat(&agent.id).await;
                    progress(pct);
                    debug!(task_id = %task_id, agent = %agent.name, progress = pct, "Remote progress");
                }
                Ok(RemoteTaskStatus::Completed { output_url }) => {
                    self.registry.record_heartbeat(&agent.id).await;
                    info!(task_id = %task_id, agent = %agent.name, "Remote encode completed");
                    return Ok(RemoteOutcome { output_url });
                }
                Ok(RemoteTaskStatus::Failed { message }) => {
                    self.registry.record_heartbeat(&agent.id).await;
                    return Err(RemoteError::RemoteFailed {
                        agent: agent.name.clone(),
                        message,
                    });
                }
                Err(e) => {
                    // One missed poll is not a dead agent; silence past
                    // the heartbeat timeout is.
                    if Utc::now() - last_contact > heartbeat_timeout {
                        warn!(
                            task_id = %task_id,
                            agent = %agent.name,
                            error = %e,
                            "Agent silent past heartbeat timeout, declaring task lost"
                        );
                        return Err(RemoteError::HeartbeatTimeout(agent.name.clone()));
                    }
                    debug!(agent = %agent.name, error = %e, "Poll failed, will retry");
                }
            }
        }
    }

    /// Check up on a dispatched task once.
    pub async fn check(&self, agent_id: &vodmill_models::AgentId, task_id: &TaskId) -> RemoteResult<RemoteTaskStatus> {
        let agent = self
            .registry
            .get(agent_id)
            .await
            .ok_or_else(|| RemoteError::UnknownAgent(agent_id.to_string()))?;
        self.client.poll(&agent, task_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use vodmill_models::{Codec, ProfileCatalog};

    /// Scripted agent client for supervision tests.
    struct ScriptedClient {
        statuses: Mutex<Vec<RemoteResult<RemoteTaskStatus>>>,
        cancelled: Mutex<Vec<TaskId>>,
    }

    impl ScriptedClient {
        fn new(statuses: Vec<RemoteResult<RemoteTaskStatus>>) -> Self {
            Self {
                statuses: Mutex::new(statuses),
                cancelled: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl AgentClient for ScriptedClient {
        async fn dispatch(
            &self,
            _agent: &AgentInfo,
            _request: &RemoteEncodeRequest,
        ) -> RemoteResult<()> {
            Ok(())
        }

        async fn poll(
            &self,
            _agent: &AgentInfo,
            _task_id: &TaskId,
        ) -> RemoteResult<RemoteTaskStatus> {
            let mut statuses = self.statuses.lock().unwrap();
            if statuses.is_empty() {
                Ok(RemoteTaskStatus::Running { progress: 0 })
            } else {
                statuses.remove(0)
            }
        }

        async fn cancel(&self, _agent: &AgentInfo, task_id: &TaskId) -> RemoteResult<()> {
            self.cancelled.lock().unwrap().push(task_id.clone());
            Ok(())
        }
    }

    fn request() -> RemoteEncodeRequest {
        let catalog = ProfileCatalog::standard();
        RemoteEncodeRequest {
            task_id: TaskId::new(),
            source_url: "http://orchestrator/media/m1.mp4".to_string(),
            profile: catalog.get("720p").unwrap().clone(),
            chunk: None,
        }
    }

    fn fast_config() -> GatewayConfig {
        GatewayConfig {
            poll_interval: Duration::from_millis(5),
            heartbeat_timeout: Duration::from_millis(50),
            selection_freshness: Duration::from_secs(120),
        }
    }

    async fn gateway_with(
        client: ScriptedClient,
    ) -> (RemoteGateway, vodmill_models::AgentId) {
        let registry = AgentRegistry::new();
        let id = registry
            .register(AgentInfo::new(
                "agent-1",
                "http://agent-1:9000",
                vec![Codec::H264],
                2,
            ))
            .await;
        (
            RemoteGateway::new(registry, Arc::new(client), fast_config()),
            id,
        )
    }

    #[tokio::test]
    async fn test_no_agents_means_no_capacity() {
        let registry = AgentRegistry::new();
        let gateway = RemoteGateway::new(
            registry,
            Arc::new(ScriptedClient::new(vec![])),
            fast_config(),
        );
        let (_tx, rx) = watch::channel(false);

        let err = gateway.execute(request(), |_| {}, rx).await.unwrap_err();
        assert!(matches!(err, RemoteError::NoCapacity));
    }

    #[tokio::test]
    async fn test_supervision_to_completion() {
        let client = ScriptedClient::new(vec![
            Ok(RemoteTaskStatus::Running { progress: 40 }),
            Ok(RemoteTaskStatus::Completed {
                output_url: "http://agent-1/out/720p.mp4".to_string(),
            }),
        ]);
        let (gateway, agent_id) = gateway_with(client).await;
        let (_tx, rx) = watch::channel(false);

        let outcome = gateway.execute(request(), |_| {}, rx).await.unwrap();
        assert_eq!(outcome.output_url, "http://agent-1/out/720p.mp4");

        // The slot is released after completion
        let agent = gateway.registry().get(&agent_id).await.unwrap();
        assert_eq!(agent.active, 0);
    }

    #[tokio::test]
    async fn test_remote_failure_reported() {
        let client = ScriptedClient::new(vec![Ok(RemoteTaskStatus::Failed {
            message: "encoder crashed".to_string(),
        })]);
        let (gateway, _) = gateway_with(client).await;
        let (_tx, rx) = watch::channel(false);

        let err = gateway.execute(request(), |_| {}, rx).await.unwrap_err();
        assert!(matches!(err, RemoteError::RemoteFailed { .. }));
        assert!(!err.is_agent_loss());
    }

    #[tokio::test]
    async fn test_silent_agent_times_out_as_lost() {
        let silent: Vec<RemoteResult<RemoteTaskStatus>> = (0..100)
            .map(|_| Err(RemoteError::HeartbeatTimeout("poll failed".to_string())))
            .collect();
        let (gateway, agent_id) = gateway_with(ScriptedClient::new(silent)).await;
        let (_tx, rx) = watch::channel(false);

        let err = gateway.execute(request(), |_| {}, rx).await.unwrap_err();
        assert!(err.is_agent_loss());

        let agent = gateway.registry().get(&agent_id).await.unwrap();
        assert_eq!(agent.active, 0);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_remote_task() {
        let client = ScriptedClient::new(vec![]);
        let (gateway, _) = gateway_with(client).await;
        let (tx, rx) = watch::channel(false);

        let exec = gateway.execute(request(), |_| {}, rx);
        tokio::pin!(exec);

        tokio::select! {
            _ = &mut exec => panic!("should not finish before cancel"),
            _ = tokio::time::sleep(Duration::from_millis(10)) => {}
        }
        tx.send(true).unwrap();

        let err = exec.await.unwrap_err();
        assert!(matches!(err, RemoteError::Cancelled));
    }
}
