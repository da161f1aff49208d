use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, try_join_all};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::agents::{Agent, AgentKind, AgentResponse};
use crate::context::{AgentContext, Message};
use crate::error::{PilotError, Result};
use crate::registry::AgentRegistry;

pub const MAX_PARALLEL_AGENTS: usize = 3;

/// Fan-out helper with a process-wide cap on in-flight agent calls.
///
/// The aggregate fails with the first error. Siblings already running when
/// that happens are dropped with the aggregate future, but agents that spawned
/// their own work are responsible for stopping it.
pub struct ParallelExecutor {
    registry: Arc<AgentRegistry>,
    gate: Arc<Semaphore>,
    limit: usize,
}

impl ParallelExecutor {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self::with_limit(registry, MAX_PARALLEL_AGENTS)
    }

    pub fn with_limit(registry: Arc<AgentRegistry>, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            registry,
            gate: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Unregistered kinds are skipped.
    pub async fn execute_by_kinds(
        &self,
        kinds: &[AgentKind],
        message: &Message,
        context: &AgentContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<AgentResponse>> {
        let agents = kinds
            .iter()
            .filter_map(|kind| {
                let agent = self.registry.by_kind(*kind);
                if agent.is_none() {
                    tracing::debug!(kind = %kind, "skipping unregistered agent kind");
                }
                agent
            })
            .collect::<Vec<_>>();
        self.execute_agents(agents, message, context, cancel).await
    }

    /// Unknown names are skipped.
    pub async fn execute_by_names(
        &self,
        names: &[String],
        message: &Message,
        context: &AgentContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<AgentResponse>> {
        let agents = names
            .iter()
            .filter_map(|name| {
                let agent = self.registry.by_name(name);
                if agent.is_none() {
                    tracing::debug!(agent = %name, "skipping unknown agent name");
                }
                agent
            })
            .collect::<Vec<_>>();
        self.execute_agents(agents, message, context, cancel).await
    }

    pub async fn execute_agents(
        &self,
        agents: Vec<Arc<dyn Agent>>,
        message: &Message,
        context: &AgentContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<AgentResponse>> {
        tracing::info!(
            agents = agents.len(),
            limit = self.limit,
            session_id = context.session_id(),
            "fanning out to agents"
        );
        let tasks = agents
            .into_iter()
            .map(|agent| {
                // Each branch gets its own copy of the context.
                let context = context.clone();
                async move { agent.process(message, &context, cancel).await }.boxed()
            })
            .collect();
        self.run_gated(tasks, cancel).await
    }

    /// Runs `tasks` concurrently, at most `limit` at a time, preserving input
    /// order in the output. Cancellation abandons the aggregate.
    pub async fn run_gated<'a, T: Send + 'a>(
        &self,
        tasks: Vec<BoxFuture<'a, Result<T>>>,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>> {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }

        let gated = tasks.into_iter().map(|task| {
            let gate = self.gate.clone();
            async move {
                let _permit = gate
                    .acquire_owned()
                    .await
                    .map_err(|_| PilotError::Communication("parallel admission gate closed".into()))?;
                task.await
            }
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PilotError::Cancelled),
            results = try_join_all(gated) => results,
        }
    }
}
