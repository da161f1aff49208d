use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::activity::ActivityLogger;
use crate::agents::orchestrator::OrchestratorAgent;
use crate::agents::planning::PlanningSpecialist;
use crate::agents::reporting::ReportingSpecialist;
use crate::agents::research::{ResearchSpecialist, WebSearch};
use crate::agents::specialist::{SpecialistAgent, WorkerDeps};
use crate::agents::{Agent, AgentKind, AgentResponse, ChunkStream};
use crate::communication::CommunicationService;
use crate::config::PilotConfig;
use crate::context::{AgentContext, Message};
use crate::error::{PilotError, Result};
use crate::handoff::HandoffManager;
use crate::llm::CompletionService;
use crate::memory::MemoryStore;
use crate::parallel::ParallelExecutor;
use crate::registry::AgentRegistry;
use crate::session::{ContextManager, ContextRequest};
use crate::state::AgentStateManager;

/// Entry point for one message: looks up the orchestrator, runs it, and
/// follows any hand-off chain its answer starts.
pub struct OrchestrationService {
    registry: Arc<AgentRegistry>,
    handoff: Arc<HandoffManager>,
}

impl OrchestrationService {
    pub fn new(registry: Arc<AgentRegistry>, handoff: Arc<HandoffManager>) -> Self {
        Self { registry, handoff }
    }

    fn orchestrator(&self) -> Result<Arc<dyn Agent>> {
        self.registry
            .by_kind(AgentKind::Orchestrator)
            .ok_or(PilotError::OrchestratorMissing)
    }

    pub async fn process_message(
        &self,
        message: &Message,
        context: &AgentContext,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse> {
        let orchestrator = self.orchestrator()?;
        let response = orchestrator.process(message, context, cancel).await?;
        if self.handoff.should_handoff(&response) {
            return self.handoff.execute_handoff(response, context, cancel).await;
        }
        Ok(response)
    }

    /// The stream ends early, without error, once `cancel` fires.
    pub async fn process_message_stream(
        &self,
        message: &Message,
        context: &AgentContext,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream> {
        let orchestrator = self.orchestrator()?;
        let stream = orchestrator.process_stream(message, context, cancel).await?;
        Ok(stream
            .take_until(cancel.clone().cancelled_owned())
            .boxed())
    }
}

/// Every component wired together from one configuration.
pub struct PilotRuntime {
    pub registry: Arc<AgentRegistry>,
    pub activity: Arc<ActivityLogger>,
    pub communication: Arc<CommunicationService>,
    pub executor: Arc<ParallelExecutor>,
    pub handoff: Arc<HandoffManager>,
    pub service: OrchestrationService,
    pub context: ContextManager,
    pub state: AgentStateManager,
    pub memory: Arc<dyn MemoryStore>,
}

impl PilotRuntime {
    pub fn build(
        config: &PilotConfig,
        completion: Arc<dyn CompletionService>,
        memory: Arc<dyn MemoryStore>,
        search: Option<Arc<dyn WebSearch>>,
    ) -> Self {
        let registry = Arc::new(AgentRegistry::new());
        let activity = Arc::new(
            ActivityLogger::new(memory.clone())
                .with_enabled(config.global.enable_activity_logging),
        );
        let communication = Arc::new(CommunicationService::new(registry.clone(), activity.clone()));
        let executor = Arc::new(ParallelExecutor::with_limit(
            registry.clone(),
            config.orchestrator.max_parallel_agents,
        ));
        let handoff = Arc::new(
            HandoffManager::new(registry.clone(), communication.clone())
                .with_max_depth(config.orchestrator.max_handoff_depth),
        );

        let deps = WorkerDeps::new(completion.clone(), memory.clone());
        if config.planning.enabled {
            registry.register(Arc::new(
                SpecialistAgent::new(
                    PlanningSpecialist::new(config.planning.estimation_scale.clone()),
                    deps.clone(),
                )
                .with_settings(config.planning.settings()),
            ));
        }
        if config.research.enabled {
            let search = search.filter(|_| config.research.enable_web_search);
            registry.register(Arc::new(
                SpecialistAgent::new(
                    ResearchSpecialist::new(search, config.research.max_search_results),
                    deps.clone(),
                )
                .with_settings(config.research.settings()),
            ));
        }
        if config.reporting.enabled {
            registry.register(Arc::new(
                SpecialistAgent::new(
                    ReportingSpecialist::new(config.reporting.default_format.clone()),
                    deps,
                )
                .with_settings(config.reporting.settings()),
            ));
        }
        registry.register(Arc::new(OrchestratorAgent::with_settings(
            completion,
            registry.clone(),
            communication.clone(),
            executor.clone(),
            config.orchestrator.settings(),
        )));

        let service = OrchestrationService::new(registry.clone(), handoff.clone());
        let context = ContextManager::new(memory.clone(), memory.clone())
            .with_history_limit(config.global.max_conversation_history);
        let state = AgentStateManager::new(memory.clone());

        Self {
            registry,
            activity,
            communication,
            executor,
            handoff,
            service,
            context,
            state,
            memory,
        }
    }

    /// Loads context, records the user message, answers it, and records the
    /// answer.
    pub async fn ask(
        &self,
        request: &ContextRequest,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse> {
        let context = self.context.load_context(request).await?;
        let message = Message::user(prompt);
        self.context
            .record_message(&request.session_id, &message)
            .await?;

        let response = self.service.process_message(&message, &context, cancel).await?;

        let reply = Message::agent(response.content.clone()).from(response.from_agent.clone());
        self.context
            .record_message(&request.session_id, &reply)
            .await?;
        Ok(response)
    }
}
