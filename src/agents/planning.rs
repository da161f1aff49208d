use std::fmt::Write as _;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::AgentKind;
use super::prompt::{PROMPT_HISTORY_WINDOW, history_lines};
use super::specialist::{Prepared, Specialist, WorkerDeps};
use crate::context::{AgentContext, Message};
use crate::error::{PilotError, Result};
use crate::memory::{MemoryEntry, MemoryType};

const SYSTEM_PROMPT: &str = "\
You are the Planning Agent for ProjectPilot, specializing in project planning and task management.

Your capabilities:
1. Goal Decomposition: break high-level goals into specific, actionable tasks
2. Task Prioritization: rank tasks using MoSCoW or an Eisenhower matrix
3. Dependency Mapping: identify which tasks depend on others
4. Effort Estimation: give relative complexity estimates
5. Milestone Planning: group tasks into logical milestones

Output format for task breakdowns:
## Task: [Task Name]
- **Priority**: High/Medium/Low
- **Effort**: [estimate]
- **Dependencies**: [dependent tasks]
- **Description**: [what needs to be done]
- **Acceptance Criteria**: [how to know it's done]

Be thorough but practical. Focus on delivering value incrementally.";

const PROJECT_CONTEXT_QUERY: &str = "project goals tasks milestones";
const PROJECT_CONTEXT_LIMIT: usize = 5;

pub struct PlanningSpecialist {
    estimation_scale: String,
}

impl PlanningSpecialist {
    pub fn new(estimation_scale: impl Into<String>) -> Self {
        Self {
            estimation_scale: estimation_scale.into(),
        }
    }

    fn build_prompt(
        &self,
        message: &Message,
        context: &AgentContext,
        project_memory: &[MemoryEntry],
    ) -> String {
        let mut prompt = String::new();
        if !project_memory.is_empty() {
            prompt.push_str("## Existing Project Context\n");
            for entry in project_memory {
                let _ = writeln!(prompt, "- {}", entry.content);
            }
            prompt.push('\n');
        }

        if !context.conversation_history().is_empty() {
            prompt.push_str("## Recent Conversation\n");
            prompt.push_str(&history_lines(context, PROMPT_HISTORY_WINDOW));
            prompt.push('\n');
        }

        let _ = writeln!(
            prompt,
            "## Estimation\nUse {} sizing for effort estimates.\n",
            self.estimation_scale
        );
        prompt.push_str("## Current Request\n");
        prompt.push_str(&message.content);
        prompt.push('\n');
        prompt
    }
}

impl Default for PlanningSpecialist {
    fn default() -> Self {
        Self::new("TShirt")
    }
}

#[async_trait]
impl Specialist for PlanningSpecialist {
    fn name(&self) -> &'static str {
        "Planning"
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Planning
    }

    fn description(&self) -> &'static str {
        "Specializes in task breakdown, prioritization, and project planning"
    }

    fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    fn temperature(&self) -> f32 {
        0.7
    }

    async fn prepare(
        &self,
        deps: &WorkerDeps,
        message: &Message,
        context: &AgentContext,
        _cancel: &CancellationToken,
    ) -> Result<Prepared> {
        let project_memory = match context.project_id() {
            Some(project) if !project.is_empty() => deps
                .memory
                .search(PROJECT_CONTEXT_QUERY, Some(project), PROJECT_CONTEXT_LIMIT)
                .await
                .map_err(PilotError::Memory)?,
            _ => Vec::new(),
        };
        Ok(Prepared::prompt(self.build_prompt(
            message,
            context,
            &project_memory,
        )))
    }

    fn memory_entry(&self, _message: &Message, context: &AgentContext, content: &str) -> MemoryEntry {
        MemoryEntry::new(context.session_id(), MemoryType::Plan, content)
            .with_project(context.project_id().map(str::to_string))
            .with_metadata("agent", self.name())
            .with_metadata("type", "task_breakdown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_includes_project_context_history_and_request() {
        let specialist = PlanningSpecialist::default();
        let ctx = AgentContext::new("s1").with_message(Message::user("we ship in March"));
        let memory = vec![MemoryEntry::new("s0", MemoryType::Plan, "Milestone 1: auth")];

        let prompt = specialist.build_prompt(&Message::user("break down login"), &ctx, &memory);

        assert!(prompt.starts_with("## Existing Project Context\n- Milestone 1: auth\n"));
        assert!(prompt.contains("[user]: we ship in March"));
        assert!(prompt.contains("Use TShirt sizing"));
        assert!(prompt.ends_with("## Current Request\nbreak down login\n"));
    }

    #[test]
    fn plan_entry_is_tagged_with_agent_and_type() {
        let specialist = PlanningSpecialist::default();
        let ctx = AgentContext::new("s1").with_project(Some("p1".to_string()));
        let entry = specialist.memory_entry(&Message::user("x"), &ctx, "the plan");

        assert_eq!(entry.kind, MemoryType::Plan);
        assert_eq!(entry.project_id.as_deref(), Some("p1"));
        assert_eq!(entry.metadata_str("agent"), Some("Planning"));
        assert_eq!(entry.metadata_str("type"), Some("task_breakdown"));
    }
}
