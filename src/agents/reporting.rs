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
You are the Reporting Agent for ProjectPilot, specializing in project status and metrics.

Your capabilities:
1. Status Summaries: generate clear project status reports
2. Progress Metrics: calculate and present progress percentages
3. Blocker Identification: list current blockers and impediments
4. Risk Assessment: identify and categorize project risks
5. Insights & Recommendations: provide actionable recommendations

Report sections: Executive Summary, Progress, Current Blockers, Risks
(table of risk, likelihood, impact, mitigation), Recommendations.

Be data-driven when possible. Highlight both achievements and concerns.";

const PREVIOUS_REPORTS_SHOWN: usize = 2;

/// Session entries a report is built from. Each list is newest first.
#[derive(Debug, Default)]
struct ProjectData {
    plans: Vec<MemoryEntry>,
    previous_reports: Vec<MemoryEntry>,
    research: Vec<MemoryEntry>,
}

pub struct ReportingSpecialist {
    default_format: String,
}

impl ReportingSpecialist {
    pub fn new(default_format: impl Into<String>) -> Self {
        Self {
            default_format: default_format.into(),
        }
    }

    async fn gather(&self, deps: &WorkerDeps, context: &AgentContext) -> Result<ProjectData> {
        let session = context.session_id();
        let fetch = |kind| async move {
            deps.memory
                .get_by_session(session, kind)
                .await
                .map_err(PilotError::Memory)
        };
        Ok(ProjectData {
            plans: fetch(MemoryType::Plan).await?,
            previous_reports: fetch(MemoryType::Report).await?,
            research: fetch(MemoryType::Research).await?,
        })
    }

    fn build_prompt(&self, message: &Message, context: &AgentContext, data: &ProjectData) -> String {
        let mut prompt = String::new();
        let _ = writeln!(prompt, "## Report Request\n{}\n", message.content);

        if !data.plans.is_empty() {
            prompt.push_str("## Project Plans\n");
            for plan in &data.plans {
                let _ = writeln!(
                    prompt,
                    "### Plan from {}\n{}\n",
                    plan.timestamp.format("%Y-%m-%d %H:%M"),
                    plan.content
                );
            }
        }

        if !data.research.is_empty() {
            prompt.push_str("## Research Findings\n");
            for finding in &data.research {
                let _ = writeln!(prompt, "{}\n", finding.content);
            }
        }

        if !data.previous_reports.is_empty() {
            prompt.push_str("## Previous Reports\n");
            for report in data.previous_reports.iter().take(PREVIOUS_REPORTS_SHOWN) {
                let _ = writeln!(
                    prompt,
                    "### Report from {}\n{}\n",
                    report.timestamp.format("%Y-%m-%d %H:%M"),
                    report.content
                );
            }
        }

        prompt.push_str("## Conversation History\n");
        prompt.push_str(&history_lines(context, PROMPT_HISTORY_WINDOW));
        let _ = write!(prompt, "\nFormat the report as {}.\n", self.default_format);
        prompt
    }
}

impl Default for ReportingSpecialist {
    fn default() -> Self {
        Self::new("Markdown")
    }
}

#[async_trait]
impl Specialist for ReportingSpecialist {
    fn name(&self) -> &'static str {
        "Reporting"
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Reporting
    }

    fn description(&self) -> &'static str {
        "Specializes in status reports, metrics, and project insights"
    }

    fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    fn temperature(&self) -> f32 {
        0.5
    }

    fn opening_progress(&self) -> Option<&'static str> {
        Some("Gathering project data...\n\n")
    }

    async fn prepare(
        &self,
        deps: &WorkerDeps,
        message: &Message,
        context: &AgentContext,
        _cancel: &CancellationToken,
    ) -> Result<Prepared> {
        let data = self.gather(deps, context).await?;
        tracing::debug!(
            session_id = context.session_id(),
            plans = data.plans.len(),
            reports = data.previous_reports.len(),
            research = data.research.len(),
            "gathered project data"
        );
        Ok(Prepared::prompt(self.build_prompt(message, context, &data)))
    }

    fn memory_entry(&self, _message: &Message, context: &AgentContext, content: &str) -> MemoryEntry {
        MemoryEntry::new(context.session_id(), MemoryType::Report, content)
            .with_project(context.project_id().map(str::to_string))
            .with_metadata("agent", self.name())
            .with_metadata("type", "status_report")
    }
}
