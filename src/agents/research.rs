use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::specialist::{Prepared, Specialist, WorkerDeps};
use super::{AgentKind, ToolCallRecord};
use crate::context::{AgentContext, Message};
use crate::error::Result;
use crate::llm::{ChatMessage, ChatRequest, request_completion};
use crate::memory::{MemoryEntry, MemoryType};

const SYSTEM_PROMPT: &str = "\
You are the Research Agent for ProjectPilot, specializing in finding and synthesizing information.

Your capabilities:
1. Web Search: find relevant information from the internet
2. Documentation Lookup: retrieve technical documentation
3. Best Practices: recommend industry best practices
4. Technology Comparison: compare tools, frameworks, and approaches
5. Source Citation: always cite your sources

Guidelines:
- Cite sources with URLs when available
- Distinguish between facts and opinions
- Provide balanced perspectives when comparing options
- Summarize findings clearly and highlight key takeaways

Format research results with clear sections and bullet points.";

const MAX_QUERIES: usize = 3;
const WEB_SEARCH_TOOL: &str = "web_search";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Vec<SearchResult>>;
}

pub struct ResearchSpecialist {
    search: Option<Arc<dyn WebSearch>>,
    max_search_results: usize,
}

impl ResearchSpecialist {
    pub fn new(search: Option<Arc<dyn WebSearch>>, max_search_results: usize) -> Self {
        Self {
            search,
            max_search_results,
        }
    }

    async fn extract_queries(
        &self,
        deps: &WorkerDeps,
        message: &Message,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let prompt = format!(
            "Extract search queries from the following request.\n\
             Return 1-3 focused search queries that would help answer the question.\n\n\
             Request: {}\n\n\
             Return as JSON array: [\"query1\", \"query2\", \"query3\"]",
            message.content
        );
        let request = ChatRequest::new(vec![ChatMessage::user(prompt)])
            .with_temperature(0.3)
            .with_max_tokens(200);
        let response = request_completion(deps.completion.as_ref(), request, cancel).await?;
        Ok(parse_queries(&response.content).unwrap_or_else(|| vec![message.content.clone()]))
    }

    async fn run_searches(
        &self,
        search: &dyn WebSearch,
        queries: &[String],
        cancel: &CancellationToken,
    ) -> (Vec<SearchResult>, Vec<ToolCallRecord>) {
        let mut results = Vec::new();
        let mut tool_calls = Vec::with_capacity(queries.len());
        for query in queries {
            let started = Instant::now();
            let outcome = search.search(query, cancel).await;
            let duration_ms = started.elapsed().as_millis() as u64;
            let parameters = serde_json::json!({ "query": query });
            match outcome {
                Ok(found) => {
                    tool_calls.push(ToolCallRecord {
                        tool_name: WEB_SEARCH_TOOL.to_string(),
                        parameters,
                        success: true,
                        output: Some(format!("Found {} results", found.len())),
                        error: None,
                        duration_ms,
                    });
                    results.extend(found);
                }
                Err(err) => {
                    tracing::warn!(query = %query, error = %err, "web search failed");
                    tool_calls.push(ToolCallRecord {
                        tool_name: WEB_SEARCH_TOOL.to_string(),
                        parameters,
                        success: false,
                        output: None,
                        error: Some(format!("{err:#}")),
                        duration_ms,
                    });
                }
            }
        }
        (results, tool_calls)
    }

    fn build_prompt(&self, message: &Message, results: &[SearchResult]) -> String {
        let mut prompt = String::new();
        let _ = writeln!(prompt, "## Research Request\n{}\n", message.content);
        if !results.is_empty() {
            prompt.push_str("## Search Results\n");
            for result in results.iter().take(self.max_search_results) {
                let _ = writeln!(
                    prompt,
                    "### {}\nURL: {}\nSnippet: {}\n",
                    result.title, result.url, result.snippet
                );
            }
        }
        prompt.push_str("## Instructions\n");
        prompt.push_str("Synthesize the search results to answer the research request.\n");
        prompt.push_str("Always cite sources with [Title](URL) format.\n");
        prompt.push_str("Highlight key findings and recommendations.\n");
        prompt
    }
}

/// Reads a JSON string array, tolerating a surrounding code fence.
fn parse_queries(raw: &str) -> Option<Vec<String>> {
    let trimmed = raw.trim();
    let start = trimmed.find('[')?;
    let end = trimmed.rfind(']')?;
    if end < start {
        return None;
    }
    let queries = serde_json::from_str::<Vec<String>>(&trimmed[start..=end])
        .ok()?
        .into_iter()
        .map(|query| query.trim().to_string())
        .filter(|query| !query.is_empty())
        .take(MAX_QUERIES)
        .collect::<Vec<_>>();
    (!queries.is_empty()).then_some(queries)
}

#[async_trait]
impl Specialist for ResearchSpecialist {
    fn name(&self) -> &'static str {
        "Research"
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Research
    }

    fn description(&self) -> &'static str {
        "Specializes in web search, documentation, and best practice research"
    }

    fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    fn temperature(&self) -> f32 {
        0.5
    }

    fn opening_progress(&self) -> Option<&'static str> {
        Some("Searching for information...\n\n")
    }

    async fn prepare(
        &self,
        deps: &WorkerDeps,
        message: &Message,
        context: &AgentContext,
        cancel: &CancellationToken,
    ) -> Result<Prepared> {
        let (results, tool_calls) = match self.search.as_deref() {
            Some(search) => {
                let queries = self.extract_queries(deps, message, cancel).await?;
                tracing::debug!(
                    session_id = context.session_id(),
                    queries = queries.len(),
                    "running research queries"
                );
                self.run_searches(search, &queries, cancel).await
            }
            None => (Vec::new(), Vec::new()),
        };

        Ok(Prepared {
            prompt: self.build_prompt(message, &results),
            progress: Some(format!(
                "Found {} results. Synthesizing...\n\n",
                results.len()
            )),
            tool_calls,
        })
    }

    fn memory_entry(&self, message: &Message, context: &AgentContext, content: &str) -> MemoryEntry {
        MemoryEntry::new(
            context.session_id(),
            MemoryType::Research,
            format!("Research on: {}\n\nFindings:\n{}", message.content, content),
        )
        .with_project(context.project_id().map(str::to_string))
        .with_metadata("agent", self.name())
        .with_metadata("query", message.content.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queries_parse_from_fenced_json() {
        let raw = "```json\n[\"rust async\", \" \", \"tokio semaphore\"]\n```";
        assert_eq!(
            parse_queries(raw),
            Some(vec!["rust async".to_string(), "tokio semaphore".to_string()])
        );
    }

    #[test]
    fn unparseable_queries_yield_none() {
        assert_eq!(parse_queries("search for rust things"), None);
        assert_eq!(parse_queries("[]"), None);
        assert_eq!(parse_queries("[1, 2]"), None);
    }

    #[test]
    fn queries_are_capped() {
        let raw = r#"["a", "b", "c", "d"]"#;
        assert_eq!(parse_queries(raw).map(|q| q.len()), Some(3));
    }

    #[test]
    fn research_entry_wraps_query_and_findings() {
        let specialist = ResearchSpecialist::new(None, 10);
        let entry = specialist.memory_entry(
            &Message::user("compare queues"),
            &AgentContext::new("s1"),
            "use a channel",
        );
        assert_eq!(entry.kind, MemoryType::Research);
        assert_eq!(
            entry.content,
            "Research on: compare queues\n\nFindings:\nuse a channel"
        );
        assert_eq!(entry.metadata_str("query"), Some("compare queues"));
    }
}
