//! Web-search skill backed by the search provider registry.

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use switchboard_providers::llm::ToolSchema;
use switchboard_providers::search::SearchQuery;

use crate::error::{Result, SkillError};
use crate::skill::{Skill, SkillContext, SkillToolResult};

pub struct WebSearchSkill {
    /// Registry name of the provider to use ("brave", "google").
    pub provider: String,
}

impl WebSearchSkill {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
        }
    }
}

impl Default for WebSearchSkill {
    fn default() -> Self {
        Self::new("brave")
    }
}

#[async_trait]
impl Skill for WebSearchSkill {
    fn skill_type(&self) -> &'static str {
        "web_search"
    }

    fn tool_definitions(&self) -> Vec<ToolSchema> {
        vec![ToolSchema {
            name: "web_search".to_string(),
            description: "Search the web and return the top results".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query" },
                    "max_results": { "type": "integer", "default": 5 }
                },
                "required": ["query"]
            }),
        }]
    }

    async fn execute_tool(
        &self,
        ctx: &SkillContext,
        tool_name: &str,
        arguments: &serde_json::Value,
    ) -> Result<SkillToolResult> {
        if tool_name != "web_search" {
            return Err(SkillError::NoToolSupport(tool_name.to_string()));
        }
        let query_text = arguments["query"].as_str().unwrap_or_default();
        if query_text.is_empty() {
            return Err(SkillError::ToolFailed(
                tool_name.to_string(),
                "missing 'query' parameter".to_string(),
            ));
        }

        let provider = ctx
            .search
            .get(&self.provider, &ctx.credentials, &ctx.tenant)
            .map_err(|e| SkillError::ToolFailed(tool_name.to_string(), e.to_string()))?;

        let mut query = SearchQuery::new(query_text);
        if let Some(n) = arguments["max_results"].as_u64() {
            query.max_results = (n as usize).clamp(1, 10);
        }

        let response = provider.execute(&query).await;
        if !response.success {
            let detail = response
                .error
                .map(|e| format!("{}: {}", e.kind, e.message))
                .unwrap_or_else(|| "unknown failure".to_string());
            return Err(SkillError::ToolFailed(tool_name.to_string(), detail));
        }

        let hits = response.payload.unwrap_or_default();
        info!(provider = %self.provider, hits = hits.len(), "web search complete");

        let mut output = format!("Search results for \"{}\":\n", query_text);
        if hits.is_empty() {
            output.push_str("(no results)\n");
        }
        for (i, hit) in hits.iter().enumerate() {
            output.push_str(&format!(
                "{}. {} — {}\n   {}\n",
                i + 1,
                hit.title,
                hit.url,
                hit.snippet
            ));
        }

        Ok(SkillToolResult {
            output,
            media_paths: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_exposes_query() {
        let defs = WebSearchSkill::default().tool_definitions();
        assert_eq!(defs[0].name, "web_search");
    }

    #[test]
    fn handles_only_its_tool() {
        let skill = WebSearchSkill::default();
        assert!(skill.handles_tool("web_search"));
        assert!(!skill.handles_tool("run_shell_command"));
    }
}
