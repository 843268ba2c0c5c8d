use switchboard_core::types::{IsolationMode, TenantId};

/// Everything the agent service needs to know about the routed agent.
/// Built by the router from the agent row; persona/tone substitution has
/// already happened by the time a profile reaches the service.
#[derive(Debug, Clone)]
pub struct AgentProfile {
    pub id: i64,
    pub tenant_id: TenantId,
    pub name: String,
    pub model_provider: String,
    pub model_name: String,
    pub system_prompt: String,
    /// Outbound formatting template; `{agent_name}` and `{response}`
    /// placeholders.
    pub response_template: String,
    pub isolation_mode: IsolationMode,
    /// Agent-specific contamination pattern extensions.
    pub contamination_patterns: Vec<String>,
}

impl AgentProfile {
    /// Apply the response template (default `@{agent_name}: {response}`).
    pub fn format_response(&self, response: &str) -> String {
        let template = if self.response_template.is_empty() {
            "@{agent_name}: {response}"
        } else {
            &self.response_template
        };
        template
            .replace("{agent_name}", &self.name)
            .replace("{response}", response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(template: &str) -> AgentProfile {
        AgentProfile {
            id: 1,
            tenant_id: TenantId::default_tenant(),
            name: "scheduler".to_string(),
            model_provider: "anthropic".to_string(),
            model_name: "claude-sonnet-4-6".to_string(),
            system_prompt: "You are a scheduling assistant.".to_string(),
            response_template: template.to_string(),
            isolation_mode: IsolationMode::Isolated,
            contamination_patterns: Vec::new(),
        }
    }

    #[test]
    fn default_template_prefixes_agent_name() {
        assert_eq!(
            profile("").format_response("done"),
            "@scheduler: done"
        );
    }

    #[test]
    fn custom_template_is_honored() {
        assert_eq!(profile("{response}").format_response("done"), "done");
    }
}
