//! System-prompt assembly.
//!
//! Order: identity/language guard → agent prompt (persona placeholders
//! already substituted) → current date/time → contact directory summary →
//! sandboxed-tool prompts + mandatory execution rules → skill tool prompts.

/// Identity and language guard prepended to every prompt. Keeps the model
/// from naming its underlying provider and pins the reply language to the
/// language of the current message, overriding learned preferences.
pub const IDENTITY_GUARD: &str = "\
IMPORTANT - Model Identity & Language:
- You are an AI assistant. When asked about your identity, describe your PURPOSE, not your model.
- Do NOT claim or invent a model name or version. If asked directly, say: \"I'm an AI assistant powered by advanced language models.\"

CRITICAL - Language Matching (HIGHEST PRIORITY):
- ALWAYS respond in the SAME LANGUAGE as the user's CURRENT message.
- This rule OVERRIDES any language preference found in memory or context.
- Do NOT greet in a different language than the user's message.";

/// Mandatory tool-execution rules appended whenever the agent has sandboxed
/// tools. The model must emit the block, not narrate intent.
pub const TOOL_EXECUTION_RULES: &str = "\
MANDATORY TOOL EXECUTION RULES

When the user asks you to use a tool or run a command:
1. DO NOT just acknowledge or describe what you will do.
2. DO NOT say \"I will execute...\" or \"Proceeding with...\".
3. IMMEDIATELY output the tool call block in your response:

[TOOL_CALL]
tool_name: <name_of_tool>
command_name: <command_to_run>
parameters:
  <param1>: <value1>
[/TOOL_CALL]

The system executes the block and substitutes the result. You may add a brief message AFTER the block.";

/// Inputs to one prompt assembly.
#[derive(Debug, Clone, Default)]
pub struct PromptParts {
    pub agent_system_prompt: String,
    pub contact_context: Option<String>,
    pub sandboxed_tool_prompts: Option<String>,
    pub skill_tool_prompts: Vec<String>,
}

/// Build the final system prompt for one turn.
pub fn assemble(parts: &PromptParts, now: chrono::DateTime<chrono::Utc>) -> String {
    let mut sections: Vec<String> = Vec::new();

    sections.push(IDENTITY_GUARD.to_string());
    sections.push(parts.agent_system_prompt.clone());
    sections.push(format!(
        "IMPORTANT: Today's date is {} and the current time is {} UTC. When users say 'today' or 'now', they mean this.",
        now.format("%B %d, %Y"),
        now.format("%H:%M"),
    ));

    if let Some(contacts) = &parts.contact_context {
        sections.push(contacts.clone());
    }
    if let Some(tools) = &parts.sandboxed_tool_prompts {
        sections.push(tools.clone());
        sections.push(TOOL_EXECUTION_RULES.to_string());
    }
    for prompt in &parts.skill_tool_prompts {
        sections.push(prompt.clone());
    }

    sections.join("\n\n")
}

/// Substitute persona/tone placeholders in an agent prompt. Appends the
/// persona when the prompt carries no placeholder at all.
pub fn apply_persona(system_prompt: &str, persona: Option<&str>) -> String {
    match persona {
        None => system_prompt
            .replace("{{PERSONA}}", "")
            .replace("{{TONE}}", ""),
        Some(p) => {
            if system_prompt.contains("{{PERSONA}}") {
                system_prompt.replace("{{PERSONA}}", p)
            } else if system_prompt.contains("{{TONE}}") {
                system_prompt.replace("{{TONE}}", p)
            } else {
                format!("{}\n\n{}", system_prompt, p)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembly_order_is_stable() {
        let parts = PromptParts {
            agent_system_prompt: "You are a scheduling assistant.".to_string(),
            contact_context: Some("Known contacts:\n- Alice".to_string()),
            sandboxed_tool_prompts: Some("## Available Tools\n- nmap".to_string()),
            skill_tool_prompts: vec!["## Shell Command Tool".to_string()],
        };
        let prompt = assemble(&parts, chrono::Utc::now());

        let identity = prompt.find("Model Identity").unwrap();
        let agent = prompt.find("scheduling assistant").unwrap();
        let date = prompt.find("Today's date").unwrap();
        let contacts = prompt.find("Known contacts").unwrap();
        let tools = prompt.find("Available Tools").unwrap();
        let rules = prompt.find("MANDATORY TOOL EXECUTION RULES").unwrap();
        let shell = prompt.find("Shell Command Tool").unwrap();
        assert!(identity < agent && agent < date && date < contacts);
        assert!(contacts < tools && tools < rules && rules < shell);
    }

    #[test]
    fn tool_rules_only_with_tools() {
        let parts = PromptParts {
            agent_system_prompt: "x".to_string(),
            ..Default::default()
        };
        assert!(!assemble(&parts, chrono::Utc::now()).contains("MANDATORY TOOL"));
    }

    #[test]
    fn persona_placeholder_substitution() {
        assert_eq!(
            apply_persona("Be helpful. {{PERSONA}}", Some("Speak like a pirate.")),
            "Be helpful. Speak like a pirate."
        );
        assert_eq!(
            apply_persona("Be helpful.", Some("Speak like a pirate.")),
            "Be helpful.\n\nSpeak like a pirate."
        );
        assert_eq!(apply_persona("Be {{TONE}} helpful.", None), "Be  helpful.");
    }
}
