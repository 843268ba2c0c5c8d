//! Ephemeral tool-output ring (layer 5).
//!
//! Full tool outputs never enter conversational memory — a 3 000-line scan
//! would poison every later prompt. Instead each (agent, sender) pair keeps
//! the last few executions here, a cheap one-line index is always injectable,
//! and the full text is injected only when the user actually refers back to
//! it ("show me the scan result", `/inject`).

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

/// Executions kept per (agent, sender) pair.
const RING_CAPACITY: usize = 10;
/// Entries expire after this many subsequent messages…
const MAX_MESSAGES_RETAINED: u32 = 20;
/// …or after this much wall time, whichever comes first.
const MAX_AGE_MINUTES: i64 = 60;

/// Natural-language cues that the user is referring back to a tool run.
const RECALL_KEYWORDS: &[&str] = &[
    "result",
    "results",
    "output",
    "findings",
    "scan",
    "show me",
    "full",
    "complete",
    "more details",
    "explain",
    "resultado",
    "completo",
    "detalhes",
];

#[derive(Debug, Clone)]
pub struct ToolOutputEntry {
    pub execution_id: String,
    pub tool_name: String,
    pub command_name: String,
    pub full_output: String,
    pub created_at: DateTime<Utc>,
    /// Messages observed on this pair since the execution.
    pub messages_since: u32,
}

pub struct ToolOutputBuffer {
    rings: DashMap<(i64, String), VecDeque<ToolOutputEntry>>,
}

impl ToolOutputBuffer {
    pub fn new() -> Self {
        Self {
            rings: DashMap::new(),
        }
    }

    /// Record a completed execution and return its id.
    pub fn add(
        &self,
        agent_id: i64,
        sender_key: &str,
        tool_name: &str,
        command_name: &str,
        full_output: &str,
    ) -> String {
        let execution_id = Uuid::new_v4().to_string()[..8].to_string();
        let entry = ToolOutputEntry {
            execution_id: execution_id.clone(),
            tool_name: tool_name.to_string(),
            command_name: command_name.to_string(),
            full_output: full_output.to_string(),
            created_at: Utc::now(),
            messages_since: 0,
        };

        let mut ring = self
            .rings
            .entry((agent_id, sender_key.to_string()))
            .or_default();
        if ring.len() >= RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(entry);
        execution_id
    }

    /// Verbatim output for one execution, if it is still retained.
    pub fn get_full(&self, agent_id: i64, sender_key: &str, execution_id: &str) -> Option<String> {
        let ring = self.rings.get(&(agent_id, sender_key.to_string()))?;
        ring.iter()
            .find(|e| e.execution_id == execution_id)
            .map(|e| e.full_output.clone())
    }

    /// Bump message counters and drop expired entries. Called once per
    /// inbound message on the pair.
    pub fn increment_message_count(&self, agent_id: i64, sender_key: &str) {
        if let Some(mut ring) = self.rings.get_mut(&(agent_id, sender_key.to_string())) {
            let cutoff = Utc::now() - Duration::minutes(MAX_AGE_MINUTES);
            for entry in ring.iter_mut() {
                entry.messages_since += 1;
            }
            ring.retain(|e| e.messages_since <= MAX_MESSAGES_RETAINED && e.created_at > cutoff);
        }
    }

    /// Cheap always-injectable index of recallable executions.
    pub fn lightweight_context(&self, agent_id: i64, sender_key: &str) -> Option<String> {
        let ring = self.rings.get(&(agent_id, sender_key.to_string()))?;
        if ring.is_empty() {
            return None;
        }

        let mut out =
            String::from("[Recent tool executions available for recall — ask to see full output]\n");
        for entry in ring.iter() {
            out.push_str(&format!(
                "- {}:{} (id {}, {} chars)\n",
                entry.tool_name,
                entry.command_name,
                entry.execution_id,
                entry.full_output.len()
            ));
        }
        Some(out)
    }

    /// Full-output injection, gated on the user actually asking for it.
    ///
    /// Triggers on the `/inject` directive (optionally with an execution id)
    /// or on recall keywords; keyword matches prefer entries whose tool name
    /// appears in the message, falling back to the most recent execution.
    pub fn inject_full_context(
        &self,
        agent_id: i64,
        sender_key: &str,
        message_text: &str,
    ) -> Option<String> {
        let ring = self.rings.get(&(agent_id, sender_key.to_string()))?;
        if ring.is_empty() {
            return None;
        }

        let lower = message_text.to_lowercase();
        let slash_inject = lower.starts_with("/inject");
        let keyword_hit = RECALL_KEYWORDS.iter().any(|k| lower.contains(k))
            || ring.iter().any(|e| lower.contains(&e.tool_name.to_lowercase()));
        if !slash_inject && !keyword_hit {
            return None;
        }

        // /inject <id> pins one execution.
        if slash_inject {
            if let Some(id) = lower.split_whitespace().nth(1) {
                if let Some(entry) = ring.iter().find(|e| e.execution_id == id) {
                    return Some(render_full(entry));
                }
            }
        }

        let entry = ring
            .iter()
            .rev()
            .find(|e| lower.contains(&e.tool_name.to_lowercase()))
            .or_else(|| ring.back())?;
        Some(render_full(entry))
    }

    pub fn clear(&self, agent_id: i64, sender_key: &str) {
        self.rings.remove(&(agent_id, sender_key.to_string()));
    }
}

impl Default for ToolOutputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn render_full(entry: &ToolOutputEntry) -> String {
    format!(
        "[Full output of {}:{} (id {})]\n{}",
        entry.tool_name, entry.command_name, entry.execution_id, entry.full_output
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_is_bounded() {
        let buf = ToolOutputBuffer::new();
        for i in 0..15 {
            buf.add(1, "s", "nmap", "quick_scan", &format!("report {}", i));
        }
        let ring = buf.rings.get(&(1, "s".to_string())).unwrap();
        assert_eq!(ring.len(), RING_CAPACITY);
        // Oldest entries were evicted.
        assert!(ring.front().unwrap().full_output.contains("report 5"));
    }

    #[test]
    fn get_full_round_trips() {
        let buf = ToolOutputBuffer::new();
        let id = buf.add(1, "s", "nmap", "quick_scan", "PORT 22 open\nPORT 80 open");
        let full = buf.get_full(1, "s", &id).unwrap();
        assert!(full.contains("PORT 22"));
        assert!(buf.get_full(1, "other", &id).is_none());
    }

    #[test]
    fn lightweight_context_lists_entries() {
        let buf = ToolOutputBuffer::new();
        buf.add(1, "s", "nmap", "quick_scan", "output");
        let ctx = buf.lightweight_context(1, "s").unwrap();
        assert!(ctx.contains("nmap:quick_scan"));
        assert!(buf.lightweight_context(1, "nobody").is_none());
    }

    #[test]
    fn inject_requires_reference() {
        let buf = ToolOutputBuffer::new();
        buf.add(1, "s", "nmap", "quick_scan", "the full scan report");

        assert!(buf.inject_full_context(1, "s", "bom dia!").is_none());
        assert!(buf
            .inject_full_context(1, "s", "show me the full scan result")
            .unwrap()
            .contains("the full scan report"));
        assert!(buf
            .inject_full_context(1, "s", "explain the nmap output")
            .is_some());
    }

    #[test]
    fn slash_inject_pins_execution() {
        let buf = ToolOutputBuffer::new();
        let first = buf.add(1, "s", "nmap", "quick_scan", "first report");
        buf.add(1, "s", "httpx", "probe", "second report");

        let ctx = buf
            .inject_full_context(1, "s", &format!("/inject {}", first))
            .unwrap();
        assert!(ctx.contains("first report"));
    }

    #[test]
    fn entries_expire_by_message_count() {
        let buf = ToolOutputBuffer::new();
        buf.add(1, "s", "nmap", "quick_scan", "report");
        for _ in 0..(MAX_MESSAGES_RETAINED + 1) {
            buf.increment_message_count(1, "s");
        }
        assert!(buf.lightweight_context(1, "s").is_none() || buf
            .rings
            .get(&(1, "s".to_string()))
            .map(|r| r.is_empty())
            .unwrap_or(true));
    }
}
