//! Bot-to-bot loop detection over a thread's recent history.

use tracing::warn;

use crate::types::ThreadTurn;

/// Phrases an external bot repeats when it is stuck in its own loop.
const EXTERNAL_LOOP_PHRASES: &[&str] = &[
    "há mais algo que eu possa fazer",
    "anything else i can help",
    "algo mais",
    "something else",
    "outras dúvidas",
    "other questions",
];

/// Length of the agent-message prefix compared for "similar" responses.
const SIMILAR_PREFIX_LEN: usize = 30;

/// True when the conversation shows no progress:
/// - the last two external messages are identical,
/// - the last three agent messages are identical or share a prefix,
/// - an external loop phrase recurred twice, or
/// - the exchange alternates identically (A→B→A→B).
pub fn detect_stagnation(history: &[ThreadTurn]) -> bool {
    if history.len() < 4 {
        return false;
    }
    let recent = &history[history.len().saturating_sub(8)..];

    let user_messages: Vec<String> = recent
        .iter()
        .filter(|t| t.role == "user")
        .map(|t| t.content.to_lowercase().trim().to_string())
        .collect();
    let agent_messages: Vec<String> = recent
        .iter()
        .filter(|t| t.role == "agent")
        .map(|t| t.content.to_lowercase().trim().to_string())
        .collect();

    if user_messages.len() >= 2 {
        let last_two = &user_messages[user_messages.len() - 2..];
        if last_two[0] == last_two[1] {
            warn!(message = %last_two[0].chars().take(50).collect::<String>(), "external message repeated twice");
            return true;
        }
    }

    if agent_messages.len() >= 3 {
        let last_three = &agent_messages[agent_messages.len() - 3..];
        if last_three.iter().all(|m| m == &last_three[0]) {
            warn!("agent response repeated three times");
            return true;
        }
        let prefixes: Vec<String> = last_three
            .iter()
            .map(|m| m.chars().take(SIMILAR_PREFIX_LEN).collect())
            .collect();
        if prefixes.iter().all(|p| p == &prefixes[0]) {
            warn!("agent responses share an identical prefix");
            return true;
        }
    }

    let loop_hits = user_messages
        .iter()
        .rev()
        .take(4)
        .filter(|m| EXTERNAL_LOOP_PHRASES.iter().any(|p| m.contains(p)))
        .count();
    if loop_hits >= 2 {
        warn!(hits = loop_hits, "external bot repeating its loop phrase");
        return true;
    }

    if user_messages.len() >= 2 && agent_messages.len() >= 2 && recent.len() >= 4 {
        let user_unique = user_messages[user_messages.len() - 2..]
            .iter()
            .collect::<std::collections::HashSet<_>>()
            .len();
        let agent_unique = agent_messages[agent_messages.len() - 2..]
            .iter()
            .collect::<std::collections::HashSet<_>>()
            .len();
        if user_unique == 1 && agent_unique == 1 {
            warn!("alternating identical exchange detected");
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(role: &str, content: &str) -> ThreadTurn {
        ThreadTurn::now(role, content, None)
    }

    #[test]
    fn repeated_external_message_is_stagnant() {
        let history = vec![
            turn("user", "escolha uma opção"),
            turn("agent", "menu"),
            turn("user", "escolha uma opção"),
            turn("agent", "0"),
        ];
        assert!(detect_stagnation(&history));
    }

    #[test]
    fn similar_agent_prefixes_are_stagnant() {
        let history = vec![
            turn("user", "a"),
            turn("agent", "Compreendido, vou verificar isso agora para o senhor X"),
            turn("user", "b"),
            turn("agent", "Compreendido, vou verificar isso agora para o senhor Y"),
            turn("user", "c"),
            turn("agent", "Compreendido, vou verificar isso agora para o senhor Z"),
        ];
        assert!(detect_stagnation(&history));
    }

    #[test]
    fn recurring_loop_phrase_is_stagnant() {
        let history = vec![
            turn("user", "Há mais algo que eu possa fazer por você?"),
            turn("agent", "quero rastrear meu pedido"),
            turn("user", "Há mais algo que eu possa fazer hoje?"),
            turn("agent", "rastreio 123"),
        ];
        assert!(detect_stagnation(&history));
    }

    #[test]
    fn progressing_conversation_is_not_stagnant() {
        let history = vec![
            turn("user", "Digite o número do pedido"),
            turn("agent", "1234567890123"),
            turn("user", "Encontrei! Deseja o status ou a nota fiscal?"),
            turn("agent", "status"),
            turn("user", "Em trânsito, chega amanhã."),
            turn("agent", "Perfeito, obrigado!"),
        ];
        assert!(!detect_stagnation(&history));
    }

    #[test]
    fn short_history_never_triggers() {
        let history = vec![turn("user", "oi"), turn("agent", "oi")];
        assert!(!detect_stagnation(&history));
    }
}
