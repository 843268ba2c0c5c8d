//! Mid-session detection: the external bot greets us with "anything else?"
//! because a previous session never closed. The cure is to back out to the
//! main menu before pursuing the objective.

use std::sync::LazyLock;

use regex::RegexSet;

const RESET_PATTERNS: &[&str] = &[
    r"há mais algo",
    r"anything else",
    r"posso ajudar com mais",
    r"can I help with anything else",
    r"deseja (consultar|verificar) outr",
    r"would you like to",
    r"voltando ao menu",
    r"returning to menu",
    r"mais alguma (coisa|dúvida|pergunta)",
    r"any other (question|request)",
    r"alguma outra coisa",
    r"need anything else",
    r"avaliação do serviço",
    r"obrigad[ao] por ligar",
    r"obrigad[ao] por entrar em contato",
];

static RESET_SET: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new(RESET_PATTERNS.iter().map(|p| format!("(?i){}", p))).expect("reset patterns")
});

pub fn should_attempt_session_reset(message: &str) -> bool {
    !message.is_empty() && RESET_SET.is_match(&message.to_lowercase())
}

/// First attempt sends "menu", second sends "0".
pub fn reset_message_for_attempt(attempt: u32) -> &'static str {
    if attempt == 0 {
        "menu"
    } else {
        "0"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_mid_session_greetings() {
        assert!(should_attempt_session_reset(
            "Há mais algo que eu possa fazer por você?"
        ));
        assert!(should_attempt_session_reset("Is there anything else I can do?"));
        assert!(should_attempt_session_reset("Obrigado por entrar em contato!"));
    }

    #[test]
    fn ignores_normal_openings() {
        assert!(!should_attempt_session_reset("Olá! Digite seu CPF para começar."));
        assert!(!should_attempt_session_reset(""));
    }

    #[test]
    fn escalates_from_menu_to_zero() {
        assert_eq!(reset_message_for_attempt(0), "menu");
        assert_eq!(reset_message_for_attempt(1), "0");
        assert_eq!(reset_message_for_attempt(5), "0");
    }
}
