//! Goal detection over the inbound message and the cleaned reply.

use std::sync::LazyLock;

use regex::{Regex, RegexSet};

/// PT/EN signals that the user (or the counterpart) is wrapping up. Word
/// boundaries keep "feito" from matching inside "Perfeito".
const USER_COMPLETION: &[&str] = &[
    r"\bthank you\b",
    r"\bthanks\b",
    r"\bbye\b",
    r"\bgoodbye\b",
    r"\bok done\b",
    r"\bthat's all\b",
    r"\bnothing else\b",
    r"\bobrigado\b",
    r"\bobrigada\b",
    r"\bvaleu\b",
    r"\btchau\b",
    r"\baté mais\b",
    r"\bera só isso\b",
    r"\bsó isso\b",
    r"\bpronto\b",
    r"\bfeito\b",
];

const AGENT_COMPLETION: &[&str] = &[
    r"\bcompleted\b",
    r"\bfinished\b",
    r"\ball done\b",
    r"\bthat's everything\b",
    r"\bthank you for\b",
    r"\bthanks for participating\b",
    r"\bwas great talking\b",
    r"\bhave a great day\b",
    r"\btake care\b",
    r"\bcompletou\b",
    r"\bconcluído\b",
    r"\bconcluida\b",
    r"\bfinalizado\b",
    r"\bfinalizada\b",
    r"\bpesquisa completa\b",
    r"\btodas as perguntas\b",
    r"\btudo certo\b",
    r"\bobrigado por\b",
    r"\bfoi ótimo conversar\b",
    r"\btenha um ótimo dia\b",
    r"\brecebi\b",
    r"\banotado\b",
    r"\bregistrado\b",
    r"\brecebido\b",
];

/// Complete data retrieval requires the actual payload — status AND date,
/// or flight status with gate/time — not a mere acknowledgment of the
/// request.
const DATA_RETRIEVAL: &[&str] = &[
    r"(em trânsito|in transit).*previs\w* (para|until).*202\d",
    r"previs\w* (para|until).*202\d.*(em trânsito|in transit)",
    r"status.*delivered.*\d{4}-\d{2}-\d{2}",
    r"entregue.*em.*\d{2}/\d{2}/202\d",
    r"(flight|voo).*\b(on time|no horário).*gate\s*\d+",
    r"departure.*\d{1,2}:\d{2}.*gate",
];

static USER_SET: LazyLock<RegexSet> =
    LazyLock::new(|| RegexSet::new(USER_COMPLETION).expect("user completion patterns"));
static AGENT_SET: LazyLock<RegexSet> =
    LazyLock::new(|| RegexSet::new(AGENT_COMPLETION).expect("agent completion patterns"));
static DATA_SET: LazyLock<RegexSet> =
    LazyLock::new(|| RegexSet::new(DATA_RETRIEVAL).expect("data retrieval patterns"));
static PROVIDING_INFO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(segue|aqui|pronto|certo)[^\d]*\d{6,}").expect("providing-info pattern")
});

/// Why a thread reached its goal; becomes the persisted goal summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalReason {
    DataReceived,
    AgentSignaled,
    UserProvidedInfo,
    UserSignaled,
}

impl GoalReason {
    pub fn summary(&self) -> &'static str {
        match self {
            GoalReason::DataReceived => "Data successfully retrieved from external bot",
            GoalReason::AgentSignaled => "Conversation objective achieved",
            GoalReason::UserProvidedInfo => "User provided requested information",
            GoalReason::UserSignaled => "User indicated completion",
        }
    }
}

/// Check both sides of the turn for a completion signal. Only fires from
/// turn 2 so the opening exchange cannot close the thread.
pub fn detect_goal(inbound: &str, reply: &str, current_turn: u32) -> Option<GoalReason> {
    if current_turn < 2 {
        return None;
    }
    let inbound_lower = inbound.to_lowercase();
    let reply_lower = reply.to_lowercase();

    if DATA_SET.is_match(&inbound_lower) {
        return Some(GoalReason::DataReceived);
    }
    if AGENT_SET.is_match(&reply_lower) {
        return Some(GoalReason::AgentSignaled);
    }
    if PROVIDING_INFO.is_match(&inbound_lower) {
        return Some(GoalReason::UserProvidedInfo);
    }
    if USER_SET.is_match(&inbound_lower) {
        return Some(GoalReason::UserSignaled);
    }
    None
}

/// Session-end phrases uttered by the external counterpart. Only honored
/// after turn 3 so the tail of a *previous* session cannot close a freshly
/// opened thread.
const SESSION_END: &[&str] = &[
    r"vamos encerrar o diálogo",
    r"encerrar a sessão",
    r"avaliação do serviço",
    r"foi um prazer ajudar (você|vocês)",
    r"agradecemos (sua confiança|por entrar em contato)",
    r"até a próxima",
    r"session (closed|ended|terminated)",
    r"conversation (closed|ended|terminated)",
    r"thank you for (contacting|calling)",
];

static SESSION_END_SET: LazyLock<RegexSet> =
    LazyLock::new(|| RegexSet::new(SESSION_END).expect("session end patterns"));

pub fn external_session_ended(inbound: &str, current_turn: u32) -> bool {
    current_turn >= 3 && SESSION_END_SET.is_match(&inbound.to_lowercase())
}
