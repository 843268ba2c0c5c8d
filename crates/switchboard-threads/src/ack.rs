//! Status-acknowledgment short-circuit.
//!
//! When the external bot delivers the data we asked for ("em trânsito,
//! previsão 2026-02-14"), echoing it back restarts the loop. The correct
//! move is a brief thanks.

use std::sync::LazyLock;

use regex::RegexSet;

const STATUS_PATTERNS: &[&str] = &[
    r"\bem trânsito\b",
    r"\bentregue\b",
    r"\bstatus\b",
    r"\bsua entrega\b",
    r"\bprevis[aã]o\b",
    r"\bprevist[ao]\b",
];

const DATE_PATTERNS: &[&str] = &[r"\b202\d-\d{2}-\d{2}\b", r"\b\d{2}/\d{2}/202\d\b"];

/// Requests for more input disqualify the short-circuit; the bot still
/// wants something from us.
const REQUEST_PATTERNS: &[&str] = &[
    r"\bpor favor\b",
    r"\bme informe\b",
    r"\bdigite\b",
    r"\binforme\b",
    r"\bpreciso\b",
    r"\bforneça\b",
];

static STATUS_SET: LazyLock<RegexSet> =
    LazyLock::new(|| RegexSet::new(STATUS_PATTERNS).expect("status patterns"));
static DATE_SET: LazyLock<RegexSet> =
    LazyLock::new(|| RegexSet::new(DATE_PATTERNS).expect("date patterns"));
static REQUEST_SET: LazyLock<RegexSet> =
    LazyLock::new(|| RegexSet::new(REQUEST_PATTERNS).expect("request patterns"));

pub const ACKNOWLEDGMENT: &str = "Perfeito, obrigado!";

/// True when the message carries a status word AND a date-like token AND no
/// request for further input.
pub fn should_acknowledge_status(message: &str) -> bool {
    if message.is_empty() {
        return false;
    }
    let lower = message.to_lowercase();
    if REQUEST_SET.is_match(&lower) {
        return false;
    }
    STATUS_SET.is_match(&lower) && DATE_SET.is_match(&lower)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acknowledges_status_with_date() {
        assert!(should_acknowledge_status(
            "Seu pedido está em trânsito, previsão para 2026-02-14."
        ));
        assert!(should_acknowledge_status(
            "Status: entregue em 14/02/2026 ao destinatário."
        ));
    }

    #[test]
    fn request_words_disable_the_short_circuit() {
        assert!(!should_acknowledge_status(
            "Status em trânsito. Por favor digite o CPF para 2026-02-14."
        ));
    }

    #[test]
    fn status_without_date_is_not_enough() {
        assert!(!should_acknowledge_status("Seu pedido está em trânsito."));
        assert!(!should_acknowledge_status("A data é 2026-02-14."));
    }
}
