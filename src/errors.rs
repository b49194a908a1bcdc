//! Failure classification for RPC and signer errors.
//!
//! Errors coming back from JSON-RPC endpoints and wallets are only reliably
//! distinguishable by their text, so classification is a pure function of the
//! message. Non-retryable patterns (user rejection, insufficient funds, nonce
//! conflicts, duplicate transactions) are checked first and always win over the
//! retryable ones (rate limiting, timeouts, connection failures, 5xx/429).
//!
//! Anything matching neither set is [`ErrorKind::Unknown`] and is *not* retried.

use serde::Serialize;
use std::fmt::{Display, Formatter};

/// Taxonomy of failures surfaced to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimit,
    Network,
    UserRejected,
    InsufficientFunds,
    Unknown,
}

impl ErrorKind {
    /// Whether failures of this kind are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::RateLimit | ErrorKind::Network)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::RateLimit => write!(f, "rate_limit"),
            ErrorKind::Network => write!(f, "network"),
            ErrorKind::UserRejected => write!(f, "user_rejected"),
            ErrorKind::InsufficientFunds => write!(f, "insufficient_funds"),
            ErrorKind::Unknown => write!(f, "unknown"),
        }
    }
}

const USER_REJECTED_PATTERNS: &[&str] = &["user rejected", "user denied", "rejected by user"];

const INSUFFICIENT_FUNDS_PATTERNS: &[&str] = &["insufficient funds"];

/// Nonce conflicts and duplicate submissions: retrying only makes them worse.
const CONFLICT_PATTERNS: &[&str] = &["nonce too low", "already known", "replacement transaction"];

const RATE_LIMIT_PATTERNS: &[&str] = &["rate limit", "too many requests"];
const RATE_LIMIT_STATUS: &[&str] = &["429"];

const NETWORK_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "etimedout",
    "econnreset",
    "econnrefused",
    "enotfound",
    "network",
    "fetch failed",
    "failed to fetch",
    "connection",
    "unavailable",
];
const NETWORK_STATUS: &[&str] = &["500", "502", "503"];

/// Max length of the operator-facing message produced by [`user_message`].
pub const USER_MESSAGE_MAX_LEN: usize = 100;

/// Classify an error message.
pub fn classify(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();

    if contains_any(&lower, USER_REJECTED_PATTERNS) {
        return ErrorKind::UserRejected;
    }
    if contains_any(&lower, INSUFFICIENT_FUNDS_PATTERNS) {
        return ErrorKind::InsufficientFunds;
    }
    if contains_any(&lower, CONFLICT_PATTERNS) {
        return ErrorKind::Unknown;
    }
    if contains_any(&lower, RATE_LIMIT_PATTERNS) || contains_status(&lower, RATE_LIMIT_STATUS) {
        return ErrorKind::RateLimit;
    }
    if contains_any(&lower, NETWORK_PATTERNS) || contains_status(&lower, NETWORK_STATUS) {
        return ErrorKind::Network;
    }
    ErrorKind::Unknown
}

/// Default retryability verdict used by [`crate::retry::with_retry`].
pub fn is_retryable(message: &str) -> bool {
    classify(message).is_retryable()
}

/// Short operator-facing text for a failure.
///
/// Rate limits and network failures get canned text, everything else is the
/// original message cut to [`USER_MESSAGE_MAX_LEN`] characters.
pub fn user_message(message: &str) -> String {
    match classify(message) {
        ErrorKind::RateLimit => "Rate limited by RPC, retrying...".to_string(),
        ErrorKind::Network => "Network error, retrying...".to_string(),
        _ if message.trim().is_empty() => "Deployment failed".to_string(),
        _ => truncate(message, USER_MESSAGE_MAX_LEN),
    }
}

/// Cut `message` to at most `max` characters, appending `...` when shortened.
pub fn truncate(message: &str, max: usize) -> String {
    match message.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &message[..idx]),
        None => message.to_string(),
    }
}

fn contains_any(haystack: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| haystack.contains(p))
}

/// Match HTTP status codes only as standalone numbers, so a gas value like
/// `2500000` does not read as a 500.
fn contains_status(haystack: &str, codes: &[&str]) -> bool {
    let bytes = haystack.as_bytes();
    codes.iter().any(|code| {
        haystack.match_indices(code).any(|(start, m)| {
            let end = start + m.len();
            let before_ok = start == 0 || !bytes[start - 1].is_ascii_digit();
            let after_ok = end == bytes.len() || !bytes[end].is_ascii_digit();
            before_ok && after_ok
        })
    })
}
