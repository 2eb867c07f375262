use thiserror::Error;

/// Errors surfaced by the broadcast engine's admin-facing API.
///
/// Per-event failures (bad rule, transform failure, rate limiting, transport
/// errors) never reach a caller as a `Result::Err` — they are counted in the
/// relevant subsystem's stats and logged instead. This enum only covers the
/// genuine caller mistakes that construction and administration can raise.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid routing rule {rule_id}: {reason}")]
    InvalidRule { rule_id: String, reason: String },

    #[error("duplicate rule id: {0}")]
    DuplicateRule(String),

    #[error("invalid subscription: {0}")]
    InvalidSubscription(String),

    #[error("engine is shutting down")]
    Shutdown,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
