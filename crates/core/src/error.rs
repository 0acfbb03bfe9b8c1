//! Core error taxonomy.
//!
//! The wire contract only distinguishes three outcomes: malformed requests
//! (400), missing entities in lookup contexts (404), and everything else
//! (500) — authorization failures, illegal state transitions, conflicts, and
//! backend failures all share the generic 500 envelope. The core still
//! carries them as distinct variants; the collapse to status codes happens in
//! the transport layer.

/// Error type for every core operation.
#[derive(Debug, thiserror::Error)]
pub enum OmrError {
    /// Missing or malformed request field. Maps to 400.
    #[error("{0}")]
    Validation(String),
    /// Entity missing in a lookup context. Maps to 404.
    #[error("{0}")]
    NotFound(String),
    /// Caller is not authorized for the operation. Maps to 500.
    #[error("{0}")]
    Denied(String),
    /// Illegal state transition. Maps to 500.
    #[error("{0}")]
    InvalidState(String),
    /// Already-exists conflict not caught by field validation. Maps to 500.
    #[error("{0}")]
    Conflict(String),
    /// CA or ledger collaborator failed. Maps to 500, surfaced verbatim.
    #[error("{0}")]
    Backend(String),
}

impl OmrError {
    /// `Invalid data: <field> missing` — the literal used for every absent
    /// required field.
    pub fn missing(field: &str) -> Self {
        OmrError::Validation(format!("Invalid data: {field} missing"))
    }

    /// `<entity> not found`.
    pub fn not_found(entity: &str) -> Self {
        OmrError::NotFound(format!("{entity} not found"))
    }

    /// `Invalid id: <id> does not exist` — used where the contract reports a
    /// missing entity as a malformed request rather than a 404.
    pub fn invalid_id(id: &str) -> Self {
        OmrError::Validation(format!("Invalid id: {id} does not exist"))
    }

    /// Generic authorization failure, `error: <detail>`.
    pub fn denied(detail: &str) -> Self {
        OmrError::Denied(format!("error: {detail}"))
    }
}

pub type OmrResult<T> = std::result::Result<T, OmrError>;
