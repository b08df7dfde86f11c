use std::io;

/// The error kinds the core surfaces.
///
/// `IntegrityFail` is the normal "bad server" signal for a range read: it
/// surfaces as `Err(PorError::IntegrityFail)` from
/// [`crate::merkle::proof::verify_and_assemble`] rather than a panic or a
/// process abort. The audit round's pass/fail counterpart never goes
/// through this enum at all — [`crate::audit::protocol::AuditOutcome`]
/// carries a failed audit as an ordinary `{ passed: bool }` value, per spec
/// §7's "reported to the caller as a result, not as an exception." Every
/// other variant here is propagated with `?` and aborts the current
/// operation.
#[derive(Debug, thiserror::Error)]
pub enum PorError {
    #[error("io error: {0}")]
    IoFatal(#[from] io::Error),

    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error("request out of bounds: {0}")]
    Bounds(String),

    #[error("merkle root mismatch on verification")]
    IntegrityFail,

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

pub type PorResult<T> = Result<T, PorError>;

impl PorError {
    pub fn bounds(msg: impl Into<String>) -> Self {
        PorError::Bounds(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        PorError::ProtocolMismatch(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        PorError::ConfigInvalid(msg.into())
    }
}
