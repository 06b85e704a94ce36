//! Hub error types.

/// Errors raised while building events at the publish boundary.
///
/// Delivery itself never fails from the caller's point of view; drops are
/// counted, not returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// Event type tag is not one of the known kinds
    #[error("unknown event type: {0}")]
    UnknownEventKind(String),

    /// Payload is not a JSON object
    #[error("event data must be a JSON object, got {0}")]
    InvalidPayload(&'static str),
}
