use thiserror::Error;

/// Structural failures surfaced to the event loop. None of these take the
/// server down; transport-level failures stay `std::io::Error` at the call
/// sites that produce them.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("no connection registered for token {0}")]
    NotFound(usize),

    #[error("outbound queue for token {0} is empty")]
    EmptyQueue(usize),

    #[error("refusing to broadcast an empty payload")]
    EmptyPayload,
}
