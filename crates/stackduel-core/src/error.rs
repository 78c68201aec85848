use serde::{Deserialize, Serialize};

/// Machine-readable error kinds carried in error response envelopes as
/// `data.kind`. These are the only error identifiers that cross the wire;
/// no stack traces or internal detail ever do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Frame length header over the cap, non-object payload, or undecodable
    /// JSON. Fatal for the connection it occurred on.
    MalformedFrame,
    /// Request envelope carried an action tag outside the catalogue.
    UnknownAction,
    Unauthenticated,
    PermissionDenied,
    NotFound,
    /// Uniqueness violation, e.g. an email that is already registered or a
    /// user that is already online.
    Conflict,
    InvalidCredentials,
    /// Room or match is in the wrong state for the request.
    InvalidState,
    /// Room already has two members.
    Capacity,
    LauncherError,
    PersistenceUnavailable,
    Timeout,
    Forfeit,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
