//! Error types for the hub layer.

use quizduel_protocol::Username;

/// Errors from the connection hub and the account store boundary.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The account store has no user with this name.
    #[error("unknown user {0}")]
    UnknownUser(Username),

    /// A score delta could not be written. The store's own retry policy
    /// applies; the session engine never retries.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    /// The account store can't be reached at all.
    #[error("account store unavailable: {0}")]
    StoreUnavailable(String),
}
