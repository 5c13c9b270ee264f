//! Player connectivity for QuizDuel.
//!
//! This crate sits between the transport and the lobby engine:
//!
//! 1. **Accounts**: the [`AccountStore`] trait is the boundary to the
//!    user database (lookups and score deltas). [`InMemoryAccountStore`]
//!    implements it for development and tests.
//! 2. **Connections**: the [`ConnectionHub`] maps each logged-in username
//!    to its one live outbound channel and delivers session events to
//!    exactly the players they concern.
//!
//! ```text
//! Lobby Layer (above)  ← sends events to usernames, watches for departures
//!     ↕
//! Hub Layer (this crate)  ← username → live connection
//!     ↕
//! Transport / Protocol (below)
//! ```

mod account;
mod error;
mod hub;

pub use account::{AccountStore, InMemoryAccountStore, UserRecord};
pub use error::HubError;
pub use hub::{ConnectionHub, DepartureSender, Outbound, OutboundSender};
