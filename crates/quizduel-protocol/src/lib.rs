//! Wire protocol for QuizDuel.
//!
//! This crate defines the "language" that clients and the server speak:
//!
//! - **Types** ([`LobbyId`], [`Username`], [`Question`], [`LobbySummary`],
//!   [`FinalResult`], ...): the data carried inside events.
//! - **Events** ([`ClientEvent`], [`ServerEvent`], [`Envelope`]): the one
//!   tagged vocabulary every frame uses.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how frames become bytes.
//! - **Errors** ([`ProtocolError`]).
//!
//! The protocol layer knows nothing about connections, lobbies or timers.
//! It only knows how to describe and (de)serialize events.
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope<ClientEvent>) → Hub / Lobby
//! ```

mod codec;
mod error;
mod events;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use events::{ClientEvent, Envelope, ServerEvent};
pub use types::{
    EndReason, ErrorKind, FinalResult, LobbyId, LobbyStatus, LobbySummary,
    NextStep, Outcome, PlayerScore, Question, Username,
};

/// The protocol version clients must send in `Hello`.
pub const PROTOCOL_VERSION: u32 = 1;
