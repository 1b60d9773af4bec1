//! Client-side view of the chat: rooms, per-room history, presence, typing
//! and optimistic reactions, kept in sync by applying server events.

pub mod state;

pub use state::{ChatState, PendingReaction};
