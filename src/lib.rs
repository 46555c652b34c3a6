//! The protocol core of a Matrix homeserver: canonical JSON and signing
//! (C1/C2), the event model (C4), the authorization engine (C5), state
//! resolution (C6), the room-version registry (C3), and federation key
//! management (C7/C8).
//!
//! This crate is a pure, CPU-bound library — it owns no transport,
//! persistence, sync, media, or push machinery. Callers plug their own
//! storage engine in through [`storage::PduStore`] and their own HTTP
//! routing around [`federation`]'s wire types.

pub mod auth;
pub mod canonical_json;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod federation;
pub mod room_version;
pub mod state_res;
pub mod storage;
pub mod util;
