//! The storage boundary (a collaborator, not a component the core owns):
//! the minimal interface state resolution and the authorization engine
//! need to pull events a caller already persisted.
//!
//! Grounded in the teacher's `storage::Storage` trait, cut down from its
//! full client-facing surface (room creation, account data, device lists,
//! ...) to the three operations the protocol algorithms themselves
//! actually call, matching the external-interfaces note that persistence
//! is a Non-goal the core only consumes through a narrow trait.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::{error::Error, events::pdu::Pdu, util::MatrixId};

#[async_trait]
pub trait PduStore: Send + Sync {
    /// Fetches one event by ID, or `None` if this store hasn't seen it.
    async fn get_pdu(&self, room_id: &str, event_id: &str) -> Result<Option<Pdu>, Error>;

    /// Persists a batch of events, keyed by the event ID the caller
    /// already derived via [`crate::events::pdu::Pdu::event_id`].
    async fn add_pdus(&self, room_id: &str, pdus: Vec<(String, Pdu)>) -> Result<(), Error>;

    /// The power level `sender` currently holds in `room_id`, per the
    /// room's current `m.room.power_levels` state (or the §4.4 defaults
    /// if absent). Exposed directly because several federation-facing
    /// callers (notary re-signing eligibility, rate limiting) need this
    /// without reconstructing the whole auth-state map themselves.
    async fn sender_power_level(&self, room_id: &str, sender: &MatrixId) -> Result<i64, Error>;
}

/// An in-memory [`PduStore`] for tests: no persistence, no eviction.
#[derive(Default)]
pub struct MemoryPduStore {
    events: Mutex<HashMap<String, HashMap<String, Pdu>>>,
}

impl MemoryPduStore {
    pub fn new() -> Self {
        MemoryPduStore { events: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl PduStore for MemoryPduStore {
    async fn get_pdu(&self, room_id: &str, event_id: &str) -> Result<Option<Pdu>, Error> {
        Ok(self.events.lock().unwrap().get(room_id).and_then(|room| room.get(event_id)).cloned())
    }

    async fn add_pdus(&self, room_id: &str, pdus: Vec<(String, Pdu)>) -> Result<(), Error> {
        let mut events = self.events.lock().unwrap();
        let room = events.entry(room_id.to_owned()).or_insert_with(HashMap::new);
        for (event_id, pdu) in pdus {
            room.insert(event_id, pdu);
        }
        Ok(())
    }

    async fn sender_power_level(&self, room_id: &str, sender: &MatrixId) -> Result<i64, Error> {
        let events = self.events.lock().unwrap();
        let room = match events.get(room_id) {
            Some(room) => room,
            None => return Ok(0),
        };
        let power_levels = room.values().find(|pdu| pdu.event_type == "m.room.power_levels" && pdu.state_key.as_deref() == Some(""));
        let level = match power_levels.map(|pdu| pdu.event_content()) {
            Some(crate::events::EventContent::PowerLevels(levels)) => levels
                .users
                .get(sender)
                .and_then(|n| n.as_i64())
                .unwrap_or_else(|| levels.users_default.as_ref().and_then(|n| n.as_i64()).unwrap_or(0)),
            _ => {
                let creator = room
                    .values()
                    .find(|pdu| pdu.event_type == "m.room.create")
                    .and_then(|pdu| match pdu.event_content() {
                        crate::events::EventContent::Create(c) => c.creator.or_else(|| Some(pdu.sender.clone())),
                        _ => None,
                    });
                if creator.as_ref() == Some(sender) {
                    100
                } else {
                    0
                }
            }
        };
        Ok(level)
    }
}

/// A thin, cloneable handle around a [`MemoryPduStore`] for tests that
/// need to share one store across several components without threading
/// an `Arc` everywhere by hand.
#[derive(Clone, Default)]
pub struct SharedMemoryPduStore(pub Arc<MemoryPduStore>);

#[async_trait]
impl PduStore for SharedMemoryPduStore {
    async fn get_pdu(&self, room_id: &str, event_id: &str) -> Result<Option<Pdu>, Error> {
        self.0.get_pdu(room_id, event_id).await
    }

    async fn add_pdus(&self, room_id: &str, pdus: Vec<(String, Pdu)>) -> Result<(), Error> {
        self.0.add_pdus(room_id, pdus).await
    }

    async fn sender_power_level(&self, room_id: &str, sender: &MatrixId) -> Result<i64, Error> {
        self.0.sender_power_level(room_id, sender).await
    }
}
