//! Event model (component C4): the `content` sum type, the client-facing
//! `Event` projection, and the PDU itself together with its hashing,
//! ID-derivation, and redaction operations.

pub mod pdu;
pub mod room;

use serde::Serialize;
use serde_json::Value;

use room::{Create, GuestAccess, HistoryVisibility, JoinRules, Member, Name, PowerLevels, Redaction, ThirdPartyInvite, Topic};

/// The parsed `content` of a PDU, tagged by event `type`.
///
/// Parsing never fails: an event type this crate doesn't recognize, or
/// content that doesn't match the expected shape for one it does, becomes
/// [`EventContent::Other`]. The authorization engine treats a PDU whose
/// content didn't parse into the variant a rule expects as not matching
/// that rule — for `m.room.create` in particular, that is itself how rule
/// 1 of §4.4 rejects a malformed create event.
#[derive(Clone, Debug)]
pub enum EventContent {
    Create(Create),
    Member(Member),
    PowerLevels(PowerLevels),
    JoinRules(JoinRules),
    HistoryVisibility(HistoryVisibility),
    GuestAccess(GuestAccess),
    Name(Name),
    Topic(Topic),
    ThirdPartyInvite(ThirdPartyInvite),
    Redaction(Redaction),
    Other(Value),
}

impl EventContent {
    pub fn parse(event_type: &str, content: &Value) -> Self {
        let parsed = match event_type {
            "m.room.create" => serde_json::from_value(content.clone()).ok().map(EventContent::Create),
            "m.room.member" => serde_json::from_value(content.clone()).ok().map(EventContent::Member),
            "m.room.power_levels" => {
                serde_json::from_value(content.clone()).ok().map(EventContent::PowerLevels)
            }
            "m.room.join_rules" => serde_json::from_value(content.clone()).ok().map(EventContent::JoinRules),
            "m.room.history_visibility" => {
                serde_json::from_value(content.clone()).ok().map(EventContent::HistoryVisibility)
            }
            "m.room.guest_access" => serde_json::from_value(content.clone()).ok().map(EventContent::GuestAccess),
            "m.room.name" => serde_json::from_value(content.clone()).ok().map(EventContent::Name),
            "m.room.topic" => serde_json::from_value(content.clone()).ok().map(EventContent::Topic),
            "m.room.third_party_invite" => {
                serde_json::from_value(content.clone()).ok().map(EventContent::ThirdPartyInvite)
            }
            "m.room.redaction" => serde_json::from_value(content.clone()).ok().map(EventContent::Redaction),
            _ => None,
        };
        parsed.unwrap_or_else(|| EventContent::Other(content.clone()))
    }
}

/// The client-facing projection of a PDU: everything a client needs, none
/// of the federation machinery (`hashes`, `auth_events`, `depth`, ...).
///
/// Grounded in the teacher's `events::Event`, generalized from a single
/// hardcoded shape to whatever `pdu::Pdu::to_client_format` produces for
/// any room version.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub content: Value,
    #[serde(rename = "type")]
    pub event_type: String,
    pub event_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    pub sender: String,
    pub origin_server_ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unsigned: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,
}
