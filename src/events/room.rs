//! Strongly typed `content` shapes for the state-event types the
//! authorization engine and state resolution need to reason about.
//!
//! Grounded in the teacher's `events::room` module (`Create`, `JoinRules`,
//! `Member`, `PowerLevels`, ...), widened from required fields with
//! serde-derived defaults into the optional fields the spec actually
//! requires (a `m.room.power_levels` event omitting `ban` means "use the
//! default 50", not "malformed event").

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::util::MatrixId;

/// `m.room.create` content.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Create {
    /// Absent from room version 11+, where the creator is instead the
    /// event's `sender`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<MatrixId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predecessor: Option<PreviousRoom>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PreviousRoom {
    pub room_id: String,
    pub event_id: String,
}

/// `m.room.member` content.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Member {
    pub membership: Membership,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_authorised_via_users_server: Option<MatrixId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub third_party_invite: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub displayname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Membership {
    Invite,
    Join,
    Knock,
    Leave,
    Ban,
}

/// `m.room.join_rules` content.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct JoinRules {
    pub join_rule: JoinRule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow: Option<Vec<AllowRule>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinRule {
    Public,
    Knock,
    Invite,
    Private,
    Restricted,
    KnockRestricted,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AllowRule {
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
}

/// `m.room.power_levels` content. Every field is optional: an absent field
/// means "use the §4.4 default", which is a property of how the
/// authorization engine reads this struct, not of this struct's shape.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct PowerLevels {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ban: Option<serde_json::Number>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub events: HashMap<String, serde_json::Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events_default: Option<serde_json::Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invite: Option<serde_json::Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kick: Option<serde_json::Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redact: Option<serde_json::Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_default: Option<serde_json::Number>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub users: HashMap<MatrixId, serde_json::Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users_default: Option<serde_json::Number>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub notifications: HashMap<String, serde_json::Number>,
}

/// `m.room.history_visibility` content.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HistoryVisibility {
    pub history_visibility: HistoryVisibilityType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryVisibilityType {
    Invited,
    Joined,
    Shared,
    WorldReadable,
}

/// `m.room.redaction` content. Before room version 11 `redacts` lives on
/// the PDU itself; v11+ also carries it here (see §4.3).
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Redaction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redacts: Option<String>,
}

/// `m.room.guest_access` content. Neither the redaction whitelist nor the
/// authorization engine special-cases this type (it falls through to the
/// ordinary state-event power check), but a typed shape still beats
/// leaving it as an opaque `Other` for callers that want to read it.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GuestAccess {
    pub guest_access: GuestAccessValue,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuestAccessValue {
    CanJoin,
    Forbidden,
}

/// `m.room.name` content.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Name {
    pub name: String,
}

/// `m.room.topic` content.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Topic {
    pub topic: String,
}

/// `m.room.third_party_invite` content. Authorization rule 4 (§4.4) only
/// needs the sender's membership and power, not these fields, but they're
/// part of the event shape a caller reading room state back out will want.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ThirdPartyInvite {
    pub display_name: String,
    pub key_validity_url: String,
    pub public_key: String,
    #[serde(default)]
    pub public_keys: Vec<PublicKey>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PublicKey {
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_validity_url: Option<String>,
}
