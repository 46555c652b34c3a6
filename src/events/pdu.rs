//! The PDU itself: hashing, ID derivation, redaction, and signing.
//!
//! Grounded in the teacher's `events::room_version::v4::PduV4` (content
//! hash via canonical JSON of an unhashed struct, `$`-prefixed event ID,
//! `redact`/`finalize` methods), generalized from one hardcoded struct per
//! room version into a single `Pdu` whose version-dependent operations
//! take a [`RoomVersionBehavior`] instead.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    canonical_json,
    crypto::{self, keys::Ed25519SigningKey},
    error::{Error, ErrorKind},
    room_version::{EventIdFormat, RedactionRuleSet, RoomVersionBehavior},
    util::MatrixId,
};

use super::{Event, EventContent};

/// An immutable room event, in the generic shape every room version
/// shares (§3). `embedded_event_id` is populated only for
/// [`EventIdFormat::Embedded`] versions (v1–v2); for later versions the ID
/// is a pure function of the rest of the event and is never stored on the
/// struct itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pdu {
    #[serde(rename = "event_id", default, skip_serializing_if = "Option::is_none")]
    pub embedded_event_id: Option<String>,
    pub room_id: String,
    pub sender: MatrixId,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,
    pub content: Value,
    pub origin_server_ts: i64,
    pub depth: i64,
    pub prev_events: Vec<String>,
    pub auth_events: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redacts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsigned: Option<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub hashes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub signatures: Map<String, Value>,
}

impl Pdu {
    /// The entry point for a PDU arriving as untrusted bytes (over
    /// federation, or from a client's `/send`): decodes through
    /// [`canonical_json::decode`] before building the typed struct, so a
    /// duplicate object key anywhere in the event is rejected up front
    /// rather than silently resolved to serde's last-write-wins behavior.
    /// Code that already holds a `Pdu` it built or validated itself (tests,
    /// `PduStore` round-trips) has no reason to go through this.
    pub fn from_canonical_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let value = canonical_json::decode(bytes)?;
        serde_json::from_value(value).map_err(|e| ErrorKind::InvalidEvent(e.to_string()).into())
    }

    pub fn event_content(&self) -> EventContent {
        EventContent::parse(&self.event_type, &self.content)
    }

    /// The event ID named by an `m.room.redaction`'s `redacts`, wherever
    /// this room version keeps it: the top-level field pre-v11, or
    /// `content.redacts` from v11 on (§4.3). `None` for every other event
    /// type, or a redaction that omits it.
    pub fn redacts_target(&self) -> Option<String> {
        if self.event_type != "m.room.redaction" {
            return None;
        }
        self.redacts.clone().or_else(|| match self.event_content() {
            EventContent::Redaction(r) => r.redacts,
            _ => None,
        })
    }

    fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("Pdu always serializes to a JSON object")
    }

    /// `sha256(canonical_json(pdu \ {signatures, unsigned}))`, the digest
    /// that belongs under `hashes.sha256`.
    pub fn content_hash(&self) -> String {
        let mut value = self.to_value();
        strip(&mut value, &["signatures", "unsigned"]);
        crypto::sha256_unpadded_base64(canonical_json::encode(&value).as_bytes())
    }

    /// Returns a copy with `hashes.sha256` set to [`Pdu::content_hash`].
    /// Call before computing the event ID or signing.
    pub fn with_content_hash(mut self) -> Self {
        let digest = self.content_hash();
        let mut hashes = Map::new();
        hashes.insert("sha256".to_owned(), Value::String(digest));
        self.hashes = hashes;
        self
    }

    /// Returns a redacted copy: only the top-level keys and per-event-type
    /// content keys §4.3 whitelists survive. `content` is implicitly
    /// retained (filtered) even though it isn't itself named in the
    /// top-level whitelist, since the whitelist would otherwise have
    /// nothing to filter.
    pub fn redact(&self, rules: RedactionRuleSet) -> Self {
        Pdu {
            embedded_event_id: self.embedded_event_id.clone(),
            room_id: self.room_id.clone(),
            sender: self.sender.clone(),
            event_type: self.event_type.clone(),
            state_key: self.state_key.clone(),
            content: redact_content(&self.event_type, &self.content, rules),
            origin_server_ts: self.origin_server_ts,
            depth: self.depth,
            prev_events: self.prev_events.clone(),
            auth_events: self.auth_events.clone(),
            redacts: None,
            unsigned: None,
            hashes: self.hashes.clone(),
            signatures: self.signatures.clone(),
        }
    }

    /// Derives this PDU's event ID per its room version's
    /// [`EventIdFormat`].
    pub fn event_id(&self, behavior: &RoomVersionBehavior) -> Result<String, Error> {
        match behavior.event_id_format {
            EventIdFormat::Embedded => self.embedded_event_id.clone().ok_or_else(|| {
                ErrorKind::InvalidEvent("room version requires an embedded event_id".into()).into()
            }),
            EventIdFormat::PlainBase64 | EventIdFormat::DollarBase64 => {
                let redacted = self.redact(behavior.redaction_rules);
                let mut value = redacted.to_value();
                // Signatures (and unsigned, already absent after redact) are
                // excluded so the ID never depends on who has signed the
                // event yet — otherwise finalize() computing the ID before
                // attaching its own signature would produce an ID that
                // disagrees with recomputing it from the signed PDU.
                strip(&mut value, &["event_id", "signatures"]);
                let digest = crypto::sha256_unpadded_base64(canonical_json::encode(&value).as_bytes());
                Ok(match behavior.event_id_format {
                    EventIdFormat::DollarBase64 => format!("${}", digest),
                    _ => digest,
                })
            }
        }
    }

    /// Stamps the content hash, derives the event ID, and signs the
    /// result with every key in `keys`, merging into any signatures
    /// already present. Returns the finalized PDU together with its ID.
    pub fn finalize(
        mut self,
        behavior: &RoomVersionBehavior,
        server_name: &str,
        keys: &HashMap<String, Ed25519SigningKey>,
    ) -> Result<(Self, String), Error> {
        self = self.with_content_hash();
        let event_id = self.event_id(behavior)?;
        let existing = Value::Object(self.signatures.clone());
        let value = self.to_value();
        let signatures = crypto::keys::sign_json(&value, server_name, keys, Some(&existing))?;
        self.signatures = signatures.as_object().cloned().unwrap_or_default();
        Ok((self, event_id))
    }

    pub fn to_client_format(&self, event_id: String) -> Event {
        Event {
            content: self.content.clone(),
            event_type: self.event_type.clone(),
            event_id,
            room_id: Some(self.room_id.clone()),
            sender: self.sender.as_str().to_owned(),
            origin_server_ts: self.origin_server_ts,
            unsigned: self.unsigned.clone(),
            state_key: self.state_key.clone(),
        }
    }
}

fn strip(value: &mut Value, keys: &[&str]) {
    if let Some(map) = value.as_object_mut() {
        for key in keys {
            map.remove(*key);
        }
    }
}

fn redact_content(event_type: &str, content: &Value, rules: RedactionRuleSet) -> Value {
    let v11 = rules == RedactionRuleSet::V11;
    let whitelist: &[&str] = match event_type {
        "m.room.member" if v11 => &["membership", "join_authorised_via_users_server", "third_party_invite"],
        "m.room.member" => &["membership", "join_authorised_via_users_server"],
        "m.room.create" if v11 => &["creator", "room_version"],
        "m.room.create" => &["creator"],
        "m.room.join_rules" => &["join_rule", "allow"],
        "m.room.power_levels" if v11 => &[
            "ban",
            "events",
            "events_default",
            "invite",
            "kick",
            "redact",
            "state_default",
            "users",
            "users_default",
            "notifications",
        ],
        "m.room.power_levels" => {
            &["ban", "events", "events_default", "invite", "kick", "redact", "state_default", "users", "users_default"]
        }
        "m.room.history_visibility" => &["history_visibility"],
        "m.room.redaction" if v11 => &["redacts"],
        _ => &[],
    };

    let mut out = Map::new();
    if let Some(map) = content.as_object() {
        for key in whitelist {
            if let Some(v) = map.get(*key) {
                out.insert((*key).to_owned(), v.clone());
            }
        }
    }
    Value::Object(out)
}
