//! Wire shapes for the federation key and transaction APIs (§6): types this
//! crate can (de)serialize, not an HTTP client or router — routing is the
//! caller's job, per the external-interfaces design.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `GET /_matrix/key/v2/server[/<key_id>]` response, and one element of
/// `POST /_matrix/key/v2/query`'s `server_keys` array. Self-signed under
/// every key in `verify_keys`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerKeyResponse {
    pub server_name: String,
    pub valid_until_ts: i64,
    #[serde(default)]
    pub verify_keys: HashMap<String, VerifyKey>,
    #[serde(default)]
    pub old_verify_keys: HashMap<String, OldVerifyKey>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub signatures: Map<String, Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerifyKey {
    pub key: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OldVerifyKey {
    pub key: String,
    pub expired_ts: i64,
}

/// `POST /_matrix/key/v2/query` request body: per server, the minimum
/// `valid_until_ts` the caller needs for each key ID of interest (an empty
/// map means "any key").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyQueryRequest {
    pub server_keys: HashMap<String, HashMap<String, KeyQueryCriteria>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KeyQueryCriteria {
    #[serde(default)]
    pub minimum_valid_until_ts: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyQueryResponse {
    pub server_keys: Vec<ServerKeyResponse>,
}

/// `PUT /_matrix/federation/v1/send/<txn_id>` request body. Idempotent on
/// `(origin, txn_id)` — the transaction ID itself travels in the URL path.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SendTransaction {
    pub origin: String,
    pub origin_server_ts: i64,
    #[serde(default)]
    pub pdus: Vec<Value>,
    #[serde(default)]
    pub edus: Vec<Value>,
}

/// `GET /_matrix/federation/v1/make_{join,knock}/<room>/<user>` response:
/// an unsigned event template the joining/knocking server fills in
/// `origin_server_ts`, hashes, and signs before sending it back via the
/// matching `send_*` endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MakeMembershipResponse {
    pub event: Value,
    pub room_version: String,
}

/// `PUT /_matrix/federation/v{1,2}/send_{join,knock}/<room>/<event_id>`
/// request body: the completed, signed event from [`MakeMembershipResponse`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SendMembershipRequest {
    #[serde(flatten)]
    pub event: Value,
}

/// `send_join`'s response: the room's current state and auth chain so the
/// joining server can build its own copy of the room without federating a
/// full backfill first.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SendJoinResponse {
    pub state: Vec<Value>,
    pub auth_chain: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members_omitted: Option<bool>,
}

/// `send_knock`'s response: just enough state (typically `m.room.create`,
/// `m.room.join_rules`, the room's name/avatar) for the knocking user's
/// client to render a useful "knock pending" view.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SendKnockResponse {
    pub knock_room_state: Vec<Value>,
}

/// `GET /make_leave/<room>/<user>` response: same shape as
/// [`MakeMembershipResponse`], named separately since `send_leave` (unlike
/// `send_join`/`send_knock`) has no meaningful response body.
pub type MakeLeaveResponse = MakeMembershipResponse;
