//! Authorization engine (component C5): the ten ordered rules of §4.4.
//!
//! `authorize` is a pure function of `(event, auth_state, room_version)` —
//! no storage access, no I/O — grounded in the teacher's
//! `validate::auth::auth_check_v1`, restructured from an async function
//! reaching into a `Storage` trait and a live `State` into a synchronous
//! one reading only the auth-event slice the caller has already resolved,
//! the way §4.4 itself specifies it ("Given `(event, auth_state_map,
//! room_version_behavior)` returns `{allowed, reason?}`").

use std::collections::HashMap;

use tracing::{instrument, Level};

use crate::{
    error::Error,
    events::{
        pdu::Pdu,
        room::{Create, JoinRule, JoinRules, Member, Membership, PowerLevels},
        EventContent,
    },
    room_version::RoomVersionBehavior,
    util::MatrixId,
};

/// The subset of room state needed to authorize one event: every current
/// `(type, state_key)` slot the rules below might consult, keyed exactly
/// as room state is (§3 "Room state").
pub type AuthState<'a> = HashMap<(String, String), &'a Pdu>;

/// The result of running §4.4 against one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthDecision {
    pub allowed: bool,
    /// Which rule produced the decision, and why — present whenever
    /// `allowed` is `false`, and on the few `true` paths worth explaining
    /// (e.g. "no power_levels event yet").
    pub rule: &'static str,
    pub reason: String,
}

impl AuthDecision {
    fn allow(rule: &'static str, reason: impl Into<String>) -> Self {
        AuthDecision { allowed: true, rule, reason: reason.into() }
    }

    fn reject(rule: &'static str, reason: impl Into<String>) -> Self {
        AuthDecision { allowed: false, rule, reason: reason.into() }
    }
}

/// Runs §4.4 against `event` given `auth_state`. Never fails: a
/// structurally bad `event` (content that doesn't parse into the variant a
/// rule needs) is itself grounds for rejection, not an `Err`.
///
/// `redacts_own_event` is rule 8's escape hatch for `m.room.redaction`: the
/// caller compares the redaction's sender against the sender of the event
/// named by its `redacts` field and passes the result here, since this
/// function has no storage access to look that event up itself. Ignored for
/// every other event type.
#[instrument(skip(auth_state, room_version), fields(event_type = %event.event_type, state_key = ?event.state_key))]
pub fn authorize(
    event: &Pdu,
    auth_state: &AuthState<'_>,
    room_version: &RoomVersionBehavior,
    redacts_own_event: bool,
) -> AuthDecision {
    if let EventContent::Create(_) = event.event_content() {
        return authorize_create(event);
    }

    if auth_state.get(&("m.room.create".to_owned(), String::new())).is_none() {
        return AuthDecision::reject("create", "auth_state has no m.room.create event");
    }

    if let EventContent::Member(content) = event.event_content() {
        return authorize_membership(event, &content, auth_state, room_version);
    }

    let sender_membership = membership_of(auth_state, event.sender.as_str());
    if sender_membership != Some(Membership::Join) {
        return AuthDecision::reject("sender-must-be-joined", "sender is not currently joined");
    }

    let levels = EffectivePowerLevels::from_auth_state(auth_state);
    let sender_level = levels.user_level(&event.sender);

    if event.event_type == "m.room.third_party_invite" {
        return if sender_level >= levels.invite {
            AuthDecision::allow("third-party-invite", "sender power meets invite level")
        } else {
            AuthDecision::reject("third-party-invite", "sender power below invite level")
        };
    }

    let required = levels.event_level(&event.event_type, event.state_key.is_some());
    if sender_level < required {
        let rule = if event.state_key.is_some() { "state-power" } else { "message-power" };
        return AuthDecision::reject(rule, format!("sender power {} below required {}", sender_level, required));
    }

    if let Some(state_key) = &event.state_key {
        if state_key.starts_with('@') && state_key != event.sender.as_str() {
            return AuthDecision::reject("state-power", "state_key names a user other than the sender");
        }
    }

    if let EventContent::PowerLevels(new_levels) = event.event_content() {
        return authorize_power_levels(event, &new_levels, auth_state, &levels, sender_level, room_version);
    }

    if event.event_type == "m.room.redaction" {
        if redacts_own_event {
            return AuthDecision::allow("redaction-power", "sender is redacting its own event");
        }
        return if sender_level >= levels.redact {
            AuthDecision::allow("redaction-power", "sender power meets redact level")
        } else {
            AuthDecision::reject("redaction-power", "sender power below redact level")
        };
    }

    AuthDecision::allow("default", "no further rule applies")
}

/// The power level `user` holds given `auth_state`, per the §4.4 defaults
/// and the creator-has-100-with-no-power_levels-event rule. Exposed for
/// callers outside this module (state resolution's power ordering) that
/// need the same number without re-deriving it by hand.
pub fn effective_power_level(auth_state: &AuthState<'_>, user: &MatrixId) -> f64 {
    EffectivePowerLevels::from_auth_state(auth_state).user_level(user)
}

/// Rejects `event` with `ErrorKind::Unauthorized` if [`authorize`] would,
/// otherwise returns `()`. A thin convenience for callers that want a
/// `Result` instead of matching on [`AuthDecision`] themselves.
#[instrument(skip(auth_state, room_version), err = Level::DEBUG)]
pub fn authorize_strict(
    event: &Pdu,
    auth_state: &AuthState<'_>,
    room_version: &RoomVersionBehavior,
    redacts_own_event: bool,
) -> Result<(), Error> {
    let decision = authorize(event, auth_state, room_version, redacts_own_event);
    if decision.allowed {
        Ok(())
    } else {
        Err(crate::error::ErrorKind::unauthorized(decision.rule, decision.reason).into())
    }
}

fn authorize_create(event: &Pdu) -> AuthDecision {
    if !event.prev_events.is_empty() {
        return AuthDecision::reject("create", "create event must have no prev_events");
    }
    if event.state_key.as_deref() != Some("") {
        return AuthDecision::reject("create", "create event must have state_key \"\"");
    }
    let create = match event.event_content() {
        EventContent::Create(c) => c,
        _ => return AuthDecision::reject("create", "content did not parse as m.room.create"),
    };
    if create.creator.is_none() && create.room_version.is_none() {
        return AuthDecision::reject("create", "content has neither creator nor room_version");
    }
    AuthDecision::allow("create", "well-formed create event")
}

fn authorize_membership(
    event: &Pdu,
    content: &Member,
    auth_state: &AuthState<'_>,
    room_version: &RoomVersionBehavior,
) -> AuthDecision {
    let target = match &event.state_key {
        Some(k) => k.as_str(),
        None => return AuthDecision::reject("membership", "member event has no state_key"),
    };
    let target_id = match std::convert::TryFrom::try_from(target) {
        Ok(id) => id,
        Err(_) => return AuthDecision::reject("membership", "state_key is not a valid Matrix ID"),
    };
    let target_membership = membership_of(auth_state, target);
    let levels = EffectivePowerLevels::from_auth_state(auth_state);
    let sender_level = levels.user_level(&event.sender);
    let target_level = levels.user_level(&target_id);

    match content.membership {
        Membership::Join => {
            if target != event.sender.as_str() {
                return AuthDecision::reject("membership", "sender may only set their own membership to join");
            }
            // The room's very first join: no member or join_rules state
            // exists yet, so none of the ordinary conditions below could
            // ever hold. Without this, a freshly created room could never
            // be joined by its own creator (see DESIGN.md).
            if target_membership.is_none()
                && auth_state.get(&("m.room.join_rules".to_owned(), String::new())).is_none()
            {
                if let Some(create) = create_of(auth_state) {
                    let creator_is_target = create.creator.as_ref().map(|c| c.as_str()) == Some(target)
                        || create_event_sender(auth_state).map(|s| s.as_str()) == Some(target);
                    if creator_is_target {
                        return AuthDecision::allow("membership", "creator's own join into a brand new room");
                    }
                }
            }
            if matches!(target_membership, Some(Membership::Join) | Some(Membership::Invite)) {
                return AuthDecision::allow("membership", "already joined or invited");
            }
            let join_rule = join_rule_of(auth_state);
            if join_rule == Some(JoinRule::Public) {
                return AuthDecision::allow("membership", "room is publicly joinable");
            }
            let restricted_ok = matches!(join_rule, Some(JoinRule::Restricted))
                && room_version.restricted_join_allowed
                || matches!(join_rule, Some(JoinRule::KnockRestricted)) && room_version.knock_restricted_allowed;
            if restricted_ok {
                return match &content.join_authorised_via_users_server {
                    Some(authoriser) => {
                        let authoriser_membership = membership_of(auth_state, authoriser.as_str());
                        let authoriser_level = levels.user_level(authoriser);
                        if authoriser_membership == Some(Membership::Join) && authoriser_level >= levels.invite {
                            AuthDecision::allow("membership", "restricted join authorised by a joined user")
                        } else {
                            AuthDecision::reject("membership", "join_authorised_via_users_server is not joined or lacks invite power")
                        }
                    }
                    None => AuthDecision::reject("membership", "restricted join is missing join_authorised_via_users_server"),
                };
            }
            AuthDecision::reject("membership", "join_rule does not permit this join")
        }
        Membership::Invite => {
            let sender_membership = membership_of(auth_state, event.sender.as_str());
            if sender_membership != Some(Membership::Join) {
                return AuthDecision::reject("membership", "inviting sender is not joined");
            }
            if matches!(target_membership, Some(Membership::Join) | Some(Membership::Ban)) {
                return AuthDecision::reject("membership", "invite target is already joined or banned");
            }
            if sender_level >= levels.invite {
                AuthDecision::allow("membership", "sender power meets invite level")
            } else {
                AuthDecision::reject("membership", "sender power below invite level")
            }
        }
        Membership::Leave if target == event.sender.as_str() => {
            let allowed = matches!(target_membership, Some(Membership::Join) | Some(Membership::Invite))
                || (room_version.knock_allowed && target_membership == Some(Membership::Knock));
            if allowed {
                AuthDecision::allow("membership", "self-leave from a joinable state")
            } else {
                AuthDecision::reject("membership", "not currently joined, invited, or knocking")
            }
        }
        Membership::Leave => {
            let sender_membership = membership_of(auth_state, event.sender.as_str());
            if sender_membership != Some(Membership::Join) {
                return AuthDecision::reject("membership", "kicking sender is not joined");
            }
            let required = if target_membership == Some(Membership::Ban) { levels.ban } else { levels.kick };
            if sender_level >= required && sender_level > target_level {
                AuthDecision::allow("membership", "sender power sufficient to remove target")
            } else {
                AuthDecision::reject("membership", "sender power insufficient to remove target")
            }
        }
        Membership::Ban => {
            let sender_membership = membership_of(auth_state, event.sender.as_str());
            if sender_membership != Some(Membership::Join) {
                return AuthDecision::reject("membership", "banning sender is not joined");
            }
            if sender_level >= levels.ban && sender_level > target_level {
                AuthDecision::allow("membership", "sender power sufficient to ban target")
            } else {
                AuthDecision::reject("membership", "sender power insufficient to ban target")
            }
        }
        Membership::Knock => {
            if !room_version.knock_allowed {
                return AuthDecision::reject("membership", "room version does not support knocking");
            }
            if target != event.sender.as_str() {
                return AuthDecision::reject("membership", "sender may only knock on their own behalf");
            }
            let join_rule = join_rule_of(auth_state);
            if !matches!(join_rule, Some(JoinRule::Knock) | Some(JoinRule::KnockRestricted)) {
                return AuthDecision::reject("membership", "join_rule does not permit knocking");
            }
            if matches!(target_membership, Some(Membership::Ban) | Some(Membership::Join)) {
                return AuthDecision::reject("membership", "sender is banned or already joined");
            }
            AuthDecision::allow("membership", "well-formed knock")
        }
    }
}

fn authorize_power_levels(
    event: &Pdu,
    new_levels: &PowerLevels,
    auth_state: &AuthState<'_>,
    old_levels: &EffectivePowerLevels,
    sender_level: f64,
    room_version: &RoomVersionBehavior,
) -> AuthDecision {
    if room_version.integer_power_levels && !power_levels_are_all_integers(new_levels) {
        return AuthDecision::reject("power-level-escalation", "integer power levels required but a field is fractional");
    }

    if auth_state.get(&("m.room.power_levels".to_owned(), String::new())).is_none() {
        return AuthDecision::allow("power-level-escalation", "no existing power_levels event to escalate from");
    }

    let scalar_checks: &[(Option<&serde_json::Number>, Option<&serde_json::Number>, f64)] = &[
        (old_levels.raw_ban.as_ref(), new_levels.ban.as_ref(), 50.0),
        (old_levels.raw_invite.as_ref(), new_levels.invite.as_ref(), 0.0),
        (old_levels.raw_kick.as_ref(), new_levels.kick.as_ref(), 50.0),
        (old_levels.raw_redact.as_ref(), new_levels.redact.as_ref(), 50.0),
        (old_levels.raw_events_default.as_ref(), new_levels.events_default.as_ref(), 0.0),
        (old_levels.raw_state_default.as_ref(), new_levels.state_default.as_ref(), 50.0),
        (old_levels.raw_users_default.as_ref(), new_levels.users_default.as_ref(), 0.0),
    ];
    for (old, new, default) in scalar_checks {
        let old_v = old.and_then(|n| n.as_f64()).unwrap_or(*default);
        let new_v = new.and_then(|n| n.as_f64()).unwrap_or(*default);
        if old_v != new_v && !check_scalar(old_v, new_v, sender_level) {
            return AuthDecision::reject("power-level-escalation", "scalar level change exceeds sender power");
        }
    }

    if !check_generic_map(&old_levels.events, &map_f64(&new_levels.events), sender_level, 0.0) {
        return AuthDecision::reject("power-level-escalation", "events level change exceeds sender power");
    }
    if !check_generic_map(&old_levels.notifications, &map_f64(&new_levels.notifications), sender_level, 50.0) {
        return AuthDecision::reject("power-level-escalation", "notifications level change exceeds sender power");
    }
    if !check_user_map(&old_levels.users, &new_levels.users, &event.sender, sender_level, 0.0) {
        return AuthDecision::reject("power-level-escalation", "users level change exceeds sender power");
    }

    AuthDecision::allow("power-level-escalation", "no field escalates beyond sender power")
}

fn check_scalar(old: f64, new: f64, sender_level: f64) -> bool {
    if new > sender_level {
        return false;
    }
    if old > sender_level {
        return false;
    }
    true
}

fn check_generic_map(old: &HashMap<String, f64>, new: &HashMap<String, f64>, sender_level: f64, default: f64) -> bool {
    let keys = old.keys().chain(new.keys()).cloned().collect::<std::collections::HashSet<_>>();
    for key in keys {
        let old_v = old.get(&key).copied().unwrap_or(default);
        let new_v = new.get(&key).copied().unwrap_or(default);
        if old_v == new_v {
            continue;
        }
        if new_v > sender_level || old_v > sender_level {
            return false;
        }
    }
    true
}

fn check_user_map(
    old: &HashMap<MatrixId, serde_json::Number>,
    new: &HashMap<MatrixId, serde_json::Number>,
    sender: &MatrixId,
    sender_level: f64,
    default: f64,
) -> bool {
    let keys = old.keys().chain(new.keys()).cloned().collect::<std::collections::HashSet<_>>();
    for key in keys {
        let old_v = old.get(&key).and_then(|n| n.as_f64()).unwrap_or(default);
        let new_v = new.get(&key).and_then(|n| n.as_f64()).unwrap_or(default);
        if old_v == new_v {
            continue;
        }
        if new_v > sender_level || old_v > sender_level {
            return false;
        }
        if &key != sender && !(old_v < sender_level) {
            return false;
        }
    }
    true
}

fn map_f64(map: &HashMap<String, serde_json::Number>) -> HashMap<String, f64> {
    map.iter().map(|(k, v)| (k.clone(), v.as_f64().unwrap_or(0.0))).collect()
}

fn power_levels_are_all_integers(levels: &PowerLevels) -> bool {
    let scalars = [&levels.ban, &levels.events_default, &levels.invite, &levels.kick, &levels.redact, &levels.state_default, &levels.users_default];
    scalars.iter().all(|n| n.as_ref().map(is_integer).unwrap_or(true))
        && levels.events.values().all(is_integer)
        && levels.users.values().all(is_integer)
        && levels.notifications.values().all(is_integer)
}

fn is_integer(n: &serde_json::Number) -> bool {
    n.is_i64() || n.is_u64() || n.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false)
}

fn membership_of(auth_state: &AuthState<'_>, user: &str) -> Option<Membership> {
    let pdu = auth_state.get(&("m.room.member".to_owned(), user.to_owned()))?;
    match pdu.event_content() {
        EventContent::Member(m) => Some(m.membership),
        _ => None,
    }
}

fn join_rule_of(auth_state: &AuthState<'_>) -> Option<JoinRule> {
    let pdu = auth_state.get(&("m.room.join_rules".to_owned(), String::new()))?;
    match pdu.event_content() {
        EventContent::JoinRules(JoinRules { join_rule, .. }) => Some(join_rule),
        _ => None,
    }
}

fn create_of(auth_state: &AuthState<'_>) -> Option<Create> {
    let pdu = auth_state.get(&("m.room.create".to_owned(), String::new()))?;
    match pdu.event_content() {
        EventContent::Create(c) => Some(c),
        _ => None,
    }
}

fn create_event_sender(auth_state: &AuthState<'_>) -> Option<MatrixId> {
    auth_state.get(&("m.room.create".to_owned(), String::new())).map(|pdu| pdu.sender.clone())
}

/// `m.room.power_levels` resolved against the §4.4 defaults and, absent a
/// power-levels event entirely, the creator-has-100 rule.
struct EffectivePowerLevels {
    ban: f64,
    kick: f64,
    redact: f64,
    invite: f64,
    events_default: f64,
    state_default: f64,
    users_default: f64,
    events: HashMap<String, f64>,
    notifications: HashMap<String, f64>,
    users: HashMap<MatrixId, serde_json::Number>,
    has_power_levels_event: bool,
    creator: Option<MatrixId>,
    raw_ban: Option<serde_json::Number>,
    raw_invite: Option<serde_json::Number>,
    raw_kick: Option<serde_json::Number>,
    raw_redact: Option<serde_json::Number>,
    raw_events_default: Option<serde_json::Number>,
    raw_state_default: Option<serde_json::Number>,
    raw_users_default: Option<serde_json::Number>,
}

impl EffectivePowerLevels {
    fn from_auth_state(auth_state: &AuthState<'_>) -> Self {
        let create = create_of(auth_state);
        let creator = create
            .as_ref()
            .and_then(|c| c.creator.clone())
            .or_else(|| create_event_sender(auth_state));

        let power_levels = auth_state
            .get(&("m.room.power_levels".to_owned(), String::new()))
            .and_then(|pdu| match pdu.event_content() {
                EventContent::PowerLevels(p) => Some(p),
                _ => None,
            });

        let pl = power_levels.unwrap_or_default();
        EffectivePowerLevels {
            ban: pl.ban.as_ref().and_then(|n| n.as_f64()).unwrap_or(50.0),
            kick: pl.kick.as_ref().and_then(|n| n.as_f64()).unwrap_or(50.0),
            redact: pl.redact.as_ref().and_then(|n| n.as_f64()).unwrap_or(50.0),
            invite: pl.invite.as_ref().and_then(|n| n.as_f64()).unwrap_or(0.0),
            events_default: pl.events_default.as_ref().and_then(|n| n.as_f64()).unwrap_or(0.0),
            state_default: pl.state_default.as_ref().and_then(|n| n.as_f64()).unwrap_or(50.0),
            users_default: pl.users_default.as_ref().and_then(|n| n.as_f64()).unwrap_or(0.0),
            events: map_f64(&pl.events),
            notifications: map_f64(&pl.notifications),
            users: pl.users.clone(),
            has_power_levels_event: auth_state.contains_key(&("m.room.power_levels".to_owned(), String::new())),
            creator,
            raw_ban: pl.ban.clone(),
            raw_invite: pl.invite.clone(),
            raw_kick: pl.kick.clone(),
            raw_redact: pl.redact.clone(),
            raw_events_default: pl.events_default.clone(),
            raw_state_default: pl.state_default.clone(),
            raw_users_default: pl.users_default.clone(),
        }
    }

    fn user_level(&self, user: &MatrixId) -> f64 {
        if let Some(level) = self.users.get(user).and_then(|n| n.as_f64()) {
            return level;
        }
        if !self.has_power_levels_event {
            return if self.creator.as_ref() == Some(user) { 100.0 } else { 0.0 };
        }
        self.users_default
    }

    fn event_level(&self, event_type: &str, is_state: bool) -> f64 {
        if let Some(level) = self.events.get(event_type) {
            return *level;
        }
        if is_state {
            self.state_default
        } else {
            self.events_default
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::TryFrom;

    use serde_json::{json, Number};

    use super::*;
    use crate::room_version;

    fn pdu(event_type: &str, sender: &str, state_key: Option<&str>, content: serde_json::Value) -> Pdu {
        Pdu {
            embedded_event_id: None,
            room_id: "!room:example.org".to_owned(),
            sender: MatrixId::try_from(sender.to_owned()).unwrap(),
            event_type: event_type.to_owned(),
            state_key: state_key.map(String::from),
            content,
            origin_server_ts: 0,
            depth: 0,
            prev_events: vec![],
            auth_events: vec![],
            redacts: None,
            unsigned: None,
            hashes: Default::default(),
            signatures: Default::default(),
        }
    }

    fn creator_joins_room() -> (Pdu, Pdu) {
        let create = pdu(
            "m.room.create",
            "@alice:example.org",
            Some(""),
            json!({"creator": "@alice:example.org"}),
        );
        let join = pdu(
            "m.room.member",
            "@alice:example.org",
            Some("@alice:example.org"),
            json!({"membership": "join"}),
        );
        (create, join)
    }

    #[test]
    fn create_event_with_prev_events_is_rejected() {
        let mut create = pdu("m.room.create", "@alice:example.org", Some(""), json!({"creator": "@alice:example.org"}));
        create.prev_events = vec!["$x".to_owned()];
        let decision = authorize(&create, &AuthState::new(), room_version::lookup("4").unwrap(), false);
        assert!(!decision.allowed);
        assert_eq!(decision.rule, "create");
    }

    #[test]
    fn creator_can_join_freshly_created_room() {
        let (create, join) = creator_joins_room();
        let mut auth_state = AuthState::new();
        auth_state.insert(("m.room.create".to_owned(), String::new()), &create);
        let decision = authorize(&join, &auth_state, room_version::lookup("4").unwrap(), false);
        assert!(decision.allowed, "{:?}", decision);
    }

    #[test]
    fn stranger_cannot_join_private_room() {
        let (create, _) = creator_joins_room();
        let join_rules = pdu("m.room.join_rules", "@alice:example.org", Some(""), json!({"join_rule": "invite"}));
        let mut auth_state = AuthState::new();
        auth_state.insert(("m.room.create".to_owned(), String::new()), &create);
        auth_state.insert(("m.room.join_rules".to_owned(), String::new()), &join_rules);
        let stranger_join = pdu("m.room.member", "@mallory:example.org", Some("@mallory:example.org"), json!({"membership": "join"}));
        let decision = authorize(&stranger_join, &auth_state, room_version::lookup("4").unwrap(), false);
        assert!(!decision.allowed);
    }

    #[test]
    fn anyone_can_join_public_room() {
        let (create, _) = creator_joins_room();
        let join_rules = pdu("m.room.join_rules", "@alice:example.org", Some(""), json!({"join_rule": "public"}));
        let mut auth_state = AuthState::new();
        auth_state.insert(("m.room.create".to_owned(), String::new()), &create);
        auth_state.insert(("m.room.join_rules".to_owned(), String::new()), &join_rules);
        let stranger_join = pdu("m.room.member", "@mallory:example.org", Some("@mallory:example.org"), json!({"membership": "join"}));
        let decision = authorize(&stranger_join, &auth_state, room_version::lookup("4").unwrap(), false);
        assert!(decision.allowed);
    }

    #[test]
    fn restricted_join_requires_authoriser_joined_with_invite_power() {
        let (create, _) = creator_joins_room();
        let join_rules = pdu("m.room.join_rules", "@alice:example.org", Some(""), json!({"join_rule": "restricted"}));
        let alice_member = pdu("m.room.member", "@alice:example.org", Some("@alice:example.org"), json!({"membership": "join"}));
        let mut auth_state = AuthState::new();
        auth_state.insert(("m.room.create".to_owned(), String::new()), &create);
        auth_state.insert(("m.room.join_rules".to_owned(), String::new()), &join_rules);
        auth_state.insert(("m.room.member".to_owned(), "@alice:example.org".to_owned()), &alice_member);

        let carol_join = pdu(
            "m.room.member",
            "@carol:example.org",
            Some("@carol:example.org"),
            json!({"membership": "join", "join_authorised_via_users_server": "@alice:example.org"}),
        );
        let decision = authorize(&carol_join, &auth_state, room_version::lookup("10").unwrap(), false);
        assert!(decision.allowed, "{:?}", decision);
    }

    #[test]
    fn invite_requires_inviter_joined_and_powerful_enough() {
        let (create, _) = creator_joins_room();
        let mut auth_state = AuthState::new();
        auth_state.insert(("m.room.create".to_owned(), String::new()), &create);
        let invite = pdu("m.room.member", "@alice:example.org", Some("@carol:example.org"), json!({"membership": "invite"}));
        let decision = authorize(&invite, &auth_state, room_version::lookup("4").unwrap(), false);
        assert!(!decision.allowed, "alice hasn't joined yet in this auth_state slice");
    }

    #[test]
    fn sender_must_be_joined_to_send_message() {
        let (create, _) = creator_joins_room();
        let mut auth_state = AuthState::new();
        auth_state.insert(("m.room.create".to_owned(), String::new()), &create);
        let message = pdu("m.room.message", "@alice:example.org", None, json!({"body": "hi"}));
        let decision = authorize(&message, &auth_state, room_version::lookup("4").unwrap(), false);
        assert!(!decision.allowed);
        assert_eq!(decision.rule, "sender-must-be-joined");
    }

    #[test]
    fn message_allowed_once_sender_has_joined() {
        let (create, join) = creator_joins_room();
        let mut auth_state = AuthState::new();
        auth_state.insert(("m.room.create".to_owned(), String::new()), &create);
        auth_state.insert(("m.room.member".to_owned(), "@alice:example.org".to_owned()), &join);
        let message = pdu("m.room.message", "@alice:example.org", None, json!({"body": "hi"}));
        let decision = authorize(&message, &auth_state, room_version::lookup("4").unwrap(), false);
        assert!(decision.allowed);
    }

    #[test]
    fn power_level_escalation_beyond_sender_power_rejected() {
        let (create, join) = creator_joins_room();
        let power_levels = pdu(
            "m.room.power_levels",
            "@alice:example.org",
            Some(""),
            json!({"users": {"@alice:example.org": 100}}),
        );
        let mut auth_state = AuthState::new();
        auth_state.insert(("m.room.create".to_owned(), String::new()), &create);
        auth_state.insert(("m.room.member".to_owned(), "@alice:example.org".to_owned()), &join);
        auth_state.insert(("m.room.power_levels".to_owned(), String::new()), &power_levels);

        let escalate = pdu(
            "m.room.power_levels",
            "@alice:example.org",
            Some(""),
            json!({"users": {"@alice:example.org": 100, "@mallory:example.org": 101}}),
        );
        let decision = authorize(&escalate, &auth_state, room_version::lookup("4").unwrap(), false);
        assert!(!decision.allowed);
        assert_eq!(decision.rule, "power-level-escalation");
    }

    #[test]
    fn v10_rejects_fractional_power_levels() {
        let (create, join) = creator_joins_room();
        let power_levels = pdu("m.room.power_levels", "@alice:example.org", Some(""), json!({"users": {"@alice:example.org": 100}}));
        let mut auth_state = AuthState::new();
        auth_state.insert(("m.room.create".to_owned(), String::new()), &create);
        auth_state.insert(("m.room.member".to_owned(), "@alice:example.org".to_owned()), &join);
        auth_state.insert(("m.room.power_levels".to_owned(), String::new()), &power_levels);

        let fractional = pdu("m.room.power_levels", "@alice:example.org", Some(""), json!({"ban": 50.5}));
        let decision = authorize(&fractional, &auth_state, room_version::lookup("10").unwrap(), false);
        assert!(!decision.allowed);
    }

    #[test]
    fn redaction_requires_redact_power() {
        let (create, join) = creator_joins_room();
        let mut auth_state = AuthState::new();
        auth_state.insert(("m.room.create".to_owned(), String::new()), &create);
        auth_state.insert(("m.room.member".to_owned(), "@alice:example.org".to_owned()), &join);
        let redaction = pdu("m.room.redaction", "@alice:example.org", None, json!({}));
        let decision = authorize(&redaction, &auth_state, room_version::lookup("4").unwrap(), false);
        assert!(decision.allowed);
    }

    #[test]
    fn redacting_own_event_is_exempt_from_redact_power() {
        let (create, alice_join) = creator_joins_room();
        let bob_join =
            pdu("m.room.member", "@bob:example.org", Some("@bob:example.org"), json!({"membership": "join"}));
        let mut auth_state = AuthState::new();
        auth_state.insert(("m.room.create".to_owned(), String::new()), &create);
        auth_state.insert(("m.room.member".to_owned(), "@alice:example.org".to_owned()), &alice_join);
        auth_state.insert(("m.room.member".to_owned(), "@bob:example.org".to_owned()), &bob_join);

        let redaction = pdu("m.room.redaction", "@bob:example.org", None, json!({}));
        let room_version = room_version::lookup("4").unwrap();
        let rejected = authorize(&redaction, &auth_state, room_version, false);
        assert!(!rejected.allowed, "bob has no power_levels entry and defaults to 0, below redact=50");

        let allowed = authorize(&redaction, &auth_state, room_version, true);
        assert!(allowed.allowed, "redacting bob's own event is exempt from the power check");
    }

    #[test]
    fn knock_rejected_pre_v7() {
        let (create, _) = creator_joins_room();
        let join_rules = pdu("m.room.join_rules", "@alice:example.org", Some(""), json!({"join_rule": "knock"}));
        let mut auth_state = AuthState::new();
        auth_state.insert(("m.room.create".to_owned(), String::new()), &create);
        auth_state.insert(("m.room.join_rules".to_owned(), String::new()), &join_rules);
        let knock = pdu("m.room.member", "@carol:example.org", Some("@carol:example.org"), json!({"membership": "knock"}));
        let decision = authorize(&knock, &auth_state, room_version::lookup("6").unwrap(), false);
        assert!(!decision.allowed);
    }

    #[test]
    fn knock_allowed_v7_plus() {
        let (create, _) = creator_joins_room();
        let join_rules = pdu("m.room.join_rules", "@alice:example.org", Some(""), json!({"join_rule": "knock"}));
        let mut auth_state = AuthState::new();
        auth_state.insert(("m.room.create".to_owned(), String::new()), &create);
        auth_state.insert(("m.room.join_rules".to_owned(), String::new()), &join_rules);
        let knock = pdu("m.room.member", "@carol:example.org", Some("@carol:example.org"), json!({"membership": "knock"}));
        let decision = authorize(&knock, &auth_state, room_version::lookup("7").unwrap(), false);
        assert!(decision.allowed);
    }

    #[test]
    fn ban_requires_strictly_greater_power() {
        let (create, join) = creator_joins_room();
        let power_levels = pdu(
            "m.room.power_levels",
            "@alice:example.org",
            Some(""),
            json!({"users": {"@alice:example.org": 50, "@carol:example.org": 50}}),
        );
        let mut auth_state = AuthState::new();
        auth_state.insert(("m.room.create".to_owned(), String::new()), &create);
        auth_state.insert(("m.room.member".to_owned(), "@alice:example.org".to_owned()), &join);
        auth_state.insert(("m.room.power_levels".to_owned(), String::new()), &power_levels);
        let ban = pdu("m.room.member", "@alice:example.org", Some("@carol:example.org"), json!({"membership": "ban"}));
        let decision = authorize(&ban, &auth_state, room_version::lookup("4").unwrap(), false);
        assert!(!decision.allowed, "equal power may not ban");
    }

    #[test]
    fn effective_power_levels_number_helper_is_exercised() {
        assert!(super::is_integer(&Number::from(5)));
        assert!(!super::is_integer(&Number::from_f64(5.5).unwrap()));
    }
}
