//! State resolution (component C6): given several state sets inherited from
//! different DAG branches, produce one resolved state.
//!
//! Grounded in the teacher's `state::StateResolver` (`auth_chains`,
//! `auth_difference`, `reverse_topological_power_ordering`,
//! `iterative_auth_checks`, `mainline_cmp`, `is_power_event`), restructured
//! from a method set closed over a live `Storage` handle and a mutable
//! `State` into free functions driven by the [`PduStore`] trait and
//! dispatching on [`RoomVersionBehavior::state_resolution`] the way the
//! room-version registry (C3) intends every version-sensitive component to.

use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
};

use tracing::{instrument, Level};

use crate::{
    auth::{self, AuthState},
    error::{Error, ErrorKind},
    events::pdu::Pdu,
    room_version::{RoomVersionBehavior, StateResolution},
    storage::PduStore,
    util::MatrixId,
};

/// A resolved (or candidate) room state: one event ID per `(type,
/// state_key)` slot (§3 "Room state").
pub type StateMap = HashMap<(String, String), String>;

/// The outcome of resolving several state sets into one.
#[derive(Debug, Clone, Default)]
pub struct ResolutionResult {
    pub state: StateMap,
    /// Conflicting events that state resolution itself rejected (v2 only;
    /// always empty for v1, which never runs the auth rules).
    pub rejected: Vec<String>,
}

const AUTH_EVENT_TYPES: &[&str] =
    &["m.room.create", "m.room.power_levels", "m.room.join_rules", "m.room.member", "m.room.third_party_invite"];

/// Resolves `state_sets` per `room_version`'s algorithm (§4.5 / §4.6).
#[instrument(skip(store, state_sets), fields(room_id = %room_id, state_sets = state_sets.len()), err = Level::DEBUG)]
pub async fn resolve(
    store: &dyn PduStore,
    room_id: &str,
    room_version: &RoomVersionBehavior,
    state_sets: &[StateMap],
) -> Result<ResolutionResult, Error> {
    match room_version.state_resolution {
        StateResolution::V1 => resolve_v1(store, room_id, state_sets).await,
        StateResolution::V2 => resolve_v2(store, room_id, room_version, state_sets).await,
    }
}

/// Partitions the union of `state_sets` into the slots every set agrees on
/// and the slots that conflict (more than one candidate event ID).
fn partition(state_sets: &[StateMap]) -> (StateMap, HashMap<(String, String), HashSet<String>>) {
    let mut agreement: HashMap<(String, String), HashSet<String>> = HashMap::new();
    for set in state_sets {
        for (key, event_id) in set {
            agreement.entry(key.clone()).or_default().insert(event_id.clone());
        }
    }
    let mut unconflicted = StateMap::new();
    let mut conflicted = HashMap::new();
    for (key, ids) in agreement {
        if ids.len() == 1 {
            unconflicted.insert(key, ids.into_iter().next().unwrap());
        } else {
            conflicted.insert(key, ids);
        }
    }
    (unconflicted, conflicted)
}

/// §4.5: for each conflicting slot, the event with the greatest depth wins;
/// ties break on event ID ascending. No auth rules are consulted.
async fn resolve_v1(store: &dyn PduStore, room_id: &str, state_sets: &[StateMap]) -> Result<ResolutionResult, Error> {
    let (mut result, conflicted) = partition(state_sets);
    for (key, ids) in conflicted {
        let mut candidates = Vec::with_capacity(ids.len());
        for id in ids {
            let pdu = fetch(store, room_id, &id).await?;
            candidates.push((pdu.depth, id));
        }
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        result.insert(key, candidates.into_iter().next().unwrap().1);
    }
    Ok(ResolutionResult { state: result, rejected: vec![] })
}

/// §4.6: conflicted state splits into power-relevant events, which are
/// ordered and auth-checked first, and everything else, which is ordered
/// along the power-level mainline and auth-checked against the state the
/// first pass produced.
async fn resolve_v2(
    store: &dyn PduStore,
    room_id: &str,
    room_version: &RoomVersionBehavior,
    state_sets: &[StateMap],
) -> Result<ResolutionResult, Error> {
    let (unconflicted, conflicted) = partition(state_sets);

    let mut conflicted_ids: HashSet<String> = conflicted.values().flatten().cloned().collect();
    let mut auth_chain_extra = HashSet::new();
    for id in &conflicted_ids {
        auth_chain_extra.extend(auth_chain(store, room_id, id).await?);
    }
    conflicted_ids.extend(auth_chain_extra);

    let mut conflicted_auth: HashMap<String, Pdu> = HashMap::new();
    let mut conflicted_other: HashMap<String, Pdu> = HashMap::new();
    for id in conflicted_ids {
        let pdu = fetch(store, room_id, &id).await?;
        if AUTH_EVENT_TYPES.contains(&pdu.event_type.as_str()) {
            conflicted_auth.insert(id, pdu);
        } else {
            conflicted_other.insert(id, pdu);
        }
    }

    let mut rejected = Vec::new();
    let mut state = unconflicted;

    let power_order = reverse_topological_power_ordering(store, room_id, &conflicted_auth).await?;
    for event_id in power_order {
        let pdu = &conflicted_auth[&event_id];
        if apply_if_authorized(store, room_id, &mut state, &event_id, pdu, room_version).await? {
            // applied
        } else {
            rejected.push(event_id);
        }
    }

    let power_levels_id = state.get(&("m.room.power_levels".to_owned(), String::new())).cloned();
    let mainline = match &power_levels_id {
        Some(id) => build_mainline(store, room_id, id).await?,
        None => vec![],
    };
    let mut other_order: Vec<(String, usize)> = Vec::with_capacity(conflicted_other.len());
    for (id, pdu) in &conflicted_other {
        let index = closest_mainline_index(store, room_id, &mainline, pdu).await?;
        other_order.push((id.clone(), index));
    }
    other_order.sort_by(|a, b| {
        mainline_cmp(a.1, b.1)
            .then_with(|| conflicted_other[&a.0].origin_server_ts.cmp(&conflicted_other[&b.0].origin_server_ts))
            .then_with(|| a.0.cmp(&b.0))
    });
    for (event_id, _) in other_order {
        let pdu = &conflicted_other[&event_id];
        if !apply_if_authorized(store, room_id, &mut state, &event_id, pdu, room_version).await? {
            rejected.push(event_id);
        }
    }

    Ok(ResolutionResult { state, rejected })
}

async fn fetch(store: &dyn PduStore, room_id: &str, event_id: &str) -> Result<Pdu, Error> {
    store
        .get_pdu(room_id, event_id)
        .await?
        .ok_or_else(|| ErrorKind::InvalidEvent(format!("unknown event {} referenced during state resolution", event_id)).into())
}

/// Every event reachable from `start` by transitively following
/// `auth_events`, not including `start` itself.
async fn auth_chain(store: &dyn PduStore, room_id: &str, start: &str) -> Result<HashSet<String>, Error> {
    let mut seen = HashSet::new();
    let mut stack = vec![start.to_owned()];
    while let Some(id) = stack.pop() {
        if id != start && !seen.insert(id.clone()) {
            continue;
        }
        if let Some(pdu) = store.get_pdu(room_id, &id).await? {
            for auth_id in &pdu.auth_events {
                if !seen.contains(auth_id) {
                    stack.push(auth_id.clone());
                }
            }
        }
    }
    seen.remove(start);
    Ok(seen)
}

/// The sender's power level as of the `m.room.power_levels` (if any)
/// directly named in `pdu`'s own `auth_events` — the power level in force
/// when the event was created, not the partial state being built around it.
async fn sender_power_at(store: &dyn PduStore, room_id: &str, pdu: &Pdu) -> Result<f64, Error> {
    let mut auth_pdus = Vec::new();
    for id in &pdu.auth_events {
        if let Some(auth_pdu) = store.get_pdu(room_id, id).await? {
            auth_pdus.push(auth_pdu);
        }
    }
    let mut auth_state: AuthState<'_> = HashMap::new();
    for auth_pdu in &auth_pdus {
        if let Some(state_key) = &auth_pdu.state_key {
            auth_state.insert((auth_pdu.event_type.clone(), state_key.clone()), auth_pdu);
        }
    }
    Ok(auth::effective_power_level(&auth_state, &pdu.sender))
}

/// Repeatedly peels off the "roots" of the `auth_events` DAG restricted to
/// `events` (nodes nothing remaining points to), sorting each layer by
/// sender power descending, then origin_server_ts ascending, then event ID
/// ascending.
async fn reverse_topological_power_ordering(
    store: &dyn PduStore,
    room_id: &str,
    events: &HashMap<String, Pdu>,
) -> Result<Vec<String>, Error> {
    let mut remaining: HashMap<String, Pdu> = events.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    let mut ordered = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let mut layer: Vec<String> = remaining
            .keys()
            .filter(|id| !remaining.values().any(|pdu| pdu.auth_events.contains(*id)))
            .cloned()
            .collect();

        let mut powers = HashMap::new();
        for id in &layer {
            let power = sender_power_at(store, room_id, &remaining[id]).await?;
            powers.insert(id.clone(), power);
        }
        layer.sort_by(|a, b| {
            powers[b]
                .partial_cmp(&powers[a])
                .unwrap_or(Ordering::Equal)
                .then_with(|| remaining[a].origin_server_ts.cmp(&remaining[b].origin_server_ts))
                .then_with(|| a.cmp(b))
        });

        for id in &layer {
            remaining.remove(id);
        }
        ordered.extend(layer);
    }

    Ok(ordered)
}

/// Builds the power-level mainline starting at `start`: `start`, then each
/// `m.room.power_levels` event reachable by repeatedly following the
/// previous one's own `auth_events` back to an earlier power-levels event.
async fn build_mainline(store: &dyn PduStore, room_id: &str, start: &str) -> Result<Vec<String>, Error> {
    let mut mainline = vec![start.to_owned()];
    let mut current = start.to_owned();
    loop {
        let pdu = match store.get_pdu(room_id, &current).await? {
            Some(pdu) => pdu,
            None => break,
        };
        let mut next = None;
        for auth_id in &pdu.auth_events {
            if let Some(auth_pdu) = store.get_pdu(room_id, auth_id).await? {
                if auth_pdu.event_type == "m.room.power_levels" {
                    next = Some(auth_id.clone());
                    break;
                }
            }
        }
        match next {
            Some(id) => {
                mainline.push(id.clone());
                current = id;
            }
            None => break,
        }
    }
    Ok(mainline)
}

/// Walks `pdu`'s own chain of `m.room.power_levels` ancestors until one
/// appears in `mainline`, returning its index there (or `usize::MAX` if the
/// chain never reaches the mainline).
async fn closest_mainline_index(store: &dyn PduStore, room_id: &str, mainline: &[String], pdu: &Pdu) -> Result<usize, Error> {
    let mut frontier = pdu.auth_events.clone();
    loop {
        let mut next_power_levels = None;
        for auth_id in &frontier {
            if let Some(pos) = mainline.iter().position(|id| id == auth_id) {
                return Ok(pos);
            }
            if next_power_levels.is_none() {
                if let Some(auth_pdu) = store.get_pdu(room_id, auth_id).await? {
                    if auth_pdu.event_type == "m.room.power_levels" {
                        next_power_levels = Some(auth_pdu);
                    }
                }
            }
        }
        match next_power_levels {
            Some(pdu) => frontier = pdu.auth_events.clone(),
            None => return Ok(usize::MAX),
        }
    }
}

/// Mainline position compares backwards (an event whose nearest mainline
/// ancestor is further back in history sorts first); ties are broken by the
/// caller on timestamp, then event ID, both ascending.
fn mainline_cmp(x: usize, y: usize) -> Ordering {
    x.cmp(&y).reverse()
}

/// Runs [`auth::authorize`] against `state` as it stands, and on success
/// inserts the event into `state` under its own `(type, state_key)` slot.
async fn apply_if_authorized(
    store: &dyn PduStore,
    room_id: &str,
    state: &mut StateMap,
    event_id: &str,
    pdu: &Pdu,
    room_version: &RoomVersionBehavior,
) -> Result<bool, Error> {
    let mut auth_pdus = Vec::new();
    for id in state.values() {
        if let Some(auth_pdu) = store.get_pdu(room_id, id).await? {
            auth_pdus.push(auth_pdu);
        }
    }
    let mut auth_state: AuthState<'_> = HashMap::new();
    for auth_pdu in &auth_pdus {
        if let Some(state_key) = &auth_pdu.state_key {
            auth_state.insert((auth_pdu.event_type.clone(), state_key.clone()), auth_pdu);
        }
    }
    let redacts_own_event = match pdu.redacts_target() {
        Some(target_id) => store
            .get_pdu(room_id, &target_id)
            .await?
            .map(|target| target.sender == pdu.sender)
            .unwrap_or(false),
        None => false,
    };
    let decision = auth::authorize(pdu, &auth_state, room_version, redacts_own_event);
    if decision.allowed {
        if let Some(state_key) = &pdu.state_key {
            state.insert((pdu.event_type.clone(), state_key.clone()), event_id.to_owned());
        }
    }
    Ok(decision.allowed)
}
