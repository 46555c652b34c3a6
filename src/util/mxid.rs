use std::{convert::TryFrom, fmt};

use displaydoc::Display;
use serde::{Deserialize, Serialize};

/// A Matrix user ID, `@localpart:server_name`.
///
/// Authorization and state resolution only ever need to compare these for
/// equality, split off the server name, or format them back into JSON, so
/// this stays a thin wrapper around the validated string rather than a full
/// grammar-checked identifier type.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MatrixId(String);

/// A Matrix room ID, `!opaque:server_name`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

#[derive(Debug, Display, PartialEq, Eq, Clone)]
pub enum MxidError {
    /// Matrix ID did not start with the expected sigil `{0}`
    MissingSigil(char),
    /// Matrix ID `{0}` has no `:` separating the localpart from the server name
    MissingColon(String),
    /// Matrix ID `{0}` has an empty localpart
    EmptyLocalpart(String),
    /// Matrix ID `{0}` has an empty server name
    EmptyServerName(String),
}

impl std::error::Error for MxidError {}

impl MatrixId {
    pub fn new(username: &str, domain: &str) -> Self {
        MatrixId(format!("@{}:{}", username, domain))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    fn colon_idx(s: &str) -> Option<usize> {
        s.find(':')
    }

    pub fn localpart(&self) -> &str {
        let colon = Self::colon_idx(&self.0).expect("validated at construction");
        &self.0[1..colon]
    }

    pub fn domain(&self) -> &str {
        let colon = Self::colon_idx(&self.0).expect("validated at construction");
        &self.0[colon + 1..]
    }
}

impl TryFrom<String> for MatrixId {
    type Error = MxidError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        validate(&s, '@')?;
        Ok(MatrixId(s))
    }
}

impl<'a> TryFrom<&'a str> for MatrixId {
    type Error = MxidError;

    fn try_from(s: &'a str) -> Result<Self, Self::Error> {
        MatrixId::try_from(s.to_owned())
    }
}

impl From<MatrixId> for String {
    fn from(id: MatrixId) -> String {
        id.0
    }
}

impl fmt::Display for MatrixId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl RoomId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn domain(&self) -> &str {
        let colon = self.0.find(':').expect("validated at construction");
        &self.0[colon + 1..]
    }
}

impl TryFrom<String> for RoomId {
    type Error = MxidError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        validate(&s, '!')?;
        Ok(RoomId(s))
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> String {
        id.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shared validation for the two sigil-prefixed, colon-delimited identifier
/// shapes (`@user:server`, `!room:server`). Does not enforce the full
/// historical-vs-strict localpart grammar; the core only needs well-formed
/// splitting, and a homeserver's client-facing layer is responsible for
/// rejecting malformed identifiers before they reach here.
fn validate(s: &str, sigil: char) -> Result<(), MxidError> {
    if !s.starts_with(sigil) {
        return Err(MxidError::MissingSigil(sigil));
    }
    let colon = s.find(':').ok_or_else(|| MxidError::MissingColon(s.to_owned()))?;
    if colon == 1 {
        return Err(MxidError::EmptyLocalpart(s.to_owned()));
    }
    if colon + 1 == s.len() {
        return Err(MxidError::EmptyServerName(s.to_owned()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::convert::TryFrom;

    use super::{MatrixId, MxidError, RoomId};

    #[test]
    fn roundtrip() {
        let id = MatrixId::new("alice", "example.org");
        assert_eq!(id.localpart(), "alice");
        assert_eq!(id.domain(), "example.org");
        assert_eq!(id.as_str(), "@alice:example.org");
    }

    #[test]
    fn missing_sigil() {
        assert_eq!(
            MatrixId::try_from("alice:example.org").unwrap_err(),
            MxidError::MissingSigil('@')
        );
    }

    #[test]
    fn missing_colon() {
        assert_eq!(MatrixId::try_from("@alice").unwrap_err(), MxidError::MissingColon("@alice".into()));
    }

    #[test]
    fn empty_localpart() {
        assert_eq!(
            MatrixId::try_from("@:example.org").unwrap_err(),
            MxidError::EmptyLocalpart("@:example.org".into())
        );
    }

    #[test]
    fn room_id_roundtrip() {
        let id = RoomId::try_from("!abc123:example.org".to_owned()).unwrap();
        assert_eq!(id.domain(), "example.org");
    }
}
