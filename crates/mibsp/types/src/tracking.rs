//! Public complaint tracking identifiers.
//!
//! Format: the fixed prefix `MIB` followed by eight characters drawn from
//! `A-Z0-9`, eleven characters in total, e.g. `MIB3A9F2K1Q`. The identifier
//! carries no information about the citizen who filed the complaint.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EntryError, EntryResult};

pub const TRACKING_ID_PREFIX: &str = "MIB";
pub const TRACKING_ID_SUFFIX_LEN: usize = 8;
pub const TRACKING_ID_LEN: usize = TRACKING_ID_PREFIX.len() + TRACKING_ID_SUFFIX_LEN;
pub const TRACKING_ID_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Check that `candidate` is a well-formed tracking id.
///
/// Pure and total. Near misses (lowercase, surrounding whitespace, wrong
/// length) are rejected rather than normalized.
pub fn validate(candidate: &str) -> bool {
    let bytes = candidate.as_bytes();
    bytes.len() == TRACKING_ID_LEN
        && candidate.starts_with(TRACKING_ID_PREFIX)
        && bytes[TRACKING_ID_PREFIX.len()..]
            .iter()
            .all(|b| TRACKING_ID_ALPHABET.contains(b))
}

/// A validated tracking identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TrackingId(String);

impl TrackingId {
    pub fn parse(candidate: &str) -> EntryResult<Self> {
        if validate(candidate) {
            Ok(Self(candidate.to_string()))
        } else {
            Err(EntryError::InvalidTrackingId(candidate.to_string()))
        }
    }

    /// Assemble an id from a suffix already drawn from the alphabet.
    pub fn from_suffix(suffix: &[u8; TRACKING_ID_SUFFIX_LEN]) -> EntryResult<Self> {
        let mut raw = String::with_capacity(TRACKING_ID_LEN);
        raw.push_str(TRACKING_ID_PREFIX);
        for &b in suffix {
            raw.push(char::from(b));
        }
        Self::parse(&raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn suffix(&self) -> &str {
        &self.0[TRACKING_ID_PREFIX.len()..]
    }
}

impl fmt::Display for TrackingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TrackingId {
    type Err = EntryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TrackingId {
    type Error = EntryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if validate(&value) {
            Ok(Self(value))
        } else {
            Err(EntryError::InvalidTrackingId(value))
        }
    }
}

impl From<TrackingId> for String {
    fn from(id: TrackingId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn accepts_well_formed_ids() {
        assert!(validate("MIBA1B2C3D4"));
        assert!(validate("MIB00000000"));
        assert!(validate("MIBZZZZZZZZ"));
    }

    #[test]
    fn rejects_near_misses() {
        assert!(!validate(""));
        assert!(!validate("MIB"));
        assert!(!validate("MIBA1B2C3D"));
        assert!(!validate("MIBA1B2C3D4E"));
        assert!(!validate("mibA1B2C3D4"));
        assert!(!validate("MIBa1b2c3d4"));
        assert!(!validate("MIXA1B2C3D4"));
        assert!(!validate(" MIBA1B2C3D"));
        assert!(!validate("MIBA1B2C3D "));
        assert!(!validate("MIBA1B2-3D4"));
        assert!(validate("MIB093015XY"));
    }

    #[test]
    fn rejects_multibyte_lookalikes() {
        // Cyrillic 'А' (2 bytes) keeps the char count at 11 but not the bytes.
        assert!(!validate("MIBА1B2C3D4"));
        assert!(!validate("MIBÄ1B2C3D"));
    }

    #[test]
    fn serde_validates_on_the_way_in() {
        let id: TrackingId = serde_json::from_str("\"MIBA1B2C3D4\"").unwrap();
        assert_eq!(id.suffix(), "A1B2C3D4");
        assert!(serde_json::from_str::<TrackingId>("\"mibA1B2C3D4\"").is_err());
    }

    #[test]
    fn from_suffix_rejects_foreign_bytes() {
        assert!(TrackingId::from_suffix(b"A1B2C3D4").is_ok());
        assert!(TrackingId::from_suffix(b"a1b2c3d4").is_err());
    }

    proptest! {
        #[test]
        fn validate_is_pure(candidate in ".{0,16}") {
            prop_assert_eq!(validate(&candidate), validate(&candidate));
        }

        #[test]
        fn alphabet_suffixes_always_validate(suffix in "[A-Z0-9]{8}") {
            let id = format!("{TRACKING_ID_PREFIX}{suffix}");
            prop_assert!(validate(&id));
            let parsed = TrackingId::parse(&id).unwrap();
            prop_assert_eq!(parsed.as_str(), id.as_str());
        }

        #[test]
        fn lowercase_suffixes_never_validate(suffix in "[a-z]{8}") {
            let id = format!("{TRACKING_ID_PREFIX}{suffix}");
            prop_assert!(!validate(&id));
        }
    }
}
