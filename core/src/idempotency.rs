//! Idempotency keys.
//!
//! Every reward request carries a globally unique key. A caller-supplied key
//! makes retries of the same logical request collapse onto one record. When
//! the caller supplies none, a key is either derived deterministically from
//! the request's identifying fields (background workflows) or generated at
//! random (interactive one-off requests).

use crate::error::RewardError;
use crate::types::{EventId, UserId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Minimum accepted length for caller-supplied keys.
pub const MIN_KEY_LENGTH: usize = 16;

/// Maximum accepted length for caller-supplied keys.
pub const MAX_KEY_LENGTH: usize = 128;

/// A validated idempotency key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Validate a caller-supplied key.
    ///
    /// Keys must be 16-128 printable ASCII characters without whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`RewardError::Validation`] if the key is out of bounds or
    /// contains disallowed characters.
    pub fn parse(raw: impl Into<String>) -> Result<Self, RewardError> {
        let raw = raw.into();
        if raw.len() < MIN_KEY_LENGTH || raw.len() > MAX_KEY_LENGTH {
            return Err(RewardError::Validation(format!(
                "idempotency key must be {MIN_KEY_LENGTH}-{MAX_KEY_LENGTH} characters (got {})",
                raw.len()
            )));
        }
        if !raw.chars().all(|c| c.is_ascii_graphic()) {
            return Err(RewardError::Validation(
                "idempotency key must be printable ASCII without whitespace".to_string(),
            ));
        }
        Ok(Self(raw))
    }

    /// Wrap a key read back from storage without re-validating it.
    #[must_use]
    pub const fn from_trusted(raw: String) -> Self {
        Self(raw)
    }

    /// A fresh random key for one-off requests.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Derive a key deterministically from the request's identifying fields.
    ///
    /// The digest covers the user, the action name and every field, with
    /// fields ordered by name so callers need not agree on insertion order.
    /// Equal inputs always yield equal keys; changing any input changes the key.
    #[must_use]
    pub fn derive<'a, I>(user_id: &UserId, action: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, String)>,
    {
        let ordered: BTreeMap<&str, String> = fields.into_iter().collect();

        let mut hasher = Sha256::new();
        hasher.update(action.as_bytes());
        hasher.update([0u8]);
        hasher.update(user_id.as_uuid().as_bytes());
        for (name, value) in &ordered {
            hasher.update([0u8]);
            hasher.update(name.as_bytes());
            hasher.update([b'=']);
            hasher.update(value.as_bytes());
        }

        Self(format!("{:x}", hasher.finalize()))
    }

    /// The key a background workflow uses when requesting a reward for an event.
    #[must_use]
    pub fn for_reward_request(user_id: &UserId, event_id: &EventId) -> Self {
        Self::derive(user_id, "reward_request", [("eventId", event_id.to_string())])
    }

    /// Borrow the key string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_enforces_length_bounds() {
        assert!(IdempotencyKey::parse("short").is_err());
        assert!(IdempotencyKey::parse("a".repeat(129)).is_err());
        assert!(IdempotencyKey::parse("a".repeat(16)).is_ok());
        assert!(IdempotencyKey::parse("a".repeat(128)).is_ok());
    }

    #[test]
    fn parse_rejects_whitespace() {
        assert!(IdempotencyKey::parse("abc def ghi jkl mno").is_err());
    }

    #[test]
    fn generated_keys_are_valid_and_distinct() {
        let a = IdempotencyKey::generate();
        let b = IdempotencyKey::generate();
        assert_ne!(a, b);
        assert!(IdempotencyKey::parse(a.as_str()).is_ok());
    }

    #[test]
    fn derived_key_ignores_field_order() {
        let user = UserId::new();
        let a = IdempotencyKey::derive(
            &user,
            "claim",
            [("eventId", "e".to_string()), ("rewardId", "r".to_string())],
        );
        let b = IdempotencyKey::derive(
            &user,
            "claim",
            [("rewardId", "r".to_string()), ("eventId", "e".to_string())],
        );
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    proptest! {
        #[test]
        fn derivation_is_deterministic(a in any::<u128>(), b in any::<u128>()) {
            let user = UserId::from_uuid(uuid::Uuid::from_u128(a));
            let event = EventId::from_uuid(uuid::Uuid::from_u128(b));
            prop_assert_eq!(
                IdempotencyKey::for_reward_request(&user, &event),
                IdempotencyKey::for_reward_request(&user, &event)
            );
        }

        #[test]
        fn different_events_yield_different_keys(a in any::<u128>(), b in any::<u128>(), c in any::<u128>()) {
            prop_assume!(b != c);
            let user = UserId::from_uuid(uuid::Uuid::from_u128(a));
            let first = EventId::from_uuid(uuid::Uuid::from_u128(b));
            let second = EventId::from_uuid(uuid::Uuid::from_u128(c));
            prop_assert_ne!(
                IdempotencyKey::for_reward_request(&user, &first),
                IdempotencyKey::for_reward_request(&user, &second)
            );
        }
    }
}
