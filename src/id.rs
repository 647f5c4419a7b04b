use std::fmt;
use std::sync::Arc;

use rand::Rng;
use serde::de::{Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::config::IdConfig;

/// An opaque identifier, unique within a pipeline run.
///
/// Ids are cheap to clone and compare. They are minted by an [`IdGenerator`]
/// and never change for the lifetime of the entity they identify.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(Arc<str>);

impl Id {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Id(value.into())
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Id(value.into())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.0)
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdVisitor;

        impl Visitor<'_> for IdVisitor {
            type Value = Id;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an identifier string")
            }

            fn visit_str<E: serde::de::Error>(self, value: &str) -> Result<Id, E> {
                Ok(Id::from(value))
            }
        }

        deserializer.deserialize_str(IdVisitor)
    }
}

/// Generates random identifiers from a fixed alphabet.
///
/// Every entity in a run (files, directories, processes, steps, tasks) gets
/// its id from one of these. Generation is safe to call from many tasks at
/// once. Uniqueness is probabilistic; with the default alphabet and length
/// the collision chance is negligible and is not checked.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    alphabet: Box<[char]>,
    length: usize,
}

impl IdGenerator {
    /// Characters an id can be built from, unless overridden.
    pub const DEFAULT_ALPHABET: &'static str =
        "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

    /// Id length used when the configured length is absent or not positive.
    pub const DEFAULT_LENGTH: usize = 16;

    /// Build a generator from configuration.
    ///
    /// Bad values never fail: an empty alphabet or a non-positive length
    /// falls back to the compiled-in default with a warning.
    pub fn new(config: &IdConfig) -> Self {
        let alphabet: Box<[char]> = match config.alphabet.as_deref() {
            Some("") | None => {
                if config.alphabet.is_some() {
                    tracing::warn!("configured id alphabet is empty, using default");
                }
                Self::DEFAULT_ALPHABET.chars().collect()
            }
            Some(custom) => custom.chars().collect(),
        };

        let length = match config.length {
            Some(n) if n > 0 => n as usize,
            Some(n) => {
                tracing::warn!(length = n, "configured id length is not positive, using default");
                Self::DEFAULT_LENGTH
            }
            None => Self::DEFAULT_LENGTH,
        };

        Self { alphabet, length }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Mint a fresh id of exactly `length` characters drawn from the alphabet.
    pub fn generate(&self) -> Id {
        let mut rng = rand::rng();
        let mut out = String::with_capacity(self.length);

        for _ in 0..self.length {
            out.push(self.alphabet[rng.random_range(0..self.alphabet.len())]);
        }

        Id::from(out)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(&IdConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn generated_ids_have_configured_length_and_alphabet() {
        let ids = IdGenerator::new(&IdConfig {
            alphabet: Some("abc".to_string()),
            length: Some(8),
        });

        for _ in 0..100 {
            let id = ids.generate();
            assert_eq!(id.as_str().len(), 8);
            assert!(id.as_str().chars().all(|c| "abc".contains(c)));
        }
    }

    #[test]
    fn consecutive_ids_do_not_collide() {
        let ids = IdGenerator::default();
        let mut seen = HashSet::new();

        for _ in 0..10_000 {
            assert!(seen.insert(ids.generate()));
        }
    }

    #[test]
    fn non_positive_length_falls_back_to_default() {
        for length in [Some(0), Some(-1), None] {
            let ids = IdGenerator::new(&IdConfig {
                alphabet: None,
                length,
            });
            assert_eq!(ids.generate().as_str().len(), IdGenerator::DEFAULT_LENGTH);
        }
    }

    #[test]
    fn empty_alphabet_falls_back_to_default() {
        let ids = IdGenerator::new(&IdConfig {
            alphabet: Some(String::new()),
            length: None,
        });

        let id = ids.generate();
        assert_eq!(id.as_str().len(), IdGenerator::DEFAULT_LENGTH);
        assert!(
            id.as_str()
                .chars()
                .all(|c| IdGenerator::DEFAULT_ALPHABET.contains(c))
        );
    }

    #[test]
    fn id_serde_round_trip() {
        let id = Id::from("a1b2c3");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#""a1b2c3""#);
        assert_eq!(serde_json::from_str::<Id>(&json).unwrap(), id);
    }
}
