//! Physical resource naming.
//!
//! Plans refer to resources by logical name. Each run maps those onto
//! physical names, optionally with a random suffix so repeated runs do
//! not collide with resources that are still being deleted.

use uuid::Uuid;

/// Number of hex digits in a random suffix.
const SUFFIX_LEN: usize = 6;

/// How suffixes are produced.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Suffix {
    /// Physical names equal logical names.
    None,
    /// A fresh random suffix per name.
    Random,
    /// The same suffix for every name.
    Fixed(String),
}

/// Generator for physical resource names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameGenerator {
    suffix: Suffix,
}

impl NameGenerator {
    /// Creates a generator that randomizes names when `randomize` is set.
    #[must_use]
    pub const fn new(randomize: bool) -> Self {
        Self {
            suffix: if randomize { Suffix::Random } else { Suffix::None },
        }
    }

    /// Creates a generator appending the same suffix to every name.
    #[must_use]
    pub fn with_suffix(suffix: impl Into<String>) -> Self {
        Self {
            suffix: Suffix::Fixed(suffix.into()),
        }
    }

    /// Returns the physical name for `logical`.
    #[must_use]
    pub fn physical(&self, logical: &str) -> String {
        match &self.suffix {
            Suffix::None => logical.to_string(),
            Suffix::Random => {
                let id = Uuid::new_v4().simple().to_string();
                format!("{logical}-{}", &id[..SUFFIX_LEN])
            }
            Suffix::Fixed(suffix) => format!("{logical}-{suffix}"),
        }
    }
}

/// Generates an administrator password meeting Azure's complexity rules.
#[must_use]
pub fn generate_password() -> String {
    format!("Vn0!{}", Uuid::new_v4().simple())
}
