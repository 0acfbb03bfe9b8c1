//! Validated text types shared across the OMR workspace.
//!
//! Entity identifiers (org, user, service, datatype ids) and human-readable
//! labels are validated once at a creation boundary and carried as these
//! newtypes afterwards, so downstream code never has to re-check them.

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,
    /// The input exceeded the maximum permitted length
    #[error("Text exceeds maximum length of {0} characters")]
    TooLong(usize),
    /// The input contained whitespace or control characters where an
    /// identifier was expected
    #[error("Identifier contains invalid characters")]
    InvalidCharacters,
}

/// A string type that guarantees non-empty content.
///
/// Wraps a `String` and ensures it contains at least one non-whitespace
/// character. The input is trimmed of leading and trailing whitespace during
/// construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// Returns `Err(TextError::Empty)` if the trimmed input is empty.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// An entity identifier safe to embed in audit records and lookup keys.
///
/// Identifiers are bounded in length and restricted to printable,
/// non-whitespace ASCII. They are used for org, user, service, and datatype
/// ids throughout the core.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier(String);

impl Identifier {
    /// Maximum permitted identifier length.
    pub const MAX_LEN: usize = 128;

    /// Creates a new `Identifier`, validating the input.
    ///
    /// # Errors
    ///
    /// Returns a `TextError` if the input is empty, longer than
    /// [`Identifier::MAX_LEN`], or contains whitespace, control characters,
    /// or non-ASCII bytes.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let s = input.as_ref();
        if s.is_empty() {
            return Err(TextError::Empty);
        }
        if s.len() > Self::MAX_LEN {
            return Err(TextError::TooLong(Self::MAX_LEN));
        }
        let ok = s
            .bytes()
            .all(|b| b.is_ascii_graphic());
        if !ok {
            return Err(TextError::InvalidCharacters);
        }
        Ok(Self(s.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the identifier, returning the inner `String`.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

macro_rules! serde_as_str {
    ($ty:ident) => {
        impl serde::Serialize for $ty {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                $ty::new(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

serde_as_str!(NonEmptyText);
serde_as_str!(Identifier);
