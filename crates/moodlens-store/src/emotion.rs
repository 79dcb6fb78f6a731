//! The identity subsystem's emotion enumeration and its parsing rules.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Emotion states tracked per identity. Discriminants are the stored codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityEmotion {
    Happy = 0,
    Sad = 1,
    Angry = 2,
    Surprised = 3,
    Neutral = 4,
}

impl IdentityEmotion {
    pub const ALL: [IdentityEmotion; 5] = [
        IdentityEmotion::Happy,
        IdentityEmotion::Sad,
        IdentityEmotion::Angry,
        IdentityEmotion::Surprised,
        IdentityEmotion::Neutral,
    ];

    /// Used whenever a stored value is missing or unrecognized.
    pub const DEFAULT: IdentityEmotion = IdentityEmotion::Neutral;

    pub fn code(&self) -> i64 {
        *self as i64
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityEmotion::Happy => "happy",
            IdentityEmotion::Sad => "sad",
            IdentityEmotion::Angry => "angry",
            IdentityEmotion::Surprised => "surprised",
            IdentityEmotion::Neutral => "neutral",
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.iter().copied().find(|e| e.code() == code)
    }

    /// Case-insensitive name lookup. Classifier labels outside this set
    /// (e.g. "disgust", "scared") have no counterpart and yield `None`.
    pub fn from_label_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL.iter().copied().find(|e| e.as_str().eq_ignore_ascii_case(name))
    }
}

impl Default for IdentityEmotion {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for IdentityEmotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored emotion value in whatever shape it was persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum RawEmotion {
    Code(i64),
    Text(String),
    Missing,
}

/// Total parse of a stored emotion value.
///
/// Accepted forms: a numeric code (`2`), a decimal string (`"2"`), or a name
/// in any case (`"ANGRY"`). Anything else, including a missing value or an
/// out-of-range code, resolves to [`IdentityEmotion::DEFAULT`].
pub fn parse_label(raw: &RawEmotion) -> IdentityEmotion {
    let parsed = match raw {
        RawEmotion::Code(code) => IdentityEmotion::from_code(*code),
        RawEmotion::Text(text) => {
            let text = text.trim();
            match text.parse::<i64>() {
                Ok(code) => IdentityEmotion::from_code(code),
                Err(_) => IdentityEmotion::from_label_name(text),
            }
        }
        RawEmotion::Missing => None,
    };
    parsed.unwrap_or(IdentityEmotion::DEFAULT)
}
