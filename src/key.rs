//! Deterministic cache key construction.
//!
//! A key is built from an ordered list of prefix strings plus an ordered
//! list of [`KeyElement`]s, joined by a fixed separator:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  prefixes: ["prefix", "key"]   elements: ["hoge", "fuga"]    │
//! │                                                              │
//! │  1. flatten elements to tokens   →  ["hoge", "fuga"]         │
//! │  2. join tokens                  →  "hoge_fuga"              │
//! │  3. (hashed mode) digest segment →  sha256 hex               │
//! │  4. join prefixes + segment      →  "prefix_key_hoge_fuga"   │
//! │  5. whitespace → separator                                   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Concepts
//!
//! - **Determinism**: the same ordered prefixes + elements in the same mode
//!   always yield the same key. Pure function, no side effects.
//! - **Flattening**: a sequence contributes its children's tokens, not one
//!   bracketed token; `["a", "b"]` contributes two tokens. A byte sequence
//!   contributes one decimal token per byte.
//! - **Closed admissibility**: [`KeyElement`] is a closed enum, so every
//!   kind is handled exhaustively at compile time. Kinds with no stable
//!   textual form (absent values, associative maps) still convert, but are
//!   rejected when the key is built — no partial key is ever produced.
//!
//! ## Example Usage
//!
//! ```
//! use fetchkit::key::KeyBuilder;
//!
//! let key = KeyBuilder::new(["prefix", "key"])
//!     .element("hoge")
//!     .element("fuga")
//!     .build()
//!     .unwrap();
//! assert_eq!(key, "prefix_key_hoge_fuga");
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use sha2::{Digest, Sha256};

use crate::error::FetchError;

/// Separator joining prefixes and element tokens.
pub const KEY_SEPARATOR: char = '_';

const SEP: &str = "_";

/// One input to key construction.
///
/// Covers the admissible kinds: strings, booleans, integers of any width,
/// floats, byte sequences, ordered sequences of elements, and values with a
/// stable textual representation (captured via [`KeyElement::display`]).
/// Two variants represent kinds that convert but cannot contribute to a
/// deterministic key; building over them fails with
/// [`FetchError::InvalidKeyElement`].
#[derive(Debug, Clone, PartialEq)]
pub enum KeyElement {
    /// UTF-8 string token.
    Str(String),
    /// Boolean token (`true` / `false`).
    Bool(bool),
    /// Signed integer token, any source width.
    Int(i128),
    /// Unsigned integer token, any source width.
    Uint(u128),
    /// Single-precision float token, rendered at its own precision.
    F32(f32),
    /// Double-precision float token.
    F64(f64),
    /// Byte sequence; flattens to one decimal token per byte.
    Bytes(Vec<u8>),
    /// Ordered sequence; flattens to its children's tokens, in order.
    Seq(Vec<KeyElement>),
    /// Stable textual representation captured from a `Display` value.
    Text(String),
    /// Absent value (`Option::None`). Rejected at build time.
    Absent,
    /// Kind with no deterministic token order. Rejected at build time.
    Unkeyable(&'static str),
}

impl KeyElement {
    /// Capture the stable textual representation of a describable value.
    ///
    /// `Display` is the describable capability: unlike a derived debug
    /// rendering, it is hand-written and stable across versions.
    pub fn display<T: fmt::Display + ?Sized>(value: &T) -> Self {
        KeyElement::Text(value.to_string())
    }

    /// Byte-sequence element from any byte source.
    pub fn bytes(value: impl AsRef<[u8]>) -> Self {
        KeyElement::Bytes(value.as_ref().to_vec())
    }

    /// Flatten this element into `out`, or reject the whole construction.
    fn tokens(&self, out: &mut Vec<String>) -> Result<(), FetchError> {
        match self {
            KeyElement::Str(s) => out.push(s.clone()),
            KeyElement::Bool(b) => out.push(b.to_string()),
            KeyElement::Int(i) => out.push(i.to_string()),
            KeyElement::Uint(u) => out.push(u.to_string()),
            KeyElement::F32(f) => out.push(f.to_string()),
            KeyElement::F64(f) => out.push(f.to_string()),
            KeyElement::Bytes(bytes) => out.extend(bytes.iter().map(|b| b.to_string())),
            KeyElement::Seq(children) => {
                for child in children {
                    child.tokens(out)?;
                }
            },
            KeyElement::Text(s) => out.push(s.clone()),
            KeyElement::Absent => return Err(FetchError::InvalidKeyElement("absent value")),
            KeyElement::Unkeyable(kind) => return Err(FetchError::InvalidKeyElement(kind)),
        }
        Ok(())
    }
}

impl From<&str> for KeyElement {
    fn from(value: &str) -> Self {
        KeyElement::Str(value.to_owned())
    }
}

impl From<String> for KeyElement {
    fn from(value: String) -> Self {
        KeyElement::Str(value)
    }
}

impl From<bool> for KeyElement {
    fn from(value: bool) -> Self {
        KeyElement::Bool(value)
    }
}

impl From<f32> for KeyElement {
    fn from(value: f32) -> Self {
        KeyElement::F32(value)
    }
}

impl From<f64> for KeyElement {
    fn from(value: f64) -> Self {
        KeyElement::F64(value)
    }
}

macro_rules! int_element {
    ($($t:ty),*) => {$(
        impl From<$t> for KeyElement {
            fn from(value: $t) -> Self {
                KeyElement::Int(value as i128)
            }
        }
    )*};
}

macro_rules! uint_element {
    ($($t:ty),*) => {$(
        impl From<$t> for KeyElement {
            fn from(value: $t) -> Self {
                KeyElement::Uint(value as u128)
            }
        }
    )*};
}

int_element!(i8, i16, i32, i64, i128, isize);
uint_element!(u8, u16, u32, u64, u128, usize);

impl<T: Into<KeyElement>> From<Vec<T>> for KeyElement {
    fn from(values: Vec<T>) -> Self {
        KeyElement::Seq(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<KeyElement>, const N: usize> From<[T; N]> for KeyElement {
    fn from(values: [T; N]) -> Self {
        KeyElement::Seq(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Clone + Into<KeyElement>> From<&[T]> for KeyElement {
    fn from(values: &[T]) -> Self {
        KeyElement::Seq(values.iter().cloned().map(Into::into).collect())
    }
}

/// `Some` converts transparently; `None` is the absent value and is
/// rejected when the key is built.
impl<T: Into<KeyElement>> From<Option<T>> for KeyElement {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(inner) => inner.into(),
            None => KeyElement::Absent,
        }
    }
}

/// Unordered iteration breaks determinism, so maps never contribute tokens.
impl<K, V, S> From<HashMap<K, V, S>> for KeyElement {
    fn from(_: HashMap<K, V, S>) -> Self {
        KeyElement::Unkeyable("associative map")
    }
}

/// Rejected alongside [`HashMap`]: admissibility is by kind, not by the
/// iteration order of one particular implementation.
impl<K, V> From<BTreeMap<K, V>> for KeyElement {
    fn from(_: BTreeMap<K, V>) -> Self {
        KeyElement::Unkeyable("associative map")
    }
}

/// Builder for deterministic cache keys.
///
/// Carries ordered prefixes, ordered elements, and the hashed-mode flag.
/// [`build`](KeyBuilder::build) is pure: identical inputs always yield an
/// identical key.
#[derive(Debug, Clone, Default)]
pub struct KeyBuilder {
    prefixes: Vec<String>,
    elements: Vec<KeyElement>,
    hashed: bool,
}

impl KeyBuilder {
    /// Start a key from ordered prefix tokens.
    pub fn new<I, P>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
            elements: Vec::new(),
            hashed: false,
        }
    }

    /// Append one element.
    pub fn element(mut self, element: impl Into<KeyElement>) -> Self {
        self.elements.push(element.into());
        self
    }

    /// Append a run of elements, preserving order.
    pub fn elements<I>(mut self, elements: I) -> Self
    where
        I: IntoIterator<Item = KeyElement>,
    {
        self.elements.extend(elements);
        self
    }

    /// Replace the element segment with its SHA-256 hex digest, bounding
    /// key length and collision probability for large element sets.
    pub fn hashed(mut self, hashed: bool) -> Self {
        self.hashed = hashed;
        self
    }

    /// Build the key.
    ///
    /// With no elements the key is just the prefixes joined, with no
    /// trailing separator. Any inadmissible element anywhere in the nested
    /// input aborts with [`FetchError::InvalidKeyElement`]. Whitespace in
    /// the final string is replaced with the separator so keys stay a
    /// single safe token for backends that forbid it.
    pub fn build(self) -> Result<String, FetchError> {
        let mut parts = self.prefixes;

        if !self.elements.is_empty() {
            let mut tokens = Vec::new();
            for element in &self.elements {
                element.tokens(&mut tokens)?;
            }
            let segment = tokens.join(SEP);
            if self.hashed {
                parts.push(hex::encode(Sha256::digest(segment.as_bytes())));
            } else {
                parts.push(segment);
            }
        }

        let joined = parts.join(SEP);
        Ok(joined
            .chars()
            .map(|c| if c.is_whitespace() { KEY_SEPARATOR } else { c })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
