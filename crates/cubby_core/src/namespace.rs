//! Namespace codec.
//!
//! Every client lives in its own bucket. The bucket identifier is derived
//! from the (kind, name, discriminator) tuple of the component that asked for
//! the client, using a length-prefixed encoding:
//!
//! ```text
//! <len(kind)>:<kind><len(name)>:<name><len(discriminator)>:<discriminator>
//! ```
//!
//! Lengths are decimal UTF-8 byte counts. Because every field is prefixed
//! with its exact length, no choice of field contents can make two distinct
//! tuples encode to the same identifier, and an empty discriminator encodes
//! as `0:`, distinct from every non-empty one.

use crate::error::{CoreError, CoreResult};
use std::fmt;

/// The identity of one client's key space.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Namespace {
    kind: String,
    name: String,
    discriminator: String,
}

impl Namespace {
    /// Creates a namespace from its three parts.
    #[must_use]
    pub fn new(
        kind: impl Into<String>,
        name: impl Into<String>,
        discriminator: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            discriminator: discriminator.into(),
        }
    }

    /// Component kind, e.g. `receiver`.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Component name, e.g. `filelog/app`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Extra string separating several clients of one component.
    #[must_use]
    pub fn discriminator(&self) -> &str {
        &self.discriminator
    }

    /// Encodes the namespace into its bucket identifier.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(
            self.kind.len() + self.name.len() + self.discriminator.len() + 12,
        );
        for field in [&self.kind, &self.name, &self.discriminator] {
            out.push_str(&field.len().to_string());
            out.push(':');
            out.push_str(field);
        }
        out
    }

    /// Decodes a bucket identifier produced by [`encode`](Self::encode).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidNamespace`] if `raw` is not exactly three
    /// well-formed length-prefixed fields.
    pub fn decode(raw: &str) -> CoreResult<Self> {
        let mut rest = raw;
        let mut fields = Vec::with_capacity(3);

        for _ in 0..3 {
            let (field, tail) = take_field(rest).map_err(|msg| CoreError::invalid_namespace(raw, msg))?;
            fields.push(field.to_string());
            rest = tail;
        }

        if !rest.is_empty() {
            return Err(CoreError::invalid_namespace(raw, "trailing data after discriminator"));
        }

        let discriminator = fields.pop().unwrap_or_default();
        let name = fields.pop().unwrap_or_default();
        let kind = fields.pop().unwrap_or_default();
        Ok(Self {
            kind,
            name,
            discriminator,
        })
    }
}

/// Splits one `<len>:<bytes>` field off the front of `input`.
fn take_field(input: &str) -> Result<(&str, &str), &'static str> {
    let colon = input.find(':').ok_or("missing length separator")?;
    let digits = &input[..colon];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err("length prefix is not a decimal number");
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return Err("length prefix has leading zeros");
    }
    let len: usize = digits.parse().map_err(|_| "length prefix out of range")?;

    let body = &input[colon + 1..];
    let field = body.get(..len).ok_or("field shorter than its length prefix")?;
    Ok((field, &body[len..]))
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.discriminator.is_empty() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{}[{}]", self.kind, self.name, self.discriminator)
        }
    }
}
