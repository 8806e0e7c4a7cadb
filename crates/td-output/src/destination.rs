// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Destination naming: mapping a record set's tag onto a storage-safe
//! `(namespace, relation)` pair.

use crate::errors::NameError;
use std::fmt;

/// Marker that makes a namespace or relation follow the tag.
pub const WILDCARD: &str = "*";

const MIN_NAME_LEN: usize = 3;
const MAX_NAME_LEN: usize = 255;
const TRUNCATION_SUFFIX: &[u8] = b"__";

/// Configured source of a namespace or relation name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationPattern {
    Fixed(String),
    Wildcard,
}

impl DestinationPattern {
    /// `"*"` is a wildcard, anything else is taken literally.
    pub fn parse(value: &str) -> Self {
        if value == WILDCARD {
            Self::Wildcard
        } else {
            Self::Fixed(value.to_string())
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard)
    }
}

impl fmt::Display for DestinationPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(name) => write!(f, "{}", name),
            Self::Wildcard => write!(f, "{}", WILDCARD),
        }
    }
}

/// Normalized destination of a record set. One spooler exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DestinationKey {
    pub namespace: String,
    pub relation: String,
}

impl DestinationKey {
    /// Registry key, `namespace.relation`.
    pub fn key(&self) -> String {
        format!("{}.{}", self.namespace, self.relation)
    }
}

impl fmt::Display for DestinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.relation)
    }
}

/// Normalizes a database or table name.
///
/// Names shorter than 3 bytes are padded with `_`, names longer than 255 bytes
/// are cut to 253 bytes followed by `__`. The result is lower-cased and every
/// byte outside `[a-z0-9_]` becomes `_`, so the output is always ASCII.
///
/// ```
/// use td_output::destination::normalize_name;
///
/// assert_eq!(normalize_name("db").unwrap(), "db_");
/// assert_eq!(normalize_name("My-App").unwrap(), "my_app");
/// assert!(normalize_name("").is_err());
/// ```
pub fn normalize_name(name: &str) -> Result<String, NameError> {
    let mut bytes = name.as_bytes().to_vec();
    if bytes.is_empty() {
        return Err(NameError::Empty);
    }
    if bytes.len() < MIN_NAME_LEN {
        bytes.resize(MIN_NAME_LEN, b'_');
    }
    if bytes.len() > MAX_NAME_LEN {
        bytes.truncate(MAX_NAME_LEN - TRUNCATION_SUFFIX.len());
        bytes.extend_from_slice(TRUNCATION_SUFFIX);
    }
    let normalized = bytes
        .iter()
        .map(|b| {
            let c = b.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == b'_' {
                c as char
            } else {
                '_'
            }
        })
        .collect();
    Ok(normalized)
}

/// Resolves the raw `(namespace, relation)` pair for `tag`.
///
/// When both patterns are wildcards the tag is split on its first `.`. A tag
/// without a separator leaves the namespace unresolved, i.e. the literal
/// wildcard, which normalizes to `___`.
pub fn resolve<'a>(
    namespace: &'a DestinationPattern,
    relation: &'a DestinationPattern,
    tag: &'a str,
) -> (&'a str, &'a str) {
    match (namespace, relation) {
        (DestinationPattern::Fixed(ns), DestinationPattern::Fixed(rel)) => (ns.as_str(), rel.as_str()),
        (DestinationPattern::Fixed(ns), DestinationPattern::Wildcard) => (ns.as_str(), tag),
        (DestinationPattern::Wildcard, DestinationPattern::Fixed(rel)) => (tag, rel.as_str()),
        (DestinationPattern::Wildcard, DestinationPattern::Wildcard) => {
            match tag.split_once('.') {
                Some((ns, rel)) => (ns, rel),
                None => (WILDCARD, tag),
            }
        }
    }
}

/// Resolves and normalizes the destination of `tag`.
pub fn destination_for_tag(
    namespace: &DestinationPattern,
    relation: &DestinationPattern,
    tag: &str,
) -> Result<DestinationKey, NameError> {
    let (ns, rel) = resolve(namespace, relation, tag);
    Ok(DestinationKey {
        namespace: normalize_name(ns)?,
        relation: normalize_name(rel)?,
    })
}
