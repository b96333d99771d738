//! Validated SQL identifiers.
//!
//! Any identifier that ends up inside dynamically built SQL (row counting for a
//! catalog object, partition names, index names) goes through `SqlIdent`, which
//! only admits plain identifiers and always renders them double-quoted.

use crate::error::DescriptorError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Postgres truncates identifiers longer than this.
const MAX_IDENT_BYTES: usize = 63;

/// A plain SQL identifier: `[A-Za-z_][A-Za-z0-9_]*`, at most 63 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SqlIdent(String);

impl SqlIdent {
    /// Validate `raw` as a plain identifier.
    pub fn parse(raw: impl Into<String>) -> Result<Self, DescriptorError> {
        let raw = raw.into();
        let mut chars = raw.chars();
        let valid_head = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
        let valid_tail = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

        if !valid_head || !valid_tail || raw.len() > MAX_IDENT_BYTES {
            return Err(DescriptorError::InvalidIdentifier(raw));
        }
        Ok(SqlIdent(raw))
    }

    /// Wrap a name built by this crate from validated parts.
    pub(crate) fn derived(raw: String) -> Self {
        debug_assert!(SqlIdent::parse(raw.as_str()).is_ok(), "{raw:?}");
        SqlIdent(raw)
    }

    /// The raw identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identifier rendered for SQL (always double-quoted).
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for SqlIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SqlIdent {
    type Error = DescriptorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        SqlIdent::parse(value)
    }
}

impl From<SqlIdent> for String {
    fn from(value: SqlIdent) -> Self {
        value.0
    }
}

/// A schema-qualified relation name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualifiedName {
    /// Schema part
    pub schema: SqlIdent,
    /// Relation part
    pub name: SqlIdent,
}

impl QualifiedName {
    /// Validate both parts.
    pub fn parse(schema: &str, name: &str) -> Result<Self, DescriptorError> {
        Ok(QualifiedName {
            schema: SqlIdent::parse(schema)?,
            name: SqlIdent::parse(name)?,
        })
    }

    /// `"schema"."name"` for use in SQL text.
    pub fn quoted(&self) -> String {
        format!("{}.{}", self.schema.quoted(), self.name.quoted())
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_identifiers_accepted() {
        assert!(SqlIdent::parse("fact_sales").is_ok());
        assert!(SqlIdent::parse("_staging2").is_ok());
        assert!(SqlIdent::parse("Sales_2024_01").is_ok());
    }

    #[test]
    fn test_hostile_identifiers_rejected() {
        for raw in ["", "1abc", "a b", "x;DROP TABLE y", "quote\"d", "dwh.fact"] {
            assert!(SqlIdent::parse(raw).is_err(), "accepted {raw:?}");
        }
        assert!(SqlIdent::parse("a".repeat(64)).is_err());
        assert!(SqlIdent::parse("a".repeat(63)).is_ok());
    }

    #[test]
    fn test_qualified_name_rendering() {
        let name = QualifiedName::parse("dwh", "dim_product").unwrap();
        assert_eq!(name.quoted(), "\"dwh\".\"dim_product\"");
        assert_eq!(name.to_string(), "dwh.dim_product");
    }
}
