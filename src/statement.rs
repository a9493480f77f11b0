//! The statement model.
//!
//! A [`Statement`] is one (entity, property, value) fact with provenance.
//! Statements are immutable once written; corrections are new statements,
//! never updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provenance tag applied when an ingestion batch names no origin.
pub const DEFAULT_ORIGIN: &str = "default";

/// Dataset name applied when an entity carries no dataset.
pub const DEFAULT_DATASET: &str = "default";

/// An atomic (entity, property, value) fact with provenance.
///
/// The `id` is a deterministic hash over the fact's identity-bearing fields,
/// so ingesting the same fact twice always produces the same id and storage
/// backends can deduplicate on write.
///
/// # Examples
///
/// ```
/// use entiq::Statement;
///
/// let stmt = Statement::new("org-1", "Company", "name", "ACME Inc.", "corp_registry");
/// let again = Statement::new("org-1", "Company", "name", "ACME Inc.", "corp_registry");
/// assert_eq!(stmt.id, again.id);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    /// Deterministic content hash of (entity_id, schema, prop, value, dataset, origin).
    pub id: String,

    /// The raw id of the entity this fact is about.
    pub entity_id: String,

    /// Post-resolution id. Defaults to `entity_id` until a resolver rewrites it.
    pub canonical_id: String,

    /// Entity type name as declared by the source.
    pub schema: String,

    /// Property name.
    pub prop: String,

    /// Property value. Statement values are always strings.
    pub value: String,

    /// Value before source-side cleaning, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_value: Option<String>,

    /// Language tag for text values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,

    /// Dataset this fact was sourced from.
    pub dataset: String,

    /// Provenance tag for the ingestion batch.
    pub origin: String,

    /// When this fact was first observed.
    pub first_seen: DateTime<Utc>,
    /// When this fact was most recently observed.
    pub last_seen: DateTime<Utc>,
}

impl Statement {
    /// Creates a statement in the default dataset and origin, timestamped now.
    #[must_use]
    pub fn new(
        entity_id: impl Into<String>,
        schema: impl Into<String>,
        prop: impl Into<String>,
        value: impl Into<String>,
        dataset: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self::build(
            entity_id.into(),
            schema.into(),
            prop.into(),
            value.into(),
            dataset.into(),
            DEFAULT_ORIGIN.to_string(),
            now,
            now,
        )
    }

    /// Creates a statement with explicit origin and timestamps.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn build(
        entity_id: String,
        schema: String,
        prop: String,
        value: String,
        dataset: String,
        origin: String,
        first_seen: DateTime<Utc>,
        last_seen: DateTime<Utc>,
    ) -> Self {
        let id = Self::make_id(&entity_id, &schema, &prop, &value, &dataset, &origin);
        Self {
            id,
            canonical_id: entity_id.clone(),
            entity_id,
            schema,
            prop,
            value,
            original_value: None,
            lang: None,
            dataset,
            origin,
            first_seen,
            last_seen,
        }
    }

    /// Computes the deterministic statement id.
    ///
    /// Identical inputs always yield the identical id, which makes
    /// re-ingestion idempotent across every backend.
    #[must_use]
    pub fn make_id(
        entity_id: &str,
        schema: &str,
        prop: &str,
        value: &str,
        dataset: &str,
        origin: &str,
    ) -> String {
        let mut hasher = blake3::Hasher::new();
        for part in [entity_id, schema, prop, value, dataset, origin] {
            hasher.update(part.as_bytes());
            hasher.update(b"\x1e");
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Replaces the canonical id, returning the modified statement.
    ///
    /// The statement id is unchanged: canonicalization does not alter the
    /// fact's identity, only where it files under assembly.
    #[must_use]
    pub fn with_canonical_id(mut self, canonical_id: impl Into<String>) -> Self {
        self.canonical_id = canonical_id.into();
        self
    }

    /// Sets the origin tag and recomputes the id.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self.id = Self::make_id(
            &self.entity_id,
            &self.schema,
            &self.prop,
            &self.value,
            &self.dataset,
            &self.origin,
        );
        self
    }

    /// Sets the language tag.
    #[must_use]
    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }

    /// Sets the pre-cleaning original value.
    #[must_use]
    pub fn with_original_value(mut self, value: impl Into<String>) -> Self {
        self.original_value = Some(value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_id_deterministic() {
        let a = Statement::new("e1", "Person", "name", "Jane", "ds");
        let b = Statement::new("e1", "Person", "name", "Jane", "ds");
        assert_eq!(a.id, b.id);
        // timestamps are not identity-bearing
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_statement_id_varies_by_field() {
        let base = Statement::new("e1", "Person", "name", "Jane", "ds");
        assert_ne!(base.id, Statement::new("e2", "Person", "name", "Jane", "ds").id);
        assert_ne!(base.id, Statement::new("e1", "Person", "name", "Joan", "ds").id);
        assert_ne!(base.id, Statement::new("e1", "Person", "name", "Jane", "other").id);
        assert_ne!(base.id, base.clone().with_origin("crawl").id);
    }

    #[test]
    fn test_statement_canonical_defaults_to_entity_id() {
        let stmt = Statement::new("e1", "Person", "name", "Jane", "ds");
        assert_eq!(stmt.canonical_id, "e1");
        let stmt = stmt.with_canonical_id("canon-1");
        assert_eq!(stmt.canonical_id, "canon-1");
        assert_eq!(stmt.entity_id, "e1");
    }

    #[test]
    fn test_statement_id_separator_is_unambiguous() {
        // field boundaries must not be confusable
        let a = Statement::new("ab", "c", "p", "v", "ds");
        let b = Statement::new("a", "bc", "p", "v", "ds");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_statement_serde_roundtrip() {
        let stmt = Statement::new("e1", "Person", "name", "Jane", "ds")
            .with_lang("en")
            .with_original_value("JANE");
        let json = serde_json::to_string(&stmt).unwrap();
        let back: Statement = serde_json::from_str(&json).unwrap();
        assert_eq!(stmt, back);
    }

    #[test]
    fn test_statement_optional_fields_omitted() {
        let stmt = Statement::new("e1", "Person", "name", "Jane", "ds");
        let json = serde_json::to_string(&stmt).unwrap();
        assert!(!json.contains("original_value"));
        assert!(!json.contains("lang"));
    }
}
