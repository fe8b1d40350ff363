//! # Model
//!
//! Records shared between the server, the reconciliation job and the load tester.
//!
//! ## Identifiers
//! - Forms carry two identifiers: a public `custom_id` (UUID v4, hyphenated) handed out to respondents,
//!   and an internal `id` (32 lowercase hex chars) used as the storage key.
//! - Feedback entries reference their form by the public identifier.
//! - Entry ids are assigned before the first write so a retried write lands on the same record.
use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

pub mod feedback;
pub mod form;
pub mod payloads;

pub use feedback::{FeedbackEntry, Metadata, Responses};
pub use form::{Field, Form, FormSettings, FormState};

static INTERNAL_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-f]{32}$").expect("internal id pattern is valid")
});

/// Fresh storage key for a form or an entry.
pub fn internal_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Fresh public identifier for a form.
pub fn public_id() -> String {
    Uuid::new_v4().to_string()
}

/// Whether a reference has the shape of a storage key rather than a public id.
pub fn is_internal_id(reference: &str) -> bool {
    INTERNAL_ID.is_match(reference)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_have_expected_shape() {
        assert!(is_internal_id(&internal_id()));
        assert!(!is_internal_id(&public_id()));
    }

    #[test]
    fn rejects_foreign_references() {
        assert!(!is_internal_id(""));
        assert!(!is_internal_id("64b7f0c2e1d3a4b5c6d7e8f9"));
        assert!(!is_internal_id("ABCDEF0123456789ABCDEF0123456789"));
        assert!(is_internal_id("abcdef0123456789abcdef0123456789"));
    }
}
