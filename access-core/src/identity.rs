//! Subject identity passed to the policy engine

use crate::authority::TokenOwner;
use std::fmt;

/// Separator between the user and customer halves of a derived subject
pub const SUBJECT_SEPARATOR: char = '_';

/// Subject evaluated by the policy engine
///
/// Token-derived subjects are `user_customer`. Neither half is escaped, so
/// owners whose ids contain `_` can map to the same subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subject(String);

impl Subject {
    /// Subject supplied directly by a trusted caller
    pub fn provided(subject: impl Into<String>) -> Self {
        Subject(subject.into())
    }

    /// Subject derived from a validated token owner
    pub fn from_owner(owner: &TokenOwner) -> Self {
        Subject(format!(
            "{}{}{}",
            owner.user_id, SUBJECT_SEPARATOR, owner.customer_id
        ))
    }

    /// Borrow the subject string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
