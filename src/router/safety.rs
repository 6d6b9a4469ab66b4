//! Screening of destructive requests.
//!
//! A message combining a destructive verb with a bulk qualifier must be
//! confirmed. If it also names a protected environment it is blocked until
//! the user types an explicit `confirm`.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static DANGEROUS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(delete|remove|wipe|drop|purge|destroy|erase|truncate)\b").unwrap()
});

static BULK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(all|every|everything|entire|whole|them)\b").unwrap()
});

static PROTECTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(production|prod|critical|live)\b").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyVerdict {
    Safe,
    RequiresConfirmation,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyAssessment {
    pub verdict: SafetyVerdict,
    pub matched_terms: Vec<String>,
}

impl SafetyAssessment {
    pub fn safe() -> Self {
        Self {
            verdict: SafetyVerdict::Safe,
            matched_terms: Vec::new(),
        }
    }

    pub fn is_safe(&self) -> bool {
        self.verdict == SafetyVerdict::Safe
    }

    /// The question put to the user.
    pub fn prompt(&self, summary: &str) -> String {
        match self.verdict {
            SafetyVerdict::Safe => String::new(),
            SafetyVerdict::RequiresConfirmation => format!(
                "This will {}. Are you sure? Reply 'yes' to continue or 'no' to cancel.",
                summary
            ),
            SafetyVerdict::Blocked => format!(
                "This will {} and touches protected resources ({}). Reply 'confirm' to continue or 'cancel' to stop.",
                summary,
                self.matched_terms.join(", ")
            ),
        }
    }

    /// Whether a follow-up answer approves the held operation.
    pub fn accepts(&self, answer: &str) -> bool {
        let answer = answer.trim().trim_end_matches(['.', '!']).to_lowercase();
        match self.verdict {
            SafetyVerdict::Safe => true,
            SafetyVerdict::RequiresConfirmation => {
                matches!(answer.as_str(), "yes" | "y" | "confirm" | "ok" | "proceed")
            }
            SafetyVerdict::Blocked => answer == "confirm",
        }
    }
}

/// Screen a message.
pub fn assess(message: &str) -> SafetyAssessment {
    let dangerous: Vec<String> = DANGEROUS_RE
        .find_iter(message)
        .map(|m| m.as_str().to_lowercase())
        .collect();
    let bulk: Vec<String> = BULK_RE
        .find_iter(message)
        .map(|m| m.as_str().to_lowercase())
        .collect();
    if dangerous.is_empty() || bulk.is_empty() {
        return SafetyAssessment::safe();
    }

    let protected: Vec<String> = PROTECTED_RE
        .find_iter(message)
        .map(|m| m.as_str().to_lowercase())
        .collect();
    if protected.is_empty() {
        SafetyAssessment {
            verdict: SafetyVerdict::RequiresConfirmation,
            matched_terms: dangerous.into_iter().chain(bulk).collect(),
        }
    } else {
        SafetyAssessment {
            verdict: SafetyVerdict::Blocked,
            matched_terms: protected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_delete_is_safe() {
        assert!(assess("delete asset Desktop").is_safe());
        assert!(assess("list all scopes").is_safe());
    }

    #[test]
    fn test_bulk_delete_requires_confirmation() {
        let a = assess("delete all scopes");
        assert_eq!(a.verdict, SafetyVerdict::RequiresConfirmation);
        assert!(a.accepts("Yes"));
        assert!(!a.accepts("no"));
    }

    #[test]
    fn test_protected_terms_block() {
        let a = assess("wipe every production asset");
        assert_eq!(a.verdict, SafetyVerdict::Blocked);
        assert_eq!(a.matched_terms, vec!["production"]);
        assert!(!a.accepts("yes"));
        assert!(a.accepts("confirm"));
        assert!(a.prompt("delete 4 assets").contains("production"));
    }
}
