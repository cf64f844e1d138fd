//! Gate that rejects subject names too weak to describe.
//!
//! Archives named `untitled.zip` or `New File (3).zip` would produce generic
//! posts, so they fail permanently before any external call is made.

use serde::{Deserialize, Serialize};

use crate::domain::StageError;

/// Rules applied to a subject name before the first stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectRules {
    /// Minimum number of non-whitespace characters
    #[serde(default = "default_min_length")]
    pub min_length: usize,

    /// Words that disqualify a subject when present as a whole word
    #[serde(default = "default_blocked_words")]
    pub blocked_words: Vec<String>,
}

fn default_min_length() -> usize {
    3
}

fn default_blocked_words() -> Vec<String> {
    ["untitled", "new", "file", "document", "temp", "test"]
        .iter()
        .map(|w| w.to_string())
        .collect()
}

impl Default for SubjectRules {
    fn default() -> Self {
        Self {
            min_length: default_min_length(),
            blocked_words: default_blocked_words(),
        }
    }
}

impl SubjectRules {
    /// Check a subject; the error is always `Permanent`
    pub fn check(&self, subject: &str) -> Result<(), StageError> {
        let visible: Vec<char> = subject.chars().filter(|c| !c.is_whitespace()).collect();
        if visible.len() < self.min_length {
            return Err(StageError::permanent(format!(
                "subject '{}' is shorter than {} characters",
                subject, self.min_length
            )));
        }

        let alnum = visible.iter().filter(|c| c.is_alphanumeric()).count();
        if alnum * 2 < visible.len() {
            return Err(StageError::permanent(format!(
                "subject '{}' is mostly punctuation",
                subject
            )));
        }

        let lower = subject.to_lowercase();
        let blocked = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .find(|w| self.blocked_words.iter().any(|b| b.eq_ignore_ascii_case(w)));

        if let Some(word) = blocked {
            return Err(StageError::permanent(format!(
                "subject '{}' contains placeholder word '{}'",
                subject, word
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;

    #[test]
    fn test_descriptive_subjects_pass() {
        let rules = SubjectRules::default();
        assert!(rules.check("Gundam RX-78").is_ok());
        assert!(rules.check("paper_dragon_v2").is_ok());
        assert!(rules.check("Xe tăng T-34").is_ok());
    }

    #[test]
    fn test_placeholder_words_rejected() {
        let rules = SubjectRules::default();
        for subject in ["untitled", "New Folder", "my_file_3", "TEMP-model"] {
            let err = rules.check(subject).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Permanent, "{subject}");
        }
    }

    #[test]
    fn test_blocked_word_must_be_whole_word() {
        let rules = SubjectRules::default();
        // "newt" and "temple" contain blocked words only as substrings
        assert!(rules.check("newt origami").is_ok());
        assert!(rules.check("temple").is_ok());
    }

    #[test]
    fn test_short_and_symbolic_subjects_rejected() {
        let rules = SubjectRules::default();
        assert!(rules.check("ab").is_err());
        assert!(rules.check("  a  ").is_err());
        assert!(rules.check("#_#-!ab").is_err());
    }
}
