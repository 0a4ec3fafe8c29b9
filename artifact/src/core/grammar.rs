//! Tag vocabulary of the action stream.
//!
//! Tag and attribute names are a versioned external contract: they are matched
//! exactly (case-sensitive). Deployments that evolve the grammar override them
//! through configuration rather than code.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Grammar {
    /// Optional wrapper around a group of actions.
    pub artifact_tag: String,
    /// Tag of a single action block.
    pub action_tag: String,
    /// Section listing user-authored modifications.
    pub modifications_tag: String,
    /// Inner marker of a unified-diff modification payload.
    pub diff_tag: String,
    /// Inner marker of a full-file modification payload.
    pub file_tag: String,
    /// Path attribute on action blocks.
    pub path_attribute: String,
}

impl Default for Grammar {
    fn default() -> Self {
        Self {
            artifact_tag: "boltArtifact".to_string(),
            action_tag: "boltAction".to_string(),
            modifications_tag: "bolt_file_modifications".to_string(),
            diff_tag: "diff".to_string(),
            file_tag: "file".to_string(),
            path_attribute: "filePath".to_string(),
        }
    }
}

impl Grammar {
    /// Ensure all tag names are usable; returns the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        let names = [
            ("artifact_tag", &self.artifact_tag),
            ("action_tag", &self.action_tag),
            ("modifications_tag", &self.modifications_tag),
            ("diff_tag", &self.diff_tag),
            ("file_tag", &self.file_tag),
            ("path_attribute", &self.path_attribute),
        ];
        for (field, name) in names {
            if !is_name(name) {
                return Err(format!("grammar.{field} `{name}` is not a valid tag name"));
            }
        }
        if self.diff_tag == self.file_tag {
            return Err("grammar.diff_tag and grammar.file_tag must differ".to_string());
        }
        Ok(())
    }
}

/// XML-ish name: a letter or `_`, then letters, digits, `_`, `-`, `.` or `:`.
pub(crate) fn is_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_grammar_is_valid() {
        assert_eq!(Grammar::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_tag_names_with_spaces() {
        let grammar = Grammar {
            action_tag: "bolt action".to_string(),
            ..Grammar::default()
        };
        let err = grammar.validate().expect_err("invalid tag");
        assert!(err.contains("grammar.action_tag"));
    }

    #[test]
    fn rejects_identical_inner_markers() {
        let grammar = Grammar {
            file_tag: "diff".to_string(),
            ..Grammar::default()
        };
        assert!(grammar.validate().is_err());
    }
}
