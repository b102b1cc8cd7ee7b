use crate::error::app_error::AppError;
use regex::{Regex, RegexBuilder};

/// A term the replica was not supposed to say.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub term: String,
}

/// Screens replica speech for signs that the agent drifted off its script.
pub trait ContentInspector: Send + Sync {
    fn inspect(&self, text: &str) -> Option<Finding>;
}

/// Case-insensitive whole-word match against a configured list of terms.
#[derive(Debug, Clone)]
pub struct KeywordInspector {
    pattern: Option<Regex>,
}

impl KeywordInspector {
    pub fn new(terms: &[String]) -> Result<Self, AppError> {
        let alternatives: Vec<String> = terms
            .iter()
            .map(|term| term.trim())
            .filter(|term| !term.is_empty())
            .map(regex::escape)
            .collect();

        if alternatives.is_empty() {
            return Ok(Self { pattern: None });
        }

        let pattern = RegexBuilder::new(&format!(r"\b(?:{})\b", alternatives.join("|")))
            .case_insensitive(true)
            .build()
            .map_err(|e| AppError::Configuration {
                status: 500,
                message: format!("invalid guardrail terms: {e}"),
            })?;

        Ok(Self { pattern: Some(pattern) })
    }

    pub fn is_enabled(&self) -> bool {
        self.pattern.is_some()
    }
}

impl ContentInspector for KeywordInspector {
    fn inspect(&self, text: &str) -> Option<Finding> {
        let found = self.pattern.as_ref()?.find(text)?;
        Some(Finding {
            term: found.as_str().to_lowercase(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inspector(terms: &[&str]) -> KeywordInspector {
        KeywordInspector::new(&terms.iter().map(|t| t.to_string()).collect::<Vec<_>>()).unwrap()
    }

    #[test]
    fn matches_whole_words_ignoring_case() {
        let inspector = inspector(&["guarantee", "free trial"]);

        assert_eq!(
            inspector.inspect("We GUARANTEE results"),
            Some(Finding {
                term: "guarantee".to_string()
            })
        );
        assert!(inspector.inspect("You get a Free Trial today").is_some());
        assert!(inspector.inspect("our guarantees are listed online").is_none());
        assert!(inspector.inspect("nothing to see").is_none());
    }

    #[test]
    fn terms_are_literal_not_patterns() {
        let inspector = inspector(&["v1.0"]);
        assert!(inspector.inspect("release v1.0 is out").is_some());
        assert!(inspector.inspect("release v1x0 is out").is_none());
    }

    #[test]
    fn empty_list_disables_inspection() {
        let inspector = inspector(&["", "  "]);
        assert!(!inspector.is_enabled());
        assert!(inspector.inspect("anything at all").is_none());
    }
}
