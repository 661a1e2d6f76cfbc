//! Collector number parsing

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};

/// `123/198`, spaces allowed around the slash
const NUMBER_TOTAL_PATTERN: &str = r"(\d{1,3})\s*/\s*(\d{1,3})";

/// A standalone 1-3 digit number
const BARE_NUMBER_PATTERN: &str = r"\b(\d{1,3})\b";

/// Card number and set total as printed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardNumber {
    pub number: Option<String>,
    pub total: Option<String>,
}

impl CardNumber {
    pub fn is_empty(&self) -> bool {
        self.number.is_none()
    }
}

/// Extracts `number/total` from OCR text
#[derive(Debug, Clone)]
pub struct NumberParser {
    with_total: Regex,
    bare: Regex,
}

impl NumberParser {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| ScanError::Config(format!("invalid pattern {}: {}", pattern, e)))
        };
        Ok(Self {
            with_total: compile(NUMBER_TOTAL_PATTERN)?,
            bare: compile(BARE_NUMBER_PATTERN)?,
        })
    }

    /// First `number/total` match, else the first bare number, else nothing
    pub fn parse(&self, text: &str) -> CardNumber {
        if let Some(caps) = self.with_total.captures(text) {
            return CardNumber {
                number: caps.get(1).map(|m| m.as_str().to_string()),
                total: caps.get(2).map(|m| m.as_str().to_string()),
            };
        }
        if let Some(caps) = self.bare.captures(text) {
            return CardNumber {
                number: caps.get(1).map(|m| m.as_str().to_string()),
                total: None,
            };
        }
        CardNumber::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> (Option<String>, Option<String>) {
        let parsed = NumberParser::new().unwrap().parse(text);
        (parsed.number, parsed.total)
    }

    fn some(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn test_number_with_total() {
        assert_eq!(parse("123/198"), (some("123"), some("198")));
        assert_eq!(parse("HP 120 ... 025 / 102 rare"), (some("025"), some("102")));
    }

    #[test]
    fn test_bare_number_fallback() {
        assert_eq!(parse("just a 47 here"), (some("47"), None));
        // Longer digit runs are not collector numbers
        assert_eq!(parse("id 12345 then 7"), (some("7"), None));
    }

    #[test]
    fn test_no_digits() {
        assert_eq!(parse("no digits"), (None, None));
        assert_eq!(parse(""), (None, None));
        assert!(NumberParser::new().unwrap().parse("none").is_empty());
    }

    #[test]
    fn test_first_match_wins() {
        assert_eq!(parse("4/10 and 5/11"), (some("4"), some("10")));
    }
}
