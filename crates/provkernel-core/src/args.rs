//! # Component Arguments
//!
//! Components receive their configuration as one opaque string. The
//! built-in components read it as whitespace separated `key=value` pairs,
//! where a value may be wrapped in single or double quotes to contain
//! spaces: `a=b c='d e' f="g h"`.

use crate::KernelError;
use std::collections::BTreeMap;

/// Parse `key=value` pairs. Later duplicates overwrite earlier ones.
pub fn parse_key_values(input: &str) -> Result<BTreeMap<String, String>, KernelError> {
    let mut map = BTreeMap::new();
    let mut chars = input.trim().chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && !c.is_whitespace()) {
            key.push(c);
        }
        if key.is_empty() || chars.next_if_eq(&'=').is_none() {
            return Err(KernelError::InvalidArguments(format!(
                "expected key=value, found '{}'",
                key
            )));
        }

        let mut value = String::new();
        match chars.peek().copied() {
            Some(quote @ ('\'' | '"')) => {
                chars.next();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == quote {
                        closed = true;
                        break;
                    }
                    value.push(c);
                }
                if !closed {
                    return Err(KernelError::InvalidArguments(format!(
                        "no ending quote for key '{}'",
                        key
                    )));
                }
            }
            _ => {
                while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                    value.push(c);
                }
            }
        }
        map.insert(key, value);
    }

    Ok(map)
}

/// Parse a boolean word: `true/1/on/yes` or `false/0/off/no`.
pub fn parse_bool(value: &str) -> Result<bool, KernelError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Ok(true),
        "false" | "0" | "off" | "no" => Ok(false),
        _ => Err(KernelError::InvalidArguments(format!(
            "not a boolean: '{}'",
            value
        ))),
    }
}

/// Fetch a required key.
pub fn require<'a>(map: &'a BTreeMap<String, String>, key: &str) -> Result<&'a str, KernelError> {
    map.get(key)
        .map(String::as_str)
        .ok_or_else(|| KernelError::InvalidArguments(format!("missing '{}'", key)))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_and_quoted_values() {
        let map = parse_key_values(r#"a=b c='d e' f="g h""#).expect("parse");
        assert_eq!(map.get("a").map(String::as_str), Some("b"));
        assert_eq!(map.get("c").map(String::as_str), Some("d e"));
        assert_eq!(map.get("f").map(String::as_str), Some("g h"));
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_key_values("   ").expect("parse").is_empty());
    }

    #[test]
    fn test_trailing_equals_gives_empty_value() {
        let map = parse_key_values("path=").expect("parse");
        assert_eq!(map.get("path").map(String::as_str), Some(""));
    }

    #[test]
    fn test_unterminated_quote_fails() {
        assert!(parse_key_values("a='oops").is_err());
    }

    #[test]
    fn test_bare_word_fails() {
        assert!(parse_key_values("verbose").is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("ON"), Ok(true));
        assert_eq!(parse_bool(" no "), Ok(false));
        assert!(parse_bool("maybe").is_err());
    }
}
