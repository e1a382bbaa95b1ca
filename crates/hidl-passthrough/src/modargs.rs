//! Module argument parsing.
//!
//! Arguments are `key=value` pairs separated by whitespace. Values may be
//! quoted with `'` or `"`; a backslash escapes the next character in unquoted
//! and double-quoted values. Unknown and repeated keys are rejected.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModArgsError {
    #[error("unknown argument '{0}'")]
    UnknownKey(String),
    #[error("argument '{0}' given more than once")]
    DuplicateKey(String),
    #[error("expected key=value, got '{0}'")]
    MissingValue(String),
    #[error("unterminated quote in value of '{0}'")]
    UnterminatedQuote(String),
    #[error("'{key}' is a boolean argument, got '{value}'")]
    InvalidBoolean { key: String, value: String },
}

#[derive(Debug, Clone, Default)]
pub struct ModArgs {
    values: HashMap<String, String>,
}

impl ModArgs {
    /// Parse `args` accepting only keys listed in `valid_keys`.
    pub fn parse(args: Option<&str>, valid_keys: &[&str]) -> Result<Self, ModArgsError> {
        let mut values = HashMap::new();
        let Some(args) = args else {
            return Ok(Self { values });
        };

        let mut chars = args.chars().peekable();
        loop {
            while chars.next_if(|c| c.is_whitespace()).is_some() {}
            if chars.peek().is_none() {
                break;
            }

            let mut key = String::new();
            while let Some(c) = chars.next_if(|c| *c != '=' && !c.is_whitespace()) {
                key.push(c);
            }
            if chars.next_if_eq(&'=').is_none() {
                return Err(ModArgsError::MissingValue(key));
            }

            let mut value = String::new();
            match chars.peek().copied() {
                Some(quote @ ('\'' | '"')) => {
                    chars.next();
                    let mut closed = false;
                    while let Some(c) = chars.next() {
                        if c == quote {
                            closed = true;
                            break;
                        }
                        if c == '\\' && quote == '"' {
                            if let Some(escaped) = chars.next() {
                                value.push(escaped);
                            }
                            continue;
                        }
                        value.push(c);
                    }
                    if !closed {
                        return Err(ModArgsError::UnterminatedQuote(key));
                    }
                }
                _ => {
                    while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                        if c == '\\' {
                            if let Some(escaped) = chars.next() {
                                value.push(escaped);
                            }
                            continue;
                        }
                        value.push(c);
                    }
                }
            }

            if !valid_keys.contains(&key.as_str()) {
                return Err(ModArgsError::UnknownKey(key));
            }
            if values.contains_key(&key) {
                return Err(ModArgsError::DuplicateKey(key));
            }
            values.insert(key, value);
        }

        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Boolean value of `key`, `Ok(None)` when absent.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, ModArgsError> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => parse_bool(v)
                .map(Some)
                .ok_or_else(|| ModArgsError::InvalidBoolean {
                    key: key.to_string(),
                    value: v.to_string(),
                }),
        }
    }
}

/// Parse a boolean the way module arguments spell them.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "y" | "t" | "yes" | "true" | "on" => Some(true),
        "0" | "n" | "f" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}
