//! Size specification parsing.
//!
//! Target sizes are encoded in the object key as one or more
//! `<width>x<height>` groups joined by `-` or `_`:
//!
//! ```text
//! 700x700
//! 700x700_1800x1800
//! 700x700-1800x1800
//! 500x500_700x700-1800x1800
//! ```
//!
//! The first such run in the key wins. Parsing is a small hand-rolled scanner
//! so edge cases (trailing separators, zero padding) stay explicit.

use crate::error::{PipelineError, Result};
use std::fmt;

/// One `<width>x<height>` group taken from a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SizeToken {
    pub width: u32,
    pub height: u32,
    /// The exact text that produced this token, zero padding included.
    pub literal: String,
}

impl SizeToken {
    /// Parses a single `<digits>x<digits>` literal.
    pub fn parse(literal: &str) -> Result<Self> {
        let invalid = |reason: &str| PipelineError::InvalidSizeToken {
            token: literal.to_string(),
            reason: reason.to_string(),
        };

        let (w, h) = literal
            .split_once('x')
            .ok_or_else(|| invalid("expected <width>x<height>"))?;

        let width = parse_dimension(w).map_err(|reason| invalid(&reason))?;
        let height = parse_dimension(h).map_err(|reason| invalid(&reason))?;

        Ok(Self {
            width,
            height,
            literal: literal.to_string(),
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl fmt::Display for SizeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.literal)
    }
}

fn parse_dimension(digits: &str) -> std::result::Result<u32, String> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("'{}' is not an unsigned integer", digits));
    }
    let value: u32 = digits
        .parse()
        .map_err(|_| format!("'{}' is out of range", digits))?;
    if value == 0 {
        return Err("dimensions must be positive".to_string());
    }
    Ok(value)
}

/// The size run found in a key, with its position and the tokens it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeSpecMatch {
    /// Full matched text, e.g. `700x700_1800x1800`.
    pub matched: String,
    /// Byte offset of `matched` in the key.
    pub start: usize,
    pub tokens: Vec<SizeToken>,
    /// Separators between consecutive tokens; always `tokens.len() - 1` long.
    pub separators: Vec<char>,
}

impl SizeSpecMatch {
    /// Byte offset one past the end of the match.
    pub fn end(&self) -> usize {
        self.start + self.matched.len()
    }

    /// Joins the token literals back together with the original separators.
    pub fn reassemble(&self) -> String {
        let mut out = String::with_capacity(self.matched.len());
        for (i, token) in self.tokens.iter().enumerate() {
            if i > 0 {
                out.push(self.separators[i - 1]);
            }
            out.push_str(&token.literal);
        }
        out
    }
}

/// Locates the first size run in `key` and splits it into tokens.
///
/// # Errors
/// * `MissingSizeSpec` if the key holds no `<digits>x<digits>` group
/// * `InvalidSizeToken` if a group does not describe a positive size
///
/// # Example
/// ```
/// use img_fanout::size_spec::parse_size_spec;
///
/// let spec = parse_size_spec("originals/a/700x700_1800x1800/img.jpg").unwrap();
/// assert_eq!(spec.matched, "700x700_1800x1800");
/// assert_eq!(spec.tokens.len(), 2);
/// ```
pub fn parse_size_spec(key: &str) -> Result<SizeSpecMatch> {
    let (start, end) = scan(key).ok_or_else(|| PipelineError::MissingSizeSpec {
        key: key.to_string(),
    })?;
    let matched = &key[start..end];

    let mut tokens = Vec::new();
    let mut separators = Vec::new();
    let mut literal_start = 0;
    for (i, c) in matched.char_indices() {
        if c == '-' || c == '_' {
            tokens.push(SizeToken::parse(&matched[literal_start..i])?);
            separators.push(c);
            literal_start = i + 1;
        }
    }
    tokens.push(SizeToken::parse(&matched[literal_start..])?);

    Ok(SizeSpecMatch {
        matched: matched.to_string(),
        start,
        tokens,
        separators,
    })
}

/// Returns the byte range of the first size run in `key`.
///
/// A separator is only consumed when another group follows it, so
/// `700x700_` yields `700x700`.
pub fn scan(key: &str) -> Option<(usize, usize)> {
    let bytes = key.as_bytes();
    let start = (0..bytes.len()).find(|&i| group_len(bytes, i).is_some())?;

    let mut end = start + group_len(bytes, start)?;
    while let Some(&sep) = bytes.get(end) {
        if sep != b'-' && sep != b'_' {
            break;
        }
        match group_len(bytes, end + 1) {
            Some(len) => end += 1 + len,
            None => break,
        }
    }
    Some((start, end))
}

fn group_len(bytes: &[u8], at: usize) -> Option<usize> {
    let width = digit_run(bytes, at);
    if width == 0 || bytes.get(at + width) != Some(&b'x') {
        return None;
    }
    let height = digit_run(bytes, at + width + 1);
    if height == 0 {
        return None;
    }
    Some(width + 1 + height)
}

fn digit_run(bytes: &[u8], at: usize) -> usize {
    bytes
        .get(at..)
        .map(|rest| rest.iter().take_while(|b| b.is_ascii_digit()).count())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn literals(spec: &SizeSpecMatch) -> Vec<&str> {
        spec.tokens.iter().map(|t| t.literal.as_str()).collect()
    }

    #[test]
    fn test_single_token() {
        let spec = parse_size_spec("originals/700x700/img.png").unwrap();
        assert_eq!(spec.matched, "700x700");
        assert_eq!(spec.start, "originals/".len());
        assert_eq!(spec.tokens[0].dimensions(), (700, 700));
        assert!(spec.separators.is_empty());
    }

    #[test]
    fn test_mixed_separators_keep_order() {
        let spec = parse_size_spec("originals/500x500_700x700-1800x1800/img.png").unwrap();
        assert_eq!(literals(&spec), vec!["500x500", "700x700", "1800x1800"]);
        assert_eq!(spec.separators, vec!['_', '-']);
        assert_eq!(spec.reassemble(), spec.matched);
    }

    #[test]
    fn test_non_square_token() {
        let spec = parse_size_spec("originals/1200x630/og.jpg").unwrap();
        assert_eq!(spec.tokens[0].width, 1200);
        assert_eq!(spec.tokens[0].height, 630);
    }

    #[test]
    fn test_first_run_wins() {
        let spec = parse_size_spec("originals/10x10/nested/20x20/img.png").unwrap();
        assert_eq!(spec.matched, "10x10");
    }

    #[test]
    fn test_trailing_separator_not_matched() {
        let spec = parse_size_spec("originals/700x700_/img.png").unwrap();
        assert_eq!(spec.matched, "700x700");
        assert_eq!(spec.end(), "originals/700x700".len());
    }

    #[test]
    fn test_zero_padding_is_kept_in_literal() {
        let spec = parse_size_spec("originals/0700x0700/img.png").unwrap();
        assert_eq!(spec.tokens[0].literal, "0700x0700");
        assert_eq!(spec.tokens[0].dimensions(), (700, 700));
    }

    #[test]
    fn test_missing_size_spec() {
        let result = parse_size_spec("originals/a/img.jpg");
        assert!(matches!(
            result,
            Err(PipelineError::MissingSizeSpec { key }) if key == "originals/a/img.jpg"
        ));
    }

    #[test]
    fn test_incomplete_groups_are_not_matches() {
        assert!(scan("originals/700x/img.png").is_none());
        assert!(scan("originals/x700/img.png").is_none());
        assert!(scan("").is_none());
    }

    #[test]
    fn test_zero_dimension_is_fatal() {
        let result = parse_size_spec("originals/0x700/img.png");
        assert!(matches!(result, Err(PipelineError::InvalidSizeToken { .. })));
    }

    #[test]
    fn test_overflowing_dimension_is_fatal() {
        let result = parse_size_spec("originals/99999999999x10/img.png");
        assert!(matches!(
            result,
            Err(PipelineError::InvalidSizeToken { token, .. }) if token == "99999999999x10"
        ));
    }

    #[test]
    fn test_token_parse_rejects_garbage() {
        assert!(SizeToken::parse("700").is_err());
        assert!(SizeToken::parse("7a0x700").is_err());
        assert!(SizeToken::parse("x").is_err());
    }

    #[test]
    fn test_token_display_is_literal() {
        let token = SizeToken::parse("007x9").unwrap();
        assert_eq!(token.to_string(), "007x9");
    }
}
