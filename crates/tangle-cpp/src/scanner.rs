//! External scanner for raw string literals, `R"delim( ... )delim"`.
//!
//! The opening delimiter is captured into the scanner state. Content runs until a
//! `)` followed by exactly that delimiter and a `"`, the closing delimiter token
//! must repeat it byte for byte.

use tangle_runtime::{
    lexer::Lexer,
    scanner::{ExternalScanner, ScannerStateError},
};

/// Order of the external tokens in the grammar.
pub const RAW_STRING_DELIMITER: usize = 0;
pub const RAW_STRING_CONTENT: usize = 1;

/// Longest delimiter the language allows.
pub const MAX_DELIMITER_LEN: usize = 16;

#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct RawStringScanner {
    delimiter: Vec<u8>,
}

impl RawStringScanner {
    pub fn new() -> RawStringScanner {
        RawStringScanner::default()
    }

    pub fn boxed() -> Box<dyn ExternalScanner> {
        Box::new(RawStringScanner::new())
    }

    /// Delimiter of the raw string being scanned, empty outside of one.
    pub fn delimiter(&self) -> &[u8] {
        &self.delimiter
    }

    fn scan_delimiter(&mut self, lexer: &mut Lexer) -> bool {
        if !self.delimiter.is_empty() {
            for i in 0..self.delimiter.len() {
                if lexer.lookahead() != Some(self.delimiter[i]) {
                    return false;
                }
                lexer.advance(1);
            }
            self.delimiter.clear();
            return true;
        }

        let mut delimiter = Vec::new();
        loop {
            let Some(byte) = lexer.lookahead() else {
                return false;
            };
            match byte {
                // an empty delimiter is left to the grammar's delimiter-less form
                b'(' => {
                    let found = !delimiter.is_empty();
                    if found {
                        self.delimiter = delimiter;
                    }
                    return found;
                }
                b')' | b'\\' | b'"' => return false,
                _ if byte.is_ascii_whitespace() => return false,
                _ if delimiter.len() == MAX_DELIMITER_LEN => return false,
                _ => {
                    delimiter.push(byte);
                    lexer.advance(1);
                }
            }
        }
    }

    fn scan_content(&self, lexer: &mut Lexer) -> bool {
        // bytes of the delimiter matched since the last `)`
        let mut matched: Option<usize> = None;
        loop {
            let Some(byte) = lexer.lookahead() else {
                // unterminated literals end at the end of input
                lexer.mark_end();
                return true;
            };
            if let Some(count) = matched {
                if count == self.delimiter.len() {
                    if byte == b'"' {
                        return true;
                    }
                    matched = None;
                } else if byte == self.delimiter[count] {
                    matched = Some(count + 1);
                } else {
                    matched = None;
                }
            }
            if matched.is_none() && byte == b')' {
                lexer.mark_end();
                matched = Some(0);
            }
            lexer.advance(1);
        }
    }
}

impl ExternalScanner for RawStringScanner {
    fn scan(&mut self, lexer: &mut Lexer, valid: &[bool]) -> Option<usize> {
        let delimiter = valid.get(RAW_STRING_DELIMITER).copied().unwrap_or(false);
        let content = valid.get(RAW_STRING_CONTENT).copied().unwrap_or(false);
        match (delimiter, content) {
            // only error recovery asks for both
            (true, true) => None,
            (true, false) => self.scan_delimiter(lexer).then_some(RAW_STRING_DELIMITER),
            (false, true) => self.scan_content(lexer).then_some(RAW_STRING_CONTENT),
            (false, false) => None,
        }
    }

    fn serialize(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.delimiter);
    }

    fn deserialize(&mut self, bytes: &[u8]) -> Result<(), ScannerStateError> {
        if bytes.len() > MAX_DELIMITER_LEN {
            return Err(ScannerStateError::new(format!(
                "raw string delimiter of {} bytes, at most {MAX_DELIMITER_LEN} are allowed",
                bytes.len()
            )));
        }
        self.delimiter.clear();
        self.delimiter.extend_from_slice(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Text of the opening delimiter recognized at the start of `src`.
    fn opening(scanner: &mut RawStringScanner, src: &str) -> Option<String> {
        let mut lexer = Lexer::new(src.as_bytes(), 0);
        scanner.scan(&mut lexer, &[true, false])?;
        Some(src[..lexer.position() as usize].to_owned())
    }

    #[test]
    fn opening_delimiter_is_captured() {
        let mut scanner = RawStringScanner::new();
        assert_eq!(opening(&mut scanner, "abc(text)abc\"").as_deref(), Some("abc"));
        assert_eq!(scanner.delimiter(), b"abc");
    }

    #[test]
    fn empty_and_malformed_delimiters_are_rejected() {
        let mut scanner = RawStringScanner::new();
        assert_eq!(opening(&mut scanner, "(text)\""), None);
        assert_eq!(opening(&mut scanner, "a b("), None);
        assert_eq!(opening(&mut scanner, "a\\b("), None);
        assert_eq!(opening(&mut scanner, "\";"), None);
        let long = format!("{}(", "x".repeat(MAX_DELIMITER_LEN + 1));
        assert_eq!(opening(&mut scanner, &long), None);
        assert!(scanner.delimiter().is_empty());
    }

    #[test]
    fn content_ends_only_at_the_exact_delimiter() {
        let mut scanner = RawStringScanner::new();
        scanner.deserialize(b"abc").unwrap();
        let mut lexer = Lexer::new(b"text)a(text)ab\"x)abcd\"y)abc\"", 0);
        assert_eq!(scanner.scan(&mut lexer, &[false, true]), Some(RAW_STRING_CONTENT));
        // the cursor stopped on the final quote
        assert_eq!(lexer.position(), 27);
    }

    #[test]
    fn closing_delimiter_must_repeat_the_opening_one() {
        let mut scanner = RawStringScanner::new();
        scanner.deserialize(b"abc").unwrap();
        let mut lexer = Lexer::new(b"ab\"", 0);
        assert_eq!(scanner.scan(&mut lexer, &[true, false]), None);

        let mut lexer = Lexer::new(b"abc\"", 0);
        assert_eq!(scanner.scan(&mut lexer, &[true, false]), Some(RAW_STRING_DELIMITER));
        assert!(scanner.delimiter().is_empty());
    }

    #[test]
    fn state_round_trips() {
        let mut scanner = RawStringScanner::new();
        scanner.deserialize(b"tag").unwrap();
        let mut buffer = Vec::new();
        scanner.serialize(&mut buffer);

        let mut restored = RawStringScanner::new();
        restored.deserialize(&buffer).unwrap();
        assert_eq!(restored, scanner);

        assert!(restored.deserialize(&[b'x'; MAX_DELIMITER_LEN + 1]).is_err());
        assert!(restored.deserialize(&[]).is_ok());
        assert!(restored.delimiter().is_empty());
    }

    #[test]
    fn recovery_requests_are_declined() {
        let mut scanner = RawStringScanner::new();
        let mut lexer = Lexer::new(b"abc(", 0);
        assert_eq!(scanner.scan(&mut lexer, &[true, true]), None);
    }
}
