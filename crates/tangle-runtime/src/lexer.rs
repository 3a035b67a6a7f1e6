#[derive(Clone, PartialEq, Eq, Debug)]
pub struct LexerPosition {
    position: u32,
}

/// Byte cursor handed to lexers and external scanners.
///
/// Every byte the lexer looks at is recorded, the furthest one becomes the
/// token's lookahead so that an edit touching it invalidates the token.
pub struct Lexer<'a> {
    start: u32,
    position: u32,
    max_position: u32,
    token_end: Option<u32>,
    bytes: &'a [u8],
}

/// Extent of a finished token, relative to its start.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TokenExtent {
    pub size: u32,
    pub lookahead: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(bytes: &'a [u8], start: u32) -> Lexer<'a> {
        Lexer {
            start,
            position: start,
            max_position: start,
            token_end: None,
            bytes,
        }
    }

    fn update_max_position(&mut self, position: u32) {
        self.max_position = std::cmp::max(self.max_position, position);
    }

    pub fn save_position(&self) -> LexerPosition {
        LexerPosition {
            position: self.position,
        }
    }

    pub fn restore_position(&mut self, state: LexerPosition) {
        self.update_max_position(self.position);
        self.position = state.position;
    }

    /// Absolute offset of the cursor.
    pub fn position(&self) -> u32 {
        self.position
    }

    /// Number of bytes consumed since the token start.
    pub fn consumed(&self) -> u32 {
        self.position - self.start
    }

    pub fn advance(&mut self, count: u32) -> bool {
        debug_assert!(count != 0, "Advancing by 0 is forbidden");

        let new_position = self.position + count;
        if new_position as usize > self.bytes.len() {
            self.update_max_position(new_position);
            false
        } else {
            self.position = new_position;
            self.update_max_position(new_position);
            true
        }
    }

    /// Reads the byte `offset` bytes past the cursor.
    pub fn peek(&mut self, offset: u32) -> Option<u8> {
        let index = self.position + offset;
        self.update_max_position(index + 1);
        self.bytes.get(index as usize).copied()
    }

    pub fn lookahead(&mut self) -> Option<u8> {
        self.peek(0)
    }

    pub fn is_eof(&mut self) -> bool {
        self.lookahead().is_none()
    }

    pub fn starts_with(&mut self, prefix: &[u8]) -> bool {
        let position = self.position as usize;
        let end = position + prefix.len();
        self.update_max_position(end as u32);
        self.bytes.get(position..end) == Some(prefix)
    }

    /// Advances while `fun` accepts the next byte, returns how many bytes were taken.
    pub fn advance_while(&mut self, mut fun: impl FnMut(u8) -> bool) -> u32 {
        let mut count = 0;
        while let Some(byte) = self.lookahead() {
            if !fun(byte) {
                break;
            }
            self.position += 1;
            count += 1;
        }
        count
    }

    /// Fixes the end of the current token at the cursor, scanning may continue past it.
    pub fn mark_end(&mut self) {
        self.token_end = Some(self.position);
    }

    pub(crate) fn finish_token(&mut self) -> TokenExtent {
        self.update_max_position(self.position);
        let end = self.token_end.unwrap_or(self.position);
        TokenExtent {
            size: end - self.start,
            lookahead: self.max_position.saturating_sub(end),
        }
    }

    /// Rewinds to the token start, keeping the recorded lookahead.
    pub(crate) fn reset(&mut self) {
        self.update_max_position(self.position);
        self.position = self.start;
        self.token_end = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookahead_includes_peeked_bytes() {
        let mut lexer = Lexer::new(b"abc def", 0);
        lexer.advance_while(|b| b.is_ascii_alphabetic());
        let extent = lexer.finish_token();
        assert_eq!(extent.size, 3);
        // the space that stopped the loop was inspected
        assert_eq!(extent.lookahead, 1);
    }

    #[test]
    fn mark_end_excludes_trailing_scan() {
        let mut lexer = Lexer::new(b"xx)end\"", 0);
        lexer.advance(2);
        lexer.mark_end();
        lexer.advance(4);
        let extent = lexer.finish_token();
        assert_eq!(extent.size, 2);
        assert_eq!(extent.lookahead, 4);
    }

    #[test]
    fn eof_peek_counts_one_past_end() {
        let mut lexer = Lexer::new(b"ab", 1);
        lexer.advance(1);
        assert!(lexer.is_eof());
        let extent = lexer.finish_token();
        assert_eq!(extent, TokenExtent { size: 1, lookahead: 1 });
    }

    #[test]
    fn restore_keeps_max_position() {
        let mut lexer = Lexer::new(b"abcdef", 0);
        let start = lexer.save_position();
        lexer.advance(4);
        lexer.restore_position(start);
        lexer.advance(1);
        let extent = lexer.finish_token();
        assert_eq!(extent, TokenExtent { size: 1, lookahead: 3 });
    }
}
