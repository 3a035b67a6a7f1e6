//! Context free tokens of the language.
//!
//! Every rule that matches at the cursor proposes a candidate and the longest one
//! the parser can accept wins, so `>>` splits into two `>` inside template argument
//! lists. When none is acceptable the longest candidate is returned anyway and the
//! parser recovers from it.

use tangle_runtime::lexer::Lexer;

/// Identifier spellings which always lex as the keyword.
pub const KEYWORDS: &[&str] = &[
    "NULL", "break", "case", "class", "const", "constexpr", "continue", "default", "do",
    "else", "enum", "extern", "false", "for", "if", "inline", "long", "mutable",
    "namespace", "nullptr", "private", "protected", "public", "register", "return",
    "short", "signed", "sizeof", "static", "struct", "switch", "template", "this",
    "thread_local", "true", "typedef", "typename", "union", "unsigned", "volatile",
    "while",
];

pub const PRIMITIVE_TYPES: &[&str] = &["auto", "bool", "char", "double", "float", "int", "void"];

/// Punctuation, longest spellings first.
const OPERATORS: &[&str] = &[
    "...", "<<=", ">>=", "->", "++", "--", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||",
    "+=", "-=", "*=", "/=", "%=", "&=", "^=", "|=", "(", ")", "[", "]", "{", "}", ";", ",",
    ".", ":", "?", "=", "+", "-", "*", "/", "%", "<", ">", "!", "~", "&", "^", "|", "\"",
];

/// Tokens opening a raw string literal.
const RAW_STRING_PREFIXES: &[&str] = &["R\"", "LR\"", "uR\"", "UR\"", "u8R\""];

const STRING_PREFIXES: &[&[u8]] = &[b"u8", b"L", b"u", b"U"];

pub fn lex(lexer: &mut Lexer, valid: &dyn Fn(&str) -> bool) -> Option<&'static str> {
    let first = lexer.lookahead()?;

    // tokens that nothing else can start with are taken right away
    if first.is_ascii_whitespace() {
        lexer.advance_while(|b| b.is_ascii_whitespace());
        return Some("_whitespace");
    }
    if first == b'#' {
        skip_line(lexer);
        return Some("preproc_directive");
    }
    if lexer.starts_with(b"//") {
        skip_line(lexer);
        return Some("comment");
    }
    if lexer.starts_with(b"/*") {
        lexer.advance(2);
        while !lexer.is_eof() && !lexer.starts_with(b"*/") {
            lexer.advance(1);
        }
        if !lexer.is_eof() {
            lexer.advance(2);
        }
        return Some("comment");
    }

    let mut candidates: Vec<(&'static str, u32)> = Vec::new();

    let word = word_len(lexer);
    if word > 0 {
        candidates.push((classify_word(lexer, word), word));
    }
    if let Some(len) = number_len(lexer) {
        candidates.push(("number_literal", len));
    }
    if let Some(len) = quoted_len(lexer, b'"') {
        candidates.push(("string_literal", len));
    }
    if let Some(len) = quoted_len(lexer, b'\'') {
        candidates.push(("char_literal", len));
    }
    for &prefix in RAW_STRING_PREFIXES {
        if lexer.starts_with(prefix.as_bytes()) {
            candidates.push((prefix, prefix.len() as u32));
        }
    }
    for &operator in OPERATORS {
        if lexer.starts_with(operator.as_bytes()) {
            candidates.push((operator, operator.len() as u32));
        }
    }

    let longest = |accept: &dyn Fn(&str) -> bool| {
        candidates
            .iter()
            .filter(|(name, _)| accept(name))
            .max_by_key(|&&(_, len)| len)
            .copied()
    };
    let (name, len) = longest(valid).or_else(|| longest(&|_| true))?;
    lexer.advance(len);
    Some(name)
}

fn skip_line(lexer: &mut Lexer) {
    loop {
        lexer.advance_while(|b| b != b'\n' && b != b'\\');
        match lexer.lookahead() {
            // a backslash continues the line when it ends it
            Some(b'\\') => {
                lexer.advance(1);
                if lexer.starts_with(b"\r\n") {
                    lexer.advance(2);
                } else if lexer.lookahead() == Some(b'\n') {
                    lexer.advance(1);
                }
            }
            _ => return,
        }
    }
}

fn is_word_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_' || byte >= 0x80
}

fn is_word_continue(byte: u8) -> bool {
    is_word_start(byte) || byte.is_ascii_digit()
}

fn word_len(lexer: &mut Lexer) -> u32 {
    let mut len = 0;
    while let Some(byte) = lexer.peek(len) {
        let accepted = match len {
            0 => is_word_start(byte),
            _ => is_word_continue(byte),
        };
        if !accepted {
            break;
        }
        len += 1;
    }
    len
}

fn classify_word(lexer: &mut Lexer, len: u32) -> &'static str {
    let mut word = Vec::with_capacity(len as usize);
    for offset in 0..len {
        if let Some(byte) = lexer.peek(offset) {
            word.push(byte);
        }
    }
    if let Some(&keyword) = KEYWORDS.iter().find(|k| k.as_bytes() == word.as_slice()) {
        return keyword;
    }
    if PRIMITIVE_TYPES.iter().any(|t| t.as_bytes() == word.as_slice()) {
        return "primitive_type";
    }
    "identifier"
}

fn number_len(lexer: &mut Lexer) -> Option<u32> {
    let first = lexer.peek(0)?;
    let starts = first.is_ascii_digit()
        || (first == b'.' && lexer.peek(1).map_or(false, |b| b.is_ascii_digit()));
    if !starts {
        return None;
    }

    let mut len = 0;
    let mut previous = 0u8;
    while let Some(byte) = lexer.peek(len) {
        let exponent_sign = matches!(byte, b'+' | b'-') && matches!(previous, b'e' | b'E' | b'p' | b'P');
        if !(byte.is_ascii_alphanumeric() || byte == b'.' || byte == b'\'' || byte == b'_' || exponent_sign) {
            break;
        }
        previous = byte;
        len += 1;
    }
    Some(len)
}

/// Length of a quoted literal with an optional encoding prefix, unterminated ones
/// stop at the end of the line.
fn quoted_len(lexer: &mut Lexer, quote: u8) -> Option<u32> {
    let mut len = STRING_PREFIXES
        .iter()
        .find(|prefix| lexer.starts_with(prefix) && lexer.peek(prefix.len() as u32) == Some(quote))
        .map_or(0, |prefix| prefix.len() as u32);
    if lexer.peek(len)? != quote {
        return None;
    }
    len += 1;

    while let Some(byte) = lexer.peek(len) {
        match byte {
            b'\\' => len += if lexer.peek(len + 1).is_some() { 2 } else { 1 },
            b'\n' => return Some(len),
            _ if byte == quote => return Some(len + 1),
            _ => len += 1,
        }
    }
    Some(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str, valid: &dyn Fn(&str) -> bool) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        let mut position = 0;
        while position < src.len() {
            let mut lexer = Lexer::new(src.as_bytes(), position as u32);
            let name = lex(&mut lexer, valid).unwrap_or("ERROR");
            let end = (lexer.position() as usize).max(position + 1);
            out.push((name, src[position..end].to_owned()));
            position = end;
        }
        out.retain(|(name, _)| *name != "_whitespace");
        out
    }

    fn all(_: &str) -> bool {
        true
    }

    #[test]
    fn keywords_are_reserved() {
        let names: Vec<_> = tokens("if iffy int x_1 sizeof", &all)
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, ["if", "identifier", "primitive_type", "identifier", "sizeof"]);
    }

    #[test]
    fn shift_splits_when_only_greater_is_valid() {
        let template_close = |name: &str| name != ">>";
        let names: Vec<_> = tokens("a>>b", &template_close)
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, ["identifier", ">", ">", "identifier"]);

        let names: Vec<_> = tokens("a>>=b", &all).into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["identifier", ">>=", "identifier"]);
    }

    #[test]
    fn literals() {
        assert_eq!(
            tokens(r#"1.5e-3 0x1F 'a' u8"s\"t" L'\''"#, &all),
            [
                ("number_literal", "1.5e-3".to_owned()),
                ("number_literal", "0x1F".to_owned()),
                ("char_literal", "'a'".to_owned()),
                ("string_literal", r#"u8"s\"t""#.to_owned()),
                ("char_literal", r"L'\''".to_owned()),
            ]
        );
    }

    #[test]
    fn raw_string_prefix_beats_identifier() {
        let names: Vec<_> = tokens(r#"R"(x"#, &all).into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["R\"", "(", "identifier"]);
        // `R` alone is a plain identifier
        let names: Vec<_> = tokens("R + u8", &all).into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["identifier", "+", "identifier"]);
    }

    #[test]
    fn comments_and_directives() {
        let src = "#define X \\\n  1\n/* a */ // b\nx";
        let names: Vec<_> = tokens(src, &all).into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["preproc_directive", "comment", "comment", "identifier"]);
    }

    #[test]
    fn unknown_bytes_are_not_tokens() {
        let mut lexer = Lexer::new(b"@", 0);
        assert_eq!(lex(&mut lexer, &all), None);
    }
}
