//! Lexer for the TC kernel language.
//!
//! Tokenization is driven by a trie of all multi-character operators and
//! keywords merged with the single-character operator set. The trie and the
//! operator precedence tables are built once and shared, read-only, across
//! all lexers.

use crate::frontend::token::{Token, TokenKind, NUM_SUFFIXES};
use crate::utils::errors::LexError;
use crate::utils::location::{SourceFile, SourceRange};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;

/// Nested hash tables indicating byte-by-byte what is a valid token.
#[derive(Debug, Default)]
struct TokenTrie {
    kind: Option<TokenKind>,
    children: HashMap<u8, TokenTrie>,
}

impl TokenTrie {
    fn insert(&mut self, s: &[u8], kind: TokenKind) {
        match s.split_first() {
            None => {
                debug_assert!(self.kind.is_none(), "duplicate token spelling");
                self.kind = Some(kind);
            }
            Some((first, rest)) => {
                self.children.entry(*first).or_default().insert(rest, kind);
            }
        }
    }

    fn child(&self, b: u8) -> Option<&TokenTrie> {
        self.children.get(&b)
    }
}

/// Data shared by all lexers and parsers, initialized once.
pub struct SharedLexerData {
    trie: TokenTrie,
    binary_prec: HashMap<TokenKind, u8>,
    unary_prec: HashMap<TokenKind, u8>,
}

impl SharedLexerData {
    fn build() -> Self {
        let mut trie = TokenTrie::default();
        for kind in TokenKind::all_spelled() {
            if let Some(s) = kind.token_str() {
                trie.insert(s.as_bytes(), kind);
            }
        }

        // Binary operators, listed in increasing order of precedence.
        let binary_ops: &[&[TokenKind]] = &[
            &[TokenKind::Question],
            &[TokenKind::OrOr],
            &[TokenKind::AndAnd],
            &[
                TokenKind::Gt,
                TokenKind::Lt,
                TokenKind::Ge,
                TokenKind::Le,
                TokenKind::EqEq,
                TokenKind::Ne,
            ],
            &[TokenKind::Plus, TokenKind::Minus],
            &[TokenKind::Star, TokenKind::Slash, TokenKind::Percent],
        ];
        let unary_ops: &[&[TokenKind]] = &[&[TokenKind::Minus, TokenKind::Bang]];

        // Precedence starts at 1 so 0 is lower than any operator.
        let mut binary_prec = HashMap::new();
        let mut prec = 1u8;
        for group in binary_ops {
            for kind in group.iter() {
                binary_prec.insert(*kind, prec);
            }
            prec += 1;
        }
        let mut unary_prec = HashMap::new();
        for group in unary_ops {
            for kind in group.iter() {
                unary_prec.insert(*kind, prec);
            }
            prec += 1;
        }

        Self {
            trie,
            binary_prec,
            unary_prec,
        }
    }

    /// Binary precedence of a token kind, if it is a binary operator.
    pub fn binary_prec(&self, kind: TokenKind) -> Option<u8> {
        self.binary_prec.get(&kind).copied()
    }

    /// Unary precedence of a token kind, if it is a unary operator.
    pub fn unary_prec(&self, kind: TokenKind) -> Option<u8> {
        self.unary_prec.get(&kind).copied()
    }

    /// Whether a binary operator is right-associative.
    pub fn is_right_associative(&self, kind: TokenKind) -> bool {
        matches!(kind, TokenKind::Question)
    }
}

/// The process-wide shared lexer data.
pub fn shared_data() -> &'static SharedLexerData {
    static SHARED: Lazy<SharedLexerData> = Lazy::new(SharedLexerData::build);
    &SHARED
}

/// Scan a numeric literal at `bytes[pos..]`.
///
/// Returns the total length (including a recognized type suffix) or `None`
/// if no valid number starts here. A literal containing `.` or `e` is a
/// float and only accepts `f*` suffixes.
fn scan_number(bytes: &[u8], pos: usize) -> Option<usize> {
    let mut i = pos;
    let mut digits = false;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
        digits = true;
    }
    let mut is_float = false;
    if i < bytes.len() && bytes[i] == b'.' {
        let mut j = i + 1;
        let mut frac_digits = false;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
            frac_digits = true;
        }
        if digits || frac_digits {
            is_float = true;
            i = j;
            digits = digits || frac_digits;
        }
    }
    if !digits {
        return None;
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        let exp_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_start {
            is_float = true;
            i = j;
        }
    }

    let rest = &bytes[i..];
    for suffix in NUM_SUFFIXES {
        if rest.starts_with(suffix.as_bytes()) {
            // Float literals must carry a float type suffix.
            if is_float && !suffix.starts_with('f') {
                return None;
            }
            return Some(i - pos + suffix.len());
        }
    }

    // Constant without type suffix.
    Some(i - pos)
}

fn valid_ident_byte(i: usize, b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || (i > 0 && b.is_ascii_digit())
}

/// A lexer over one shared source buffer, with one token of lookahead.
pub struct Lexer {
    /// The shared source file.
    pub file: Arc<SourceFile>,
    pos: usize,
    line: usize,
    col: usize,
    cur: Token,
    ahead: Option<Token>,
}

impl Lexer {
    /// Create a lexer and read the first token.
    pub fn new(source: &str, filename: &str) -> Result<Self, LexError> {
        let file = SourceFile::new(filename, source);
        let mut lexer = Self {
            cur: Token::new(
                TokenKind::Eof,
                String::new(),
                SourceRange::start_of(file.clone()),
            ),
            file,
            pos: 0,
            line: 1,
            col: 1,
            ahead: None,
        };
        lexer.cur = lexer.lex()?;
        Ok(lexer)
    }

    /// The current token.
    pub fn cur(&self) -> &Token {
        &self.cur
    }

    /// Peek one token past the current one.
    pub fn lookahead(&mut self) -> Result<&Token, LexError> {
        if self.ahead.is_none() {
            let t = self.lex()?;
            self.ahead = Some(t);
        }
        match &self.ahead {
            Some(t) => Ok(t),
            None => Err(LexError::new("lookahead unavailable", self.cur.range.clone())),
        }
    }

    /// Advance, returning the token that was current.
    pub fn next(&mut self) -> Result<Token, LexError> {
        let next = match self.ahead.take() {
            Some(t) => t,
            None => self.lex()?,
        };
        Ok(std::mem::replace(&mut self.cur, next))
    }

    /// Advance if the current token has the given kind.
    pub fn next_if(&mut self, kind: TokenKind) -> Result<bool, LexError> {
        if self.cur.kind == kind {
            self.next()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Consume a token of the given kind or fail.
    pub fn expect(&mut self, kind: TokenKind) -> Result<Token, LexError> {
        if self.cur.kind != kind {
            return Err(LexError::new(
                format!("expected {}, found {}", kind.name(), self.cur.kind.name()),
                self.cur.range.clone(),
            ));
        }
        self.next()
    }

    fn advance_byte(&mut self) {
        let b = self.file.contents.as_bytes()[self.pos];
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            let len = self.file.contents.len();
            while self.pos < len && self.file.contents.as_bytes()[self.pos].is_ascii_whitespace() {
                self.advance_byte();
            }
            let len = self.file.contents.len();
            if self.pos < len && self.file.contents.as_bytes()[self.pos] == b'#' {
                let len = self.file.contents.len();
                while self.pos < len && self.file.contents.as_bytes()[self.pos] != b'\n' {
                    self.advance_byte();
                }
                continue;
            }
            break;
        }
    }

    fn make_range(
        &self,
        start: usize,
        start_line: usize,
        start_col: usize,
    ) -> SourceRange {
        SourceRange::new(
            self.file.clone(),
            start,
            self.pos,
            start_line,
            start_col,
            self.line,
            self.col,
        )
    }

    fn lex(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace_and_comments();

        let bytes = self.file.contents.as_bytes();
        let (start, start_line, start_col) = (self.pos, self.line, self.col);

        if self.pos == bytes.len() {
            return Ok(Token::new(
                TokenKind::Eof,
                String::new(),
                self.make_range(start, start_line, start_col),
            ));
        }

        // Numbers are recognized before anything else so that e.g. "1e3"
        // never splits into a number and an identifier.
        if let Some(len) = scan_number(bytes, self.pos) {
            for _ in 0..len {
                self.advance_byte();
            }
            let range = self.make_range(start, start_line, start_col);
            let lexeme = range.text().to_string();
            return Ok(Token::new(TokenKind::Number, lexeme, range));
        }

        // Scan simultaneously for the longest trie match and the longest
        // identifier prefix. The trie wins ties so that e.g. `max` is the
        // keyword rather than an identifier.
        let shared = shared_data();
        let mut matched: Option<(TokenKind, usize)> = None;
        let mut node = Some(&shared.trie);
        let mut ident = true;
        let mut i = 0;
        while self.pos + i < bytes.len() && (ident || node.is_some()) {
            let b = bytes[self.pos + i];
            ident = ident && valid_ident_byte(i, b);
            if ident {
                matched = Some((TokenKind::Ident, i + 1));
            }
            node = node.and_then(|n| n.child(b));
            if let Some(n) = node {
                if let Some(kind) = n.kind {
                    matched = Some((kind, i + 1));
                }
            }
            i += 1;
        }

        match matched {
            Some((kind, len)) => {
                for _ in 0..len {
                    self.advance_byte();
                }
                let range = self.make_range(start, start_line, start_col);
                let lexeme = range.text().to_string();
                Ok(Token::new(kind, lexeme, range))
            }
            None => {
                self.advance_byte();
                let range = self.make_range(start, start_line, start_col);
                Err(LexError::new(
                    format!("expected a valid token, found '{}'", range.text()),
                    range,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_kinds(source: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(source, "test.tc").unwrap();
        let mut kinds = Vec::new();
        loop {
            let t = lexer.next().unwrap();
            let eof = t.is_eof();
            kinds.push(t.kind);
            if eof {
                break;
            }
        }
        kinds
    }

    fn lex_all(source: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(source, "test.tc").unwrap();
        let mut tokens = Vec::new();
        loop {
            let t = lexer.next().unwrap();
            let eof = t.is_eof();
            tokens.push(t);
            if eof {
                break;
            }
        }
        tokens
    }

    #[test]
    fn test_empty() {
        assert_eq!(lex_kinds(""), vec![TokenKind::Eof]);
        assert_eq!(lex_kinds("   \t\n  "), vec![TokenKind::Eof]);
    }

    #[test]
    fn test_keywords_win_over_idents() {
        assert_eq!(
            lex_kinds("def where in exists min max"),
            vec![
                TokenKind::Def,
                TokenKind::Where,
                TokenKind::In,
                TokenKind::Exists,
                TokenKind::Min,
                TokenKind::Max,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_longer_ident_wins_over_keyword_prefix() {
        let tokens = lex_all("definition maxval index");
        assert_eq!(tokens[0].kind, TokenKind::Ident);
        assert_eq!(tokens[0].lexeme, "definition");
        assert_eq!(tokens[1].kind, TokenKind::Ident);
        assert_eq!(tokens[1].lexeme, "maxval");
        assert_eq!(tokens[2].kind, TokenKind::Ident);
    }

    #[test]
    fn test_assignment_operators() {
        assert_eq!(
            lex_kinds("= += *= min= max= +=! *=! min=! max=!"),
            vec![
                TokenKind::Assign,
                TokenKind::PlusEq,
                TokenKind::TimesEq,
                TokenKind::MinEq,
                TokenKind::MaxEq,
                TokenKind::PlusEqB,
                TokenKind::TimesEqB,
                TokenKind::MinEqB,
                TokenKind::MaxEqB,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comparisons_and_arrow() {
        assert_eq!(
            lex_kinds("< > <= >= == != -> <=>"),
            vec![
                TokenKind::Lt,
                TokenKind::Gt,
                TokenKind::Le,
                TokenKind::Ge,
                TokenKind::EqEq,
                TokenKind::Ne,
                TokenKind::Arrow,
                TokenKind::Equivalent,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers_with_suffixes() {
        let tokens = lex_all("12 12u8 3.5f32 1e3f64 7z 2i64");
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Number,
                TokenKind::Number,
                TokenKind::Number,
                TokenKind::Number,
                TokenKind::Number,
                TokenKind::Number,
                TokenKind::Eof,
            ]
        );
        assert_eq!(tokens[1].lexeme, "12u8");
        assert_eq!(tokens[3].num_suffix(), "f64");
    }

    #[test]
    fn test_float_requires_float_suffix() {
        // "1.5i32" is not a single number; the suffix match fails and the
        // literal splits at the suffix boundary.
        let mut lexer = Lexer::new("1.5i32", "test.tc").unwrap();
        let t = lexer.next().unwrap();
        assert_eq!(t.kind, TokenKind::Number);
        assert_eq!(t.lexeme, "1.5");
        let t = lexer.next().unwrap();
        assert_eq!(t.kind, TokenKind::Ident);
        assert_eq!(t.lexeme, "i32");
    }

    #[test]
    fn test_adjacent_numbers_not_merged() {
        let tokens = lex_all("1+3");
        assert_eq!(tokens[0].lexeme, "1");
        assert_eq!(tokens[1].kind, TokenKind::Plus);
        assert_eq!(tokens[2].lexeme, "3");
    }

    #[test]
    fn test_comments() {
        let tokens = lex_all("foo # a comment\nbar");
        assert_eq!(tokens[0].lexeme, "foo");
        assert_eq!(tokens[1].lexeme, "bar");
        assert_eq!(tokens[1].range.start_line, 2);
    }

    #[test]
    fn test_location_tracking() {
        let tokens = lex_all("def mm\n  (x)");
        assert_eq!(tokens[0].range.start_line, 1);
        assert_eq!(tokens[0].range.start_col, 1);
        assert_eq!(tokens[1].range.start_col, 5);
        assert_eq!(tokens[2].range.start_line, 2);
        assert_eq!(tokens[2].range.start_col, 3);
    }

    #[test]
    fn test_lexeme_roundtrip() {
        let source = "def mm(float(N,K) A) -> (float(N) y) { y(i) +=! A(i,k) }";
        let tokens = lex_all(source);
        // Re-concatenating lexemes with the original separators yields the
        // source text again.
        let mut rebuilt = String::new();
        for t in &tokens {
            if t.is_eof() {
                break;
            }
            rebuilt.push_str(&source[..t.range.start][rebuilt.len()..]);
            rebuilt.push_str(&t.lexeme);
        }
        assert_eq!(rebuilt, source);
    }

    #[test]
    fn test_lookahead() {
        let mut lexer = Lexer::new("a b c", "test.tc").unwrap();
        assert_eq!(lexer.cur().lexeme, "a");
        assert_eq!(lexer.lookahead().unwrap().lexeme, "b");
        assert_eq!(lexer.next().unwrap().lexeme, "a");
        assert_eq!(lexer.cur().lexeme, "b");
        assert_eq!(lexer.next().unwrap().lexeme, "b");
        assert_eq!(lexer.cur().lexeme, "c");
    }

    #[test]
    fn test_invalid_token() {
        let mut lexer = Lexer::new("a @ b", "test.tc").unwrap();
        lexer.next().unwrap();
        assert!(lexer.next().is_err());
    }

    #[test]
    fn test_precedence_tables() {
        let shared = shared_data();
        let mul = shared.binary_prec(TokenKind::Star).unwrap();
        let add = shared.binary_prec(TokenKind::Plus).unwrap();
        let cmp = shared.binary_prec(TokenKind::Lt).unwrap();
        let and = shared.binary_prec(TokenKind::AndAnd).unwrap();
        let or = shared.binary_prec(TokenKind::OrOr).unwrap();
        let tern = shared.binary_prec(TokenKind::Question).unwrap();
        assert!(mul > add && add > cmp && cmp > and && and > or && or > tern);
        assert!(shared.unary_prec(TokenKind::Minus).unwrap() > mul);
        assert!(shared.is_right_associative(TokenKind::Question));
        assert!(!shared.is_right_associative(TokenKind::Plus));
    }
}
