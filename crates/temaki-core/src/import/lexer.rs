//! Hand-written FSH lexer
//!
//! Produces a flat token stream with line/column spans. The grammar is
//! line-oriented, so newlines are significant tokens; comments and other
//! whitespace are skipped.
//!
//! Words are maximal runs of non-delimiter characters. Crucially, `:`, `#`,
//! `^`, `.` and `/` do NOT break a word, so URLs (`http://loinc.org`),
//! codes (`SCT#1234`), caret paths (`^slicing.rules`) and keyword headers
//! (`Profile:`) each arrive as a single word; the parser takes them apart.
//! Words DO break on `,`, `(`, `)`, `=` and quotes, which never occur inside
//! the lexemes above.

/// Token kinds produced by the lexer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// End of a source line
    Newline,
    /// A `*` introducing a rule (only at the start of a line)
    Star,
    Equals,
    Comma,
    LParen,
    RParen,
    /// A double-quoted string; text is unescaped
    Str,
    /// A `"""..."""` string; text has common indentation stripped
    MultilineStr,
    /// Everything else
    Word,
}

/// A spanned token. Lines and columns are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: u32,
    pub col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

/// A lexer error; the surrounding line is dropped by the parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub message: String,
    pub line: u32,
    pub col: u32,
}

pub fn lex(input: &str) -> (Vec<Token>, Vec<LexError>) {
    Lexer::new(input).run()
}

struct Lexer<'a> {
    chars: Vec<char>,
    input: &'a str,
    pos: usize,
    line: u32,
    col: u32,
    at_line_start: bool,
    tokens: Vec<Token>,
    errors: Vec<LexError>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().collect(),
            input,
            pos: 0,
            line: 1,
            col: 1,
            at_line_start: true,
            tokens: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn run(mut self) -> (Vec<Token>, Vec<LexError>) {
        while let Some(c) = self.peek() {
            match c {
                '\n' => {
                    self.push_simple(TokenKind::Newline, "\n");
                    self.advance();
                    self.line += 1;
                    self.col = 1;
                    self.at_line_start = true;
                }
                '\r' => {
                    // normalized to LF; \r\n collapses into one newline token
                    self.advance();
                    if self.peek() != Some('\n') {
                        self.push_simple(TokenKind::Newline, "\n");
                        self.line += 1;
                        self.col = 1;
                        self.at_line_start = true;
                    }
                }
                c if c.is_whitespace() => {
                    self.advance();
                }
                '/' if self.peek_at(1) == Some('/') => self.skip_line_comment(),
                '/' if self.peek_at(1) == Some('*') => self.skip_block_comment(),
                '*' if self.at_line_start && self.is_rule_star() => {
                    self.push_simple(TokenKind::Star, "*");
                    self.advance();
                    self.at_line_start = false;
                }
                '"' => self.lex_string(),
                '=' => {
                    self.push_simple(TokenKind::Equals, "=");
                    self.advance();
                    self.at_line_start = false;
                }
                ',' => {
                    self.push_simple(TokenKind::Comma, ",");
                    self.advance();
                    self.at_line_start = false;
                }
                '(' => {
                    self.push_simple(TokenKind::LParen, "(");
                    self.advance();
                    self.at_line_start = false;
                }
                ')' => {
                    self.push_simple(TokenKind::RParen, ")");
                    self.advance();
                    self.at_line_start = false;
                }
                _ => self.lex_word(),
            }
        }
        (self.tokens, self.errors)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) {
        self.pos += 1;
        self.col += 1;
    }

    /// A `*` starts a rule only when followed by whitespace; `0..*` style
    /// words never begin a line
    fn is_rule_star(&self) -> bool {
        match self.peek_at(1) {
            None => true,
            Some(c) => c.is_whitespace(),
        }
    }

    fn push_simple(&mut self, kind: TokenKind, text: &str) {
        self.tokens.push(Token {
            kind,
            text: text.to_string(),
            line: self.line,
            col: self.col,
            end_line: self.line,
            end_col: self.col + text.chars().count().saturating_sub(1) as u32,
        });
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn skip_block_comment(&mut self) {
        let (start_line, start_col) = (self.line, self.col);
        self.advance();
        self.advance();
        loop {
            match self.peek() {
                None => {
                    self.errors.push(LexError {
                        message: "Unterminated block comment".to_string(),
                        line: start_line,
                        col: start_col,
                    });
                    return;
                }
                Some('\n') => {
                    self.advance();
                    self.line += 1;
                    self.col = 1;
                }
                Some('*') if self.peek_at(1) == Some('/') => {
                    self.advance();
                    self.advance();
                    return;
                }
                Some(_) => self.advance(),
            }
        }
    }

    fn lex_string(&mut self) {
        if self.peek_at(1) == Some('"') && self.peek_at(2) == Some('"') {
            self.lex_multiline_string();
            return;
        }

        let (start_line, start_col) = (self.line, self.col);
        self.advance(); // opening quote
        let mut text = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    self.errors.push(LexError {
                        message: "Unterminated string".to_string(),
                        line: start_line,
                        col: start_col,
                    });
                    break;
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    match self.peek() {
                        Some('n') => text.push('\n'),
                        Some('t') => text.push('\t'),
                        Some('r') => text.push('\r'),
                        Some('\\') => text.push('\\'),
                        Some('"') => text.push('"'),
                        Some(other) => {
                            self.errors.push(LexError {
                                message: format!("Malformed escape sequence: \\{other}"),
                                line: self.line,
                                col: self.col,
                            });
                            text.push(other);
                        }
                        None => continue,
                    }
                    self.advance();
                }
                Some(c) => {
                    text.push(c);
                    self.advance();
                }
            }
        }
        self.tokens.push(Token {
            kind: TokenKind::Str,
            text,
            line: start_line,
            col: start_col,
            end_line: self.line,
            end_col: self.col.saturating_sub(1),
        });
        self.at_line_start = false;
    }

    fn lex_multiline_string(&mut self) {
        let (start_line, start_col) = (self.line, self.col);
        for _ in 0..3 {
            self.advance();
        }
        let mut raw = String::new();
        loop {
            match self.peek() {
                None => {
                    self.errors.push(LexError {
                        message: "Unterminated multi-line string".to_string(),
                        line: start_line,
                        col: start_col,
                    });
                    break;
                }
                Some('"') if self.peek_at(1) == Some('"') && self.peek_at(2) == Some('"') => {
                    for _ in 0..3 {
                        self.advance();
                    }
                    break;
                }
                Some('\n') => {
                    raw.push('\n');
                    self.advance();
                    self.line += 1;
                    self.col = 1;
                }
                Some(c) => {
                    raw.push(c);
                    self.advance();
                }
            }
        }
        self.tokens.push(Token {
            kind: TokenKind::MultilineStr,
            text: strip_multiline_string(&raw),
            line: start_line,
            col: start_col,
            end_line: self.line,
            end_col: self.col.saturating_sub(1),
        });
        self.at_line_start = false;
    }

    fn lex_word(&mut self) {
        let (start_line, start_col) = (self.line, self.col);
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_whitespace() || matches!(c, '"' | '=' | ',' | '(' | ')') {
                break;
            }
            self.advance();
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        debug_assert!(!text.is_empty(), "word lexing consumed nothing: {}", self.input);
        self.tokens.push(Token {
            kind: TokenKind::Word,
            text,
            line: start_line,
            col: start_col,
            end_line: self.line,
            end_col: self.col.saturating_sub(1),
        });
        self.at_line_start = false;
    }
}

/// Process the body of a `"""..."""` string: drop a leading blank line and a
/// trailing whitespace-only line, then strip the common leading indentation
/// of the remaining lines
fn strip_multiline_string(raw: &str) -> String {
    let mut lines: Vec<&str> = raw.split('\n').collect();
    if let Some(first) = lines.first()
        && first.trim().is_empty()
    {
        lines.remove(0);
    }
    if let Some(last) = lines.last()
        && last.trim().is_empty()
    {
        lines.pop();
    }

    let indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    lines
        .iter()
        .map(|l| if l.len() >= indent { &l[indent..] } else { l.trim_start() })
        .collect::<Vec<_>>()
        .join("\n")
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        lex(input).0.into_iter().map(|t| t.kind).collect()
    }

    fn words(input: &str) -> Vec<String> {
        lex(input)
            .0
            .into_iter()
            .filter(|t| t.kind == TokenKind::Word)
            .map(|t| t.text)
            .collect()
    }

    #[test]
    fn lexes_profile_header_as_single_word() {
        assert_eq!(words("Profile: MyPatient"), vec!["Profile:", "MyPatient"]);
    }

    #[test]
    fn urls_survive_comment_detection() {
        assert_eq!(words("Alias: LNC = http://loinc.org")[2], "http://loinc.org");
    }

    #[test]
    fn line_comment_is_skipped() {
        assert_eq!(words("Parent: Patient // the base"), vec!["Parent:", "Patient"]);
    }

    #[test]
    fn rule_star_vs_wildcard_card() {
        let toks = lex("* subject 0..*").0;
        assert_eq!(toks[0].kind, TokenKind::Star);
        assert_eq!(toks[2].text, "0..*");
    }

    #[test]
    fn string_escapes_are_processed() {
        let toks = lex(r#"Title: "a \"b\" c""#).0;
        assert_eq!(toks[1].kind, TokenKind::Str);
        assert_eq!(toks[1].text, "a \"b\" c");
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let (_, errors) = lex("Title: \"oops\n");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("Unterminated"));
    }

    #[test]
    fn multiline_string_strips_common_indent() {
        let input = "Description: \"\"\"\n    first line\n      indented more\n    \"\"\"";
        let toks = lex(input).0;
        let text = &toks[1].text;
        assert_eq!(text, "first line\n  indented more");
    }

    #[test]
    fn equals_and_parens_break_words() {
        assert_eq!(
            kinds("* status = #final (exactly)"),
            vec![
                TokenKind::Star,
                TokenKind::Word,
                TokenKind::Equals,
                TokenKind::Word,
                TokenKind::LParen,
                TokenKind::Word,
                TokenKind::RParen,
            ]
        );
    }

    #[test]
    fn spans_are_one_based() {
        let toks = lex("Profile: X\n* name 1..1").0;
        let star = toks.iter().find(|t| t.kind == TokenKind::Star).unwrap();
        assert_eq!((star.line, star.col), (2, 1));
    }

    #[test]
    fn crlf_counts_as_one_newline() {
        let newlines = kinds("A: B\r\nC: D")
            .into_iter()
            .filter(|k| *k == TokenKind::Newline)
            .count();
        assert_eq!(newlines, 1);
    }
}
