use crate::lexer::cursor::Cursor;
use crate::symbol::Span;

pub mod cursor;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TokenKind {
    /// Any run of characters that are not whitespace or a comment. Mnemonics, operands and label
    /// definitions are all words; the parser decides which is which.
    Word,
    /// `;` up to the end of the line
    Comment,
    Whitespace,
    Newline,
    Eof,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Token { kind, span }
    }
}

/// Test if a character separates words on the same line.
pub(crate) fn is_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | ',')
}

fn is_word(c: char) -> bool {
    !is_whitespace(c) && c != '\n' && c != ';'
}

impl Cursor<'_> {
    pub fn advance_token(&mut self) -> Token {
        let first_char = match self.bump() {
            Some(c) => c,
            None => return Token::new(TokenKind::Eof, Span::new(self.token_start(), 0)),
        };
        let kind = match first_char {
            ';' => {
                self.take_while(|c| c != '\n');
                TokenKind::Comment
            }
            '\n' => TokenKind::Newline,
            c if is_whitespace(c) => {
                self.take_while(is_whitespace);
                TokenKind::Whitespace
            }
            _ => {
                self.take_while(is_word);
                TokenKind::Word
            }
        };
        let res = Token::new(kind, Span::new(self.token_start(), self.pos_in_token()));
        self.reset_pos();
        res
    }
}

/// Words of the source grouped by line. Comments and blank lines are dropped.
pub fn lines(input: &str) -> Vec<Vec<Token>> {
    let mut cursor = Cursor::new(input);
    let mut lines = Vec::new();
    let mut line = Vec::new();
    loop {
        let token = cursor.advance_token();
        match token.kind {
            TokenKind::Word => line.push(token),
            TokenKind::Comment | TokenKind::Whitespace => (),
            TokenKind::Newline => {
                if !line.is_empty() {
                    lines.push(std::mem::take(&mut line));
                }
            }
            TokenKind::Eof => break,
        }
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}
