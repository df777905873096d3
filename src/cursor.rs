use super::token::Token;
use std::mem;

static EOF: Token = Token::Eof;

/// Single forward cursor over a lexed token sequence.
#[derive(Debug)]
pub struct TokenCursor {
    tokens: Vec<Token>,
    pos: usize,
}

impl TokenCursor {
    pub fn new(tokens: Vec<Token>) -> TokenCursor {
        TokenCursor { tokens, pos: 0 }
    }

    /// The current token, or [`Token::Eof`] once the sequence is exhausted.
    pub fn current(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&EOF)
    }

    /// Consumes the current token and returns it.
    pub fn advance(&mut self) -> Token {
        match self.tokens.get_mut(self.pos) {
            Some(slot) => {
                self.pos += 1;
                mem::replace(slot, Token::Eof)
            }
            None => Token::Eof,
        }
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }
}
