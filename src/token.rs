use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Def,
    Extern,
    If,
    Then,
    Else,
    For,
    In,
    Binary,
    Unary,
    Var,
    Ident(String),
    Int(i64),
    Float(f64),
    Assign,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    /// Any other single non-alphanumeric character.
    Op(char),
    Eof,
}

impl Token {
    pub(crate) fn keyword(word: &str) -> Option<Token> {
        let kw = match word {
            "def" => Token::Def,
            "extern" => Token::Extern,
            "if" => Token::If,
            "then" => Token::Then,
            "else" => Token::Else,
            "for" => Token::For,
            "in" => Token::In,
            "binary" => Token::Binary,
            "unary" => Token::Unary,
            "var" => Token::Var,
            _ => return None,
        };
        Some(kw)
    }

    pub(crate) fn punct(c: char) -> Option<Token> {
        let p = match c {
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            ',' => Token::Comma,
            ';' => Token::Semicolon,
            '=' => Token::Assign,
            _ => return None,
        };
        Some(p)
    }

    /// The symbol this token contributes to an operator position, if any.
    /// `=` is lexed as its own kind but parses as a binary operator.
    pub fn operator_symbol(&self) -> Option<char> {
        match self {
            Token::Op(c) => Some(*c),
            Token::Assign => Some('='),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Def => write!(f, "def"),
            Token::Extern => write!(f, "extern"),
            Token::If => write!(f, "if"),
            Token::Then => write!(f, "then"),
            Token::Else => write!(f, "else"),
            Token::For => write!(f, "for"),
            Token::In => write!(f, "in"),
            Token::Binary => write!(f, "binary"),
            Token::Unary => write!(f, "unary"),
            Token::Var => write!(f, "var"),
            Token::Ident(id) => write!(f, "identifier `{}`", id),
            Token::Int(n) => write!(f, "integer `{}`", n),
            Token::Float(n) => write!(f, "number `{}`", n),
            Token::Assign => write!(f, "'='"),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
            Token::LBracket => write!(f, "'['"),
            Token::RBracket => write!(f, "']'"),
            Token::Comma => write!(f, "','"),
            Token::Semicolon => write!(f, "';'"),
            Token::Op(c) => write!(f, "operator '{}'", c),
            Token::Eof => write!(f, "end of input"),
        }
    }
}
