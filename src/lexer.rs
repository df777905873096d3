use super::error::{Error, ErrorKind};
use super::token::Token;
use combine::error::{ParseError, StreamError};
use combine::parser::char::{alpha_num, digit, letter, space};
use combine::parser::EasyParser;
use combine::stream::position;
use combine::stream::{Stream, StreamErrorFor};
use combine::{choice, eof, many, many1, satisfy, satisfy_map, skip_many, token, Parser};
use log::trace;

fn number<Input>() -> impl Parser<Input, Output = Token>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    many1(choice((digit(), token('.')))).and_then(|text: String| {
        let parsed = if text.contains('.') {
            text.parse::<f64>().ok().map(Token::Float)
        } else {
            // Digit runs too long for an integer still make a valid number.
            text.parse::<i64>()
                .map(Token::Int)
                .or_else(|_| text.parse::<f64>().map(Token::Float))
                .ok()
        };
        parsed.ok_or_else(|| {
            StreamErrorFor::<Input>::message_format(format!("malformed number literal `{}`", text))
        })
    })
}

fn ident<Input>() -> impl Parser<Input, Output = Token>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    (letter(), many(alpha_num())).map(|(first, rest): (char, String)| {
        let mut word = String::with_capacity(rest.len() + 1);
        word.push(first);
        word.push_str(&rest);
        Token::keyword(&word).unwrap_or(Token::Ident(word))
    })
}

// Punctuation gets its own kind, every other character is a one-char operator.
fn symbol<Input>() -> impl Parser<Input, Output = Token>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    satisfy_map(|c: char| {
        if c.is_alphanumeric() || c.is_whitespace() {
            None
        } else {
            Some(Token::punct(c).unwrap_or(Token::Op(c)))
        }
    })
}

fn comment<Input>() -> impl Parser<Input, Output = ()>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    (token('#'), skip_many(satisfy(|c: char| c != '\n' && c != '\r'))).map(|_| ())
}

fn blank<Input>() -> impl Parser<Input, Output = ()>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    skip_many(space().map(|_| ()).or(comment()))
}

fn lexeme<Input>() -> impl Parser<Input, Output = Token>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    choice((number(), ident(), symbol())).skip(blank())
}

pub(crate) fn tokens<Input>() -> impl Parser<Input, Output = Vec<Token>>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    blank()
        .with(many::<Vec<Token>, _, _>(lexeme()))
        .skip(eof())
}

/// Lexes a whole source unit. The returned sequence has no trailing
/// [`Token::Eof`]; the cursor synthesizes it.
pub fn tokenize(src: &str) -> Result<Vec<Token>, Error> {
    match tokens().easy_parse(position::Stream::new(src)) {
        Ok((tokens, _)) => {
            trace!("lexed {} tokens", tokens.len());
            Ok(tokens)
        }
        Err(e) => {
            let message = e
                .errors
                .iter()
                .map(|err| err.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            Err(ErrorKind::Lex {
                line: e.position.line,
                column: e.position.column,
                message,
            }
            .into())
        }
    }
}

#[cfg(test)]
mod test {
    use super::super::error::Phase;
    use super::super::token::Token::*;
    use super::*;

    #[test]
    fn test_number() {
        assert_eq!(number().easy_parse("1.0").map(|x| x.0), Ok(Float(1.0)));
        assert_eq!(number().easy_parse("42").map(|x| x.0), Ok(Int(42)));
        assert!(number().easy_parse("1.2.3").is_err());
        assert_eq!(
            number().easy_parse("99999999999999999999").map(|x| x.0),
            Ok(Float(1e20))
        );
    }

    #[test]
    fn test_ident() {
        assert_eq!(
            ident().easy_parse("test").map(|x| x.0),
            Ok(Ident("test".to_owned()))
        );
        assert_eq!(ident().easy_parse("def").map(|x| x.0), Ok(Def));
        assert_eq!(ident().easy_parse("binary").map(|x| x.0), Ok(Binary));
        assert_eq!(
            ident().easy_parse("x1").map(|x| x.0),
            Ok(Ident("x1".to_owned()))
        );
    }

    #[test]
    fn test_comment() {
        assert_eq!(comment().easy_parse("#hoge").map(|x| x.0), Ok(()));
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize(
                r#"#comment
def foo(x y) x + 1.5; # trailing
"#
            )
            .unwrap(),
            vec![
                Def,
                Ident("foo".to_owned()),
                LParen,
                Ident("x".to_owned()),
                Ident("y".to_owned()),
                RParen,
                Ident("x".to_owned()),
                Op('+'),
                Float(1.5),
                Semicolon,
            ]
        );
    }

    #[test]
    fn test_keywords_and_punctuation() {
        assert_eq!(
            tokenize("extern if then else for in unary var [ ] , =").unwrap(),
            vec![Extern, If, Then, Else, For, In, Unary, Var, LBracket, RBracket, Comma, Assign]
        );
    }

    #[test]
    fn test_operators_are_single_characters() {
        assert_eq!(
            tokenize("a<=b").unwrap(),
            vec![
                Ident("a".to_owned()),
                Op('<'),
                Assign,
                Ident("b".to_owned())
            ]
        );
        assert_eq!(tokenize("!!").unwrap(), vec![Op('!'), Op('!')]);
    }

    #[test]
    fn test_empty_and_blank() {
        assert_eq!(tokenize("").unwrap(), vec![]);
        assert_eq!(tokenize("  \n\t # only a comment").unwrap(), vec![]);
    }

    #[test]
    fn test_malformed_number() {
        let err = tokenize("1 + 2.3.4").unwrap_err();
        assert_eq!(err.phase(), Phase::Lex);
        assert!(err.to_string().contains("malformed number literal `2.3.4`"));
    }

    #[test]
    fn test_deterministic() {
        let src = "def binary| 5 (a b) if a then 1 else if b then 1 else 0;\n1 | 0";
        assert_eq!(tokenize(src).unwrap(), tokenize(src).unwrap());
    }
}
