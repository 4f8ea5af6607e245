use sylva_core::{Span, SylvaError};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    LParen,
    RParen,
    VectorStart,
    Quote,
    Quasiquote,
    Unquote,
    UnquoteSplice,
    Dot,
    Int(i64),
    Float(f64),
    Str(String),
    Char(char),
    Symbol(String),
    Uninterned(String),
}

#[derive(Debug, Clone)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '\'' | '`' | ',' | '"' | ';')
}

/// Named characters accepted after `#\`.
fn named_char(name: &str) -> Option<char> {
    match name {
        "newline" => Some('\n'),
        "space" => Some(' '),
        "tab" => Some('\t'),
        "return" => Some('\r'),
        "null" | "nul" => Some('\0'),
        _ => None,
    }
}

pub fn tokenize(input: &str) -> Result<Vec<SpannedToken>, SylvaError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    let mut line = 1;
    let mut col = 1;

    macro_rules! push {
        ($tok:expr, $span:expr) => {
            tokens.push(SpannedToken {
                token: $tok,
                span: $span,
            })
        };
    }

    while i < chars.len() {
        let ch = chars[i];
        let span = Span::point(line, col);

        match ch {
            ' ' | '\t' | '\r' => {
                col += 1;
                i += 1;
            }
            '\n' => {
                line += 1;
                col = 1;
                i += 1;
            }

            ';' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }

            '(' => {
                push!(Token::LParen, span);
                col += 1;
                i += 1;
            }
            ')' => {
                push!(Token::RParen, span);
                col += 1;
                i += 1;
            }
            '\'' => {
                push!(Token::Quote, span);
                col += 1;
                i += 1;
            }
            '`' => {
                push!(Token::Quasiquote, span);
                col += 1;
                i += 1;
            }
            ',' => {
                if chars.get(i + 1) == Some(&'@') {
                    push!(Token::UnquoteSplice, span);
                    col += 2;
                    i += 2;
                } else {
                    push!(Token::Unquote, span);
                    col += 1;
                    i += 1;
                }
            }

            '"' => {
                let mut s = String::new();
                let mut j = i + 1;
                let mut ccol = col + 1;
                let mut cline = line;
                loop {
                    match chars.get(j) {
                        None => {
                            return Err(SylvaError::reader("unterminated string", span));
                        }
                        Some('"') => {
                            j += 1;
                            ccol += 1;
                            break;
                        }
                        Some('\\') => {
                            let esc = chars.get(j + 1).copied().ok_or_else(|| {
                                SylvaError::reader("unterminated string escape", span)
                            })?;
                            s.push(match esc {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                '0' => '\0',
                                other => other,
                            });
                            j += 2;
                            ccol += 2;
                        }
                        Some('\n') => {
                            s.push('\n');
                            j += 1;
                            cline += 1;
                            ccol = 1;
                        }
                        Some(c) => {
                            s.push(*c);
                            j += 1;
                            ccol += 1;
                        }
                    }
                }
                push!(Token::Str(s), span);
                i = j;
                line = cline;
                col = ccol;
            }

            '#' => match chars.get(i + 1) {
                Some('(') => {
                    push!(Token::VectorStart, span);
                    col += 2;
                    i += 2;
                }
                Some('\\') => {
                    // Character literal: a single char or a named char.
                    let mut j = i + 2;
                    let mut name = String::new();
                    // The first char after #\ is always taken, even delimiters.
                    if let Some(c) = chars.get(j) {
                        name.push(*c);
                        j += 1;
                    } else {
                        return Err(SylvaError::reader("unterminated character literal", span));
                    }
                    while let Some(c) = chars.get(j) {
                        if is_delimiter(*c) {
                            break;
                        }
                        name.push(*c);
                        j += 1;
                    }
                    let c = if name.chars().count() == 1 {
                        name.chars().next().unwrap()
                    } else {
                        named_char(&name.to_lowercase()).ok_or_else(|| {
                            SylvaError::reader(format!("unknown character name `{name}`"), span)
                        })?
                    };
                    push!(Token::Char(c), span);
                    col += j - i;
                    i = j;
                }
                Some(':') => {
                    let mut j = i + 2;
                    let mut name = String::new();
                    while let Some(c) = chars.get(j) {
                        if is_delimiter(*c) {
                            break;
                        }
                        name.push(*c);
                        j += 1;
                    }
                    if name.is_empty() {
                        return Err(SylvaError::reader("empty uninterned symbol", span));
                    }
                    push!(Token::Uninterned(name), span);
                    col += j - i;
                    i = j;
                }
                _ => {
                    return Err(SylvaError::reader(
                        format!("unknown dispatch character `#{}`", chars.get(i + 1).map(|c| c.to_string()).unwrap_or_default()),
                        span,
                    ));
                }
            },

            _ => {
                // Atom: accumulate up to a delimiter, then classify.
                let mut j = i;
                let mut text = String::new();
                while let Some(c) = chars.get(j) {
                    if is_delimiter(*c) {
                        break;
                    }
                    text.push(*c);
                    j += 1;
                }
                let token = classify_atom(&text, span)?;
                push!(token, span);
                col += j - i;
                i = j;
            }
        }
    }

    Ok(tokens)
}

fn classify_atom(text: &str, span: Span) -> Result<Token, SylvaError> {
    if text == "." {
        return Ok(Token::Dot);
    }
    if let Ok(n) = text.parse::<i64>() {
        return Ok(Token::Int(n));
    }
    if looks_like_float(text) {
        if let Ok(f) = text.parse::<f64>() {
            return Ok(Token::Float(f));
        }
        return Err(SylvaError::reader(format!("bad number `{text}`"), span));
    }
    Ok(Token::Symbol(text.to_string()))
}

/// Distinguish floats from symbols like `1+` or `-`: a float must start
/// with a digit, sign, or dot and contain a digit.
fn looks_like_float(text: &str) -> bool {
    let mut chars = text.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => return false,
    };
    if !(first.is_ascii_digit() || first == '-' || first == '+' || first == '.') {
        return false;
    }
    text.contains(['.', 'e', 'E']) && text.chars().any(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(input: &str) -> Vec<Token> {
        tokenize(input).unwrap().into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn test_basic_tokens() {
        assert_eq!(
            toks("(foo 42 -7 3.5 \"hi\")"),
            vec![
                Token::LParen,
                Token::Symbol("foo".into()),
                Token::Int(42),
                Token::Int(-7),
                Token::Float(3.5),
                Token::Str("hi".into()),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn test_quote_sugar() {
        assert_eq!(
            toks("'x `(a ,b ,@c)"),
            vec![
                Token::Quote,
                Token::Symbol("x".into()),
                Token::Quasiquote,
                Token::LParen,
                Token::Symbol("a".into()),
                Token::Unquote,
                Token::Symbol("b".into()),
                Token::UnquoteSplice,
                Token::Symbol("c".into()),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn test_characters() {
        assert_eq!(
            toks("#\\a #\\newline #\\( #\\space"),
            vec![
                Token::Char('a'),
                Token::Char('\n'),
                Token::Char('('),
                Token::Char(' '),
            ]
        );
    }

    #[test]
    fn test_vector_and_uninterned() {
        assert_eq!(
            toks("#(1 2) #:g1"),
            vec![
                Token::VectorStart,
                Token::Int(1),
                Token::Int(2),
                Token::RParen,
                Token::Uninterned("g1".into()),
            ]
        );
    }

    #[test]
    fn test_symbolic_arithmetic_names() {
        assert_eq!(
            toks("1+ - +"),
            vec![
                Token::Symbol("1+".into()),
                Token::Symbol("-".into()),
                Token::Symbol("+".into()),
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(toks("a ; comment\nb"), vec![Token::Symbol("a".into()), Token::Symbol("b".into())]);
    }

    #[test]
    fn test_unterminated_string_errors() {
        assert!(tokenize("\"abc").is_err());
    }
}
