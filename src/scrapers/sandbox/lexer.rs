//! Tokenizer for the challenge script subset.

use super::SandboxError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Num(f64),
    Str(String),
    Ident(String),
    Regex { pattern: String, flags: String },
    Punct(&'static str),
    Eof,
}

/// Longest first so that `===` wins over `==` and `=`.
const PUNCTUATORS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "++", "--", "+=", "-=", "*=", "/=", "%=",
    "+", "-", "*", "/", "%", "=", "(", ")", "[", "]", "{", "}", ",", ";", ".", "!", ":", "?",
    "<", ">",
];

/// Keywords after which a `/` starts a regex rather than a division.
const REGEX_PREFIX_KEYWORDS: &[&str] = &["return", "typeof", "case", "in", "of"];

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub pos: usize,
}

pub fn tokenize(src: &str) -> Result<Vec<Spanned>, SandboxError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens: Vec<Spanned> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            i += 2;
            while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                i += 1;
            }
            i += 2;
            continue;
        }

        let pos = i;
        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).map_or(false, |d| d.is_ascii_digit())) {
            let (num, next) = read_number(&chars, i)?;
            tokens.push(Spanned { token: Token::Num(num), pos });
            i = next;
            continue;
        }
        if c == '"' || c == '\'' {
            let (s, next) = read_string(&chars, i)?;
            tokens.push(Spanned { token: Token::Str(s), pos });
            i = next;
            continue;
        }
        if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                i += 1;
            }
            let ident: String = chars[start..i].iter().collect();
            tokens.push(Spanned { token: Token::Ident(ident), pos });
            continue;
        }
        if c == '/' && regex_allowed(tokens.last().map(|t| &t.token)) {
            let (token, next) = read_regex(&chars, i)?;
            tokens.push(Spanned { token, pos });
            i = next;
            continue;
        }

        let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
        match PUNCTUATORS.iter().find(|p| rest.starts_with(**p)) {
            Some(p) => {
                tokens.push(Spanned { token: Token::Punct(p), pos });
                i += p.len();
            }
            None => {
                return Err(SandboxError::Syntax {
                    pos,
                    message: format!("unexpected character '{}'", c),
                })
            }
        }
    }

    tokens.push(Spanned {
        token: Token::Eof,
        pos: chars.len(),
    });
    Ok(tokens)
}

fn regex_allowed(prev: Option<&Token>) -> bool {
    match prev {
        None => true,
        Some(Token::Num(_)) | Some(Token::Str(_)) | Some(Token::Regex { .. }) => false,
        Some(Token::Ident(name)) => REGEX_PREFIX_KEYWORDS.contains(&name.as_str()),
        Some(Token::Punct(p)) => !matches!(*p, ")" | "]" | "}"),
        Some(Token::Eof) => false,
    }
}

fn read_number(chars: &[char], start: usize) -> Result<(f64, usize), SandboxError> {
    let mut i = start;
    if chars[i] == '0' && matches!(chars.get(i + 1), Some('x') | Some('X')) {
        i += 2;
        let digits_start = i;
        while i < chars.len() && chars[i].is_ascii_hexdigit() {
            i += 1;
        }
        let digits: String = chars[digits_start..i].iter().collect();
        let value = u64::from_str_radix(&digits, 16).map_err(|_| SandboxError::Syntax {
            pos: start,
            message: "invalid hex literal".to_string(),
        })?;
        return Ok((value as f64, i));
    }

    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if i < chars.len() && chars[i] == '.' {
        i += 1;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i < chars.len() && matches!(chars[i], 'e' | 'E') {
        let mut j = i + 1;
        if j < chars.len() && matches!(chars[j], '+' | '-') {
            j += 1;
        }
        if j < chars.len() && chars[j].is_ascii_digit() {
            i = j;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
        }
    }
    let text: String = chars[start..i].iter().collect();
    text.parse::<f64>()
        .map(|n| (n, i))
        .map_err(|_| SandboxError::Syntax {
            pos: start,
            message: format!("invalid number '{}'", text),
        })
}

fn read_string(chars: &[char], start: usize) -> Result<(String, usize), SandboxError> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if c == quote {
            return Ok((out, i + 1));
        }
        if c == '\\' {
            i += 1;
            let Some(&esc) = chars.get(i) else { break };
            match esc {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                'b' => out.push('\u{8}'),
                'f' => out.push('\u{c}'),
                'v' => out.push('\u{b}'),
                '0' => out.push('\0'),
                'x' | 'u' => {
                    let len = if esc == 'x' { 2 } else { 4 };
                    let hex: String = chars.iter().skip(i + 1).take(len).collect();
                    let code = u32::from_str_radix(&hex, 16).map_err(|_| SandboxError::Syntax {
                        pos: i,
                        message: "invalid escape".to_string(),
                    })?;
                    out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                    i += len;
                }
                '\n' => {}
                other => out.push(other),
            }
            i += 1;
            continue;
        }
        out.push(c);
        i += 1;
    }
    Err(SandboxError::Syntax {
        pos: start,
        message: "unterminated string".to_string(),
    })
}

fn read_regex(chars: &[char], start: usize) -> Result<(Token, usize), SandboxError> {
    let mut i = start + 1;
    let mut pattern = String::new();
    let mut in_class = false;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                pattern.push(c);
                if let Some(&next) = chars.get(i + 1) {
                    pattern.push(next);
                }
                i += 2;
                continue;
            }
            '[' => in_class = true,
            ']' => in_class = false,
            '/' if !in_class => {
                i += 1;
                let flags_start = i;
                while i < chars.len() && chars[i].is_ascii_alphabetic() {
                    i += 1;
                }
                let flags: String = chars[flags_start..i].iter().collect();
                return Ok((Token::Regex { pattern, flags }, i));
            }
            '\n' => break,
            _ => {}
        }
        pattern.push(c);
        i += 1;
    }
    Err(SandboxError::Syntax {
        pos: start,
        message: "unterminated regex".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn test_punctuators_and_literals() {
        assert_eq!(
            kinds("a.b+=0x1f;"),
            vec![
                Token::Ident("a".into()),
                Token::Punct("."),
                Token::Ident("b".into()),
                Token::Punct("+="),
                Token::Num(31.0),
                Token::Punct(";"),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_jsfuck_sequence() {
        let tokens = kinds("!+[]+!![]");
        assert_eq!(tokens[0], Token::Punct("!"));
        assert_eq!(tokens[1], Token::Punct("+"));
        assert_eq!(tokens[2], Token::Punct("["));
        assert_eq!(tokens.len(), 10);
    }

    #[test]
    fn test_regex_vs_division() {
        let tokens = kinds("t.match(/https?:\\/\\//)[0]; x = a / 2");
        assert!(tokens.iter().any(|t| matches!(t, Token::Regex { pattern, .. } if pattern == "https?:\\/\\/")));
        assert!(tokens.contains(&Token::Punct("/")));
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(kinds(r#"'a\x41\'b'"#)[0], Token::Str("aA'b".into()));
    }

    #[test]
    fn test_comments_skipped() {
        assert_eq!(kinds("1 // c\n /* d */ 2").len(), 3);
    }
}
