//! Script reader
//!
//! Turns script text into a [`Macro`]. Tokens are separated by whitespace,
//! except inside string literals.
//!
//! | Token                      | Step                        |
//! |----------------------------|-----------------------------|
//! | `// ...`, `# ...`          | comment to end of line      |
//! | `'text'`, `"text"`         | text literal                |
//! | `42`, `-7`, `0xff`         | integer literal             |
//! | `1.5`, `-2e3`, `NaN`       | float literal               |
//! | `true`, `false`, `NULL`    | boolean / null literal      |
//! | `<%` ... `%>`              | nested macro (pushed)       |
//! | `$name`                    | push binding                |
//! | `@name`                    | run bound macro             |
//! | anything else              | operator call               |

use crate::error::ScriptError;
use crate::macros::{Macro, Step};
use crate::value::Value;

const MACRO_OPEN: &str = "<%";
const MACRO_CLOSE: &str = "%>";

/// Read script text into a macro
pub fn read(source: &str) -> Result<Macro, ScriptError> {
    let mut reader = Reader {
        chars: source.chars().peekable(),
        line: 1,
    };
    // Frames of open macros: (opening line, steps so far)
    let mut frames: Vec<(usize, Vec<Step>)> = vec![(0, Vec::new())];

    while let Some(token) = reader.next_token()? {
        let line = reader.line;
        let step = match token {
            Token::Text(s) => Step::Literal(Value::text(s)),
            Token::Word(w) if w == MACRO_OPEN => {
                frames.push((line, Vec::new()));
                continue;
            }
            Token::Word(w) if w == MACRO_CLOSE => {
                if frames.len() == 1 {
                    return Err(read_error(line, "'%>' without a matching '<%'."));
                }
                let (_, steps) = frames.pop().unwrap_or_default();
                Step::nested(Macro::new(steps))
            }
            Token::Word(w) => word_step(&w, line)?,
        };
        if let Some((_, steps)) = frames.last_mut() {
            steps.push(step);
        }
    }

    if frames.len() > 1 {
        let (open_line, _) = frames[frames.len() - 1];
        return Err(read_error(open_line, "unterminated macro, missing '%>'."));
    }
    let (_, steps) = frames.pop().unwrap_or_default();
    Ok(Macro::new(steps))
}

fn read_error(line: usize, message: impl Into<String>) -> ScriptError {
    ScriptError::Read {
        line,
        message: message.into(),
    }
}

enum Token {
    Text(String),
    Word(String),
}

struct Reader<I: Iterator<Item = char>> {
    chars: std::iter::Peekable<I>,
    line: usize,
}

impl<I: Iterator<Item = char>> Reader<I> {
    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn skip_line(&mut self) {
        while let Some(&c) = self.chars.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>, ScriptError> {
        loop {
            let c = match self.chars.peek() {
                Some(&c) => c,
                None => return Ok(None),
            };
            if c.is_whitespace() {
                self.bump();
                continue;
            }
            if c == '\'' || c == '"' {
                self.bump();
                return self.text(c).map(|s| Some(Token::Text(s)));
            }

            let mut word = String::new();
            while let Some(&c) = self.chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                word.push(c);
                self.bump();
            }
            if word.starts_with('#') || word.starts_with("//") {
                self.skip_line();
                continue;
            }
            return Ok(Some(Token::Word(word)));
        }
    }

    fn text(&mut self, quote: char) -> Result<String, ScriptError> {
        let start = self.line;
        let mut out = String::new();
        loop {
            let c = self
                .bump()
                .ok_or_else(|| read_error(start, "unterminated string literal."))?;
            match c {
                c if c == quote => return Ok(out),
                '\\' => {
                    let escaped = self
                        .bump()
                        .ok_or_else(|| read_error(start, "unterminated string literal."))?;
                    match escaped {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        '\\' | '\'' | '"' => out.push(escaped),
                        other => {
                            return Err(read_error(
                                self.line,
                                format!("invalid escape sequence '\\{}'.", other),
                            ));
                        }
                    }
                }
                c => out.push(c),
            }
        }
    }
}

fn word_step(word: &str, line: usize) -> Result<Step, ScriptError> {
    match word {
        "true" => return Ok(Step::Literal(Value::Bool(true))),
        "false" => return Ok(Step::Literal(Value::Bool(false))),
        "NULL" => return Ok(Step::Literal(Value::Null)),
        "NaN" => return Ok(Step::Literal(Value::Float(f64::NAN))),
        "Infinity" | "+Infinity" => return Ok(Step::Literal(Value::Float(f64::INFINITY))),
        "-Infinity" => return Ok(Step::Literal(Value::Float(f64::NEG_INFINITY))),
        _ => {}
    }

    if let Some(name) = word.strip_prefix('$') {
        return symbol(name, line).map(Step::Load);
    }
    if let Some(name) = word.strip_prefix('@') {
        return symbol(name, line).map(Step::Run);
    }
    if looks_numeric(word) {
        return number(word, line).map(Step::Literal);
    }
    Ok(Step::Call(word.to_string()))
}

fn symbol(name: &str, line: usize) -> Result<String, ScriptError> {
    if name.is_empty() {
        return Err(read_error(line, "empty symbol name."));
    }
    Ok(name.to_string())
}

/// Digit first, or a sign and/or dot followed by a digit
fn looks_numeric(word: &str) -> bool {
    let rest = word.strip_prefix(['+', '-']).unwrap_or(word);
    let rest = rest.strip_prefix('.').unwrap_or(rest);
    rest.starts_with(|c: char| c.is_ascii_digit())
}

fn number(word: &str, line: usize) -> Result<Value, ScriptError> {
    let invalid = || read_error(line, format!("invalid number '{}'.", word));

    let (negative, unsigned) = match word.as_bytes()[0] {
        b'-' => (true, &word[1..]),
        b'+' => (false, &word[1..]),
        _ => (false, word),
    };

    if let Some(hex) = unsigned
        .strip_prefix("0x")
        .or_else(|| unsigned.strip_prefix("0X"))
    {
        // Full 64-bit patterns are accepted, 0xffffffffffffffff is -1
        let bits = u64::from_str_radix(hex, 16).map_err(|_| invalid())?;
        let n = bits as i64;
        return Ok(Value::Int(if negative { n.wrapping_neg() } else { n }));
    }

    if unsigned.bytes().all(|b| b.is_ascii_digit()) {
        return word.parse::<i64>().map(Value::Int).map_err(|_| invalid());
    }

    word.parse::<f64>().map(Value::Float).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps(source: &str) -> Vec<Step> {
        read(source).unwrap().steps().to_vec()
    }

    #[test]
    fn test_literals() {
        assert_eq!(
            steps("42 -7 0xff 1.5 -2e3 .5 true false NULL"),
            vec![
                Step::literal(42i64),
                Step::literal(-7i64),
                Step::literal(255i64),
                Step::literal(1.5),
                Step::literal(-2000.0),
                Step::literal(0.5),
                Step::literal(true),
                Step::literal(false),
                Step::Literal(Value::Null),
            ]
        );
        assert_eq!(steps("0xffffffffffffffff"), vec![Step::literal(-1i64)]);
    }

    #[test]
    fn test_special_floats() {
        let s = steps("NaN Infinity -Infinity");
        assert!(matches!(&s[0], Step::Literal(Value::Float(f)) if f.is_nan()));
        assert_eq!(s[1], Step::literal(f64::INFINITY));
        assert_eq!(s[2], Step::literal(f64::NEG_INFINITY));
    }

    #[test]
    fn test_operators_are_not_numbers() {
        assert_eq!(
            steps("+ - * / == -> ->BYTES"),
            ["+", "-", "*", "/", "==", "->", "->BYTES"]
                .into_iter()
                .map(Step::call)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(
            steps(r#"'a b' "it's" 'line\nnext' 'q\'q'"#),
            vec![
                Step::literal("a b"),
                Step::literal("it's"),
                Step::literal("line\nnext"),
                Step::literal("q'q"),
            ]
        );
    }

    #[test]
    fn test_comments() {
        let source = "1 // one\n# whole line\n2 #trailing\n3";
        assert_eq!(
            steps(source),
            vec![Step::literal(1i64), Step::literal(2i64), Step::literal(3i64)]
        );
    }

    #[test]
    fn test_symbols_and_nested_macros() {
        let s = steps("$x @f <% 1 <% %> %>");
        assert_eq!(s[0], Step::Load("x".to_string()));
        assert_eq!(s[1], Step::Run("f".to_string()));
        let inner = Macro::new(vec![Step::literal(1i64), Step::nested(Macro::default())]);
        assert_eq!(s[2], Step::nested(inner));
    }

    #[test]
    fn test_read_errors_carry_line() {
        let err = read("1\n2\n<% 3").unwrap_err();
        assert!(matches!(err, ScriptError::Read { line: 3, .. }));

        let err = read("1\n%>").unwrap_err();
        assert!(matches!(err, ScriptError::Read { line: 2, .. }));

        assert!(matches!(read("'open"), Err(ScriptError::Read { line: 1, .. })));
        assert!(matches!(read("12abc"), Err(ScriptError::Read { .. })));
        assert!(matches!(read("$"), Err(ScriptError::Read { .. })));
        assert!(matches!(read(r"'\q'"), Err(ScriptError::Read { .. })));
    }
}
