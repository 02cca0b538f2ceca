//! Decoder for the brace-delimited key/value format steamcmd prints
//! (`app_info_print`, `package_info_print`) and Steam keeps on disk
//! (`config/config.vdf`).
//!
//! ```text
//! "common"
//! {
//!     "name"      "Foo"
//!     "type"      "Game"
//! }
//! ```
//!
//! Blocks decode into a [`Record`]: a JSON object whose values are either
//! strings or nested objects, so decoded metadata can be cached as JSON
//! without a second conversion step.

use crate::error::{Error, Result};
use serde_json::{Map, Value};

/// A decoded block: string keys mapped to strings or nested blocks.
pub type Record = Map<String, Value>;

/// Decode raw bytes as UTF-8, falling back to Latin-1.
///
/// Latin-1 maps every byte to a code point, so this never fails.
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_owned(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

/// Decode a raw block into a [`Record`].
///
/// # Errors
///
/// Returns [`Error::Decode`] when braces are unbalanced or a key has no value.
///
/// # Example
///
/// ```
/// let record = steam_cli::vdf::decode(b"\"appids\"\r\n{\r\n\t\"0\"\t\t\"42\"\r\n}").unwrap();
/// assert_eq!(record["appids"]["0"], "42");
/// ```
pub fn decode(bytes: &[u8]) -> Result<Record> {
    parse_str(&decode_text(bytes))
}

/// Parse already-decoded text into a [`Record`].
pub fn parse_str(text: &str) -> Result<Record> {
    let mut tokens = Tokenizer::new(text);
    parse_block(&mut tokens, 0)
}

/// Follow `path` through nested blocks.
pub fn lookup<'a>(record: &'a Record, path: &[&str]) -> Option<&'a Value> {
    let (last, parents) = path.split_last()?;
    let mut current = record;
    for key in parents {
        current = current.get(*key)?.as_object()?;
    }
    current.get(*last)
}

#[derive(Debug, PartialEq)]
enum Token {
    Text(String),
    Open,
    Close,
}

fn parse_block(tokens: &mut Tokenizer<'_>, depth: usize) -> Result<Record> {
    let mut record = Record::new();
    loop {
        let key = match tokens.next_token()? {
            None if depth == 0 => return Ok(record),
            None => return Err(Error::decode("unexpected end of input: missing '}'")),
            Some(Token::Close) if depth == 0 => {
                return Err(Error::decode("unexpected '}' without matching '{'"));
            }
            Some(Token::Close) => return Ok(record),
            Some(Token::Open) => return Err(Error::decode("expected a key, found '{'")),
            Some(Token::Text(key)) => key,
        };

        let value = match tokens.next_token()? {
            Some(Token::Text(value)) => Value::String(value),
            Some(Token::Open) => Value::Object(parse_block(tokens, depth + 1)?),
            Some(Token::Close) | None => {
                return Err(Error::decode(format!("key '{}' has no value", key)));
            }
        };

        insert(&mut record, key, value);
    }
}

/// Repeated keys merge when both sides are blocks; otherwise the later value wins.
fn insert(record: &mut Record, key: String, value: Value) {
    match (record.get_mut(&key), value) {
        (Some(Value::Object(existing)), Value::Object(incoming)) => {
            for (k, v) in incoming {
                insert(existing, k, v);
            }
        }
        (_, value) => {
            record.insert(key, value);
        }
    }
}

struct Tokenizer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Tokenizer<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>> {
        loop {
            let Some(&ch) = self.chars.peek() else {
                return Ok(None);
            };
            match ch {
                c if c.is_whitespace() => {
                    self.chars.next();
                }
                '/' => {
                    self.chars.next();
                    if self.chars.peek() == Some(&'/') {
                        self.skip_line();
                    } else {
                        return Ok(Some(Token::Text(self.bare_word("/"))));
                    }
                }
                // Platform conditionals such as `[$WIN32]` carry no data.
                '[' => {
                    self.skip_until(']');
                }
                '{' => {
                    self.chars.next();
                    return Ok(Some(Token::Open));
                }
                '}' => {
                    self.chars.next();
                    return Ok(Some(Token::Close));
                }
                '"' => {
                    self.chars.next();
                    return self.quoted().map(|s| Some(Token::Text(s)));
                }
                _ => return Ok(Some(Token::Text(self.bare_word("")))),
            }
        }
    }

    fn skip_line(&mut self) {
        for ch in self.chars.by_ref() {
            if ch == '\n' {
                break;
            }
        }
    }

    fn skip_until(&mut self, end: char) {
        for ch in self.chars.by_ref() {
            if ch == end {
                break;
            }
        }
    }

    /// Read a quoted string whose opening quote was already consumed.
    fn quoted(&mut self) -> Result<String> {
        let mut out = String::new();
        while let Some(ch) = self.chars.next() {
            match ch {
                '"' => return Ok(out),
                '\\' => match self.chars.next() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => out.push('\\'),
                },
                _ => out.push(ch),
            }
        }
        Err(Error::decode("unterminated quoted string"))
    }

    fn bare_word(&mut self, prefix: &str) -> String {
        let mut out = prefix.to_owned();
        while let Some(&ch) = self.chars.peek() {
            if ch.is_whitespace() || matches!(ch, '{' | '}' | '"') {
                break;
            }
            out.push(ch);
            self.chars.next();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const APP_BODY: &[u8] = b"\t\"appid\"\t\t\"42\"\r\n\t\"common\"\r\n\t{\r\n\t\t\"name\"\t\t\"Foo\"\r\n\t\t\"type\"\t\t\"Game\"\r\n\t}\r\n\t\"config\"\r\n\t{\r\n\t\t\"installdir\"\t\t\"Foo Game\"\r\n\t\t\"launch\"\r\n\t\t{\r\n\t\t\t\"0\"\r\n\t\t\t{\r\n\t\t\t\t\"executable\"\t\t\"foo.sh\"\r\n\t\t\t}\r\n\t\t}\r\n\t}";

    #[test]
    fn test_decode_nested_block() {
        let record = decode(APP_BODY).unwrap();
        assert_eq!(record["appid"], "42");
        assert_eq!(record["common"]["name"], "Foo");
        assert_eq!(record["config"]["launch"]["0"]["executable"], "foo.sh");
    }

    #[test]
    fn test_decode_is_deterministic() {
        assert_eq!(decode(APP_BODY).unwrap(), decode(APP_BODY).unwrap());
    }

    #[test]
    fn test_key_order_is_preserved() {
        let record = parse_str(r#""b" "1" "a" "2""#).unwrap();
        let keys: Vec<_> = record.keys().cloned().collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn test_latin1_fallback() {
        let record = decode(b"\"name\" \"Caf\xe9\"").unwrap();
        assert_eq!(record["name"], "Caf\u{e9}");
    }

    #[test]
    fn test_utf8_preferred() {
        let record = decode("\"name\" \"Café\"".as_bytes()).unwrap();
        assert_eq!(record["name"], "Café");
    }

    #[test]
    fn test_escapes() {
        let record = parse_str(r#""a" "say \"hi\"\n" "path" "bin\win64\game.exe""#).unwrap();
        assert_eq!(record["a"], "say \"hi\"\n");
        assert_eq!(record["path"], r"bin\win64\game.exe");
    }

    #[test]
    fn test_comments_and_conditionals_are_skipped() {
        let record = parse_str("// header\n\"a\" \"1\" [$WIN32]\n\"b\" { \"c\" \"2\" }").unwrap();
        assert_eq!(record["a"], "1");
        assert_eq!(record["b"]["c"], "2");
    }

    #[test]
    fn test_bare_words() {
        let record = parse_str("key value\nblock { inner 3 }").unwrap();
        assert_eq!(record["key"], "value");
        assert_eq!(record["block"]["inner"], "3");
    }

    #[test]
    fn test_duplicate_blocks_merge() {
        let record = parse_str(r#""a" { "x" "1" } "a" { "y" "2" } "s" "1" "s" "2""#).unwrap();
        assert_eq!(record["a"]["x"], "1");
        assert_eq!(record["a"]["y"], "2");
        assert_eq!(record["s"], "2");
    }

    #[test]
    fn test_missing_close_brace() {
        let err = parse_str(r#""a" { "b" "c""#).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }), "got: {err}");
    }

    #[test]
    fn test_extra_close_brace() {
        assert!(parse_str(r#""a" "b" }"#).is_err());
    }

    #[test]
    fn test_key_without_value() {
        assert!(parse_str(r#""a" { "b" }"#).is_err());
        assert!(parse_str(r#""lonely""#).is_err());
    }

    #[test]
    fn test_unterminated_string() {
        assert!(parse_str(r#""a" "b"#).is_err());
    }

    #[test]
    fn test_lookup() {
        let record = decode(APP_BODY).unwrap();
        assert_eq!(
            lookup(&record, &["config", "installdir"]).and_then(Value::as_str),
            Some("Foo Game")
        );
        assert!(lookup(&record, &["config", "missing", "x"]).is_none());
        assert!(lookup(&record, &[]).is_none());
    }
}
