//! Wire-text helpers.
//!
//! Message bodies are space-separated tokens; arguments are `key=value`
//! pairs with no quoting (values therefore cannot contain whitespace, which
//! the command grammar accepts). Replies start with `OK` or `ERR <kind>`.
//!
//! The state-service snapshot is the one place where arbitrary strings must
//! round-trip through a whitespace-separated format, so its fields are
//! double-quoted with backslash escaping; [`quote`] and [`FieldReader`]
//! implement that encoding.

use std::collections::HashMap;

/// Parses the `key=value` arguments of a command or reply body.
///
/// Tokens without a `=` are ignored; a duplicated key keeps the last value.
pub fn parse_kv_args(args: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for token in args.split_whitespace() {
        if let Some((key, value)) = token.split_once('=') {
            map.insert(key.to_string(), value.to_string());
        }
    }
    map
}

/// True for `OK` and `OK <payload>` replies.
pub fn is_ok(reply: &str) -> bool {
    reply == "OK" || reply.starts_with("OK ")
}

/// Parses the `key=value` payload of an `OK` reply.
///
/// Returns an empty map for `ERR` replies, so callers can treat a missing
/// key and a failed request uniformly.
pub fn parse_ok_reply(reply: &str) -> HashMap<String, String> {
    match reply.strip_prefix("OK") {
        Some(rest) => parse_kv_args(rest),
        None => HashMap::new(),
    }
}

/// Quotes a string field for the snapshot format: wraps it in double quotes
/// and backslash-escapes embedded quotes and backslashes.
pub fn quote(field: &str) -> String {
    let mut out = String::with_capacity(field.len() + 2);
    out.push('"');
    for c in field.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Reads whitespace-separated fields from one snapshot line, undoing
/// [`quote`] where a field starts with a double quote.
pub struct FieldReader<'a> {
    rest: &'a str,
}

impl<'a> FieldReader<'a> {
    pub fn new(line: &'a str) -> Self {
        Self { rest: line }
    }

    /// Next unquoted token, e.g. a numeric field or a record tag.
    pub fn next_token(&mut self) -> Option<&'a str> {
        self.rest = self.rest.trim_start();
        if self.rest.is_empty() {
            return None;
        }
        let end = self
            .rest
            .find(char::is_whitespace)
            .unwrap_or(self.rest.len());
        let (token, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(token)
    }

    /// Next string field. Accepts both a quoted field (returned unescaped)
    /// and a bare token, mirroring the tolerant reader the snapshot format
    /// was designed for. Returns `None` on a malformed quoted field.
    pub fn next_string(&mut self) -> Option<String> {
        self.rest = self.rest.trim_start();
        let mut chars = self.rest.char_indices();
        match chars.next() {
            Some((_, '"')) => {}
            Some(_) => return self.next_token().map(str::to_string),
            None => return None,
        }

        let mut out = String::new();
        let mut escaped = false;
        for (idx, c) in chars {
            if escaped {
                out.push(c);
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                self.rest = &self.rest[idx + c.len_utf8()..];
                return Some(out);
            } else {
                out.push(c);
            }
        }
        // Unterminated quote: the line is corrupt.
        None
    }

    /// Next field parsed as an integer.
    pub fn next_int<T: std::str::FromStr>(&mut self) -> Option<T> {
        self.next_token()?.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kv_arguments() {
        let map = parse_kv_args("username=alice pass=pw1 online=1");
        assert_eq!(map.get("username").map(String::as_str), Some("alice"));
        assert_eq!(map.get("pass").map(String::as_str), Some("pw1"));
        assert_eq!(map.get("online").map(String::as_str), Some("1"));
    }

    #[test]
    fn ignores_tokens_without_equals() {
        let map = parse_kv_args("Room join roomId=3 user=bob");
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("roomId").map(String::as_str), Some("3"));
    }

    #[test]
    fn ok_predicate_requires_a_word_boundary() {
        assert!(is_ok("OK"));
        assert!(is_ok("OK roomId=1"));
        assert!(!is_ok("OKAY"));
        assert!(!is_ok("ERR not_found"));
    }

    #[test]
    fn ok_reply_payload_is_parsed() {
        let map = parse_ok_reply("OK username=alice pass=pw1 online=0");
        assert_eq!(map.get("online").map(String::as_str), Some("0"));

        assert!(parse_ok_reply("ERR not_found").is_empty());
    }

    #[test]
    fn quote_roundtrip() {
        for field in ["plain", "two words", "", r#"say "hi""#, r"back\slash", r#"\""#] {
            let quoted = quote(field);
            let mut reader = FieldReader::new(&quoted);
            assert_eq!(reader.next_string().as_deref(), Some(field), "field {:?}", field);
        }
    }

    #[test]
    fn reads_mixed_line() {
        let line = format!("ROOM 7 {} {} 2 {} {}", quote("my room"), quote("alice"), quote("bob"), quote("carol"));
        let mut reader = FieldReader::new(&line);
        assert_eq!(reader.next_token(), Some("ROOM"));
        assert_eq!(reader.next_int::<i32>(), Some(7));
        assert_eq!(reader.next_string().as_deref(), Some("my room"));
        assert_eq!(reader.next_string().as_deref(), Some("alice"));
        assert_eq!(reader.next_int::<usize>(), Some(2));
        assert_eq!(reader.next_string().as_deref(), Some("bob"));
        assert_eq!(reader.next_string().as_deref(), Some("carol"));
        assert_eq!(reader.next_token(), None);
    }

    #[test]
    fn unterminated_quote_is_rejected() {
        let mut reader = FieldReader::new("\"oops");
        assert_eq!(reader.next_string(), None);
    }
}
