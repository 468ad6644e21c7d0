//! Just enough XML-RPC to drive the remote decoders and to carry the
//! worker's own RPC surface.
//!
//! Calls are encoded by hand and replies are parsed by a small recursive
//! descent over a regex tokenizer. Supported value types: string, int/i4,
//! boolean, double, base64 (kept as text), nil, struct and array.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::OnceLock;

use regex::Regex;

use crate::adapter::http::{HttpRequest, HttpTransport};
use crate::adapter::AdapterError;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
    Double(f64),
    Struct(BTreeMap<String, Value>),
    Array(Vec<Value>),
    Nil,
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Member of a struct value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Struct(members) => members.get(key),
            _ => None,
        }
    }

    pub fn structure<K: Into<String>>(members: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Struct(members.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    fn write_xml(&self, out: &mut String) {
        out.push_str("<value>");
        match self {
            Value::Str(s) => {
                let _ = write!(out, "<string>{}</string>", escape(s));
            }
            Value::Int(i) => {
                let _ = write!(out, "<int>{}</int>", i);
            }
            Value::Bool(b) => {
                let _ = write!(out, "<boolean>{}</boolean>", u8::from(*b));
            }
            Value::Double(d) => {
                let _ = write!(out, "<double>{}</double>", d);
            }
            Value::Struct(members) => {
                out.push_str("<struct>");
                for (name, value) in members {
                    let _ = write!(out, "<member><name>{}</name>", escape(name));
                    value.write_xml(out);
                    out.push_str("</member>");
                }
                out.push_str("</struct>");
            }
            Value::Array(items) => {
                out.push_str("<array><data>");
                for item in items {
                    item.write_xml(out);
                }
                out.push_str("</data></array>");
            }
            Value::Nil => out.push_str("<nil/>"),
        }
        out.push_str("</value>");
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Str(s) => serde_json::Value::String(s),
            Value::Int(i) => serde_json::Value::from(i),
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Double(d) => serde_json::Value::from(d),
            Value::Struct(members) => serde_json::Value::Object(
                members.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
            Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Nil => serde_json::Value::Null,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

pub fn encode_call(method: &str, params: &[Value]) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?>\n<methodCall>");
    let _ = write!(out, "<methodName>{}</methodName><params>", escape(method));
    for param in params {
        out.push_str("<param>");
        param.write_xml(&mut out);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>");
    out
}

/// Encode a successful reply.
pub fn encode_response(value: &Value) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?>\n<methodResponse><params><param>");
    value.write_xml(&mut out);
    out.push_str("</param></params></methodResponse>");
    out
}

pub fn encode_fault(code: i64, message: &str) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?>\n<methodResponse><fault>");
    Value::structure([
        ("faultCode", Value::Int(code)),
        ("faultString", Value::from(message)),
    ])
    .write_xml(&mut out);
    out.push_str("</fault></methodResponse>");
    out
}

/// Parse a `methodResponse`. A fault becomes [`AdapterError::Fault`].
pub fn decode_response(body: &str) -> Result<Value, AdapterError> {
    let tokens = tokenize(body);
    let mut parser = Parser { tokens, pos: 0 };

    parser.expect_open("methodResponse")?;
    match parser.next_structural() {
        Some(Token::Open(tag)) if tag == "params" => {
            parser.expect_open("param")?;
            let value = parser.value()?;
            Ok(value)
        }
        Some(Token::Open(tag)) if tag == "fault" => {
            let fault = parser.value()?;
            let code = match fault.get("faultCode") {
                Some(Value::Int(code)) => *code,
                _ => 0,
            };
            let message = fault
                .get("faultString")
                .and_then(Value::as_str)
                .unwrap_or("unknown fault")
                .to_string();
            Err(AdapterError::Fault { code, message })
        }
        other => Err(unexpected("<params> or <fault>", other)),
    }
}

/// Parse a `methodCall` into its method name and parameters.
pub fn decode_call(body: &str) -> Result<(String, Vec<Value>), AdapterError> {
    let tokens = tokenize(body);
    let mut parser = Parser { tokens, pos: 0 };

    parser.expect_open("methodCall")?;
    parser.expect_open("methodName")?;
    let method = parser.text_until("methodName")?.trim().to_string();

    let mut params = Vec::new();
    match parser.next_structural() {
        Some(Token::Open(tag)) if tag == "params" => loop {
            match parser.next_structural() {
                Some(Token::Open(tag)) if tag == "param" => {
                    params.push(parser.value()?);
                    parser.expect_close("param")?;
                }
                Some(Token::Close(tag)) if tag == "params" => break,
                other => return Err(unexpected("<param> or </params>", other)),
            }
        },
        Some(Token::Empty(tag)) if tag == "params" => {}
        Some(Token::Close(tag)) if tag == "methodCall" => {}
        other => return Err(unexpected("<params>", other)),
    }
    Ok((method, params))
}

/// Issue one call and decode its reply.
pub async fn call(
    transport: &dyn HttpTransport,
    url: &str,
    method: &str,
    params: &[Value],
) -> Result<Value, AdapterError> {
    let request = HttpRequest::xml(url, encode_call(method, params));
    let body = transport.post(request).await?.into_success()?;
    decode_response(&body)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open(String),
    Close(String),
    Empty(String),
    Text(String),
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"<\?[^>]*\?>|<(/?)([A-Za-z0-9_.:-]+)\s*(/?)>|([^<]+)")
            .expect("token pattern is valid")
    })
}

fn tokenize(body: &str) -> Vec<Token> {
    token_pattern()
        .captures_iter(body)
        .filter_map(|caps| {
            if let Some(text) = caps.get(4) {
                return Some(Token::Text(unescape(text.as_str())));
            }
            let name = caps.get(2)?.as_str().to_string();
            let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
            let empty = caps.get(3).is_some_and(|m| !m.as_str().is_empty());
            Some(match (closing, empty) {
                (true, _) => Token::Close(name),
                (false, true) => Token::Empty(name),
                (false, false) => Token::Open(name),
            })
        })
        .collect()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn skip_whitespace(&mut self) {
        while let Some(Token::Text(t)) = self.tokens.get(self.pos) {
            if !t.trim().is_empty() {
                break;
            }
            self.pos += 1;
        }
    }

    fn next_structural(&mut self) -> Option<Token> {
        self.skip_whitespace();
        self.next()
    }

    fn expect_open(&mut self, tag: &str) -> Result<(), AdapterError> {
        match self.next_structural() {
            Some(Token::Open(t)) if t == tag => Ok(()),
            other => Err(unexpected(&format!("<{}>", tag), other)),
        }
    }

    fn expect_close(&mut self, tag: &str) -> Result<(), AdapterError> {
        match self.next_structural() {
            Some(Token::Close(t)) if t == tag => Ok(()),
            other => Err(unexpected(&format!("</{}>", tag), other)),
        }
    }

    /// Text up to the closing `tag`, which is consumed.
    fn text_until(&mut self, tag: &str) -> Result<String, AdapterError> {
        let mut text = String::new();
        loop {
            match self.next() {
                Some(Token::Text(t)) => text.push_str(&t),
                Some(Token::Close(t)) if t == tag => return Ok(text),
                other => return Err(unexpected(&format!("</{}>", tag), other)),
            }
        }
    }

    fn value(&mut self) -> Result<Value, AdapterError> {
        self.expect_open("value")?;

        // An untyped value is a string and keeps its whitespace.
        let value = match self.tokens.get(self.pos).cloned() {
            Some(Token::Close(c)) if c == "value" => Value::Str(String::new()),
            Some(Token::Text(t)) if self.closes_value_at(self.pos + 1) => {
                self.pos += 1;
                Value::Str(t)
            }
            _ => self.typed()?,
        };

        self.expect_close("value")?;
        Ok(value)
    }

    fn closes_value_at(&self, pos: usize) -> bool {
        matches!(self.tokens.get(pos), Some(Token::Close(c)) if c == "value")
    }

    fn typed(&mut self) -> Result<Value, AdapterError> {
        match self.next_structural() {
            Some(Token::Empty(tag)) => Ok(match tag.as_str() {
                "nil" => Value::Nil,
                _ => Value::Str(String::new()),
            }),
            Some(Token::Open(tag)) => match tag.as_str() {
                "string" | "base64" => Ok(Value::Str(self.text_until(&tag)?)),
                "int" | "i4" | "i8" => {
                    let text = self.text_until(&tag)?;
                    text.trim()
                        .parse()
                        .map(Value::Int)
                        .map_err(|_| AdapterError::Protocol(format!("bad int {:?}", text)))
                }
                "boolean" => {
                    let text = self.text_until(&tag)?;
                    match text.trim() {
                        "1" => Ok(Value::Bool(true)),
                        "0" => Ok(Value::Bool(false)),
                        other => Err(AdapterError::Protocol(format!("bad boolean {:?}", other))),
                    }
                }
                "double" => {
                    let text = self.text_until(&tag)?;
                    text.trim()
                        .parse()
                        .map(Value::Double)
                        .map_err(|_| AdapterError::Protocol(format!("bad double {:?}", text)))
                }
                "struct" => self.structure(),
                "array" => self.array(),
                other => Err(AdapterError::Protocol(format!(
                    "unsupported XML-RPC type <{}>",
                    other
                ))),
            },
            other => Err(unexpected("a typed value", other)),
        }
    }

    fn structure(&mut self) -> Result<Value, AdapterError> {
        let mut members = BTreeMap::new();
        loop {
            match self.next_structural() {
                Some(Token::Open(t)) if t == "member" => {
                    self.expect_open("name")?;
                    let name = self.text_until("name")?;
                    let value = self.value()?;
                    self.expect_close("member")?;
                    members.insert(name, value);
                }
                Some(Token::Close(t)) if t == "struct" => return Ok(Value::Struct(members)),
                other => return Err(unexpected("<member> or </struct>", other)),
            }
        }
    }

    fn array(&mut self) -> Result<Value, AdapterError> {
        let mut items = Vec::new();
        match self.next_structural() {
            Some(Token::Open(t)) if t == "data" => {}
            Some(Token::Empty(t)) if t == "data" => {
                self.expect_close("array")?;
                return Ok(Value::Array(items));
            }
            other => return Err(unexpected("<data>", other)),
        }
        loop {
            self.skip_whitespace();
            match self.tokens.get(self.pos) {
                Some(Token::Close(t)) if t == "data" => {
                    self.pos += 1;
                    self.expect_close("array")?;
                    return Ok(Value::Array(items));
                }
                _ => items.push(self.value()?),
            }
        }
    }
}

fn unexpected(expected: &str, found: Option<Token>) -> AdapterError {
    AdapterError::Protocol(format!(
        "malformed XML-RPC reply: expected {}, found {:?}",
        expected, found
    ))
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub(crate) fn unescape(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        rest = &rest[start..];
        let Some(end) = rest.find(';') else {
            break;
        };
        let entity = &rest[1..end];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
