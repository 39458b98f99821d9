//! Event token substitution for action arguments.
//!
//! Supported tokens:
//!
//! - `$EVENT_TYPE`, `$EVENT_SOURCE`
//! - `$EVENT_JSON`: the `{type, source, payload}` envelope
//! - `$EVENT_PAYLOAD_JSON`: the payload as JSON
//! - `$EVENT_PAYLOAD`: the payload as text
//! - `$EVENT_PAYLOAD[path]`: one field of the payload, e.g. `account.id`,
//!   `items.0.name` or `items[0].name`
//!
//! Substitution is a single left-to-right pass, so text produced by one token
//! is never re-scanned for further tokens.

use serde::Serialize;
use serde_json::{json, Value};

use crate::event::Event;

/// Event data an action runs against.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionContext {
    pub event_type: String,
    pub source: String,
    pub payload: Value,
}

impl ExecutionContext {
    pub fn new(event_type: impl Into<String>, source: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            source: source.into(),
            payload,
        }
    }

    /// The `{type, source, payload}` envelope as JSON.
    pub fn event_json(&self) -> String {
        json!({
            "type": self.event_type,
            "source": self.source,
            "payload": self.payload,
        })
        .to_string()
    }

    pub fn payload_json(&self) -> String {
        self.payload.to_string()
    }

    /// The payload as plain text: strings unquoted, null empty.
    pub fn payload_text(&self) -> String {
        stringify(&self.payload)
    }

    /// Resolve a payload path, `None` if any step is missing.
    pub fn field(&self, path: &str) -> Option<&Value> {
        let segments = parse_path(path)?;
        resolve(&self.payload, &segments)
    }

    /// Substitute every token in `input`.
    pub fn render(&self, input: &str) -> String {
        substitute(input, self)
    }

    /// Substitute tokens in every string nested inside `value`.
    pub fn render_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.render(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.render_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.render_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Environment exported to `exec` actions.
    pub fn env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("BADGER_EVENT_TYPE".to_string(), self.event_type.clone()),
            ("BADGER_EVENT_SOURCE".to_string(), self.source.clone()),
            ("BADGER_EVENT_JSON".to_string(), self.event_json()),
            ("BADGER_EVENT_PAYLOAD_JSON".to_string(), self.payload_json()),
        ];
        let text = self.payload_text();
        if !text.is_empty() {
            env.push(("BADGER_EVENT_PAYLOAD".to_string(), text));
        }
        env
    }
}

impl From<&Event> for ExecutionContext {
    fn from(event: &Event) -> Self {
        Self::new(
            event.event_type.as_str(),
            event.source.clone(),
            event.payload.clone(),
        )
    }
}

/// Render a JSON value as token text.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// One step of a payload path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Parse `a.b[0].c` style paths. Returns `None` for malformed or empty paths.
pub fn parse_path(path: &str) -> Option<Vec<Segment>> {
    let mut parser = PathParser {
        chars: path.trim().chars().collect(),
        pos: 0,
    };
    let segments = parser.path()?;
    if segments.is_empty() {
        None
    } else {
        Some(segments)
    }
}

struct PathParser {
    chars: Vec<char>,
    pos: usize,
}

impl PathParser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    // path := key suffix*
    fn path(&mut self) -> Option<Vec<Segment>> {
        let mut segments = vec![self.key()?];
        while let Some(c) = self.peek() {
            match c {
                '.' => {
                    self.pos += 1;
                    segments.push(self.key()?);
                }
                '[' => segments.push(self.index()?),
                _ => return None,
            }
        }
        Some(segments)
    }

    // key := [^.\[\]]+
    fn key(&mut self) -> Option<Segment> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, '.' | '[' | ']') {
                break;
            }
            self.pos += 1;
        }
        let key: String = self.chars[start..self.pos].iter().collect();
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        Some(Segment::Key(key.to_string()))
    }

    // index := '[' digits ']'
    fn index(&mut self) -> Option<Segment> {
        self.pos += 1;
        let start = self.pos;
        while self.peek().is_some_and(|c| c != ']') {
            self.pos += 1;
        }
        if self.peek() != Some(']') {
            return None;
        }
        let digits: String = self.chars[start..self.pos].iter().collect();
        self.pos += 1;
        digits.trim().parse().ok().map(Segment::Index)
    }
}

/// Walk `root` along `segments`.
pub fn resolve<'a>(root: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    let Some((first, rest)) = segments.split_first() else {
        return Some(root);
    };
    let next = match (root, first) {
        (Value::Object(map), Segment::Key(k)) => map.get(k),
        (Value::Object(map), Segment::Index(i)) => map.get(&i.to_string()),
        (Value::Array(items), Segment::Index(i)) => items.get(*i),
        (Value::Array(items), Segment::Key(k)) => k.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }?;
    resolve(next, rest)
}

const PAYLOAD_FIELD: &str = "$EVENT_PAYLOAD[";

/// Replace every token in `input` using `ctx`.
pub fn substitute(input: &str, ctx: &ExecutionContext) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(at) = rest.find('$') {
        out.push_str(&rest[..at]);
        rest = &rest[at..];

        if let Some(tail) = rest.strip_prefix(PAYLOAD_FIELD) {
            if let Some(end) = closing_bracket(tail) {
                let value = ctx.field(&tail[..end]).map(stringify).unwrap_or_default();
                out.push_str(&value);
                rest = &tail[end + 1..];
            } else {
                out.push('$');
                rest = &rest[1..];
            }
            continue;
        }

        let simple: [(&str, fn(&ExecutionContext) -> String); 5] = [
            ("$EVENT_PAYLOAD_JSON", ExecutionContext::payload_json),
            ("$EVENT_PAYLOAD", ExecutionContext::payload_text),
            ("$EVENT_JSON", ExecutionContext::event_json),
            ("$EVENT_TYPE", |c| c.event_type.clone()),
            ("$EVENT_SOURCE", |c| c.source.clone()),
        ];
        match simple.iter().find(|(token, _)| rest.starts_with(token)) {
            Some((token, value)) => {
                out.push_str(&value(ctx));
                rest = &rest[token.len()..];
            }
            None => {
                out.push('$');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Byte offset of the `]` closing a payload field, honouring nested `[n]`.
fn closing_bracket(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '[' => depth += 1,
            ']' if depth == 0 => return Some(i),
            ']' => depth -= 1,
            _ => {}
        }
    }
    None
}
