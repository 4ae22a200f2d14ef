//! Capability sets: the media formats a port or stream can handle.
//!
//! A [`Caps`] value is either `ANY`, or an ordered list of structures. Each
//! structure has a media type name and a set of fields:
//!
//! ```text
//! audio/x-raw, rate=44100, channels={ 1, 2 }; audio/x-alaw
//! ```
//!
//! Field values are scalars or lists of alternatives (`{ a, b }`). An
//! optional type annotation such as `(int)44100` is accepted and dropped.
//! `EMPTY` (or an empty string) parses to the empty set.
//!
//! # Example
//!
//! ```
//! use streamport::format::Caps;
//!
//! let port: Caps = "audio/x-raw, rate=44100".parse().unwrap();
//! let filter: Caps = "audio/x-raw".parse().unwrap();
//!
//! let result = port.intersect(&filter);
//! assert_eq!(result.to_string(), "audio/x-raw, rate=44100");
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, StreamportError};

/// A field value inside a structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A single fixed value.
    Scalar(String),
    /// A list of acceptable alternatives (always two or more entries).
    List(Vec<String>),
}

impl Value {
    fn from_alternatives(mut items: Vec<String>) -> Option<Self> {
        match items.len() {
            0 => None,
            1 => items.pop().map(Value::Scalar),
            _ => Some(Value::List(items)),
        }
    }

    fn alternatives(&self) -> Vec<&str> {
        match self {
            Value::Scalar(s) => vec![s.as_str()],
            Value::List(items) => items.iter().map(String::as_str).collect(),
        }
    }

    /// Intersect two values. `None` means they have nothing in common.
    pub fn intersect(&self, other: &Value) -> Option<Value> {
        let theirs = other.alternatives();
        let common: Vec<String> = self
            .alternatives()
            .into_iter()
            .filter(|v| theirs.contains(v))
            .map(str::to_string)
            .collect();
        Value::from_alternatives(common)
    }

    /// Whether this value is a single fixed value.
    #[inline]
    pub fn is_fixed(&self) -> bool {
        matches!(self, Value::Scalar(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(s) => write_scalar(f, s),
            Value::List(items) => {
                f.write_str("{ ")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_scalar(f, item)?;
                }
                f.write_str(" }")
            }
        }
    }
}

fn write_scalar(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    let needs_quotes = s.is_empty()
        || s
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ',' | ';' | '{' | '}' | '=' | '"'));
    if needs_quotes {
        write!(f, "\"{}\"", s.replace('"', "\\\""))
    } else {
        f.write_str(s)
    }
}

/// One media type with its constrained fields.
#[derive(Debug, Clone)]
pub struct Structure {
    name: String,
    fields: Vec<(String, Value)>,
}

impl Structure {
    /// Create a structure without fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.set(key, value);
        self
    }

    /// Set (or replace) a field.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.fields.push((key, value)),
        }
    }

    /// Media type name, e.g. `audio/x-raw`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Iterate fields in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Whether every field holds a single value.
    pub fn is_fixed(&self) -> bool {
        self.fields.iter().all(|(_, v)| v.is_fixed())
    }

    /// Copy with every list field narrowed to its first alternative.
    pub fn fixate(&self) -> Structure {
        let fields = self
            .fields
            .iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::List(items) => items
                        .first()
                        .map_or_else(|| v.clone(), |first| Value::Scalar(first.clone())),
                    Value::Scalar(_) => v.clone(),
                };
                (k.clone(), v)
            })
            .collect();
        Structure {
            name: self.name.clone(),
            fields,
        }
    }

    /// Intersect two structures.
    ///
    /// Fields of `self` come first (in order), followed by fields only
    /// present in `other`. Common fields must have a non-empty value
    /// intersection.
    pub fn intersect(&self, other: &Structure) -> Option<Structure> {
        if self.name != other.name {
            return None;
        }
        let mut out = Structure::new(self.name.clone());
        for (key, value) in &self.fields {
            let merged = match other.get(key) {
                Some(theirs) => value.intersect(theirs)?,
                None => value.clone(),
            };
            out.fields.push((key.clone(), merged));
        }
        for (key, value) in &other.fields {
            if self.get(key).is_none() {
                out.fields.push((key.clone(), value.clone()));
            }
        }
        Some(out)
    }
}

// Field order does not matter for equality.
impl PartialEq for Structure {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|o| o == v))
    }
}

impl Eq for Structure {}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for (key, value) in &self.fields {
            write!(f, ", {}={}", key, value)?;
        }
        Ok(())
    }
}

/// A set of acceptable media formats.
#[derive(Debug, Clone)]
pub enum Caps {
    /// Matches every format.
    Any,
    /// An explicit list of structures; empty means no format at all.
    List(Vec<Structure>),
}

impl Caps {
    /// The set matching every format.
    pub fn any() -> Self {
        Caps::Any
    }

    /// The empty set.
    pub fn empty() -> Self {
        Caps::List(Vec::new())
    }

    /// A set holding a single structure.
    pub fn from_structure(structure: Structure) -> Self {
        Caps::List(vec![structure])
    }

    /// Parse a wire string. Same as `str::parse`.
    pub fn from_wire(s: &str) -> Result<Self> {
        s.parse()
    }

    /// Serialize to the wire string. Same as `to_string`.
    pub fn to_wire(&self) -> String {
        self.to_string()
    }

    #[inline]
    pub fn is_any(&self) -> bool {
        matches!(self, Caps::Any)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, Caps::List(s) if s.is_empty())
    }

    /// Whether this set describes exactly one format with fixed fields.
    pub fn is_fixed(&self) -> bool {
        matches!(self, Caps::List(s) if s.len() == 1 && s[0].is_fixed())
    }

    /// Structures in this set (`ANY` has none listed).
    pub fn structures(&self) -> &[Structure] {
        match self {
            Caps::Any => &[],
            Caps::List(s) => s,
        }
    }

    /// Intersect, keeping the order of `self` first.
    pub fn intersect(&self, other: &Caps) -> Caps {
        match (self, other) {
            (Caps::Any, _) => other.clone(),
            (_, Caps::Any) => self.clone(),
            (Caps::List(mine), Caps::List(theirs)) => {
                let mut out: Vec<Structure> = Vec::new();
                for a in mine {
                    for b in theirs {
                        if let Some(s) = a.intersect(b) {
                            if !out.contains(&s) {
                                out.push(s);
                            }
                        }
                    }
                }
                Caps::List(out)
            }
        }
    }

    /// Whether the two sets have at least one format in common.
    pub fn can_intersect(&self, other: &Caps) -> bool {
        !self.intersect(other).is_empty()
    }

    /// Reduce to a single format: the first structure, with every list
    /// field narrowed to its first alternative. `ANY` and the empty set are
    /// returned unchanged.
    pub fn fixate(&self) -> Caps {
        match self {
            Caps::List(s) if !s.is_empty() => Caps::from_structure(s[0].fixate()),
            _ => self.clone(),
        }
    }
}

impl Default for Caps {
    fn default() -> Self {
        Caps::Any
    }
}

// Set semantics: structure order does not matter.
impl PartialEq for Caps {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Caps::Any, Caps::Any) => true,
            (Caps::List(a), Caps::List(b)) => {
                a.iter().all(|s| b.contains(s)) && b.iter().all(|s| a.contains(s))
            }
            _ => false,
        }
    }
}

impl Eq for Caps {}

impl fmt::Display for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Caps::Any => f.write_str("ANY"),
            Caps::List(s) if s.is_empty() => f.write_str("EMPTY"),
            Caps::List(s) => {
                for (i, structure) in s.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{}", structure)?;
                }
                Ok(())
            }
        }
    }
}

impl FromStr for Caps {
    type Err = StreamportError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim().trim_end_matches('\0');
        match trimmed {
            "ANY" => return Ok(Caps::Any),
            "" | "EMPTY" | "NONE" => return Ok(Caps::empty()),
            _ => {}
        }

        let mut structures = Vec::new();
        for part in split_top_level(trimmed, ';')? {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            structures.push(parse_structure(part)?);
        }
        Ok(Caps::List(structures))
    }
}

fn invalid(msg: impl Into<String>) -> StreamportError {
    StreamportError::InvalidArgument(msg.into())
}

/// Split on `sep`, ignoring separators inside quotes or braces.
fn split_top_level(s: &str, sep: char) -> Result<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '{' if !in_quotes => depth += 1,
            '}' if !in_quotes => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| invalid(format!("unbalanced '}}' in {:?}", s)))?;
            }
            c if c == sep && !in_quotes && depth == 0 => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    if in_quotes {
        return Err(invalid(format!("unterminated quote in {:?}", s)));
    }
    if depth != 0 {
        return Err(invalid(format!("unbalanced '{{' in {:?}", s)));
    }
    parts.push(&s[start..]);
    Ok(parts)
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.' | '+'))
}

fn parse_structure(s: &str) -> Result<Structure> {
    let mut parts = split_top_level(s, ',')?.into_iter();
    let name = parts.next().unwrap_or_default().trim();
    if !is_valid_name(name) {
        return Err(invalid(format!("invalid media type {:?}", name)));
    }

    let mut structure = Structure::new(name);
    for field in parts {
        let (key, raw) = field
            .split_once('=')
            .ok_or_else(|| invalid(format!("field without value: {:?}", field.trim())))?;
        let key = key.trim();
        if !is_valid_name(key) {
            return Err(invalid(format!("invalid field name {:?}", key)));
        }
        structure.set(key, parse_value(raw.trim())?);
    }
    Ok(structure)
}

fn parse_value(raw: &str) -> Result<Value> {
    let raw = strip_type_annotation(raw);
    if let Some(inner) = raw.strip_prefix('{') {
        let inner = inner
            .strip_suffix('}')
            .ok_or_else(|| invalid(format!("unterminated list {:?}", raw)))?;
        let mut items = Vec::new();
        for item in split_top_level(inner, ',')? {
            let item = parse_scalar(strip_type_annotation(item.trim()))?;
            if !items.contains(&item) {
                items.push(item);
            }
        }
        return Value::from_alternatives(items)
            .ok_or_else(|| invalid(format!("empty list {:?}", raw)));
    }
    parse_scalar(raw).map(Value::Scalar)
}

fn strip_type_annotation(raw: &str) -> &str {
    if raw.starts_with('(') {
        if let Some(end) = raw.find(')') {
            return raw[end + 1..].trim_start();
        }
    }
    raw
}

fn parse_scalar(raw: &str) -> Result<String> {
    if let Some(quoted) = raw.strip_prefix('"') {
        let body = quoted
            .strip_suffix('"')
            .ok_or_else(|| invalid(format!("unterminated string {:?}", raw)))?;
        return Ok(body.replace("\\\"", "\""));
    }
    if raw.is_empty() {
        return Err(invalid("empty field value"));
    }
    Ok(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn caps(s: &str) -> Caps {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_simple() {
        let c = caps("audio/x-raw, rate=44100");
        assert_eq!(c.structures().len(), 1);
        let s = &c.structures()[0];
        assert_eq!(s.name(), "audio/x-raw");
        assert_eq!(s.get("rate"), Some(&Value::Scalar("44100".into())));
        assert!(c.is_fixed());
    }

    #[test]
    fn test_parse_any_and_empty() {
        assert!(caps("ANY").is_any());
        assert!(caps("EMPTY").is_empty());
        assert!(caps("").is_empty());
        assert!(!caps("ANY").is_empty());
    }

    #[test]
    fn test_parse_type_annotation_and_list() {
        let c = caps("audio/x-raw, rate=(int)44100, channels=(int){ 1, 2 }");
        let s = &c.structures()[0];
        assert_eq!(s.get("rate"), Some(&Value::Scalar("44100".into())));
        assert_eq!(
            s.get("channels"),
            Some(&Value::List(vec!["1".into(), "2".into()]))
        );
        assert!(!c.is_fixed());
    }

    #[test]
    fn test_parse_trailing_nul() {
        // Wire strings may carry a C terminator.
        assert_eq!(caps("video/x-raw\0"), caps("video/x-raw"));
    }

    #[test]
    fn test_parse_invalid() {
        for bad in [
            "audio/x-raw, rate",
            "1audio",
            "audio/x-raw, rate={ 1, 2",
            "audio/x-raw, name=\"open",
            "audio/x-raw, rate=",
        ] {
            let err = bad.parse::<Caps>().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{:?}", bad);
        }
    }

    #[test]
    fn test_display_roundtrip() {
        let text = "audio/x-raw, rate=44100, channels={ 1, 2 }; audio/x-alaw";
        let c = caps(text);
        assert_eq!(c.to_string(), text);
        assert_eq!(caps(&c.to_string()), c);
    }

    #[test]
    fn test_display_quotes_when_needed() {
        let s = Structure::new("text/plain").with_field("title", Value::Scalar("a b".into()));
        let c = Caps::from_structure(s);
        assert_eq!(c.to_string(), "text/plain, title=\"a b\"");
        assert_eq!(caps(&c.to_string()), c);
    }

    #[test]
    fn test_intersect_adds_fields() {
        let port = caps("audio/x-raw, rate=44100");
        let filter = caps("audio/x-raw");
        assert_eq!(port.intersect(&filter).to_string(), "audio/x-raw, rate=44100");
        assert_eq!(filter.intersect(&port).to_string(), "audio/x-raw, rate=44100");
    }

    #[test]
    fn test_intersect_different_media_is_empty() {
        let result = caps("audio/x-raw").intersect(&caps("video/x-raw"));
        assert!(result.is_empty());
    }

    #[test]
    fn test_intersect_lists() {
        let a = caps("audio/x-raw, channels={ 1, 2, 6 }");
        let b = caps("audio/x-raw, channels={ 6, 2 }");
        assert_eq!(
            a.intersect(&b).to_string(),
            "audio/x-raw, channels={ 2, 6 }"
        );

        let c = caps("audio/x-raw, channels=2");
        assert_eq!(a.intersect(&c).to_string(), "audio/x-raw, channels=2");

        let d = caps("audio/x-raw, channels=4");
        assert!(a.intersect(&d).is_empty());
    }

    #[test]
    fn test_intersect_any() {
        let a = caps("video/x-raw, width=640");
        assert_eq!(Caps::any().intersect(&a), a);
        assert_eq!(a.intersect(&Caps::any()), a);
        assert!(Caps::any().intersect(&Caps::any()).is_any());
    }

    #[test]
    fn test_intersect_keeps_first_order() {
        let a = caps("audio/x-alaw; audio/x-raw");
        let b = caps("audio/x-raw; audio/x-alaw");
        let r = a.intersect(&b);
        assert_eq!(r.structures()[0].name(), "audio/x-alaw");
        assert_eq!(r.structures()[1].name(), "audio/x-raw");
    }

    #[test]
    fn test_equality_ignores_order() {
        assert_eq!(
            caps("audio/x-raw, a=1, b=2; video/x-raw"),
            caps("video/x-raw; audio/x-raw, b=2, a=1")
        );
        assert_ne!(caps("ANY"), caps("EMPTY"));
    }

    #[test]
    fn test_fixate_takes_first_alternatives() {
        let fixed = caps("audio/x-raw, rate={ 48000, 44100 }, channels=2; audio/x-alaw").fixate();
        assert!(fixed.is_fixed());
        assert_eq!(fixed.to_string(), "audio/x-raw, rate=48000, channels=2");
        assert!(caps("ANY").fixate().is_any());
        assert!(caps("EMPTY").fixate().is_empty());
    }
}
