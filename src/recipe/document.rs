//! Structural document model for conan recipe sources.
//!
//! A recipe is a Python source file whose interesting state lives in scalar
//! assignments inside one declaring class (the class deriving from the
//! configured base, `PlexConanFile` by default). depforge edits exactly
//! three kinds of leaves - the revision integer, the version string, and
//! package-reference string literals - and must reproduce every other byte
//! of the file untouched, comments and quirky formatting included.
//!
//! Rather than templating text, [`RecipeDocument`] keeps the file as a list
//! of physical lines (each with its original terminator) and classifies the
//! lines inside the declaring class body on demand. Edits replace only the
//! value span of a matched line, so rendering the document after no edits is
//! byte-identical to the input.

use regex::Regex;
use std::ops::Range;
use std::sync::LazyLock;

/// Assignment keys that declare the package version, in preference order.
pub const VERSION_KEYS: &[&str] = &["plex_version", "version"];
/// Assignment keys that declare the package revision, in preference order.
pub const REVISION_KEYS: &[&str] = &["plex_revision", "revision"];
/// Assignment/call names that declare requirements.
pub const REQUIREMENT_KEYS: &[&str] =
    &["plex_requires", "plex_build_requires", "requires", "build_requires"];

/// `class Name(Base):` with the base captured.
static CLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*)class\s+[A-Za-z_]\w*\s*\(\s*([A-Za-z_][\w.]*)\s*\)\s*:").unwrap()
});

/// `key = value`, value captured with its column preserved.
static ASSIGN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Za-z_]\w*)\s*=\s*(\S.*)$").unwrap());

/// A string literal value, with optional f-prefix (contents captured).
static STRING_VALUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^f?"([^"]*)""#).unwrap());

/// An integer literal value.
static INT_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)\s*$").unwrap());

/// Any double-quoted literal inside a line (contents captured).
static STRING_LITERAL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""([^"]*)""#).unwrap());

/// A `self.<requirement-key>(` call.
static REQUIRE_CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bself\s*\.\s*(plex_requires|plex_build_requires|requires|build_requires)\s*\(")
        .unwrap()
});

/// A package reference: `name/version` with an optional `-revision` folded
/// into the version token. Matched against whole string-literal contents.
static PKG_REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z0-9_][A-Za-z0-9_-]*)/([0-9a-z.\-]+)$").unwrap());

/// A valid version token (optionally including the `-revision` suffix).
static VERSION_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9a-z.\-]+$").unwrap());

/// Check whether a string is a `name/version[-revision]` package reference,
/// returning the name part.
pub fn package_ref_name(literal: &str) -> Option<&str> {
    PKG_REF_RE.captures(literal).map(|c| c.get(1).unwrap().as_str())
}

/// Check whether a version token (with or without revision suffix) is valid.
pub fn is_valid_version_token(token: &str) -> bool {
    VERSION_TOKEN_RE.is_match(token)
}

/// One physical line, terminator kept separate so rendering is exact.
#[derive(Debug, Clone)]
struct Line {
    text: String,
    eol: String,
}

/// An editable, format-preserving view of one recipe source.
#[derive(Debug, Clone)]
pub struct RecipeDocument {
    lines: Vec<Line>,
    /// Line-index range of the declaring class body (exclusive of the
    /// `class` line itself). `None` when no class derives from the marker.
    body: Option<Range<usize>>,
}

impl RecipeDocument {
    /// Parse a source into lines and locate the declaring class body.
    pub fn parse(source: &str, base_class: &str) -> Self {
        let lines = split_lines(source);
        let body = find_class_body(&lines, base_class);
        Self { lines, body }
    }

    /// Parse a source treating the whole file as editable body. Used for
    /// `test_package` recipes, which derive from plain conan base classes
    /// but still pin package references that must be rewritten.
    pub fn parse_loose(source: &str) -> Self {
        let lines = split_lines(source);
        let body = Some(0..lines.len());
        Self { lines, body }
    }

    /// Whether a class deriving from the configured base was found.
    pub fn has_declaring_class(&self) -> bool {
        self.body.is_some()
    }

    /// Reassemble the source, byte-identical where nothing was edited.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(&line.text);
            out.push_str(&line.eol);
        }
        out
    }

    fn body_range(&self) -> Range<usize> {
        self.body.clone().unwrap_or(0..0)
    }

    /// First string assignment among `keys` in the class body.
    pub fn string_assignment(&self, keys: &[&str]) -> Option<String> {
        for key in keys {
            for idx in self.body_range() {
                if let Some((k, value)) = parse_assignment(&self.lines[idx].text)
                    && k == *key
                    && let Some(caps) = STRING_VALUE_RE.captures(value)
                {
                    return Some(caps.get(1).unwrap().as_str().to_string());
                }
            }
        }
        None
    }

    /// First integer assignment among `keys` in the class body.
    pub fn int_assignment(&self, keys: &[&str]) -> Option<i64> {
        for key in keys {
            for idx in self.body_range() {
                if let Some((k, value)) = parse_assignment(&self.lines[idx].text)
                    && k == *key
                    && let Some(caps) = INT_VALUE_RE.captures(value)
                {
                    return caps.get(1).unwrap().as_str().parse().ok();
                }
            }
        }
        None
    }

    /// Replace the integer value of the first assignment among `keys`.
    /// Returns false when no such assignment exists.
    pub fn set_int_assignment(&mut self, keys: &[&str], value: i64) -> bool {
        for key in keys {
            for idx in self.body_range() {
                let text = &self.lines[idx].text;
                if let Some((k, span)) = assignment_value_span(text)
                    && k == *key
                    && INT_VALUE_RE.is_match(&text[span.clone()])
                {
                    let new_value = value.to_string();
                    if text[span.clone()] != new_value {
                        self.lines[idx].text.replace_range(span, &new_value);
                    }
                    return true;
                }
            }
        }
        false
    }

    /// Replace the string contents of the first assignment among `keys`.
    /// Returns false when no such assignment exists.
    pub fn set_string_assignment(&mut self, keys: &[&str], value: &str) -> bool {
        for key in keys {
            for idx in self.body_range() {
                let text = &self.lines[idx].text;
                if let Some((k, span)) = assignment_value_span(text)
                    && k == *key
                    && let Some(content) = string_content_span(&text[span.clone()])
                {
                    let span = span.start + content.start..span.start + content.end;
                    if text[span.clone()] != *value {
                        self.lines[idx].text.replace_range(span, value);
                    }
                    return true;
                }
            }
        }
        false
    }

    /// Collect every package-reference string declared as a requirement:
    /// single string assignments, list/tuple assignments (possibly spanning
    /// lines), and `self.requires(..)`-style calls. Strings that do not
    /// look like `name/version` are ignored.
    pub fn requirement_refs(&self) -> Vec<String> {
        let mut refs = Vec::new();
        let mut seq_depth = 0i32;

        for idx in self.body_range() {
            let text = &self.lines[idx].text;

            if seq_depth > 0 {
                collect_refs(text, &mut refs);
                seq_depth += bracket_delta(text);
                continue;
            }

            if let Some((key, value)) = parse_assignment(text) {
                if REQUIREMENT_KEYS.contains(&key) {
                    if STRING_VALUE_RE.is_match(value)
                        || value.starts_with('(')
                        || value.starts_with('[')
                    {
                        collect_refs(value, &mut refs);
                        seq_depth = bracket_delta(value).max(0);
                    }
                }
                continue;
            }

            if REQUIRE_CALL_RE.is_match(text) {
                collect_refs(text, &mut refs);
            }
        }
        refs
    }

    /// Rewrite every package-reference literal in the class body whose name
    /// is `dep_name` to `new_ref`. Returns the `(old, new)` pairs actually
    /// changed; literals already equal to `new_ref` are left alone.
    pub fn rewrite_refs(&mut self, dep_name: &str, new_ref: &str) -> Vec<(String, String)> {
        let mut rewrites = Vec::new();
        for idx in self.body_range() {
            let text = self.lines[idx].text.clone();
            // collect matches first, then edit right-to-left so earlier
            // spans stay valid
            let mut spans: Vec<Range<usize>> = Vec::new();
            for caps in STRING_LITERAL_RE.captures_iter(&text) {
                let content = caps.get(1).unwrap();
                if let Some(name) = package_ref_name(content.as_str())
                    && name == dep_name
                    && content.as_str() != new_ref
                {
                    spans.push(content.range());
                }
            }
            for span in spans.into_iter().rev() {
                rewrites.push((text[span.clone()].to_string(), new_ref.to_string()));
                self.lines[idx].text.replace_range(span, new_ref);
            }
        }
        rewrites
    }
}

fn split_lines(source: &str) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut rest = source;
    while !rest.is_empty() {
        match rest.find('\n') {
            Some(pos) => {
                let (chunk, tail) = rest.split_at(pos + 1);
                let (text, eol) = if chunk.ends_with("\r\n") {
                    (&chunk[..chunk.len() - 2], "\r\n")
                } else {
                    (&chunk[..chunk.len() - 1], "\n")
                };
                lines.push(Line { text: text.to_string(), eol: eol.to_string() });
                rest = tail;
            }
            None => {
                lines.push(Line { text: rest.to_string(), eol: String::new() });
                rest = "";
            }
        }
    }
    lines
}

fn indent_width(text: &str) -> usize {
    text.len() - text.trim_start().len()
}

fn find_class_body(lines: &[Line], base_class: &str) -> Option<Range<usize>> {
    for (idx, line) in lines.iter().enumerate() {
        let Some(caps) = CLASS_RE.captures(&line.text) else {
            continue;
        };
        if caps.get(2).unwrap().as_str() != base_class {
            continue;
        }
        let class_indent = caps.get(1).unwrap().as_str().len();
        let mut end = idx + 1;
        for (offset, body_line) in lines[idx + 1..].iter().enumerate() {
            let text = &body_line.text;
            if text.trim().is_empty() || indent_width(text) > class_indent {
                end = idx + 1 + offset + 1;
            } else {
                break;
            }
        }
        return Some(idx + 1..end);
    }
    None
}

fn parse_assignment(text: &str) -> Option<(&str, &str)> {
    let caps = ASSIGN_RE.captures(text)?;
    Some((caps.get(1).unwrap().as_str(), caps.get(2).unwrap().as_str()))
}

fn assignment_value_span(text: &str) -> Option<(&str, Range<usize>)> {
    let caps = ASSIGN_RE.captures(text)?;
    Some((caps.get(1).unwrap().as_str(), caps.get(2).unwrap().range()))
}

/// Span of the contents of a leading string literal, relative to `value`.
fn string_content_span(value: &str) -> Option<Range<usize>> {
    STRING_VALUE_RE.captures(value).map(|caps| caps.get(1).unwrap().range())
}

fn collect_refs(text: &str, refs: &mut Vec<String>) {
    for caps in STRING_LITERAL_RE.captures_iter(text) {
        let content = caps.get(1).unwrap().as_str();
        if package_ref_name(content).is_some() {
            refs.push(content.to_string());
        }
    }
}

/// Net bracket nesting change of a line, ignoring brackets inside strings.
fn bracket_delta(text: &str) -> i32 {
    let mut delta = 0;
    let mut in_string = false;
    for ch in text.chars() {
        match ch {
            '"' => in_string = !in_string,
            '(' | '[' if !in_string => delta += 1,
            ')' | ']' if !in_string => delta -= 1,
            '#' if !in_string => break,
            _ => {}
        }
    }
    delta
}
