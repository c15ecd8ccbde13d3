//! Path addressing for form nodes.
//!
//! Four reference grammars are understood:
//!
//! | Form | Example | Meaning |
//! |------|---------|---------|
//! | fragment root | `#/a/b` | absolute from the tree root |
//! | absolute | `/a/b` | absolute from the tree root |
//! | current | `./a/b` | relative to the referring node |
//! | parent | `../../a` | relative to the N-th ancestor |
//!
//! A segment of exactly `*` is a wildcard matching every child. Literal
//! structural characters inside a segment name are written with escape codes:
//!
//! | Literal | Escape |
//! |---------|--------|
//! | `~` | `~0` |
//! | `/` | `~1` |
//! | `..` | `~2` |
//! | `.` | `~3` |
//! | `*` | `~4` |
//! | `#` | `~5` |

use std::fmt;

/// One step of a [`Path`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    /// A property name or array index.
    Key(String),
    /// Matches any child (`*`).
    Wildcard,
}

impl Segment {
    pub fn key(key: impl Into<String>) -> Self {
        Segment::Key(key.into())
    }

    /// Returns the key text, or `None` for a wildcard.
    pub fn as_key(&self) -> Option<&str> {
        match self {
            Segment::Key(k) => Some(k),
            Segment::Wildcard => None,
        }
    }

    fn parse(raw: &str) -> Self {
        if raw == "*" {
            Segment::Wildcard
        } else {
            Segment::Key(unescape_segment(raw))
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(k) => f.write_str(&escape_segment(k)),
            Segment::Wildcard => f.write_str("*"),
        }
    }
}

/// An absolute address (or address pattern, when it contains wildcards)
/// inside a form tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Path {
    segments: Vec<Segment>,
}

impl Path {
    /// The tree root.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// Builds a path from plain keys (no wildcard interpretation).
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: keys.into_iter().map(|k| Segment::Key(k.into())).collect(),
        }
    }

    /// Parses an absolute pointer (`/a/b` or `#/a/b`).
    ///
    /// Empty segments are dropped, so `""`, `"/"` and `"#"` all denote the root.
    /// A `.` segment is a no-op and a `..` segment steps up one level.
    pub fn parse(pointer: &str) -> Self {
        let body = pointer.strip_prefix('#').unwrap_or(pointer);
        let mut path = Path::root();
        path.append_raw(body);
        path
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether any segment is a wildcard.
    pub fn has_wildcard(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Wildcard))
    }

    /// Returns a new path with `key` appended.
    pub fn child(&self, key: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(Segment::Key(key.into()));
        Self { segments }
    }

    /// Returns the parent path; the root is its own parent.
    pub fn parent(&self) -> Self {
        let mut segments = self.segments.clone();
        segments.pop();
        Self { segments }
    }

    /// Last key of the path, if any.
    pub fn last_key(&self) -> Option<&str> {
        self.segments.last().and_then(Segment::as_key)
    }

    /// Whether `self` equals `prefix` or lies underneath it.
    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    /// Whether the concrete address `address` is matched by this pattern.
    pub fn matches(&self, address: &Path) -> bool {
        self.segments.len() == address.segments.len()
            && self
                .segments
                .iter()
                .zip(&address.segments)
                .all(|(pattern, actual)| match pattern {
                    Segment::Wildcard => true,
                    Segment::Key(_) => pattern == actual,
                })
    }

    /// Formats the path as an escaped pointer (`""` for the root).
    pub fn to_pointer(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            out.push('/');
            out.push_str(&segment.to_string());
        }
        out
    }

    fn truncate_parents(&mut self, count: usize) {
        let keep = self.segments.len().saturating_sub(count);
        self.segments.truncate(keep);
    }

    fn append_raw(&mut self, raw: &str) {
        for part in raw.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    self.segments.pop();
                }
                other => self.segments.push(Segment::parse(other)),
            }
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_pointer())
    }
}

impl From<&str> for Path {
    fn from(pointer: &str) -> Self {
        Path::parse(pointer)
    }
}

/// Which grammar a reference string uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// `#/…`
    Fragment,
    /// `/…`
    Absolute,
    /// `./…`
    Current,
    /// `../…`, with the number of leading parent markers.
    Parent(usize),
    /// Matches none of the grammars.
    Opaque,
}

/// Classifies a reference string.
pub fn reference_kind(reference: &str) -> ReferenceKind {
    if reference.starts_with('#') {
        ReferenceKind::Fragment
    } else if reference.starts_with('/') {
        ReferenceKind::Absolute
    } else if reference == "." || reference.starts_with("./") {
        ReferenceKind::Current
    } else if reference == ".." || reference.starts_with("../") {
        ReferenceKind::Parent(count_parent_markers(reference).0)
    } else {
        ReferenceKind::Opaque
    }
}

/// Resolves `reference` against the address `base`.
///
/// Absolute forms ignore `base`. Parent markers beyond the root clamp at the
/// root. A reference in none of the four grammars is parsed as-is, as if it
/// were absolute. Malformed input never fails; the empty string resolves to
/// the root.
pub fn resolve(base: &Path, reference: &str) -> Path {
    match reference_kind(reference) {
        ReferenceKind::Fragment | ReferenceKind::Absolute | ReferenceKind::Opaque => {
            Path::parse(reference)
        }
        ReferenceKind::Current => {
            let mut path = base.clone();
            path.append_raw(&reference[1..]);
            path
        }
        ReferenceKind::Parent(_) => {
            let (depth, rest) = count_parent_markers(reference);
            let mut path = base.clone();
            path.truncate_parents(depth);
            path.append_raw(rest);
            path
        }
    }
}

/// Resolves a reference against a base given as a pointer string.
pub fn resolve_pointer(base: &str, reference: &str) -> String {
    resolve(&Path::parse(base), reference).to_pointer()
}

fn count_parent_markers(reference: &str) -> (usize, &str) {
    let mut depth = 0;
    let mut rest = reference;
    loop {
        if let Some(next) = rest.strip_prefix("../") {
            depth += 1;
            rest = next;
        } else if rest == ".." {
            depth += 1;
            rest = "";
        } else {
            return (depth, rest);
        }
    }
}

/// Escapes a segment name so it survives as a single path segment.
pub fn escape_segment(segment: &str) -> String {
    if !segment.contains(|c| matches!(c, '~' | '/' | '.' | '*' | '#')) {
        return segment.to_string();
    }
    let mut out = String::with_capacity(segment.len() + 4);
    let mut chars = segment.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '~' => out.push_str("~0"),
            '/' => out.push_str("~1"),
            '.' if chars.peek() == Some(&'.') => {
                chars.next();
                out.push_str("~2");
            }
            '.' => out.push_str("~3"),
            '*' => out.push_str("~4"),
            '#' => out.push_str("~5"),
            other => out.push(other),
        }
    }
    out
}

/// Inverse of [`escape_segment`]. A `~` not followed by a known code is kept.
pub fn unescape_segment(segment: &str) -> String {
    if !segment.contains('~') {
        return segment.to_string();
    }
    let mut out = String::with_capacity(segment.len());
    let mut chars = segment.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '~' {
            out.push(c);
            continue;
        }
        let replacement = match chars.peek() {
            Some('0') => "~",
            Some('1') => "/",
            Some('2') => "..",
            Some('3') => ".",
            Some('4') => "*",
            Some('5') => "#",
            _ => {
                out.push('~');
                continue;
            }
        };
        chars.next();
        out.push_str(replacement);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Path {
        Path::parse(s)
    }

    #[test]
    fn absolute_forms_ignore_base() {
        let base = p("/x/y");
        assert_eq!(resolve(&base, "/a/b"), p("/a/b"));
        assert_eq!(resolve(&base, "#/a/b"), p("/a/b"));
        assert_eq!(resolve(&p("/q"), "#/a/b"), resolve(&base, "#/a/b"));
    }

    #[test]
    fn current_appends_to_base() {
        let base = p("/a");
        assert_eq!(resolve(&base, "./b/c"), p("/a/b/c"));
        assert_eq!(resolve(&base, "./"), base);
        assert_eq!(resolve(&base, "."), base);
    }

    #[test]
    fn current_is_idempotent() {
        let base = p("/a/b");
        let once = resolve(&base, "./");
        assert_eq!(resolve(&once, "./"), once);
    }

    #[test]
    fn parent_trims_segments() {
        let base = p("/a/b/c");
        assert_eq!(resolve(&base, "../x"), p("/a/b/x"));
        assert_eq!(resolve(&base, "../../x"), p("/a/x"));
        assert_eq!(resolve(&base, ".."), p("/a/b"));
    }

    #[test]
    fn parent_clamps_at_root() {
        let base = p("/a/b");
        assert_eq!(resolve(&base, "../../../x"), p("/x"));
        assert_eq!(resolve(&base, "../../x"), p("/x"));
        assert_eq!(resolve(&base, "../../../../.."), Path::root());
    }

    #[test]
    fn opaque_and_empty_references() {
        let base = p("/a");
        assert_eq!(resolve(&base, "b/c"), p("/b/c"));
        assert_eq!(resolve(&base, ""), Path::root());
        assert_eq!(reference_kind("name"), ReferenceKind::Opaque);
        assert_eq!(reference_kind("../../q"), ReferenceKind::Parent(2));
    }

    #[test]
    fn wildcard_segments() {
        let pattern = p("/items/*/price");
        assert!(pattern.has_wildcard());
        assert!(pattern.matches(&p("/items/3/price")));
        assert!(!pattern.matches(&p("/items/3/name")));
        assert!(!pattern.matches(&p("/items/3")));
    }

    #[test]
    fn escaped_wildcard_is_literal() {
        let path = p("/a/~4");
        assert!(!path.has_wildcard());
        assert_eq!(path.last_key(), Some("*"));
        assert_eq!(path.to_pointer(), "/a/~4");
    }

    #[test]
    fn escape_codes() {
        assert_eq!(escape_segment("a/b"), "a~1b");
        assert_eq!(escape_segment("~"), "~0");
        assert_eq!(escape_segment(".."), "~2");
        assert_eq!(escape_segment("a.b"), "a~3b");
        assert_eq!(escape_segment("..."), "~2~3");
        assert_eq!(escape_segment("*#"), "~4~5");
        assert_eq!(unescape_segment("~1~0~2~3~4~5"), "/~...*#");
        assert_eq!(unescape_segment("a~9"), "a~9");
    }

    #[test]
    fn escape_round_trip() {
        for s in ["", "plain", "~1", "a/b/c", "..", ".", "...", "*", "#", "~~", "x.y~z/*#..w"] {
            assert_eq!(unescape_segment(&escape_segment(s)), s, "round trip of {s:?}");
        }
    }

    #[test]
    fn pointer_formatting() {
        let path = Path::from_keys(["a.b", "c/d"]);
        assert_eq!(path.to_pointer(), "/a~3b/c~1d");
        assert_eq!(Path::parse(&path.to_pointer()), path);
        assert_eq!(Path::root().to_pointer(), "");
        assert_eq!(resolve_pointer("/a/b", "../c"), "/a/c");
    }

    #[test]
    fn starts_with_prefix() {
        assert!(p("/a/b").starts_with(&p("/a")));
        assert!(p("/a").starts_with(&Path::root()));
        assert!(!p("/ab").starts_with(&p("/a/b")));
    }
}
