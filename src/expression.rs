//! Dependency extraction for computed-property expressions.
//!
//! An expression such as `../age >= 18 && #/country === 'NL'` embeds path
//! tokens. Extraction lists the distinct tokens in first-seen order and
//! rewrites the expression so each token becomes `dependencies[i]`, which the
//! sandbox in [`crate::eval`] evaluates against a runtime array.

use std::collections::HashMap;
use std::rc::Rc;

/// Identifier the rewritten expression indexes into.
pub const DEPENDENCIES_IDENT: &str = "dependencies";

/// Result of scanning one expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    /// Distinct path tokens, in the order they first appear.
    pub paths: Vec<String>,
    /// The expression with each token replaced by `dependencies[i]`.
    pub rewritten: String,
}

/// Scans `expression` for path tokens and rewrites it into positional form.
///
/// A `/` only starts a path where an operand is expected, so `a / 2` stays a
/// division. String literals are copied through untouched. Tokens end at the
/// first character that cannot continue a segment; in particular a `.` after
/// a segment name ends the token, so `./name.length` reads the `length` of
/// `./name`.
pub fn extract_dependencies(expression: &str) -> Extracted {
    let chars: Vec<char> = expression.chars().collect();
    let mut paths: Vec<String> = Vec::new();
    let mut rewritten = String::with_capacity(expression.len());
    let mut expect_operand = true;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if matches!(c, '\'' | '"' | '`') {
            let end = skip_string(&chars, i);
            rewritten.extend(&chars[i..end]);
            i = end;
            expect_operand = false;
            continue;
        }

        if expect_operand {
            if let Some(end) = scan_path(&chars, i) {
                let token: String = chars[i..end].iter().collect();
                let index = match paths.iter().position(|p| *p == token) {
                    Some(index) => index,
                    None => {
                        paths.push(token);
                        paths.len() - 1
                    }
                };
                rewritten.push_str(DEPENDENCIES_IDENT);
                rewritten.push('[');
                rewritten.push_str(&index.to_string());
                rewritten.push(']');
                i = end;
                expect_operand = false;
                continue;
            }
        }

        if is_identifier_char(c) {
            let start = i;
            while i < chars.len() && (is_identifier_char(chars[i]) || chars[i] == '.') {
                // a dot only continues numeric literals like 1.5
                if chars[i] == '.' && !chars[start].is_ascii_digit() {
                    break;
                }
                i += 1;
            }
            rewritten.extend(&chars[start..i]);
            expect_operand = false;
            continue;
        }

        if !c.is_whitespace() {
            expect_operand = !matches!(c, ')' | ']' | '}');
        }
        rewritten.push(c);
        i += 1;
    }

    Extracted { paths, rewritten }
}

fn skip_string(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    chars.len()
}

/// Returns the end index of a path token starting at `start`, if one does.
fn scan_path(chars: &[char], start: usize) -> Option<usize> {
    let at = |i: usize| chars.get(i).copied();
    let mut i = start;

    match at(i)? {
        '#' if at(i + 1) == Some('/') => i += 1,
        '/' => {}
        '.' => {
            if at(i + 1) == Some('/') {
                i += 2;
            } else {
                while at(i) == Some('.') && at(i + 1) == Some('.') && at(i + 2) == Some('/') {
                    i += 3;
                }
                if i == start {
                    return None;
                }
            }
            return Some(scan_segments(chars, i));
        }
        _ => return None,
    }

    // absolute and fragment forms: `i` sits on the leading slash
    Some(scan_segments(chars, i + 1))
}

fn scan_segments(chars: &[char], mut i: usize) -> usize {
    loop {
        while i < chars.len() && is_segment_char(chars, i) {
            i += if chars[i] == '~' { 2 } else { 1 };
        }
        if i + 1 < chars.len() && chars[i] == '/' && is_segment_char(chars, i + 1) {
            i += 1;
            continue;
        }
        return i;
    }
}

fn is_segment_char(chars: &[char], i: usize) -> bool {
    match chars[i] {
        '~' => matches!(chars.get(i + 1), Some('0'..='5')),
        '*' => true,
        c => is_identifier_char(c),
    }
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Memoizes [`extract_dependencies`] per distinct expression string.
#[derive(Debug, Default)]
pub struct ExpressionCache {
    entries: HashMap<String, Rc<Extracted>>,
}

impl ExpressionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached extraction for `expression`, scanning it on first use.
    pub fn extract(&mut self, expression: &str) -> Rc<Extracted> {
        if let Some(hit) = self.entries.get(expression) {
            return Rc::clone(hit);
        }
        let extracted = Rc::new(extract_dependencies(expression));
        self.entries
            .insert(expression.to_string(), Rc::clone(&extracted));
        extracted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
