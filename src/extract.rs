//! Locates a single method's source inside a decompiled class.
//!
//! No syntax tree is available here, only the pretty-printed class text. The
//! scan is a small state machine:
//!
//! - `Seeking`: find the next `name(` at or after the cursor.
//! - `Verifying`: the candidate must look like a declaration (not a qualified
//!   call or a longer identifier), carry every required modifier keyword and
//!   declare the expected number of parameters.
//! - `Locating`: bound either a brace-delimited body or a `;`-terminated
//!   declaration, pulling in annotation lines directly above it.
//!
//! Every rejection restarts `Seeking` just past the rejected candidate, so
//! overloads and unrelated occurrences are skipped rather than aborting the
//! scan.
//!
//! Parameter counting splits on top-level commas and only tracks `<...>`
//! nesting. String and character literals are not special-cased; method
//! signatures never contain them.

use crate::model::{MethodNode, ModifierSet};

/// What is known about the method being located.
#[derive(Debug, Clone, Copy)]
pub struct MethodQuery<'a> {
    pub name: &'a str,
    pub parameter_count: usize,
    pub modifiers: ModifierSet,
    /// Brace depth the declaration should sit at: 1 for members of a
    /// top-level class, 2 for members of a class nested once, and so on.
    /// Candidates at other depths are only used when nothing better exists.
    pub nesting: Option<usize>,
}

impl<'a> MethodQuery<'a> {
    pub fn new(name: &'a str, parameter_count: usize) -> Self {
        Self {
            name,
            parameter_count,
            modifiers: ModifierSet::empty(),
            nesting: None,
        }
    }

    pub fn with_modifiers(mut self, modifiers: ModifierSet) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn at_nesting(mut self, depth: usize) -> Self {
        self.nesting = Some(depth);
        self
    }
}

impl<'a> From<&'a MethodNode> for MethodQuery<'a> {
    fn from(method: &'a MethodNode) -> Self {
        let depth = method.declaring_class.full_name.matches('$').count() + 1;
        MethodQuery::new(&method.name, method.parameter_count())
            .with_modifiers(method.modifiers)
            .at_nesting(depth)
    }
}

/// Byte range of an extracted method, end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn slice<'t>(&self, text: &'t str) -> &'t str {
        &text[self.start..self.end]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    Seeking {
        cursor: usize,
    },
    Verifying {
        candidate: usize,
    },
    Locating {
        candidate: usize,
        line_start: usize,
        close_paren: usize,
    },
    Found {
        candidate: usize,
        span: Span,
    },
    Exhausted,
}

/// Returns the text of the method described by `query`, if it can be found.
pub fn extract_method<'t>(query: &MethodQuery<'_>, source: &'t str) -> Option<&'t str> {
    extract_method_span(query, source).map(|span| span.slice(source))
}

pub fn extract_method_span(query: &MethodQuery<'_>, source: &str) -> Option<Span> {
    if query.name.is_empty() || source.is_empty() {
        return None;
    }

    let scanner = Scanner::new(query, source);
    let mut fallback = None;
    let mut state = State::Seeking { cursor: 0 };
    loop {
        state = match state {
            State::Seeking { cursor } => scanner.seek(cursor),
            State::Verifying { candidate } => scanner.verify(candidate),
            State::Locating {
                candidate,
                line_start,
                close_paren,
            } => scanner.locate(candidate, line_start, close_paren),
            State::Found { candidate, span } => match query.nesting {
                Some(expected) if brace_depth_at(source, candidate) != expected => {
                    fallback.get_or_insert(span);
                    scanner.reject(candidate)
                }
                _ => return Some(span),
            },
            State::Exhausted => return fallback,
        };
    }
}

pub(crate) struct Scanner<'q, 't> {
    query: &'q MethodQuery<'q>,
    source: &'t str,
    needle: String,
}

impl<'q, 't> Scanner<'q, 't> {
    pub(crate) fn new(query: &'q MethodQuery<'q>, source: &'t str) -> Self {
        Self {
            query,
            source,
            needle: format!("{}(", query.name),
        }
    }

    pub(crate) fn seek(&self, cursor: usize) -> State {
        match self.source.get(cursor..).and_then(|rest| rest.find(&self.needle)) {
            Some(offset) => State::Verifying {
                candidate: cursor + offset,
            },
            None => State::Exhausted,
        }
    }

    pub(crate) fn reject(&self, candidate: usize) -> State {
        State::Seeking {
            cursor: candidate + self.needle.len(),
        }
    }

    pub(crate) fn verify(&self, candidate: usize) -> State {
        let preceding = self.source[..candidate].chars().next_back();
        if preceding.is_some_and(|c| c == '.' || is_identifier_char(c)) {
            return self.reject(candidate);
        }

        let line_start = line_start_of(self.source, candidate);
        let prefix = strip_leading_annotations(self.source[line_start..candidate].trim());
        if is_call_prefix(prefix) || !modifiers_match(prefix, self.query.modifiers) {
            return self.reject(candidate);
        }

        let open_paren = candidate + self.query.name.len();
        let Some(close_paren) = matching_close(self.source, open_paren, b'(', b')') else {
            return self.reject(candidate);
        };
        let params = &self.source[open_paren + 1..close_paren];
        if count_top_level_params(params) != self.query.parameter_count {
            return self.reject(candidate);
        }

        State::Locating {
            candidate,
            line_start,
            close_paren,
        }
    }

    pub(crate) fn locate(&self, candidate: usize, line_start: usize, close_paren: usize) -> State {
        let next = skip_declaration_tail(self.source, close_paren + 1);
        match self.source.as_bytes().get(next).copied() {
            Some(b'{') => return self.body(candidate, line_start, next),
            Some(b';') => return self.declaration(candidate, line_start, next),
            _ => {}
        }

        // `default` values of annotation members and similar tails that end
        // on the signature line.
        let line_end = self.source[close_paren..]
            .find('\n')
            .map_or(self.source.len(), |i| close_paren + i);
        let tail = self.source[close_paren + 1..line_end].trim_end();
        if tail.ends_with(';') && !tail.contains('{') {
            let semicolon = close_paren + 1 + tail.len() - 1;
            return self.declaration(candidate, line_start, semicolon);
        }

        self.following_lines(candidate, line_start, line_end)
    }

    /// Signature whose body or terminator sits on a later line, possibly
    /// separated by blank or annotation-only lines.
    fn following_lines(&self, candidate: usize, line_start: usize, line_end: usize) -> State {
        let mut pos = line_end + 1;
        while pos < self.source.len() {
            let end = self.source[pos..]
                .find('\n')
                .map_or(self.source.len(), |i| pos + i);
            let raw = &self.source[pos..end];
            let line = raw.trim();
            if line.is_empty() || line.starts_with('@') {
                pos = end + 1;
                continue;
            }
            if line.starts_with('{') {
                if let Some(offset) = raw.find('{') {
                    return self.body(candidate, line_start, pos + offset);
                }
            }
            if line.ends_with(';') {
                if let Some(offset) = raw.rfind(';') {
                    return self.declaration(candidate, line_start, pos + offset);
                }
            }
            break;
        }
        self.reject(candidate)
    }

    fn body(&self, candidate: usize, line_start: usize, open_brace: usize) -> State {
        match matching_close(self.source, open_brace, b'{', b'}') {
            Some(close) => State::Found {
                candidate,
                span: Span {
                    start: annotated_start(self.source, line_start),
                    end: close + 1,
                },
            },
            None => self.reject(candidate),
        }
    }

    fn declaration(&self, candidate: usize, line_start: usize, semicolon: usize) -> State {
        // A bodiless declaration always names a return type; a bare
        // `name(...);` line is a call statement.
        if self.source[line_start..candidate].trim().is_empty() {
            return self.reject(candidate);
        }
        State::Found {
            candidate,
            span: Span {
                start: annotated_start(self.source, line_start),
                end: semicolon + 1,
            },
        }
    }
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn line_start_of(source: &str, offset: usize) -> usize {
    source[..offset].rfind('\n').map_or(0, |i| i + 1)
}

/// The text before a candidate on its line reads as an expression or a
/// statement rather than a declaration prefix.
fn is_call_prefix(prefix: &str) -> bool {
    const STATEMENT_KEYWORDS: [&str; 11] = [
        "return", "new", "throw", "else", "case", "assert", "yield", "if", "while", "for", "do",
    ];

    if prefix.contains('.') || prefix.contains("->") {
        return true;
    }
    if prefix
        .chars()
        .any(|c| matches!(c, '=' | '(' | ')' | ';' | '{' | '}' | '+' | '!' | ':'))
    {
        return true;
    }
    prefix
        .split_whitespace()
        .next()
        .is_some_and(|first| STATEMENT_KEYWORDS.contains(&first))
}

/// Drops `@Name` and `@Name(...)` groups opening a declaration line. An
/// unbalanced argument list leaves the prefix untouched.
fn strip_leading_annotations(prefix: &str) -> &str {
    let mut rest = prefix;
    while let Some(after_at) = rest.strip_prefix('@') {
        let name_len = after_at
            .find(|c: char| !(is_identifier_char(c) || c == '.'))
            .unwrap_or(after_at.len());
        if name_len == 0 {
            return prefix;
        }
        let mut tail = after_at[name_len..].trim_start();
        if tail.starts_with('(') {
            let Some(close) = matching_close(tail, 0, b'(', b')') else {
                return prefix;
            };
            tail = &tail[close + 1..];
        }
        rest = tail.trim_start();
    }
    rest
}

fn modifiers_match(prefix: &str, modifiers: ModifierSet) -> bool {
    let tokens: Vec<&str> = prefix.split_whitespace().collect();
    modifiers.iter().all(|m| tokens.contains(&m.keyword()))
}

/// Position of the delimiter closing the one at `open`.
fn matching_close(source: &str, open: usize, open_ch: u8, close_ch: u8) -> Option<usize> {
    let mut depth = 0usize;
    for (i, &b) in source.as_bytes().iter().enumerate().skip(open) {
        if b == open_ch {
            depth += 1;
        } else if b == close_ch {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

pub(crate) fn count_top_level_params(params: &str) -> usize {
    let mut count = 0usize;
    let mut depth = 0usize;
    let mut in_token = false;
    for c in params.chars() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                count += 1;
                in_token = false;
            }
            c if !c.is_whitespace() => in_token = true,
            _ => {}
        }
    }
    if in_token {
        count += 1;
    }
    count
}

/// Skips whitespace and a `throws` clause following a parameter list.
fn skip_declaration_tail(source: &str, from: usize) -> usize {
    let bytes = source.as_bytes();
    let skip_ws = |mut pos: usize| {
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        pos
    };

    let pos = skip_ws(from);
    let rest = &source[pos..];
    let Some(after) = rest.strip_prefix("throws") else {
        return pos;
    };
    if after.chars().next().is_some_and(is_identifier_char) {
        return pos;
    }

    let mut end = pos + "throws".len();
    while end < bytes.len() {
        let b = bytes[end];
        if b.is_ascii_whitespace() || matches!(b, b',' | b'.' | b'<' | b'>' | b'?' | b'[' | b']')
        {
            end += 1;
            continue;
        }
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80 {
            end += 1;
            continue;
        }
        break;
    }
    end
}

/// Start of the first annotation line directly above `line_start`, or
/// `line_start` itself when there is none.
fn annotated_start(source: &str, mut line_start: usize) -> usize {
    while line_start > 0 {
        let prev_end = line_start - 1;
        let prev_start = line_start_of(source, prev_end);
        let line = source[prev_start..prev_end].trim();
        if line.starts_with('@') && !line.starts_with("@interface") {
            line_start = prev_start;
            continue;
        }
        break;
    }
    line_start
}

fn brace_depth_at(source: &str, offset: usize) -> usize {
    source.as_bytes()[..offset]
        .iter()
        .fold(0usize, |depth, &b| match b {
            b'{' => depth + 1,
            b'}' => depth.saturating_sub(1),
            _ => depth,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Modifier;

    const SAMPLE: &str = r#"package com.example;

public class Sample {
    private final Helper helper = new Helper();

    public void process(String input) {
        helper.process(input, 1);
        if (input.isEmpty()) {
            return;
        }
        process(input, input.length());
    }

    @Override
    @SuppressWarnings("unchecked")
    public void process(String input, int times) {
        for (int i = 0; i < times; i++) {
            helper.run(input);
        }
    }

    public static native int checksum(byte[] data, int offset, int length);

    @Deprecated
    protected abstract Map<String, List<Integer>> index(Map<String, Integer> a, int b);
}
"#;

    fn find(name: &str, arity: usize) -> Option<&'static str> {
        extract_method(&MethodQuery::new(name, arity), SAMPLE)
    }

    fn net_depth(text: &str) -> i64 {
        text.chars().fold(0i64, |d, c| match c {
            '{' => d + 1,
            '}' => d - 1,
            _ => d,
        })
    }

    #[test]
    fn seek_reports_next_candidate_or_exhaustion() {
        let query = MethodQuery::new("run", 0);
        let scanner = Scanner::new(&query, "a run() b run()");
        assert_eq!(scanner.seek(0), State::Verifying { candidate: 2 });
        assert_eq!(scanner.seek(3), State::Verifying { candidate: 10 });
        assert_eq!(scanner.seek(11), State::Exhausted);
        assert_eq!(scanner.seek(100), State::Exhausted);
    }

    #[test]
    fn verify_rejects_qualified_calls_and_longer_identifiers() {
        let query = MethodQuery::new("run", 0);
        let text = "this.run();\nrerun();\n";
        let scanner = Scanner::new(&query, text);
        assert_eq!(scanner.verify(5), State::Seeking { cursor: 9 });
        assert_eq!(scanner.verify(14), State::Seeking { cursor: 18 });
    }

    #[test]
    fn verify_rejects_dotted_prefixes() {
        let query = MethodQuery::new("run", 1);
        let text = "    Log.d(TAG, run(1));\n";
        let scanner = Scanner::new(&query, text);
        let candidate = text.find("run(").unwrap();
        assert_eq!(
            scanner.verify(candidate),
            State::Seeking {
                cursor: candidate + 4
            }
        );
    }

    #[test]
    fn verify_requires_modifier_keywords_from_metadata_only() {
        let text = "    static void run() {}\n";
        let candidate = text.find("run(").unwrap();

        let needs_public =
            MethodQuery::new("run", 0).with_modifiers(ModifierSet::empty().with(Modifier::Public));
        let scanner = Scanner::new(&needs_public, text);
        assert!(matches!(scanner.verify(candidate), State::Seeking { .. }));

        let unconstrained = MethodQuery::new("run", 0);
        let scanner = Scanner::new(&unconstrained, text);
        assert!(matches!(scanner.verify(candidate), State::Locating { .. }));
    }

    #[test]
    fn verify_accepts_same_line_annotations_with_arguments() {
        let text = "class A {\n    @SuppressWarnings(\"unchecked\") @Override public void run() {\n        go();\n    }\n}\n";
        let query =
            MethodQuery::new("run", 0).with_modifiers(ModifierSet::empty().with(Modifier::Public));
        assert_eq!(
            extract_method(&query, text),
            Some("    @SuppressWarnings(\"unchecked\") @Override public void run() {\n        go();\n    }")
        );

        assert_eq!(
            strip_leading_annotations("@Ann(x = 1) @Other public static"),
            "public static"
        );
        assert_eq!(strip_leading_annotations("@Broken(x public"), "@Broken(x public");
        assert_eq!(strip_leading_annotations("int x = compute"), "int x = compute");
    }

    #[test]
    fn verify_counts_parameters_ignoring_generic_commas() {
        assert_eq!(count_top_level_params(""), 0);
        assert_eq!(count_top_level_params("   "), 0);
        assert_eq!(count_top_level_params("int a"), 1);
        assert_eq!(count_top_level_params("Map<String, Integer> m, int b"), 2);
        assert_eq!(
            count_top_level_params("Map<String, List<Map<K, V>>> m, T... rest, int[] x"),
            3
        );

        let text = "    void put(Map<String, Integer> m) {}\n";
        let candidate = text.find("put(").unwrap();
        let two = MethodQuery::new("put", 2);
        assert!(matches!(
            Scanner::new(&two, text).verify(candidate),
            State::Seeking { .. }
        ));
        let one = MethodQuery::new("put", 1);
        assert!(matches!(
            Scanner::new(&one, text).verify(candidate),
            State::Locating { .. }
        ));
    }

    #[test]
    fn locate_bounds_brace_body() {
        let text = "class A {\n    void run() {\n        if (x) { y(); }\n    }\n}\n";
        let query = MethodQuery::new("run", 0);
        let scanner = Scanner::new(&query, text);
        let candidate = text.find("run(").unwrap();
        let State::Locating {
            line_start,
            close_paren,
            ..
        } = scanner.verify(candidate)
        else {
            panic!("expected a located candidate");
        };
        let State::Found { span, .. } = scanner.locate(candidate, line_start, close_paren) else {
            panic!("expected a span");
        };
        assert_eq!(
            span.slice(text),
            "    void run() {\n        if (x) { y(); }\n    }"
        );
    }

    #[test]
    fn locate_skips_throws_clause_and_next_line_brace() {
        let text = "class A {\n    void load(File f) throws IOException, java.io.EOFException\n    {\n        read(f);\n    }\n}\n";
        let got = extract_method(&MethodQuery::new("load", 1), text).unwrap();
        assert!(got.starts_with("    void load(File f) throws"));
        assert!(got.ends_with("read(f);\n    }"));
    }

    #[test]
    fn locate_handles_annotation_member_default() {
        let text = "@interface Named {\n    @Nonnull\n    String value() default \"\";\n}\n";
        let got = extract_method(&MethodQuery::new("value", 0), text).unwrap();
        assert_eq!(got, "    @Nonnull\n    String value() default \"\";");
    }

    #[test]
    fn locate_scans_past_annotation_lines_for_detached_body() {
        let text = "class A {\n    void odd()\n\n    @Marker\n    {\n        x();\n    }\n}\n";
        let got = extract_method(&MethodQuery::new("odd", 0), text).unwrap();
        assert!(got.starts_with("    void odd()"));
        assert!(got.ends_with("x();\n    }"));
    }

    #[test]
    fn locate_abandons_candidate_without_body_or_terminator() {
        let text = "    void run()\n    int other = 1\n";
        let query = MethodQuery::new("run", 0);
        let scanner = Scanner::new(&query, text);
        let candidate = text.find("run(").unwrap();
        let close_paren = text.find(')').unwrap();
        assert_eq!(
            scanner.locate(candidate, 0, close_paren),
            State::Seeking {
                cursor: candidate + 4
            }
        );
    }

    #[test]
    fn extracts_overload_matching_arity() {
        let one = find("process", 1).unwrap();
        assert!(one.starts_with("    public void process(String input) {"));
        assert!(one.contains("process(input, input.length());"));
        assert!(!one.contains("int times"));

        let two = find("process", 2).unwrap();
        assert!(two.starts_with("    @Override\n    @SuppressWarnings(\"unchecked\")\n"));
        assert!(two.contains("public void process(String input, int times) {"));
        assert!(two.ends_with("}"));
        assert_eq!(net_depth(two), 0);

        assert!(find("process", 3).is_none());
    }

    #[test]
    fn extracts_native_and_abstract_declarations() {
        let native = MethodQuery::new("checksum", 3).with_modifiers(
            ModifierSet::empty()
                .with(Modifier::Public)
                .with(Modifier::Static)
                .with(Modifier::Native),
        );
        assert_eq!(
            extract_method(&native, SAMPLE).unwrap(),
            "    public static native int checksum(byte[] data, int offset, int length);"
        );

        let abstract_query = MethodQuery::new("index", 2)
            .with_modifiers(ModifierSet::empty().with(Modifier::Abstract));
        assert_eq!(
            extract_method(&abstract_query, SAMPLE).unwrap(),
            "    @Deprecated\n    protected abstract Map<String, List<Integer>> index(Map<String, Integer> a, int b);"
        );
    }

    #[test]
    fn prefers_candidate_at_declaring_class_depth() {
        let text = r#"public class Outer {
    public static class Inner {
        public void run() {
            inner();
        }
    }

    public void run() {
        outer();
    }
}
"#;
        let top = MethodQuery::new("run", 0).at_nesting(1);
        assert!(extract_method(&top, text).unwrap().contains("outer();"));

        let nested = MethodQuery::new("run", 0).at_nesting(2);
        assert!(extract_method(&nested, text).unwrap().contains("inner();"));

        let only_nested = "class A {\n    class B {\n        void go() {}\n    }\n}\n";
        let query = MethodQuery::new("go", 0).at_nesting(1);
        assert_eq!(
            extract_method(&query, only_nested).unwrap(),
            "        void go() {}"
        );
    }

    #[test]
    fn brace_spans_are_balanced() {
        for (name, arity) in [("process", 1), ("process", 2)] {
            let span = extract_method_span(&MethodQuery::new(name, arity), SAMPLE).unwrap();
            let text = span.slice(SAMPLE);
            assert_eq!(net_depth(text), 0, "{name}/{arity}");
            assert!(text.trim_end().ends_with('}'));
        }
    }

    #[test]
    fn missing_method_yields_none() {
        assert!(find("absent", 0).is_none());
        assert!(extract_method(&MethodQuery::new("run", 0), "").is_none());
        assert!(extract_method(&MethodQuery::new("", 0), SAMPLE).is_none());
    }

    #[test]
    fn unbalanced_body_is_abandoned() {
        let text = "class A {\n    void run() {\n        x();\n";
        assert!(extract_method(&MethodQuery::new("run", 0), text).is_none());
    }

    #[test]
    fn query_from_method_node_carries_nesting() {
        use crate::model::ClassRef;
        let node = MethodNode {
            name: "go".to_string(),
            declaring_class: ClassRef::new("a.Outer$Inner"),
            parameters: vec!["int".to_string()],
            modifiers: ModifierSet::empty().with(Modifier::Private),
        };
        let query = MethodQuery::from(&node);
        assert_eq!(query.parameter_count, 1);
        assert_eq!(query.nesting, Some(2));
        assert!(query.modifiers.contains(Modifier::Private));
    }
}
