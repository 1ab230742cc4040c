use std::fmt;
use std::ops::Range;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    Template,
    Link,
}

impl SpanKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Template => "template",
            Self::Link => "link",
        }
    }

    fn open_delimiter(self) -> &'static [u8] {
        match self {
            Self::Template => b"{{",
            Self::Link => b"[[",
        }
    }

    fn close_delimiter(self) -> &'static [u8] {
        match self {
            Self::Template => b"}}",
            Self::Link => b"]]",
        }
    }
}

impl fmt::Display for SpanKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// A matched `{{...}}` or `[[...]]` region. Offsets are byte offsets into the scanned
/// text, `end` exclusive, delimiters included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarkupSpan {
    pub kind: SpanKind,
    pub start: usize,
    pub end: usize,
    pub name: String,
    pub depth: usize,
    /// Offsets of the `|` separators that belong to this span and not to a nested one.
    pub separators: Vec<usize>,
    pub children: Vec<MarkupSpan>,
}

impl MarkupSpan {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// The range between the delimiters.
    pub fn inner_range(&self) -> Range<usize> {
        self.start + 2..self.end - 2
    }

    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.range()]
    }

    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.start && offset < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Unbalance {
    UnexpectedClose,
    MismatchedClose { open: SpanKind, opened_at: usize },
    Unclosed,
}

impl fmt::Display for Unbalance {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedClose => formatter.write_str("closer without a matching opener"),
            Self::MismatchedClose { open, opened_at } => {
                write!(formatter, "closes a {open} opened at byte {opened_at}")
            }
            Self::Unclosed => formatter.write_str("opener is never closed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("unbalanced {kind} markup at byte {position}: {problem}")]
pub struct UnbalancedMarkupError {
    pub kind: SpanKind,
    pub position: usize,
    pub problem: Unbalance,
}

impl UnbalancedMarkupError {
    /// 1-based line and column (in characters) of the error position.
    pub fn line_and_column(&self, text: &str) -> (usize, usize) {
        let position = self.position.min(text.len());
        let before = &text[..position];
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map(|index| index + 1).unwrap_or(0);
        let column = before[line_start..].chars().count() + 1;
        (line, column)
    }
}

/// Scan wikitext into its top-level template and link spans. Nested spans hang off
/// their parent's `children`.
pub fn scan(text: &str) -> Result<Vec<MarkupSpan>, UnbalancedMarkupError> {
    Scanner::new(text).run()
}

pub fn is_balanced(text: &str) -> bool {
    scan(text).is_ok()
}

/// Every span in document order, parents before their children.
pub fn walk(spans: &[MarkupSpan]) -> Vec<&MarkupSpan> {
    let mut out = Vec::new();
    for span in spans {
        push_preorder(span, &mut out);
    }
    out
}

fn push_preorder<'a>(span: &'a MarkupSpan, out: &mut Vec<&'a MarkupSpan>) {
    out.push(span);
    for child in &span.children {
        push_preorder(child, out);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    CommentOpen,
    CommentClose,
    NowikiOpen,
    NowikiClose,
    NowikiEmpty(usize),
    Open(SpanKind),
    Close(SpanKind),
    Pipe,
    Text,
}

impl Token {
    fn len(self) -> usize {
        match self {
            Self::CommentOpen => 4,
            Self::CommentClose => 3,
            Self::NowikiOpen => 8,
            Self::NowikiClose => 9,
            Self::NowikiEmpty(len) => len,
            Self::Open(_) | Self::Close(_) => 2,
            Self::Pipe | Self::Text => 1,
        }
    }
}

/// Comment and nowiki state are tracked independently; delimiters only match while
/// both are off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Suppression {
    comment: bool,
    nowiki: bool,
}

impl Suppression {
    fn active(self) -> bool {
        self.comment || self.nowiki
    }
}

#[derive(Debug)]
struct Frame {
    kind: SpanKind,
    start: usize,
    separators: Vec<usize>,
    children: Vec<MarkupSpan>,
}

struct Scanner<'a> {
    text: &'a str,
    suppression: Suppression,
    stack: Vec<Frame>,
    finished: Vec<MarkupSpan>,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            suppression: Suppression::default(),
            stack: Vec::new(),
            finished: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<MarkupSpan>, UnbalancedMarkupError> {
        let text = self.text;
        let bytes = text.as_bytes();
        let mut cursor = 0usize;

        while cursor < bytes.len() {
            let token = next_token(&bytes[cursor..]);
            match token {
                Token::CommentOpen => self.suppression.comment = true,
                Token::CommentClose => self.suppression.comment = false,
                Token::NowikiOpen => self.suppression.nowiki = true,
                Token::NowikiClose => self.suppression.nowiki = false,
                Token::NowikiEmpty(_) | Token::Text => {}
                Token::Open(kind) if !self.suppression.active() => self.open(kind, cursor),
                Token::Close(kind) if !self.suppression.active() => self.close(kind, cursor)?,
                Token::Pipe if !self.suppression.active() => {
                    if let Some(frame) = self.stack.last_mut() {
                        frame.separators.push(cursor);
                    }
                }
                Token::Open(_) | Token::Close(_) | Token::Pipe => {}
            }
            cursor += token.len();
        }

        if let Some(frame) = self.stack.first() {
            return Err(UnbalancedMarkupError {
                kind: frame.kind,
                position: frame.start,
                problem: Unbalance::Unclosed,
            });
        }
        Ok(self.finished)
    }

    fn open(&mut self, kind: SpanKind, at: usize) {
        self.stack.push(Frame {
            kind,
            start: at,
            separators: Vec::new(),
            children: Vec::new(),
        });
    }

    fn close(&mut self, kind: SpanKind, at: usize) -> Result<(), UnbalancedMarkupError> {
        let Some(frame) = self.stack.pop() else {
            return Err(UnbalancedMarkupError {
                kind,
                position: at,
                problem: Unbalance::UnexpectedClose,
            });
        };
        if frame.kind != kind {
            return Err(UnbalancedMarkupError {
                kind,
                position: at,
                problem: Unbalance::MismatchedClose {
                    open: frame.kind,
                    opened_at: frame.start,
                },
            });
        }

        let name_end = frame.separators.first().copied().unwrap_or(at);
        let span = MarkupSpan {
            kind,
            start: frame.start,
            end: at + kind.close_delimiter().len(),
            name: self.text[frame.start + kind.open_delimiter().len()..name_end]
                .trim()
                .to_string(),
            depth: self.stack.len(),
            separators: frame.separators,
            children: frame.children,
        };
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(span),
            None => self.finished.push(span),
        }
        Ok(())
    }
}

fn next_token(rest: &[u8]) -> Token {
    if rest.starts_with(b"<!--") {
        return Token::CommentOpen;
    }
    if rest.starts_with(b"-->") {
        return Token::CommentClose;
    }
    if rest.first() == Some(&b'<') {
        if starts_with_ignore_case(rest, b"<nowiki>") {
            return Token::NowikiOpen;
        }
        if starts_with_ignore_case(rest, b"</nowiki>") {
            return Token::NowikiClose;
        }
        if starts_with_ignore_case(rest, b"<nowiki/>") {
            return Token::NowikiEmpty(9);
        }
        if starts_with_ignore_case(rest, b"<nowiki />") {
            return Token::NowikiEmpty(10);
        }
        return Token::Text;
    }
    for kind in [SpanKind::Template, SpanKind::Link] {
        if rest.starts_with(kind.open_delimiter()) {
            return Token::Open(kind);
        }
        if rest.starts_with(kind.close_delimiter()) {
            return Token::Close(kind);
        }
    }
    if rest.first() == Some(&b'|') {
        return Token::Pipe;
    }
    Token::Text
}

fn starts_with_ignore_case(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.len() >= needle.len() && haystack[..needle.len()].eq_ignore_ascii_case(needle)
}

#[cfg(test)]
mod tests {
    use super::{SpanKind, Unbalance, is_balanced, scan, walk};

    #[test]
    fn concatenated_fragments_yield_one_span_each() {
        let fragments = [
            "{{Information}}",
            "[[Category:Foo]]",
            "{{PD-old}}",
            "[[File:Example.jpg]]",
        ];
        let text = fragments.join("\n");
        let spans = scan(&text).expect("balanced");
        assert_eq!(spans.len(), fragments.len());
        assert_eq!(spans[0].name, "Information");
        assert_eq!(spans[1].kind, SpanKind::Link);
        assert_eq!(spans[1].name, "Category:Foo");
    }

    #[test]
    fn unbalanced_markup_is_reported() {
        let error = scan("{{a}}}}").expect_err("extra template closer");
        assert_eq!(error.kind, SpanKind::Template);
        assert_eq!(error.position, 5);
        assert_eq!(error.problem, Unbalance::UnexpectedClose);

        let error = scan("[[a]]]]").expect_err("extra link closer");
        assert_eq!(error.kind, SpanKind::Link);
        assert_eq!(error.problem, Unbalance::UnexpectedClose);

        let error = scan("{{a[[b}}]]").expect_err("crossed delimiters");
        assert_eq!(error.kind, SpanKind::Template);
        assert_eq!(error.position, 6);
        assert_eq!(
            error.problem,
            Unbalance::MismatchedClose {
                open: SpanKind::Link,
                opened_at: 3,
            }
        );
    }

    #[test]
    fn unclosed_opener_reports_its_position() {
        let error = scan("intro {{Information|a=[[b]]").expect_err("unclosed");
        assert_eq!(error.problem, Unbalance::Unclosed);
        assert_eq!(error.position, 6);
    }

    #[test]
    fn comments_and_nowiki_suppress_delimiters() {
        assert!(is_balanced("text <!-- {{broken --> more"));
        assert!(is_balanced("<nowiki>}}]]</nowiki>{{ok}}"));
        assert!(is_balanced("<NOWIKI>{{</NOWIKI>"));
        let spans = scan("<!-- [[Category:Hidden]] -->[[Category:Shown]]").expect("balanced");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "Category:Shown");
    }

    #[test]
    fn comment_state_survives_nowiki_close() {
        // The comment opened inside nowiki keeps suppressing after </nowiki>.
        let spans = scan("<nowiki><!--</nowiki>{{a}}-->{{b}}").expect("balanced");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "b");
    }

    #[test]
    fn self_closing_nowiki_is_ignored() {
        let spans = scan("{{a<nowiki/>b}}").expect("balanced");
        assert_eq!(spans.len(), 1);
    }

    #[test]
    fn names_stop_at_first_top_level_pipe() {
        let spans = scan("{{ Information\n|description={{en|1=[[a|b]]}}\n|date=1900}}")
            .expect("balanced");
        assert_eq!(spans.len(), 1);
        let info = &spans[0];
        assert_eq!(info.name, "Information");
        assert_eq!(info.separators.len(), 2);
        assert_eq!(info.children.len(), 1);
        assert_eq!(info.children[0].name, "en");
        assert_eq!(info.children[0].depth, 1);
        assert_eq!(info.children[0].children[0].name, "a");
    }

    #[test]
    fn walk_visits_in_document_order() {
        let spans = scan("{{a|{{b}}|[[c]]}}{{d}}").expect("balanced");
        let names = walk(&spans)
            .into_iter()
            .map(|span| span.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn triple_brace_parameters_stay_balanced() {
        assert!(is_balanced("{{{1|default}}}"));
        assert!(is_balanced("{{#if:{{{1|}}}|yes|no}}"));
    }

    #[test]
    fn multibyte_text_keeps_offsets_on_char_boundaries() {
        let text = "Überblick {{Größe|é}} ✓";
        let spans = scan(text).expect("balanced");
        assert_eq!(spans[0].text(text), "{{Größe|é}}");
        assert_eq!(spans[0].name, "Größe");
    }

    #[test]
    fn line_and_column_point_at_the_error() {
        let text = "line one\nline {{two";
        let error = scan(text).expect_err("unclosed");
        assert_eq!(error.line_and_column(text), (2, 6));
    }
}
