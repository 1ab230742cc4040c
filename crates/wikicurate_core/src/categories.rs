use std::collections::HashMap;
use std::ops::Range;

use serde::Serialize;

use crate::markup::{MarkupSpan, SpanKind, UnbalancedMarkupError, scan};
use crate::title::PageTitle;

const PLACEMENT_NAMESPACES: &[&str] = &["category", "template"];

/// A top-level `[[Category:...]]` membership link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryLink {
    pub title: PageTitle,
    pub sort_key: Option<String>,
    pub span: Range<usize>,
}

pub fn category_links(text: &str) -> Result<Vec<CategoryLink>, UnbalancedMarkupError> {
    let spans = scan(text)?;
    Ok(spans
        .iter()
        .filter(|span| span.kind == SpanKind::Link)
        .filter_map(|span| parse_category_link(text, span))
        .collect())
}

pub fn has_category(text: &str, name: &str) -> Result<bool, UnbalancedMarkupError> {
    let wanted = PageTitle::category(name);
    Ok(category_links(text)?
        .iter()
        .any(|link| link.title == wanted))
}

/// Add `[[Category:name]]` unless the page already has it. New links go after the last
/// existing category, or after the last real content when there is none.
pub fn add_category(text: &str, name: &str) -> Result<String, UnbalancedMarkupError> {
    let title = PageTitle::category(name);
    if title.is_empty() {
        return Ok(text.to_string());
    }
    let links = category_links(text)?;
    if links.iter().any(|link| link.title == title) {
        return Ok(text.to_string());
    }
    insert_category_markup(text, &links, &format!("[[{title}]]"))
}

pub fn remove_category(text: &str, name: &str) -> Result<String, UnbalancedMarkupError> {
    remove_category_title(text, &PageTitle::category(name))
}

/// Collapse repeated category links. The first occurrence's markup (sort key included)
/// is kept; every occurrence is removed and that markup is re-added at the normal
/// insertion point.
pub fn remove_duplicate_categories(text: &str) -> Result<String, UnbalancedMarkupError> {
    let links = category_links(text)?;
    let mut counts: HashMap<&PageTitle, usize> = HashMap::new();
    let mut first_seen: Vec<(&PageTitle, &str)> = Vec::new();
    for link in &links {
        let count = counts.entry(&link.title).or_insert(0);
        if *count == 0 {
            first_seen.push((&link.title, &text[link.span.clone()]));
        }
        *count += 1;
    }

    let mut output = text.to_string();
    for (title, markup) in first_seen {
        if counts.get(title).copied().unwrap_or(0) < 2 {
            continue;
        }
        tracing::debug!(category = %title, "collapsing duplicate category links");
        output = remove_category_title(&output, title)?;
        let remaining = category_links(&output)?;
        output = insert_category_markup(&output, &remaining, markup)?;
    }
    Ok(output)
}

fn remove_category_title(text: &str, title: &PageTitle) -> Result<String, UnbalancedMarkupError> {
    let links = category_links(text)?;
    let mut output = text.to_string();
    for link in links.iter().rev().filter(|link| &link.title == title) {
        let mut end = link.span.end;
        if output[end..].starts_with('\n') {
            end += 1;
        }
        output.replace_range(link.span.start..end, "");
    }
    Ok(output)
}

fn insert_category_markup(
    text: &str,
    links: &[CategoryLink],
    markup: &str,
) -> Result<String, UnbalancedMarkupError> {
    let (at, insertion) = match links.last() {
        Some(last) => (last.span.end, format!("\n{markup}")),
        None => {
            let at = content_end(text)?;
            if at > 0 {
                (at, format!("\n{markup}"))
            } else if text.is_empty() {
                (0, markup.to_string())
            } else {
                (0, format!("{markup}\n"))
            }
        }
    };
    let mut output = String::with_capacity(text.len() + insertion.len());
    output.push_str(&text[..at]);
    output.push_str(&insertion);
    output.push_str(&text[at..]);
    Ok(output)
}

/// Back-scan from the end of the page past whitespace, HTML comments and interwiki
/// links, returning the offset just after the last real content.
fn content_end(text: &str) -> Result<usize, UnbalancedMarkupError> {
    let spans = scan(text)?;
    let mut end = text.len();
    loop {
        end = text[..end].trim_end().len();
        let head = &text[..end];
        if head.ends_with("-->") {
            match head.rfind("<!--") {
                Some(open) => {
                    end = open;
                    continue;
                }
                None => break,
            }
        }
        if head.ends_with("]]")
            && let Some(span) = spans
                .iter()
                .find(|span| span.kind == SpanKind::Link && span.end == end)
            && is_interwiki_target(&span.name)
        {
            end = span.start;
            continue;
        }
        break;
    }
    Ok(end)
}

/// Any prefixed link target other than a category or template counts as interwiki for
/// placement purposes.
fn is_interwiki_target(target: &str) -> bool {
    if target.trim_start().starts_with(':') {
        return false;
    }
    let Some((prefix, _)) = target.split_once(':') else {
        return false;
    };
    let prefix = prefix.trim();
    !prefix.is_empty()
        && !PLACEMENT_NAMESPACES
            .iter()
            .any(|namespace| prefix.eq_ignore_ascii_case(namespace))
}

fn parse_category_link(text: &str, span: &MarkupSpan) -> Option<CategoryLink> {
    if span.name.starts_with(':') {
        return None;
    }
    let title = PageTitle::parse(&span.name);
    if !title.is_category() || title.is_empty() {
        return None;
    }
    let sort_key = span
        .separators
        .first()
        .map(|separator| text[separator + 1..span.end - 2].to_string());
    Some(CategoryLink {
        title,
        sort_key,
        span: span.range(),
    })
}
