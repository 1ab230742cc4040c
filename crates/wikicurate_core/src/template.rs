use std::ops::Range;

use serde::Serialize;

use crate::markup::{MarkupSpan, SpanKind, UnbalancedMarkupError, scan, walk};
use crate::title::names_match;

/// How a template parameter is addressed: by position among the unnamed parameters,
/// or by an explicit `name=`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ParameterKey {
    Positional(usize),
    Named(String),
}

impl ParameterKey {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// `3` selects the third positional parameter, anything else a named one.
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        match trimmed.parse::<usize>() {
            Ok(position) if position > 0 => Self::Positional(position),
            _ => Self::Named(trimmed.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateParameter {
    pub index: ParameterKey,
    pub value_span: Range<usize>,
    pub raw_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateMatch {
    pub span: Range<usize>,
    pub body: String,
}

pub fn extract_template(
    text: &str,
    name: &str,
) -> Result<Option<TemplateMatch>, UnbalancedMarkupError> {
    let Some(span) = find_template(text, name)? else {
        return Ok(None);
    };
    Ok(Some(TemplateMatch {
        body: span.text(text).to_string(),
        span: span.range(),
    }))
}

/// Remove the first occurrence of `name`, together with one newline directly after it.
pub fn remove_template(text: &str, name: &str) -> Result<Option<String>, UnbalancedMarkupError> {
    let Some(span) = find_template(text, name)? else {
        return Ok(None);
    };
    let mut end = span.end;
    if text[end..].starts_with('\n') {
        end += 1;
    }
    let mut output = String::with_capacity(text.len());
    output.push_str(&text[..span.start]);
    output.push_str(&text[end..]);
    Ok(Some(output))
}

pub fn parameters(body: &str) -> Result<Vec<TemplateParameter>, UnbalancedMarkupError> {
    let spans = scan(body)?;
    let Some(root) = spans.iter().find(|span| span.kind == SpanKind::Template) else {
        return Ok(Vec::new());
    };
    Ok(split_parameters(body, root))
}

pub fn get_parameter(
    body: &str,
    key: &ParameterKey,
) -> Result<Option<String>, UnbalancedMarkupError> {
    Ok(parameters(body)?
        .into_iter()
        .find(|parameter| &parameter.index == key)
        .map(|parameter| parameter.raw_value))
}

/// Replace the value of `key`, or append the parameter before the closing `}}` when
/// the template does not have it yet.
pub fn set_parameter(
    body: &str,
    key: &ParameterKey,
    value: &str,
) -> Result<String, UnbalancedMarkupError> {
    let spans = scan(body)?;
    let Some(root) = spans.iter().find(|span| span.kind == SpanKind::Template) else {
        return Ok(body.to_string());
    };
    let parameters = split_parameters(body, root);

    if let Some(existing) = parameters.iter().find(|parameter| &parameter.index == key) {
        let mut output = String::with_capacity(body.len() + value.len());
        output.push_str(&body[..existing.value_span.start]);
        output.push_str(value);
        output.push_str(&body[existing.value_span.end..]);
        return Ok(output);
    }

    let positional_count = parameters
        .iter()
        .filter(|parameter| matches!(parameter.index, ParameterKey::Positional(_)))
        .count();
    let mut addition = match key {
        ParameterKey::Named(name) => format!("|{name}={value}"),
        ParameterKey::Positional(position)
            if *position == positional_count + 1 && !value.contains('=') =>
        {
            format!("|{value}")
        }
        ParameterKey::Positional(position) => format!("|{position}={value}"),
    };

    let close = root.end - 2;
    if body[..close].ends_with('\n') {
        addition = format!("{}\n", &addition);
    }
    let mut output = String::with_capacity(body.len() + addition.len());
    output.push_str(&body[..close]);
    output.push_str(&addition);
    output.push_str(&body[close..]);
    Ok(output)
}

/// Set a parameter on the first `name` template in a page. Returns `None` when the
/// page has no such template.
pub fn set_template_parameter(
    text: &str,
    name: &str,
    key: &ParameterKey,
    value: &str,
) -> Result<Option<String>, UnbalancedMarkupError> {
    let Some(span) = find_template(text, name)? else {
        return Ok(None);
    };
    let updated = set_parameter(span.text(text), key, value)?;
    let mut output = String::with_capacity(text.len() + value.len());
    output.push_str(&text[..span.start]);
    output.push_str(&updated);
    output.push_str(&text[span.end..]);
    Ok(Some(output))
}

pub fn template_names_match(candidate: &str, wanted: &str) -> bool {
    names_match(strip_template_prefix(candidate), strip_template_prefix(wanted))
}

pub(crate) fn find_template(
    text: &str,
    name: &str,
) -> Result<Option<MarkupSpan>, UnbalancedMarkupError> {
    let spans = scan(text)?;
    Ok(walk(&spans)
        .into_iter()
        .find(|span| span.kind == SpanKind::Template && template_names_match(&span.name, name))
        .cloned())
}

fn strip_template_prefix(name: &str) -> &str {
    let trimmed = name.trim();
    match trimmed.split_once(':') {
        Some((prefix, rest)) if prefix.trim().eq_ignore_ascii_case("template") => rest.trim(),
        _ => trimmed,
    }
}

fn split_parameters(body: &str, root: &MarkupSpan) -> Vec<TemplateParameter> {
    let close = root.end - 2;
    let mut out = Vec::new();
    let mut positional = 0usize;

    for (position, separator) in root.separators.iter().enumerate() {
        let segment_start = separator + 1;
        let segment_end = root
            .separators
            .get(position + 1)
            .copied()
            .unwrap_or(close);

        let equals = body[segment_start..segment_end]
            .match_indices('=')
            .map(|(offset, _)| segment_start + offset)
            .find(|offset| !root.children.iter().any(|child| child.contains(*offset)));

        let (index, value_start) = match equals {
            Some(offset) => (
                ParameterKey::Named(body[segment_start..offset].trim().to_string()),
                offset + 1,
            ),
            None => {
                positional += 1;
                (ParameterKey::Positional(positional), segment_start)
            }
        };

        let mut value_end = segment_end;
        while value_end > value_start && matches!(body.as_bytes()[value_end - 1], b'\n' | b'\r')
        {
            value_end -= 1;
        }

        out.push(TemplateParameter {
            index,
            value_span: value_start..value_end,
            raw_value: body[value_start..value_end].to_string(),
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::{
        ParameterKey, extract_template, get_parameter, parameters, remove_template,
        set_parameter, set_template_parameter,
    };

    #[test]
    fn named_parameters_round_trip() {
        let body = "{{X|a=1|b=2}}";
        assert_eq!(
            get_parameter(body, &ParameterKey::named("a")).expect("scan"),
            Some("1".to_string())
        );
        assert_eq!(
            get_parameter(body, &ParameterKey::named("b")).expect("scan"),
            Some("2".to_string())
        );
        assert_eq!(
            get_parameter(body, &ParameterKey::named("c")).expect("scan"),
            None
        );
    }

    #[test]
    fn nested_template_pipes_do_not_split_values() {
        let body = "{{X|a={{Y|1}}|b=2}}";
        assert_eq!(
            get_parameter(body, &ParameterKey::named("a")).expect("scan"),
            Some("{{Y|1}}".to_string())
        );
        assert_eq!(
            get_parameter(body, &ParameterKey::named("b")).expect("scan"),
            Some("2".to_string())
        );
    }

    #[test]
    fn positional_indices_skip_named_parameters() {
        let body = "{{X|first|k=v|[[a|b]]|{{Y|k=v}}}}";
        let params = parameters(body).expect("scan");
        assert_eq!(params.len(), 4);
        assert_eq!(params[0].index, ParameterKey::Positional(1));
        assert_eq!(params[1].index, ParameterKey::named("k"));
        assert_eq!(params[2].index, ParameterKey::Positional(2));
        assert_eq!(params[2].raw_value, "[[a|b]]");
        assert_eq!(params[3].index, ParameterKey::Positional(3));
        assert_eq!(params[3].raw_value, "{{Y|k=v}}");
    }

    #[test]
    fn values_keep_leading_whitespace_but_drop_trailing_newlines() {
        let body = "{{Information\n| description = A view\n| date =  1900\n}}";
        assert_eq!(
            get_parameter(body, &ParameterKey::named("description")).expect("scan"),
            Some(" A view".to_string())
        );
        assert_eq!(
            get_parameter(body, &ParameterKey::named("date")).expect("scan"),
            Some("  1900".to_string())
        );
    }

    #[test]
    fn extract_template_folds_only_the_first_letter() {
        let text = "intro\n{{information|description=x}}\n[[Category:Foo]]";
        let found = extract_template(text, "Information")
            .expect("scan")
            .expect("template present");
        assert_eq!(found.body, "{{information|description=x}}");
        assert_eq!(found.span, 6..35);

        assert!(extract_template(text, "INformation").expect("scan").is_none());
        assert!(
            extract_template(text, "Template:Information")
                .expect("scan")
                .is_some()
        );
    }

    #[test]
    fn extract_template_finds_nested_occurrences() {
        let text = "{{Information|permission={{PD-old|deathyear=1900}}}}";
        let found = extract_template(text, "PD-old")
            .expect("scan")
            .expect("nested template");
        assert_eq!(found.body, "{{PD-old|deathyear=1900}}");
    }

    #[test]
    fn malformed_markup_is_surfaced() {
        assert!(extract_template("{{Information|a=[[b}}", "Information").is_err());
    }

    #[test]
    fn remove_template_takes_one_trailing_newline() {
        let text = "{{Uncategorized}}\n\nText";
        let removed = remove_template(text, "uncategorized")
            .expect("scan")
            .expect("removed");
        assert_eq!(removed, "\nText");
        assert!(remove_template(text, "Other").expect("scan").is_none());
    }

    #[test]
    fn set_parameter_replaces_existing_values() {
        let body = "{{Information\n|date=unknown\n|source=scan\n}}";
        let updated = set_parameter(body, &ParameterKey::named("date"), "1900").expect("scan");
        assert_eq!(updated, "{{Information\n|date=1900\n|source=scan\n}}");
    }

    #[test]
    fn set_parameter_appends_in_the_template_layout() {
        let multi_line = "{{Information\n|date=1900\n}}";
        assert_eq!(
            set_parameter(multi_line, &ParameterKey::named("author"), "Anon").expect("scan"),
            "{{Information\n|date=1900\n|author=Anon\n}}"
        );

        let inline = "{{X|a}}";
        assert_eq!(
            set_parameter(inline, &ParameterKey::Positional(2), "b").expect("scan"),
            "{{X|a|b}}"
        );
        assert_eq!(
            set_parameter(inline, &ParameterKey::Positional(4), "d").expect("scan"),
            "{{X|a|4=d}}"
        );
    }

    #[test]
    fn set_template_parameter_rewrites_the_page() {
        let text = "== Summary ==\n{{Information|date=}}\n";
        let updated =
            set_template_parameter(text, "Information", &ParameterKey::named("date"), "1920")
                .expect("scan")
                .expect("template present");
        assert_eq!(updated, "== Summary ==\n{{Information|date=1920}}\n");
    }

    #[test]
    fn parameter_key_parse_distinguishes_positions() {
        assert_eq!(ParameterKey::parse("2"), ParameterKey::Positional(2));
        assert_eq!(ParameterKey::parse("date"), ParameterKey::named("date"));
        assert_eq!(ParameterKey::parse("0"), ParameterKey::named("0"));
    }
}
