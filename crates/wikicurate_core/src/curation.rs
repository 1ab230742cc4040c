use std::collections::BTreeSet;

use serde::Serialize;

use crate::categories::{add_category, category_links, remove_category, remove_duplicate_categories};
use crate::category_graph::{CategoryGraph, GraphError, PageSource, PrunedCategory};
use crate::dates::{self, DateRange};
use crate::license::{CountryCode, LicenseDecision, LicenseInference, LicenseTag};
use crate::markup::UnbalancedMarkupError;
use crate::template::{ParameterKey, extract_template, get_parameter};
use crate::title::PageTitle;

const DATE_TEMPLATES: &[&str] = &["Information", "Artwork", "Photograph"];
const LICENSE_HEADER: &str = "== {{int:license-header}} ==";
const LICENSE_HEADINGS: &[&str] = &["{{int:license-header}}", "{{int:license}}", "license", "licensing"];

#[derive(Debug, thiserror::Error)]
pub enum CurationError {
    #[error(transparent)]
    Markup(#[from] UnbalancedMarkupError),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

#[derive(Debug, Clone, Default)]
pub struct CurationRequest {
    /// Raw date; when absent the `date` field of the page's description template is used.
    pub date: Option<String>,
    pub author_death_year: Option<i32>,
    pub country: Option<CountryCode>,
    /// Fall back to the anonymous-author rule when the named-author rule gives no tag.
    pub anonymous_fallback: bool,
    pub add_categories: Vec<String>,
    pub remove_categories: Vec<String>,
    pub prune: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurationReport {
    pub raw_date: Option<String>,
    pub date: DateRange,
    pub license: Option<LicenseDecision>,
    pub license_inserted: bool,
    pub categories_added: Vec<PageTitle>,
    pub categories_removed: Vec<PageTitle>,
    pub pruned: Vec<PrunedCategory>,
    pub changed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurationOutcome {
    pub text: String,
    pub report: CurationReport,
}

/// Work out the edits one page needs and apply them to its text. Nothing is written
/// back to the wiki.
pub fn curate_page<S: PageSource + ?Sized>(
    text: &str,
    request: &CurationRequest,
    graph: &mut CategoryGraph,
    source: &mut S,
    inference: &LicenseInference,
) -> Result<CurationOutcome, CurationError> {
    let raw_date = match &request.date {
        Some(date) => Some(date.clone()),
        None => page_date(text)?,
    };
    let date = raw_date
        .as_deref()
        .map(dates::parse)
        .unwrap_or_else(DateRange::unknown);

    let license = request.country.as_ref().map(|country| {
        let decision = inference.infer(&date, request.author_death_year, country);
        if decision.is_granted() || !request.anonymous_fallback {
            decision
        } else {
            inference.infer_anonymous(&date, country)
        }
    });

    let mut output = text.to_string();
    let mut license_inserted = false;
    if let Some(tag) = license.as_ref().and_then(|decision| decision.tag.as_ref())
        && !has_license(&output, tag)?
    {
        output = insert_license(&output, tag)?;
        license_inserted = true;
    }

    let existing = category_links(&output)?
        .into_iter()
        .map(|link| link.title)
        .collect::<Vec<_>>();
    let requested = request
        .add_categories
        .iter()
        .map(|name| PageTitle::category(name))
        .collect::<Vec<_>>();
    let unwanted = request
        .remove_categories
        .iter()
        .map(|name| PageTitle::category(name))
        .collect::<BTreeSet<_>>();

    let mut merged = existing
        .iter()
        .chain(requested.iter())
        .filter(|title| !unwanted.contains(*title))
        .cloned()
        .collect::<BTreeSet<_>>();
    let pruned = if request.prune {
        graph.prune_less_specific(source, &mut merged)?
    } else {
        Vec::new()
    };

    let mut categories_removed = Vec::new();
    for title in &existing {
        if !merged.contains(title) && !categories_removed.contains(title) {
            output = remove_category(&output, &title.to_string())?;
            categories_removed.push(title.clone());
        }
    }
    let mut categories_added = Vec::new();
    for title in &requested {
        if merged.contains(title) && !existing.contains(title) && !categories_added.contains(title)
        {
            output = add_category(&output, &title.to_string())?;
            categories_added.push(title.clone());
        }
    }
    output = remove_duplicate_categories(&output)?;

    if !pruned.is_empty() || !categories_added.is_empty() || !categories_removed.is_empty() {
        tracing::debug!(
            added = categories_added.len(),
            removed = categories_removed.len(),
            pruned = pruned.len(),
            "curated categories"
        );
    }

    let changed = output != text;
    Ok(CurationOutcome {
        text: output,
        report: CurationReport {
            raw_date,
            date,
            license,
            license_inserted,
            categories_added,
            categories_removed,
            pruned,
            changed,
        },
    })
}

/// The `date` field of the first description template on the page.
pub fn page_date(text: &str) -> Result<Option<String>, UnbalancedMarkupError> {
    for name in DATE_TEMPLATES {
        let Some(found) = extract_template(text, name)? else {
            continue;
        };
        if let Some(value) = get_parameter(&found.body, &ParameterKey::named("date"))?
            && !value.trim().is_empty()
        {
            return Ok(Some(value.trim().to_string()));
        }
    }
    Ok(None)
}

fn has_license(text: &str, tag: &LicenseTag) -> Result<bool, UnbalancedMarkupError> {
    for name in tag.template_names() {
        if extract_template(text, name)?.is_none() {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Put the tag directly under the license heading. Pages without one get a heading,
/// placed before the first category link or at the end.
fn insert_license(text: &str, tag: &LicenseTag) -> Result<String, UnbalancedMarkupError> {
    let wikitext = tag.wikitext();
    let (at, insertion) = match license_header_end(text) {
        Some(at) if text[..at].ends_with('\n') => (at, format!("{wikitext}\n")),
        Some(at) => (at, format!("\n{wikitext}")),
        None => {
            let at = category_links(text)?
                .first()
                .map(|link| link.span.start)
                .unwrap_or(text.len());
            let mut block = String::new();
            if at > 0 && !text[..at].ends_with('\n') {
                block.push('\n');
            }
            block.push_str(LICENSE_HEADER);
            block.push('\n');
            block.push_str(&wikitext);
            if at < text.len() || text.ends_with('\n') {
                block.push('\n');
            }
            (at, block)
        }
    };
    let mut output = String::with_capacity(text.len() + insertion.len());
    output.push_str(&text[..at]);
    output.push_str(&insertion);
    output.push_str(&text[at..]);
    Ok(output)
}

fn license_header_end(text: &str) -> Option<usize> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        offset += line.len();
        let trimmed = line.trim();
        if trimmed.len() < 4 || !trimmed.starts_with("==") || !trimmed.ends_with("==") {
            continue;
        }
        let heading = trimmed.trim_matches('=').trim();
        if LICENSE_HEADINGS
            .iter()
            .any(|candidate| heading.eq_ignore_ascii_case(candidate))
        {
            return Some(offset);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::{CurationError, CurationRequest, curate_page, page_date};
    use crate::category_graph::{CategoryGraph, PageBody, PageSource};
    use crate::license::{CountryCode, DeniedReason, LicenseInference};
    use crate::title::PageTitle;

    struct NoPages;

    impl PageSource for NoPages {
        fn fetch_page(&mut self, _title: &PageTitle) -> Result<Option<PageBody>> {
            Ok(None)
        }
    }

    fn cat(name: &str) -> PageTitle {
        PageTitle::category(name)
    }

    #[test]
    fn curates_license_and_categories_together() {
        let text = "== {{int:filedesc}} ==\n{{Information\n|description=View\n|date=circa 1890\n}}\n\n== {{int:license-header}} ==\n\n[[Category:Paris]]\n[[Category:Paintings in Paris]]\n";
        let mut graph = CategoryGraph::new();
        graph.insert_resolved(cat("Oil paintings in Paris"), vec![cat("Paintings in Paris")]);
        graph.insert_resolved(cat("Paintings in Paris"), vec![cat("Paris")]);
        graph.insert_resolved(cat("Paris"), Vec::new());

        let request = CurationRequest {
            author_death_year: Some(1850),
            country: CountryCode::parse("FRA"),
            add_categories: vec!["Oil paintings in Paris".to_string()],
            prune: true,
            ..CurationRequest::default()
        };
        let outcome = curate_page(
            text,
            &request,
            &mut graph,
            &mut NoPages,
            &LicenseInference::new(2026),
        )
        .expect("curate");

        assert_eq!(
            outcome.text,
            "== {{int:filedesc}} ==\n{{Information\n|description=View\n|date=circa 1890\n}}\n\n== {{int:license-header}} ==\n{{PD-old-auto-expired|deathyear=1850}}\n[[Category:Oil paintings in Paris]]\n\n"
        );
        let report = outcome.report;
        assert_eq!(report.raw_date.as_deref(), Some("circa 1890"));
        assert_eq!(report.date.latest_year, 1890);
        assert!(report.license_inserted);
        assert_eq!(report.categories_added, vec![cat("Oil paintings in Paris")]);
        assert_eq!(
            report.categories_removed,
            vec![cat("Paris"), cat("Paintings in Paris")]
        );
        assert_eq!(report.pruned.len(), 2);
        assert!(report.changed);
    }

    #[test]
    fn anonymous_fallback_adds_a_license_section() {
        let text = "{{Information|date=1900}}\n[[Category:Foo]]\n";
        let request = CurationRequest {
            country: CountryCode::parse("France"),
            anonymous_fallback: true,
            ..CurationRequest::default()
        };
        let outcome = curate_page(
            text,
            &request,
            &mut CategoryGraph::new(),
            &mut NoPages,
            &LicenseInference::new(2026),
        )
        .expect("curate");
        assert_eq!(
            outcome.text,
            "{{Information|date=1900}}\n== {{int:license-header}} ==\n{{PD-US-expired|country=FRA}}\n{{PD-France}}\n[[Category:Foo]]\n"
        );
    }

    #[test]
    fn existing_license_and_denied_decisions_leave_the_text_alone() {
        let text = "{{Information|date=1900}}\n{{PD-old-auto-expired|deathyear=1850}}\n";
        let request = CurationRequest {
            author_death_year: Some(1850),
            country: CountryCode::parse("USA"),
            ..CurationRequest::default()
        };
        let inference = LicenseInference::new(2026);
        let outcome = curate_page(text, &request, &mut CategoryGraph::new(), &mut NoPages, &inference)
            .expect("curate");
        assert_eq!(outcome.text, text);
        assert!(!outcome.report.license_inserted);
        assert!(!outcome.report.changed);

        let recent = CurationRequest {
            date: Some("2015".to_string()),
            author_death_year: Some(1850),
            country: CountryCode::parse("USA"),
            ..CurationRequest::default()
        };
        let outcome = curate_page("Text\n", &recent, &mut CategoryGraph::new(), &mut NoPages, &inference)
            .expect("curate");
        assert_eq!(outcome.text, "Text\n");
        let decision = outcome.report.license.expect("decision");
        assert_eq!(
            decision.denied_reason(),
            Some(DeniedReason::PublishedTooRecently)
        );
    }

    #[test]
    fn removals_and_duplicates_are_applied() {
        let text = "Body\n[[Category:A]]\n[[Category:B]]\n[[Category:a]]\n";
        let request = CurationRequest {
            remove_categories: vec!["B".to_string()],
            ..CurationRequest::default()
        };
        let outcome = curate_page(
            text,
            &request,
            &mut CategoryGraph::new(),
            &mut NoPages,
            &LicenseInference::new(2026),
        )
        .expect("curate");
        assert_eq!(outcome.text, "Body\n[[Category:A]]\n");
        assert_eq!(outcome.report.categories_removed, vec![cat("B")]);
    }

    #[test]
    fn malformed_pages_are_refused() {
        let error = curate_page(
            "{{Information|date=[[1900}}",
            &CurationRequest::default(),
            &mut CategoryGraph::new(),
            &mut NoPages,
            &LicenseInference::new(2026),
        )
        .expect_err("malformed");
        assert!(matches!(error, CurationError::Markup(_)));
    }

    #[test]
    fn page_date_reads_description_templates() {
        assert_eq!(
            page_date("{{Artwork\n|date= 1890s\n}}").expect("scan"),
            Some("1890s".to_string())
        );
        assert_eq!(page_date("{{Information|date=}}").expect("scan"), None);
    }
}
