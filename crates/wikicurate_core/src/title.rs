use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Serialize, Serializer};

pub const CATEGORY_NAMESPACE: &str = "Category";

const KNOWN_NAMESPACES: &[(&str, &str)] = &[
    ("category", "Category"),
    ("file", "File"),
    ("image", "File"),
    ("template", "Template"),
    ("user", "User"),
    ("creator", "Creator"),
    ("institution", "Institution"),
    ("commons", "Commons"),
    ("help", "Help"),
    ("module", "Module"),
    ("mediawiki", "MediaWiki"),
    ("wikipedia", "Wikipedia"),
];

/// A wiki page title compared the way MediaWiki compares titles: underscores and
/// spaces are the same character and the first letter of the name is case-insensitive.
#[derive(Debug, Clone)]
pub struct PageTitle {
    namespace: Option<String>,
    name: String,
}

impl PageTitle {
    pub fn parse(raw: &str) -> Self {
        let normalized = normalize_spaces(&raw.replace('_', " "));
        let mut value = normalized.as_str();
        if let Some(stripped) = value.strip_prefix(':') {
            value = stripped.trim_start();
        }

        if let Some((prefix, rest)) = value.split_once(':')
            && let Some(namespace) = canonical_namespace(prefix)
        {
            return Self {
                namespace: Some(namespace.to_string()),
                name: rest.trim().to_string(),
            };
        }

        Self {
            namespace: None,
            name: value.to_string(),
        }
    }

    /// Parse a category name given with or without its `Category:` prefix.
    pub fn category(raw: &str) -> Self {
        let parsed = Self::parse(raw);
        if parsed.is_category() {
            return parsed;
        }
        if parsed.namespace.is_none() {
            return Self {
                namespace: Some(CATEGORY_NAMESPACE.to_string()),
                name: parsed.name,
            };
        }
        Self {
            namespace: Some(CATEGORY_NAMESPACE.to_string()),
            name: parsed.to_string(),
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_category(&self) -> bool {
        self.namespace.as_deref() == Some(CATEGORY_NAMESPACE)
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }

    /// The normalized identity used for equality, hashing and ordering.
    pub fn key(&self) -> String {
        let name = uppercase_first(&self.name);
        match &self.namespace {
            Some(namespace) => format!("{namespace}:{name}"),
            None => name,
        }
    }
}

impl fmt::Display for PageTitle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(formatter, "{namespace}:{}", self.name),
            None => formatter.write_str(&self.name),
        }
    }
}

impl PartialEq for PageTitle {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for PageTitle {}

impl Hash for PageTitle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for PageTitle {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PageTitle {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl Serialize for PageTitle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

pub fn canonical_namespace(prefix: &str) -> Option<&'static str> {
    let trimmed = prefix.trim();
    KNOWN_NAMESPACES
        .iter()
        .find(|(alias, _)| trimmed.eq_ignore_ascii_case(alias))
        .map(|(_, canonical)| *canonical)
}

/// Compare two names under the first-letter-insensitive rule, treating `_` as a space.
pub fn names_match(left: &str, right: &str) -> bool {
    let left = normalize_spaces(&left.replace('_', " "));
    let right = normalize_spaces(&right.replace('_', " "));
    uppercase_first(&left) == uppercase_first(&right)
}

pub fn normalize_spaces(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let mut previous_was_space = false;

    for ch in value.chars() {
        if ch.is_whitespace() {
            if !previous_was_space {
                output.push(' ');
                previous_was_space = true;
            }
        } else {
            output.push(ch);
            previous_was_space = false;
        }
    }

    output.trim().to_string()
}

fn uppercase_first(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
