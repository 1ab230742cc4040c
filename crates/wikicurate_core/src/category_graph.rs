use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fs;
use std::path::Path;
use std::time::SystemTime;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::categories::category_links;
use crate::markup::UnbalancedMarkupError;
use crate::template::{ParameterKey, extract_template, get_parameter};
use crate::title::PageTitle;

pub const DEFAULT_SAVE_INTERVAL: usize = 50;
/// Depth used when `prune_less_specific` loads each input category.
pub const PRUNE_LOAD_DEPTH: usize = 2;

const REDIRECT_TEMPLATES: &[&str] = &["Category redirect", "Seecat"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageBody {
    pub title: PageTitle,
    pub wikitext: String,
    pub missing: bool,
}

/// Fetches page text on behalf of the graph. Retry and rate limiting belong to the
/// implementation, not to the caller.
pub trait PageSource {
    fn fetch_page(&mut self, title: &PageTitle) -> Result<Option<PageBody>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeState {
    Unknown,
    Fetching,
    Resolved(Vec<PageTitle>),
    Missing,
}

#[derive(Debug, Clone)]
pub struct CategoryNode {
    pub title: PageTitle,
    pub state: NodeState,
    pub fetched_at: Option<SystemTime>,
    last_used: u64,
}

impl CategoryNode {
    pub fn parents(&self) -> &[PageTitle] {
        match &self.state {
            NodeState::Resolved(parents) => parents,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CachePolicy {
    #[default]
    Unbounded,
    Lru {
        capacity: usize,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("category does not exist: {title}")]
    NotFound { title: PageTitle },
    #[error("malformed markup on {title}")]
    Markup {
        title: PageTitle,
        #[source]
        source: UnbalancedMarkupError,
    },
    #[error("failed to fetch {title}")]
    Fetch {
        title: PageTitle,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct CacheFormatError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrunedCategory {
    pub pruned: PageTitle,
    pub because_of: PageTitle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LoadOutcome {
    Cached(PageTitle),
    Fetched(PageTitle),
    Missing(PageTitle),
}

/// Category -> parent categories, fetched lazily and kept until explicitly saved or
/// evicted by the cache policy.
#[derive(Debug)]
pub struct CategoryGraph {
    nodes: HashMap<PageTitle, CategoryNode>,
    redirects: HashMap<PageTitle, PageTitle>,
    policy: CachePolicy,
    save_interval: usize,
    fetches_since_save: usize,
    clock: u64,
    /// Nesting depth of fetching operations in progress. Eviction waits until it is zero.
    pinned: usize,
}

impl Default for CategoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl CategoryGraph {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            redirects: HashMap::new(),
            policy: CachePolicy::Unbounded,
            save_interval: DEFAULT_SAVE_INTERVAL,
            fetches_since_save: 0,
            clock: 0,
            pinned: 0,
        }
    }

    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_save_interval(mut self, save_interval: usize) -> Self {
        self.save_interval = save_interval;
        self
    }

    /// Load a persisted cache. A missing or empty file is an empty graph; a malformed
    /// one is an error, since nothing in it can be trusted.
    pub fn load(path: &Path) -> Result<Self> {
        let mut graph = Self::new();
        if !path.exists() {
            return Ok(graph);
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let records = parse_cache(&content)
            .with_context(|| format!("corrupt category cache {}", path.display()))?;
        for (title, parents) in records {
            graph.insert_resolved(title, parents);
        }
        tracing::debug!(path = %path.display(), nodes = graph.len(), "loaded category cache");
        Ok(graph)
    }

    /// Rewrite the whole cache file: written to a sibling file, then renamed over it.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file_name = path
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("cache path has no file name: {}", path.display()))?;
        let temporary = path.with_file_name(format!("{}.tmp", file_name.to_string_lossy()));
        fs::write(&temporary, self.render_cache())
            .with_context(|| format!("failed to write {}", temporary.display()))?;
        fs::rename(&temporary, path).with_context(|| {
            format!(
                "failed to replace {} with {}",
                path.display(),
                temporary.display()
            )
        })?;
        self.fetches_since_save = 0;
        tracing::debug!(path = %path.display(), nodes = self.len(), "saved category cache");
        Ok(())
    }

    /// Save when enough fetches have accumulated since the last save point.
    /// Returns `true` when a save happened.
    pub fn checkpoint(&mut self, path: &Path) -> Result<bool> {
        if self.fetches_since_save == 0 || self.fetches_since_save < self.save_interval {
            return Ok(false);
        }
        self.save(path)?;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, title: &PageTitle) -> Option<&CategoryNode> {
        self.nodes.get(&self.resolve(title))
    }

    pub fn state(&self, title: &PageTitle) -> NodeState {
        self.node(title)
            .map(|node| node.state.clone())
            .unwrap_or(NodeState::Unknown)
    }

    pub fn parents(&self, title: &PageTitle) -> Option<&[PageTitle]> {
        match &self.node(title)?.state {
            NodeState::Resolved(parents) => Some(parents),
            _ => None,
        }
    }

    pub fn insert_resolved(&mut self, title: PageTitle, parents: Vec<PageTitle>) {
        self.clock += 1;
        self.nodes.insert(
            title.clone(),
            CategoryNode {
                title: title.clone(),
                state: NodeState::Resolved(parents),
                fetched_at: None,
                last_used: self.clock,
            },
        );
        self.enforce_capacity(Some(&title));
    }

    pub fn insert_redirect(&mut self, from: PageTitle, to: PageTitle) {
        if self.redirect_chain(&to).contains(&from) {
            return;
        }
        self.nodes.remove(&from);
        self.redirects.insert(from, to);
    }

    /// Follow known category redirects to the effective title.
    pub fn resolve(&self, title: &PageTitle) -> PageTitle {
        self.redirect_chain(title)
            .pop()
            .unwrap_or_else(|| title.clone())
    }

    /// Load `category` and up to `max_depth` levels of its parents. A node that is
    /// already resolved is not expanded again.
    pub fn ensure_loaded<S: PageSource + ?Sized>(
        &mut self,
        source: &mut S,
        category: &PageTitle,
        max_depth: usize,
    ) -> Result<(), GraphError> {
        self.pinned += 1;
        let result = self.load_ancestry(source, category, max_depth);
        self.unpin();
        result
    }

    fn load_ancestry<S: PageSource + ?Sized>(
        &mut self,
        source: &mut S,
        category: &PageTitle,
        max_depth: usize,
    ) -> Result<(), GraphError> {
        let root = match self.load_node(source, category)? {
            LoadOutcome::Missing(_) => {
                return Err(GraphError::NotFound {
                    title: category.clone(),
                });
            }
            LoadOutcome::Cached(_) => return Ok(()),
            LoadOutcome::Fetched(title) => title,
        };

        let mut queue = VecDeque::from([(root, 0usize)]);
        let mut visited = HashSet::new();
        while let Some((title, depth)) = queue.pop_front() {
            if !visited.insert(title.clone()) || depth >= max_depth {
                continue;
            }
            let parents = self
                .parents(&title)
                .map(<[PageTitle]>::to_vec)
                .unwrap_or_default();
            for parent in parents {
                match self.load_node(source, &parent)? {
                    LoadOutcome::Fetched(loaded) => queue.push_back((loaded, depth + 1)),
                    LoadOutcome::Missing(missing) => {
                        tracing::debug!(category = %missing, child = %title, "parent category is missing");
                        self.insert_resolved(missing, Vec::new());
                    }
                    LoadOutcome::Cached(_) => {}
                }
            }
        }
        Ok(())
    }

    /// Whether `candidate` is reachable from `category` through cached parent links.
    /// Never fetches.
    pub fn has_ancestor(&self, category: &PageTitle, candidate: &PageTitle) -> bool {
        let target = self.resolve(candidate);
        self.ancestors(category).contains(&target)
    }

    /// Cached ancestors of `category` in breadth-first order. The start node only
    /// appears when a cycle leads back to it.
    pub fn ancestors(&self, category: &PageTitle) -> Vec<PageTitle> {
        let start = self.resolve(category);
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = self
            .parents(&start)
            .map(|parents| parents.iter().map(|parent| self.resolve(parent)).collect())
            .unwrap_or_else(VecDeque::new);

        while let Some(title) = queue.pop_front() {
            if !visited.insert(title.clone()) {
                continue;
            }
            if let Some(parents) = self.parents(&title) {
                queue.extend(parents.iter().map(|parent| self.resolve(parent)));
            }
            out.push(title);
        }
        out
    }

    /// Remove every category that is an ancestor of another category in the set.
    /// Single pass: an entry that has already been pruned is not examined itself.
    pub fn prune_less_specific<S: PageSource + ?Sized>(
        &mut self,
        source: &mut S,
        categories: &mut BTreeSet<PageTitle>,
    ) -> Result<Vec<PrunedCategory>, GraphError> {
        self.pinned += 1;
        let result = self.prune_pass(source, categories);
        self.unpin();
        result
    }

    fn prune_pass<S: PageSource + ?Sized>(
        &mut self,
        source: &mut S,
        categories: &mut BTreeSet<PageTitle>,
    ) -> Result<Vec<PrunedCategory>, GraphError> {
        let snapshot = categories.iter().cloned().collect::<Vec<_>>();
        let mut pruned = Vec::new();

        for category in snapshot {
            if !categories.contains(&category) {
                continue;
            }
            match self.ensure_loaded(source, &category, PRUNE_LOAD_DEPTH) {
                Ok(()) => {}
                Err(GraphError::NotFound { title }) => {
                    tracing::warn!(category = %title, "category does not exist, leaving it in place");
                    continue;
                }
                Err(error) => return Err(error),
            }

            for ancestor in self.ancestors(&category) {
                if ancestor == category || !categories.remove(&ancestor) {
                    continue;
                }
                tracing::info!(pruned = %ancestor, kept = %category, "pruned less specific category");
                pruned.push(PrunedCategory {
                    pruned: ancestor,
                    because_of: category.clone(),
                });
            }
        }
        Ok(pruned)
    }

    fn load_node<S: PageSource + ?Sized>(
        &mut self,
        source: &mut S,
        title: &PageTitle,
    ) -> Result<LoadOutcome, GraphError> {
        let mut visited = HashSet::new();
        let mut current = self.resolve(title);

        loop {
            if !visited.insert(current.clone()) {
                return Ok(LoadOutcome::Cached(current));
            }
            match self.state(&current) {
                NodeState::Resolved(_) | NodeState::Fetching => {
                    self.touch(&current);
                    return Ok(LoadOutcome::Cached(current));
                }
                NodeState::Missing => return Ok(LoadOutcome::Missing(current)),
                NodeState::Unknown => {}
            }

            self.nodes.insert(
                current.clone(),
                CategoryNode {
                    title: current.clone(),
                    state: NodeState::Fetching,
                    fetched_at: None,
                    last_used: self.clock,
                },
            );
            tracing::debug!(category = %current, "fetching category page");
            let page = match source.fetch_page(&current) {
                Ok(page) => page,
                Err(error) => {
                    self.nodes.remove(&current);
                    return Err(GraphError::Fetch {
                        title: current,
                        source: error.into(),
                    });
                }
            };
            self.fetches_since_save += 1;

            let Some(page) = page.filter(|page| !page.missing) else {
                self.set_state(&current, NodeState::Missing);
                return Ok(LoadOutcome::Missing(current));
            };

            let redirect = match redirect_target(&page.wikitext) {
                Ok(redirect) => redirect,
                Err(source) => {
                    self.nodes.remove(&current);
                    return Err(GraphError::Markup {
                        title: current,
                        source,
                    });
                }
            };
            if let Some(target) = redirect
                && target != current
                && !self
                    .redirect_chain(&target)
                    .iter()
                    .any(|hop| visited.contains(hop))
            {
                tracing::debug!(from = %current, to = %target, "following category redirect");
                self.insert_redirect(current, target.clone());
                current = self.resolve(&target);
                continue;
            }

            let parents = match parent_categories(&page.wikitext) {
                Ok(parents) => parents,
                Err(source) => {
                    self.nodes.remove(&current);
                    return Err(GraphError::Markup {
                        title: current,
                        source,
                    });
                }
            };
            self.clock += 1;
            self.nodes.insert(
                current.clone(),
                CategoryNode {
                    title: current.clone(),
                    state: NodeState::Resolved(parents),
                    fetched_at: Some(SystemTime::now()),
                    last_used: self.clock,
                },
            );
            self.enforce_capacity(Some(&current));
            return Ok(LoadOutcome::Fetched(current));
        }
    }

    fn redirect_chain(&self, title: &PageTitle) -> Vec<PageTitle> {
        let mut chain = vec![title.clone()];
        let mut seen = HashSet::from([title.clone()]);
        let mut current = title;
        while let Some(next) = self.redirects.get(current) {
            if !seen.insert(next.clone()) {
                break;
            }
            chain.push(next.clone());
            current = next;
        }
        chain
    }

    fn set_state(&mut self, title: &PageTitle, state: NodeState) {
        if let Some(node) = self.nodes.get_mut(title) {
            node.state = state;
        }
    }

    fn touch(&mut self, title: &PageTitle) {
        self.clock += 1;
        if let Some(node) = self.nodes.get_mut(title) {
            node.last_used = self.clock;
        }
    }

    fn unpin(&mut self) {
        self.pinned = self.pinned.saturating_sub(1);
        self.enforce_capacity(None);
    }

    fn enforce_capacity(&mut self, keep: Option<&PageTitle>) {
        let CachePolicy::Lru { capacity } = self.policy else {
            return;
        };
        if self.pinned > 0 {
            return;
        }
        while self.nodes.len() > capacity.max(1) {
            let victim = self
                .nodes
                .iter()
                .filter(|(title, node)| {
                    Some(*title) != keep && !matches!(node.state, NodeState::Fetching)
                })
                .min_by_key(|(_, node)| node.last_used)
                .map(|(title, _)| title.clone());
            let Some(victim) = victim else {
                break;
            };
            tracing::debug!(category = %victim, "evicting least recently used category");
            self.nodes.remove(&victim);
        }
    }

    fn render_cache(&self) -> String {
        let mut resolved = self
            .nodes
            .values()
            .filter_map(|node| match &node.state {
                NodeState::Resolved(parents) => Some((&node.title, parents)),
                _ => None,
            })
            .collect::<Vec<_>>();
        resolved.sort_by(|left, right| left.0.cmp(right.0));

        let mut out = String::new();
        for (title, parents) in resolved {
            out.push_str(&format!("{title}\n{}\n", parents.len()));
            for parent in parents {
                out.push_str(&format!("{parent}\n"));
            }
        }
        out
    }
}

pub fn redirect_target(wikitext: &str) -> Result<Option<PageTitle>, UnbalancedMarkupError> {
    for name in REDIRECT_TEMPLATES {
        let Some(found) = extract_template(wikitext, name)? else {
            continue;
        };
        let target = match get_parameter(&found.body, &ParameterKey::Positional(1))? {
            Some(target) => Some(target),
            None => get_parameter(&found.body, &ParameterKey::named("1"))?,
        };
        if let Some(target) = target
            && !target.trim().is_empty()
        {
            return Ok(Some(PageTitle::category(target.trim())));
        }
    }
    Ok(None)
}

fn parent_categories(wikitext: &str) -> Result<Vec<PageTitle>, UnbalancedMarkupError> {
    let mut seen = HashSet::new();
    Ok(category_links(wikitext)?
        .into_iter()
        .map(|link| link.title)
        .filter(|title| seen.insert(title.clone()))
        .collect())
}

fn parse_cache(content: &str) -> Result<Vec<(PageTitle, Vec<PageTitle>)>, CacheFormatError> {
    let mut records = Vec::new();
    let mut lines = content.lines().enumerate();

    while let Some((index, title_line)) = lines.next() {
        if title_line.trim().is_empty() {
            continue;
        }
        let title = PageTitle::category(title_line);
        let Some((count_index, count_line)) = lines.next() else {
            return Err(CacheFormatError {
                line: index + 2,
                message: format!("missing parent count for {title}"),
            });
        };
        let count = count_line
            .trim()
            .parse::<usize>()
            .map_err(|_| CacheFormatError {
                line: count_index + 1,
                message: format!("invalid parent count {count_line:?} for {title}"),
            })?;
        let mut parents = Vec::with_capacity(count);
        for _ in 0..count {
            let Some((_, parent_line)) = lines.next() else {
                return Err(CacheFormatError {
                    line: count_index + 2 + parents.len(),
                    message: format!("expected {count} parents for {title}"),
                });
            };
            parents.push(PageTitle::category(parent_line));
        }
        records.push((title, parents));
    }
    Ok(records)
}
