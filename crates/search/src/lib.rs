//! Berth search: narrow a container listing by free text and typed tokens.
//!
//! Tokens of the same kind are OR-combined, different kinds AND-combined. Free text matches
//! case-insensitively against the display name, every reported name and the id. Query strings
//! accept typed prefixes (`state:running stack:web port:80 name:db image:nginx`).

#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use berth_core::{Container, ContainerState};
use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Typed predicate over a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum SearchToken {
    /// `None` matches containers whose state is unknown.
    State(Option<ContainerState>),
    Stack(String),
    Port(u16),
    Name(String),
    Image(String),
}

/// Token kinds, in suggestion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TokenKind {
    State,
    Stack,
    Image,
    Port,
    Name,
}

impl TokenKind {
    pub const ALL: [TokenKind; 5] = [TokenKind::State, TokenKind::Stack, TokenKind::Image, TokenKind::Port, TokenKind::Name];

    pub fn prefix(&self) -> &'static str {
        match self {
            TokenKind::State => "state",
            TokenKind::Stack => "stack",
            TokenKind::Image => "image",
            TokenKind::Port => "port",
            TokenKind::Name => "name",
        }
    }
}

impl SearchToken {
    pub fn kind(&self) -> TokenKind {
        match self {
            SearchToken::State(_) => TokenKind::State,
            SearchToken::Stack(_) => TokenKind::Stack,
            SearchToken::Port(_) => TokenKind::Port,
            SearchToken::Name(_) => TokenKind::Name,
            SearchToken::Image(_) => TokenKind::Image,
        }
    }

    /// Human label for suggestion chips.
    pub fn title(&self) -> String {
        match self {
            SearchToken::State(Some(s)) => capitalize(s.as_str()),
            SearchToken::State(None) => "Unknown".to_string(),
            SearchToken::Stack(s) | SearchToken::Name(s) | SearchToken::Image(s) => s.clone(),
            SearchToken::Port(p) => format!("Port {}", p),
        }
    }

    pub fn matches(&self, c: &Container) -> bool {
        match self {
            SearchToken::State(s) => c.state == *s,
            SearchToken::Stack(s) => c.stack() == Some(s.as_str()),
            SearchToken::Port(p) => c.ports.iter().any(|port| port.private == *p || port.public == Some(*p)),
            SearchToken::Name(n) => c.has_name(n),
            SearchToken::Image(i) => c.image.as_deref() == Some(i.as_str()),
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl fmt::Display for SearchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = self.kind().prefix();
        match self {
            SearchToken::State(Some(s)) => write!(f, "{prefix}:{s}"),
            SearchToken::State(None) => write!(f, "{prefix}:unknown"),
            SearchToken::Port(p) => write!(f, "{prefix}:{p}"),
            SearchToken::Stack(v) | SearchToken::Name(v) | SearchToken::Image(v) => write!(f, "{prefix}:{v}"),
        }
    }
}

impl FromStr for SearchToken {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, value) = s.split_once(':').ok_or_else(|| format!("expected kind:value, got {s}"))?;
        if value.is_empty() {
            return Err(format!("empty value in {s}"));
        }
        match kind.to_ascii_lowercase().as_str() {
            "state" if value.eq_ignore_ascii_case("unknown") => Ok(SearchToken::State(None)),
            "state" => value.parse().map(|st| SearchToken::State(Some(st))),
            "stack" => Ok(SearchToken::Stack(value.to_string())),
            "port" => value.parse().map(SearchToken::Port).map_err(|_| format!("invalid port: {value}")),
            "name" => Ok(SearchToken::Name(value.to_string())),
            "image" => Ok(SearchToken::Image(value.to_string())),
            other => Err(format!("unknown token kind: {other}")),
        }
    }
}

/// Free text plus tokens extracted from a query line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedQuery {
    pub text: String,
    pub tokens: Vec<SearchToken>,
}

/// Split `kind:value` words into tokens. Words that do not parse stay in the free text.
pub fn parse_query(q: &str) -> ParsedQuery {
    let mut tokens = Vec::new();
    let mut free_terms: Vec<&str> = Vec::new();
    for word in q.split_whitespace() {
        let typed = word
            .split_once(':')
            .filter(|(kind, _)| TokenKind::ALL.iter().any(|k| k.prefix().eq_ignore_ascii_case(kind)))
            .and_then(|_| word.parse::<SearchToken>().ok());
        match typed {
            Some(t) => tokens.push(t),
            None => free_terms.push(word),
        }
    }
    ParsedQuery { text: free_terms.join(" "), tokens }
}

fn matches_text(c: &Container, needle: &str) -> bool {
    let hit = |s: &str| s.to_lowercase().contains(needle);
    c.display_name().is_some_and(hit) || c.names.iter().any(|n| hit(n)) || hit(&c.id)
}

/// Whether `c` passes every token kind and the free-text query.
pub fn matches(c: &Container, query: &str, tokens: &[SearchToken]) -> bool {
    let tokens_ok = TokenKind::ALL.iter().all(|kind| {
        let mut of_kind = tokens.iter().filter(|t| t.kind() == *kind).peekable();
        of_kind.peek().is_none() || of_kind.any(|t| t.matches(c))
    });
    if !tokens_ok {
        return false;
    }
    let needle = query.trim().to_lowercase();
    needle.is_empty() || matches_text(c, &needle)
}

/// Containers passing [`matches`], in input order.
pub fn filter(containers: &[Container], query: &str, tokens: &[SearchToken]) -> Vec<Container> {
    let started = std::time::Instant::now();
    let out: Vec<Container> = containers.iter().filter(|c| matches(c, query, tokens)).cloned().collect();
    metrics::histogram!("search_filter_ms", started.elapsed().as_secs_f64() * 1_000.0);
    debug!(total = containers.len(), matched = out.len(), tokens = tokens.len(), "search: filter");
    out
}

/// Distinct token-able values of `containers`, minus tokens already `applied`. Order: states in
/// declared order with unknown last, stacks, images, then ports ascending.
pub fn suggested_tokens(containers: &[Container], applied: &[SearchToken]) -> Vec<SearchToken> {
    let mut states: BTreeSet<ContainerState> = BTreeSet::new();
    let mut unknown_state = false;
    let mut stacks: BTreeSet<&str> = BTreeSet::new();
    let mut images: BTreeSet<&str> = BTreeSet::new();
    let mut ports: BTreeSet<u16> = BTreeSet::new();
    for c in containers {
        match c.state {
            Some(s) => {
                states.insert(s);
            }
            None => unknown_state = true,
        }
        if let Some(s) = c.stack() {
            stacks.insert(s);
        }
        if let Some(i) = c.image.as_deref() {
            images.insert(i);
        }
        for p in &c.ports {
            ports.insert(p.public.unwrap_or(p.private));
        }
    }

    let mut out: Vec<SearchToken> = states.into_iter().map(|s| SearchToken::State(Some(s))).collect();
    if unknown_state {
        out.push(SearchToken::State(None));
    }
    out.extend(stacks.into_iter().map(|s| SearchToken::Stack(s.to_string())));
    out.extend(images.into_iter().map(|s| SearchToken::Image(s.to_string())));
    out.extend(ports.into_iter().map(SearchToken::Port));
    out.retain(|t| !applied.contains(t));
    out
}

/// A ranked candidate: index into the input slice plus fuzzy score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub doc: usize,
    pub score: f32,
}

/// Rank `containers` against `query` by fuzzy score. Empty query keeps every container with score 0.
/// Ties break by display name, then id.
pub fn rank(containers: &[Container], query: &str) -> Vec<Hit> {
    let matcher = SkimMatcherV2::default();
    let q = query.trim();
    let mut hits: Vec<Hit> = containers
        .iter()
        .enumerate()
        .filter_map(|(doc, c)| {
            if q.is_empty() {
                return Some(Hit { doc, score: 0.0 });
            }
            let text = format!("{} {}", c.display_name().unwrap_or(""), c.id);
            matcher.fuzzy_match(&text, q).map(|s| Hit { doc, score: s as f32 })
        })
        .collect();
    hits.sort_by(|a, b| {
        let (ca, cb) = (&containers[a.doc], &containers[b.doc]);
        b.score
            .total_cmp(&a.score)
            .then_with(|| ca.display_name().cmp(&cb.display_name()))
            .then_with(|| ca.id.cmp(&cb.id))
    });
    hits
}
