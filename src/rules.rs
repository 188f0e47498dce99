//! URL rule sets: block, omit, and allow predicates
//!
//! Patterns are compiled exactly once, when the rule set is built, so the
//! per-request hot path never touches the regex compiler. Evaluation
//! order: any `block` match wins; otherwise a non-empty allow set must
//! match or the URL is blocked; `omit` only controls output inclusion and
//! never affects loading.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Raw, serializable rule configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Regex patterns for URLs that must never load
    #[serde(default)]
    pub block: Vec<String>,
    /// Regex patterns for URLs that load but stay out of the output
    #[serde(default)]
    pub omit: Vec<String>,
    /// Regex patterns for the allow list (empty = allow everything)
    #[serde(default)]
    pub allow_urls: Vec<String>,
    /// Exact registrable domains for the allow list
    #[serde(default)]
    pub allow_domains: Vec<String>,
}

impl RuleConfig {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.block.is_empty()
            && self.omit.is_empty()
            && self.allow_urls.is_empty()
            && self.allow_domains.is_empty()
    }

    /// Compile into an immutable matcher.
    pub fn compile(&self) -> Result<RuleMatcher> {
        RuleMatcher::compile(self)
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<regex::Regex>> {
    patterns
        .iter()
        .map(|p| {
            regex::Regex::new(p).map_err(|source| Error::InvalidPattern {
                pattern: p.clone(),
                source,
            })
        })
        .collect()
}

/// Compiled rule set. Immutable and `Send + Sync`; share behind an `Arc`.
#[derive(Debug)]
pub struct RuleMatcher {
    block: Vec<regex::Regex>,
    omit: Vec<regex::Regex>,
    allow_urls: Vec<regex::Regex>,
    allow_domains: Vec<String>,
}

impl RuleMatcher {
    /// Compile a configuration. Fails on the first malformed pattern.
    pub fn compile(cfg: &RuleConfig) -> Result<Self> {
        Ok(Self {
            block: compile_all(&cfg.block)?,
            omit: compile_all(&cfg.omit)?,
            allow_urls: compile_all(&cfg.allow_urls)?,
            allow_domains: cfg
                .allow_domains
                .iter()
                .map(|d| d.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
        })
    }

    /// A matcher that blocks nothing and omits nothing.
    #[must_use]
    pub fn allow_all() -> Self {
        Self {
            block: Vec::new(),
            omit: Vec::new(),
            allow_urls: Vec::new(),
            allow_domains: Vec::new(),
        }
    }

    /// True when the URL must be failed at the interception layer.
    #[must_use]
    pub fn should_block(&self, url: &str) -> bool {
        if self.block.iter().any(|re| re.is_match(url)) {
            return true;
        }
        let allow_configured = !self.allow_urls.is_empty() || !self.allow_domains.is_empty();
        if !allow_configured {
            return false;
        }
        !self.allow_match(url)
    }

    /// True when the URL loads normally but its entry stays out of the output.
    #[must_use]
    pub fn should_omit(&self, url: &str) -> bool {
        self.omit.iter().any(|re| re.is_match(url))
    }

    /// True when the URL is neither blocked nor shut out by the allow list.
    #[must_use]
    pub fn allowed(&self, url: &str) -> bool {
        !self.should_block(url)
    }

    fn allow_match(&self, url: &str) -> bool {
        if self.allow_urls.iter().any(|re| re.is_match(url)) {
            return true;
        }
        if self.allow_domains.is_empty() {
            return false;
        }
        match host_of(url) {
            Some(host) => self
                .allow_domains
                .iter()
                .any(|domain| domain_matches(&host, domain)),
            None => false,
        }
    }
}

/// Lowercased host of a URL, if it parses.
fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
}

/// Registrable-suffix match: `example.com` covers itself and any subdomain.
fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{domain}"))
}
