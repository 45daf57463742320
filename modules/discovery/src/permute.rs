//! Permutation expansion: mutate discovered names with environment and numeric
//! tokens, then keep only the mutations that resolve.

use crate::tool::run_lines;
use async_trait::async_trait;
use easm_core::{Expander, Failure, StageOutput};
use std::collections::BTreeSet;
use std::time::Duration;

pub const DEFAULT_TOKENS: &[&str] = &[
    "dev", "test", "stage", "staging", "prod", "qa", "uat", "api", "internal", "admin", "1", "2", "3",
];

const MAX_LABEL: usize = 63;

/// Generate candidate names from `known`, limited to names under one of `seeds`.
/// Known names are never returned. At most `max` candidates are produced.
pub fn generate(seeds: &[String], known: &BTreeSet<String>, tokens: &[String], max: usize) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let push = |name: String, out: &mut BTreeSet<String>| {
        if out.len() < max && !known.contains(&name) && name.split('.').all(|l| !l.is_empty() && l.len() <= MAX_LABEL) {
            out.insert(name);
        }
    };

    'names: for name in known {
        let Some(seed) = seeds.iter().find(|s| name == *s || name.ends_with(&format!(".{s}"))) else {
            continue;
        };
        for tok in tokens {
            if out.len() >= max {
                break 'names;
            }
            push(format!("{tok}.{name}"), &mut out);
            if name == seed {
                continue;
            }
            let Some((label, parent)) = name.split_once('.') else { continue };
            push(format!("{tok}.{parent}"), &mut out);
            push(format!("{label}-{tok}.{parent}"), &mut out);
            push(format!("{tok}-{label}.{parent}"), &mut out);
            if tok.bytes().all(|b| b.is_ascii_digit()) {
                push(format!("{label}{tok}.{parent}"), &mut out);
            }
        }
    }
    out
}

/// Resolves generated permutations with `dnsx` reading the list on stdin.
#[derive(Debug, Clone)]
pub struct Permutations {
    pub binary: String,
    pub threads: usize,
    pub tokens: Vec<String>,
    pub max_candidates: usize,
    pub timeout: Duration,
}

impl Permutations {
    pub fn args(&self) -> Vec<String> {
        vec![
            "-silent".into(),
            "-a".into(),
            "-cname".into(),
            "-aaaa".into(),
            "-t".into(),
            self.threads.max(1).to_string(),
        ]
    }
}

#[async_trait]
impl Expander for Permutations {
    fn name(&self) -> &'static str {
        "permutation"
    }

    async fn expand(&self, seeds: &[String], known: &BTreeSet<String>) -> StageOutput {
        let candidates = generate(seeds, known, &self.tokens, self.max_candidates);
        tracing::info!(known = known.len(), candidates = candidates.len(), "running permutation scan");
        if candidates.is_empty() {
            return StageOutput::default();
        }
        if candidates.len() >= self.max_candidates {
            tracing::warn!(max = self.max_candidates, "permutation candidates capped");
        }
        let input = candidates.into_iter().collect::<Vec<_>>().join("\n") + "\n";
        match run_lines(&self.binary, &self.args(), Some(input), self.timeout).await {
            Ok(domains) => {
                tracing::info!(resolved = domains.len(), "permutation scan finished");
                StageOutput { domains, failures: Vec::new() }
            }
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "permutation scan failed; continuing without it");
                StageOutput { domains: Vec::new(), failures: vec![Failure::new(self.name(), "discovery", format!("{e:#}"))] }
            }
        }
    }
}
