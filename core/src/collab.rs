//! Seams to the external collaborators: discovery tools, the HTTP probe and
//! the operator channel.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeSet;

/// A locally recovered failure. Recorded against the run, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    /// What failed, e.g. `passive:example.com`.
    pub scope: String,
    pub code: String,
    pub message: String,
}

impl Failure {
    pub fn new(scope: impl Into<String>, code: impl Into<String>, message: impl ToString) -> Self {
        Failure { scope: scope.into(), code: code.into(), message: message.to_string() }
    }
}

/// Raw output of one discovery stage. Domains may contain duplicates and noise.
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub domains: Vec<String>,
    pub failures: Vec<Failure>,
}

impl StageOutput {
    pub fn extend(&mut self, other: StageOutput) {
        self.domains.extend(other.domains);
        self.failures.extend(other.failures);
    }
}

#[async_trait]
pub trait DiscoverySource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn discover(&self, seeds: &[String]) -> StageOutput;
}

/// Mutates already discovered names and returns the mutations that resolve.
#[async_trait]
pub trait Expander: Send + Sync {
    fn name(&self) -> &'static str;
    async fn expand(&self, seeds: &[String], known: &BTreeSet<String>) -> StageOutput;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveHost {
    pub domain: String,
    pub url: String,
    pub status: u16,
    pub title: Option<String>,
    pub server: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProbeOutput {
    pub live: Vec<LiveHost>,
    pub failures: Vec<Failure>,
}

impl ProbeOutput {
    pub fn domains(&self) -> BTreeSet<String> {
        self.live.iter().map(|h| h.domain.clone()).collect()
    }
}

#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn probe(&self, candidates: &BTreeSet<String>) -> ProbeOutput;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> anyhow::Result<()>;
}
