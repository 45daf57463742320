use crate::tool::{per_seed, run_lines};
use async_trait::async_trait;
use easm_core::{DiscoverySource, StageOutput};
use std::time::Duration;

/// Passive aggregation through `subfinder`, one process per seed.
#[derive(Debug, Clone)]
pub struct Subfinder {
    pub binary: String,
    pub concurrency: usize,
    pub timeout: Duration,
}

impl Subfinder {
    pub fn args(seed: &str) -> Vec<String> {
        vec!["-d".into(), seed.into(), "-silent".into()]
    }
}

#[async_trait]
impl DiscoverySource for Subfinder {
    fn name(&self) -> &'static str {
        "passive"
    }

    async fn discover(&self, seeds: &[String]) -> StageOutput {
        tracing::info!(seeds = seeds.len(), binary = %self.binary, "running passive enumeration");
        let binary = self.binary.clone();
        let limit = self.timeout;
        per_seed(self.name(), seeds, self.concurrency, move |seed| {
            let binary = binary.clone();
            async move { run_lines(&binary, &Subfinder::args(&seed), None, limit).await }
        })
        .await
    }
}
