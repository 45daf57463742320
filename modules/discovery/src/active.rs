use crate::tool::{per_seed, run_lines};
use async_trait::async_trait;
use easm_core::{DiscoverySource, StageOutput};
use std::path::PathBuf;
use std::time::Duration;

/// Wordlist brute force through `dnsx`; only names that resolve are printed.
#[derive(Debug, Clone)]
pub struct DnsxBrute {
    pub binary: String,
    pub wordlist: PathBuf,
    pub threads: usize,
    pub concurrency: usize,
    pub timeout: Duration,
}

impl DnsxBrute {
    pub fn args(&self, seed: &str) -> Vec<String> {
        vec![
            "-d".into(),
            seed.into(),
            "-silent".into(),
            "-w".into(),
            self.wordlist.to_string_lossy().into_owned(),
            "-a".into(),
            "-cname".into(),
            "-aaaa".into(),
            "-t".into(),
            self.threads.max(1).to_string(),
        ]
    }
}

#[async_trait]
impl DiscoverySource for DnsxBrute {
    fn name(&self) -> &'static str {
        "active"
    }

    async fn discover(&self, seeds: &[String]) -> StageOutput {
        tracing::info!(seeds = seeds.len(), wordlist = %self.wordlist.display(), "running active enumeration");
        let this = self.clone();
        per_seed(self.name(), seeds, self.concurrency, move |seed| {
            let this = this.clone();
            async move { run_lines(&this.binary, &this.args(&seed), None, this.timeout).await }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_resolver_invocation() {
        let b = DnsxBrute {
            binary: "dnsx".into(),
            wordlist: PathBuf::from("words.txt"),
            threads: 0,
            concurrency: 1,
            timeout: Duration::from_secs(1),
        };
        assert_eq!(
            b.args("example.com"),
            vec!["-d", "example.com", "-silent", "-w", "words.txt", "-a", "-cname", "-aaaa", "-t", "1"]
        );
    }
}
