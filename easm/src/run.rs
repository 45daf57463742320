//! One reconciliation run: discovery, dedup, the two reconciliation passes,
//! notification and the run ledger.

use crate::config::{RunMode, RunSettings};
use anyhow::{Context, Result};
use discovery::{DnsxBrute, Permutations, Subfinder};
use easm_core::{
    dedup, Delta, DiscoverySource, Expander, Failure, LiveHost, LivenessProbe, Notifier, Reconciler, StageOutput,
};
use liveness::HttpProbe;
use notify::{LogOnly, Webhook};
use serde::Serialize;
use state_sqlite::{now_ms, Db, RunMeta, RunTotals};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{info, warn};

/// The collaborators a run drives. Built from settings in production, from
/// fakes in tests.
pub struct Stages {
    pub passive: Box<dyn DiscoverySource>,
    pub active: Option<Box<dyn DiscoverySource>>,
    pub permutations: Option<Box<dyn Expander>>,
    pub probe: Box<dyn LivenessProbe>,
    pub notifier: Box<dyn Notifier>,
}

impl Stages {
    pub fn from_settings(s: &RunSettings) -> Self {
        let passive = Box::new(Subfinder {
            binary: s.subfinder.clone(),
            concurrency: s.seed_concurrency,
            timeout: s.discovery_timeout,
        });
        let (active, permutations) = match (s.mode, &s.wordlist) {
            (RunMode::Complete, Some(wordlist)) => (
                Some(Box::new(DnsxBrute {
                    binary: s.dnsx.clone(),
                    wordlist: wordlist.clone(),
                    threads: s.threads,
                    concurrency: s.seed_concurrency,
                    timeout: s.discovery_timeout,
                }) as Box<dyn DiscoverySource>),
                Some(Box::new(Permutations {
                    binary: s.dnsx.clone(),
                    threads: s.threads,
                    tokens: s.permutation_tokens.clone(),
                    max_candidates: s.max_permutations,
                    timeout: s.discovery_timeout,
                }) as Box<dyn Expander>),
            ),
            _ => (None, None),
        };
        let notifier: Box<dyn Notifier> = match &s.webhook {
            Some(url) => Box::new(
                Webhook::new(url.clone())
                    .with_timeout(s.notify_timeout)
                    .with_retries(s.notify_retries, s.notify_retry_delay),
            ),
            None => {
                info!("no webhook configured; run delta will only be logged");
                Box::new(LogOnly)
            }
        };
        Stages { passive, active, permutations, probe: Box::new(HttpProbe::new(s.probe.clone())), notifier }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    PassiveDiscovery,
    ActiveDiscovery,
    PermutationExpansion,
    ReconcileActive,
    Liveness,
    ReconcileLive,
    Notify,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::PassiveDiscovery => "passive-discovery",
            Phase::ActiveDiscovery => "active-discovery",
            Phase::PermutationExpansion => "permutation-expansion",
            Phase::ReconcileActive => "reconcile-active",
            Phase::Liveness => "liveness",
            Phase::ReconcileLive => "reconcile-live",
            Phase::Notify => "notify",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub mode: RunMode,
    pub seeds: Vec<String>,
    pub candidate_count: usize,
    pub delta: Delta,
    /// Responsive hosts within the active candidate set, sorted by domain.
    pub live_hosts: Vec<LiveHost>,
    pub failures: Vec<Failure>,
}

impl RunReport {
    fn totals(&self) -> RunTotals {
        RunTotals {
            candidate_count: self.candidate_count as i64,
            new_active: self.delta.new_active.len() as i64,
            new_live: self.delta.new_live.len() as i64,
            deprecated_active: self.delta.deprecated_active.len() as i64,
            deprecated_live: self.delta.deprecated_live.len() as i64,
            error_count: self.failures.len() as i64,
        }
    }
}

/// Execute one run against `db`. Stage failures are recovered and recorded;
/// only store errors and invariant violations under the abort policy are fatal.
/// A fatal error leaves the ledger row without `finished_at`.
pub async fn execute(mode: RunMode, seeds: &[String], stages: &Stages, db: &Db) -> Result<RunReport> {
    let meta = RunMeta::new(mode.as_str(), seeds);
    let run_id = db.begin_run(&meta).context("recording run start")?;
    info!(%run_id, %mode, seeds = seeds.len(), "run started");

    let mut raw = StageOutput::default();
    info!(phase = %Phase::PassiveDiscovery, source = stages.passive.name());
    raw.extend(stages.passive.discover(seeds).await);

    if mode == RunMode::Complete {
        match &stages.active {
            Some(active) => {
                info!(phase = %Phase::ActiveDiscovery, source = active.name());
                raw.extend(active.discover(seeds).await);
            }
            None => warn!("complete run without an active discovery source"),
        }
        if let Some(expander) = &stages.permutations {
            let known = dedup(&raw.domains);
            info!(phase = %Phase::PermutationExpansion, known = known.len());
            raw.extend(expander.expand(seeds, &known).await);
        }
    }

    let StageOutput { domains, mut failures } = raw;
    let candidates = dedup(&domains);
    info!(raw = domains.len(), candidates = candidates.len(), "candidate set built");

    let reconciler = Reconciler::new(db);
    info!(phase = %Phase::ReconcileActive);
    let active = reconciler.active(&candidates)?;
    failures.extend(active.skipped.iter().cloned());

    info!(phase = %Phase::Liveness, hosts = candidates.len());
    let probed = stages.probe.probe(&candidates).await;
    failures.extend(probed.failures.iter().cloned());
    let responsive: BTreeSet<String> = probed.domains();

    info!(phase = %Phase::ReconcileLive);
    let live = reconciler.live(&candidates, &responsive)?;
    failures.extend(live.skipped.iter().cloned());

    let delta = Delta::from_axes(&active, &live);
    info!(
        phase = %Phase::Notify,
        new_active = delta.new_active.len(),
        new_live = delta.new_live.len(),
        deprecated_active = delta.deprecated_active.len(),
        deprecated_live = delta.deprecated_live.len()
    );
    failures.extend(notify::deliver(stages.notifier.as_ref(), &delta).await);

    for f in &failures {
        db.add_error(&run_id, f, now_ms()).context("recording run error")?;
    }
    let report = RunReport {
        run_id: run_id.to_string(),
        mode,
        seeds: seeds.to_vec(),
        candidate_count: candidates.len(),
        delta,
        live_hosts: probed.live.into_iter().filter(|h| candidates.contains(&h.domain)).collect(),
        failures,
    };
    db.finish_run(&run_id, &report.totals()).context("recording run finish")?;
    info!(%run_id, errors = report.failures.len(), "run finished");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use async_trait::async_trait;
    use easm_core::{ProbeOutput, StateStore};
    use state_sqlite::DomainFilter;
    use std::sync::{Arc, Mutex};

    struct Fixed {
        name: &'static str,
        domains: Vec<&'static str>,
        fail: bool,
    }

    #[async_trait]
    impl DiscoverySource for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn discover(&self, seeds: &[String]) -> StageOutput {
            let mut out = StageOutput { domains: self.domains.iter().map(|d| d.to_string()).collect(), failures: vec![] };
            if self.fail {
                out.failures.push(Failure::new(format!("{}:{}", self.name, seeds[0]), "discovery", "tool missing"));
            }
            out
        }
    }

    /// Prefixes every known name with `dev.` and reports them all as resolving.
    struct DevPrefix;

    #[async_trait]
    impl Expander for DevPrefix {
        fn name(&self) -> &'static str {
            "permutation"
        }

        async fn expand(&self, _seeds: &[String], known: &BTreeSet<String>) -> StageOutput {
            StageOutput { domains: known.iter().map(|k| format!("dev.{k}")).collect(), failures: vec![] }
        }
    }

    /// Responds for a fixed set of hosts, plus one host it was never asked about.
    struct Responds(Vec<&'static str>);

    #[async_trait]
    impl LivenessProbe for Responds {
        async fn probe(&self, candidates: &BTreeSet<String>) -> ProbeOutput {
            let mut live: Vec<LiveHost> = self
                .0
                .iter()
                .filter(|d| candidates.contains(&d.to_string()))
                .map(|d| LiveHost {
                    domain: d.to_string(),
                    url: format!("https://{d}/"),
                    status: 200,
                    title: None,
                    server: None,
                })
                .collect();
            live.push(LiveHost {
                domain: "stray.elsewhere.net".into(),
                url: "https://stray.elsewhere.net/".into(),
                status: 200,
                title: None,
                server: None,
            });
            ProbeOutput { live, failures: vec![] }
        }
    }

    #[derive(Clone, Default)]
    struct Outbox(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl Notifier for Outbox {
        async fn send(&self, text: &str) -> Result<()> {
            self.0.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    struct Down;

    #[async_trait]
    impl Notifier for Down {
        async fn send(&self, _text: &str) -> Result<()> {
            bail!("connection refused")
        }
    }

    fn stages(passive: Vec<&'static str>, live: Vec<&'static str>, outbox: &Outbox) -> Stages {
        Stages {
            passive: Box::new(Fixed { name: "passive", domains: passive, fail: false }),
            active: None,
            permutations: None,
            probe: Box::new(Responds(live)),
            notifier: Box::new(outbox.clone()),
        }
    }

    fn seeds() -> Vec<String> {
        vec!["example.com".to_string()]
    }

    fn names(db: &Db, filter: DomainFilter) -> Vec<String> {
        db.list(filter).unwrap().into_iter().map(|r| r.domain).collect()
    }

    #[tokio::test]
    async fn first_run_reports_everything_new() {
        let db = Db::open_in_memory().unwrap();
        let outbox = Outbox::default();
        let s = stages(vec!["A.example.com.", "b.example.com", "a.example.com", "not a domain"], vec!["a.example.com"], &outbox);

        let report = execute(RunMode::Fast, &seeds(), &s, &db).await.unwrap();
        assert_eq!(report.candidate_count, 2);
        assert_eq!(report.delta.new_active, vec!["a.example.com", "b.example.com"]);
        assert_eq!(report.delta.new_live, vec!["a.example.com"]);
        assert_eq!(report.live_hosts.len(), 1);
        assert!(report.failures.is_empty());
        assert_eq!(names(&db, DomainFilter::Live), vec!["a.example.com"]);
        assert_eq!(
            *outbox.0.lock().unwrap(),
            vec![
                "New active subdomain records: [a.example.com, b.example.com]",
                "New live subdomain hosts: [a.example.com]",
            ]
        );

        let runs = db.recent_runs(5).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].totals.new_active, 2);
        assert!(runs[0].finished_at.is_some());
    }

    #[tokio::test]
    async fn identical_second_run_is_quiet() {
        let db = Db::open_in_memory().unwrap();
        let outbox = Outbox::default();
        let s = stages(vec!["a.example.com", "b.example.com"], vec!["a.example.com"], &outbox);
        execute(RunMode::Fast, &seeds(), &s, &db).await.unwrap();
        let before = db.list_all().unwrap();
        outbox.0.lock().unwrap().clear();

        let report = execute(RunMode::Fast, &seeds(), &s, &db).await.unwrap();
        assert!(report.delta.is_empty());
        assert!(outbox.0.lock().unwrap().is_empty());
        let after = db.list_all().unwrap();
        for (b, a) in before.iter().zip(&after) {
            assert_eq!(b.first_seen, a.first_seen);
            assert_eq!(b.last_seen, a.last_seen);
            assert_eq!((b.active, b.live), (a.active, a.live));
        }
    }

    #[tokio::test]
    async fn disappearing_names_are_deprecated() {
        let db = Db::open_in_memory().unwrap();
        let outbox = Outbox::default();
        execute(RunMode::Fast, &seeds(), &stages(vec!["a.example.com"], vec!["a.example.com"], &outbox), &db)
            .await
            .unwrap();

        let report = execute(RunMode::Fast, &seeds(), &stages(vec!["b.example.com"], vec![], &outbox), &db)
            .await
            .unwrap();
        assert_eq!(report.delta.new_active, vec!["b.example.com"]);
        assert_eq!(report.delta.deprecated_active, vec!["a.example.com"]);
        assert_eq!(report.delta.deprecated_live, vec!["a.example.com"]);
        assert_eq!(names(&db, DomainFilter::Inactive), vec!["a.example.com"]);
        assert!(names(&db, DomainFilter::Live).is_empty());
    }

    #[tokio::test]
    async fn empty_discovery_deprecates_without_inserting() {
        let db = Db::open_in_memory().unwrap();
        let outbox = Outbox::default();
        execute(RunMode::Fast, &seeds(), &stages(vec!["a.example.com"], vec![], &outbox), &db).await.unwrap();

        let report = execute(RunMode::Fast, &seeds(), &stages(vec![], vec![], &outbox), &db).await.unwrap();
        assert_eq!(report.candidate_count, 0);
        assert_eq!(report.delta.deprecated_active, vec!["a.example.com"]);
        assert_eq!(db.list_all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn complete_mode_merges_every_stage() {
        let db = Db::open_in_memory().unwrap();
        let outbox = Outbox::default();
        let mut s = stages(vec!["a.example.com"], vec![], &outbox);
        s.active = Some(Box::new(Fixed { name: "active", domains: vec!["b.example.com", "a.example.com"], fail: false }));
        s.permutations = Some(Box::new(DevPrefix));

        let report = execute(RunMode::Complete, &seeds(), &s, &db).await.unwrap();
        assert_eq!(
            report.delta.new_active,
            vec!["a.example.com", "b.example.com", "dev.a.example.com", "dev.b.example.com"]
        );
    }

    #[tokio::test]
    async fn fast_mode_skips_active_stages() {
        let db = Db::open_in_memory().unwrap();
        let outbox = Outbox::default();
        let mut s = stages(vec!["a.example.com"], vec![], &outbox);
        s.active = Some(Box::new(Fixed { name: "active", domains: vec!["b.example.com"], fail: false }));
        s.permutations = Some(Box::new(DevPrefix));

        let report = execute(RunMode::Fast, &seeds(), &s, &db).await.unwrap();
        assert_eq!(report.delta.new_active, vec!["a.example.com"]);
    }

    #[tokio::test]
    async fn stray_probe_hosts_never_become_live() {
        let db = Db::open_in_memory().unwrap();
        let outbox = Outbox::default();
        let report = execute(RunMode::Fast, &seeds(), &stages(vec!["a.example.com"], vec![], &outbox), &db)
            .await
            .unwrap();
        assert!(report.delta.new_live.is_empty());
        assert!(report.live_hosts.is_empty());
        assert!(!db.exists("stray.elsewhere.net").unwrap());
    }

    #[tokio::test]
    async fn stage_and_notify_failures_are_recorded_not_fatal() {
        let db = Db::open_in_memory().unwrap();
        let s = Stages {
            passive: Box::new(Fixed { name: "passive", domains: vec!["a.example.com"], fail: true }),
            active: None,
            permutations: None,
            probe: Box::new(Responds(vec![])),
            notifier: Box::new(Down),
        };
        let report = execute(RunMode::Fast, &seeds(), &s, &db).await.unwrap();
        assert_eq!(report.delta.new_active, vec!["a.example.com"]);
        assert_eq!(report.failures.len(), 2);

        let id = report.run_id.parse().unwrap();
        let recorded = db.run_errors(&id).unwrap();
        let codes: Vec<&str> = recorded.iter().map(|f| f.code.as_str()).collect();
        assert_eq!(codes, vec!["discovery", "notify"]);
        assert_eq!(db.recent_runs(1).unwrap()[0].totals.error_count, 2);
    }
}
