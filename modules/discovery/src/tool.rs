//! Running external enumeration binaries and fanning them out over seeds.

use anyhow::{anyhow, bail, Context, Result};
use easm_core::{Failure, StageOutput};
use std::future::Future;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;

/// Run `program args...`, optionally feeding `stdin`, and return the non-empty
/// stdout lines. A non-zero exit or a timeout is an error; the child is killed
/// if the deadline passes.
pub async fn run_lines(program: &str, args: &[String], stdin: Option<String>, limit: Duration) -> Result<Vec<String>> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let mut child = cmd.spawn().with_context(|| format!("failed to spawn {program}"))?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        // written from its own task so a full stdout pipe cannot deadlock us
        tokio::spawn(async move {
            let _ = pipe.write_all(input.as_bytes()).await;
            let _ = pipe.shutdown().await;
        });
    }

    let output = timeout(limit, child.wait_with_output())
        .await
        .map_err(|_| anyhow!("{program} timed out after {}s", limit.as_secs()))??;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let first = stderr.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        bail!("{program} exited with {}: {}", output.status, first.trim());
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

/// Call `job` once per seed with at most `concurrency` calls in flight.
/// A failing seed contributes nothing and is reported as a failure.
pub async fn per_seed<F, Fut>(stage: &'static str, seeds: &[String], concurrency: usize, job: F) -> StageOutput
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<String>>> + Send + 'static,
{
    let job = Arc::new(job);
    let sem = Arc::new(Semaphore::new(concurrency.max(1)));
    let (tx, mut rx) = mpsc::channel::<(String, Result<Vec<String>>)>(seeds.len().max(1));

    for seed in seeds.iter().filter(|s| !s.trim().is_empty()) {
        let Ok(permit) = sem.clone().acquire_owned().await else { break };
        let txc = tx.clone();
        let job = job.clone();
        let seed = seed.clone();
        tokio::spawn(async move {
            let res = job(seed.clone()).await;
            drop(permit);
            let _ = txc.send((seed, res)).await;
        });
    }
    drop(tx);

    let mut out = StageOutput::default();
    while let Some((seed, res)) = rx.recv().await {
        match res {
            Ok(domains) => {
                tracing::info!(stage, %seed, found = domains.len(), "discovery call finished");
                out.domains.extend(domains);
            }
            Err(e) => {
                tracing::warn!(stage, %seed, error = %format!("{e:#}"), "discovery call failed; continuing without it");
                out.failures.push(Failure::new(format!("{stage}:{seed}"), "discovery", format!("{e:#}")));
            }
        }
    }
    out
}
