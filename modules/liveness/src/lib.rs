//! HTTP(S) liveness probing: a host is live if any configured port answers
//! with an HTTP response, whatever the status code.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use easm_core::ratelimiter::RateLimiter;
use easm_core::{Failure, LiveHost, LivenessProbe, ProbeOutput};
use reqwest::{redirect::Policy, Client};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use url::Url;

#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub ports: Vec<u16>,
    pub timeout_ms: u64,
    pub redirects: usize,
    pub concurrency: usize,
    /// Request launches per second across all hosts; `None` disables pacing.
    pub qps: Option<u32>,
    pub user_agent: String,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        ProbeOptions {
            ports: vec![443, 80],
            timeout_ms: 5000,
            redirects: 3,
            concurrency: 50,
            qps: None,
            user_agent: format!("easm/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpProbe {
    opts: ProbeOptions,
}

impl HttpProbe {
    pub fn new(opts: ProbeOptions) -> Self {
        HttpProbe { opts }
    }

    fn client(&self) -> Result<Client> {
        let client = Client::builder()
            .redirect(Policy::limited(self.opts.redirects))
            .timeout(Duration::from_millis(self.opts.timeout_ms))
            .user_agent(self.opts.user_agent.clone())
            .danger_accept_invalid_certs(true)
            .brotli(true)
            .gzip(true)
            .deflate(true)
            .build()?;
        Ok(client)
    }
}

#[async_trait]
impl LivenessProbe for HttpProbe {
    async fn probe(&self, candidates: &BTreeSet<String>) -> ProbeOutput {
        let mut out = ProbeOutput::default();
        if candidates.is_empty() {
            return out;
        }
        let client = match self.client() {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "could not build HTTP client; treating every host as not live");
                out.failures.push(Failure::new("probe", "client", e));
                return out;
            }
        };
        tracing::info!(hosts = candidates.len(), ports = ?self.opts.ports, "probing for live HTTP endpoints");

        let sem = Arc::new(Semaphore::new(self.opts.concurrency.max(1)));
        let pacing = self.opts.qps.filter(|q| *q > 0).map(RateLimiter::new);
        let (tx, mut rx) = mpsc::channel::<Option<LiveHost>>(candidates.len());
        let mut handles = Vec::with_capacity(candidates.len());
        for host in candidates {
            let Ok(permit) = sem.clone().acquire_owned().await else { break };
            if let Some(rl) = &pacing {
                rl.acquire().await;
            }
            let client = client.clone();
            let ports = self.opts.ports.clone();
            let host = host.clone();
            let txc = tx.clone();
            handles.push((
                host.clone(),
                tokio::spawn(async move {
                    let r = probe_host(&client, &host, &ports).await;
                    drop(permit);
                    let _ = txc.send(r).await;
                }),
            ));
        }
        drop(tx);

        while let Some(r) = rx.recv().await {
            if let Some(live) = r {
                tracing::debug!(domain = %live.domain, status = live.status, "host answered");
                out.live.push(live);
            }
        }
        for (host, h) in handles {
            if let Err(e) = h.await {
                tracing::warn!(%host, error = %e, "probe task failed; treating host as not live");
                out.failures.push(Failure::new(format!("probe:{host}"), "probe", e));
            }
        }
        out.live.sort_by(|a, b| a.domain.cmp(&b.domain));
        tracing::info!(live = out.live.len(), "probe finished");
        out
    }
}

fn schemes_for(port: u16) -> &'static [&'static str] {
    match port {
        443 | 8443 | 9443 => &["https"],
        80 | 8080 | 8000 => &["http"],
        _ => &["https", "http"],
    }
}

fn endpoint(scheme: &str, host: &str, port: u16) -> Result<Url> {
    let default = matches!((scheme, port), ("https", 443) | ("http", 80));
    let raw = if default { format!("{scheme}://{host}/") } else { format!("{scheme}://{host}:{port}/") };
    let url = Url::parse(&raw)?;
    if url.host_str() != Some(host) {
        return Err(anyhow!("not a plain hostname: {host}"));
    }
    Ok(url)
}

/// First endpoint of `host` that answers wins. `None` if nothing answered.
/// HEAD is tried first; a transport failure on HEAD falls back to GET, since
/// some servers drop HEAD outright.
async fn probe_host(client: &Client, host: &str, ports: &[u16]) -> Option<LiveHost> {
    for &port in ports {
        for scheme in schemes_for(port) {
            let url = match endpoint(scheme, host, port) {
                Ok(u) => u,
                Err(e) => {
                    tracing::debug!(%host, error = %e, "skipping unprobeable host");
                    return None;
                }
            };
            let answer = match fetch_head(client, url.as_str()).await {
                Ok((final_url, status, server)) => {
                    let page = fetch_page(client, &final_url).await.ok();
                    let title = page.as_ref().and_then(|p| p.title.clone());
                    let server = server.or_else(|| page.and_then(|p| p.server));
                    Some((status, title, server))
                }
                Err(e) => {
                    tracing::trace!(%url, error = %e, "HEAD failed; retrying with GET");
                    match fetch_page(client, url.as_str()).await {
                        Ok(p) => Some((p.status, p.title, p.server)),
                        Err(e) => {
                            tracing::trace!(%url, error = %e, "no answer");
                            None
                        }
                    }
                }
            };
            if let Some((status, title, server)) = answer {
                return Some(LiveHost { domain: host.to_string(), url: url.to_string(), status, title, server });
            }
        }
    }
    None
}

async fn fetch_head(client: &Client, url: &str) -> Result<(String, u16, Option<String>)> {
    let resp = client.head(url).send().await?;
    let status = resp.status().as_u16();
    let server = resp.headers().get(reqwest::header::SERVER).and_then(|v| v.to_str().ok()).map(|s| s.to_string());
    let final_url = resp.url().to_string();
    Ok((final_url, status, server))
}

struct Page {
    status: u16,
    title: Option<String>,
    server: Option<String>,
}

async fn fetch_page(client: &Client, url: &str) -> Result<Page> {
    let resp = client.get(url).send().await?;
    let status = resp.status().as_u16();
    let server = resp.headers().get(reqwest::header::SERVER).and_then(|v| v.to_str().ok()).map(|s| s.to_string());
    let ct_is_html = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.contains("text/html"))
        .unwrap_or(false);
    let bytes = resp.bytes().await?;
    if bytes.len() > 128 * 1024 {
        return Ok(Page { status, title: None, server });
    }
    let body = String::from_utf8_lossy(&bytes);
    let title = if ct_is_html || body.to_lowercase().contains("<html") { extract_title(&body) } else { None };
    Ok(Page { status, title, server })
}

fn extract_title(body: &str) -> Option<String> {
    // lowercasing can shift byte offsets for non-ASCII text, so search an ASCII-folded copy
    let folded = body.to_ascii_lowercase();
    let s = folded.find("<title")?;
    let gt = s + folded[s..].find('>')?;
    let end = gt + 1 + folded[gt + 1..].find("</title>")?;
    let t = body[gt + 1..end].split_whitespace().collect::<Vec<_>>().join(" ");
    if t.is_empty() {
        None
    } else {
        Some(t)
    }
}
