//! Fault-injection proxy.
//!
//! Sits in front of the origin static server and, per request, either
//! forwards after a small randomized latency or injects exactly one fault:
//! a 404 with an arbitrary body, a dropped connection, a mismatched
//! content-type response, or a long delay before forwarding anyway.
//!
//! All mutable policy state (requests served, remaining trouble budget,
//! the sticky blocked path) is owned by one proxy instance and guarded by a
//! single mutex, so the at-most-once budget decrement holds even with many
//! requests in flight.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::RngExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{FaultOptions, ScenarioConfig};
use crate::origin::StaticServer;
use crate::{HarnessError, HarnessResult};

/// Baseline jitter applied to every passed-through request.
const JITTER_MIN_MS: u64 = 10;
const JITTER_MAX_MS: u64 = 120;

/// Long-delay fault tiers.
const DELAY_MODERATE: Duration = Duration::from_secs(5);
const DELAY_SEVERE: Duration = Duration::from_secs(15);

/// Cap on the request head we are willing to buffer before parsing.
const MAX_REQUEST_HEAD: usize = 16 * 1024;

/// Source of the proxy's random draws. Injectable so the trouble-budget and
/// sticky-block invariants can be tested deterministically.
pub trait FaultDice: Send {
    /// Baseline latency jitter for one request.
    fn latency(&mut self) -> Duration;
    /// Fault-eligibility draw, uniform in [0,100).
    fn eligibility(&mut self) -> u8;
}

/// Production dice backed by the thread-local RNG.
#[derive(Debug, Default)]
pub struct RandomDice;

impl FaultDice for RandomDice {
    fn latency(&mut self) -> Duration {
        Duration::from_millis(rand::rng().random_range(JITTER_MIN_MS..=JITTER_MAX_MS))
    }

    fn eligibility(&mut self) -> u8 {
        rand::rng().random_range(0..100)
    }
}

/// Deterministic dice: replays a scripted sequence of eligibility draws and
/// a fixed latency. Draws past the end of the script repeat the last value.
#[derive(Debug)]
pub struct ScriptedDice {
    rolls: VecDeque<u8>,
    last: u8,
    latency: Duration,
}

impl ScriptedDice {
    pub fn new(rolls: impl IntoIterator<Item = u8>) -> Self {
        Self {
            rolls: rolls.into_iter().collect(),
            last: 0,
            latency: Duration::ZERO,
        }
    }
}

impl FaultDice for ScriptedDice {
    fn latency(&mut self) -> Duration {
        self.latency
    }

    fn eligibility(&mut self) -> u8 {
        if let Some(roll) = self.rolls.pop_front() {
            self.last = roll;
        }
        self.last
    }
}

/// The single fault a proxy instance injects when a request is eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultMode {
    /// Not-Found status with an arbitrary body.
    NotFound,
    /// Close the connection without any response.
    Drop,
    /// Success status, but a content type and body that match nothing the
    /// client asked for.
    WrongHeader,
    /// Forward after a ~5s delay instead of failing.
    DelayModerate,
    /// Forward after a ~15s delay instead of failing.
    DelaySevere,
}

impl FaultMode {
    /// The configured fault mode, if any. Scenarios configure at most one;
    /// when several flags are set the harder failure wins.
    pub fn from_options(opts: &FaultOptions) -> Option<Self> {
        if opts.drop {
            Some(Self::Drop)
        } else if opts.not_found {
            Some(Self::NotFound)
        } else if opts.wrong_header {
            Some(Self::WrongHeader)
        } else if opts.delay_severe {
            Some(Self::DelaySevere)
        } else if opts.delay_moderate {
            Some(Self::DelayModerate)
        } else {
            None
        }
    }
}

/// Mutable fault-policy state, one per proxy instance.
struct PolicyState {
    requests_served: u64,
    trouble_budget_remaining: u32,
    blocked_path: Option<String>,
    manifest_faulted: bool,
    dice: Box<dyn FaultDice>,
}

/// What the policy decided for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Forward { delay: Duration },
    Fault { mode: FaultMode, delay: Duration },
}

/// One decision step. Locked-state-in, decision-out; no I/O.
fn decide(state: &mut PolicyState, opts: &FaultOptions, path: &str, manifest_path: &str) -> Decision {
    state.requests_served += 1;
    let jitter = state.dice.latency();
    let is_manifest = path == manifest_path;

    // Sticky selection: the first request past the serve-count threshold
    // becomes the one permanently eligible path. Never replaced afterwards.
    if opts.block_one_file
        && state.blocked_path.is_none()
        && state.requests_served > opts.sticky_after
        && (!is_manifest || opts.block_manifest)
    {
        info!(path, "sticky-blocking path for the rest of the run");
        state.blocked_path = Some(path.to_string());
    }

    let sticky_hit = state.blocked_path.as_deref() == Some(path);

    let mut eligible = if sticky_hit {
        true
    } else if is_manifest {
        // The manifest stays reachable unless a scenario explicitly blocks
        // it, and then only for a single fault.
        opts.block_manifest && !state.manifest_faulted
    } else {
        state.dice.eligibility() > opts.eligibility_threshold
    };

    let mode = FaultMode::from_options(opts);
    if mode.is_none() || state.trouble_budget_remaining == 0 {
        eligible = false;
    }

    if eligible {
        // Exactly one decrement per eligible request, whichever fault fires.
        state.trouble_budget_remaining -= 1;
        if is_manifest {
            state.manifest_faulted = true;
        }
        let mode = mode.expect("eligibility requires a configured mode");
        let delay = match mode {
            FaultMode::DelayModerate => DELAY_MODERATE,
            FaultMode::DelaySevere => DELAY_SEVERE,
            _ => jitter,
        };
        Decision::Fault { mode, delay }
    } else {
        Decision::Forward { delay: jitter }
    }
}

struct ProxyContext {
    opts: FaultOptions,
    manifest_path: String,
    origin_addr: SocketAddr,
    http: reqwest::Client,
    state: Mutex<PolicyState>,
}

/// Running fault-injection proxy. Owns the backing origin server; stopping
/// the proxy stops both.
pub struct FaultProxy {
    addr: SocketAddr,
    accept_task: Option<JoinHandle<()>>,
    origin: StaticServer,
    context: Arc<ProxyContext>,
}

impl FaultProxy {
    /// Start the origin server and the fault layer in front of it.
    pub async fn start(cfg: &ScenarioConfig, dice: Box<dyn FaultDice>) -> HarnessResult<Self> {
        let origin = StaticServer::start(cfg.dirs.server.clone(), cfg.ports.origin).await?;

        let listener = TcpListener::bind(("127.0.0.1", cfg.ports.proxy))
            .await
            .map_err(|e| HarnessError::ServerStartFailed(format!("proxy bind: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| HarnessError::ServerStartFailed(format!("proxy addr: {e}")))?;

        let context = Arc::new(ProxyContext {
            opts: cfg.faults.clone(),
            manifest_path: cfg.manifest_request_path(),
            origin_addr: origin.addr(),
            http: reqwest::Client::new(),
            state: Mutex::new(PolicyState {
                requests_served: 0,
                trouble_budget_remaining: cfg.faults.trouble_budget,
                blocked_path: None,
                manifest_faulted: false,
                dice,
            }),
        });

        let accept_context = Arc::clone(&context);
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let ctx = Arc::clone(&accept_context);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, ctx).await {
                                debug!(%peer, error = %e, "proxy connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "proxy accept error");
                    }
                }
            }
        });

        info!(%addr, origin = %context.origin_addr, "fault-injection proxy listening");
        Ok(Self {
            addr,
            accept_task: Some(accept_task),
            origin,
            context,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL for the client under test.
    pub fn base_url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    /// Requests seen by this instance so far.
    pub fn requests_served(&self) -> u64 {
        self.context.state.lock().expect("policy lock").requests_served
    }

    /// Trouble budget left for this instance.
    pub fn budget_remaining(&self) -> u32 {
        self.context
            .state
            .lock()
            .expect("policy lock")
            .trouble_budget_remaining
    }

    /// The sticky-selected path, once one exists.
    pub fn blocked_path(&self) -> Option<String> {
        self.context.state.lock().expect("policy lock").blocked_path.clone()
    }

    /// Stop the fault layer and the backing origin server. Idempotent;
    /// neither listener stays open afterwards.
    pub async fn stop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
            debug!(addr = %self.addr, "fault proxy stopped");
        }
        self.origin.stop();
    }
}

impl Drop for FaultProxy {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
    }
}

/// Read the request head and pull out the request-line path.
async fn read_request_path(stream: &mut TcpStream) -> std::io::Result<Option<String>> {
    let mut head = Vec::with_capacity(1024);
    let mut buf = [0u8; 1024];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        head.extend_from_slice(&buf[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") || head.len() > MAX_REQUEST_HEAD {
            break;
        }
    }
    let text = String::from_utf8_lossy(&head);
    let request_line = text.lines().next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let _method = parts.next();
    Ok(parts.next().map(|p| p.to_string()))
}

async fn handle_connection(mut stream: TcpStream, ctx: Arc<ProxyContext>) -> std::io::Result<()> {
    let Some(path) = read_request_path(&mut stream).await? else {
        return Ok(());
    };

    let decision = {
        let mut state = ctx.state.lock().expect("policy lock");
        decide(&mut state, &ctx.opts, &path, &ctx.manifest_path)
    };

    match decision {
        Decision::Forward { delay } => {
            tokio::time::sleep(delay).await;
            forward(&mut stream, &ctx, &path).await
        }
        Decision::Fault { mode, delay } => {
            debug!(%path, ?mode, "injecting fault");
            match mode {
                FaultMode::Drop => {
                    // Closing without writing anything is the whole fault.
                    Ok(())
                }
                FaultMode::NotFound => {
                    tokio::time::sleep(delay).await;
                    write_response(
                        &mut stream,
                        "404 Not Found",
                        "text/plain",
                        b"simulated origin failure\n",
                    )
                    .await
                }
                FaultMode::WrongHeader => {
                    tokio::time::sleep(delay).await;
                    write_response(
                        &mut stream,
                        "200 OK",
                        "text/html",
                        b"<html><body>unexpected interstitial</body></html>\n",
                    )
                    .await
                }
                FaultMode::DelayModerate | FaultMode::DelaySevere => {
                    tokio::time::sleep(delay).await;
                    forward(&mut stream, &ctx, &path).await
                }
            }
        }
    }
}

/// Relay the origin's response for `path` verbatim.
async fn forward(stream: &mut TcpStream, ctx: &ProxyContext, path: &str) -> std::io::Result<()> {
    let url = format!("http://{}{}", ctx.origin_addr, path);
    match ctx.http.get(&url).send().await {
        Ok(response) => {
            let status_line = format!(
                "{} {}",
                response.status().as_u16(),
                response.status().canonical_reason().unwrap_or("OK")
            );
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("application/octet-stream")
                .to_string();
            match response.bytes().await {
                Ok(body) => write_response(stream, &status_line, &content_type, &body).await,
                Err(e) => {
                    warn!(%path, error = %e, "origin body read failed");
                    write_response(stream, "502 Bad Gateway", "text/plain", b"origin error\n")
                        .await
                }
            }
        }
        Err(e) => {
            warn!(%path, error = %e, "origin request failed");
            write_response(stream, "502 Bad Gateway", "text/plain", b"origin error\n").await
        }
    }
}

async fn write_response(
    stream: &mut TcpStream,
    status_line: &str,
    content_type: &str,
    body: &[u8],
) -> std::io::Result<()> {
    let head = format!(
        "HTTP/1.1 {status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await?;
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = "/0.11.9-preview.1.sha256";

    fn state(dice: ScriptedDice, budget: u32) -> PolicyState {
        PolicyState {
            requests_served: 0,
            trouble_budget_remaining: budget,
            blocked_path: None,
            manifest_faulted: false,
            dice: Box::new(dice),
        }
    }

    fn opts_404() -> FaultOptions {
        FaultOptions {
            not_found: true,
            ..FaultOptions::default()
        }
    }

    fn is_fault(d: Decision) -> bool {
        matches!(d, Decision::Fault { .. })
    }

    #[test]
    fn test_no_fault_mode_means_pure_passthrough() {
        let opts = FaultOptions::default();
        // Every draw exceeds the threshold, yet no mode is configured.
        let mut st = state(ScriptedDice::new([99, 99, 99]), 10);
        for _ in 0..3 {
            assert!(!is_fault(decide(&mut st, &opts, "/a.txt", MANIFEST)));
        }
        assert_eq!(st.trouble_budget_remaining, 10);
    }

    #[test]
    fn test_eligibility_threshold() {
        let opts = opts_404();
        let mut st = state(ScriptedDice::new([90, 91]), 10);
        // 90 is not strictly above the default threshold of 90
        assert!(!is_fault(decide(&mut st, &opts, "/a.txt", MANIFEST)));
        assert!(is_fault(decide(&mut st, &opts, "/a.txt", MANIFEST)));
        assert_eq!(st.trouble_budget_remaining, 9);
    }

    #[test]
    fn test_budget_is_never_exceeded() {
        let opts = FaultOptions {
            trouble_budget: 3,
            ..opts_404()
        };
        // Every request is eligible by draw; only three faults may fire.
        let mut st = state(ScriptedDice::new([99]), opts.trouble_budget);
        let faults = (0..50)
            .filter(|_| is_fault(decide(&mut st, &opts, "/a.txt", MANIFEST)))
            .count();
        assert_eq!(faults, 3);
        assert_eq!(st.trouble_budget_remaining, 0);
    }

    #[test]
    fn test_budget_decrements_once_for_every_fault_mode() {
        for opts in [
            FaultOptions { not_found: true, ..FaultOptions::default() },
            FaultOptions { drop: true, ..FaultOptions::default() },
            FaultOptions { wrong_header: true, ..FaultOptions::default() },
            FaultOptions { delay_moderate: true, ..FaultOptions::default() },
            FaultOptions { delay_severe: true, ..FaultOptions::default() },
        ] {
            let mut st = state(ScriptedDice::new([99]), 5);
            assert!(is_fault(decide(&mut st, &opts, "/a.txt", MANIFEST)));
            assert_eq!(st.trouble_budget_remaining, 4, "mode {:?}", FaultMode::from_options(&opts));
        }
    }

    #[test]
    fn test_sticky_path_selected_after_threshold_and_never_replaced() {
        let opts = FaultOptions {
            block_one_file: true,
            sticky_after: 2,
            ..opts_404()
        };
        // Draws low: nothing is randomly eligible.
        let mut st = state(ScriptedDice::new([0]), 10);

        assert!(!is_fault(decide(&mut st, &opts, "/one.txt", MANIFEST)));
        assert!(!is_fault(decide(&mut st, &opts, "/two.txt", MANIFEST)));
        assert!(st.blocked_path.is_none());

        // Third request crosses the threshold and becomes sticky.
        assert!(is_fault(decide(&mut st, &opts, "/three.txt", MANIFEST)));
        assert_eq!(st.blocked_path.as_deref(), Some("/three.txt"));

        // The sticky path stays eligible; other paths do not join it.
        assert!(!is_fault(decide(&mut st, &opts, "/four.txt", MANIFEST)));
        assert!(is_fault(decide(&mut st, &opts, "/three.txt", MANIFEST)));
        assert_eq!(st.blocked_path.as_deref(), Some("/three.txt"));
    }

    #[test]
    fn test_sticky_path_respects_exhausted_budget() {
        let opts = FaultOptions {
            block_one_file: true,
            sticky_after: 0,
            trouble_budget: 1,
            ..opts_404()
        };
        let mut st = state(ScriptedDice::new([0]), 1);

        assert!(is_fault(decide(&mut st, &opts, "/a.txt", MANIFEST)));
        // Budget exhausted: the sticky path passes through from now on.
        assert!(!is_fault(decide(&mut st, &opts, "/a.txt", MANIFEST)));
        assert_eq!(st.trouble_budget_remaining, 0);
    }

    #[test]
    fn test_manifest_exempt_from_random_eligibility() {
        let opts = opts_404();
        let mut st = state(ScriptedDice::new([99]), 10);
        for _ in 0..5 {
            assert!(!is_fault(decide(&mut st, &opts, MANIFEST, MANIFEST)));
        }
        assert_eq!(st.trouble_budget_remaining, 10);
    }

    #[test]
    fn test_block_manifest_faults_exactly_once() {
        let opts = FaultOptions {
            block_manifest: true,
            ..opts_404()
        };
        let mut st = state(ScriptedDice::new([0]), 10);
        assert!(is_fault(decide(&mut st, &opts, MANIFEST, MANIFEST)));
        assert!(!is_fault(decide(&mut st, &opts, MANIFEST, MANIFEST)));
        assert!(!is_fault(decide(&mut st, &opts, MANIFEST, MANIFEST)));
        assert_eq!(st.trouble_budget_remaining, 9);
    }

    #[test]
    fn test_block_manifest_with_sticky_is_persistent() {
        let opts = FaultOptions {
            block_manifest: true,
            block_one_file: true,
            sticky_after: 0,
            ..opts_404()
        };
        let mut st = state(ScriptedDice::new([0]), 10);
        assert!(is_fault(decide(&mut st, &opts, MANIFEST, MANIFEST)));
        assert_eq!(st.blocked_path.as_deref(), Some(MANIFEST));
        assert!(is_fault(decide(&mut st, &opts, MANIFEST, MANIFEST)));
        assert!(is_fault(decide(&mut st, &opts, MANIFEST, MANIFEST)));
        assert_eq!(st.trouble_budget_remaining, 7);
    }

    #[test]
    fn test_sticky_selection_skips_manifest_without_block_manifest() {
        let opts = FaultOptions {
            block_one_file: true,
            sticky_after: 0,
            ..opts_404()
        };
        let mut st = state(ScriptedDice::new([0]), 10);
        // The manifest request crosses the threshold first but must not
        // become the sticky target.
        assert!(!is_fault(decide(&mut st, &opts, MANIFEST, MANIFEST)));
        assert!(st.blocked_path.is_none());
        assert!(is_fault(decide(&mut st, &opts, "/a.txt", MANIFEST)));
        assert_eq!(st.blocked_path.as_deref(), Some("/a.txt"));
    }

    #[test]
    fn test_delay_modes_forward_with_long_delay() {
        let opts = FaultOptions {
            delay_moderate: true,
            ..FaultOptions::default()
        };
        let mut st = state(ScriptedDice::new([99]), 10);
        match decide(&mut st, &opts, "/a.txt", MANIFEST) {
            Decision::Fault { mode, delay } => {
                assert_eq!(mode, FaultMode::DelayModerate);
                assert_eq!(delay, DELAY_MODERATE);
            }
            other => panic!("expected delay fault, got {other:?}"),
        }
        assert_eq!(st.trouble_budget_remaining, 9);
    }

    #[test]
    fn test_scripted_dice_repeats_last_roll() {
        let mut dice = ScriptedDice::new([10, 20]);
        assert_eq!(dice.eligibility(), 10);
        assert_eq!(dice.eligibility(), 20);
        assert_eq!(dice.eligibility(), 20);
    }

    #[test]
    fn test_fault_mode_priority() {
        let opts = FaultOptions {
            drop: true,
            not_found: true,
            delay_moderate: true,
            ..FaultOptions::default()
        };
        assert_eq!(FaultMode::from_options(&opts), Some(FaultMode::Drop));
        assert_eq!(FaultMode::from_options(&FaultOptions::default()), None);
    }
}
