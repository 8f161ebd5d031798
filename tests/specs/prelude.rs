//! Shared spec harness: stub proxies, a scripted generator, and an
//! agent running in a background task.

use drover_core::test_support::test_config;
use drover_core::{AgentConfig, RenderError, Rendered, SystemClock};
use drover_daemon::{
    Agent, AgentMetrics, Generator, MemoryEnvironment, ReconcileError, ReconcileHandle,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const SPEC_WAIT_MAX: Duration = Duration::from_secs(5);

/// Poll `cond` until it holds or `max` elapses.
pub async fn wait_for(max: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + max;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

/// Generator double: counts calls, fails on demand, renders the
/// snapshot as JSON otherwise.
#[derive(Clone, Default)]
pub struct ScriptedGen {
    calls: Arc<AtomicU64>,
    failures: Arc<Mutex<VecDeque<RenderError>>>,
}

impl ScriptedGen {
    pub fn generator(&self) -> Generator {
        let calls = self.calls.clone();
        let failures = self.failures.clone();
        Arc::new(move |snapshot, _node| {
            calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = failures.lock().pop_front() {
                return Err(err);
            }
            serde_json::to_vec(snapshot)
                .map(Rendered::new)
                .map_err(|e| RenderError::Permanent(e.to_string()))
        })
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, errors: impl IntoIterator<Item = RenderError>) {
        self.failures.lock().extend(errors);
    }
}

/// Stub proxy behaviors. Every variant logs its invocation (including
/// the CLI args) to `proxy.log` in the scratch dir.
pub enum ProxyKind {
    /// Runs until drained; exits 0 on SIGTERM.
    Idle,
    /// Exits immediately with the given code.
    CrashOnStart(i32),
    /// Runs for `after`, then exits 1 on its own.
    CrashAfter(Duration),
}

fn proxy_script(kind: &ProxyKind, log: &Path) -> String {
    let log = log.display();
    match kind {
        ProxyKind::Idle => format!(
            "echo \"start $*\" >> {log}\ntrap 'echo \"drain $*\" >> {log}; exit 0' TERM\nsleep 30 &\nwait $!"
        ),
        ProxyKind::CrashOnStart(code) => {
            format!("echo \"start $*\" >> {log}\nexit {code}")
        }
        ProxyKind::CrashAfter(after) => format!(
            "echo \"start $*\" >> {log}\ntrap 'echo \"drain $*\" >> {log}; exit 0' TERM\nsleep {}\nexit 1",
            after.as_secs_f64()
        ),
    }
}

pub struct SpecHarness {
    pub dir: TempDir,
    pub env: MemoryEnvironment,
    pub gen: ScriptedGen,
    pub handle: ReconcileHandle,
    pub cancel: CancellationToken,
    pub task: tokio::task::JoinHandle<Result<AgentMetrics, ReconcileError>>,
    log: PathBuf,
}

impl SpecHarness {
    pub fn launch(kind: ProxyKind, tune: impl FnOnce(&mut AgentConfig)) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = dir.path().join("proxy.log");

        let script = dir.path().join("proxy.sh");
        std::fs::write(&script, format!("#!/bin/sh\n{}\n", proxy_script(&kind, &log)))
            .expect("write stub proxy");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("chmod stub proxy");

        let mut config = test_config(dir.path());
        config.proxy_binary = script;
        tune(&mut config);

        let gen = ScriptedGen::default();
        let env = MemoryEnvironment::default();
        let cancel = CancellationToken::new();
        let (agent, handle) = Agent::new(
            config,
            gen.generator(),
            Arc::new(env.clone()),
            SystemClock,
            cancel.clone(),
        );
        let task = tokio::spawn(agent.run());

        Self { dir, env, gen, handle, cancel, task, log }
    }

    pub fn artifact(&self, epoch: u64) -> PathBuf {
        self.dir.path().join(format!("envoy-rev{epoch}.json"))
    }

    pub fn log_lines(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log)
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Lines recording an epoch start, e.g. `start -c ... --restart-epoch N ...`.
    pub fn started_epochs(&self) -> Vec<u64> {
        self.log_lines()
            .iter()
            .filter(|l| l.starts_with("start "))
            .filter_map(|l| {
                let mut words = l.split_whitespace();
                while let Some(word) = words.next() {
                    if word == "--restart-epoch" {
                        return words.next().and_then(|e| e.parse().ok());
                    }
                }
                None
            })
            .collect()
    }

    /// Cancel and wait for a clean exit. The harness stays alive so the
    /// scratch dir can be inspected afterwards.
    pub async fn stop(&mut self) -> AgentMetrics {
        self.cancel.cancel();
        tokio::time::timeout(SPEC_WAIT_MAX, &mut self.task)
            .await
            .expect("agent did not stop in time")
            .expect("agent task panicked")
            .expect("agent returned fatal error")
    }

    /// Wait for the agent to end on its own (fatal path).
    pub async fn join(&mut self) -> Result<AgentMetrics, ReconcileError> {
        tokio::time::timeout(SPEC_WAIT_MAX, &mut self.task)
            .await
            .expect("agent did not finish in time")
            .expect("agent task panicked")
    }
}
