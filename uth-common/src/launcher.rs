//! Launching the client under test.
//!
//! The update client is an external, opaque executable. The harness only
//! assembles its named arguments, spawns it, and waits for the exit status;
//! exit code 0 is the sole success signal. Spawn failures and nonzero exits
//! resolve to a launch failure, never an error past the orchestrator.

use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::ScenarioConfig;

/// Fail-safe ceiling on one client run; the client owns its own timeouts,
/// this only guards the harness against a hung process.
const SCENARIO_FAILSAFE: Duration = Duration::from_secs(600);

/// Assemble the client's argument list for one scenario.
pub fn updater_args(cfg: &ScenarioConfig, base_url: &str, wait_pids: &[u32]) -> Vec<String> {
    let initial = cfg.dirs.initial.display().to_string();
    let mut args = vec![
        "--base-url".to_string(),
        base_url.to_string(),
        "--version".to_string(),
        cfg.version.clone(),
        "--exec".to_string(),
        cfg.client.updater.display().to_string(),
        "--cwd".to_string(),
        initial.clone(),
        "--interactive".to_string(),
        if cfg.client.interactive { "1" } else { "0" }.to_string(),
        "--app-dir".to_string(),
        initial,
    ];
    if cfg.client.force_temp {
        args.push("--force-temp".to_string());
    }
    for pid in wait_pids {
        args.push("-p".to_string());
        args.push(pid.to_string());
    }
    args
}

/// Spawn the client and wait for it to finish.
///
/// Returns true only for a clean zero exit within the fail-safe window.
pub async fn launch_client(cfg: &ScenarioConfig, base_url: &str, wait_pids: &[u32]) -> bool {
    let args = updater_args(cfg, base_url, wait_pids);
    if cfg.client.more_log_output {
        info!(updater = %cfg.client.updater.display(), ?args, "launching client");
    }

    let mut command = Command::new(&cfg.client.updater);
    command.args(&args);
    if let Some(dir) = cfg.client.updater.parent().filter(|p| !p.as_os_str().is_empty()) {
        command.current_dir(dir);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(updater = %cfg.client.updater.display(), error = %e, "client spawn failed");
            return false;
        }
    };

    match tokio::time::timeout(SCENARIO_FAILSAFE, child.wait()).await {
        Ok(Ok(status)) => {
            debug!(%status, "client exited");
            status.success()
        }
        Ok(Err(e)) => {
            warn!(error = %e, "failed waiting for client exit");
            false
        }
        Err(_) => {
            warn!(timeout = ?SCENARIO_FAILSAFE, "client exceeded fail-safe timeout, killing");
            let _ = child.kill().await;
            false
        }
    }
}
