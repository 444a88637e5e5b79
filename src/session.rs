use std::io::{self, Read};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::warn;

use crate::adapter;
use crate::config::RuntimeConfig;
use crate::decision;
use crate::dev;
use crate::history::{self, HistoryStore};
use crate::launch;
use crate::preferences::UserPreferences;
use crate::server::{self, AppState};
use crate::update::UpdateChecker;

/// Run one plan review session end to end: parse the host's request, serve
/// the review UI, block on the reviewer's decision, emit it, and keep the
/// process alive briefly so the UI can finish its last requests.
///
/// Returns the process exit code.
pub async fn run_review_session(config: &RuntimeConfig) -> Result<i32> {
    let stdin_text = if config.dev_mode {
        String::new()
    } else {
        read_stdin().context("reading stdin")?
    };

    let kind = adapter::select_adapter(config, adapter::classify(&stdin_text));
    let request = match adapter::parse_request(kind, &stdin_text, config) {
        Ok(request) => request,
        Err(failure) => {
            if let Some(message) = &failure.stderr {
                eprint!("{message}");
            }
            if let Some(line) = &failure.stdout {
                decision::emit_decision_line(line).context("writing decision")?;
            }
            return Ok(failure.exit_code);
        }
    };

    // ---------------------------------------------------------------
    // Session state: prior versions plus the recorded current one
    // ---------------------------------------------------------------

    let (store, plan_history, plan_version) = if config.dev_mode {
        (None, vec![dev::DEV_PLAN_PREVIOUS.to_string()], 2)
    } else {
        let key = history::resolve_history_key(&request.history_key_source);
        let store = HistoryStore::open(&config.history_root, &key);
        let loaded = store.load();
        if let Err(err) = store.append(loaded.next_version, &request.plan_content) {
            warn!("failed to record plan v{}: {err}", loaded.next_version);
        }
        (Some(store), loaded.prior_versions, loaded.next_version)
    };

    let preferences = UserPreferences::load(&config.preferences_path);

    // ---------------------------------------------------------------
    // Review surface
    // ---------------------------------------------------------------

    let (controller, decision_rx) = decision::channel();
    let state = Arc::new(AppState::new(
        request.plan_content.clone(),
        plan_version,
        plan_history,
        preferences,
        config.preferences_path.clone(),
        controller,
    ));

    let server = server::start(state.clone(), config.port()).await?;
    let url = format!("http://localhost:{}", server.port);
    // Readiness line; external tooling matches on it.
    eprintln!("open-plan-annotator: UI available at {url}");

    if !config.dev_mode {
        launch::open_browser(&url);
    }

    // Background update check; the result lands in shared state for the UI.
    match UpdateChecker::new(config) {
        Ok(checker) => {
            let update_state = state.clone();
            tokio::spawn(async move {
                let info = checker.check_for_update().await;
                update_state.set_update_info(info).await;
            });
        }
        Err(err) => warn!("update check unavailable: {err:#}"),
    }

    // ---------------------------------------------------------------
    // Decision and shutdown
    // ---------------------------------------------------------------

    let verdict = decision_rx.await.context("waiting for review decision")?;

    if let Some(store) = &store {
        store.cleanup(verdict.approved);
    }

    let line = adapter::format_decision(kind, &verdict);
    decision::emit_decision_line(&line).context("writing decision")?;

    // Keep serving briefly: the UI's final settings writes and the page
    // itself may still be in flight.
    tokio::time::sleep(config.shutdown_delay).await;
    server.stop().await;
    Ok(0)
}

fn read_stdin() -> Result<String> {
    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer)?;
    Ok(buffer)
}
