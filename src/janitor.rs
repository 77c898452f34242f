//! Periodic sweep for idle sessions, expired stored files, and expired
//! admin tokens. Runs every 5 minutes.

use std::time::Duration as StdDuration;

use chrono::Utc;

use crate::state::AppState;

const SWEEP_INTERVAL: StdDuration = StdDuration::from_secs(5 * 60);

pub async fn run(state: AppState) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        ticker.tick().await;
        sweep_once(&state).await;
    }
}

async fn sweep_once(state: &AppState) {
    let timeout_ms = state.config.snapshot().await.security.session_timeout_ms;
    let timeout = chrono::Duration::milliseconds(timeout_ms as i64);

    let idle_codes = state.sessions.idle_timed_out(timeout).await;
    for code in &idle_codes {
        state.sessions.remove(code).await;
    }
    if !idle_codes.is_empty() {
        tracing::info!(count = idle_codes.len(), "janitor removed idle sessions");
    }

    let expired_files = state.storage.expired_timer_codes(Utc::now()).await;
    for code in &expired_files {
        if let Err(e) = state.storage.remove(code).await {
            tracing::warn!(code = %code, error = %e, "janitor failed to remove expired stored file");
        }
    }
    if !expired_files.is_empty() {
        tracing::info!(count = expired_files.len(), "janitor removed expired stored files");
    }

    state.admin_tokens.sweep_expired().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sweep_removes_idle_session_past_timeout() {
        let state = AppState::new_for_test().await;
        state
            .config
            .mutate(|cfg| cfg.security.session_timeout_ms = 0)
            .await
            .unwrap();

        let code = state
            .sessions
            .create(
                crate::session::Mode::Memory,
                "a.bin".into(),
                10,
                "sender01".into(),
                &state.storage,
            )
            .await;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        sweep_once(&state).await;
        assert!(!state.sessions.contains(&code).await);
    }
}
