//! Session lifecycle integration tests.
//!
//! Drive the registry through host, resume, send, end and purge with mock
//! workers, checking that every failure path leaves no artifacts, ports or
//! workers behind.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use bytes::Bytes;
use sc_test_utils::{sample_game_data, sample_save, LaunchBehavior, MockLauncher, TestSessions};
use session_controller::actors::SessionState;
use session_controller::allocation::Token;
use session_controller::artifacts::{ArtifactHandle, ArtifactKind};
use session_controller::errors::ScError;
use session_controller::supervisor::WorkerParams;
use std::collections::HashSet;
use std::time::Duration;
use tokio::task::JoinSet;

/// Wait until the registry reports a provisioning session and return its token.
async fn provisioning_token(sessions: &TestSessions) -> Token {
    for _ in 0..200 {
        let listed = sessions.registry().list().await.unwrap();
        if let Some(info) = listed
            .iter()
            .find(|info| info.state == SessionState::Provisioning)
        {
            return info.token.clone();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no session reached the provisioning state");
}

#[tokio::test]
async fn test_concurrent_hosts_get_distinct_tokens_and_ports() {
    let sessions = TestSessions::spawn(MockLauncher::new(), 46_000).unwrap();

    let mut hosts = JoinSet::new();
    for i in 0..20u8 {
        let registry = sessions.registry().clone();
        hosts.spawn(async move {
            registry
                .host(Bytes::from(vec![b'g', i]), WorkerParams::default())
                .await
        });
    }

    let mut tokens = HashSet::new();
    let mut ports = HashSet::new();
    while let Some(result) = hosts.join_next().await {
        let endpoint = result.unwrap().unwrap();
        assert!(tokens.insert(endpoint.token), "token handed out twice");
        assert!(ports.insert(endpoint.port), "port handed out twice");
    }

    assert_eq!(tokens.len(), 20);
    assert_eq!(sessions.ports().leased_ports(), ports);
    assert_eq!(sessions.store().tokens().await.unwrap().len(), 20);
}

#[tokio::test]
async fn test_end_during_provisioning_cancels_launch() {
    let launcher = MockLauncher::new().with_script([LaunchBehavior::HangOnReady]);
    let sessions = TestSessions::spawn(launcher, 46_050).unwrap();

    let registry = sessions.registry().clone();
    let host = tokio::spawn(async move {
        registry
            .host(sample_game_data(), WorkerParams::default())
            .await
    });

    let token = provisioning_token(&sessions).await;
    sessions.registry().end(token.clone()).await.unwrap();

    assert!(matches!(
        host.await.unwrap(),
        Err(ScError::ConcurrentTeardownConflict(t)) if t == token.as_str()
    ));
    assert!(sessions.store().tokens().await.unwrap().is_empty());
    assert!(sessions.ports().leased_ports().is_empty());
    assert_eq!(sessions.launcher().stop_count(), 1);
    assert!(matches!(
        sessions.registry().get(token).await,
        Err(ScError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn test_send_to_provisioning_session_is_rejected() {
    let launcher = MockLauncher::new().with_script([LaunchBehavior::HangOnReady]);
    let sessions = TestSessions::spawn(launcher, 46_100).unwrap();

    let registry = sessions.registry().clone();
    let _host = tokio::spawn(async move {
        registry
            .host(sample_game_data(), WorkerParams::default())
            .await
    });
    let token = provisioning_token(&sessions).await;

    assert!(matches!(
        sessions
            .registry()
            .send(token.clone(), "/release".to_string())
            .await,
        Err(ScError::SessionNotRunning(_))
    ));
    assert!(matches!(
        sessions
            .registry()
            .resume(token.clone(), WorkerParams::default())
            .await,
        Err(ScError::SessionAlreadyRunning(_))
    ));
    sessions.registry().end(token).await.unwrap();
}

#[tokio::test]
async fn test_failed_host_leaves_nothing_behind() {
    let launcher = MockLauncher::new().with_script([LaunchBehavior::ExitDuringStartup]);
    let sessions = TestSessions::spawn(launcher, 46_150).unwrap();

    let result = sessions
        .registry()
        .host(sample_game_data(), WorkerParams::default())
        .await;

    assert!(matches!(result, Err(ScError::WorkerExited(_))));
    assert!(sessions.store().tokens().await.unwrap().is_empty());
    assert!(sessions.ports().leased_ports().is_empty());
    assert!(sessions.registry().list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_port_in_use_is_retried_on_a_fresh_port() {
    let launcher = MockLauncher::new().with_script([
        LaunchBehavior::PortInUse,
        LaunchBehavior::PortInUse,
        LaunchBehavior::Ready,
    ]);
    let sessions = TestSessions::spawn(launcher, 46_200).unwrap();

    let endpoint = sessions
        .registry()
        .host(sample_game_data(), WorkerParams::default())
        .await
        .unwrap();

    assert_eq!(sessions.launcher().launch_count(), 3);
    assert_eq!(sessions.launcher().specs().len(), 1);
    assert_eq!(sessions.launcher().live_ports(), vec![endpoint.port]);
}

#[tokio::test(start_paused = true)]
async fn test_startup_timeout_releases_everything() {
    let launcher = MockLauncher::new().with_default(LaunchBehavior::HangOnReady);
    let sessions = TestSessions::builder(launcher, 46_250)
        .startup_timeout(Duration::from_secs(15))
        .spawn()
        .unwrap();

    let result = sessions
        .registry()
        .host(sample_game_data(), WorkerParams::default())
        .await;

    assert!(matches!(result, Err(ScError::StartupTimeout)));
    assert_eq!(sessions.launcher().stop_count(), 1);
    assert!(sessions.store().tokens().await.unwrap().is_empty());
    assert!(sessions.ports().leased_ports().is_empty());
}

#[tokio::test]
async fn test_worker_receives_params_and_artifacts() {
    let sessions = TestSessions::spawn(MockLauncher::new(), 46_300).unwrap();
    let params = WorkerParams {
        checkpoint_interval: 3,
        hint_cost: 10,
        allow_cheats: true,
    };

    let endpoint = sessions
        .registry()
        .host(sample_game_data(), params)
        .await
        .unwrap();

    let worker = sessions.launcher().worker(&endpoint.token).unwrap();
    assert_eq!(worker.spec.params, params);
    assert_eq!(worker.spec.port, endpoint.port);
    assert_eq!(
        worker.spec.artifacts.data,
        ArtifactHandle::Inline(sample_game_data())
    );
    assert_eq!(worker.spec.artifacts.save, None);

    sessions
        .registry()
        .send(endpoint.token.clone(), "/send Alice Hookshot".to_string())
        .await
        .unwrap();
    assert_eq!(worker.messages(), vec!["/send Alice Hookshot".to_string()]);
}

#[tokio::test]
async fn test_end_then_resume_requires_artifacts() {
    let sessions = TestSessions::spawn(MockLauncher::new(), 46_350).unwrap();

    let first = sessions
        .registry()
        .host(sample_game_data(), WorkerParams::default())
        .await
        .unwrap();
    let token = first.token.clone();

    sessions.registry().end(token.clone()).await.unwrap();
    assert!(matches!(
        sessions
            .registry()
            .resume(token.clone(), WorkerParams::default())
            .await,
        Err(ScError::ArtifactNotFound(_))
    ));

    // Restore the same artifacts; resume must pick them up.
    sessions
        .store()
        .save(&token, ArtifactKind::Data, sample_game_data())
        .await
        .unwrap();
    sessions
        .store()
        .save(&token, ArtifactKind::Save, sample_save())
        .await
        .unwrap();

    let resumed = sessions
        .registry()
        .resume(token.clone(), WorkerParams::default())
        .await
        .unwrap();
    assert_eq!(resumed.token, token);

    let worker = sessions.launcher().worker(&token).unwrap();
    assert_eq!(
        worker.spec.artifacts.data,
        ArtifactHandle::Inline(sample_game_data())
    );
    assert_eq!(
        worker.spec.artifacts.save,
        Some(ArtifactHandle::Inline(sample_save()))
    );
}

#[tokio::test]
async fn test_resume_unknown_token_fails() {
    let sessions = TestSessions::spawn(MockLauncher::new(), 46_400).unwrap();
    let token = Token::parse("QQQQ").unwrap();

    assert!(matches!(
        sessions
            .registry()
            .resume(token, WorkerParams::default())
            .await,
        Err(ScError::ArtifactNotFound(_))
    ));
    assert_eq!(sessions.launcher().launch_count(), 0);
}

#[tokio::test]
async fn test_crash_is_detected_lazily_and_resumable() {
    let sessions = TestSessions::spawn(MockLauncher::new(), 46_450).unwrap();
    let endpoint = sessions
        .registry()
        .host(sample_game_data(), WorkerParams::default())
        .await
        .unwrap();
    let token = endpoint.token.clone();

    sessions.launcher().crash(&token);

    // An undetected crash still blocks purge.
    assert_eq!(sessions.registry().purge().await.unwrap(), 0);

    let info = sessions.registry().get(token.clone()).await.unwrap();
    assert_eq!(info.state, SessionState::Crashed);
    assert!(matches!(
        sessions.registry().get(token.clone()).await,
        Err(ScError::SessionNotFound(_))
    ));
    assert!(sessions
        .store()
        .exists(&token, ArtifactKind::Data)
        .await
        .unwrap());

    let resumed = sessions
        .registry()
        .resume(token.clone(), WorkerParams::default())
        .await
        .unwrap();
    assert_eq!(resumed.token, token);
}

#[tokio::test]
async fn test_send_to_crashed_worker_reports_handle_closed() {
    let sessions = TestSessions::spawn(MockLauncher::new(), 46_500).unwrap();
    let endpoint = sessions
        .registry()
        .host(sample_game_data(), WorkerParams::default())
        .await
        .unwrap();

    sessions.launcher().crash(&endpoint.token);

    assert!(matches!(
        sessions
            .registry()
            .send(endpoint.token.clone(), "/status".to_string())
            .await,
        Err(ScError::HandleClosed(_))
    ));
    assert!(matches!(
        sessions
            .registry()
            .send(endpoint.token.clone(), "/status".to_string())
            .await,
        Err(ScError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn test_purge_is_idempotent_and_spares_live_sessions() {
    let sessions = TestSessions::spawn(MockLauncher::new(), 46_550).unwrap();

    let live = sessions
        .registry()
        .host(sample_game_data(), WorkerParams::default())
        .await
        .unwrap();
    for raw in ["ABCD", "WXYZ", "MNOP"] {
        let token = Token::parse(raw).unwrap();
        sessions
            .store()
            .save(&token, ArtifactKind::Data, sample_game_data())
            .await
            .unwrap();
    }
    sessions
        .store()
        .save(&Token::parse("MNOP").unwrap(), ArtifactKind::Save, sample_save())
        .await
        .unwrap();

    assert_eq!(sessions.registry().purge().await.unwrap(), 3);
    assert_eq!(sessions.registry().purge().await.unwrap(), 0);

    let remaining = sessions.store().tokens().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert!(remaining.contains(&live.token));
}

#[tokio::test(start_paused = true)]
async fn test_expired_session_keeps_artifacts() {
    let sessions = TestSessions::builder(MockLauncher::new(), 46_600)
        .session_max_age(Duration::from_secs(8 * 60 * 60), Duration::from_secs(60))
        .spawn()
        .unwrap();

    let endpoint = sessions
        .registry()
        .host(sample_game_data(), WorkerParams::default())
        .await
        .unwrap();
    let token = endpoint.token.clone();

    tokio::time::sleep(Duration::from_secs(8 * 60 * 60 + 120)).await;

    assert!(matches!(
        sessions.registry().get(token.clone()).await,
        Err(ScError::SessionNotFound(_))
    ));
    assert!(sessions
        .launcher()
        .worker(&token)
        .unwrap()
        .was_stopped());
    assert!(sessions
        .store()
        .exists(&token, ArtifactKind::Data)
        .await
        .unwrap());
    assert!(sessions.ports().leased_ports().is_empty());
}

#[tokio::test]
async fn test_shutdown_stops_workers_and_keeps_artifacts() {
    let sessions = TestSessions::spawn(MockLauncher::new(), 46_650).unwrap();
    let launcher = sessions.launcher().clone();
    let store = std::sync::Arc::clone(sessions.store());

    for _ in 0..3 {
        sessions
            .registry()
            .host(sample_game_data(), WorkerParams::default())
            .await
            .unwrap();
    }

    sessions.shutdown().await.unwrap();

    assert_eq!(launcher.stop_count(), 3);
    assert!(launcher.live_ports().is_empty());
    assert_eq!(store.tokens().await.unwrap().len(), 3);
}
