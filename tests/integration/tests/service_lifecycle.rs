//! Child-process service driven through the controller while the poller
//! watches it. A shell script stands in for the native client.
#![cfg(unix)]

use core_lifecycle::{
    spawn_state_poller, BackgroundState, ChannelObserver, ChildProcessService, PollerConfig, ServiceConfig,
    ServiceController,
};
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

async fn wait_for(rx: &mut mpsc::UnboundedReceiver<BackgroundState>, want: BackgroundState) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(s) = rx.recv().await {
            if s == want {
                return;
            }
        }
        panic!("poller stopped before reporting {want}");
    })
    .await
    .unwrap_or_else(|_| panic!("no {want} within 10s"));
}

#[tokio::test(flavor = "multi_thread")]
async fn poller_follows_startup_restart_and_stop() {
    let repo = tempfile::tempdir().unwrap();
    // something must answer the liveness probe for the service to read as running
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let config = ServiceConfig {
        program: "sh".into(),
        extra_args: vec!["-c".into(), "exec sleep 30".into()],
        repo_dir: repo.path().join("repo"),
        listen_on_tcp: listener.local_addr().unwrap().to_string(),
        ..ServiceConfig::default()
    };
    let service = Arc::new(ChildProcessService::new(config));
    let controller = ServiceController::new(service.clone());

    let (tx, mut states) = mpsc::unbounded_channel();
    let poller = spawn_state_poller(
        service.clone(),
        Arc::new(ChannelObserver(tx)),
        PollerConfig { interval: Duration::from_millis(50), sample_timeout: Duration::from_secs(2) },
    );

    wait_for(&mut states, BackgroundState::Created).await;
    controller.startup().await.unwrap();
    wait_for(&mut states, BackgroundState::Running).await;
    assert!(repo.path().join("repo").is_dir());

    controller.spawn_restart().await.unwrap().unwrap();
    assert_eq!(controller.state().await.unwrap(), BackgroundState::Running);

    controller.stop().await.unwrap();
    wait_for(&mut states, BackgroundState::Stopped).await;
    assert_eq!(poller.latest(), BackgroundState::Stopped);
    assert!(poller.shutdown().await >= 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn crashing_service_reads_degraded() {
    let repo = tempfile::tempdir().unwrap();
    let config = ServiceConfig {
        program: "sh".into(),
        extra_args: vec!["-c".into(), "exit 7".into()],
        repo_dir: repo.path().to_path_buf(),
        listen_on_tcp: "127.0.0.1:9".into(),
        ..ServiceConfig::default()
    };
    let service = Arc::new(ChildProcessService::new(config));
    let controller = ServiceController::new(service.clone());
    let (tx, mut states) = mpsc::unbounded_channel();
    let poller = spawn_state_poller(
        service,
        Arc::new(ChannelObserver(tx)),
        PollerConfig { interval: Duration::from_millis(50), sample_timeout: Duration::from_secs(2) },
    );

    controller.start().await.unwrap();
    wait_for(&mut states, BackgroundState::Degraded).await;
    poller.shutdown().await;
}
