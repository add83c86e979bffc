use std::{net::SocketAddr, path::Path, time::Duration};

use qfieldsync_client::{
    ClientConfig, CloudClient, TransferError, TransferEvent, transfer::ProjectTransferrer,
};
use qfieldsync_cloud::{AppState, build_router};
use qfieldsync_core::{
    CloudProject, CoreError, DownloadPolicy, ProjectPayload, TransferPhase, TransferState,
};
use tokio::{net::TcpListener, sync::oneshot};
use url::Url;

async fn start_cloud() -> (SocketAddr, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral cloud socket");
    let address = listener.local_addr().expect("cloud local addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let state = AppState::with_users([("ada", "secret")]);
    let server = axum::serve(listener, build_router(state)).with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });
    tokio::spawn(async move {
        let _ = server.await;
    });
    (address, shutdown_tx)
}

async fn client_with_project(address: SocketAddr, local_dir: &Path) -> (CloudClient, CloudProject) {
    let client = CloudClient::new(&ClientConfig {
        server_url: Url::parse(&format!("http://{address}")).expect("server url"),
        request_timeout: Duration::from_secs(5),
        config_dir: local_dir.to_owned(),
    })
    .expect("build client");
    let login = client.login("ada", "secret").await.expect("login");
    client.set_token(Some(&login.token));

    let mut project = client
        .create_project(&ProjectPayload {
            name: "Hedges".to_owned(),
            owner: "ada".to_owned(),
            description: String::new(),
            is_private: true,
        })
        .await
        .expect("create project");
    project.local_dir = Some(local_dir.to_owned());
    (client, project)
}

#[tokio::test]
async fn abort_when_idle_is_safe() {
    let (address, shutdown_tx) = start_cloud().await;
    let dir = tempfile::tempdir().expect("create tempdir");
    let (client, project) = client_with_project(address, dir.path()).await;

    let (mut transferrer, mut events) =
        ProjectTransferrer::new(client, &project, DownloadPolicy::MissingOnly).expect("new");
    assert_eq!(transferrer.state(), TransferState::Idle);

    transferrer.abort_requests();
    transferrer.abort_requests();
    assert_eq!(transferrer.state(), TransferState::Aborted);
    assert!(events.try_recv().is_err());

    let err = transferrer.upload(true).expect_err("aborted transferrer");
    assert!(matches!(err, TransferError::Core(CoreError::InvalidTransition { .. })));

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn no_completion_is_delivered_after_abort() {
    let (address, shutdown_tx) = start_cloud().await;
    let dir = tempfile::tempdir().expect("create tempdir");
    std::fs::write(dir.path().join("hedges.qgs"), "<qgis/>").expect("write project");
    let (client, project) = client_with_project(address, dir.path()).await;

    let (mut transferrer, mut events) =
        ProjectTransferrer::new(client.clone(), &project, DownloadPolicy::MissingOnly)
            .expect("new");
    transferrer.upload(true).expect("start upload");
    transferrer.abort_requests();
    assert_eq!(transferrer.state(), TransferState::Aborted);

    tokio::time::sleep(Duration::from_millis(200)).await;
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, TransferEvent::Finished { .. }),
            "completion after abort: {event:?}"
        );
    }

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn passes_follow_the_state_machine() {
    let (address, shutdown_tx) = start_cloud().await;
    let dir = tempfile::tempdir().expect("create tempdir");
    std::fs::write(dir.path().join("hedges.qgs"), "<qgis/>").expect("write project");
    let (client, project) = client_with_project(address, dir.path()).await;

    let (mut transferrer, mut events) =
        ProjectTransferrer::new(client, &project, DownloadPolicy::MissingOnly).expect("new");
    transferrer.upload(true).expect("start upload");

    let err = transferrer.upload(true).expect_err("second upload");
    assert!(matches!(err, TransferError::Core(CoreError::InvalidTransition { .. })));
    let err = transferrer.download().expect_err("download during upload");
    assert!(matches!(err, TransferError::Core(CoreError::InvalidTransition { .. })));

    loop {
        match events.recv().await.expect("upload events") {
            TransferEvent::Progress {
                phase, index, total, ..
            } => {
                assert_eq!(phase, TransferPhase::Upload);
                assert_eq!((index, total), (0, 1));
            }
            TransferEvent::Finished { phase, result } => {
                assert_eq!(phase, TransferPhase::Upload);
                assert_eq!(result.expect("upload ok").files, 1);
                break;
            }
        }
    }
    assert_eq!(transferrer.state(), TransferState::UploadComplete);

    transferrer.download().expect("start download");
    match events.recv().await.expect("download events") {
        TransferEvent::Finished { phase, result } => {
            assert_eq!(phase, TransferPhase::Download);
            let summary = result.expect("download ok");
            assert_eq!(summary.files, 0);
            assert_eq!(summary.skipped, 1);
        }
        other => panic!("nothing to download, got {other:?}"),
    }
    assert_eq!(transferrer.state(), TransferState::Complete);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn project_without_local_dir_cannot_transfer() {
    let (address, shutdown_tx) = start_cloud().await;
    let dir = tempfile::tempdir().expect("create tempdir");
    let (client, mut project) = client_with_project(address, dir.path()).await;
    project.local_dir = None;

    let err = ProjectTransferrer::new(client, &project, DownloadPolicy::OverwriteChanged)
        .expect_err("no local dir");
    assert!(matches!(err, TransferError::NoLocalDir(id) if id == project.id));

    let _ = shutdown_tx.send(());
}
