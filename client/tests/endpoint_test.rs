//! End-to-end replication between two notebooks through the reference
//! sync server over HTTP.

use std::net::SocketAddr;
use std::time::Duration;
use tideline_client::{
    Direction, FailureCause, Notebook, ReplicationOptions, ReplicationState, SyncConfig,
};
use tideline_server::{AppState, Config};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};

async fn spawn_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState::in_memory(Config::with_credentials("alice", "secret"));
    tokio::spawn(tideline_server::serve(listener, state));
    addr
}

fn sync_config(addr: SocketAddr, password: &str, options: ReplicationOptions) -> SyncConfig {
    SyncConfig::new(&format!("http://{addr}"), "alice", password)
        .unwrap()
        .with_options(options)
}

fn fast_polling() -> ReplicationOptions {
    ReplicationOptions {
        poll_interval: Duration::from_millis(50),
        ..ReplicationOptions::default()
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(Duration::from_secs(10), async {
        while !check() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition never held");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_note_travels_between_devices() {
    let addr = spawn_server().await;
    let laptop = Notebook::in_memory().unwrap();
    let phone = Notebook::in_memory().unwrap();

    laptop
        .start_sync(sync_config(addr, "secret", fast_polling()))
        .await
        .unwrap();
    phone
        .start_sync(sync_config(addr, "secret", fast_polling()))
        .await
        .unwrap();

    let id = laptop.create("Shopping", "milk").unwrap();
    eventually(|| phone.get(&id).is_ok()).await;
    assert_eq!(phone.get(&id).unwrap().content, "milk");

    phone.update(&id, "Shopping", "milk, bread").unwrap();
    eventually(|| laptop.get(&id).is_ok_and(|n| n.content == "milk, bread")).await;

    laptop.delete(&id).unwrap();
    eventually(|| phone.get(&id).is_err()).await;

    let mut phone_notes = phone.notes(Direction::Ascending, None).unwrap();
    assert!(phone_notes.next().await.unwrap().is_empty());

    laptop.stop_sync().await;
    phone.stop_sync().await;
    laptop.shutdown().await;
    phone.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bad_password_is_an_auth_failure() {
    let addr = spawn_server().await;
    let notebook = Notebook::in_memory().unwrap();

    let options = ReplicationOptions {
        max_attempts: 1,
        ..fast_polling()
    };
    let mut status = notebook.watch_sync_status();
    notebook
        .start_sync(sync_config(addr, "guess", options))
        .await
        .unwrap();

    let failed = timeout(
        Duration::from_secs(10),
        status.wait_for(|s| s.state == ReplicationState::PermanentlyFailed),
    )
    .await
    .expect("never gave up")
    .unwrap()
    .clone();
    assert_eq!(
        failed.last_error.map(|e| e.cause),
        Some(FailureCause::Auth)
    );

    notebook.stop_sync().await;
    notebook.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_resumes_from_checkpoint_after_reopen() {
    let addr = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();
    let writer = Notebook::in_memory().unwrap();
    writer
        .start_sync(sync_config(addr, "secret", fast_polling()))
        .await
        .unwrap();

    let first = writer.create("First", "1").unwrap();
    {
        let reader = Notebook::open(dir.path()).unwrap();
        reader
            .start_sync(sync_config(addr, "secret", fast_polling()))
            .await
            .unwrap();
        eventually(|| reader.get(&first).is_ok()).await;
        reader.stop_sync().await;
        reader.shutdown().await;
    }

    let second = writer.create("Second", "2").unwrap();
    let reader = Notebook::open(dir.path()).unwrap();
    assert!(reader.get(&first).is_ok());
    reader
        .start_sync(sync_config(addr, "secret", fast_polling()))
        .await
        .unwrap();
    eventually(|| reader.get(&second).is_ok()).await;

    writer.stop_sync().await;
    reader.stop_sync().await;
    writer.shutdown().await;
    reader.shutdown().await;
}
