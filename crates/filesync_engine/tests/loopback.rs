//! End-to-end tests wiring the HTTP transport to an in-process server.

use chrono::{TimeZone, Utc};
use filesync_engine::{
    FixedPolicy, HttpResponse, HttpTransport, LocalOnlyChoice, LoginTokenProvider, LoopbackClient,
    LoopbackServer, RunningSync, SyncClient, SyncConfig, SyncError, SyncTransport,
};
use filesync_protocol::{AuthRequest, ChangeEvent, Method, Timestamp};
use filesync_server::{AuthConfig, FileSyncServer, MemoryStore, TokenService};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

struct InProcess(Arc<FileSyncServer>);

impl LoopbackServer for InProcess {
    fn handle(
        &self,
        method: Method,
        path: &str,
        bearer: Option<&str>,
        body: &[u8],
    ) -> HttpResponse {
        let response = self.0.handle(method, path, bearer, body);
        HttpResponse::new(response.status, response.body)
    }

    fn subscribe(&self, bearer: Option<&str>) -> Result<Receiver<ChangeEvent>, HttpResponse> {
        self.0
            .subscribe(bearer)
            .map_err(|e| HttpResponse::new(e.status_code(), e.to_string().into_bytes()))
    }
}

type Transport = HttpTransport<LoopbackClient<InProcess>, LoginTokenProvider<LoopbackClient<InProcess>>>;

fn server(users: &[(&str, &str)]) -> Arc<FileSyncServer> {
    let users: BTreeMap<String, String> = users
        .iter()
        .map(|(u, p)| (u.to_string(), p.to_string()))
        .collect();
    let tokens = TokenService::new(AuthConfig::new(b"integration-secret".to_vec()).with_users(users));
    Arc::new(FileSyncServer::with_store(Arc::new(MemoryStore::new()), tokens))
}

fn transport(server: &Arc<FileSyncServer>, user: &str, password: &str) -> Arc<Transport> {
    let client = Arc::new(LoopbackClient::new(InProcess(server.clone())));
    let tokens = LoginTokenProvider::new(
        "http://localhost:5000",
        client.clone(),
        AuthRequest::new(user, password),
    );
    Arc::new(HttpTransport::new("http://localhost:5000", client, tokens))
}

fn start(server: &Arc<FileSyncServer>, root: &Path) -> (RunningSync, Arc<Transport>) {
    let transport = transport(server, "alice", "pw");
    let config = SyncConfig::new(root)
        .with_debounce(Duration::from_millis(50))
        .with_poll_interval(Duration::from_millis(10));
    let running = SyncClient::new(config, transport.clone(), transport.clone())
        .start(&mut FixedPolicy(LocalOnlyChoice::PushAll))
        .unwrap();
    (running, transport)
}

fn ts(secs: i64) -> Timestamp {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn startup_reconciliation_over_http() {
    let server = server(&[]);
    server
        .store()
        .write("shared/remote.txt", ts(1_000), false, Some(b"from server"))
        .unwrap();

    let dir = tempdir().unwrap();
    fs::write(dir.path().join("local.txt"), b"from client").unwrap();

    let (running, transport) = start(&server, dir.path());
    let report = running.reconcile_report();
    assert_eq!(report.pushed, 1);
    assert_eq!(report.pulled, 2);

    assert_eq!(
        fs::read(dir.path().join("shared").join("remote.txt")).unwrap(),
        b"from server"
    );
    assert_eq!(server.store().read("local.txt").unwrap(), b"from client");
    assert_eq!(transport.get_content("local.txt").unwrap(), b"from client");
    running.shutdown();
}

#[test]
fn local_change_reaches_second_client() {
    let server = server(&[("alice", "pw")]);
    let dir_a = tempdir().unwrap();
    let dir_b = tempdir().unwrap();

    let (a, _) = start(&server, dir_a.path());
    let (b, _) = start(&server, dir_b.path());
    wait_for("both subscriptions", || server.subscriber_count() == 2);

    fs::write(a.root().join("note.txt"), b"hello from a").unwrap();

    let target = b.root().join("note.txt");
    wait_for("file on second client", || {
        fs::read(&target).map(|c| c == b"hello from a").unwrap_or(false)
    });
    assert_eq!(server.store().read("note.txt").unwrap(), b"hello from a");
    // the second client re-sends what it just wrote; let that echo settle
    wait_for("second client echo", || b.dispatcher().stats().sent() >= 1);

    fs::remove_file(a.root().join("note.txt")).unwrap();
    wait_for("delete on second client", || !target.exists());

    a.shutdown();
    b.shutdown();
}

#[test]
fn own_notifications_are_absorbed() {
    let server = server(&[]);
    let dir = tempdir().unwrap();
    let (running, _) = start(&server, dir.path());
    wait_for("subscription", || server.subscriber_count() == 1);

    fs::write(running.root().join("mine.txt"), b"v1").unwrap();
    wait_for("echo", || running.applier().stats().skipped() >= 1);

    assert_eq!(running.applier().stats().applied(), 0);
    assert_eq!(fs::read(running.root().join("mine.txt")).unwrap(), b"v1");
    running.shutdown();
}

#[test]
fn refused_credentials_abort_startup() {
    let server = server(&[("alice", "pw")]);
    let dir = tempdir().unwrap();
    let transport = transport(&server, "alice", "wrong");

    let result = SyncClient::new(SyncConfig::new(dir.path()), transport.clone(), transport)
        .start(&mut FixedPolicy::default());
    assert!(matches!(result, Err(SyncError::AccessDenied(_))));
}
