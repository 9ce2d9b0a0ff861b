use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;

use vaultpush_core::{
    registry,
    types::{Vault, VaultName},
};
use vaultpush_sync::{
    pipeline::{self, PushOptions, PushOutcome, PushScope, RemoteFactory, VaultPushResult},
    DiskVault, LogNotifier,
};

use crate::error::{io_err, DaemonError};
use crate::paths::{socket_path, vaultpush_root, vaults_root, DEBOUNCE_WINDOW};
use crate::protocol::{
    DaemonStatus, PushRecord, PushSummary, Reply, Request, VaultSummary, WatchedVaultStatus,
};

pub type RegistryCache = HashMap<VaultName, Vault>;

/// Last push attempt per vault, keyed by vault name.
pub type PushRecords = HashMap<String, PushRecord>;

type SharedCache = Arc<RwLock<RegistryCache>>;
type SharedRecords = Arc<RwLock<PushRecords>>;

static NOTIFIER: LogNotifier = LogNotifier;

#[derive(Debug, Clone)]
enum PushTarget {
    All,
    Vault(String),
}

impl PushTarget {
    fn scope(&self) -> PushScope {
        match self {
            PushTarget::All => PushScope::All,
            PushTarget::Vault(name) => PushScope::Vault(name.clone()),
        }
    }

    fn label(&self) -> String {
        match self {
            PushTarget::All => "all".to_string(),
            PushTarget::Vault(name) => name.clone(),
        }
    }
}

struct PushJob {
    target: PushTarget,
    source: &'static str,
    respond_to: oneshot::Sender<Result<PushSummary, String>>,
}

/// Start the daemon against GitHub and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon, pushing to GitHub.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    run_with_factory(home, Arc::new(vaultpush_github::connect)).await
}

/// Run the daemon with remotes built by `factory`.
pub async fn run_with_factory<F>(home: PathBuf, factory: Arc<F>) -> Result<(), DaemonError>
where
    F: RemoteFactory + 'static,
{
    ensure_runtime_dirs(&home)?;

    let cache: SharedCache = Arc::new(RwLock::new(load_registry_cache(&home)?));
    let records: SharedRecords = Arc::new(RwLock::new(HashMap::new()));
    let started_at_unix = unix_seconds_now();

    let (push_tx, push_rx) = mpsc::channel::<PushJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let cache = cache.clone();
        let push_tx = push_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = watcher_task(home, cache, push_tx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let cache = cache.clone();
        let records = records.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result =
                push_processor_task(home, factory, cache, records, push_rx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let cache = cache.clone();
        let records = records.clone();
        let push_tx = push_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                cache,
                records,
                push_tx,
                shutdown.clone(),
                shutdown_rx,
                started_at_unix,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let vault_count = cache.read().await.len();
    tracing::info!(
        home = %home.display(),
        vaults = vault_count,
        "vaultpush daemon started",
    );

    let (watcher_result, processor_result, socket_result, signal_result) =
        tokio::join!(watcher_handle, processor_handle, socket_handle, signal_handle);

    handle_join("watcher", watcher_result)?;
    handle_join("push_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Watcher
// ---------------------------------------------------------------------------

/// A vault root under watch.
#[derive(Debug)]
struct WatchedVault {
    name: String,
    root: PathBuf,
    store: DiskVault,
}

/// Trailing per-vault debounce: a vault is due once no event arrived for it
/// during the window.
#[derive(Debug)]
struct Debouncer {
    window: Duration,
    deadlines: HashMap<String, Instant>,
}

impl Debouncer {
    fn new(window: Duration) -> Self {
        Self {
            window,
            deadlines: HashMap::new(),
        }
    }

    fn record(&mut self, vault: &str, now: Instant) {
        self.deadlines.insert(vault.to_string(), now + self.window);
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    fn take_due(&mut self, now: Instant) -> Vec<String> {
        let mut due: Vec<String> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(vault, _)| vault.clone())
            .collect();
        due.sort();
        for vault in &due {
            self.deadlines.remove(vault);
        }
        due
    }
}

async fn watcher_task(
    home: PathBuf,
    cache: SharedCache,
    push_tx: mpsc::Sender<PushJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let registry_dir = registry::vaults_dir_at(&home)?;
    // Events arrive with resolved paths (e.g. /private/var on macOS).
    let registry_dir = fs::canonicalize(&registry_dir).unwrap_or(registry_dir);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(&registry_dir, RecursiveMode::NonRecursive)?;

    let mut watched = Vec::new();
    {
        let cache = cache.read().await;
        sync_watched_vaults(&mut watcher, &mut watched, &cache);
    }

    let mut debounce = Debouncer::new(DEBOUNCE_WINDOW);

    loop {
        let deadline = debounce.next_deadline();
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = wait_until(deadline) => {
                for vault in debounce.take_due(Instant::now()) {
                    spawn_watcher_push(push_tx.clone(), vault);
                }
            }
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }

                let mut registry_changed = false;
                for path in &event.paths {
                    if is_registry_yaml(path, &registry_dir) {
                        registry_changed = true;
                    } else if let Some(vault) = vault_for_path(&watched, path) {
                        tracing::debug!(vault = %vault, path = %path.display(), "vault file changed");
                        debounce.record(vault, Instant::now());
                    }
                }

                if registry_changed {
                    if let Err(err) = refresh_cache(home.clone(), cache.clone()).await {
                        tracing::warn!(error = %err, "registry reload failed");
                        continue;
                    }
                    let cache = cache.read().await;
                    sync_watched_vaults(&mut watcher, &mut watched, &cache);
                }
            }
        }
    }

    Ok(())
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

fn spawn_watcher_push(push_tx: mpsc::Sender<PushJob>, vault: String) {
    tokio::spawn(async move {
        match enqueue_push(&push_tx, PushTarget::Vault(vault.clone()), "watcher").await {
            Ok(summary) => {
                for entry in &summary.vaults {
                    tracing::info!(
                        vault = %entry.vault,
                        outcome = %entry.outcome,
                        changes = entry.changes,
                        duration_ms = summary.duration_ms,
                        "watcher-triggered push finished",
                    );
                }
            }
            Err(err) => {
                tracing::error!(vault = %vault, error = %err, "watcher-triggered push failed");
            }
        }
    });
}

/// Bring the set of watched vault roots in line with the registry.
fn sync_watched_vaults(
    watcher: &mut RecommendedWatcher,
    watched: &mut Vec<WatchedVault>,
    cache: &RegistryCache,
) {
    let mut desired: Vec<WatchedVault> = Vec::with_capacity(cache.len());
    for vault in cache.values() {
        let root = match fs::canonicalize(&vault.path) {
            Ok(root) => root,
            Err(err) => {
                tracing::warn!(
                    vault = %vault.name,
                    path = %vault.path.display(),
                    error = %err,
                    "vault root unavailable, not watching",
                );
                continue;
            }
        };
        desired.push(WatchedVault {
            name: vault.name.0.clone(),
            store: DiskVault::new(&root).with_exclude(vault.exclude.clone()),
            root,
        });
    }

    for old in watched.iter() {
        if !desired.iter().any(|new| new.root == old.root) {
            if let Err(err) = watcher.unwatch(&old.root) {
                tracing::warn!(path = %old.root.display(), error = %err, "unwatch failed");
            }
        }
    }

    let mut kept = Vec::with_capacity(desired.len());
    for new in desired {
        let already = watched.iter().any(|old| old.root == new.root);
        if !already {
            if let Err(err) = watcher.watch(&new.root, RecursiveMode::Recursive) {
                tracing::warn!(vault = %new.name, error = %err, "watch failed");
                continue;
            }
            tracing::info!(vault = %new.name, path = %new.root.display(), "watching vault");
        }
        kept.push(new);
    }
    *watched = kept;
}

/// Name of the vault whose tracked files include `path`. The innermost root
/// wins when vault roots nest.
fn vault_for_path<'a>(watched: &'a [WatchedVault], path: &Path) -> Option<&'a str> {
    let owner = watched
        .iter()
        .filter(|vault| path.starts_with(&vault.root))
        .max_by_key(|vault| vault.root.components().count())?;

    let rel = path.strip_prefix(&owner.root).ok()?;
    let rel = rel
        .components()
        .map(|component| component.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?
        .join("/");
    if rel.is_empty() || owner.store.is_ignored(&rel) {
        return None;
    }
    Some(&owner.name)
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

fn is_registry_yaml(path: &Path, registry_dir: &Path) -> bool {
    path.parent() == Some(registry_dir)
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("yaml"))
            .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

async fn push_processor_task<F>(
    home: PathBuf,
    factory: Arc<F>,
    cache: SharedCache,
    records: SharedRecords,
    mut push_rx: mpsc::Receiver<PushJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError>
where
    F: RemoteFactory + 'static,
{
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = push_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let started = Instant::now();

                let vaults = match pipeline::resolve_scope(&home, &job.target.scope()) {
                    Ok(vaults) => vaults,
                    Err(err) => {
                        let _ = job.respond_to.send(Err(err.to_string()));
                        continue;
                    }
                };

                let mut entries = Vec::with_capacity(vaults.len());
                for vault in &vaults {
                    let attempted_at = unix_seconds_now();
                    let result = pipeline::push_registered(
                        &home,
                        vault,
                        &PushOptions::default(),
                        factory.as_ref(),
                        &NOTIFIER,
                    )
                    .await;

                    let entry = match result {
                        Ok(result) => summarize(&result),
                        Err(err) => {
                            tracing::error!(vault = %vault.name, error = %err, "push failed");
                            VaultSummary {
                                vault: vault.name.0.clone(),
                                outcome: "error".to_string(),
                                changes: 0,
                                commit: None,
                                error: Some(err.to_string()),
                            }
                        }
                    };
                    record_attempt(&mut *records.write().await, &entry, attempted_at);
                    entries.push(entry);
                }

                if let Err(err) = refresh_cache(home.clone(), cache.clone()).await {
                    tracing::warn!(error = %err, "registry reload after push failed");
                }

                let _ = job.respond_to.send(Ok(PushSummary {
                    target: job.target.label(),
                    source: job.source.to_string(),
                    vaults: entries,
                    duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                }));
            }
        }
    }

    Ok(())
}

fn summarize(result: &VaultPushResult) -> VaultSummary {
    let (changes, commit) = match &result.outcome {
        PushOutcome::Pushed(report) => (report.applied.len(), Some(report.commit.0.clone())),
        PushOutcome::DryRun { changes, .. } => (changes.len(), None),
        PushOutcome::RemoteAdvanced { expected, actual } => {
            tracing::warn!(
                vault = %result.vault,
                expected = %expected,
                actual = %actual,
                "remote advanced since last push; pull, then run `vaultpush vault resync {}`",
                result.vault,
            );
            (0, None)
        }
        PushOutcome::NothingToSync => (0, None),
    };
    VaultSummary {
        vault: result.vault.clone(),
        outcome: result.outcome.label().to_string(),
        changes,
        commit,
        error: None,
    }
}

fn record_attempt(records: &mut PushRecords, entry: &VaultSummary, attempted_at: u64) {
    let record = records.entry(entry.vault.clone()).or_default();
    record.last_attempt_at_unix = attempted_at;
    record.last_outcome = entry.outcome.clone();
    record.last_error = entry.error.clone();
    if let Some(commit) = &entry.commit {
        record.last_pushed_at_unix = Some(attempted_at);
        record.last_commit = Some(commit.clone());
    }
}

// ---------------------------------------------------------------------------
// Socket server
// ---------------------------------------------------------------------------

async fn socket_server_task(
    home: PathBuf,
    cache: SharedCache,
    records: SharedRecords,
    push_tx: mpsc::Sender<PushJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let home = home.clone();
                let cache = cache.clone();
                let records = records.clone();
                let push_tx = push_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(
                        stream,
                        home,
                        cache,
                        records,
                        push_tx,
                        shutdown_tx,
                        started_at_unix,
                    ).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    home: PathBuf,
    cache: SharedCache,
    records: SharedRecords,
    push_tx: mpsc::Sender<PushJob>,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_reply(&mut writer, &Reply::error(format!("invalid request: {err}"))).await?;
                continue;
            }
        };

        let reply = match &request {
            Request::Status => Reply::Status(
                build_status(&home, cache.clone(), records.clone(), started_at_unix).await,
            ),
            Request::Push { vault } => {
                let target = match vault {
                    Some(vault) => PushTarget::Vault(vault.clone()),
                    None => PushTarget::All,
                };
                match enqueue_push(&push_tx, target, "socket").await {
                    Ok(summary) => Reply::Pushed(summary),
                    Err(err) => Reply::error(err.to_string()),
                }
            }
            Request::Stop => {
                let _ = shutdown_tx.send(());
                Reply::Stopping
            }
        };

        write_reply(&mut writer, &reply).await?;
        if request == Request::Stop {
            break;
        }
    }

    Ok(())
}

async fn build_status(
    home: &Path,
    cache: SharedCache,
    records: SharedRecords,
    started_at_unix: u64,
) -> DaemonStatus {
    let mut vaults: Vec<Vault> = cache.read().await.values().cloned().collect();
    vaults.sort_by(|a, b| a.name.cmp(&b.name));

    let records = records.read().await;
    let last_push_at_unix = records
        .values()
        .filter_map(|record| record.last_pushed_at_unix)
        .max()
        .unwrap_or(0);

    DaemonStatus {
        running: true,
        started_at_unix,
        last_push_at_unix,
        vaults: vaults
            .into_iter()
            .map(|vault| WatchedVaultStatus {
                last_push: records.get(&vault.name.0).cloned(),
                remote: vault.remote.to_string(),
                name: vault.name.0,
                path: vault.path,
            })
            .collect(),
        socket: socket_path(home),
        vaults_root: vaults_root(home),
    }
}

async fn enqueue_push(
    push_tx: &mpsc::Sender<PushJob>,
    target: PushTarget,
    source: &'static str,
) -> Result<PushSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    push_tx
        .send(PushJob {
            target,
            source,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("push queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("push response"))?;
    outcome.map_err(DaemonError::Protocol)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn refresh_cache(home: PathBuf, cache: SharedCache) -> Result<(), DaemonError> {
    let refreshed = tokio::task::spawn_blocking(move || load_registry_cache(&home))
        .await
        .map_err(|err| DaemonError::Protocol(format!("cache refresh join error: {err}")))??;
    let mut guard = cache.write().await;
    *guard = refreshed;
    Ok(())
}

fn load_registry_cache(home: &Path) -> Result<RegistryCache, DaemonError> {
    Ok(registry::list_vaults_at(home)?
        .into_iter()
        .map(|vault| (vault.name.clone(), vault))
        .collect())
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let root = vaultpush_root(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    registry::vaults_dir_at(home)?;
    Ok(())
}

async fn write_reply(writer: &mut OwnedWriteHalf, reply: &Reply) -> Result<(), DaemonError> {
    let mut line = serde_json::to_vec(reply)?;
    line.push(b'\n');
    writer
        .write_all(&line)
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;
    use tokio::time::advance;
    use vaultpush_core::types::RemoteSpec;

    fn watched(name: &str, root: &str, exclude: &[&str]) -> WatchedVault {
        WatchedVault {
            name: name.to_string(),
            root: PathBuf::from(root),
            store: DiskVault::new(root)
                .with_exclude(exclude.iter().map(|s| s.to_string()).collect()),
        }
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn rapid_saves_collapse_into_one_trailing_push() {
        let mut debounce = Debouncer::new(Duration::from_millis(2_000));

        for _ in 0..5 {
            debounce.record("notes", Instant::now());
            advance(Duration::from_millis(300)).await;
            assert!(debounce.take_due(Instant::now()).is_empty());
        }

        // Last event was 300 ms ago.
        advance(Duration::from_millis(1_600)).await;
        assert!(debounce.take_due(Instant::now()).is_empty());

        advance(Duration::from_millis(100)).await;
        assert_eq!(debounce.take_due(Instant::now()), vec!["notes".to_string()]);
        assert!(debounce.next_deadline().is_none());
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn debounce_is_tracked_per_vault() {
        let mut debounce = Debouncer::new(Duration::from_millis(500));
        debounce.record("work", Instant::now());
        advance(Duration::from_millis(400)).await;
        debounce.record("notes", Instant::now());

        assert_eq!(
            debounce.next_deadline(),
            Some(Instant::now() + Duration::from_millis(100))
        );
        advance(Duration::from_millis(100)).await;
        assert_eq!(debounce.take_due(Instant::now()), vec!["work".to_string()]);

        advance(Duration::from_millis(400)).await;
        assert_eq!(debounce.take_due(Instant::now()), vec!["notes".to_string()]);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn wait_until_fires_at_the_deadline() {
        let deadline = Instant::now() + Duration::from_secs(2);
        wait_until(Some(deadline)).await;
        assert!(Instant::now() >= deadline);
    }

    #[test]
    fn paths_map_to_their_vault() {
        let vaults = vec![
            watched("notes", "/home/me/notes", &["private"]),
            watched("inner", "/home/me/notes/projects/inner", &[]),
        ];

        assert_eq!(
            vault_for_path(&vaults, Path::new("/home/me/notes/daily/today.md")),
            Some("notes")
        );
        assert_eq!(
            vault_for_path(&vaults, Path::new("/home/me/notes/projects/inner/a.md")),
            Some("inner")
        );
        assert_eq!(vault_for_path(&vaults, Path::new("/home/me/other/a.md")), None);
    }

    #[test]
    fn ignored_paths_do_not_trigger_pushes() {
        let vaults = vec![watched("notes", "/home/me/notes", &["private"])];

        for path in [
            "/home/me/notes/.obsidian/workspace.json",
            "/home/me/notes/.git/index",
            "/home/me/notes/daily/.today.md.swp",
            "/home/me/notes/private/diary.md",
            "/home/me/notes",
        ] {
            assert_eq!(vault_for_path(&vaults, Path::new(path)), None, "{path}");
        }
        assert_eq!(
            vault_for_path(&vaults, Path::new("/home/me/notes/privateer.md")),
            Some("notes")
        );
    }

    #[test]
    fn registry_yaml_detection_is_direct_children_only() {
        let dir = Path::new("/home/me/.vaultpush/vaults");
        assert!(is_registry_yaml(&dir.join("notes.yaml"), dir));
        assert!(!is_registry_yaml(&dir.join("notes.yaml.tmp"), dir));
        assert!(!is_registry_yaml(&dir.join("sub/notes.yaml"), dir));
    }

    #[test]
    fn relevant_events_include_removals() {
        use notify::event::{CreateKind, RemoveKind};
        assert!(is_relevant_event_kind(&EventKind::Create(CreateKind::File)));
        assert!(is_relevant_event_kind(&EventKind::Remove(RemoveKind::File)));
        assert!(!is_relevant_event_kind(&EventKind::Access(
            notify::event::AccessKind::Any
        )));
    }

    #[test]
    fn records_keep_last_successful_push() {
        let mut records = PushRecords::new();
        let pushed = VaultSummary {
            vault: "notes".to_string(),
            outcome: "pushed".to_string(),
            changes: 2,
            commit: Some("c1".to_string()),
            error: None,
        };
        record_attempt(&mut records, &pushed, 100);

        let idle = VaultSummary {
            outcome: "nothing-to-sync".to_string(),
            changes: 0,
            commit: None,
            ..pushed.clone()
        };
        record_attempt(&mut records, &idle, 200);

        let record = &records["notes"];
        assert_eq!(record.last_attempt_at_unix, 200);
        assert_eq!(record.last_outcome, "nothing-to-sync");
        assert_eq!(record.last_pushed_at_unix, Some(100));
        assert_eq!(record.last_commit.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn status_before_any_push() {
        let home = TempDir::new().expect("home");
        let cache = Arc::new(RwLock::new(RegistryCache::new()));
        let records = Arc::new(RwLock::new(PushRecords::new()));

        let status = build_status(home.path(), cache, records, 1_000_000).await;

        assert!(status.running);
        assert_eq!(status.started_at_unix, 1_000_000);
        assert_eq!(status.last_push_at_unix, 0);
        assert!(status.vaults.is_empty());
        assert_eq!(status.socket, socket_path(home.path()));
    }

    #[tokio::test]
    async fn status_lists_vaults_with_their_records() {
        let home = TempDir::new().expect("home");
        let workspace = TempDir::new().expect("workspace");
        for name in ["notes", "work"] {
            let path = workspace.path().join(name);
            fs::create_dir_all(&path).expect("vault dir");
            registry::init_at(path, None, RemoteSpec::new("me", name), home.path())
                .expect("register");
        }

        let cache = Arc::new(RwLock::new(
            load_registry_cache(home.path()).expect("load cache"),
        ));
        let work_record = PushRecord {
            last_attempt_at_unix: 1_000_200,
            last_outcome: "pushed".to_string(),
            last_error: None,
            last_pushed_at_unix: Some(1_000_200),
            last_commit: Some("abc".to_string()),
        };
        let mut records = PushRecords::new();
        records.insert("work".to_string(), work_record.clone());
        let records = Arc::new(RwLock::new(records));

        let status = build_status(home.path(), cache, records, 1_000_000).await;

        assert_eq!(status.last_push_at_unix, 1_000_200);
        let names: Vec<&str> = status.vaults.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["notes", "work"]);
        assert_eq!(status.vaults[0].last_push, None);
        assert_eq!(status.vaults[1].last_push, Some(work_record));
        assert_eq!(status.vaults[1].path, workspace.path().join("work"));
    }

    #[test]
    fn stale_socket_file_is_removed_before_bind() {
        let dir = TempDir::new().expect("dir");
        let socket = dir.path().join("daemon.sock");
        fs::write(&socket, b"").expect("stale file");
        prepare_socket_for_bind(&socket).expect("prepare");
        assert!(!socket.exists());
    }
}
