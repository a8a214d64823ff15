use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::{Instant, MissedTickBehavior};

use fieldsync_core::{config, Config, LoggingConfig, SyncSettings};
use fieldsync_sync::{
    run_tick, FetchStatus, ReconcileOutcome, ReverseReconciler, Session, SyncState, TickReport,
};

use crate::error::{io_err, DaemonError};
use crate::paths::{run_dir, socket_path};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::queue::ChangeQueue;

/// What triggered a poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickSource {
    Timer,
    Socket,
}

/// Condensed [`TickReport`] kept for `status` and returned by `poll`.
#[derive(Debug, Clone, Serialize)]
pub struct TickSummary {
    pub source: TickSource,
    pub at: DateTime<Utc>,
    pub since: String,
    pub cursor: String,
    pub fetch: FetchStatus,
    pub records: usize,
    pub written: usize,
    pub unchanged: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
    pub duration_ms: u128,
}

impl TickSummary {
    fn from_report(
        source: TickSource,
        at: DateTime<Utc>,
        report: TickReport,
        duration: Duration,
    ) -> Self {
        Self {
            source,
            at,
            records: report.records.len(),
            written: report.writes(),
            unchanged: report.count(ReconcileOutcome::Unchanged),
            failed: report.failed(),
            since: report.since,
            cursor: report.cursor,
            fetch: report.fetch,
            aborted: report.aborted,
            duration_ms: duration.as_millis(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PollStats {
    pub ticks: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tick: Option<TickSummary>,
}

struct PollJob {
    respond_to: oneshot::Sender<TickSummary>,
}

/// Everything a socket client can reach.
#[derive(Clone)]
struct SocketContext {
    home: PathBuf,
    queue: ChangeQueue,
    poll_tx: mpsc::Sender<PollJob>,
    poll_stats: Arc<RwLock<PollStats>>,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
}

/// Load config, install logging, and block the current thread until the
/// daemon exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    let config = config::load_at(home)?;
    init_tracing(&config.logging);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), config))
}

/// Run the daemon against the HTTP collaborators named in `config`.
pub async fn run(home: PathBuf, config: Config) -> Result<(), DaemonError> {
    let session = Session::connect_at(&home, &config)?;
    tracing::info!(
        provider = %config.provider.base_url,
        store = %config.store.domain,
        "session connected",
    );
    run_with_session(home, config.sync, session).await
}

/// Run the poll task, the change-queue worker, the socket server and the
/// signal handler until one of them requests shutdown.
pub async fn run_with_session(
    home: PathBuf,
    settings: SyncSettings,
    session: Session,
) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;
    let started_at_unix = unix_seconds_now();

    let (queue, worker) = ChangeQueue::new(settings.queue_capacity, &settings.watched_content_type);
    let (poll_tx, poll_rx) = mpsc::channel::<PollJob>(8);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let poll_stats = Arc::new(RwLock::new(PollStats::default()));

    let poll_handle = {
        let shutdown = shutdown_tx.clone();
        let state = SyncState::new(session.clone(), Utc::now());
        let stats = poll_stats.clone();
        let period = settings.poll_interval();
        tokio::spawn(async move {
            let result = poll_task(state, period, stats, poll_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let queue_handle = {
        let shutdown = shutdown_tx.clone();
        let reconciler = ReverseReconciler::new(session);
        tokio::spawn(async move {
            let result = worker.run(&reconciler, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let context = SocketContext {
            home: home.clone(),
            queue,
            poll_tx,
            poll_stats,
            shutdown_tx: shutdown_tx.clone(),
            started_at_unix,
        };
        tokio::spawn(async move {
            let result = socket_server_task(context, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
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

    tracing::info!(
        poll_interval_secs = settings.poll_interval().as_secs(),
        queue_capacity = settings.queue_capacity,
        socket = %socket_path(&home).display(),
        "daemon started",
    );

    let (poll_result, queue_result, socket_result, signal_result) =
        tokio::join!(poll_handle, queue_handle, socket_handle, signal_handle);

    handle_join("poll", poll_result)?;
    handle_join("change_queue", queue_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("daemon stopped");
    Ok(())
}

/// Owns the cursor. Timer ticks and `poll` requests run inline here, so two
/// ticks never overlap; ticks missed while one is running are skipped.
async fn poll_task(
    mut state: SyncState,
    period: Duration,
    stats: Arc<RwLock<PollStats>>,
    mut poll_rx: mpsc::Receiver<PollJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                tick(&mut state, &stats, TickSource::Timer).await;
            }
            maybe_job = poll_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let summary = tick(&mut state, &stats, TickSource::Socket).await;
                let _ = job.respond_to.send(summary);
            }
        }
    }

    Ok(())
}

async fn tick(
    state: &mut SyncState,
    stats: &RwLock<PollStats>,
    source: TickSource,
) -> TickSummary {
    let started = Instant::now();
    let now = Utc::now();
    let report = run_tick(state, now).await;
    let summary = TickSummary::from_report(source, now, report, started.elapsed());

    match &summary.fetch {
        FetchStatus::Failed(error) => {
            tracing::warn!(source = ?source, since = %summary.since, error = %error, "poll tick fetch failed");
        }
        FetchStatus::NotModified => {
            tracing::debug!(source = ?source, since = %summary.since, "poll tick not modified");
        }
        FetchStatus::Fetched => {
            if let Some(reason) = &summary.aborted {
                tracing::error!(reason = %reason, cursor = %summary.cursor, "poll tick aborted");
            }
            tracing::info!(
                source = ?source,
                records = summary.records,
                written = summary.written,
                unchanged = summary.unchanged,
                failed = summary.failed,
                duration_ms = summary.duration_ms,
                "poll tick completed",
            );
        }
    }

    let mut guard = stats.write().await;
    guard.ticks += 1;
    guard.last_tick = Some(summary.clone());
    summary
}

async fn socket_server_task(
    context: SocketContext,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let run = run_dir(&context.home);
    if !run.exists() {
        fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
    }

    let socket = socket_path(&context.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let context = context.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, context).await {
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

async fn handle_socket_client(stream: UnixStream, context: SocketContext) -> Result<(), DaemonError> {
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

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let stop = request.cmd == "stop";
        let response = dispatch(&context, request).await;
        write_response(&mut writer, &response).await?;
        if stop {
            break;
        }
    }

    Ok(())
}

async fn dispatch(context: &SocketContext, request: DaemonRequest) -> DaemonResponse {
    match request.cmd.as_str() {
        "status" => DaemonResponse::ok(build_status_payload(context).await),
        "poll" => match enqueue_poll(&context.poll_tx).await {
            Ok(summary) => DaemonResponse::ok(json!(summary)),
            Err(err) => DaemonResponse::error(err.to_string()),
        },
        "notify" => {
            let Some(notification) = request.notification else {
                return DaemonResponse::error("notify requires a notification");
            };
            match context.queue.submit(notification).await {
                Ok(submitted) => DaemonResponse::ok(json!({ "status": submitted })),
                Err(err) => DaemonResponse::error(err.to_string()),
            }
        }
        "stop" => {
            let _ = context.shutdown_tx.send(());
            DaemonResponse::ok(json!({ "stopping": true }))
        }
        other => DaemonResponse::error(format!("unknown command '{other}'")),
    }
}

async fn build_status_payload(context: &SocketContext) -> Value {
    let poll = context.poll_stats.read().await.clone();
    let queue = context.queue.stats().await;

    json!({
        "running": true,
        "pid": std::process::id(),
        "started_at_unix": context.started_at_unix,
        "socket": socket_path(&context.home).display().to_string(),
        "poll": poll,
        "queue": queue,
    })
}

async fn enqueue_poll(poll_tx: &mpsc::Sender<PollJob>) -> Result<TickSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    poll_tx
        .send(PollJob { respond_to: tx })
        .await
        .map_err(|_| DaemonError::ChannelClosed("poll queue"))?;

    rx.await
        .map_err(|_| DaemonError::ChannelClosed("poll response"))
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
    let run = run_dir(home);
    if !run.exists() {
        fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
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

/// Install the fmt subscriber. `RUST_LOG` overrides the configured filter.
/// `log` records from the sync crate are bridged in by `try_init`.
pub fn init_tracing(logging: &LoggingConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
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

    use fieldsync_sync::memory::ScriptedFetch;
    use fieldsync_sync::{AliasRegistry, MemoryProvider, MemoryStore};
    use tempfile::TempDir;

    fn session(provider: Arc<MemoryProvider>) -> Session {
        Session {
            provider: provider.clone(),
            store: Arc::new(MemoryStore::new()),
            aliases: Arc::new(AliasRegistry::in_memory(provider)),
            user_id: "users/test".into(),
            lookback_days: 1461,
        }
    }

    fn context(home: &Path) -> (SocketContext, mpsc::Receiver<PollJob>) {
        let (queue, _worker) = ChangeQueue::new(4, fieldsync_core::tree::FIELDS_TYPE);
        let (poll_tx, poll_rx) = mpsc::channel(1);
        let (shutdown_tx, _) = broadcast::channel(1);
        let context = SocketContext {
            home: home.to_path_buf(),
            queue,
            poll_tx,
            poll_stats: Arc::new(RwLock::new(PollStats::default())),
            shutdown_tx,
            started_at_unix: 1_000_000,
        };
        (context, poll_rx)
    }

    #[tokio::test]
    async fn status_payload_before_first_tick() {
        let home = TempDir::new().expect("home");
        let (context, _poll_rx) = context(home.path());

        let payload = build_status_payload(&context).await;

        assert_eq!(payload["running"], json!(true));
        assert_eq!(payload["started_at_unix"], json!(1_000_000u64));
        assert_eq!(payload["poll"]["ticks"], json!(0));
        assert!(payload["poll"].get("last_tick").is_none());
        assert_eq!(payload["queue"]["accepted"], json!(0));
    }

    #[tokio::test]
    async fn tick_records_last_summary() {
        let provider = Arc::new(MemoryProvider::new());
        provider
            .push_fetch(ScriptedFetch::Fail {
                status: 500,
                message: "boom".into(),
            })
            .await;
        let mut state = SyncState::new(session(provider), Utc::now());
        let stats = RwLock::new(PollStats::default());

        let summary = tick(&mut state, &stats, TickSource::Timer).await;

        assert!(matches!(summary.fetch, FetchStatus::Failed(_)));
        assert_eq!(summary.since, summary.cursor, "failed fetch keeps the cursor");
        let stats = stats.read().await;
        assert_eq!(stats.ticks, 1);
        assert_eq!(
            stats.last_tick.as_ref().map(|t| t.source),
            Some(TickSource::Timer)
        );
    }

    #[tokio::test]
    async fn notify_without_payload_is_rejected() {
        let home = TempDir::new().expect("home");
        let (context, _poll_rx) = context(home.path());

        let response = dispatch(&context, DaemonRequest::command("notify")).await;
        assert!(!response.ok);

        let response = dispatch(&context, DaemonRequest::command("bogus")).await;
        assert_eq!(response.error.as_deref(), Some("unknown command 'bogus'"));
    }

    #[tokio::test]
    async fn stop_broadcasts_shutdown() {
        let home = TempDir::new().expect("home");
        let (context, _poll_rx) = context(home.path());
        let mut shutdown_rx = context.shutdown_tx.subscribe();

        let response = dispatch(&context, DaemonRequest::command("stop")).await;

        assert_eq!(response.data, Some(json!({ "stopping": true })));
        shutdown_rx.recv().await.expect("shutdown signal");
    }

    #[tokio::test(start_paused = true)]
    async fn poll_requests_run_on_the_poll_task() {
        let provider = Arc::new(MemoryProvider::new());
        let state = SyncState::new(session(provider.clone()), Utc::now());
        let stats = Arc::new(RwLock::new(PollStats::default()));
        let (poll_tx, poll_rx) = mpsc::channel(1);
        let (shutdown_tx, _) = broadcast::channel(1);

        let task = tokio::spawn(poll_task(
            state,
            Duration::from_secs(3600),
            stats.clone(),
            poll_rx,
            shutdown_tx.subscribe(),
        ));

        let summary = enqueue_poll(&poll_tx).await.expect("poll summary");
        assert_eq!(summary.source, TickSource::Socket);
        assert_eq!(summary.fetch, FetchStatus::NotModified);

        let _ = shutdown_tx.send(());
        task.await.unwrap().unwrap();

        // Every tick retries "not modified" once, on the same task.
        let ticks = stats.read().await.ticks;
        assert!(ticks >= 1);
        assert_eq!(provider.fetches().await.len() as u64, 2 * ticks);
    }
}
