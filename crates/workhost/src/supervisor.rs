use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncRead;
use tokio::sync::{broadcast, watch};
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use workhost_core::{
    CrashEvent, CrashMonitor, CrashRecord, ExitEvent, IdentitySource, MessageChannel, MessagePort,
    ProcessExit, ProcessLink, ProcessSpawner, SpawnRequest, SpawnedProcess, TelemetrySink,
    WorkerConfig, WorkerError, WorkerEvents,
};

/// Shared collaborators a supervisor is constructed with.
#[derive(Clone)]
pub struct HostServices {
    pub spawner: Arc<dyn ProcessSpawner>,
    pub crash_monitor: Arc<dyn CrashMonitor>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub ids: IdentitySource,
}

struct LiveProcess {
    link: Arc<dyn ProcessLink>,
}

enum OutputKind {
    Stdout,
    Stderr,
}

/// Supervises exactly one worker process: spawn, observe, terminate.
///
/// Cheap to clone; clones share the same instance. An instance can be
/// started at most once and never restarts: a terminated worker is only
/// reported, restart policy belongs to the caller.
#[derive(Clone)]
pub struct WorkerSupervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    id: u64,
    services: HostServices,
    events: WorkerEvents,
    started: AtomicBool,
    live: Mutex<Option<LiveProcess>>,
    /// Last pid the platform confirmed; terminal events still need it
    /// after the handle is gone.
    pid: AtomicU32,
    /// First terminal path to claim wins the right to publish its event.
    terminal_claimed: AtomicBool,
    exited: watch::Sender<bool>,
    terminated: CancellationToken,
    service_name: OnceLock<String>,
}

impl WorkerSupervisor {
    pub fn new(services: HostServices) -> Self {
        let id = services.ids.next_id();
        let (exited, _) = watch::channel(false);
        Self {
            inner: Arc::new(SupervisorInner {
                id,
                services,
                events: WorkerEvents::new(),
                started: AtomicBool::new(false),
                live: Mutex::new(None),
                pid: AtomicU32::new(0),
                terminal_claimed: AtomicBool::new(false),
                exited,
                terminated: CancellationToken::new(),
                service_name: OnceLock::new(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn events(&self) -> &WorkerEvents {
        &self.inner.events
    }

    /// Last pid the platform reported, if any.
    pub fn pid(&self) -> Option<u32> {
        match self.inner.pid.load(Ordering::Relaxed) {
            0 => None,
            pid => Some(pid),
        }
    }

    pub fn is_live(&self) -> bool {
        self.inner.live.lock().unwrap().is_some()
    }

    /// Cancelled once the live handle has been cleared by any termination
    /// path.
    pub(crate) fn termination_token(&self) -> CancellationToken {
        self.inner.terminated.clone()
    }

    /// Spawns the worker described by `config`.
    ///
    /// Returns `Ok(false)` without side effects when this instance was
    /// already started. Fails fast when no spawn facility exists at all.
    /// The initial `payload` (if any) is posted fire-and-forget; delivery
    /// is not acknowledged.
    pub async fn start(&self, config: WorkerConfig) -> Result<bool, WorkerError> {
        if !self.inner.services.spawner.is_available() {
            return Err(WorkerError::SpawnFacilityUnavailable);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            warn!(
                service = %self.service_label(),
                "refusing to start: this supervisor already started a worker"
            );
            return Ok(false);
        }

        let service_name = format!("{}-{}", config.kind, self.inner.id);
        let _ = self.inner.service_name.set(service_name.clone());

        let mut exec_args = config.exec_args.clone();
        exec_args.push(format!("--worker-kind={}", config.kind));

        // Defensive copy; the caller's map is never stored or mutated.
        let env: HashMap<String, String> = config
            .env
            .iter()
            .map(|(key, value)| (key.clone(), value.to_string()))
            .collect();

        let request = SpawnRequest {
            service_name: service_name.clone(),
            kind: config.kind.clone(),
            args: config.args.clone(),
            exec_args,
            env,
            allow_unsigned_libraries: config.allow_unsigned_libraries,
        };

        let spawned = self
            .inner
            .services
            .spawner
            .spawn(request)
            .await
            .map_err(|e| WorkerError::spawn_failed(e.to_string()))?;

        if let Some(pid) = spawned.pid {
            self.inner.pid.store(pid, Ordering::Relaxed);
            info!(
                service = %service_name,
                pid,
                correlation = ?config.correlation_id,
                "worker process spawned"
            );
        }

        {
            let mut live = self.inner.live.lock().unwrap();
            *live = Some(LiveProcess {
                link: spawned.link.clone(),
            });
        }

        self.install_listeners(&service_name, &config.kind, spawned);

        if let Some(payload) = config.payload {
            self.post_message(payload, Vec::new());
        }

        Ok(true)
    }

    /// Forwards a message to the worker, optionally transferring channel
    /// endpoints. Silently does nothing once the worker terminated; callers
    /// observe termination through the event channel, not through send
    /// failures.
    pub fn post_message(&self, message: Value, transfers: Vec<MessagePort>) {
        let live = self.inner.live.lock().unwrap();
        if let Some(live) = live.as_ref() {
            if !live.link.post_message(message, transfers) {
                debug!(service = %self.service_label(), "worker message could not be delivered");
            }
        }
    }

    /// Opens a dedicated channel to the worker: one endpoint travels to
    /// the process piggy-backed with `payload`, the other is returned to
    /// the caller. On a terminated instance the transfer is silently
    /// dropped and the returned endpoint stays orphaned.
    pub fn connect(&self, payload: Option<Value>) -> MessagePort {
        let (local, remote) = MessageChannel::pair();
        self.post_message(payload.unwrap_or(Value::Null), vec![remote]);
        local
    }

    /// Requests OS-level termination of the worker. No-op once terminated.
    /// When the OS refuses the request the state is left unchanged; the
    /// process may still be alive and the caller may retry.
    pub async fn kill(&self) {
        let link = {
            let live = self.inner.live.lock().unwrap();
            match live.as_ref() {
                Some(live) => live.link.clone(),
                None => return,
            }
        };
        if link.terminate().await {
            info!(service = %self.service_label(), "worker process killed");
            self.inner.cleanup();
        } else {
            warn!(
                service = %self.service_label(),
                "worker process could not be killed; it may still be running"
            );
        }
    }

    /// Waits until the worker publishes its exit event or `max_wait`
    /// elapses, whichever comes first. A worker still live at the deadline
    /// is killed.
    pub async fn wait_for_exit(&self, max_wait: Duration) {
        let mut exited = self.inner.exited.subscribe();
        if !self.is_live() {
            return;
        }
        tokio::select! {
            _ = exited.wait_for(|done| *done) => {}
            _ = tokio::time::sleep(max_wait) => {
                if self.is_live() {
                    info!(
                        service = %self.service_label(),
                        wait_ms = max_wait.as_millis() as u64,
                        "worker did not exit within the grace period; killing it"
                    );
                    self.kill().await;
                }
            }
        }
    }

    /// Best-effort debugger attach. False when the worker is gone or the
    /// runtime has no attach primitive.
    pub fn enable_debugger(&self) -> bool {
        let live = self.inner.live.lock().unwrap();
        match live.as_ref() {
            Some(live) => live.link.attach_debugger(),
            None => false,
        }
    }

    /// Runs `action` for the first inbound message deep-equal to
    /// `sentinel`, then drops the subscription.
    pub fn once_message(&self, sentinel: Value, action: impl FnOnce(&Value) + Send + 'static) {
        self.inner
            .events
            .message
            .once_when(move |message| *message == sentinel, action);
    }

    fn service_label(&self) -> String {
        self.inner
            .service_name
            .get()
            .cloned()
            .unwrap_or_else(|| format!("worker-{}", self.inner.id))
    }

    fn install_listeners(&self, service_name: &str, kind: &str, spawned: SpawnedProcess) {
        let SpawnedProcess {
            stdout,
            stderr,
            messages,
            exit,
            ..
        } = spawned;

        self.spawn_output_pump(stdout, OutputKind::Stdout);
        self.spawn_output_pump(stderr, OutputKind::Stderr);

        // Inbound messages are republished verbatim.
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut messages = messages;
            while let Some(message) = messages.recv().await {
                inner.events.message.fire(&message);
            }
        });

        // Exit notification: the only path that publishes ExitEvent.
        let inner = self.inner.clone();
        let service = service_name.to_string();
        tokio::spawn(async move {
            let exit = match exit.await {
                Ok(exit) => exit,
                // The backend dropped the notification without reporting.
                Err(_) => ProcessExit {
                    code: -1,
                    signal: None,
                },
            };
            // Let a crash notice delivered for the same death classify it
            // first; the claim below keeps the two paths exclusive.
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
            if inner.claim_terminal() {
                info!(service = %service, code = exit.code, "worker process exited");
                let event = ExitEvent::new(inner.last_pid(), exit.code);
                inner.events.exit.fire(&event);
                let _ = inner.exited.send(true);
            }
            inner.cleanup();
        });

        // Crash notices from the platform monitor, filtered to this worker.
        let inner = self.inner.clone();
        let service = service_name.to_string();
        let kind = kind.to_string();
        let mut notices = self.inner.services.crash_monitor.subscribe();
        let token = self.inner.terminated.clone();
        tokio::spawn(async move {
            loop {
                let notice = tokio::select! {
                    _ = token.cancelled() => break,
                    notice = notices.recv() => notice,
                };
                let notice = match notice {
                    Ok(notice) => notice,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if notice.kind != kind || notice.service_name != service {
                    continue;
                }
                if !inner.claim_terminal() {
                    break;
                }
                warn!(
                    service = %service,
                    reason = %notice.reason,
                    code = notice.exit_code,
                    "worker process died abnormally"
                );
                inner
                    .services
                    .telemetry
                    .report_crash(CrashRecord::new(kind.as_str(), notice.reason, notice.exit_code));
                let event = CrashEvent {
                    pid: inner.last_pid(),
                    exit_code: notice.exit_code,
                    reason: notice.reason,
                };
                inner.events.crash.fire(&event);
                inner.cleanup();
                break;
            }
        });
    }

    fn spawn_output_pump(&self, stream: Box<dyn AsyncRead + Send + Unpin>, kind: OutputKind) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut frames = FramedRead::with_capacity(stream, workhost_core::Utf8Codec, 1024);
            while let Some(frame) = frames.next().await {
                match frame {
                    Ok(text) => match kind {
                        OutputKind::Stdout => inner.events.stdout.fire(&text),
                        OutputKind::Stderr => inner.events.stderr.fire(&text),
                    },
                    Err(error) => {
                        debug!(%error, "worker output stream ended");
                        break;
                    }
                }
            }
        });
    }
}

impl SupervisorInner {
    fn last_pid(&self) -> u32 {
        self.pid.load(Ordering::Relaxed)
    }

    fn claim_terminal(&self) -> bool {
        !self.terminal_claimed.swap(true, Ordering::SeqCst)
    }

    /// Clears the live handle. Safe to call from every termination path;
    /// the second and later calls are no-ops.
    fn cleanup(&self) {
        let dropped = self.live.lock().unwrap().take();
        if dropped.is_some() {
            self.terminated.cancel();
            debug!(id = self.id, "worker handle cleared");
        }
    }
}
