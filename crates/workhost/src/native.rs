use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use workhost_core::{
    CrashFeed, CrashNotice, ExecutableResolver, MessagePort, ProcessExit, ProcessId, ProcessLink,
    ProcessSpawner, SpawnRequest, SpawnedProcess, TerminationReason,
};

/// Spawns real OS worker processes with tokio.
///
/// Stdio is piped. On unix an extra socketpair mapped to fd 3 in the child
/// carries newline-delimited JSON frames; that is how posted messages,
/// transferred channel endpoints, and inbound messages cross the process
/// boundary. Signal deaths are classified and republished on the spawner's
/// crash feed, so the exit notification and the crash notice for one death
/// originate from the same OS event.
pub struct NativeSpawner {
    resolver: Arc<dyn ExecutableResolver>,
    crash_feed: CrashFeed,
}

impl NativeSpawner {
    pub fn new(resolver: Arc<dyn ExecutableResolver>) -> Self {
        Self {
            resolver,
            crash_feed: CrashFeed::default(),
        }
    }

    /// The feed carrying this spawner's crash notices; hand it to the
    /// supervisor as its crash monitor.
    pub fn crash_feed(&self) -> CrashFeed {
        self.crash_feed.clone()
    }
}

/// Resolver that launches the same executable whatever the worker kind.
pub struct FixedExecutable(pub PathBuf);

impl ExecutableResolver for FixedExecutable {
    fn resolve(&self, _kind: &str) -> Result<PathBuf> {
        Ok(self.0.clone())
    }
}

#[async_trait]
impl ProcessSpawner for NativeSpawner {
    fn is_available(&self) -> bool {
        true
    }

    async fn spawn(&self, request: SpawnRequest) -> Result<SpawnedProcess> {
        let program = self.resolver.resolve(&request.kind)?;

        let mut command = Command::new(&program);
        command
            .args(&request.exec_args)
            .args(&request.args)
            .envs(&request.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        command.process_group(0);

        if request.allow_unsigned_libraries {
            // Library signature enforcement is a host-platform concern;
            // there is nothing to relax for a plain OS process.
            debug!(
                service = %request.service_name,
                "allow_unsigned_libraries has no effect for native workers"
            );
        }

        let ipc = ipc::IpcPair::new().context("failed to create worker message socket")?;
        ipc.configure(&mut command);

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn worker executable {}", program.display()))?;

        let pid = child.id();
        debug!(service = %request.service_name, pid = ?pid, "native worker spawned");

        let stdout: Box<dyn tokio::io::AsyncRead + Send + Unpin> =
            Box::new(child.stdout.take().context("worker stdout was not piped")?);
        let stderr: Box<dyn tokio::io::AsyncRead + Send + Unpin> =
            Box::new(child.stderr.take().context("worker stderr was not piped")?);
        // The worker reads messages from its socket, not stdin.
        drop(child.stdin.take());

        let link = Arc::new(NativeLink::new(pid));
        let (inbound_tx, messages) = mpsc::unbounded_channel();
        if let Some(outbound) = ipc.start(link.clone(), inbound_tx)? {
            link.set_outbound(outbound);
        }

        let (exit_tx, exit_rx) = oneshot::channel();
        let crash_feed = self.crash_feed.clone();
        let service_name = request.service_name.clone();
        let kind = request.kind.clone();
        tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => classify_exit(status),
                Err(error) => {
                    warn!(%error, "failed waiting on worker process");
                    ProcessExit {
                        code: -1,
                        signal: None,
                    }
                }
            };
            if let Some(signo) = exit.signal {
                crash_feed.publish(CrashNotice {
                    service_name,
                    kind,
                    reason: reason_for_signal(signo),
                    exit_code: exit.code,
                });
            }
            let _ = exit_tx.send(exit);
        });

        Ok(SpawnedProcess {
            pid,
            link,
            stdout,
            stderr,
            messages,
            exit: exit_rx,
        })
    }
}

/// One message frame on the worker socket.
///
/// A frame without a `port` tag is a plain message; `ports` announces the
/// ids of endpoints transferred alongside it. A frame tagged with `port`
/// belongs to that transferred endpoint's channel.
#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    port: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    ports: Vec<u64>,
    body: Value,
}

struct NativeLink {
    pid: Option<ProcessId>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    /// Endpoints transferred to the worker, indexed by their frame tag.
    ports: Mutex<Vec<Arc<MessagePort>>>,
}

impl NativeLink {
    fn new(pid: Option<ProcessId>) -> Self {
        Self {
            pid,
            outbound: Mutex::new(None),
            ports: Mutex::new(Vec::new()),
        }
    }

    fn set_outbound(&self, tx: mpsc::UnboundedSender<Frame>) {
        *self.outbound.lock().unwrap() = Some(tx);
    }
}

#[async_trait]
impl ProcessLink for NativeLink {
    fn pid(&self) -> Option<ProcessId> {
        self.pid
    }

    fn post_message(&self, message: Value, transfers: Vec<MessagePort>) -> bool {
        let outbound = self.outbound.lock().unwrap();
        let Some(tx) = outbound.as_ref() else {
            warn!("worker message dropped: no message transport on this platform");
            return false;
        };

        let mut ids = Vec::with_capacity(transfers.len());
        {
            let mut ports = self.ports.lock().unwrap();
            for port in transfers {
                let id = ports.len() as u64;
                let port = Arc::new(port);
                ports.push(port.clone());
                ids.push(id);

                // Pump what the parent-side peer posts through the socket.
                let tx = tx.clone();
                tokio::spawn(async move {
                    while let Some(body) = port.recv().await {
                        let frame = Frame {
                            port: Some(id),
                            ports: Vec::new(),
                            body,
                        };
                        if tx.send(frame).is_err() {
                            break;
                        }
                    }
                });
            }
        }

        tx.send(Frame {
            port: None,
            ports: ids,
            body: message,
        })
        .is_ok()
    }

    async fn terminate(&self) -> bool {
        let Some(pid) = self.pid else {
            return false;
        };
        terminate_by_pid(pid)
    }

    fn attach_debugger(&self) -> bool {
        false
    }
}

fn classify_exit(status: std::process::ExitStatus) -> ProcessExit {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signo) = status.signal() {
            return ProcessExit {
                code: 128 + signo,
                signal: Some(signo),
            };
        }
    }
    ProcessExit {
        code: status.code().unwrap_or(-1),
        signal: None,
    }
}

#[cfg(unix)]
fn reason_for_signal(signo: i32) -> TerminationReason {
    match signo {
        libc::SIGKILL => TerminationReason::Killed,
        libc::SIGSEGV | libc::SIGBUS | libc::SIGILL | libc::SIGFPE | libc::SIGABRT
        | libc::SIGTRAP => TerminationReason::Crashed,
        _ => TerminationReason::AbnormalExit,
    }
}

#[cfg(not(unix))]
fn reason_for_signal(_signo: i32) -> TerminationReason {
    TerminationReason::AbnormalExit
}

#[cfg(unix)]
fn terminate_by_pid(pid: ProcessId) -> bool {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => true,
        // Already gone; the exit notification will close things out.
        Err(nix::errno::Errno::ESRCH) => true,
        Err(error) => {
            warn!(pid, %error, "failed to deliver SIGKILL to worker");
            false
        }
    }
}

#[cfg(not(unix))]
fn terminate_by_pid(pid: ProcessId) -> bool {
    std::process::Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[cfg(unix)]
mod ipc {
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream as StdUnixStream;
    use std::sync::Arc;

    use serde_json::Value;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixStream;
    use tokio::sync::mpsc;
    use tracing::debug;

    use super::{Frame, NativeLink};

    /// Descriptor the worker finds its message socket on.
    pub const WORKER_MESSAGE_FD: i32 = 3;

    pub struct IpcPair {
        parent: StdUnixStream,
        child: StdUnixStream,
    }

    impl IpcPair {
        pub fn new() -> std::io::Result<Self> {
            let (parent, child) = StdUnixStream::pair()?;
            Ok(Self { parent, child })
        }

        /// Maps the child end onto fd 3 between fork and exec; `dup2`
        /// leaves the duplicate without the close-on-exec flag. When the
        /// inherited descriptor already is fd 3, only the flag is cleared.
        pub fn configure(&self, command: &mut tokio::process::Command) {
            let fd = self.child.as_raw_fd();
            unsafe {
                command.pre_exec(move || {
                    if fd == WORKER_MESSAGE_FD {
                        let flags = libc::fcntl(fd, libc::F_GETFD);
                        if flags == -1
                            || libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) == -1
                        {
                            return Err(std::io::Error::last_os_error());
                        }
                    } else if libc::dup2(fd, WORKER_MESSAGE_FD) == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        /// Starts the frame pumps over the parent end and returns the
        /// sender for outbound frames.
        pub fn start(
            self,
            link: Arc<NativeLink>,
            inbound: mpsc::UnboundedSender<Value>,
        ) -> std::io::Result<Option<mpsc::UnboundedSender<Frame>>> {
            let IpcPair { parent, child } = self;
            drop(child);

            parent.set_nonblocking(true)?;
            let stream = UnixStream::from_std(parent)?;
            let (read_half, mut write_half) = stream.into_split();
            let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();

            tokio::spawn(async move {
                while let Some(frame) = outbound_rx.recv().await {
                    let Ok(mut line) = serde_json::to_vec(&frame) else {
                        continue;
                    };
                    line.push(b'\n');
                    if write_half.write_all(&line).await.is_err() {
                        break;
                    }
                }
            });

            tokio::spawn(async move {
                let mut lines = BufReader::new(read_half).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let frame: Frame = match serde_json::from_str(&line) {
                        Ok(frame) => frame,
                        Err(error) => {
                            debug!(%error, "discarding malformed worker frame");
                            continue;
                        }
                    };
                    match frame.port {
                        Some(id) => {
                            let port = link.ports.lock().unwrap().get(id as usize).cloned();
                            if let Some(port) = port {
                                port.post(frame.body);
                            } else {
                                debug!(id, "worker frame for unknown channel endpoint");
                            }
                        }
                        None => {
                            if inbound.send(frame.body).is_err() {
                                break;
                            }
                        }
                    }
                }
            });

            Ok(Some(outbound_tx))
        }
    }
}

#[cfg(not(unix))]
mod ipc {
    use std::sync::Arc;

    use serde_json::Value;
    use tokio::sync::mpsc;

    use super::{Frame, NativeLink};

    /// No message transport on this platform; workers only expose stdio
    /// and the exit notification.
    pub struct IpcPair;

    impl IpcPair {
        pub fn new() -> std::io::Result<Self> {
            Ok(Self)
        }

        pub fn configure(&self, _command: &mut tokio::process::Command) {}

        pub fn start(
            self,
            _link: Arc<NativeLink>,
            _inbound: mpsc::UnboundedSender<Value>,
        ) -> std::io::Result<Option<mpsc::UnboundedSender<Frame>>> {
            Ok(None)
        }
    }
}
