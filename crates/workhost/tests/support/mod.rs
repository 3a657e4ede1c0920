#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::DuplexStream;
use tokio::sync::{broadcast, mpsc, oneshot};

use workhost::{
    ContextEvent, ContextRegistry, CrashFeed, CrashRecord, HostServices, IdentitySource,
    MessagePort, NullTelemetry, OwningContext, ProcessExit, ProcessId, ProcessLink,
    ProcessSpawner, SpawnRequest, SpawnedProcess, TelemetrySink,
};

pub const MOCK_PID: u32 = 4242;

/// Control surface a test uses to observe and drive one fake process.
pub struct ProcessControl {
    pub link: Arc<MockLink>,
    pub stdout: DuplexStream,
    pub stderr: DuplexStream,
    pub messages: mpsc::UnboundedSender<Value>,
    exit: Option<oneshot::Sender<ProcessExit>>,
}

impl ProcessControl {
    pub fn send_exit(&mut self, code: i32) {
        if let Some(exit) = self.exit.take() {
            let _ = exit.send(ProcessExit { code, signal: None });
        }
    }
}

pub struct MockLink {
    pid: Option<ProcessId>,
    pub posts: Mutex<Vec<Value>>,
    pub transfers: Mutex<Vec<MessagePort>>,
    pub kill_attempts: AtomicUsize,
    kill_result: bool,
    debugger: bool,
}

impl MockLink {
    pub fn post_count(&self) -> usize {
        self.posts.lock().unwrap().len()
    }

    pub fn kills(&self) -> usize {
        self.kill_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessLink for MockLink {
    fn pid(&self) -> Option<ProcessId> {
        self.pid
    }

    fn post_message(&self, message: Value, transfers: Vec<MessagePort>) -> bool {
        self.posts.lock().unwrap().push(message);
        self.transfers.lock().unwrap().extend(transfers);
        true
    }

    async fn terminate(&self) -> bool {
        self.kill_attempts.fetch_add(1, Ordering::SeqCst);
        self.kill_result
    }

    fn attach_debugger(&self) -> bool {
        self.debugger
    }
}

/// Scripted spawn facility: every spawn yields a fresh fake process whose
/// far side the test drives by hand through [`ProcessControl`].
pub struct MockSpawner {
    available: bool,
    kill_result: bool,
    debugger: bool,
    pub spawn_count: AtomicUsize,
    pub requests: Mutex<Vec<SpawnRequest>>,
    controls: Mutex<Vec<ProcessControl>>,
}

impl MockSpawner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            available: true,
            kill_result: true,
            debugger: true,
            spawn_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            controls: Mutex::new(Vec::new()),
        })
    }

    pub fn unavailable() -> Arc<Self> {
        let mut spawner = Self::template();
        spawner.available = false;
        Arc::new(spawner)
    }

    pub fn with_failing_kill() -> Arc<Self> {
        let mut spawner = Self::template();
        spawner.kill_result = false;
        Arc::new(spawner)
    }

    fn template() -> Self {
        Self {
            available: true,
            kill_result: true,
            debugger: true,
            spawn_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            controls: Mutex::new(Vec::new()),
        }
    }

    pub fn spawns(&self) -> usize {
        self.spawn_count.load(Ordering::SeqCst)
    }

    pub fn take_control(&self) -> ProcessControl {
        self.controls.lock().unwrap().remove(0)
    }

    pub fn last_request(&self) -> SpawnRequest {
        self.requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no spawn was requested")
    }
}

#[async_trait]
impl ProcessSpawner for MockSpawner {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn spawn(&self, request: SpawnRequest) -> Result<SpawnedProcess> {
        self.spawn_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);

        let (stdout_far, stdout_near) = tokio::io::duplex(1024);
        let (stderr_far, stderr_near) = tokio::io::duplex(1024);
        let (message_tx, messages) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let link = Arc::new(MockLink {
            pid: Some(MOCK_PID),
            posts: Mutex::new(Vec::new()),
            transfers: Mutex::new(Vec::new()),
            kill_attempts: AtomicUsize::new(0),
            kill_result: self.kill_result,
            debugger: self.debugger,
        });

        self.controls.lock().unwrap().push(ProcessControl {
            link: link.clone(),
            stdout: stdout_far,
            stderr: stderr_far,
            messages: message_tx,
            exit: Some(exit_tx),
        });

        Ok(SpawnedProcess {
            pid: Some(MOCK_PID),
            link,
            stdout: Box::new(stdout_near),
            stderr: Box::new(stderr_near),
            messages,
            exit: exit_rx,
        })
    }
}

/// Telemetry sink that remembers every report.
#[derive(Default)]
pub struct CountingTelemetry {
    pub records: Mutex<Vec<CrashRecord>>,
}

impl CountingTelemetry {
    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

impl TelemetrySink for CountingTelemetry {
    fn report_crash(&self, record: CrashRecord) {
        self.records.lock().unwrap().push(record);
    }
}

pub struct MockContext {
    id: u64,
    destroyed: AtomicBool,
    lifecycle: broadcast::Sender<ContextEvent>,
    pub delivered: Mutex<Vec<(String, String, MessagePort)>>,
}

impl MockContext {
    pub fn new(id: u64) -> Arc<Self> {
        let (lifecycle, _) = broadcast::channel(8);
        Arc::new(Self {
            id,
            destroyed: AtomicBool::new(false),
            lifecycle,
            delivered: Mutex::new(Vec::new()),
        })
    }

    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }

    pub fn emit(&self, event: ContextEvent) {
        let _ = self.lifecycle.send(event);
    }

    pub fn delivery_count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }

    pub fn take_delivery(&self) -> (String, String, MessagePort) {
        self.delivered.lock().unwrap().remove(0)
    }
}

impl OwningContext for MockContext {
    fn id(&self) -> u64 {
        self.id
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn deliver_port(&self, channel: &str, nonce: &str, port: MessagePort) {
        self.delivered
            .lock()
            .unwrap()
            .push((channel.to_string(), nonce.to_string(), port));
    }

    fn lifecycle(&self) -> broadcast::Receiver<ContextEvent> {
        self.lifecycle.subscribe()
    }
}

#[derive(Default)]
pub struct MockRegistry {
    contexts: Mutex<HashMap<u64, Arc<MockContext>>>,
}

impl MockRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, context: Arc<MockContext>) {
        self.contexts.lock().unwrap().insert(context.id, context);
    }
}

impl ContextRegistry for MockRegistry {
    fn resolve(&self, id: u64) -> Option<Arc<dyn OwningContext>> {
        self.contexts
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .map(|context| context as Arc<dyn OwningContext>)
    }
}

pub fn services(spawner: Arc<MockSpawner>, feed: &CrashFeed) -> HostServices {
    HostServices {
        spawner,
        crash_monitor: Arc::new(feed.clone()),
        telemetry: Arc::new(NullTelemetry),
        ids: IdentitySource::new(),
    }
}

pub fn services_with_telemetry(
    spawner: Arc<MockSpawner>,
    feed: &CrashFeed,
    telemetry: Arc<CountingTelemetry>,
) -> HostServices {
    HostServices {
        spawner,
        crash_monitor: Arc::new(feed.clone()),
        telemetry,
        ids: IdentitySource::new(),
    }
}

/// Lets the supervisor's pump tasks drain whatever is already in flight.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Polls `condition` until it holds, panicking after a few seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not reached in time");
}
