use tokio::sync::broadcast;

use crate::event::TerminationReason;

/// Abnormal-death report from the platform's child-process monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashNotice {
    pub service_name: String,
    pub kind: String,
    pub reason: TerminationReason,
    pub exit_code: i32,
}

/// Source of crash notices. Notices are delivered for every worker the
/// monitor watches; subscribers filter for their own service.
pub trait CrashMonitor: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<CrashNotice>;
}

/// Broadcast-backed crash feed: publishing side for platform backends,
/// monitoring side for supervisors.
///
/// Non-blocking publish with a bounded ring buffer; notices sent while
/// nobody listens are dropped.
#[derive(Clone, Debug)]
pub struct CrashFeed {
    tx: broadcast::Sender<CrashNotice>,
}

impl CrashFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, notice: CrashNotice) {
        let _ = self.tx.send(notice);
    }
}

impl Default for CrashFeed {
    fn default() -> Self {
        Self::new(16)
    }
}

impl CrashMonitor for CrashFeed {
    fn subscribe(&self) -> broadcast::Receiver<CrashNotice> {
        self.tx.subscribe()
    }
}
