use std::sync::{
    atomic::{AtomicUsize, Ordering},
    PoisonError, RwLock,
};

use tokio::sync::watch;

use crate::config::Config;

/// Releases every waiter once the expected number of workers has arrived.
pub struct StartBarrier {
    remaining: AtomicUsize,
    open: watch::Sender<bool>,
}

impl StartBarrier {
    pub fn new(parties: usize) -> Self {
        let (open, _) = watch::channel(parties == 0);
        StartBarrier {
            remaining: AtomicUsize::new(parties),
            open,
        }
    }

    /// Counts one party in. Arrivals past zero are ignored.
    pub fn arrive(&self) {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.open.send_replace(true);
        }
    }

    pub async fn wait(&self) {
        let mut open = self.open.subscribe();
        // the sender lives as long as `self`
        let _ = open.wait_for(|open| *open).await;
    }

    pub async fn arrive_and_wait(&self) {
        self.arrive();
        self.wait().await;
    }

    pub fn is_open(&self) -> bool {
        *self.open.borrow()
    }
}

/// One-shot cancellation broadcast. Firing it more than once is a no-op.
pub struct StopSignal {
    stopped: watch::Sender<bool>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (stopped, _) = watch::channel(false);
        StopSignal { stopped }
    }

    /// Fires the broadcast. Returns true only for the call that actually fired it.
    pub fn stop(&self) -> bool {
        self.stopped.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        })
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }

    pub async fn stopped(&self) {
        let mut stopped = self.stopped.subscribe();
        let _ = stopped.wait_for(|stopped| *stopped).await;
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// What the host probe learned about the target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostInfo {
    pub server: Option<String>,
    pub content_size: Option<u64>,
}

/// State shared by the monitor, the benchmark and every worker for one run.
pub struct RunContext {
    config: Config,
    start: StartBarrier,
    stop: StopSignal,
    host: RwLock<HostInfo>,
}

impl RunContext {
    pub fn new(config: Config) -> Self {
        RunContext {
            start: StartBarrier::new(config.concurrency),
            stop: StopSignal::new(),
            host: RwLock::new(HostInfo::default()),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn start(&self) -> &StartBarrier {
        &self.start
    }

    pub fn stop(&self) -> &StopSignal {
        &self.stop
    }

    pub fn set_server(&self, server: impl Into<String>) {
        let mut host = self.host.write().unwrap_or_else(PoisonError::into_inner);
        host.server = Some(server.into());
    }

    pub fn set_content_size(&self, size: u64) {
        let mut host = self.host.write().unwrap_or_else(PoisonError::into_inner);
        host.content_size = Some(size);
    }

    /// Server banner, `None` until the probe has run.
    pub fn server(&self) -> Option<String> {
        self.host_info().server
    }

    /// Expected body size, `None` until the probe has run.
    pub fn content_size(&self) -> Option<u64> {
        self.host_info().content_size
    }

    pub fn host_info(&self) -> HostInfo {
        self.host
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
