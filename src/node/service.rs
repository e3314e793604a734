use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::info;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use utoipa::ToSchema;

/// Longest uninterrupted sleep inside [`StopSignal::sleep`]
const SLEEP_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Stopped,
    Running,
}

/// Cooperative cancellation flag handed to a background loop
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// The raw flag, for CPU-bound code polling it directly
    pub fn flag(&self) -> &AtomicBool {
        &self.0
    }

    /// Sleeps for `duration` in short slices. Returns false if a stop was
    /// requested in the meantime.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.is_stopped() {
                return false;
            }
            let slice = remaining.min(SLEEP_SLICE);
            tokio::time::sleep(slice).await;
            remaining -= slice;
        }
        !self.is_stopped()
    }
}

struct RunningTask {
    signal: StopSignal,
    handle: JoinHandle<()>,
}

/// A named background loop with `stopped -> running -> stopped` transitions.
///
/// `start` is idempotent. `stop` only raises the loop's [`StopSignal`]; the
/// loop ends at its next check point.
pub struct BackgroundService {
    name: &'static str,
    task: Mutex<Option<RunningTask>>,
}

impl std::fmt::Debug for BackgroundService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundService")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl BackgroundService {
    pub fn new(name: &'static str) -> Self {
        BackgroundService {
            name,
            task: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Spawns `run` unless the service is already running. Returns whether a
    /// new task was started. Must be called from within a tokio runtime.
    pub fn start<F, Fut>(&self, run: F) -> bool
    where
        F: FnOnce(StopSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut task = self.task.lock();
        if let Some(running) = task.as_ref() {
            if !running.signal.is_stopped() && !running.handle.is_finished() {
                return false;
            }
        }

        let signal = StopSignal::new();
        let handle = tokio::spawn(run(signal.clone()));
        *task = Some(RunningTask { signal, handle });

        info!("{} service started", self.name);
        true
    }

    /// Requests a stop. Returns false if the service was not running.
    pub fn stop(&self) -> bool {
        let task = self.task.lock();
        match task.as_ref() {
            Some(running) if !running.signal.is_stopped() && !running.handle.is_finished() => {
                running.signal.stop();
                info!("{} service stop requested", self.name);
                true
            }
            _ => false,
        }
    }

    pub fn state(&self) -> ServiceState {
        match self.task.lock().as_ref() {
            Some(running) if !running.signal.is_stopped() && !running.handle.is_finished() => {
                ServiceState::Running
            }
            _ => ServiceState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServiceState::Running
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let service = BackgroundService::new("test");
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let runs = runs.clone();
            service.start(move |stop| async move {
                runs.fetch_add(1, Ordering::SeqCst);
                while stop.sleep(Duration::from_millis(10)).await {}
            });
        }

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(service.state(), ServiceState::Running);

        assert!(service.stop());
        assert!(!service.stop());
        assert_eq!(service.state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn test_loop_observes_stop() {
        let service = BackgroundService::new("test");
        let finished = Arc::new(AtomicBool::new(false));
        let done = finished.clone();

        service.start(move |stop| async move {
            while stop.sleep(Duration::from_millis(5)).await {}
            done.store(true, Ordering::SeqCst);
        });
        service.stop();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(finished.load(Ordering::SeqCst));
        assert!(service.start(|stop| async move {
            while stop.sleep(Duration::from_millis(5)).await {}
        }));
        assert!(service.is_running());
    }

    #[tokio::test]
    async fn test_sleep_returns_false_when_stopped() {
        let signal = StopSignal::new();
        signal.stop();
        assert!(!signal.sleep(Duration::from_secs(5)).await);
    }
}
