//! Process Supervisor
//!
//! Keeps the bot's run loop alive:
//! - **Running**: a run is in progress in its own task
//! - **Failed**: the run returned an error or panicked
//! - **Backoff**: waiting before the next start
//! - **Stopped**: terminal; completed, interrupted, or out of restarts
//!
//! A shutdown signal during Running or Backoff stops immediately and is not
//! counted as a failure.

use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Supervisor states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SupervisorState {
    /// Not started yet
    Idle = 0,
    Running = 1,
    Failed = 2,
    Backoff = 3,
    Stopped = 4,
}

impl From<u8> for SupervisorState {
    fn from(v: u8) -> Self {
        match v {
            1 => SupervisorState::Running,
            2 => SupervisorState::Failed,
            3 => SupervisorState::Backoff,
            4 => SupervisorState::Stopped,
            _ => SupervisorState::Idle,
        }
    }
}

/// Restart limits
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Failures tolerated before giving up
    pub max_restarts: u32,
    /// Wait between a failure and the next start
    pub backoff: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 100,
            backoff: Duration::from_secs(10),
        }
    }
}

/// Why the supervisor stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// The run returned normally
    Completed,
    /// Shutdown signal received
    Interrupted,
    /// Failure count reached the limit
    GaveUp { failures: u32 },
}

/// Point-in-time counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorStats {
    pub state: SupervisorState,
    pub starts: u32,
    pub failures: u32,
}

pub struct Supervisor {
    state: AtomicU8,
    starts: AtomicU32,
    failures: AtomicU32,
    policy: RestartPolicy,
}

impl Supervisor {
    pub fn new(policy: RestartPolicy) -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(SupervisorState::Idle as u8),
            starts: AtomicU32::new(0),
            failures: AtomicU32::new(0),
            policy,
        })
    }

    pub fn current_state(&self) -> SupervisorState {
        SupervisorState::from(self.state.load(Ordering::Relaxed))
    }

    pub fn stats(&self) -> SupervisorStats {
        SupervisorStats {
            state: self.current_state(),
            starts: self.starts.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    fn transition_to(&self, new_state: SupervisorState) {
        let old = self.state.swap(new_state as u8, Ordering::Relaxed);
        if old != new_state as u8 {
            debug!("Supervisor: {:?} -> {:?}", SupervisorState::from(old), new_state);
        }
    }

    fn stop(&self, exit: SupervisorExit) -> SupervisorExit {
        self.transition_to(SupervisorState::Stopped);
        info!("Supervisor stopped: {:?}", exit);
        exit
    }

    /// Run `factory()` until it completes, the shutdown future resolves, or
    /// the failure limit is reached
    pub async fn run<F, Fut, S>(&self, mut factory: F, shutdown: S) -> SupervisorExit
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            self.transition_to(SupervisorState::Running);
            let attempt = self.starts.fetch_add(1, Ordering::Relaxed) + 1;
            info!("Starting run #{}", attempt);

            // Own task so a panic surfaces as a JoinError
            let mut task = tokio::spawn(factory());

            let outcome = tokio::select! {
                result = &mut task => result,
                _ = &mut shutdown => {
                    task.abort();
                    return self.stop(SupervisorExit::Interrupted);
                }
            };

            let reason = match outcome {
                Ok(Ok(())) => return self.stop(SupervisorExit::Completed),
                Ok(Err(e)) => format!("{:#}", e),
                Err(e) if e.is_panic() => "run panicked".to_string(),
                Err(e) => e.to_string(),
            };

            self.transition_to(SupervisorState::Failed);
            let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
            error!("Run failed ({}/{}): {}", failures, self.policy.max_restarts, reason);

            if failures >= self.policy.max_restarts {
                warn!("Restart limit reached, giving up");
                return self.stop(SupervisorExit::GaveUp { failures });
            }

            self.transition_to(SupervisorState::Backoff);
            info!("Restarting in {:?}", self.policy.backoff);

            tokio::select! {
                _ = tokio::time::sleep(self.policy.backoff) => {}
                _ = &mut shutdown => return self.stop(SupervisorExit::Interrupted),
            }
        }
    }
}
