//! Logging setup, stage timing and run observers.

use std::sync::OnceLock;
use std::time::Instant;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::retry::RetryAttempt;
use crate::run::RunState;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Output encoding for structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` overrides the default `info` filter. Calls after the first
/// successful one are no-ops.
pub fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    if TRACING_INIT.get().is_some() {
        return Ok(());
    }

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| anyhow::anyhow!("tracing setup failed: {e}"))?,
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| anyhow::anyhow!("tracing setup failed: {e}"))?,
    }

    let _ = TRACING_INIT.set(());
    Ok(())
}

/// Simple stage timing helper.
#[derive(Debug)]
pub struct RunTimer {
    start: Instant,
    name: &'static str,
}

impl RunTimer {
    /// Starts timing a stage.
    #[must_use]
    pub fn start(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the stage name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stops the timer, returning the stage name and duration.
    #[must_use]
    pub fn finish(self) -> (&'static str, f64) {
        (self.name, self.elapsed_ms())
    }
}

/// Summary of one finished extract batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    /// Zero-based batch index.
    pub index: usize,
    /// URLs in the batch.
    pub size: usize,
    /// URLs with content.
    pub succeeded: usize,
    /// URLs recorded as errors.
    pub failed: usize,
    /// Attempts made for the batch call.
    pub attempts: usize,
    /// Wall time of the batch, in milliseconds.
    pub duration_ms: f64,
}

/// Observer for run progress.
///
/// Implementations must not block; they are called inline from the
/// orchestrator.
pub trait RunObserver: Send + Sync {
    /// Called after every state transition.
    fn on_state_change(&self, run_id: &str, from: RunState, to: RunState);

    /// Called before a retry sleeps.
    fn on_retry(&self, run_id: &str, attempt: &RetryAttempt<'_>);

    /// Called when an extract batch has been reconciled.
    fn on_batch_complete(&self, run_id: &str, report: &BatchReport);
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpRunObserver;

impl RunObserver for NoOpRunObserver {
    fn on_state_change(&self, _run_id: &str, _from: RunState, _to: RunState) {}

    fn on_retry(&self, _run_id: &str, _attempt: &RetryAttempt<'_>) {}

    fn on_batch_complete(&self, _run_id: &str, _report: &BatchReport) {}
}

/// Observer that logs through `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingRunObserver {
    level: Level,
}

impl Default for LoggingRunObserver {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingRunObserver {
    /// Creates a logging observer at the given level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level observer.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl RunObserver for LoggingRunObserver {
    fn on_state_change(&self, run_id: &str, from: RunState, to: RunState) {
        if self.level == Level::DEBUG {
            tracing::debug!(run_id, from = %from, to = %to, "Run state changed");
        } else {
            tracing::info!(run_id, from = %from, to = %to, "Run state changed");
        }
    }

    fn on_retry(&self, run_id: &str, attempt: &RetryAttempt<'_>) {
        tracing::warn!(
            run_id,
            key = attempt.key,
            attempt = attempt.attempt,
            delay_ms = u64::try_from(attempt.delay.as_millis()).unwrap_or(u64::MAX),
            error = %attempt.error,
            "Retrying service call"
        );
    }

    fn on_batch_complete(&self, run_id: &str, report: &BatchReport) {
        if self.level == Level::DEBUG {
            tracing::debug!(
                run_id,
                batch = report.index,
                size = report.size,
                succeeded = report.succeeded,
                failed = report.failed,
                attempts = report.attempts,
                duration_ms = report.duration_ms,
                "Extract batch complete"
            );
        } else {
            tracing::info!(
                run_id,
                batch = report.index,
                size = report.size,
                succeeded = report.succeeded,
                failed = report.failed,
                attempts = report.attempts,
                duration_ms = report.duration_ms,
                "Extract batch complete"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ResearchError;
    use std::time::Duration;

    #[test]
    fn test_run_timer() {
        let timer = RunTimer::start("search");
        std::thread::sleep(Duration::from_millis(2));
        assert!(timer.elapsed_ms() >= 1.0);
        let (name, ms) = timer.finish();
        assert_eq!(name, "search");
        assert!(ms >= 1.0);
    }

    #[test]
    fn test_init_tracing_twice_is_ok() {
        assert!(init_tracing(LogFormat::Text).is_ok());
        assert!(init_tracing(LogFormat::Json).is_ok());
    }

    #[test]
    fn test_observers_accept_events() {
        let error = ResearchError::transport("timed out");
        let attempt = RetryAttempt {
            key: "search",
            attempt: 1,
            delay: Duration::from_millis(5),
            error: &error,
        };
        let report = BatchReport {
            index: 0,
            size: 10,
            succeeded: 9,
            failed: 1,
            attempts: 1,
            duration_ms: 12.5,
        };

        let observers: Vec<Box<dyn RunObserver>> = vec![
            Box::new(NoOpRunObserver),
            Box::new(LoggingRunObserver::default()),
            Box::new(LoggingRunObserver::debug()),
        ];
        for observer in observers {
            observer.on_state_change("run", RunState::Idle, RunState::Searching);
            observer.on_retry("run", &attempt);
            observer.on_batch_complete("run", &report);
        }
    }
}
