//! Run/restart/exit state machine.
//!
//! [`Container::start`] runs the container's process while relaying its
//! output, and optionally restarts it each time a trigger fires:
//!
//! ```text
//! Created -> Running -> {Waiting | Restarting}* -> Exited
//! ```
//!
//! All runtime calls made while starting race a shared cancellation token.
//! The token is a child of the container's exit signal and is cancelled when
//! `start` returns, so firing the exit signal aborts whatever call is in
//! flight. A cancelled call is not a failure: `start` reports it as
//! [`CANCELLED_STATUS`].
//!
//! Log sources hang off the exit signal instead. When the process exits on
//! its own, the last source is drained for up to [`LOG_DRAIN_TIMEOUT`] so
//! output still in flight after `wait` returned is not lost.

use crate::container::handle::{Container, short_id};
use crate::container::logs::{LogMultiplexer, LogSource};
use crate::container::runtime::LogsRequest;
use crate::container::{ContainerError, Result};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Status reported when the caller deliberately stopped the container.
pub const CANCELLED_STATUS: i64 = 128;

/// How long the last log source may keep running after the process exited.
pub const LOG_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Timing knobs for restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicy {
    /// Time the process gets to stop before it is killed
    #[serde(with = "millis")]
    pub grace: Duration,
    /// How far before the new start time log retrieval begins
    #[serde(with = "millis")]
    pub since_backoff: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(1),
            since_backoff: Duration::from_millis(10),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

impl Container {
    /// Start the container and relay its output to `logs` until it exits.
    ///
    /// Every output frame is written to `logs` as `log_prefix` followed by
    /// the frame payload.
    ///
    /// Without a `restart` trigger this returns the process's exit status.
    /// With one, each message on it restarts the process (failures are
    /// logged and retried on the next trigger) and this only returns once
    /// the exit signal fires. Either way, firing the exit signal makes it
    /// return [`CANCELLED_STATUS`] promptly.
    ///
    /// # Errors
    ///
    /// Returns error if the process cannot be started, its logs cannot be
    /// opened, or waiting for it fails for a reason other than cancellation.
    pub async fn start<W>(
        &self,
        log_prefix: &str,
        logs: W,
        restart: Option<mpsc::Receiver<()>>,
    ) -> Result<i64>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let ctx = self.exit.child_token();
        let _cancel_on_drop = ctx.clone().drop_guard();
        let mux = LogMultiplexer::spawn(logs, log_prefix, self.bold_stderr);
        let _stop_logs_on_drop = mux.stopper().drop_guard();

        let result = self.run(&ctx, &mux, restart).await;

        ctx.cancel();
        // Sources close on the exit signal, which also ends the drain early.
        let drain = match &result {
            Ok(status) if *status != CANCELLED_STATUS && !self.exit.is_cancelled() => {
                LOG_DRAIN_TIMEOUT
            }
            _ => Duration::ZERO,
        };
        mux.finish(drain).await;

        match result {
            Err(e) if e.is_cancelled() => {
                debug!("Container {} cancelled", short_id(&self.id));
                Ok(CANCELLED_STATUS)
            }
            other => other,
        }
    }

    async fn run(
        &self,
        ctx: &CancellationToken,
        mux: &LogMultiplexer,
        restart: Option<mpsc::Receiver<()>>,
    ) -> Result<i64> {
        guarded(ctx, self.runtime.start(&self.id)).await?;
        info!("Started container: {}", short_id(&self.id));

        let source = self.open_logs(ctx, LogsRequest::follow()).await?;
        let mut current = source.closer();
        if !deliver(ctx, mux, source).await {
            return Err(handoff_failed(ctx));
        }

        let Some(mut restart) = restart else {
            let status = guarded(ctx, self.runtime.wait(&self.id)).await?;
            info!("Container {} exited with status {}", short_id(&self.id), status);
            return Ok(status);
        };

        let mut attempt = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = self.exit.cancelled() => {
                    info!("Exit requested for container {}", short_id(&self.id));
                    return Ok(CANCELLED_STATUS);
                }
                trigger = restart.recv() => {
                    if trigger.is_none() {
                        debug!("Restart trigger closed; waiting for exit only");
                        self.exit.cancelled().await;
                        return Ok(CANCELLED_STATUS);
                    }
                    attempt += 1;
                    if let Some(next) = self.try_restart(ctx, mux, &current, attempt).await {
                        current = next;
                    }
                }
            }
        }
    }

    /// One restart attempt. Failures are logged and absorbed; on success the
    /// previous log source is closed and replaced, and its close handle
    /// returned.
    async fn try_restart(
        &self,
        ctx: &CancellationToken,
        mux: &LogMultiplexer,
        previous: &CancellationToken,
        attempt: u64,
    ) -> Option<CancellationToken> {
        let id = short_id(&self.id);
        debug!("Restarting container {} (attempt {})", id, attempt);

        if let Err(e) = guarded(ctx, self.runtime.restart(&self.id, self.policy.grace)).await {
            warn!(stage = "restart", attempt, "Restart of {} failed: {}", id, e);
            return None;
        }

        let started_at = match guarded(ctx, self.runtime.inspect_started_at(&self.id)).await {
            Ok(raw) => parse_started_at(&raw),
            Err(e) => {
                warn!(stage = "inspect", attempt, "Inspect of {} failed: {}", id, e);
                return None;
            }
        };

        previous.cancel();
        let backoff = TimeDelta::from_std(self.policy.since_backoff).unwrap_or(TimeDelta::zero());
        let since = started_at - backoff;
        let source = match self.open_logs(ctx, LogsRequest::follow_since(since)).await {
            Ok(source) => source,
            Err(e) => {
                warn!(stage = "logs", attempt, "Reopening logs of {} failed: {}", id, e);
                return None;
            }
        };

        let closer = source.closer();
        if !deliver(ctx, mux, source).await {
            warn!(stage = "logs", attempt, "Log handoff for {} abandoned", id);
            return None;
        }
        info!("Restarted container {} (started at {})", id, started_at);
        Some(closer)
    }

    async fn open_logs(&self, ctx: &CancellationToken, request: LogsRequest) -> Result<LogSource> {
        let reader = guarded(ctx, self.runtime.logs(&self.id, request)).await?;
        Ok(LogSource::new(reader, self.exit.child_token()))
    }
}

/// Run `call` unless `ctx` is cancelled first.
async fn guarded<T>(ctx: &CancellationToken, call: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(ContainerError::Cancelled),
        result = call => result,
    }
}

async fn deliver(ctx: &CancellationToken, mux: &LogMultiplexer, source: LogSource) -> bool {
    tokio::select! {
        biased;
        _ = ctx.cancelled() => false,
        accepted = mux.hand_off(source) => accepted,
    }
}

fn handoff_failed(ctx: &CancellationToken) -> ContainerError {
    if ctx.is_cancelled() {
        ContainerError::Cancelled
    } else {
        ContainerError::runtime_call("logs", "log multiplexer stopped")
    }
}

/// Parse a runtime start time, falling back to the Unix epoch.
pub fn parse_started_at(raw: &str) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(t) => t.with_timezone(&Utc),
        Err(e) => {
            debug!("Unparsable start time '{}': {}", raw, e);
            DateTime::<Utc>::UNIX_EPOCH
        }
    }
}
