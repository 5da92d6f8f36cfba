//! Polling scheduler
//!
//! A single tokio task owns the [`SessionManager`] and runs one tick per
//! interval: get a session, read the planned attributes, match them against
//! the mappings and hand every observation to the emitter. Ticks never run
//! concurrently.
//!
//! State machine: `Idle → Running → Draining → Stopped`.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::connection::ReadRequest;
use crate::emitter::Emitter;
use crate::error::SchedulerError;
use crate::mapping::MappingRegistry;
use crate::metrics::ScrapeStats;
use crate::session::SessionManager;

/// Time an in-flight tick gets to finish after `shutdown()`
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(5_000);

/// Upper bound on waiting for a force-cancelled tick to unwind
const ABORT_WAIT: Duration = Duration::from_secs(1);

/// Scheduler lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    Idle = 0,
    Running = 1,
    Draining = 2,
    Stopped = 3,
}

impl SchedulerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SchedulerState::Idle,
            1 => SchedulerState::Running,
            2 => SchedulerState::Draining,
            _ => SchedulerState::Stopped,
        }
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Running => "running",
            SchedulerState::Draining => "draining",
            SchedulerState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Everything a tick needs, moved into the scheduler task
struct TickContext {
    sessions: SessionManager,
    registry: Arc<MappingRegistry>,
    requests: Vec<ReadRequest>,
    emitter: Arc<dyn Emitter>,
    stats: Arc<ScrapeStats>,
    endpoint: String,
}

impl TickContext {
    async fn tick(&mut self) {
        let started = Instant::now();
        self.stats.record_tick();

        let had_session = self.sessions.has_session();
        let session = match self.sessions.current_session().await {
            Ok(session) => {
                if !had_session {
                    self.stats.record_connect(true);
                }
                session
            }
            Err(e) => {
                self.stats.record_connect(false);
                self.stats.record_skipped();
                warn!(endpoint = %self.endpoint, error = %e, "No session available, skipping tick");
                return;
            }
        };

        let results = match session.read(&self.requests).await {
            Ok(results) => results,
            Err(e) => {
                self.stats.record_read_failure();
                self.stats.record_skipped();
                warn!(endpoint = %e.endpoint(), error = %e, "Read failed, session marked stale");
                self.sessions.invalidate();
                return;
            }
        };

        let observations = self
            .registry
            .match_against_read_results(&results, SystemTime::now());
        let count = observations.len();
        self.emitter.begin_tick();
        for observation in observations {
            self.emitter.emit(observation);
        }
        self.emitter.end_tick();

        let elapsed = started.elapsed();
        self.stats.record_tick_done(count, elapsed.as_secs_f64());
        debug!(
            endpoint = %self.endpoint,
            beans = results.len(),
            observations = count,
            duration_ms = elapsed.as_millis() as u64,
            "Tick complete"
        );
    }
}

/// Fixed-rate poll loop with a bounded, cooperative shutdown
pub struct PollingScheduler {
    interval: Duration,
    grace_period: Duration,
    state: Arc<AtomicU8>,
    stats: Arc<ScrapeStats>,
    context: Option<TickContext>,
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl fmt::Debug for PollingScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingScheduler")
            .field("interval", &self.interval)
            .field("grace_period", &self.grace_period)
            .field("state", &self.state())
            .finish()
    }
}

impl PollingScheduler {
    pub fn new(
        sessions: SessionManager,
        registry: Arc<MappingRegistry>,
        emitter: Arc<dyn Emitter>,
        interval: Duration,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let stats = Arc::new(ScrapeStats::new());
        let endpoint = sessions.builder().descriptor().address();
        let requests = registry.attributes_to_read();

        Self {
            interval,
            grace_period: DEFAULT_GRACE_PERIOD,
            state: Arc::new(AtomicU8::new(SchedulerState::Idle as u8)),
            stats: Arc::clone(&stats),
            context: Some(TickContext {
                sessions,
                registry,
                requests,
                emitter,
                stats,
                endpoint,
            }),
            shutdown_tx,
            handle: None,
        }
    }

    /// Override the drain grace period
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Share counters, e.g. with the Prometheus emitter
    pub fn with_stats(mut self, stats: Arc<ScrapeStats>) -> Self {
        if let Some(context) = &mut self.context {
            context.stats = Arc::clone(&stats);
        }
        self.stats = stats;
        self
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn stats(&self) -> &Arc<ScrapeStats> {
        &self.stats
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn set_state(&self, state: SchedulerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Start ticking: the first tick runs immediately, then every interval
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// [`SchedulerError::InvalidState`] unless the scheduler is idle.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        let state = self.state();
        let context = match (state, self.context.take()) {
            (SchedulerState::Idle, Some(context)) => context,
            (_, context) => {
                self.context = context;
                return Err(SchedulerError::InvalidState(state.to_string()));
            }
        };

        let period = self.interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let state_cell = Arc::clone(&self.state);

        info!(
            endpoint = %context.endpoint,
            interval_ms = period.as_millis() as u64,
            requests = context.requests.len(),
            mappings = context.registry.len(),
            "Starting polling scheduler"
        );

        self.set_state(SchedulerState::Running);
        self.handle = Some(tokio::spawn(async move {
            let mut context = context;
            let mut ticker = tokio::time::interval(period);
            // late ticks fire back-to-back to keep the nominal fixed-rate schedule
            ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        let state = SchedulerState::from_u8(state_cell.load(Ordering::SeqCst));
                        if state != SchedulerState::Running {
                            break;
                        }
                        context.tick().await;
                    }
                }
            }

            context.sessions.close();
            debug!("Scheduler task finished");
        }));

        Ok(())
    }

    /// Stop future ticks and wait, bounded, for the in-flight one
    ///
    /// If the tick does not finish within the grace period the task is
    /// cancelled, which drops the session and closes its connections.
    /// Calling this again after the scheduler stopped is a no-op.
    pub async fn shutdown(&mut self) {
        match self.state() {
            SchedulerState::Stopped => return,
            SchedulerState::Idle => {
                if let Some(mut context) = self.context.take() {
                    context.sessions.close();
                }
                self.set_state(SchedulerState::Stopped);
                return;
            }
            _ => {}
        }

        self.set_state(SchedulerState::Draining);
        info!(grace_ms = self.grace_period.as_millis() as u64, "Draining scheduler");
        let _ = self.shutdown_tx.send(true);

        if let Some(mut handle) = self.handle.take() {
            match tokio::time::timeout(self.grace_period, &mut handle).await {
                Ok(Ok(())) => debug!("In-flight tick drained"),
                Ok(Err(e)) => warn!(error = %e, "Scheduler task ended abnormally"),
                Err(_) => {
                    warn!(
                        grace_ms = self.grace_period.as_millis() as u64,
                        "In-flight tick did not finish in time, cancelling"
                    );
                    handle.abort();
                    if tokio::time::timeout(ABORT_WAIT, handle).await.is_err() {
                        warn!("Cancelled tick did not unwind in time");
                    }
                }
            }
        }

        self.set_state(SchedulerState::Stopped);
        info!("Scheduler stopped");
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
