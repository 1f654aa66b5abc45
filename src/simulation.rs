//! Timer-driven progress simulation.
//!
//! A run advances a bounded counter by a fixed step on every tick and walks
//! through a short log script until it reaches 100. At most one tick timer
//! is alive per engine: starting a new run cancels the previous one.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::error::SimulationError;

/// Time between two ticks.
pub const TICK_INTERVAL: Duration = Duration::from_millis(150);

/// Progress added per tick.
pub const PROGRESS_STEP: u8 = 4;

/// Progress value that ends a run.
pub const PROGRESS_COMPLETE: u8 = 100;

const IDLE_LOG: &str = "Standby for neural initialization...";
const START_LOG: &str = "Initializing Digital Twin...";
const COMPLETE_LOG: &str = "Simulation Complete. Ready for transmission.";

const LOG_SCRIPT: [&str; 4] = [
    "Mapping vascular pathways...",
    "Simulating robotic arm trajectory...",
    "Calibrating neural latency...",
    "Finalizing predictive recovery model...",
];

/// How progress values select lines from the log script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogMapping {
    /// Switch lines when progress is a multiple of 24, picking line
    /// `progress / 25`. Lines change at 24, 48, 72 and 96.
    #[default]
    Parity,
    /// Switch lines whenever progress enters a new quarter. Lines change
    /// at the first tick, 28, 52 and 76 with a 4% step.
    Quartile,
}

/// Observable state of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimulationRun {
    /// Percent complete, `0..=100`.
    pub progress: u8,
    /// Current log line.
    pub log: String,
    /// Whether a run is ticking.
    pub running: bool,
    /// Number of the current run; 0 before the first start.
    pub run: u64,
}

impl SimulationRun {
    fn idle() -> Self {
        Self {
            progress: 0,
            log: IDLE_LOG.to_string(),
            running: false,
            run: 0,
        }
    }

    fn started(run: u64) -> Self {
        Self {
            progress: 0,
            log: START_LOG.to_string(),
            running: true,
            run,
        }
    }

    /// Apply one tick.
    fn advance(&mut self, mapping: LogMapping) {
        let previous = self.progress;
        let next = previous.saturating_add(PROGRESS_STEP).min(PROGRESS_COMPLETE);

        let line = match mapping {
            LogMapping::Parity if next % 24 == 0 => LOG_SCRIPT.get(usize::from(next / 25)),
            LogMapping::Parity => None,
            LogMapping::Quartile => {
                let stage = |p: u8| usize::from(p.saturating_sub(1) / 25).min(LOG_SCRIPT.len() - 1);
                if previous == 0 || stage(next) != stage(previous) {
                    LOG_SCRIPT.get(stage(next))
                } else {
                    None
                }
            }
        };
        if let Some(line) = line {
            self.log = line.to_string();
        }

        self.progress = next;
        if next >= PROGRESS_COMPLETE {
            self.running = false;
            self.log = COMPLETE_LOG.to_string();
        }
    }
}

/// Runs one simulated long computation at a time.
///
/// # Example
///
/// ```rust,no_run
/// use vitalwatch::ProgressEngine;
///
/// #[tokio::main]
/// async fn main() -> Result<(), vitalwatch::SimulationError> {
///     let engine = ProgressEngine::new();
///     let mut progress = engine.subscribe();
///
///     engine.start()?;
///     while progress.changed().await.is_ok() {
///         let run = progress.borrow().clone();
///         println!("{:>3}% {}", run.progress, run.log);
///         if !run.running {
///             break;
///         }
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct ProgressEngine {
    tick: Duration,
    mapping: LogMapping,
    state: Arc<watch::Sender<SimulationRun>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for ProgressEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressEngine {
    /// Create an idle engine with the standard tick and log mapping.
    pub fn new() -> Self {
        Self::with_settings(TICK_INTERVAL, LogMapping::default())
    }

    /// Create an idle engine with a custom tick interval and log mapping.
    pub fn with_settings(tick: Duration, mapping: LogMapping) -> Self {
        let (state, _) = watch::channel(SimulationRun::idle());
        Self {
            tick,
            mapping,
            state: Arc::new(state),
            task: Mutex::new(None),
        }
    }

    /// Start a new run from any state.
    ///
    /// A run already in progress is cancelled first. Outside a tokio
    /// runtime nothing changes and [`SimulationError::NoRuntime`] is
    /// returned.
    pub fn start(&self) -> Result<(), SimulationError> {
        let runtime = Handle::try_current().map_err(|_| SimulationError::NoRuntime)?;

        let mut task = self.task.lock();
        if let Some(previous) = task.take() {
            previous.abort();
        }

        let mut run_id = 0;
        self.state.send_modify(|run| {
            run_id = run.run + 1;
            *run = SimulationRun::started(run_id);
        });
        info!(run = run_id, "Starting progress simulation");

        let state = self.state.clone();
        let tick = self.tick;
        let mapping = self.mapping;

        *task = Some(runtime.spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + tick, tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                let mut finished = false;
                // A tick that belongs to a superseded run changes nothing
                let applied = state.send_if_modified(|run| {
                    if run.run != run_id || !run.running {
                        return false;
                    }
                    run.advance(mapping);
                    finished = !run.running;
                    true
                });

                if finished {
                    info!(run = run_id, "Progress simulation complete");
                }
                if !applied || finished {
                    break;
                }
            }
            debug!(run = run_id, "Progress timer stopped");
        }));
        Ok(())
    }

    /// Snapshot of the current state.
    pub fn current(&self) -> SimulationRun {
        self.state.borrow().clone()
    }

    /// Subscribe to state changes, one per tick.
    pub fn subscribe(&self) -> watch::Receiver<SimulationRun> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.state.borrow().running
    }

    pub fn log_mapping(&self) -> LogMapping {
        self.mapping
    }
}

impl Drop for ProgressEngine {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Log line after each of the 25 ticks of a run.
    fn log_trace(mapping: LogMapping) -> Vec<(u8, String)> {
        let mut run = SimulationRun::started(1);
        let mut trace = Vec::new();
        while run.running {
            run.advance(mapping);
            trace.push((run.progress, run.log.clone()));
        }
        trace
    }

    fn log_changes(mapping: LogMapping) -> Vec<(u8, String)> {
        let mut last = START_LOG.to_string();
        log_trace(mapping)
            .into_iter()
            .filter(|(_, log)| {
                let changed = *log != last;
                last = log.clone();
                changed
            })
            .collect()
    }

    #[test]
    fn test_run_takes_25_ticks() {
        let trace = log_trace(LogMapping::Parity);
        assert_eq!(trace.len(), 25);
        let progress: Vec<u8> = trace.iter().map(|(p, _)| *p).collect();
        let expected: Vec<u8> = (1..=25).map(|i| i * 4).collect();
        assert_eq!(progress, expected);
    }

    #[test]
    fn test_parity_log_steps() {
        assert_eq!(
            log_changes(LogMapping::Parity),
            vec![
                (24, LOG_SCRIPT[0].to_string()),
                (48, LOG_SCRIPT[1].to_string()),
                (72, LOG_SCRIPT[2].to_string()),
                (96, LOG_SCRIPT[3].to_string()),
                (100, COMPLETE_LOG.to_string()),
            ]
        );
    }

    #[test]
    fn test_quartile_log_steps() {
        assert_eq!(
            log_changes(LogMapping::Quartile),
            vec![
                (4, LOG_SCRIPT[0].to_string()),
                (28, LOG_SCRIPT[1].to_string()),
                (52, LOG_SCRIPT[2].to_string()),
                (76, LOG_SCRIPT[3].to_string()),
                (100, COMPLETE_LOG.to_string()),
            ]
        );
    }

    #[test]
    fn test_new_engine_is_idle() {
        let engine = ProgressEngine::new();
        let run = engine.current();
        assert_eq!(run.progress, 0);
        assert_eq!(run.log, IDLE_LOG);
        assert!(!run.running);
        assert_eq!(engine.log_mapping(), LogMapping::Parity);
    }

    #[test]
    fn test_start_outside_runtime_leaves_engine_idle() {
        let engine = ProgressEngine::new();
        assert_eq!(engine.start(), Err(SimulationError::NoRuntime));

        let run = engine.current();
        assert!(!run.running);
        assert_eq!(run.run, 0);
        assert_eq!(run.log, IDLE_LOG);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_completes_after_25_ticks_and_restarts() {
        let engine = ProgressEngine::new();
        engine.start().unwrap();
        assert_eq!(engine.current().log, START_LOG);
        assert!(engine.is_running());

        // Sample half way between ticks
        tokio::time::sleep(Duration::from_millis(75)).await;
        assert_eq!(engine.current().progress, 0);
        for tick in 1..=25u8 {
            tokio::time::sleep(TICK_INTERVAL).await;
            assert_eq!(engine.current().progress, tick * 4);
        }

        let done = engine.current();
        assert!(!done.running);
        assert_eq!(done.log, COMPLETE_LOG);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(engine.current().progress, 100);

        engine.start().unwrap();
        let restarted = engine.current();
        assert_eq!(restarted.progress, 0);
        assert_eq!(restarted.log, START_LOG);
        assert!(restarted.running);
        assert_eq!(restarted.run, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_cancels_previous_timer() {
        let engine = ProgressEngine::new();
        engine.start().unwrap();

        tokio::time::sleep(Duration::from_millis(1575)).await;
        assert_eq!(engine.current().progress, 40);

        engine.start().unwrap();
        assert_eq!(engine.current().progress, 0);

        // Ten ticks of the new run, none of the old one
        tokio::time::sleep(Duration::from_millis(1520)).await;
        assert_eq!(engine.current().progress, 40);
        assert_eq!(engine.current().run, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_start_keeps_single_timer() {
        let engine = ProgressEngine::new();
        engine.start().unwrap();
        engine.start().unwrap();
        engine.start().unwrap();

        tokio::time::sleep(Duration::from_millis(75 + 150 * 5)).await;
        assert_eq!(engine.current().progress, 20);
        assert_eq!(engine.current().run, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_every_tick() {
        let engine = ProgressEngine::with_settings(Duration::from_millis(10), LogMapping::Quartile);
        let mut progress = engine.subscribe();
        engine.start().unwrap();

        let mut seen = Vec::new();
        while progress.changed().await.is_ok() {
            let run = progress.borrow_and_update().clone();
            if run.progress > 0 {
                seen.push(run.progress);
            }
            if !run.running {
                break;
            }
        }

        assert_eq!(seen.len(), 25);
        assert_eq!(seen.last(), Some(&100));
    }
}
