// Collection loop: drives the simulation, derives metrics, records rows

mod state;

pub use state::CollectorState;

use crate::config::CollectorConfig;
use crate::error::{CollectorError, EntityQueryFault, SinkError};
use crate::kinematics::{KinematicsEngine, RawEntityState};
use crate::observation::VISIBILITY_UNAVAILABLE;
use crate::simulation::SimulationAdapter;
use crate::sink::{CsvSink, RecordSchema, RecordSink};
use futures::future::join_all;
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[cfg(test)]
mod tests;

/// How a run ended
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum RunOutcome {
    /// Simulation reported no more expected activity
    Completed,
    /// A fatal fault stopped the run; rows collected so far were kept
    Aborted { reason: String },
    /// Shutdown was requested before the simulation finished
    Cancelled,
}

/// Summary of a finished run
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    /// Finalized output location
    pub output: PathBuf,
    /// Steps advanced
    pub steps: u64,
    /// Rows recorded
    pub rows: u64,
    /// Per-entity queries that failed and were skipped
    pub entity_faults: u64,
    pub outcome: RunOutcome,
}

#[derive(Default)]
struct RunStats {
    steps: u64,
    rows: u64,
    entity_faults: u64,
}

/// Drives one collection run against a simulation session
pub struct Collector<S: SimulationAdapter> {
    simulation: S,
    config: CollectorConfig,
    state: CollectorState,
    run_id: Uuid,
}

impl<S: SimulationAdapter> Collector<S> {
    pub fn new(simulation: S, config: CollectorConfig) -> Self {
        Self {
            simulation,
            config,
            state: CollectorState::Idle,
            run_id: Uuid::now_v7(),
        }
    }

    pub fn state(&self) -> CollectorState {
        self.state
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn simulation(&self) -> &S {
        &self.simulation
    }

    /// Run to completion, writing rows to a timestamped file under the
    /// configured output directory.
    ///
    /// The output is finalized and the simulation released on every exit
    /// path. Only a sink that cannot be opened (or finalized) is an `Err`;
    /// simulation faults end as `RunOutcome::Aborted`.
    pub async fn run(
        &mut self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<RunReport, CollectorError> {
        if self.state != CollectorState::Idle {
            return Err(CollectorError::InvalidState(self.state));
        }

        let sink = match CsvSink::open(&self.config.output, RecordSchema::vehicle_tracking()) {
            Ok(sink) => sink,
            Err(e) => {
                error!(run_id = %self.run_id, error = %e, "Cannot open output store, aborting");
                self.transition(CollectorState::Aborted);
                self.release().await;
                self.transition(CollectorState::Finalized);
                return Err(CollectorError::SinkInit(e));
            }
        };

        self.run_with_sink(&sink, shutdown).await
    }

    /// Run to completion against an already opened sink
    pub async fn run_with_sink<K: RecordSink>(
        &mut self,
        sink: &K,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<RunReport, CollectorError> {
        if self.state != CollectorState::Idle {
            return Err(CollectorError::InvalidState(self.state));
        }

        let engine = KinematicsEngine::new(
            self.config.collector.reference_point,
            self.step_length(),
            self.config.history.clone(),
        );

        info!(
            run_id = %self.run_id,
            reference_x = engine.reference_point().x,
            reference_y = engine.reference_point().y,
            step_length_seconds = engine.step_length_seconds(),
            output = %sink.destination().display(),
            "Tracking vehicle distance, speed, acceleration and visibility..."
        );

        self.transition(CollectorState::Running);

        let mut stats = RunStats::default();
        let outcome = self.collect(&engine, sink, &mut shutdown, &mut stats).await;

        match &outcome {
            RunOutcome::Completed => self.transition(CollectorState::Draining),
            RunOutcome::Aborted { reason } => {
                error!(run_id = %self.run_id, step = stats.steps, reason = %reason, "Run aborted");
                self.transition(CollectorState::Aborted);
            }
            RunOutcome::Cancelled => {
                warn!(run_id = %self.run_id, step = stats.steps, "Run cancelled");
                self.transition(CollectorState::Aborted);
            }
        }

        let finalized = sink.finalize();
        self.release().await;
        self.transition(CollectorState::Finalized);

        match finalized {
            Ok(output) => {
                info!(
                    run_id = %self.run_id,
                    steps = stats.steps,
                    rows = stats.rows,
                    entity_faults = stats.entity_faults,
                    "Simulation ended. Data written to: {}",
                    output.display()
                );
                Ok(RunReport {
                    run_id: self.run_id,
                    output,
                    steps: stats.steps,
                    rows: stats.rows,
                    entity_faults: stats.entity_faults,
                    outcome,
                })
            }
            Err(e) => {
                let staging = sink.staging_path().to_path_buf();
                error!(
                    run_id = %self.run_id,
                    error = %e,
                    destination = %sink.destination().display(),
                    "Simulation ended. Output not finalized, data left in: {}",
                    staging.display()
                );
                Err(CollectorError::Finalize { staging, source: e })
            }
        }
    }

    /// Step loop; returns how it ended. Never finalizes.
    ///
    /// Every simulation await races the shutdown signal, so a wedged engine
    /// cannot keep the run from finalizing.
    async fn collect<K: RecordSink>(
        &mut self,
        engine: &KinematicsEngine,
        sink: &K,
        shutdown: &mut watch::Receiver<bool>,
        stats: &mut RunStats,
    ) -> RunOutcome {
        loop {
            if *shutdown.borrow_and_update() {
                return RunOutcome::Cancelled;
            }

            match unless_shutdown(shutdown, self.simulation.has_more_work()).await {
                None => return RunOutcome::Cancelled,
                Some(Ok(true)) => {}
                Some(Ok(false)) => return RunOutcome::Completed,
                Some(Err(e)) => return RunOutcome::Aborted { reason: e.to_string() },
            }

            match unless_shutdown(shutdown, self.simulation.advance_step()).await {
                None => return RunOutcome::Cancelled,
                Some(Ok(())) => {}
                Some(Err(e)) => return RunOutcome::Aborted { reason: e.to_string() },
            }
            stats.steps += 1;
            let step = stats.steps;

            let listed = unless_shutdown(shutdown, self.simulation.list_active_entity_ids()).await;
            let ids = match listed {
                None => return RunOutcome::Cancelled,
                Some(Ok(ids)) => ids,
                Some(Err(e)) => return RunOutcome::Aborted { reason: e.to_string() },
            };

            if ids.is_empty() {
                debug!(step = step, "No active entities, skipping step");
                continue;
            }

            // Rows are appended only after every query of the step has returned
            let recorded = self.collect_step(step, &ids, engine, sink, stats);
            match unless_shutdown(shutdown, recorded).await {
                None => return RunOutcome::Cancelled,
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    return RunOutcome::Aborted {
                        reason: format!("cannot record step {}: {}", step, e),
                    }
                }
            }
        }
    }

    /// Query every listed entity concurrently, then derive and append in
    /// discovery order.
    async fn collect_step<K: RecordSink>(
        &self,
        step: u64,
        ids: &[String],
        engine: &KinematicsEngine,
        sink: &K,
        stats: &mut RunStats,
    ) -> Result<(), SinkError> {
        let attribute_key = self.config.collector.attribute_key.as_deref();
        let queries = ids
            .iter()
            .map(|id| query_entity(&self.simulation, id, attribute_key));
        let results = join_all(queries).await;

        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(raw) => {
                    let observation = engine.derive(step, id, raw);
                    info!("{}", observation.summary());
                    sink.append_row(&observation)?;
                    stats.rows += 1;
                }
                Err(fault) => {
                    warn!(
                        step = step,
                        entity_id = %id,
                        error = %fault,
                        "Error tracking vehicle {}", id
                    );
                    stats.entity_faults += 1;
                }
            }
        }

        Ok(())
    }

    fn step_length(&self) -> f64 {
        match self.config.collector.step_length_seconds {
            Some(len) => len,
            None => {
                let reported = self.simulation.step_length_seconds();
                if reported.is_finite() && reported > 0.0 {
                    reported
                } else {
                    warn!(
                        reported = reported,
                        "Simulation reported an invalid step length, assuming 1s"
                    );
                    1.0
                }
            }
        }
    }

    async fn release(&mut self) {
        if let Err(e) = self.simulation.close().await {
            warn!(run_id = %self.run_id, error = %e, "Failed to close simulation");
        }
    }

    fn transition(&mut self, next: CollectorState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid collector transition {} -> {}",
            self.state,
            next
        );
        debug!(from = %self.state, to = %next, "Collector state change");
        self.state = next;
    }
}

/// Drive `call` to completion unless shutdown is requested first.
///
/// Returns `None` when shutdown wins; `call` is dropped unfinished. Once every
/// sender is gone no signal can arrive, so `call` is simply awaited.
async fn unless_shutdown<F: Future>(
    shutdown: &mut watch::Receiver<bool>,
    call: F,
) -> Option<F::Output> {
    tokio::pin!(call);
    loop {
        tokio::select! {
            output = &mut call => return Some(output),
            changed = shutdown.changed() => match changed {
                Ok(()) if *shutdown.borrow_and_update() => return None,
                Ok(()) => {}
                Err(_) => return Some(call.await),
            },
        }
    }
}

/// Pull one entity's raw state. Position and speed are required; a failed
/// attribute query degrades to `VISIBILITY_UNAVAILABLE`.
async fn query_entity<S: SimulationAdapter>(
    simulation: &S,
    entity_id: &str,
    attribute_key: Option<&str>,
) -> Result<RawEntityState, EntityQueryFault> {
    let (x, y) = simulation.get_position(entity_id).await?;
    let speed_mps = simulation.get_speed(entity_id).await?;

    let visibility = match attribute_key {
        Some(key) => match simulation.get_attribute(entity_id, key).await {
            Ok(value) => value,
            Err(e) => {
                debug!(entity_id = %entity_id, error = %e, "Visibility unavailable");
                VISIBILITY_UNAVAILABLE.to_string()
            }
        },
        None => VISIBILITY_UNAVAILABLE.to_string(),
    };

    Ok(RawEntityState {
        x,
        y,
        speed_mps,
        visibility,
    })
}
