use super::*;
use crate::error::SimulationFault;
use crate::observation::Observation;
use crate::simulation::{EntityFrame, Scenario, ScriptedSimulation, StepFrame};
use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tempfile::TempDir;

const VISIBILITY_KEY: &str = "junctionModel.visibility";

fn config(dir: &TempDir) -> CollectorConfig {
    let mut config = CollectorConfig::default();
    config.output.directory = dir.path().to_path_buf();
    config
}

fn no_shutdown() -> watch::Receiver<bool> {
    watch::channel(false).1
}

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

/// A and B at step 1 (0 and 5 m/s), only A at step 2 (10 m/s)
fn meeting_scenario() -> Scenario {
    Scenario::new(vec![
        StepFrame::new(vec![
            EntityFrame::new("A", 0.0, 0.0, 0.0).with_attribute(VISIBILITY_KEY, "25"),
            EntityFrame::new("B", 3.0, 4.0, 5.0),
        ]),
        StepFrame::new(vec![EntityFrame::new("A", 0.0, 0.0, 10.0)]),
    ])
}

#[tokio::test]
async fn test_two_vehicle_scenario() {
    let dir = TempDir::new().unwrap();
    let mut collector = Collector::new(ScriptedSimulation::new(meeting_scenario()), config(&dir));

    let report = collector.run(no_shutdown()).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.steps, 2);
    assert_eq!(report.rows, 3);
    assert_eq!(report.entity_faults, 0);

    let lines = read_lines(&report.output);
    assert_eq!(
        lines,
        vec![
            "Step,VehicleID,PosX,PosY,DistanceToIntersection_m,Speed_kmh,Acceleration_mps2,Visibility",
            "1,A,0.00,0.00,0.00,0.00,0.00,25",
            "1,B,3.00,4.00,5.00,18.00,5.00,unavailable",
            "2,A,0.00,0.00,0.00,36.00,10.00,unavailable",
        ]
    );
}

#[tokio::test]
async fn test_run_finalizes_and_releases() {
    let dir = TempDir::new().unwrap();
    let mut collector = Collector::new(ScriptedSimulation::new(meeting_scenario()), config(&dir));

    assert_eq!(collector.state(), CollectorState::Idle);
    collector.run(no_shutdown()).await.unwrap();

    assert_eq!(collector.state(), CollectorState::Finalized);
    assert!(collector.simulation().is_closed());
}

#[tokio::test]
async fn test_no_work_yields_header_only_output() {
    let dir = TempDir::new().unwrap();
    let mut collector = Collector::new(ScriptedSimulation::new(Scenario::new(vec![])), config(&dir));

    let report = collector.run(no_shutdown()).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.steps, 0);
    assert_eq!(report.rows, 0);
    assert_eq!(read_lines(&report.output).len(), 1);
    assert!(collector.simulation().is_closed());
}

#[tokio::test]
async fn test_simulation_fault_keeps_collected_rows() {
    let dir = TempDir::new().unwrap();
    let scenario = Scenario::new(vec![
        StepFrame::new(vec![EntityFrame::new("v0", 1.0, 0.0, 2.0)]),
        StepFrame::new(vec![EntityFrame::new("v0", 2.0, 0.0, 3.0)]),
        StepFrame::new(vec![EntityFrame::new("v0", 3.0, 0.0, 4.0)]),
    ])
    .with_crash_at_step(3);
    let mut collector = Collector::new(ScriptedSimulation::new(scenario), config(&dir));

    let report = collector.run(no_shutdown()).await.unwrap();

    match &report.outcome {
        RunOutcome::Aborted { reason } => assert!(reason.contains("step 3")),
        other => panic!("expected abort, got {:?}", other),
    }
    assert_eq!(report.steps, 2);
    assert_eq!(report.rows, 2);

    let lines = read_lines(&report.output);
    assert_eq!(lines.len(), 3);
    assert!(lines[2].starts_with("2,v0,"));
    assert!(collector.simulation().is_closed());
    assert_eq!(collector.state(), CollectorState::Finalized);
}

#[tokio::test]
async fn test_vanished_entity_skipped_and_counted() {
    let dir = TempDir::new().unwrap();
    let scenario = Scenario::new(vec![
        StepFrame::new(vec![
            EntityFrame::new("a", 0.0, 0.0, 1.0),
            EntityFrame::new("b", 0.0, 0.0, 2.0).vanished(),
            EntityFrame::new("c", 0.0, 0.0, 3.0),
        ]),
        StepFrame::new(vec![EntityFrame::new("b", 0.0, 0.0, 6.0)]),
    ]);
    let mut collector = Collector::new(ScriptedSimulation::new(scenario), config(&dir));

    let report = collector.run(no_shutdown()).await.unwrap();

    assert_eq!(report.rows, 3);
    assert_eq!(report.entity_faults, 1);

    let lines = read_lines(&report.output);
    assert!(lines[1].starts_with("1,a,"));
    assert!(lines[2].starts_with("1,c,"));
    // b was never derived, so it starts from zero at step 2
    assert_eq!(lines[3], "2,b,0.00,0.00,0.00,21.60,6.00,unavailable");
}

#[tokio::test]
async fn test_empty_step_emits_no_rows() {
    let dir = TempDir::new().unwrap();
    let scenario = Scenario::new(vec![
        StepFrame::default(),
        StepFrame::new(vec![EntityFrame::new("a", 0.0, 0.0, 1.0)]),
    ]);
    let mut collector = Collector::new(ScriptedSimulation::new(scenario), config(&dir));

    let report = collector.run(no_shutdown()).await.unwrap();

    assert_eq!(report.steps, 2);
    assert_eq!(report.rows, 1);
    assert!(read_lines(&report.output)[1].starts_with("2,a,"));
}

#[tokio::test]
async fn test_shutdown_cancels_and_finalizes() {
    let dir = TempDir::new().unwrap();
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let mut collector = Collector::new(ScriptedSimulation::new(meeting_scenario()), config(&dir));
    let report = collector.run(rx).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(report.steps, 0);
    assert!(report.output.exists());
    assert!(collector.simulation().is_closed());
}

#[tokio::test]
async fn test_sink_init_failure_is_fatal() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("occupied");
    fs::write(&blocker, b"x").unwrap();

    let mut cfg = config(&dir);
    cfg.output.directory = blocker;
    let mut collector = Collector::new(ScriptedSimulation::new(meeting_scenario()), cfg);

    let result = collector.run(no_shutdown()).await;

    assert!(matches!(result, Err(CollectorError::SinkInit(_))));
    assert!(collector.simulation().is_closed());
    assert_eq!(collector.simulation().steps_advanced(), 0);
}

#[tokio::test]
async fn test_second_run_rejected() {
    let dir = TempDir::new().unwrap();
    let mut collector = Collector::new(ScriptedSimulation::new(meeting_scenario()), config(&dir));

    collector.run(no_shutdown()).await.unwrap();
    let result = collector.run(no_shutdown()).await;

    assert!(matches!(
        result,
        Err(CollectorError::InvalidState(CollectorState::Finalized))
    ));
}

#[tokio::test]
async fn test_step_length_from_simulation() {
    let dir = TempDir::new().unwrap();
    let mut scenario = Scenario::new(vec![
        StepFrame::new(vec![EntityFrame::new("a", 0.0, 0.0, 1.0)]),
        StepFrame::new(vec![EntityFrame::new("a", 0.0, 0.0, 2.0)]),
    ]);
    scenario.step_length_seconds = 0.5;
    let mut collector = Collector::new(ScriptedSimulation::new(scenario), config(&dir));

    let report = collector.run(no_shutdown()).await.unwrap();
    let lines = read_lines(&report.output);

    assert!(lines[1].ends_with(",2.00,unavailable"));
    assert!(lines[2].ends_with(",2.00,unavailable"));
}

#[tokio::test]
async fn test_configured_step_length_overrides_simulation() {
    let dir = TempDir::new().unwrap();
    let mut scenario = Scenario::new(vec![StepFrame::new(vec![EntityFrame::new(
        "a", 0.0, 0.0, 3.0,
    )])]);
    scenario.step_length_seconds = 0.5;

    let mut cfg = config(&dir);
    cfg.collector.step_length_seconds = Some(1.0);
    let mut collector = Collector::new(ScriptedSimulation::new(scenario), cfg);

    let report = collector.run(no_shutdown()).await.unwrap();
    assert!(read_lines(&report.output)[1].ends_with(",3.00,unavailable"));
}

#[tokio::test]
async fn test_reference_point_and_disabled_attribute() {
    let dir = TempDir::new().unwrap();
    let scenario = Scenario::new(vec![StepFrame::new(vec![EntityFrame::new(
        "a", 13.0, 14.0, 0.0,
    )
    .with_attribute(VISIBILITY_KEY, "80")])]);

    let mut cfg = config(&dir);
    cfg.collector.reference_point = crate::kinematics::ReferencePoint { x: 10.0, y: 10.0 };
    cfg.collector.attribute_key = None;
    let mut collector = Collector::new(ScriptedSimulation::new(scenario), cfg);

    let report = collector.run(no_shutdown()).await.unwrap();
    assert_eq!(
        read_lines(&report.output)[1],
        "1,a,13.00,14.00,5.00,0.00,0.00,unavailable"
    );
}

/// Sink whose appends always fail; records whether it was finalized
#[derive(Default)]
struct BrokenSink {
    finalized: AtomicBool,
    attempts: AtomicU64,
}

impl RecordSink for BrokenSink {
    fn append_row(&self, _observation: &Observation) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SinkError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk full",
        )))
    }

    fn finalize(&self) -> Result<PathBuf, SinkError> {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return Err(SinkError::AlreadyFinalized);
        }
        Ok(PathBuf::from("broken.csv"))
    }

    fn rows_written(&self) -> u64 {
        0
    }

    fn destination(&self) -> &Path {
        Path::new("broken.csv")
    }
}

#[tokio::test]
async fn test_append_failure_aborts_but_still_finalizes() {
    let sink = BrokenSink::default();
    let mut collector = Collector::new(
        ScriptedSimulation::new(meeting_scenario()),
        CollectorConfig::default(),
    );

    let report = collector.run_with_sink(&sink, no_shutdown()).await.unwrap();

    assert!(matches!(report.outcome, RunOutcome::Aborted { .. }));
    assert_eq!(report.steps, 1);
    assert_eq!(report.rows, 0);
    assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);
    assert!(sink.finalized.load(Ordering::SeqCst));
    assert!(collector.simulation().is_closed());
}

/// Sink that accepts rows but can never be finalized
struct UnfinalizableSink;

impl RecordSink for UnfinalizableSink {
    fn append_row(&self, _observation: &Observation) -> Result<(), SinkError> {
        Ok(())
    }

    fn finalize(&self) -> Result<PathBuf, SinkError> {
        Err(SinkError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only filesystem",
        )))
    }

    fn rows_written(&self) -> u64 {
        0
    }

    fn destination(&self) -> &Path {
        Path::new("run.csv")
    }

    fn staging_path(&self) -> &Path {
        Path::new("run.csv.tmp")
    }
}

#[tokio::test]
async fn test_finalize_failure_reports_staging_location() {
    let mut collector = Collector::new(
        ScriptedSimulation::new(meeting_scenario()),
        CollectorConfig::default(),
    );

    let result = collector.run_with_sink(&UnfinalizableSink, no_shutdown()).await;

    match result {
        Err(CollectorError::Finalize { staging, .. }) => {
            assert_eq!(staging, PathBuf::from("run.csv.tmp"))
        }
        other => panic!("expected finalize error, got {:?}", other),
    }
    assert!(collector.simulation().is_closed());
    assert_eq!(collector.state(), CollectorState::Finalized);
}

/// Answers one step, then never returns from the next `advance_step`
#[derive(Default)]
struct WedgedSimulation {
    advanced: u64,
    closed: bool,
}

#[async_trait]
impl SimulationAdapter for WedgedSimulation {
    async fn has_more_work(&self) -> Result<bool, SimulationFault> {
        Ok(true)
    }

    async fn advance_step(&mut self) -> Result<(), SimulationFault> {
        if self.advanced >= 1 {
            std::future::pending::<()>().await;
        }
        self.advanced += 1;
        Ok(())
    }

    async fn list_active_entity_ids(&self) -> Result<Vec<String>, SimulationFault> {
        Ok(vec!["veh_0".to_string()])
    }

    async fn get_position(&self, _entity_id: &str) -> Result<(f64, f64), EntityQueryFault> {
        Ok((3.0, 4.0))
    }

    async fn get_speed(&self, _entity_id: &str) -> Result<f64, EntityQueryFault> {
        Ok(2.0)
    }

    async fn get_attribute(&self, entity_id: &str, key: &str) -> Result<String, EntityQueryFault> {
        Err(EntityQueryFault::AttributeUnsupported {
            entity_id: entity_id.to_string(),
            key: key.to_string(),
        })
    }

    async fn close(&mut self) -> Result<(), SimulationFault> {
        self.closed = true;
        Ok(())
    }
}

fn dir_names(dir: &TempDir) -> Vec<String> {
    fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect()
}

#[tokio::test]
async fn test_shutdown_interrupts_wedged_simulation() {
    let dir = TempDir::new().unwrap();
    let (tx, rx) = watch::channel(false);
    let mut collector = Collector::new(WedgedSimulation::default(), config(&dir));

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
    });

    let report = tokio::time::timeout(Duration::from_secs(5), collector.run(rx))
        .await
        .expect("shutdown did not interrupt the pending step")
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(report.steps, 1);
    assert_eq!(report.rows, 1);
    assert_eq!(
        read_lines(&report.output)[1],
        "1,veh_0,3.00,4.00,5.00,7.20,2.00,unavailable"
    );
    assert_eq!(dir_names(&dir).len(), 1);
    assert!(collector.simulation().closed);
    assert_eq!(collector.state(), CollectorState::Finalized);
}

#[tokio::test]
async fn test_dropped_run_leaves_finalized_output() {
    let dir = TempDir::new().unwrap();
    let (_tx, rx) = watch::channel(false);
    let mut collector = Collector::new(WedgedSimulation::default(), config(&dir));

    let result = tokio::time::timeout(Duration::from_millis(200), collector.run(rx)).await;
    assert!(result.is_err());

    let names = dir_names(&dir);
    assert_eq!(names.len(), 1);
    assert!(names[0].ends_with(".csv"));

    let lines = read_lines(&dir.path().join(&names[0]));
    assert_eq!(lines.len(), 2);
    assert!(lines[1].starts_with("1,veh_0,"));
}
