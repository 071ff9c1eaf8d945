//! Per-run summary export.
//!
//! One row per stage, appended to a persistent CSV so successive runs (different
//! seeds, worker counts, configs) can be compared side by side. The header is
//! written only when the file is new.

use csv::WriterBuilder;
use log::info;
use serde::Serialize;
use std::{fs::OpenOptions, path::Path};

use crate::graph::GraphReport;

#[derive(Debug, Serialize)]
struct SummaryRow<'a> {
    run: &'a str,
    stage: &'a str,
    kind: &'static str,
    received: u64,
    published: u64,
    stored: u64,
    overwritten: u64,
    taken: u64,
    empty_takes: u64,
    dispatched: u64,
    faults: u64,
    ticks_fired: u64,
    ticks_skipped: u64,
    discarded: u64,
    injected_mean_ms: Option<f64>,
    age_mean_ms: Option<f64>,
    age_p50_ms: Option<f64>,
    age_p99_ms: Option<f64>,
    age_max_ms: Option<f64>,
}

/// Appends one row per stage of `report` to `path`, labelled with `run`.
pub fn export_summary_csv(path: &Path, report: &GraphReport, run: &str) -> csv::Result<()> {
    let file_exists = path.exists() && path.metadata().map(|m| m.len() > 0).unwrap_or(false);
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut wtr = WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);

    for stage in &report.stages {
        let s = &stage.snapshot;
        let node = report.executor.node(&stage.name).cloned().unwrap_or_default();
        wtr.serialize(SummaryRow {
            run,
            stage: &stage.name,
            kind: stage.kind.as_str(),
            received: s.received,
            published: s.published,
            stored: s.stored,
            overwritten: s.overwritten,
            taken: s.taken,
            empty_takes: s.empty_takes,
            dispatched: node.dispatched,
            faults: node.faults,
            ticks_fired: node.ticks_fired,
            ticks_skipped: node.ticks_skipped,
            discarded: node.discarded,
            injected_mean_ms: s.injected_ms.as_ref().map(|x| x.mean),
            age_mean_ms: s.age_ms.as_ref().map(|x| x.mean),
            age_p50_ms: s.age_ms.as_ref().map(|x| x.p50),
            age_p99_ms: s.age_ms.as_ref().map(|x| x.p99),
            age_max_ms: s.age_ms.as_ref().map(|x| x.max),
        })?;
    }
    wtr.flush()?;
    info!("[export] {} stage rows appended to {}", report.stages.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        graph::{ChannelSummary, StageSummary},
        stages::StageKind,
        substrate::{ExecutorReport, NodeReport},
        utils::metrics::{StageSnapshot, Stats},
    };
    use std::{fs, time::Duration};

    fn report() -> GraphReport {
        GraphReport {
            executor: ExecutorReport {
                nodes: vec![NodeReport {
                    name: "actuator_dummy_node".to_string(),
                    dispatched: 12,
                    completed: 12,
                    ..NodeReport::default()
                }],
                elapsed: Duration::from_secs(1),
            },
            stages: vec![
                StageSummary {
                    name: "actuator_dummy_node".to_string(),
                    kind: StageKind::ActuatorSink,
                    snapshot: StageSnapshot {
                        received: 12,
                        age_ms: Some(Stats {
                            count: 12,
                            mean: 40.0,
                            p50: 38.0,
                            p99: 90.0,
                            max: 95.0,
                        }),
                        ..StageSnapshot::default()
                    },
                },
                StageSummary {
                    name: "sensor_dummy_node".to_string(),
                    kind: StageKind::SensorSource,
                    snapshot: StageSnapshot {
                        published: 12,
                        ..StageSnapshot::default()
                    },
                },
            ],
            channels: vec![ChannelSummary {
                name: "/topic4".to_string(),
                subscribers: 1,
                published: 12,
                dropped: 0,
            }],
        }
    }

    #[test]
    fn header_written_once_rows_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.csv");

        export_summary_csv(&path, &report(), "run-a").unwrap();
        export_summary_csv(&path, &report(), "run-b").unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("run,stage,kind,received"));
        assert_eq!(lines.iter().filter(|l| l.starts_with("run,")).count(), 1);
        assert!(lines[1].starts_with("run-a,actuator_dummy_node,actuator_sink,12,"));
        assert!(lines[1].ends_with(",40.0,38.0,90.0,95.0"));
        // Missing stats serialize as empty fields.
        assert!(lines[2].ends_with(",,,,,"));
        assert!(lines[3].starts_with("run-b,"));
    }

    #[test]
    fn unwritable_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("summary.csv");
        assert!(export_summary_csv(&path, &report(), "run").is_err());
    }
}
