/// Machine-readable run records
/// - JSON statistics file written once per run (`-s`)
/// - CSV trace with one `HH:MM:SS,load,working_set` line per tick (`--trace`)
use crate::config::types::{LimitSpec, ProcessPolicy, Result, SupervisorConfig};
use crate::core::supervisor::{TickObserver, TickReport};
use crate::verdict::verdict::{Outcome, Verdict};
use chrono::{DateTime, Local};
use log::warn;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use uuid::Uuid;

/// Statistics record for one supervised run
#[derive(Debug, Clone, Serialize)]
pub struct StatsRecord {
    pub run_id: String,
    pub command: Vec<String>,
    /// RFC 3339 launch time
    pub started_at: String,
    pub outcome: Outcome,
    pub child_exit_code: Option<i32>,
    pub term_signal: Option<i32>,
    /// What runguard itself exits with
    pub exit_code: i32,
    pub wall_time_ms: u64,
    pub cpu_time_ms: u64,
    pub peak_memory_bytes: u64,
    pub ticks: u64,
    pub detail: Option<String>,
    pub limits: LimitSpec,
    pub process_policy: ProcessPolicy,
}

impl StatsRecord {
    pub fn new(config: &SupervisorConfig, verdict: &Verdict, started_at: DateTime<Local>) -> Self {
        let mut command = vec![config.program.display().to_string()];
        command.extend(config.args.iter().cloned());

        Self {
            run_id: Uuid::new_v4().to_string(),
            command,
            started_at: started_at.to_rfc3339(),
            outcome: verdict.outcome,
            child_exit_code: verdict.child_exit_code,
            term_signal: verdict.term_signal,
            exit_code: verdict.exit_code(config.propagate_exit_code),
            wall_time_ms: verdict.wall_time_ms,
            cpu_time_ms: verdict.cpu_time_ms,
            peak_memory_bytes: verdict.peak_memory_bytes,
            ticks: verdict.ticks,
            detail: verdict.detail.clone(),
            limits: config.limits.clone(),
            process_policy: config.process_policy,
        }
    }

    /// Write as pretty JSON, replacing any existing file.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self).map_err(std::io::Error::from)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        log::info!("Statistics written to {}", path.display());
        Ok(())
    }
}

/// Per-tick CSV trace. Every line is flushed so a killed supervisor still
/// leaves a usable trace behind.
pub struct TraceWriter<W: Write> {
    out: Option<W>,
}

impl TraceWriter<File> {
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self::new(File::create(path)?))
    }
}

impl<W: Write> TraceWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out: Some(out) }
    }

    pub fn line(report: &TickReport, clock: &str) -> String {
        format!(
            "{},{:.6},{}\n",
            clock,
            report.load.unwrap_or(0.0),
            report.working_set_bytes
        )
    }

    pub fn into_inner(self) -> Option<W> {
        self.out
    }
}

impl<W: Write> TickObserver for TraceWriter<W> {
    fn on_tick(&mut self, report: &TickReport) {
        let Some(out) = self.out.as_mut() else {
            return;
        };
        let line = Self::line(report, &Local::now().format("%H:%M:%S").to_string());
        if let Err(e) = out.write_all(line.as_bytes()).and_then(|_| out.flush()) {
            // a broken trace must not take the run down with it
            warn!("Trace disabled after write error: {}", e);
            self.out = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::LimitRequest;
    use crate::core::types::{ChildExit, Phase, RunState};
    use crate::verdict::verdict::VerdictBuilder;
    use std::time::{Duration, Instant};

    fn report(tick: u64, load: Option<f64>, ws: u64) -> TickReport {
        TickReport {
            tick,
            timestamp: Instant::now(),
            wall_time_ms: tick * 20,
            load,
            cpu_time_ms: 0,
            working_set_bytes: ws,
            cumulative_idle_ms: 0,
        }
    }

    #[test]
    fn test_trace_line_format() {
        assert_eq!(
            TraceWriter::<Vec<u8>>::line(&report(2, Some(0.25), 4096), "12:00:01"),
            "12:00:01,0.250000,4096\n"
        );
        assert_eq!(
            TraceWriter::<Vec<u8>>::line(&report(1, None, 0), "12:00:00"),
            "12:00:00,0.000000,0\n"
        );
    }

    #[test]
    fn test_trace_writes_one_line_per_tick() {
        let mut trace = TraceWriter::new(Vec::new());
        trace.on_tick(&report(1, None, 100));
        trace.on_tick(&report(2, Some(1.0), 200));
        let text = String::from_utf8(trace.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].ends_with(",1.000000,200"));
        // HH:MM:SS prefix
        assert_eq!(lines[0].split(',').next().unwrap().len(), 8);
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_trace_write_error_disables_trace() {
        let mut trace = TraceWriter::new(Broken);
        trace.on_tick(&report(1, None, 0));
        trace.on_tick(&report(2, None, 0));
        assert!(trace.into_inner().is_none());
    }

    #[test]
    fn test_stats_record_json() {
        let limits = LimitSpec::new(LimitRequest {
            time_limit_ms: Some(1000),
            ..LimitRequest::default()
        })
        .unwrap();
        let mut config = SupervisorConfig::new("/bin/echo", vec!["hi".to_string()], limits);
        config.propagate_exit_code = true;

        let start = Instant::now();
        let verdict = VerdictBuilder::finalize(
            &RunState::new(start),
            Phase::Completing,
            Some(ChildExit::Exited(4)),
            start + Duration::from_millis(15),
            None,
        );
        let record = StatsRecord::new(&config, &verdict, Local::now());

        let path = std::env::temp_dir().join(format!("runguard-stats-{}.json", record.run_id));
        record.write_to(&path).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(json["outcome"], "completed");
        assert_eq!(json["child_exit_code"], 4);
        assert_eq!(json["exit_code"], 4);
        assert_eq!(json["wall_time_ms"], 15);
        assert_eq!(json["command"][0], "/bin/echo");
        assert_eq!(json["command"][1], "hi");
        assert_eq!(json["limits"]["time_limit_ms"], 1000);
        assert_eq!(json["process_policy"], "deny");
        assert!(DateTime::parse_from_rfc3339(json["started_at"].as_str().unwrap()).is_ok());
        assert_eq!(Uuid::parse_str(json["run_id"].as_str().unwrap()).unwrap().get_version_num(), 4);
    }
}
