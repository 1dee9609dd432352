use crate::error::{PodError, PodResult};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const TRACE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TraceEvent {
    Header(TraceHeader),
    Stage(TraceStageEvent),
    Footer(TraceFooter),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceHeader {
    pub format_version: u32,
    pub created_unix_ms: u64,
    pub command: String,
    pub case: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStageEvent {
    pub stage: String,
    pub wall_time_ms: f64,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceFooter {
    pub closed_unix_ms: u64,
    pub total_wall_time_ms: f64,
}

/// JSON-lines sink for [`TraceEvent`]s. Opening an existing file appends,
/// so one trace can collect several stage invocations.
pub struct TraceWriter {
    path: PathBuf,
    writer: std::io::BufWriter<std::fs::File>,
    events_written: usize,
    flush_every: usize,
}

impl TraceWriter {
    pub fn create(path: impl AsRef<Path>) -> PodResult<Self> {
        let path = path.as_ref().to_owned();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| PodError::io(&path, err))?;
        Ok(Self {
            path,
            writer: std::io::BufWriter::new(file),
            events_written: 0,
            flush_every: 25,
        })
    }

    pub fn write_event(&mut self, event: &TraceEvent) -> PodResult<()> {
        serde_json::to_writer(&mut self.writer, event)
            .map_err(|err| PodError::json(&self.path, err))?;
        self.writer
            .write_all(b"\n")
            .map_err(|err| PodError::io(&self.path, err))?;
        self.events_written += 1;
        if self.events_written % self.flush_every == 0 {
            let _ = self.writer.flush();
        }
        Ok(())
    }

    pub fn close(mut self) -> PodResult<()> {
        self.writer
            .flush()
            .map_err(|err| PodError::io(&self.path, err))
    }
}

pub fn read_events(path: impl AsRef<Path>) -> PodResult<Vec<TraceEvent>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|err| PodError::io(path, err))?;
    let reader = std::io::BufReader::new(file);

    let mut events = Vec::new();
    for (line_idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|err| PodError::io(path, err))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event = serde_json::from_str(line)
            .map_err(|err| PodError::format(path, line_idx + 1, err.to_string()))?;
        events.push(event);
    }
    Ok(events)
}

pub fn now_unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Wall-clock timer for one pipeline stage.
pub struct StageClock {
    stage: String,
    start: Instant,
}

impl StageClock {
    pub fn start(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn finish(self, detail: Option<String>) -> TraceStageEvent {
        let wall_time_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        log::info!("{} finished in {:.3} ms", self.stage, wall_time_ms);
        TraceStageEvent {
            stage: self.stage,
            wall_time_ms,
            detail,
        }
    }
}

/// Times stages and, when enabled, records them to a trace file. A disabled
/// tracer still logs stage wall times.
pub struct Tracer {
    writer: Option<TraceWriter>,
    start: Instant,
}

impl Tracer {
    pub fn disabled() -> Self {
        Self {
            writer: None,
            start: Instant::now(),
        }
    }

    pub fn to_file(path: impl AsRef<Path>, command: &str, case: &Path) -> PodResult<Self> {
        let mut writer = TraceWriter::create(path)?;
        writer.write_event(&TraceEvent::Header(TraceHeader {
            format_version: TRACE_FORMAT_VERSION,
            created_unix_ms: now_unix_ms(),
            command: command.to_string(),
            case: case.display().to_string(),
        }))?;
        Ok(Self {
            writer: Some(writer),
            start: Instant::now(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.writer.is_some()
    }

    /// Runs `f` as stage `name`. Failed stages are not recorded.
    pub fn stage<T, F>(&mut self, name: &str, f: F) -> PodResult<T>
    where
        F: FnOnce() -> PodResult<T>,
    {
        let clock = StageClock::start(name);
        let out = f()?;
        let event = clock.finish(None);
        if let Some(writer) = self.writer.as_mut() {
            writer.write_event(&TraceEvent::Stage(event))?;
        }
        Ok(out)
    }

    pub fn record(&mut self, event: TraceStageEvent) -> PodResult<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.write_event(&TraceEvent::Stage(event)),
            None => Ok(()),
        }
    }

    pub fn close(self) -> PodResult<()> {
        let total_wall_time_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        log::info!("runtime = {:.3} s", total_wall_time_ms / 1000.0);
        let Some(mut writer) = self.writer else {
            return Ok(());
        };
        writer.write_event(&TraceEvent::Footer(TraceFooter {
            closed_unix_ms: now_unix_ms(),
            total_wall_time_ms,
        }))?;
        writer.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_file_round_trips_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");

        let mut tracer = Tracer::to_file(&path, "basis", Path::new("/tmp/case")).unwrap();
        let n = tracer.stage("basis.eigen", || Ok(3)).unwrap();
        assert_eq!(n, 3);
        tracer
            .record(StageClock::start("basis.write").finish(Some("4 modes".into())))
            .unwrap();
        tracer.close().unwrap();

        let events = read_events(&path).unwrap();
        assert_eq!(events.len(), 4);
        match &events[0] {
            TraceEvent::Header(h) => {
                assert_eq!(h.format_version, TRACE_FORMAT_VERSION);
                assert_eq!(h.command, "basis");
            }
            other => panic!("expected header, got {other:?}"),
        }
        match &events[2] {
            TraceEvent::Stage(s) => {
                assert_eq!(s.stage, "basis.write");
                assert_eq!(s.detail.as_deref(), Some("4 modes"));
            }
            other => panic!("expected stage, got {other:?}"),
        }
        assert!(matches!(events[3], TraceEvent::Footer(_)));
    }

    #[test]
    fn later_invocations_append_to_the_same_trace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");

        for (command, stage) in [("basis", "basis.extract"), ("precompute", "precompute.galerkin")] {
            let mut tracer = Tracer::to_file(&path, command, dir.path()).unwrap();
            tracer.stage(stage, || Ok(())).unwrap();
            tracer.close().unwrap();
        }

        let events = read_events(&path).unwrap();
        assert_eq!(events.len(), 6);
        let commands: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                TraceEvent::Header(h) => Some(h.command.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(commands, ["basis", "precompute"]);
        let stages: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                TraceEvent::Stage(s) => Some(s.stage.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(stages, ["basis.extract", "precompute.galerkin"]);
    }

    #[test]
    fn failed_stage_is_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");

        let mut tracer = Tracer::to_file(&path, "rom", dir.path()).unwrap();
        let err = tracer
            .stage::<(), _>("rom.integrate", || Err(PodError::NoSnapshots))
            .unwrap_err();
        assert!(matches!(err, PodError::NoSnapshots));
        tracer.close().unwrap();

        let events = read_events(&path).unwrap();
        assert!(events.iter().all(|e| !matches!(e, TraceEvent::Stage(_))));
    }

    #[test]
    fn disabled_tracer_still_runs_stages() {
        let mut tracer = Tracer::disabled();
        assert!(!tracer.is_enabled());
        assert_eq!(tracer.stage("noop", || Ok("done")).unwrap(), "done");
        tracer.close().unwrap();
    }

    #[test]
    fn malformed_line_reports_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, "\n{\"type\":\"Nope\"}\n").unwrap();
        let err = read_events(&path).unwrap_err();
        assert!(matches!(err, PodError::Format { line: 2, .. }));
    }
}
