//! Index build progress reporting.
//!
//! Reports observable progress during `mrag build` so users see which phase
//! is running and how much is left. Summarization and embedding can take
//! minutes on a long manual, so those phases carry counts.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// Phase of the build pipeline.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BuildPhase {
    Reading,
    Chunking,
    Summarizing,
    Embedding,
    Saving,
}

impl BuildPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildPhase::Reading => "reading",
            BuildPhase::Chunking => "chunking",
            BuildPhase::Summarizing => "summarizing",
            BuildPhase::Embedding => "embedding",
            BuildPhase::Saving => "saving",
        }
    }
}

/// A single progress event for a build.
#[derive(Clone, Debug)]
pub enum BuildProgressEvent {
    /// A phase with no meaningful count (reading pages, writing files).
    Started { phase: BuildPhase, detail: String },
    /// `n` units processed out of `total`.
    Advanced { phase: BuildPhase, n: u64, total: u64 },
}

/// Reports build progress. Implementations write to stderr (human or JSON).
pub trait BuildProgressReporter: Send + Sync {
    fn report(&self, event: BuildProgressEvent);
}

/// Human-friendly progress on stderr: "build  embedding  128 / 1,024 chunks".
pub struct StderrProgress;

impl BuildProgressReporter for StderrProgress {
    fn report(&self, event: BuildProgressEvent) {
        let line = match &event {
            BuildProgressEvent::Started { phase, detail } => {
                format!("build  {}  {}\n", phase.as_str(), detail)
            }
            BuildProgressEvent::Advanced { phase, n, total } => format!(
                "build  {}  {} / {} {}\n",
                phase.as_str(),
                format_number(*n),
                format_number(*total),
                unit(*phase)
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl BuildProgressReporter for JsonProgress {
    fn report(&self, event: BuildProgressEvent) {
        let obj = match &event {
            BuildProgressEvent::Started { phase, detail } => serde_json::json!({
                "event": "progress",
                "phase": phase.as_str(),
                "detail": detail
            }),
            BuildProgressEvent::Advanced { phase, n, total } => serde_json::json!({
                "event": "progress",
                "phase": phase.as_str(),
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl BuildProgressReporter for NoProgress {
    fn report(&self, _event: BuildProgressEvent) {}
}

fn unit(phase: BuildPhase) -> &'static str {
    match phase {
        BuildPhase::Reading => "pages",
        BuildPhase::Summarizing => "units",
        _ => "chunks",
    }
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn BuildProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn phase_names() {
        assert_eq!(BuildPhase::Embedding.as_str(), "embedding");
        assert_eq!(unit(BuildPhase::Reading), "pages");
        assert_eq!(unit(BuildPhase::Embedding), "chunks");
    }
}
