//! Machine telemetry sources.

use crate::error::AgentResult;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::PathBuf;

/// Produces the status document uploaded while `upload_enable` is 1.
pub trait TelemetrySource: Send {
    /// Samples the machine. `None` means the machine is not available.
    fn sample(&mut self) -> AgentResult<Option<Value>>;
}

impl<S: TelemetrySource + ?Sized> TelemetrySource for Box<S> {
    fn sample(&mut self) -> AgentResult<Option<Value>> {
        (**self).sample()
    }
}

/// Returns the same document every time, optionally for a limited number
/// of samples.
#[derive(Debug, Clone)]
pub struct StaticTelemetry {
    document: Value,
    remaining: Option<usize>,
}

impl StaticTelemetry {
    /// Creates a source that is always available.
    pub fn new(document: Value) -> Self {
        Self {
            document,
            remaining: None,
        }
    }

    /// Reports the machine unavailable after `samples` samples.
    pub fn with_limit(mut self, samples: usize) -> Self {
        self.remaining = Some(samples);
        self
    }
}

impl TelemetrySource for StaticTelemetry {
    fn sample(&mut self) -> AgentResult<Option<Value>> {
        match &mut self.remaining {
            Some(0) => Ok(None),
            Some(n) => {
                *n -= 1;
                Ok(Some(self.document.clone()))
            }
            None => Ok(Some(self.document.clone())),
        }
    }
}

/// Reads the status document from a JSON file on every sample.
///
/// A missing file means the machine is not available.
#[derive(Debug, Clone)]
pub struct FileTelemetry {
    path: PathBuf,
}

impl FileTelemetry {
    /// Creates a source reading `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TelemetrySource for FileTelemetry {
    fn sample(&mut self) -> AgentResult<Option<Value>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn static_source_runs_out() {
        let mut source = StaticTelemetry::new(json!({"spindle": 1200})).with_limit(2);

        assert!(source.sample().unwrap().is_some());
        assert!(source.sample().unwrap().is_some());
        assert!(source.sample().unwrap().is_none());
    }

    #[test]
    fn file_source_reads_current_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let mut source = FileTelemetry::new(&path);

        assert!(source.sample().unwrap().is_none());

        std::fs::write(&path, r#"{"Controller": {"Events": {"mode": "AUTOMATIC"}}}"#).unwrap();
        let sample = source.sample().unwrap().unwrap();
        assert_eq!(sample["Controller"]["Events"]["mode"], "AUTOMATIC");

        std::fs::write(&path, "{").unwrap();
        assert!(source.sample().is_err());
    }
}
