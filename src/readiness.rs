// ⏳ Source readiness - wait for upstream extracts to settle
// A source is ready once it exists and its size holds steady across two polls

use crate::config::ReadinessConfig;
use crate::error::{EtlError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct SourceReadiness {
    timeout: Duration,
    poll_interval: Duration,
}

impl SourceReadiness {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        SourceReadiness {
            timeout,
            poll_interval,
        }
    }

    pub fn from_config(config: &ReadinessConfig) -> Self {
        Self::new(config.timeout(), config.poll_interval())
    }

    /// Block until every path is present and stable, or the timeout elapses.
    /// A zero timeout performs a single existence check.
    pub fn wait_for(&self, paths: &[PathBuf]) -> Result<()> {
        let started = Instant::now();
        let mut previous: Option<HashMap<PathBuf, u64>> = None;

        loop {
            let (sizes, missing) = snapshot(paths);

            if missing.is_empty() {
                let settled = self.timeout.is_zero() || previous.as_ref() == Some(&sizes);
                if settled {
                    info!(
                        files = paths.len(),
                        waited_ms = started.elapsed().as_millis() as u64,
                        "Source files ready"
                    );
                    return Ok(());
                }
            }

            if started.elapsed() >= self.timeout {
                if let Some(path) = missing.into_iter().next() {
                    return Err(EtlError::MissingFile { path });
                }
                return Err(EtlError::SourcesNotReady {
                    missing: changed_since(previous.as_ref(), &sizes),
                    waited_secs: started.elapsed().as_secs(),
                });
            }

            debug!(missing = missing.len(), "Waiting for source files");
            previous = Some(sizes);
            thread::sleep(self.poll_interval);
        }
    }
}

fn snapshot(paths: &[PathBuf]) -> (HashMap<PathBuf, u64>, Vec<PathBuf>) {
    let mut sizes = HashMap::new();
    let mut missing = Vec::new();

    for path in paths {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() => {
                sizes.insert(path.clone(), meta.len());
            }
            _ => missing.push(path.clone()),
        }
    }

    (sizes, missing)
}

fn changed_since(previous: Option<&HashMap<PathBuf, u64>>, current: &HashMap<PathBuf, u64>) -> Vec<String> {
    let mut changed: Vec<String> = current
        .iter()
        .filter(|(path, size)| previous.and_then(|p| p.get(*path)) != Some(*size))
        .map(|(path, _)| display(path))
        .collect();
    changed.sort();
    changed
}

fn display(path: &Path) -> String {
    path.display().to_string()
}
