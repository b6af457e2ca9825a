//! Status sources producing raw dump text.
//!
//! The trait lets the sampler run against the real `wg` binary or a
//! fixed dump in tests.

use std::process::Command;
use thiserror::Error;

/// Errors that can occur while acquiring a status dump.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The program could not be started or its output read.
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        /// Program that was run.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The program exited unsuccessfully.
    #[error("`{program}` exited with {status}: {stderr}")]
    ExitStatus {
        /// Program that was run.
        program: String,
        /// Exit status as reported by the OS.
        status: String,
        /// Trimmed standard error.
        stderr: String,
    },
    /// Standard output is not UTF-8.
    #[error("status output is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
    /// The source has nothing to return.
    #[error("status unavailable: {0}")]
    Unavailable(String),
}

/// Trait for producers of `wg show all dump` style text.
pub trait StatusSource: Send + Sync {
    /// Fetches the current dump. Blocks until the producer is done.
    fn fetch(&self) -> Result<String, SourceError>;
}

/// Runs the WireGuard control tool and captures its standard output.
#[derive(Debug, Clone)]
pub struct CommandSource {
    program: String,
    args: Vec<String>,
}

impl CommandSource {
    /// Creates a source running `program` with `args`.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Returns the program this source runs.
    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Default for CommandSource {
    fn default() -> Self {
        Self::new(
            "wg",
            vec!["show".to_string(), "all".to_string(), "dump".to_string()],
        )
    }
}

impl StatusSource for CommandSource {
    fn fetch(&self) -> Result<String, SourceError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|source| SourceError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(SourceError::ExitStatus {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8(output.stdout)?)
    }
}

/// Source returning a fixed dump, or failing every time.
#[derive(Debug, Clone)]
pub struct StaticSource {
    dump: Option<String>,
}

impl StaticSource {
    /// Creates a source that always returns `dump`.
    pub fn new(dump: impl Into<String>) -> Self {
        Self {
            dump: Some(dump.into()),
        }
    }

    /// Creates a source that always fails.
    pub fn failing() -> Self {
        Self { dump: None }
    }
}

impl StatusSource for StaticSource {
    fn fetch(&self) -> Result<String, SourceError> {
        self.dump
            .clone()
            .ok_or_else(|| SourceError::Unavailable("static source has no dump".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_source() {
        let source = StaticSource::new("wg0\tkey");
        assert_eq!(source.fetch().unwrap(), "wg0\tkey");

        assert!(matches!(
            StaticSource::failing().fetch(),
            Err(SourceError::Unavailable(_))
        ));
    }

    #[test]
    fn test_missing_binary() {
        let source = CommandSource::new("wireguard-exporter-no-such-binary", Vec::new());
        assert!(matches!(source.fetch(), Err(SourceError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_zero_exit() {
        let source = CommandSource::new("sh", vec!["-c".to_string(), "echo nope >&2; exit 3".to_string()]);
        match source.fetch() {
            Err(SourceError::ExitStatus { stderr, .. }) => assert_eq!(stderr, "nope"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_command_output_captured() {
        let source = CommandSource::new("printf", vec!["a\\tb\\n".to_string()]);
        assert_eq!(source.fetch().unwrap(), "a\tb\n");
    }

    #[test]
    fn test_default_runs_wg_dump() {
        let source = CommandSource::default();
        assert_eq!(source.program(), "wg");
        assert_eq!(source.args, vec!["show", "all", "dump"]);
    }
}
