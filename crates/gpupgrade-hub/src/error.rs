//! Hub errors and the aggregate that attributes each failure to a host,
//! a phase or finalization.

use std::fmt;
use std::io;
use std::path::PathBuf;

use gpupgrade_core::errors::{AgentError, ClusterError, DbError, PlanError, StreamError};

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("step {running} is already in progress in {}", state_dir.display())]
    StepAlreadyInProgress { running: String, state_dir: PathBuf },

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("{tool}: {reason}")]
    Subprocess { tool: String, reason: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("persist outcome of step {step}: {source}")]
    Finalize {
        step: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("panicked: {0}")]
    Panicked(String),

    #[error("step {step} was dropped before it finished")]
    Abandoned { step: String },

    #[error(transparent)]
    Aggregate(#[from] MultiError),
}

impl HubError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Short classification string for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StepAlreadyInProgress { .. } => "reentrancy",
            Self::Plan(_) | Self::Cluster(_) | Self::Config(_) => "planning",
            Self::Agent(_) | Self::Stream(_) | Self::Db(_) => "connectivity",
            Self::Subprocess { .. } => "subprocess",
            Self::Finalize { .. } => "finalization",
            Self::Io { .. } => "io",
            Self::Panicked(_) | Self::Abandoned { .. } => "internal",
            Self::Aggregate(_) => "aggregate",
        }
    }
}

/// What a failure is attributed to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorSource {
    Host(String),
    Phase(String),
    Finalize,
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host(host) => write!(f, "host {host}"),
            Self::Phase(phase) => f.write_str(phase),
            Self::Finalize => f.write_str("finalize"),
        }
    }
}

#[derive(Debug)]
pub struct Failure {
    pub source: ErrorSource,
    pub error: HubError,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source, self.error)
    }
}

/// Ordered collection of attributed failures. Appending never replaces an
/// earlier entry.
#[derive(Debug, Default)]
pub struct MultiError {
    failures: Vec<Failure>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, source: ErrorSource, error: impl Into<HubError>) {
        self.failures.push(Failure {
            source,
            error: error.into(),
        });
    }

    pub fn extend(&mut self, other: MultiError) {
        self.failures.extend(other.failures);
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    /// Hosts named anywhere in the failure tree, in order of appearance.
    pub fn hosts(&self) -> Vec<&str> {
        let mut hosts = Vec::new();
        for failure in &self.failures {
            if let ErrorSource::Host(host) = &failure.source {
                hosts.push(host.as_str());
            }
            if let HubError::Aggregate(inner) = &failure.error {
                hosts.extend(inner.hosts());
            }
        }
        hosts
    }

    pub fn into_result(self) -> Result<(), MultiError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plural = if self.failures.len() == 1 { "" } else { "s" };
        writeln!(f, "{} error{plural} occurred:", self.failures.len())?;
        for failure in &self.failures {
            let text = failure.to_string();
            let mut lines = text.lines();
            if let Some(first) = lines.next() {
                writeln!(f, "\t* {first}")?;
            }
            for line in lines {
                writeln!(f, "\t  {line}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc_failure(host: &str) -> AgentError {
        AgentError::Rpc {
            host: host.into(),
            method: "DeleteDataDirectories",
            message: "disk on fire".into(),
        }
    }

    #[test]
    fn push_preserves_order_and_attribution() {
        let mut errs = MultiError::new();
        errs.push(ErrorSource::Host("sdw1".into()), rpc_failure("sdw1"));
        errs.push(ErrorSource::Finalize, HubError::Config("bad".into()));

        assert_eq!(errs.len(), 2);
        assert_eq!(errs.failures()[0].source, ErrorSource::Host("sdw1".into()));
        assert_eq!(errs.failures()[1].source, ErrorSource::Finalize);
    }

    #[test]
    fn display_lists_every_failure() {
        let mut errs = MultiError::new();
        errs.push(ErrorSource::Host("sdw1".into()), rpc_failure("sdw1"));
        errs.push(ErrorSource::Host("sdw3".into()), rpc_failure("sdw3"));

        let text = errs.to_string();
        assert!(text.starts_with("2 errors occurred:\n"));
        assert!(text.contains("\t* host sdw1: DeleteDataDirectories on sdw1 failed"));
        assert!(text.contains("\t* host sdw3:"));
    }

    #[test]
    fn nested_hosts_are_reported() {
        let mut inner = MultiError::new();
        inner.push(ErrorSource::Host("sdw2".into()), rpc_failure("sdw2"));

        let mut outer = MultiError::new();
        outer.push(ErrorSource::Phase("delete data directories".into()), inner);

        assert_eq!(outer.hosts(), vec!["sdw2"]);
        let text = outer.to_string();
        assert!(text.contains("\t* delete data directories: 1 error occurred:"));
        assert!(text.contains("\t  \t* host sdw2:"));
    }

    #[test]
    fn empty_collection_is_ok() {
        assert!(MultiError::new().into_result().is_ok());
    }

    #[test]
    fn extend_appends() {
        let mut a = MultiError::new();
        a.push(ErrorSource::Phase("one".into()), HubError::Panicked("x".into()));
        let mut b = MultiError::new();
        b.push(ErrorSource::Finalize, HubError::Config("y".into()));
        a.extend(b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.failures()[1].source, ErrorSource::Finalize);
    }

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(HubError::from(rpc_failure("h")).kind(), "connectivity");
        assert_eq!(
            HubError::Plan(PlanError::EmptyPrefix {
                path: PathBuf::from("/x/-1")
            })
            .kind(),
            "planning"
        );
        assert_eq!(
            HubError::Subprocess {
                tool: "gpinitsystem".into(),
                reason: "exit status: 1".into()
            }
            .kind(),
            "subprocess"
        );
        assert_eq!(
            HubError::StepAlreadyInProgress {
                running: "revert".into(),
                state_dir: PathBuf::from("/s")
            }
            .kind(),
            "reentrancy"
        );
    }
}
