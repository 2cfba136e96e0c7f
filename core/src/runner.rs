use crate::Result;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// A program and its argv, built directly and never passed through a shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Executes external programs under a deadline.
///
/// Implementations return the trimmed stdout on success. A deadline expiry
/// must surface as [`crate::VolumeError::Timeout`] and any other failure as
/// [`crate::VolumeError::Command`] carrying whatever output was captured.
/// The child must be killed and reaped if the returned future is dropped.
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, deadline: Duration, invocation: &Invocation) -> Result<String>;
}
