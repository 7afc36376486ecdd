//! Launching consumer processes

use super::ConsumerArgs;
use crate::config::ManagerConfig;
use crate::error::{Result, RtPlotError};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

/// A running child the manager owns
#[cfg_attr(test, mockall::automock)]
pub trait ChildHandle: Send {
    fn id(&self) -> u32;

    /// Exit code if the child has finished (`None` inside when killed by a signal)
    fn try_wait(&mut self) -> io::Result<Option<Option<i32>>>;

    fn wait(&mut self) -> io::Result<Option<i32>>;

    /// Kill the child and reap it
    fn terminate(&mut self) -> io::Result<()>;
}

/// Starts consumer processes
#[cfg_attr(test, mockall::automock)]
pub trait ProcessSpawner {
    fn spawn(&self, args: &ConsumerArgs) -> io::Result<Box<dyn ChildHandle>>;
}

/// Spawns the consumer executable with `std::process::Command`
#[derive(Debug, Clone)]
pub struct CommandSpawner {
    program: PathBuf,
}

impl CommandSpawner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Use `consumer_program` from the config, or the binary next to this one
    pub fn from_config(config: &ManagerConfig) -> Result<Self> {
        match &config.consumer_program {
            Some(program) => Ok(Self::new(program)),
            None => Ok(Self::new(default_consumer_program()?)),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl ProcessSpawner for CommandSpawner {
    fn spawn(&self, args: &ConsumerArgs) -> io::Result<Box<dyn ChildHandle>> {
        tracing::debug!("Spawning {} {:?}", self.program.display(), args.to_args());
        let child = Command::new(&self.program)
            .args(args.to_args())
            .stdin(Stdio::null())
            .spawn()?;
        Ok(Box::new(ProcessChild { child }))
    }
}

/// `rtplot-rs` in the same directory as the running executable
pub fn default_consumer_program() -> Result<PathBuf> {
    let exe = std::env::current_exe()
        .map_err(|e| RtPlotError::Config(format!("Cannot locate current executable: {}", e)))?;
    Ok(exe.with_file_name(format!("rtplot-rs{}", std::env::consts::EXE_SUFFIX)))
}

struct ProcessChild {
    child: Child,
}

impl ChildHandle for ProcessChild {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn try_wait(&mut self) -> io::Result<Option<Option<i32>>> {
        Ok(self.child.try_wait()?.map(|status| status.code()))
    }

    fn wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self.child.wait()?.code())
    }

    fn terminate(&mut self) -> io::Result<()> {
        match self.child.kill() {
            Ok(()) => {}
            // Already exited
            Err(e) if e.kind() == ErrorKind::InvalidInput => {}
            Err(e) => return Err(e),
        }
        self.child.wait().map(|_| ())
    }
}
