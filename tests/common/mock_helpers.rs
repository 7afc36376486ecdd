//! Mock construction helpers

use mockall::mock;
use rtplot_rs::buffer::lock_buffers;
use rtplot_rs::config::AppConfig;
use rtplot_rs::event_loop::{StepOutcome, Worker};
use rtplot_rs::manager::{ChildHandle, ConsumerArgs, ProcessSpawner, StartupClient};
use rtplot_rs::workers::{accept_consumer, builtin_commands};
use rtplot_rs::{Result, RtPlotError};
use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

mock! {
    pub Spawner {}

    impl ProcessSpawner for Spawner {
        fn spawn(&self, args: &ConsumerArgs) -> io::Result<Box<dyn ChildHandle>>;
    }
}

mock! {
    pub Child {}

    impl ChildHandle for Child {
        fn id(&self) -> u32;
        fn try_wait(&mut self) -> io::Result<Option<Option<i32>>>;
        fn wait(&mut self) -> io::Result<Option<i32>>;
        fn terminate(&mut self) -> io::Result<()>;
    }
}

/// A child that reports `pid` and exits cleanly when waited on
pub fn exiting_child(pid: u32) -> Box<dyn ChildHandle> {
    let mut child = MockChild::new();
    child.expect_id().return_const(pid);
    child.expect_try_wait().returning(|| Ok(None));
    child.expect_wait().returning(|| Ok(Some(0)));
    child.expect_terminate().returning(|| Ok(()));
    Box::new(child)
}

/// Play a spawned consumer on a thread: identify, handshake and pump until
/// EXIT. Yields the x samples held at the end.
pub fn fake_consumer(args: &ConsumerArgs, config: &AppConfig) -> JoinHandle<Result<Vec<f64>>> {
    let (host, port, name, config) = (
        args.host.clone(),
        args.port,
        args.name.clone(),
        config.clone(),
    );
    thread::spawn(move || {
        let transport = StartupClient::connect(&host, port, &name, &config)?;
        let (mut pump, buffers) = accept_consumer(transport, &config, &name, builtin_commands)?;
        let deadline = Instant::now() + Duration::from_secs(10);
        while pump.step()? != StepOutcome::Exhausted {
            if Instant::now() > deadline {
                return Err(RtPlotError::Connection(format!("{} never saw EXIT", name)));
            }
            thread::sleep(Duration::from_millis(1));
        }
        let xs = lock_buffers(&buffers)?.snapshot().0;
        Ok(xs)
    })
}
