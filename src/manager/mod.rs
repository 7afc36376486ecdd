//! Process and connection lifecycle
//!
//! The manager is the server side of a rendezvous: it binds a listener,
//! spawns a consumer with the listener's host and port on its command line,
//! and waits for the child to dial back. Before the wire handshake starts the
//! two exchange an identification line:
//!
//! ```text
//! child   -> "StartupMngr Serv001 HANDSHAKE\n"
//! manager -> "ACK STARTUP\n"
//! ```
//!
//! [`StartupClient`] is the child side of that exchange.

mod args;
mod spawn;

pub use args::{ConsumerArgs, SUPPORTED_MPROTOS, SUPPORTED_PLOTS};
pub use spawn::{default_consumer_program, ChildHandle, CommandSpawner, ProcessSpawner};

#[cfg(test)]
pub use spawn::{MockChildHandle, MockProcessSpawner};

use crate::config::AppConfig;
use crate::error::{Result, ResultExt, RtPlotError};
use crate::transport::{accept_before, Transport, TransportOptions};
use crate::workers::{open_producer, Producer, ProducerWorker};
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Instant;

pub const STARTUP_GREETING: &str = "StartupMngr";
pub const STARTUP_SUFFIX: &str = "HANDSHAKE";
pub const STARTUP_ACK: &str = "ACK STARTUP";

const MAX_LINE_LEN: usize = 256;

/// An identified connection from a spawned consumer, not yet handshaken
#[derive(Debug)]
pub struct Connection {
    pub name: String,
    pub transport: Transport,
}

/// A spawned child and the name it announced
pub struct Session {
    name: String,
    child: Box<dyn ChildHandle>,
}

impl Session {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Whether the child has already exited
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }
}

/// Server role: bind, spawn, accept and identify consumers
pub struct ConnectionManager {
    listener: Arc<TcpListener>,
    config: AppConfig,
    sessions: Vec<Session>,
    spawned: u32,
}

impl ConnectionManager {
    /// Bind the configured host and port (0 picks an ephemeral port)
    pub fn bind(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let host = config.manager.host.as_str();
        let listener = TcpListener::bind((host, config.manager.port)).map_err(|e| {
            RtPlotError::Connection(format!(
                "Failed to bind {}:{}: {}",
                host, config.manager.port, e
            ))
        })?;
        tracing::info!("Connection manager listening on {}", listener.local_addr()?);
        Ok(Self {
            listener: Arc::new(listener),
            config,
            sessions: Vec::new(),
            spawned: 0,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Command line for a consumer that should call back as `name`
    pub fn consumer_args(&self, name: &str) -> Result<ConsumerArgs> {
        let mut args = ConsumerArgs::new(&self.config.manager.host, self.local_addr()?.port(), name);
        args.max_pts = self.config.stream.capacity;
        args.style = self.config.stream.style.clone();
        args.dtype = self.config.stream.dtype;
        Ok(args)
    }

    /// Spawn a consumer and wait for it to connect and identify itself.
    ///
    /// Past the spawn deadline the child is terminated and
    /// [`RtPlotError::SpawnTimeout`] is returned.
    pub fn spawn_consumer(&mut self, spawner: &dyn ProcessSpawner) -> Result<Connection> {
        self.spawned += 1;
        let name = format!("Serv{:03}", self.spawned);
        let args = self.consumer_args(&name)?;

        let mut child = spawner
            .spawn(&args)
            .map_err(RtPlotError::from)
            .with_context(|| format!("Failed to spawn consumer {}", name))?;
        tracing::info!("Spawned consumer {} (pid {})", name, child.id());

        match self.accept_identified(&name) {
            Ok(connection) => {
                self.sessions.push(Session { name, child });
                Ok(connection)
            }
            Err(e) => {
                if let Err(kill_err) = child.terminate() {
                    tracing::warn!("Failed to terminate consumer {}: {}", name, kill_err);
                }
                Err(e)
            }
        }
    }

    /// Accept the next connection and check it announces `name`
    fn accept_identified(&self, name: &str) -> Result<Connection> {
        let spawn_timeout = self.config.manager.spawn_timeout();
        let deadline = Instant::now() + spawn_timeout;
        let stream = accept_before(&self.listener, deadline, self.config.manager.accept_poll())?
            .ok_or(RtPlotError::SpawnTimeout(spawn_timeout))?;

        let options = TransportOptions::from(&self.config.transport);
        let mut transport = Transport::from_accepted(stream, Arc::clone(&self.listener), options)?;

        let hs_deadline = Instant::now() + self.config.transport.handshake_timeout();
        let line = transport
            .read_line_until(hs_deadline, MAX_LINE_LEN)
            .map_err(|e| RtPlotError::ManagerHandshake(format!("no identification line: {}", e)))?;
        check_greeting(&line, name)?;

        transport
            .write(format!("{}\n", STARTUP_ACK).as_bytes())
            .map_err(|e| RtPlotError::ManagerHandshake(format!("sending ack failed: {}", e)))?;
        tracing::info!("Consumer {} identified from {:?}", name, transport.peer_addr());

        Ok(Connection {
            name: name.to_string(),
            transport,
        })
    }

    /// Run the wire handshake on an identified connection
    pub fn open_stream(&self, connection: Connection) -> Result<(Producer, ProducerWorker)> {
        open_producer(connection.transport, &self.config, &connection.name)
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// Wait for every spawned child; returns each name with its exit code
    pub fn wait_all(&mut self) -> Result<Vec<(String, Option<i32>)>> {
        let mut codes = Vec::with_capacity(self.sessions.len());
        for mut session in self.sessions.drain(..) {
            let code = session.child.wait()?;
            tracing::debug!("Consumer {} exited with {:?}", session.name, code);
            codes.push((session.name, code));
        }
        Ok(codes)
    }

    /// Kill every spawned child, logging failures
    pub fn terminate_all(&mut self) {
        for mut session in self.sessions.drain(..) {
            if let Err(e) = session.child.terminate() {
                tracing::warn!("Failed to terminate consumer {}: {}", session.name, e);
            }
        }
    }
}

fn check_greeting(line: &str, expected: &str) -> Result<()> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    match fields.as_slice() {
        [STARTUP_GREETING, name, STARTUP_SUFFIX] if *name == expected => Ok(()),
        [STARTUP_GREETING, name, STARTUP_SUFFIX] => Err(RtPlotError::ManagerHandshake(format!(
            "expected consumer {}, got {}",
            expected, name
        ))),
        _ => Err(RtPlotError::ManagerHandshake(format!(
            "malformed identification line {:?}",
            line
        ))),
    }
}

/// Client role: dial the manager and identify as `name`
pub struct StartupClient;

impl StartupClient {
    /// Retries the dial until the spawn deadline so a consumer may start
    /// before its manager is accepting
    pub fn connect(host: &str, port: u16, name: &str, config: &AppConfig) -> Result<Transport> {
        let options = TransportOptions::from(&config.transport);
        let deadline = Instant::now() + config.manager.spawn_timeout();
        let mut transport =
            Transport::connect_until((host, port), deadline, config.manager.accept_poll(), options)
                .with_context(|| format!("Failed to reach manager at {}:{}", host, port))?;

        let greeting = format!("{} {} {}\n", STARTUP_GREETING, name, STARTUP_SUFFIX);
        transport
            .write(greeting.as_bytes())
            .map_err(|e| RtPlotError::ManagerHandshake(format!("sending greeting failed: {}", e)))?;

        let hs_deadline = Instant::now() + config.transport.handshake_timeout();
        let reply = transport
            .read_line_until(hs_deadline, MAX_LINE_LEN)
            .map_err(|e| RtPlotError::ManagerHandshake(format!("no ack from manager: {}", e)))?;
        if reply.trim_end() != STARTUP_ACK {
            return Err(RtPlotError::ManagerHandshake(format!(
                "unexpected manager reply {:?}",
                reply
            )));
        }
        tracing::info!("Identified to manager as {}", name);
        Ok(transport)
    }
}
