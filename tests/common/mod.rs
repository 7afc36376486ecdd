//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use rtplot_rs::buffer::SharedXyBuffers;
use rtplot_rs::config::AppConfig;
use rtplot_rs::event_loop::Worker;
use rtplot_rs::transport::{accept_before, Transport, TransportOptions};
use rtplot_rs::workers::{accept_consumer, builtin_commands, open_producer};
use rtplot_rs::{ConsumerPump, Producer, ProducerWorker};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Upper bound for anything a test waits on
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}

/// Both ends of a handshaken stream, not yet registered with any loop
pub struct StreamFixture {
    pub producer: Producer,
    pub producer_worker: ProducerWorker,
    pub pump: ConsumerPump,
    pub buffers: SharedXyBuffers,
    /// Second handle on the producer's socket, for forcing disconnects
    pub producer_socket: TcpStream,
    pub listener: Arc<TcpListener>,
}

/// Connect a consumer to a fresh loopback listener and run the handshake.
///
/// The producer side accepts, as the connection manager does.
pub fn open_stream(config: &AppConfig) -> StreamFixture {
    let listener = Arc::new(TcpListener::bind("127.0.0.1:0").unwrap());
    let addr = listener.local_addr().unwrap();
    let options = TransportOptions::from(&config.transport);

    let consumer_config = config.clone();
    let consumer = thread::spawn(move || {
        let transport = Transport::connect(addr, options).unwrap();
        accept_consumer(transport, &consumer_config, "test-consumer", builtin_commands).unwrap()
    });

    let stream = accept_before(&listener, Instant::now() + test_timeout(), Duration::from_millis(1))
        .unwrap()
        .expect("consumer never connected");
    let producer_socket = stream.try_clone().unwrap();
    let transport = Transport::from_accepted(stream, Arc::clone(&listener), options).unwrap();
    let (producer, producer_worker) = open_producer(transport, config, "test-producer").unwrap();
    let (pump, buffers) = consumer.join().unwrap();

    StreamFixture {
        producer,
        producer_worker,
        pump,
        buffers,
        producer_socket,
        listener,
    }
}

/// Step the producer side then the consumer side until `done` holds
pub fn step_both_until(
    first: &mut impl Worker,
    second: &mut impl Worker,
    mut done: impl FnMut() -> bool,
) -> bool {
    let deadline = Instant::now() + test_timeout();
    while Instant::now() < deadline {
        first.step().unwrap();
        second.step().unwrap();
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

/// Poll `cond` until it holds or the test timeout passes
pub fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + test_timeout();
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

/// Step one worker until `done` holds for it or the test timeout passes
pub fn step_worker_until<W: Worker>(worker: &mut W, mut done: impl FnMut(&W) -> bool) -> bool {
    let deadline = Instant::now() + test_timeout();
    while Instant::now() < deadline {
        worker.step().unwrap();
        if done(worker) {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}
