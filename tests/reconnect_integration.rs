//! Link-loss and reconnect behaviour of the pumps
//!
//! Workers are stepped by hand from the test thread so each side's
//! reconnect can be observed in order.

mod common;

use common::builders::{ramp, ConfigBuilder};
use common::{open_stream, step_both_until, step_worker_until, test_timeout};
use rtplot_rs::buffer::lock_buffers;
use rtplot_rs::event_loop::{EventLoop, Worker};
use rtplot_rs::RtPlotError;
use std::net::Shutdown;
use std::thread;
use std::time::Duration;

#[test]
fn test_stream_resumes_after_link_loss() {
    let config = ConfigBuilder::new().capacity(100).build();
    let mut fixture = open_stream(&config);
    let buffers = fixture.buffers.clone();

    let (xs, ys) = ramp(0, 20);
    fixture.producer.put_numeric_x_list_y_list(&xs, &ys).unwrap();
    assert!(step_both_until(&mut fixture.producer_worker, &mut fixture.pump, || {
        lock_buffers(&buffers).unwrap().len() == 20
    }));

    fixture.producer_socket.shutdown(Shutdown::Both).unwrap();

    // The consumer sees end-of-stream and redials the listener
    assert!(step_worker_until(&mut fixture.pump, |pump| pump.reconnect_count() == 1));
    // The producer notices its own dead socket and accepts the redial
    assert!(step_worker_until(&mut fixture.producer_worker, |worker| {
        worker.reconnect_count() == 1
    }));

    let (more_x, more_y) = ramp(20, 20);
    fixture.producer.put_numeric_x_list_y_list(&more_x, &more_y).unwrap();
    assert!(step_both_until(&mut fixture.producer_worker, &mut fixture.pump, || {
        lock_buffers(&buffers).unwrap().len() == 40
    }));

    let (got_x, got_y) = lock_buffers(&buffers).unwrap().snapshot();
    let (all_x, all_y) = ramp(0, 40);
    assert_eq!(got_x, all_x);
    assert_eq!(got_y, all_y);
    assert_eq!(fixture.pump.reconnect_count(), 1);
    assert_eq!(fixture.producer_worker.reconnect_count(), 1);
}

#[test]
fn test_rpc_works_after_reconnect() {
    let config = ConfigBuilder::new().build();
    let mut fixture = open_stream(&config);

    fixture.producer_socket.shutdown(Shutdown::Both).unwrap();
    assert!(step_worker_until(&mut fixture.pump, |pump| pump.reconnect_count() == 1));

    let producer_loop = EventLoop::spawn("producer", &config.event_loop).unwrap();
    let consumer_loop = EventLoop::spawn("consumer", &config.event_loop).unwrap();
    producer_loop.add(fixture.producer_worker).unwrap();
    consumer_loop.add(fixture.pump).unwrap();

    let len: usize = fixture
        .producer
        .call("echo_len", vec![serde_json::json!("abc")])
        .unwrap()
        .wait_as(test_timeout())
        .unwrap();
    assert_eq!(len, 3);
}

#[test]
fn test_consumer_gives_up_when_listener_is_gone() {
    let mut config = ConfigBuilder::new().build();
    config.reconnect.max_attempts = 2;
    config.reconnect.initial_backoff_ms = 1;
    config.reconnect.max_backoff_ms = 2;
    config.transport.connect_timeout_ms = 100;

    let fixture = open_stream(&config);
    let mut pump = fixture.pump;
    // Nothing can accept a redial once the listener and producer are gone
    drop(fixture.producer_worker);
    drop(fixture.listener);
    fixture.producer_socket.shutdown(Shutdown::Both).unwrap();
    drop(fixture.producer_socket);

    let deadline = std::time::Instant::now() + test_timeout();
    let error = loop {
        match pump.step() {
            Ok(_) => {}
            Err(e) => break e,
        }
        assert!(std::time::Instant::now() < deadline, "pump never gave up");
        thread::sleep(Duration::from_millis(2));
    };
    assert!(matches!(error, RtPlotError::Connection(_)), "got {:?}", error);
    assert_eq!(pump.reconnect_count(), 2);
}

#[test]
fn test_failed_pump_is_removed_from_its_loop() {
    let mut config = ConfigBuilder::new().build();
    config.reconnect.max_attempts = 1;
    config.transport.connect_timeout_ms = 100;

    let fixture = open_stream(&config);
    let consumer_loop = EventLoop::spawn("consumer", &config.event_loop).unwrap();
    let id = consumer_loop.add(fixture.pump).unwrap();
    assert!(consumer_loop.contains(id));

    drop(fixture.producer_worker);
    drop(fixture.listener);
    fixture.producer_socket.shutdown(Shutdown::Both).unwrap();

    assert!(consumer_loop.wait_until_empty(test_timeout()));
    assert!(!consumer_loop.contains(id));
}
