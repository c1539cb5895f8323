use std::thread;
use std::time::{Duration, Instant};

use bf_tape::{Engine, EngineError, Tape};

#[test]
fn input_supplied_while_engine_is_blocked() {
    let mut bf = Engine::new(",.");
    let io = bf.io();
    let worker = thread::spawn(move || {
        let res = bf.run();
        (res, bf)
    });

    thread::sleep(Duration::from_millis(50));
    io.supply_input(b'A');

    assert_eq!(io.drain_output(), Some(b'A'));
    let (res, bf) = worker.join().unwrap();
    assert_eq!(res, Ok(()));
    assert!(bf.is_finished());
}

#[test]
fn cancel_unblocks_pending_read_promptly() {
    let mut bf = Engine::with_tape("+>,", Tape::with_capacity(4));
    let cancel = bf.cancel_handle();
    let worker = thread::spawn(move || {
        let res = bf.run();
        (res, bf)
    });

    thread::sleep(Duration::from_millis(50));
    let started = Instant::now();
    cancel.cancel();
    let (res, bf) = worker.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(res, Err(EngineError::Cancelled { ip: 2 }));
    assert!(!bf.is_finished());
    assert_eq!(bf.instruction_pointer(), 2);
    assert_eq!(bf.tape().cells()[..2], [1, 0]);
    assert_eq!(bf.tape().pointer(), 1);
}

#[test]
fn cancel_interrupts_step_delay() {
    let mut bf = Engine::new("+++++");
    bf.set_step_delay(Duration::from_secs(30));
    let cancel = bf.cancel_handle();
    let worker = thread::spawn(move || {
        let res = bf.run();
        (res, bf)
    });

    thread::sleep(Duration::from_millis(50));
    let started = Instant::now();
    cancel.cancel();
    let (res, bf) = worker.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(matches!(res, Err(EngineError::Cancelled { .. })));
    assert_eq!(bf.steps_executed(), 1);
    assert_eq!(bf.tape().read(), 1);
}

#[test]
fn cancel_stops_infinite_loop() {
    let mut bf = Engine::new("+[]");
    let cancel = bf.cancel_handle();
    let worker = thread::spawn(move || bf.run());

    thread::sleep(Duration::from_millis(50));
    cancel.cancel();
    assert!(matches!(worker.join().unwrap(), Err(EngineError::Cancelled { .. })));
}

#[test]
fn reset_allows_resuming_after_cancel() {
    let mut bf = Engine::new(",.");
    let cancel = bf.cancel_handle();
    cancel.cancel();
    assert_eq!(bf.run(), Err(EngineError::Cancelled { ip: 0 }));

    cancel.reset();
    bf.io().supply_input(9);
    assert_eq!(bf.run(), Ok(()));
    assert_eq!(bf.tape().emitted_output(), vec![9]);
}

#[test]
fn step_delay_paces_the_run() {
    let mut bf = Engine::new("+++");
    bf.set_step_delay(Duration::from_millis(20));
    let started = Instant::now();
    bf.run().unwrap();
    assert!(started.elapsed() >= Duration::from_millis(60));
}

#[test]
fn output_drained_from_another_thread_while_running() {
    // Echo 5 bytes, with a delay so output trickles out while we drain it.
    let mut bf = Engine::new(",.,.,.,.,.");
    bf.set_step_delay(Duration::from_millis(2));
    let io = bf.io();
    io.supply_bytes(b"hello");

    let reader_io = io.clone();
    let reader = thread::spawn(move || {
        let mut got = Vec::new();
        while let Some(b) = reader_io.drain_output() {
            got.push(b);
        }
        got
    });

    bf.run().unwrap();
    io.close_output();
    assert_eq!(reader.join().unwrap(), b"hello");
    assert_eq!(bf.tape().emitted_output(), b"hello");
}

#[test]
fn closed_input_reads_as_zero() {
    let mut bf = Engine::new("+,.");
    bf.io().close_input();
    bf.run().unwrap();
    assert_eq!(bf.tape().emitted_output(), vec![0]);
}
