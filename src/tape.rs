//! The memory tape: cells, the data pointer, blocking byte streams and
//! change notifications.
//!
//! A [`Tape`] is mutated by exactly one execution flow (normally an
//! [`Engine`](crate::Engine)). Everything other threads need goes through
//! cloneable handles:
//! - [`TapeIo`] supplies input and drains output,
//! - [`CancelHandle`] interrupts a blocked read or a step delay,
//! - [`Subscription`] receives a [`TapeChange`] after every mutation.
//!
//! Notifications are posted on channels and never wait for the observer, so a
//! slow viewer cannot stall execution.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::{mpsc, Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Deserialize;

use crate::error::TapeError;

/// Number of cells on a tape built with [`Tape::new`].
pub const DEFAULT_CAPACITY: usize = 30_000;

/// Direction of a single pointer move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Left => write!(f, "left"),
            Direction::Right => write!(f, "right"),
        }
    }
}

/// What happens when the pointer would leave the tape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerPolicy {
    /// Refuse the move with [`TapeError::PointerOutOfBounds`].
    #[default]
    Strict,
    /// Wrap around to the opposite end of the tape.
    Wrap,
}

impl FromStr for PointerPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(PointerPolicy::Strict),
            "wrap" => Ok(PointerPolicy::Wrap),
            other => Err(format!("unknown pointer policy '{other}', expected 'strict' or 'wrap'")),
        }
    }
}

/// Kind of mutation that produced a [`TapeChange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    PointerMoved,
    CellIncremented,
    CellDecremented,
    OutputWritten,
    InputRead,
}

/// Snapshot posted to subscribers after each mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapeChange {
    pub kind: ChangeKind,
    /// Pointer after the mutation.
    pub pointer: usize,
    /// Value of the current cell after the mutation.
    pub value: u8,
    pub high_water_mark: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct InputState {
    bytes: VecDeque<u8>,
    closed: bool,
    cancelled: bool,
}

#[derive(Debug, Default)]
struct OutputState {
    bytes: VecDeque<u8>,
    emitted: Vec<u8>,
    closed: bool,
}

// The cancel flag lives next to the input queue so one condvar wakes both a
// blocked read and a pending step delay.
#[derive(Debug, Default)]
struct Streams {
    input: Mutex<InputState>,
    input_ready: Condvar,
    output: Mutex<OutputState>,
    output_ready: Condvar,
}

impl Streams {
    /// Block until a byte is available. `Ok(None)` means the input was closed.
    fn take_input(&self) -> Result<Option<u8>, TapeError> {
        let guard = lock(&self.input);
        let mut guard = self
            .input_ready
            .wait_while(guard, |s| s.bytes.is_empty() && !s.closed && !s.cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        if guard.cancelled {
            return Err(TapeError::Cancelled);
        }
        Ok(guard.bytes.pop_front())
    }

    fn push_input(&self, bytes: &[u8]) {
        lock(&self.input).bytes.extend(bytes.iter().copied());
        // notify_one could wake a sleeping pause instead of the reader.
        self.input_ready.notify_all();
    }

    fn pause(&self, delay: Duration) -> Result<(), TapeError> {
        let guard = lock(&self.input);
        let (guard, _) = self
            .input_ready
            .wait_timeout_while(guard, delay, |s| !s.cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        if guard.cancelled {
            Err(TapeError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn push_output(&self, byte: u8) {
        {
            let mut out = lock(&self.output);
            out.bytes.push_back(byte);
            out.emitted.push(byte);
        }
        self.output_ready.notify_all();
    }
}

/// Cloneable handle for feeding input and draining output from any thread.
#[derive(Debug, Clone)]
pub struct TapeIo {
    streams: Arc<Streams>,
}

impl TapeIo {
    /// Queue one input byte and wake a blocked reader. Never blocks.
    pub fn supply_input(&self, byte: u8) {
        self.streams.push_input(&[byte]);
    }

    pub fn supply_bytes(&self, bytes: &[u8]) {
        self.streams.push_input(bytes);
    }

    /// Mark the input as finished. Once the queue is empty, reads store 0 (EOF)
    /// instead of blocking.
    pub fn close_input(&self) {
        lock(&self.streams.input).closed = true;
        self.streams.input_ready.notify_all();
    }

    pub fn has_output(&self) -> bool {
        !lock(&self.streams.output).bytes.is_empty()
    }

    /// Pop one output byte, blocking until one is produced.
    ///
    /// Returns `None` only after [`close_output`](Self::close_output) has been
    /// called and the queue is empty.
    pub fn drain_output(&self) -> Option<u8> {
        let guard = lock(&self.streams.output);
        let mut guard = self
            .streams
            .output_ready
            .wait_while(guard, |s| s.bytes.is_empty() && !s.closed)
            .unwrap_or_else(PoisonError::into_inner);
        guard.bytes.pop_front()
    }

    /// Like [`drain_output`](Self::drain_output) but gives up after `timeout`.
    pub fn drain_output_timeout(&self, timeout: Duration) -> Option<u8> {
        let guard = lock(&self.streams.output);
        let (mut guard, _) = self
            .streams
            .output_ready
            .wait_timeout_while(guard, timeout, |s| s.bytes.is_empty() && !s.closed)
            .unwrap_or_else(PoisonError::into_inner);
        guard.bytes.pop_front()
    }

    /// Take everything currently queued without blocking.
    pub fn drain_all_output(&self) -> Vec<u8> {
        lock(&self.streams.output).bytes.drain(..).collect()
    }

    /// Wake blocked drainers once the producer is done.
    pub fn close_output(&self) {
        lock(&self.streams.output).closed = true;
        self.streams.output_ready.notify_all();
    }

    /// Every byte ever written, regardless of draining.
    pub fn emitted_output(&self) -> Vec<u8> {
        lock(&self.streams.output).emitted.clone()
    }
}

/// Cooperative cancellation shared by a tape and whoever drives it.
///
/// Cancelling is sticky: blocked reads, step delays and the run loop all keep
/// observing it until [`reset`](Self::reset) is called.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    streams: Arc<Streams>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        lock(&self.streams.input).cancelled = true;
        self.streams.input_ready.notify_all();
        log::debug!("cancellation requested");
    }

    pub fn is_cancelled(&self) -> bool {
        lock(&self.streams.input).cancelled
    }

    pub fn reset(&self) {
        lock(&self.streams.input).cancelled = false;
    }

    /// Sleep for `delay` unless cancelled first.
    pub fn pause(&self, delay: Duration) -> Result<(), TapeError> {
        self.streams.pause(delay)
    }
}

#[derive(Debug)]
struct Listener {
    id: u64,
    sender: mpsc::Sender<TapeChange>,
}

#[derive(Debug, Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<Listener>,
}

/// Receiving end of [`Tape::subscribe`]. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<TapeChange>,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Wait for the next change. `None` once the tape is gone.
    pub fn recv(&self) -> Option<TapeChange> {
        self.receiver.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<TapeChange> {
        self.receiver.recv_timeout(timeout).ok()
    }

    pub fn try_recv(&self) -> Option<TapeChange> {
        self.receiver.try_recv().ok()
    }

    /// All changes posted so far, without blocking.
    pub fn try_iter(&self) -> impl Iterator<Item = TapeChange> + '_ {
        self.receiver.try_iter()
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).listeners.retain(|l| l.id != self.id);
        }
    }
}

/// Brainfuck memory: a fixed number of wrapping `u8` cells and a data pointer.
pub struct Tape {
    cells: Vec<u8>,
    pointer: usize,
    high_water_mark: usize,
    policy: PointerPolicy,
    streams: Arc<Streams>,
    registry: Arc<Mutex<Registry>>,
}

impl Tape {
    /// A tape of [`DEFAULT_CAPACITY`] zeroed cells with the strict pointer policy.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A tape with `capacity` cells (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_policy(capacity, PointerPolicy::default())
    }

    pub fn with_policy(capacity: usize, policy: PointerPolicy) -> Self {
        Self {
            cells: vec![0; capacity.max(1)],
            pointer: 0,
            high_water_mark: 0,
            policy,
            streams: Arc::new(Streams::default()),
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    pub fn pointer(&self) -> usize {
        self.pointer
    }

    /// Furthest cell ever addressed. Never decreases.
    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    pub fn policy(&self) -> PointerPolicy {
        self.policy
    }

    /// Read-only view of every cell, for rendering.
    pub fn cells(&self) -> &[u8] {
        &self.cells
    }

    pub fn move_pointer(&mut self, direction: Direction) -> Result<(), TapeError> {
        let last = self.cells.len() - 1;
        let next = match (direction, self.policy) {
            (Direction::Left, _) if self.pointer > 0 => self.pointer - 1,
            (Direction::Right, _) if self.pointer < last => self.pointer + 1,
            (Direction::Left, PointerPolicy::Wrap) => last,
            (Direction::Right, PointerPolicy::Wrap) => 0,
            (_, PointerPolicy::Strict) => {
                return Err(TapeError::PointerOutOfBounds { pointer: self.pointer, direction });
            }
        };
        self.pointer = next;
        self.high_water_mark = self.high_water_mark.max(next);
        self.notify(ChangeKind::PointerMoved);
        Ok(())
    }

    pub fn increment(&mut self) {
        self.cells[self.pointer] = self.cells[self.pointer].wrapping_add(1);
        self.notify(ChangeKind::CellIncremented);
    }

    pub fn decrement(&mut self) {
        self.cells[self.pointer] = self.cells[self.pointer].wrapping_sub(1);
        self.notify(ChangeKind::CellDecremented);
    }

    /// Value of the current cell.
    pub fn read(&self) -> u8 {
        self.cells[self.pointer]
    }

    pub fn value_at(&self, index: usize) -> Result<u8, TapeError> {
        self.cells.get(index).copied().ok_or(TapeError::IndexOutOfRange {
            index,
            capacity: self.cells.len(),
        })
    }

    /// Queue the current cell on the output stream. Never blocks.
    pub fn write_output(&mut self) {
        self.streams.push_output(self.read());
        self.notify(ChangeKind::OutputWritten);
    }

    /// Pop one input byte into the current cell, blocking until a byte is
    /// supplied. A closed, empty input stores 0. When cancelled the cell is
    /// left untouched and nobody is notified.
    pub fn read_input(&mut self) -> Result<(), TapeError> {
        let byte = self.streams.take_input()?;
        self.cells[self.pointer] = byte.unwrap_or(0);
        self.notify(ChangeKind::InputRead);
        Ok(())
    }

    pub fn supply_input(&self, byte: u8) {
        self.streams.push_input(&[byte]);
    }

    pub fn has_output(&self) -> bool {
        self.io().has_output()
    }

    pub fn drain_output(&self) -> Option<u8> {
        self.io().drain_output()
    }

    pub fn drain_all_output(&self) -> Vec<u8> {
        self.io().drain_all_output()
    }

    pub fn emitted_output(&self) -> Vec<u8> {
        self.io().emitted_output()
    }

    /// Stream handle usable from other threads.
    pub fn io(&self) -> TapeIo {
        TapeIo { streams: Arc::clone(&self.streams) }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle { streams: Arc::clone(&self.streams) }
    }

    /// Register for a [`TapeChange`] after every mutation.
    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel();
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.push(Listener { id, sender });
        Subscription {
            id,
            receiver,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).listeners.len()
    }

    fn notify(&self, kind: ChangeKind) {
        let change = TapeChange {
            kind,
            pointer: self.pointer,
            value: self.cells[self.pointer],
            high_water_mark: self.high_water_mark,
        };
        // Receivers that went away without unsubscribing are pruned here.
        lock(&self.registry)
            .listeners
            .retain(|l| l.sender.send(change).is_ok());
    }
}

impl Default for Tape {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Tape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tape")
            .field("capacity", &self.cells.len())
            .field("pointer", &self.pointer)
            .field("high_water_mark", &self.high_water_mark)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn increment_wraps_to_zero() {
        let mut tape = Tape::with_capacity(1);
        for _ in 0..256 {
            tape.increment();
        }
        assert_eq!(tape.read(), 0);
    }

    #[test]
    fn decrement_wraps_to_255() {
        let mut tape = Tape::with_capacity(1);
        tape.decrement();
        assert_eq!(tape.read(), 255);
    }

    #[test]
    fn high_water_mark_tracks_furthest_cell() {
        let mut tape = Tape::with_capacity(10);
        for _ in 0..4 {
            tape.move_pointer(Direction::Right).unwrap();
        }
        assert_eq!(tape.high_water_mark(), 4);
        tape.move_pointer(Direction::Left).unwrap();
        tape.move_pointer(Direction::Left).unwrap();
        assert_eq!(tape.pointer(), 2);
        assert_eq!(tape.high_water_mark(), 4);
    }

    #[test]
    fn strict_policy_refuses_to_leave_tape() {
        let mut tape = Tape::with_capacity(2);
        let sub = tape.subscribe();
        assert_eq!(
            tape.move_pointer(Direction::Left),
            Err(TapeError::PointerOutOfBounds { pointer: 0, direction: Direction::Left })
        );
        tape.move_pointer(Direction::Right).unwrap();
        assert!(matches!(
            tape.move_pointer(Direction::Right),
            Err(TapeError::PointerOutOfBounds { pointer: 1, .. })
        ));
        // Only the successful move was announced.
        assert_eq!(sub.try_iter().count(), 1);
    }

    #[test]
    fn wrap_policy_wraps_both_ends() {
        let mut tape = Tape::with_policy(3, PointerPolicy::Wrap);
        tape.move_pointer(Direction::Left).unwrap();
        assert_eq!(tape.pointer(), 2);
        assert_eq!(tape.high_water_mark(), 2);
        tape.move_pointer(Direction::Right).unwrap();
        assert_eq!(tape.pointer(), 0);
    }

    #[test]
    fn value_at_is_bounds_checked() {
        let tape = Tape::with_capacity(5);
        assert_eq!(tape.value_at(4), Ok(0));
        assert_eq!(
            tape.value_at(5),
            Err(TapeError::IndexOutOfRange { index: 5, capacity: 5 })
        );
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let tape = Tape::with_capacity(0);
        assert_eq!(tape.capacity(), 1);
    }

    #[test]
    fn each_mutation_notifies_once() {
        let mut tape = Tape::with_capacity(4);
        let sub = tape.subscribe();
        tape.supply_input(7);

        tape.move_pointer(Direction::Right).unwrap();
        assert_eq!(sub.try_iter().count(), 1);
        tape.increment();
        assert_eq!(sub.try_iter().count(), 1);
        tape.decrement();
        assert_eq!(sub.try_iter().count(), 1);
        tape.write_output();
        assert_eq!(sub.try_iter().count(), 1);
        tape.read_input().unwrap();
        let changes: Vec<_> = sub.try_iter().collect();
        assert_eq!(
            changes,
            vec![TapeChange {
                kind: ChangeKind::InputRead,
                pointer: 1,
                value: 7,
                high_water_mark: 1,
            }]
        );
    }

    #[test]
    fn reads_do_not_notify() {
        let tape = Tape::with_capacity(4);
        let sub = tape.subscribe();
        let _ = tape.read();
        let _ = tape.value_at(3);
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let mut tape = Tape::with_capacity(4);
        let first = tape.subscribe();
        let second = tape.subscribe();
        assert_eq!(tape.subscriber_count(), 2);
        first.unsubscribe();
        assert_eq!(tape.subscriber_count(), 1);
        tape.increment();
        assert_eq!(second.try_recv().map(|c| c.kind), Some(ChangeKind::CellIncremented));
    }

    #[test]
    fn output_log_survives_draining() {
        let mut tape = Tape::with_capacity(1);
        tape.increment();
        tape.write_output();
        tape.increment();
        tape.write_output();
        assert!(tape.has_output());
        assert_eq!(tape.drain_all_output(), vec![1, 2]);
        assert!(!tape.has_output());
        assert_eq!(tape.emitted_output(), vec![1, 2]);
    }

    #[test]
    fn read_input_blocks_until_supplied() {
        let mut tape = Tape::with_capacity(1);
        let io = tape.io();
        let feeder = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            io.supply_input(b'A');
        });
        tape.read_input().unwrap();
        assert_eq!(tape.read(), b'A');
        feeder.join().unwrap();
    }

    #[test]
    fn closed_input_reads_zero() {
        let mut tape = Tape::with_capacity(1);
        tape.increment();
        tape.io().close_input();
        tape.read_input().unwrap();
        assert_eq!(tape.read(), 0);
    }

    #[test]
    fn cancel_wakes_blocked_read() {
        let mut tape = Tape::with_capacity(1);
        tape.increment();
        let cancel = tape.cancel_handle();
        let sub = tape.subscribe();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            cancel.cancel();
        });
        assert_eq!(tape.read_input(), Err(TapeError::Cancelled));
        assert_eq!(tape.read(), 1);
        assert!(sub.try_recv().is_none());
        canceller.join().unwrap();
    }

    #[test]
    fn cancelled_pause_returns_early() {
        let tape = Tape::with_capacity(1);
        let cancel = tape.cancel_handle();
        let waker = cancel.clone();
        let started = Instant::now();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            waker.cancel();
        });
        assert_eq!(cancel.pause(Duration::from_secs(10)), Err(TapeError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        t.join().unwrap();
        cancel.reset();
        assert_eq!(cancel.pause(Duration::from_millis(1)), Ok(()));
    }

    #[test]
    fn drain_output_returns_none_once_closed() {
        let tape = Tape::with_capacity(1);
        let io = tape.io();
        io.close_output();
        assert_eq!(tape.drain_output(), None);
        assert_eq!(io.drain_output_timeout(Duration::from_millis(1)), None);
    }
}
