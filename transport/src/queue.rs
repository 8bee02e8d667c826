use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::Command;

#[derive(Debug)]
struct QueueState {
    pending: VecDeque<Command>,
    current: Option<Command>,
    in_flight: bool,
    closed: bool,
    /// Set by the owner; nothing is reported after this
    stopped: bool,
}

/// FIFO of commands waiting for the debugger, with at most one in flight.
///
/// The queue starts with a command in flight: the debugger's startup banner
/// has to finish with a prompt before anything may be written.
#[derive(Debug)]
pub(crate) struct CommandQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                current: None,
                in_flight: true,
                closed: false,
                stopped: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, command: Command) -> eyre::Result<()> {
        let mut state = self.lock();
        if state.closed {
            eyre::bail!("debugger has exited, cannot run {}", command.line());
        }
        state.pending.push_back(command);
        self.ready.notify_all();
        Ok(())
    }

    /// Queue a command ahead of everything already waiting
    pub fn push_front(&self, command: Command) -> eyre::Result<()> {
        let mut state = self.lock();
        if state.closed {
            eyre::bail!("debugger has exited, cannot run {}", command.line());
        }
        state.pending.push_front(command);
        self.ready.notify_all();
        Ok(())
    }

    /// Block until a command may be sent, then mark it in flight.
    ///
    /// Returns `None` once the queue is closed.
    pub fn next(&self) -> Option<Command> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            if !state.in_flight {
                if let Some(command) = state.pending.pop_front() {
                    state.in_flight = true;
                    state.current = Some(command.clone());
                    return Some(command);
                }
            }
            state = self
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// The in-flight command's output has ended
    pub fn complete(&self) -> Option<Command> {
        let mut state = self.lock();
        state.in_flight = false;
        let finished = state.current.take();
        self.ready.notify_all();
        finished
    }

    /// Drop everything still waiting and refuse new commands.
    ///
    /// Returns the number of commands discarded.
    pub fn close(&self) -> usize {
        let mut state = self.lock();
        state.closed = true;
        let dropped = state.pending.len();
        state.pending.clear();
        self.ready.notify_all();
        dropped
    }

    /// Close the queue on behalf of the owner. Unlike [`CommandQueue::close`]
    /// this also silences the worker.
    pub fn stop(&self) -> usize {
        let mut state = self.lock();
        state.stopped = true;
        drop(state);
        self.close()
    }

    /// Run `report` unless the queue was stopped.
    ///
    /// The lock is held while `report` runs, so a concurrent
    /// [`CommandQueue::stop`] returns only after it.
    pub fn unless_stopped<F>(&self, report: F) -> bool
    where
        F: FnOnce(),
    {
        let state = self.lock();
        if state.stopped {
            return false;
        }
        report();
        drop(state);
        true
    }

    pub fn in_flight(&self) -> bool {
        self.lock().in_flight
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use crate::Command;

    use super::CommandQueue;

    #[test]
    fn startup_blocks_dispatch() {
        let queue = CommandQueue::new();
        queue.push(Command::new("run")).unwrap();
        assert!(queue.in_flight());
        assert_eq!(queue.pending_len(), 1);

        assert_eq!(queue.complete(), None);
        assert_eq!(queue.next(), Some(Command::new("run")));
        assert!(queue.in_flight());
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn commands_are_dispatched_in_order() {
        let queue = CommandQueue::new();
        queue.complete();
        for name in ["a", "b", "c"] {
            queue.push(Command::new(name)).unwrap();
        }
        for name in ["a", "b", "c"] {
            assert_eq!(queue.next(), Some(Command::new(name)));
            assert_eq!(queue.complete(), Some(Command::new(name)));
        }
    }

    #[test]
    fn push_front_jumps_the_queue() {
        let queue = CommandQueue::new();
        queue.complete();
        queue.push(Command::new("next")).unwrap();
        queue.push_front(Command::new("display")).unwrap();
        assert_eq!(queue.next(), Some(Command::new("display")));
    }

    #[test]
    fn next_waits_for_completion() {
        let queue = Arc::new(CommandQueue::new());
        queue.push(Command::new("first")).unwrap();
        queue.push(Command::new("second")).unwrap();

        let worker = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let first = queue.next();
                let second = queue.next();
                (first, second)
            })
        };

        thread::sleep(Duration::from_millis(50));
        queue.complete();
        thread::sleep(Duration::from_millis(50));
        assert!(queue.in_flight());
        assert_eq!(queue.pending_len(), 1);
        queue.complete();

        let (first, second) = worker.join().unwrap();
        assert_eq!(first, Some(Command::new("first")));
        assert_eq!(second, Some(Command::new("second")));
    }

    #[test]
    fn close_wakes_waiters_and_rejects_commands() {
        let queue = Arc::new(CommandQueue::new());
        let worker = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.next())
        };
        queue.push(Command::new("pending")).unwrap();
        thread::sleep(Duration::from_millis(20));

        assert_eq!(queue.close(), 1);
        assert_eq!(worker.join().unwrap(), None);
        assert!(queue.is_closed());
        assert!(queue.push(Command::new("late")).is_err());
    }

    #[test]
    fn stop_silences_reports() {
        let queue = CommandQueue::new();
        let mut reported = 0;
        assert!(queue.unless_stopped(|| reported += 1));

        // the worker closing the queue on its own still reports
        queue.close();
        assert!(queue.unless_stopped(|| reported += 1));

        queue.stop();
        assert!(!queue.unless_stopped(|| reported += 1));
        assert_eq!(reported, 2);
    }
}
