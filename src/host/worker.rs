//! Worker thread owning a set of tracks

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::error::{Result, TrackError};
use crate::track::{SchedulerOutcome, Track, TrackId, TrackReport, TrackState};

use super::{Task, TaskPoster, TimerId};

enum Command {
    Submit {
        track: Box<Track>,
        done: Sender<TrackReport>,
    },
    Wake(TrackId),
    Stop(TrackId),
    Pause(TrackId),
    Unpause(TrackId),
    Post(Task),
    Timer {
        id: TimerId,
        at: Instant,
        task: Task,
    },
    CancelTimer(TimerId),
    Shutdown,
}

/// Cloneable handle to a worker's mailbox
#[derive(Clone)]
pub struct WorkerHandle {
    tx: Sender<Command>,
    name: Arc<str>,
    next_timer: Arc<AtomicU64>,
    load: Arc<AtomicUsize>,
}

impl WorkerHandle {
    fn send(&self, cmd: Command) -> Result<()> {
        self.tx.send(cmd).map_err(|_| TrackError::WorkerClosed)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tracks currently owned by the worker
    pub fn load(&self) -> usize {
        self.load.load(Ordering::SeqCst)
    }

    /// Hand a track over to the worker, starting it if needed
    pub fn submit(&self, mut track: Track) -> Result<TrackTicket> {
        if track.state() == TrackState::Created {
            track.start()?;
        }
        let id = track.id();
        let (done, rx) = crossbeam_channel::bounded(1);
        self.load.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.send(Command::Submit {
            track: Box::new(track),
            done,
        }) {
            self.load.fetch_sub(1, Ordering::SeqCst);
            return Err(e);
        }
        Ok(TrackTicket {
            id,
            worker: self.clone(),
            rx,
        })
    }

    pub fn wake(&self, id: TrackId) -> Result<()> {
        self.send(Command::Wake(id))
    }

    pub fn stop(&self, id: TrackId) -> Result<()> {
        self.send(Command::Stop(id))
    }

    pub fn pause(&self, id: TrackId) -> Result<()> {
        self.send(Command::Pause(id))
    }

    pub fn unpause(&self, id: TrackId) -> Result<()> {
        self.send(Command::Unpause(id))
    }

    /// Ask the worker to stop every track and exit
    pub fn shutdown(&self) {
        let _ = self.send(Command::Shutdown);
    }
}

impl TaskPoster for WorkerHandle {
    fn post(&self, task: Task) {
        if self.send(Command::Post(task)).is_err() {
            warn!(worker = %self.name, "task posted to a closed worker");
        }
    }

    fn set_timer(&self, delay: Duration, task: Task) -> TimerId {
        let id = TimerId(self.next_timer.fetch_add(1, Ordering::SeqCst));
        let at = Instant::now() + delay;
        if self.send(Command::Timer { id, at, task }).is_err() {
            warn!(worker = %self.name, timer = %id, "timer armed on a closed worker");
        }
        id
    }

    fn cancel_timer(&self, id: TimerId) {
        let _ = self.send(Command::CancelTimer(id));
    }
}

/// Completion handle of a submitted track
pub struct TrackTicket {
    id: TrackId,
    worker: WorkerHandle,
    rx: Receiver<TrackReport>,
}

impl TrackTicket {
    pub fn id(&self) -> TrackId {
        self.id
    }

    /// Block until the track completes; `None` if the worker went away
    pub fn wait(&self) -> Option<TrackReport> {
        self.rx.recv().ok()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<TrackReport> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn try_report(&self) -> Option<TrackReport> {
        self.rx.try_recv().ok()
    }

    pub fn stop(&self) -> Result<()> {
        self.worker.stop(self.id)
    }

    pub fn pause(&self) -> Result<()> {
        self.worker.pause(self.id)
    }

    pub fn unpause(&self) -> Result<()> {
        self.worker.unpause(self.id)
    }

    pub fn wake(&self) -> Result<()> {
        self.worker.wake(self.id)
    }
}

/// Worker thread
pub struct Worker {
    handle: WorkerHandle,
    join: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn a named worker thread
    pub fn spawn(name: &str) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = WorkerHandle {
            tx,
            name: Arc::from(name),
            next_timer: Arc::new(AtomicU64::new(1)),
            load: Arc::new(AtomicUsize::new(0)),
        };
        let event_loop = EventLoop {
            rx,
            handle: handle.clone(),
            tracks: HashMap::new(),
            timers: BinaryHeap::new(),
            timer_tasks: HashMap::new(),
        };
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || event_loop.run())?;
        info!(worker = name, "worker started");
        Ok(Self {
            handle,
            join: Some(join),
        })
    }

    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    /// Stop every owned track and wait for the thread to exit
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if let Some(join) = self.join.take() {
            self.handle.shutdown();
            if join.join().is_err() {
                warn!(worker = %self.handle.name, "worker thread panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.close();
    }
}

struct Owned {
    track: Box<Track>,
    done: Sender<TrackReport>,
}

struct EventLoop {
    rx: Receiver<Command>,
    handle: WorkerHandle,
    tracks: HashMap<TrackId, Owned>,
    timers: BinaryHeap<Reverse<(Instant, TimerId)>>,
    timer_tasks: HashMap<TimerId, Task>,
}

impl EventLoop {
    fn run(mut self) {
        loop {
            let cmd = match self.timers.peek().map(|Reverse((at, _))| *at) {
                Some(at) => {
                    let now = Instant::now();
                    if at <= now {
                        self.fire_timers();
                        continue;
                    }
                    match self.rx.recv_timeout(at - now) {
                        Ok(cmd) => cmd,
                        Err(RecvTimeoutError::Timeout) => {
                            self.fire_timers();
                            continue;
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match self.rx.recv() {
                    Ok(cmd) => cmd,
                    Err(_) => break,
                },
            };
            if !self.handle_command(cmd) {
                break;
            }
        }
        self.stop_all();
        info!(worker = %self.handle.name, "worker stopped");
    }

    /// Returns false once the loop must exit
    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Submit { mut track, done } => {
                let id = track.id();
                let tx = self.handle.tx.clone();
                track.set_wake_handler(Arc::new(move || {
                    let _ = tx.send(Command::Wake(id));
                }));
                track.set_host(Arc::new(self.handle.clone()));
                debug!(worker = %self.handle.name, track = %id, "track submitted");
                self.tracks.insert(id, Owned { track, done });
                self.drive(id);
            }
            Command::Wake(id) => match self.tracks.get(&id).map(|o| o.track.state()) {
                Some(TrackState::Suspended) => self.drive(id),
                Some(state) => debug!(track = %id, %state, "ignoring wake"),
                None => debug!(track = %id, "wake for unknown track"),
            },
            Command::Stop(id) => {
                if let Some(owned) = self.tracks.get_mut(&id) {
                    owned.track.stop();
                    // suspended filters get one more call to see the flag
                    self.drive(id);
                }
            }
            Command::Pause(id) => {
                if let Some(owned) = self.tracks.get_mut(&id) {
                    owned.track.pause();
                }
            }
            Command::Unpause(id) => {
                if let Some(owned) = self.tracks.get_mut(&id) {
                    owned.track.unpause();
                    self.drive(id);
                }
            }
            Command::Post(task) => task(),
            Command::Timer { id, at, task } => {
                self.timers.push(Reverse((at, id)));
                self.timer_tasks.insert(id, task);
            }
            Command::CancelTimer(id) => {
                self.timer_tasks.remove(&id);
            }
            Command::Shutdown => return false,
        }
        true
    }

    fn fire_timers(&mut self) {
        let now = Instant::now();
        while let Some(Reverse((at, id))) = self.timers.peek().copied() {
            if at > now {
                break;
            }
            self.timers.pop();
            if let Some(task) = self.timer_tasks.remove(&id) {
                debug!(worker = %self.handle.name, timer = %id, "timer fired");
                task();
            }
        }
    }

    fn drive(&mut self, id: TrackId) {
        let Some(owned) = self.tracks.get_mut(&id) else {
            return;
        };
        let state = owned.track.state();
        if state.is_terminal() || state == TrackState::Created {
            self.complete(id);
            return;
        }
        if owned.track.drive() != SchedulerOutcome::Suspended {
            self.complete(id);
        }
    }

    fn complete(&mut self, id: TrackId) {
        if let Some(owned) = self.tracks.remove(&id) {
            owned.track.waker().clear_handler();
            let report = owned.track.report();
            debug!(track = %id, outcome = %report.outcome, "track completed");
            self.handle.load.fetch_sub(1, Ordering::SeqCst);
            let _ = owned.done.send(report);
        }
    }

    fn stop_all(&mut self) {
        let ids: Vec<TrackId> = self.tracks.keys().copied().collect();
        for id in ids {
            if let Some(owned) = self.tracks.get_mut(&id) {
                owned.track.stop();
                owned.track.abort(TrackError::ForcedStop);
            }
            self.complete(id);
        }
        self.timer_tasks.clear();
        self.timers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_post_runs_on_worker() {
        let worker = Worker::spawn("test-worker").unwrap();
        let (tx, rx) = mpsc::channel();
        worker.handle().post(Box::new(move || {
            let name = thread::current().name().map(str::to_string);
            let _ = tx.send(name);
        }));
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("test-worker"));
    }

    #[test]
    fn test_timers_fire_in_order_and_cancel() {
        let worker = Worker::spawn("test-timers").unwrap();
        let handle = worker.handle();
        let (tx, rx) = mpsc::channel();

        let tx2 = tx.clone();
        handle.set_timer(Duration::from_millis(40), Box::new(move || {
            let _ = tx2.send("late");
        }));
        let tx3 = tx.clone();
        let cancelled = handle.set_timer(Duration::from_millis(20), Box::new(move || {
            let _ = tx3.send("cancelled");
        }));
        handle.set_timer(Duration::from_millis(10), Box::new(move || {
            let _ = tx.send("early");
        }));
        handle.cancel_timer(cancelled);

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!((first, second), ("early", "late"));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_closed_worker_rejects_commands() {
        let worker = Worker::spawn("test-closed").unwrap();
        let handle = worker.handle();
        worker.shutdown();
        let err = handle.wake(TrackId(1)).unwrap_err();
        assert_eq!(err.error_code(), "WORKER_CLOSED");
    }
}
