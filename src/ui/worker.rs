//! Background enumeration for the TUI.
//!
//! Walking a large hub tree can take a while, so passes run on a dedicated
//! thread and results come back over a channel. A pass is never interrupted:
//! once started it finishes, and the UI either picks up the result or drops
//! it on exit.

use crate::enumerator::Enumerator;
use crate::model::Snapshot;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info};

/// Requests sent to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshCommand {
    Refresh,
    Shutdown,
}

/// Results sent back to the UI.
#[derive(Debug)]
pub enum RefreshEvent {
    Snapshot(Snapshot),
    Failed(String),
}

/// Handle to the refresh thread. Dropping it stops the thread once any
/// running pass has finished.
pub struct RefreshWorker {
    commands: Sender<RefreshCommand>,
    events: Receiver<RefreshEvent>,
    handle: Option<JoinHandle<()>>,
}

impl RefreshWorker {
    pub fn spawn(enumerator: Arc<Enumerator>) -> std::io::Result<Self> {
        let (command_tx, command_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();

        let handle = std::thread::Builder::new()
            .name("usbtopo-refresh".to_string())
            .spawn(move || run(&enumerator, &command_rx, &event_tx))?;

        Ok(Self {
            commands: command_tx,
            events: event_rx,
            handle: Some(handle),
        })
    }

    /// Ask for a new pass. Returns false if the worker has stopped.
    pub fn request_refresh(&self) -> bool {
        self.commands.send(RefreshCommand::Refresh).is_ok()
    }

    /// Next finished pass, if any, without blocking.
    pub fn try_recv(&self) -> Option<RefreshEvent> {
        match self.events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Next finished pass, waiting up to `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<RefreshEvent> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl Drop for RefreshWorker {
    fn drop(&mut self) {
        let _ = self.commands.send(RefreshCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(enumerator: &Enumerator, commands: &Receiver<RefreshCommand>, events: &Sender<RefreshEvent>) {
    debug!("Refresh worker started");

    while let Ok(command) = commands.recv() {
        if command == RefreshCommand::Shutdown {
            break;
        }

        // Requests queued while the previous pass ran collapse into one.
        let mut shutdown = false;
        while let Ok(queued) = commands.try_recv() {
            if queued == RefreshCommand::Shutdown {
                shutdown = true;
            }
        }
        if shutdown {
            break;
        }

        let event = match enumerator.enumerate() {
            Ok(snapshot) => RefreshEvent::Snapshot(snapshot),
            Err(e) => RefreshEvent::Failed(e.to_string()),
        };
        if events.send(event).is_err() {
            break;
        }
    }

    info!("Refresh worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{MemoryDevice, MemoryHost};

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_refresh_delivers_snapshot() {
        let host = MemoryHost::new();
        let root = host.add_root(1, 2);
        host.plug(&root, 1, MemoryDevice::new(1, 1));

        let worker = RefreshWorker::spawn(Arc::new(Enumerator::new(Box::new(host.clone())))).unwrap();
        assert!(worker.try_recv().is_none());
        assert!(worker.request_refresh());

        match worker.recv_timeout(WAIT) {
            Some(RefreshEvent::Snapshot(snapshot)) => assert_eq!(snapshot.len(), 1),
            other => panic!("expected snapshot, got {:?}", other),
        }
        drop(worker);
        assert_eq!(host.open_sessions(), 0);
    }

    #[test]
    fn test_refresh_reports_failure() {
        let host = MemoryHost::new();
        host.fail_open("controller gone");

        let worker = RefreshWorker::spawn(Arc::new(Enumerator::new(Box::new(host)))).unwrap();
        worker.request_refresh();

        match worker.recv_timeout(WAIT) {
            Some(RefreshEvent::Failed(message)) => assert!(message.contains("controller gone")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_drop_stops_worker() {
        let host = MemoryHost::new();
        host.add_root(1, 1);
        let worker = RefreshWorker::spawn(Arc::new(Enumerator::new(Box::new(host.clone())))).unwrap();
        worker.request_refresh();
        drop(worker);
        assert_eq!(host.open_sessions(), 0);
    }
}
