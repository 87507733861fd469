use super::request::Request;
use crate::error::Error;
use crate::types::{SessionState, WatchedEvent, WatchedEventType};
use futures::channel::oneshot;
use std::collections::HashMap;
use std::sync::Mutex;

/// What a watch subscription is looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchType {
    /// Changes to the children of the node.
    Child,
    /// Changes to the data of the node.
    Data,
    /// Creation of a node at the given path.
    Exist,
}

#[derive(Debug, Default)]
struct PathWatchers {
    data: Vec<oneshot::Sender<WatchedEvent>>,
    exist: Vec<oneshot::Sender<WatchedEvent>>,
    child: Vec<oneshot::Sender<WatchedEvent>>,
}

impl PathWatchers {
    fn is_empty(&self) -> bool {
        self.data.is_empty() && self.exist.is_empty() && self.child.is_empty()
    }
}

/// The client-side mirror of the watches registered with the server.
///
/// Watches are edge-triggered and one-shot on the server; the registry mirrors that by draining
/// the subscriber list a delivery fires. Only the set of subscribed paths is retained, so the
/// state carried across a reconnect is proportional to live subscriptions.
#[derive(Debug, Default)]
pub(crate) struct WatchRegistry {
    by_path: Mutex<HashMap<String, PathWatchers>>,
}

fn fire(sinks: &mut Vec<oneshot::Sender<WatchedEvent>>, event: &WatchedEvent) {
    for tx in sinks.drain(..) {
        // the receiver may be gone; that just means nobody is listening anymore
        let _ = tx.send(event.clone());
    }
}

impl WatchRegistry {
    pub(crate) fn new() -> WatchRegistry {
        WatchRegistry::default()
    }

    /// Registers a one-shot subscription and hands back the receiving end.
    pub(crate) fn add(&self, path: &str, kind: WatchType) -> oneshot::Receiver<WatchedEvent> {
        let (tx, rx) = oneshot::channel();
        let mut by_path = self.by_path.lock().expect("watch registry lock poisoned");
        let entry = by_path.entry(path.to_string()).or_default();
        match kind {
            WatchType::Child => entry.child.push(tx),
            WatchType::Data => entry.data.push(tx),
            WatchType::Exist => entry.exist.push(tx),
        }
        rx
    }

    /// Delivers a server-pushed event to the subscriber kinds the protocol says it triggers, and
    /// drops the path entry once every kind is drained.
    pub(crate) fn dispatch(&self, event: &WatchedEvent) {
        let mut by_path = self.by_path.lock().expect("watch registry lock poisoned");
        let entry = match by_path.get_mut(&event.path) {
            Some(entry) => entry,
            None => return,
        };
        match event.event_type {
            WatchedEventType::NodeCreated => fire(&mut entry.exist, event),
            WatchedEventType::NodeDeleted | WatchedEventType::NodeDataChanged => {
                fire(&mut entry.exist, event);
                fire(&mut entry.data, event);
            }
            WatchedEventType::NodeChildrenChanged => fire(&mut entry.child, event),
            WatchedEventType::Session | WatchedEventType::NotWatching => {}
        }
        if entry.is_empty() {
            by_path.remove(&event.path);
        }
    }

    /// Tells every subscriber that its watch is gone and empties the registry.
    ///
    /// Called on session expiry and on final teardown.
    pub(crate) fn invalidate(&self, err: Error) {
        let mut by_path = self.by_path.lock().expect("watch registry lock poisoned");
        for (path, entry) in by_path.drain() {
            let event = WatchedEvent {
                event_type: WatchedEventType::NotWatching,
                state: SessionState::Disconnected,
                path,
                err: Some(err.clone()),
            };
            let sinks = entry
                .data
                .into_iter()
                .chain(entry.exist)
                .chain(entry.child);
            for tx in sinks {
                let _ = tx.send(event.clone());
            }
        }
    }

    /// Builds the request that re-declares every live subscription to a freshly handshaken
    /// server, or `None` when there is nothing to restore.
    pub(crate) fn set_watches(&self, relative_zxid: i64) -> Option<Request> {
        let by_path = self.by_path.lock().expect("watch registry lock poisoned");
        let mut data_watches = Vec::new();
        let mut exist_watches = Vec::new();
        let mut child_watches = Vec::new();
        let mut path_len = 0;
        for (path, entry) in by_path.iter() {
            if !entry.data.is_empty() {
                data_watches.push(path.clone());
                path_len += path.len();
            }
            if !entry.exist.is_empty() {
                exist_watches.push(path.clone());
                path_len += path.len();
            }
            if !entry.child.is_empty() {
                child_watches.push(path.clone());
                path_len += path.len();
            }
        }
        if path_len == 0 {
            return None;
        }
        Some(Request::SetWatches {
            relative_zxid,
            data_watches,
            exist_watches,
            child_watches,
        })
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.by_path
            .lock()
            .expect("watch registry lock poisoned")
            .is_empty()
    }
}
