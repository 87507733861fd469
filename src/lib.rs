//! An asynchronous client for [Apache ZooKeeper](https://zookeeper.apache.org/), the replicated
//! coordination service, built for the tokio runtime.
//!
//! The heart of the crate is a session-bearing connection engine: one logical session is kept
//! alive across any number of TCP connections to any server in the configured list. Requests from
//! any number of tasks are multiplexed onto a single socket, heartbeats keep the session fresh
//! while the connection idles, and responses and server-pushed watch notifications are routed
//! back to the callers and watchers they belong to. When the transport fails, the client
//! reconnects on its own, re-presents the session identity, and re-declares every live watch
//! subscription to the new server.
//!
//! # Sessions
//!
//! A session is identified by a server-assigned id and an opaque credential, both negotiated
//! during a handshake and re-presented on every reconnect. The server keeps a session alive as
//! long as it hears from the client within the negotiated timeout, so short network hiccups are
//! invisible to the application beyond the affected in-flight requests, which fail with
//! [`Error::ConnectionClosed`] and may be retried. Only when the server refuses the handshake is
//! the session truly gone: the client transitions to [`SessionState::Expired`], all watches are
//! cancelled with a [`WatchedEventType::NotWatching`] event, and ephemeral nodes created under
//! the session disappear on the server. The client then starts over with a fresh session.
//!
//! # Watches
//!
//! `exists_w`, `get_data_w`, and `get_children_w` leave a *watch* on the node they touch. A watch
//! is one-shot and edge-triggered: the first matching change after the operation delivers exactly
//! one [`WatchedEvent`] on the returned channel, after which the watch is spent and must be
//! re-registered if the application still cares. Watches survive reconnects within a session; on
//! expiry they are cancelled as described above.
//!
//! Session state transitions and all watch events are additionally published on the shared event
//! stream handed out at construction. The stream is bounded and the client never blocks on it:
//! if the application falls behind, events are dropped.
//!
//! # Example
//!
//! ```no_run
//! use tokio_zk::{Acl, CreateMode, ZooKeeper};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tokio_zk::Error> {
//!     let (zk, _events) = ZooKeeper::connect(&["127.0.0.1:2181"])?;
//!
//!     let path = zk
//!         .create("/example", b"hello".to_vec(), Acl::open_unsafe(), CreateMode::Persistent)
//!         .await?;
//!     assert_eq!(path, "/example");
//!
//!     let (data, stat) = zk.get_data("/example").await?;
//!     assert_eq!(data, b"hello");
//!     zk.delete("/example", Some(stat.version)).await?;
//!
//!     zk.close().await;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![deny(missing_copy_implementations)]

mod error;
mod proto;
mod transform;
mod types;

#[cfg(test)]
mod testing;

pub use crate::error::Error;
pub use crate::proto::ZkError;
pub use crate::types::{
    Acl, CreateMode, Permission, SessionState, Stat, WatchedEvent, WatchedEventType,
};

use crate::proto::{Core, Packet, Request, Response, SessionLoop, Settings, WatchType};
use futures::channel::oneshot;
use rand::Rng;
use slog::{o, trace};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time;

const DEFAULT_PORT: u16 = 2181;

/// Prefix embedded into node names by `create_protected_ephemeral_sequential` so an uncertain
/// create outcome can be recovered by listing the parent.
const PROTECTED_PREFIX: &str = "_c_";

/// Builder that allows customizing options for ZooKeeper connections.
#[derive(Debug, Clone)]
pub struct ZooKeeperBuilder {
    session_timeout: Duration,
    connect_timeout: Duration,
    reconnect_delay: Duration,
    logger: slog::Logger,
}

impl Default for ZooKeeperBuilder {
    fn default() -> Self {
        ZooKeeperBuilder {
            session_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(1),
            reconnect_delay: Duration::ZERO,
            logger: slog::Logger::root(slog::Discard, o!()),
        }
    }
}

impl ZooKeeperBuilder {
    /// Set the session timeout proposed to the server during the handshake.
    ///
    /// The server may negotiate it down; the negotiated value also drives the heartbeat cadence
    /// and the read deadline on the connection.
    pub fn set_session_timeout(&mut self, timeout: Duration) {
        self.session_timeout = timeout;
    }

    /// Set the deadline for each TCP connection attempt.
    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
    }

    /// Set a pause inserted between losing a connection and dialing the next server.
    ///
    /// The default is no pause. Mainly useful for tests that want to observe the client while it
    /// is disconnected.
    pub fn set_reconnect_delay(&mut self, delay: Duration) {
        self.reconnect_delay = delay;
    }

    /// Set the logger used internally by the client.
    ///
    /// By default all logging is discarded. See the [`slog` documentation](https://docs.rs/slog).
    pub fn set_logger(&mut self, logger: slog::Logger) {
        self.logger = logger;
    }

    /// Start a client against `servers`, a list of `host:port` endpoints; entries without a port
    /// get the default `2181` appended.
    ///
    /// This returns immediately: dialing, the session handshake, and every later reconnect happen
    /// on a background task, observable through the returned event stream. Must be called from
    /// within a tokio runtime.
    pub fn connect(
        &self,
        servers: &[&str],
    ) -> Result<(ZooKeeper, mpsc::Receiver<WatchedEvent>), Error> {
        if servers.is_empty() {
            return Err(Error::NoServers);
        }
        let servers = servers
            .iter()
            .map(|server| {
                if server.contains(':') {
                    server.to_string()
                } else {
                    format!("{}:{}", server, DEFAULT_PORT)
                }
            })
            .collect();

        let (event_tx, event_rx) = mpsc::channel(proto::EVENT_CHANNEL_DEPTH);
        let (send_tx, send_rx) = mpsc::channel(proto::SEND_QUEUE_DEPTH);
        let core = Arc::new(Core::new(event_tx, self.logger.clone()));
        let settings = Settings {
            servers,
            session_timeout: self.session_timeout,
            connect_timeout: self.connect_timeout,
            reconnect_delay: self.reconnect_delay,
        };
        tokio::spawn(SessionLoop::new(Arc::clone(&core), settings, send_rx).run());

        let zk = ZooKeeper {
            core,
            send_tx,
            logger: self.logger.clone(),
        };
        Ok((zk, event_rx))
    }
}

/// A handle to a ZooKeeper session.
///
/// Handles are cheap to clone and every clone talks through the same underlying session. The
/// session stays alive until [`close`](ZooKeeper::close) is called or every handle is dropped;
/// either retires the session at the server, which also removes its ephemeral nodes.
#[derive(Debug, Clone)]
pub struct ZooKeeper {
    core: Arc<Core>,
    send_tx: mpsc::Sender<Packet>,
    logger: slog::Logger,
}

impl ZooKeeper {
    /// Start a client against `servers` with default parameters.
    ///
    /// See [`ZooKeeperBuilder::connect`].
    pub fn connect(servers: &[&str]) -> Result<(Self, mpsc::Receiver<WatchedEvent>), Error> {
        ZooKeeperBuilder::default().connect(servers)
    }

    /// The current state of the session.
    pub fn state(&self) -> SessionState {
        self.core.state()
    }

    async fn request(&self, request: Request) -> Result<Response, Error> {
        let opcode = request.opcode();
        let (tx, rx) = oneshot::channel();
        let packet = Packet {
            xid: self.core.next_xid(),
            opcode,
            request,
            tx,
        };
        self.send_tx
            .send(packet)
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Present authentication credentials to the server for the lifetime of the session.
    pub async fn add_auth(&self, scheme: &str, auth: Vec<u8>) -> Result<(), Error> {
        trace!(self.logger, "add_auth"; "scheme" => scheme);
        let res = self
            .request(Request::Auth {
                scheme: scheme.to_string(),
                auth,
            })
            .await;
        transform::empty("add_auth", res)
    }

    /// Create a node at `path` with `data` as its content and return the path actually created,
    /// which for sequential modes carries the server-assigned suffix.
    pub async fn create(
        &self,
        path: &str,
        data: Vec<u8>,
        acl: Vec<Acl>,
        mode: CreateMode,
    ) -> Result<String, Error> {
        trace!(self.logger, "create"; "path" => path, "mode" => ?mode, "dlen" => data.len());
        let res = self
            .request(Request::Create {
                path: path.to_string(),
                data,
                acl,
                mode,
            })
            .await;
        transform::create(res)
    }

    /// Delete the node at `path` if `version` matches its current version (`None` matches any).
    pub async fn delete(&self, path: &str, version: Option<i32>) -> Result<(), Error> {
        trace!(self.logger, "delete"; "path" => path, "version" => ?version);
        let res = self
            .request(Request::Delete {
                path: path.to_string(),
                version: version.unwrap_or(-1),
            })
            .await;
        transform::delete(res)
    }

    async fn exists_inner(&self, path: &str, watch: bool) -> Result<Option<Stat>, Error> {
        trace!(self.logger, "exists"; "path" => path, "watch" => watch);
        let res = self
            .request(Request::Exists {
                path: path.to_string(),
                watch,
            })
            .await;
        transform::exists(res)
    }

    /// Return the [`Stat`] of the node at `path`, or `None` if no such node exists.
    pub async fn exists(&self, path: &str) -> Result<Option<Stat>, Error> {
        self.exists_inner(path, false).await
    }

    /// Like [`exists`](ZooKeeper::exists), but additionally leaves a watch on `path`.
    ///
    /// For a missing node the watch fires on creation; for an existing node it fires when the
    /// node's data is set or the node is deleted. The returned channel delivers at most one
    /// event.
    pub async fn exists_w(
        &self,
        path: &str,
    ) -> Result<(Option<Stat>, oneshot::Receiver<WatchedEvent>), Error> {
        let stat = self.exists_inner(path, true).await?;
        let kind = if stat.is_some() {
            WatchType::Data
        } else {
            WatchType::Exist
        };
        Ok((stat, self.core.watches.add(path, kind)))
    }

    async fn get_data_inner(&self, path: &str, watch: bool) -> Result<(Vec<u8>, Stat), Error> {
        trace!(self.logger, "get_data"; "path" => path, "watch" => watch);
        let res = self
            .request(Request::GetData {
                path: path.to_string(),
                watch,
            })
            .await;
        transform::get_data(res)
    }

    /// Return the data and the [`Stat`] of the node at `path`.
    pub async fn get_data(&self, path: &str) -> Result<(Vec<u8>, Stat), Error> {
        self.get_data_inner(path, false).await
    }

    /// Like [`get_data`](ZooKeeper::get_data), but additionally leaves a watch on `path` that
    /// fires when the node's data is set or the node is deleted. The returned channel delivers at
    /// most one event.
    pub async fn get_data_w(
        &self,
        path: &str,
    ) -> Result<(Vec<u8>, Stat, oneshot::Receiver<WatchedEvent>), Error> {
        let (data, stat) = self.get_data_inner(path, true).await?;
        Ok((data, stat, self.core.watches.add(path, WatchType::Data)))
    }

    /// Set the data of the node at `path` if `version` matches (`None` matches any) and return
    /// its updated [`Stat`].
    pub async fn set_data(
        &self,
        path: &str,
        data: Vec<u8>,
        version: Option<i32>,
    ) -> Result<Stat, Error> {
        trace!(self.logger, "set_data"; "path" => path, "version" => ?version, "dlen" => data.len());
        let res = self
            .request(Request::SetData {
                path: path.to_string(),
                data,
                version: version.unwrap_or(-1),
            })
            .await;
        transform::set_data(res)
    }

    async fn get_children_inner(
        &self,
        path: &str,
        watch: bool,
    ) -> Result<(Vec<String>, Stat), Error> {
        trace!(self.logger, "get_children"; "path" => path, "watch" => watch);
        let res = self
            .request(Request::GetChildren {
                path: path.to_string(),
                watch,
            })
            .await;
        transform::get_children(res)
    }

    /// Return the names of the children of the node at `path`, in no particular order, along with
    /// the node's [`Stat`].
    pub async fn get_children(&self, path: &str) -> Result<(Vec<String>, Stat), Error> {
        self.get_children_inner(path, false).await
    }

    /// Like [`get_children`](ZooKeeper::get_children), but additionally leaves a watch on `path`
    /// that fires when a child is created or deleted. The returned channel delivers at most one
    /// event.
    pub async fn get_children_w(
        &self,
        path: &str,
    ) -> Result<(Vec<String>, Stat, oneshot::Receiver<WatchedEvent>), Error> {
        let (children, stat) = self.get_children_inner(path, true).await?;
        Ok((
            children,
            stat,
            self.core.watches.add(path, WatchType::Child),
        ))
    }

    /// Return the ACL and the [`Stat`] of the node at `path`.
    pub async fn get_acl(&self, path: &str) -> Result<(Vec<Acl>, Stat), Error> {
        trace!(self.logger, "get_acl"; "path" => path);
        let res = self
            .request(Request::GetAcl {
                path: path.to_string(),
            })
            .await;
        transform::get_acl(res)
    }

    /// Replace the ACL of the node at `path` if `version` matches its ACL version (`None` matches
    /// any) and return its updated [`Stat`].
    pub async fn set_acl(
        &self,
        path: &str,
        acl: Vec<Acl>,
        version: Option<i32>,
    ) -> Result<Stat, Error> {
        trace!(self.logger, "set_acl"; "path" => path, "version" => ?version);
        let res = self
            .request(Request::SetAcl {
                path: path.to_string(),
                acl,
                version: version.unwrap_or(-1),
            })
            .await;
        transform::set_acl(res)
    }

    /// Create an ephemeral, sequential node whose name embeds a random guid, so that the create
    /// can be recovered if its outcome is lost to a connection failure.
    ///
    /// If the create fails with [`Error::ConnectionClosed`], the node may or may not exist. The
    /// parent is listed and scanned for the guid; if the node is found its full path is returned,
    /// otherwise the create is retried, up to three attempts. A session expiry simply retries:
    /// an ephemeral node cannot have outlived the session that would have created it.
    pub async fn create_protected_ephemeral_sequential(
        &self,
        path: &str,
        data: Vec<u8>,
        acl: Vec<Acl>,
    ) -> Result<String, Error> {
        let mut guid = [0u8; 16];
        rand::thread_rng().fill(&mut guid[..]);
        let mut guid_str = String::with_capacity(32);
        for byte in guid {
            write!(guid_str, "{:02x}", byte).expect("writing to a String never fails");
        }

        let (parent, name) = match path.rsplit_once('/') {
            Some(split) => split,
            None => ("", path),
        };
        let protected_path = format!("{}/{}{}-{}", parent, PROTECTED_PREFIX, guid_str, name);
        trace!(self.logger, "create protected"; "path" => &protected_path);

        let mut last_err = Error::ConnectionClosed;
        for _ in 0..3 {
            let res = self
                .request(Request::Create {
                    path: protected_path.clone(),
                    data: data.clone(),
                    acl: acl.clone(),
                    mode: CreateMode::EphemeralSequential,
                })
                .await;
            match transform::create(res) {
                Ok(created) => return Ok(created),
                Err(Error::SessionExpired) => {
                    // the node cannot exist: ephemerals die with the session that made them
                    last_err = Error::SessionExpired;
                }
                Err(Error::ConnectionClosed) => {
                    let (children, _) = self.get_children(parent).await?;
                    for child in children {
                        if let Some(rest) = child.strip_prefix(PROTECTED_PREFIX) {
                            if rest.get(..32) == Some(guid_str.as_str()) {
                                return Ok(format!("{}/{}", parent, child));
                            }
                        }
                    }
                    last_err = Error::ConnectionClosed;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err)
    }

    /// Close the session gracefully.
    ///
    /// Reconnecting stops immediately; the close itself is a real request to the server, bounded
    /// by one second. In-flight requests complete with [`Error::ConnectionClosed`].
    pub async fn close(&self) {
        trace!(self.logger, "close");
        self.core.request_quit();
        let _ = time::timeout(Duration::from_secs(1), self.request(Request::Close)).await;
    }
}
