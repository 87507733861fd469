//! The session-bearing connection engine.
//!
//! One logical session is maintained across any number of TCP connections by three cooperating
//! loops: the session loop (dial, handshake, supervise, flush), a send pipeline that is the sole
//! consumer of the outbound queue, and a receive pipeline that demultiplexes frames back to
//! per-request completion sinks and the watch registry.

use super::request::{OpCode, Request};
use super::response::{ReadFrom, Response};
use super::watch::WatchRegistry;
use crate::error::Error;
use crate::types::{SessionState, WatchedEvent};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use futures::channel::oneshot;
use slog::{crit, debug, info, trace, warn};
use std::collections::HashMap;
use std::io;
use std::process;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time;

/// Depth of the outbound request queue; submitters block once it fills up.
pub(crate) const SEND_QUEUE_DEPTH: usize = 16;

/// Depth of the shared event channel; overflow is dropped, not queued.
pub(crate) const EVENT_CHANNEL_DEPTH: usize = 6;

const PROTOCOL_VERSION: i32 = 0;
const RESPONSE_HEADER_LEN: usize = 16;

/// Reserved xid carried by server-pushed watch events.
const WATCH_EVENT_XID: i32 = -1;
/// Reserved xid carried by heartbeats and their echoes.
const PING_XID: i32 = -2;

/// A submitted request on its way to the wire, together with the sink its outcome is owed to.
#[derive(Debug)]
pub(crate) struct Packet {
    pub(crate) xid: i32,
    pub(crate) opcode: OpCode,
    pub(crate) request: Request,
    pub(crate) tx: oneshot::Sender<Result<Response, Error>>,
}

#[derive(Debug)]
struct Pending {
    opcode: OpCode,
    tx: oneshot::Sender<Result<Response, Error>>,
}

/// State shared between the three loops and every client handle.
#[derive(Debug)]
pub(crate) struct Core {
    state: AtomicI32,
    xid: AtomicI32,
    last_zxid: AtomicI64,
    requests: Mutex<HashMap<i32, Pending>>,
    pub(crate) watches: WatchRegistry,
    event_tx: mpsc::Sender<WatchedEvent>,
    quit_tx: watch::Sender<bool>,
    quit_rx: watch::Receiver<bool>,
    pub(crate) logger: slog::Logger,
}

impl Core {
    pub(crate) fn new(event_tx: mpsc::Sender<WatchedEvent>, logger: slog::Logger) -> Core {
        let (quit_tx, quit_rx) = watch::channel(false);
        Core {
            state: AtomicI32::new(SessionState::Disconnected as i32),
            xid: AtomicI32::new(0),
            last_zxid: AtomicI64::new(0),
            requests: Mutex::new(HashMap::new()),
            watches: WatchRegistry::new(),
            event_tx,
            quit_tx,
            quit_rx,
            logger,
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        SessionState::from(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state as i32, Ordering::SeqCst);
        // best effort: the subscriber may not be draining the channel
        let _ = self.event_tx.try_send(WatchedEvent::session(state));
    }

    /// Xids start at 1 within a session; 0 and the negative range are reserved.
    pub(crate) fn next_xid(&self) -> i32 {
        self.xid.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Asks the session loop to stop reconnecting and wind down.
    pub(crate) fn request_quit(&self) {
        let _ = self.quit_tx.send(true);
    }

    fn should_quit(&self) -> bool {
        *self.quit_rx.borrow()
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.requests
            .lock()
            .expect("request table lock poisoned")
            .len()
    }
}

/// Connection parameters fixed at construction time.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(crate) servers: Vec<String>,
    pub(crate) session_timeout: Duration,
    pub(crate) connect_timeout: Duration,
    pub(crate) reconnect_delay: Duration,
}

/// How a pipeline pass ended. The receive pipeline has no "success" exit; the closest it gets is
/// a clean end-of-stream after a close request or a server-side shutdown.
#[derive(Debug)]
enum LoopEnd {
    Eof,
    Fault(Error),
}

/// The outer loop that owns the session identity and supervises one pipeline pass per TCP
/// connection.
pub(crate) struct SessionLoop {
    core: Arc<Core>,
    settings: Settings,
    server_index: usize,
    session_id: i64,
    passwd: Vec<u8>,
    timeout_ms: i32,
    recv_timeout: Duration,
    ping_interval: Duration,
    queue: Option<mpsc::Receiver<Packet>>,
}

impl SessionLoop {
    pub(crate) fn new(
        core: Arc<Core>,
        settings: Settings,
        queue: mpsc::Receiver<Packet>,
    ) -> SessionLoop {
        let proposal_ms = settings.session_timeout.as_millis() as i32;
        let recv_timeout = settings.session_timeout * 2 / 3;
        SessionLoop {
            core,
            server_index: 0,
            session_id: 0,
            passwd: Vec::new(),
            timeout_ms: proposal_ms,
            recv_timeout,
            ping_interval: recv_timeout / 2,
            queue: Some(queue),
            settings,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let mut stream = match self.dial().await {
                Some(stream) => stream,
                None => break,
            };

            match self.authenticate(&mut stream).await {
                Err(Error::SessionExpired) => {
                    info!(self.core.logger, "session expired by the server");
                    self.core.watches.invalidate(Error::SessionExpired);
                    self.core.set_state(SessionState::Disconnected);
                    self.flush(Error::SessionExpired);
                }
                Err(err) => {
                    warn!(self.core.logger, "handshake failed: {}", err);
                    self.core.set_state(SessionState::Disconnected);
                    self.flush(Error::ConnectionClosed);
                }
                Ok(()) => {
                    let restore = self.restore_watches_packet();
                    let end = self.run_pipelines(stream, restore).await;
                    self.core.set_state(SessionState::Disconnected);
                    match end {
                        LoopEnd::Eof
                        | LoopEnd::Fault(Error::ConnectionClosed)
                        | LoopEnd::Fault(Error::SessionExpired) => {}
                        LoopEnd::Fault(err) => {
                            warn!(self.core.logger, "connection lost: {}", err);
                        }
                    }
                    self.flush(Error::ConnectionClosed);
                }
            }

            if self.core.should_quit() {
                break;
            }
            if self.settings.reconnect_delay > Duration::ZERO {
                let mut quit = self.core.quit_rx.clone();
                tokio::select! {
                    _ = time::sleep(self.settings.reconnect_delay) => {}
                    _ = quit.changed() => break,
                }
            }
        }

        // final teardown: whoever is still parked learns the session is gone for good
        self.flush(Error::SessionExpired);
        self.core.watches.invalidate(Error::SessionExpired);
        debug!(self.core.logger, "session loop finished");
    }

    /// Dials servers in strict round-robin order until one accepts, sleeping a second after every
    /// full unsuccessful pass. Returns `None` once shutdown is requested.
    async fn dial(&mut self) -> Option<TcpStream> {
        let start_index = self.server_index;
        self.core.set_state(SessionState::Connecting);
        loop {
            if self.core.should_quit() {
                return None;
            }
            let server = &self.settings.servers[self.server_index];
            let attempt = TcpStream::connect(server.as_str());
            match time::timeout(self.settings.connect_timeout, attempt).await {
                Ok(Ok(stream)) => {
                    debug!(self.core.logger, "connected"; "server" => server);
                    self.core.set_state(SessionState::Connected);
                    return Some(stream);
                }
                Ok(Err(err)) => {
                    warn!(self.core.logger, "failed to connect to {}: {}", server, err);
                }
                Err(_) => {
                    warn!(self.core.logger, "connection attempt to {} timed out", server);
                }
            }
            self.server_index = (self.server_index + 1) % self.settings.servers.len();
            if self.server_index == start_index {
                let mut quit = self.core.quit_rx.clone();
                tokio::select! {
                    _ = time::sleep(Duration::from_secs(1)) => {}
                    _ = quit.changed() => return None,
                }
            }
        }
    }

    /// Presents the session identity to a freshly connected server and adopts the negotiated
    /// parameters. A `session_id` of zero in the response means the server refused the session.
    async fn authenticate(&mut self, stream: &mut TcpStream) -> Result<(), Error> {
        let request = Request::Connect {
            protocol_version: PROTOCOL_VERSION,
            last_zxid_seen: self.core.last_zxid.load(Ordering::SeqCst),
            timeout: self.timeout_ms,
            session_id: self.session_id,
            passwd: self.passwd.clone(),
        };
        trace!(self.core.logger, "sending connect request"; "session_id" => self.session_id);

        let mut buf = Vec::with_capacity(256);
        buf.extend_from_slice(&[0; 4]);
        request
            .serialize_into(&mut buf)
            .map_err(|e| Error::Marshalling(e.to_string()))?;
        let body_len = (buf.len() - 4) as i32;
        BigEndian::write_i32(&mut buf[..4], body_len);
        stream.write_all(&buf).await?;

        let frame = read_frame(stream, self.recv_timeout)
            .await?
            .ok_or(Error::ConnectionClosed)?;
        let response = Response::parse(OpCode::CreateSession, &frame)
            .map_err(|e| Error::Marshalling(e.to_string()))?;
        let (timeout, session_id, passwd) = match response {
            Response::Connect {
                timeout,
                session_id,
                passwd,
                ..
            } => (timeout, session_id, passwd),
            _ => unreachable!("connect responses decode to Response::Connect"),
        };

        if session_id == 0 {
            self.session_id = 0;
            self.passwd = Vec::new();
            self.core.set_state(SessionState::Expired);
            return Err(Error::SessionExpired);
        }
        if timeout <= 0 {
            return Err(Error::Marshalling(format!(
                "server negotiated non-positive session timeout {}",
                timeout
            )));
        }
        if self.session_id != session_id {
            // a fresh session restarts the xid sequence
            self.core.xid.store(0, Ordering::SeqCst);
        }
        self.timeout_ms = timeout;
        self.session_id = session_id;
        self.passwd = passwd;
        self.recv_timeout = Duration::from_millis(timeout as u64 * 2 / 3);
        self.ping_interval = self.recv_timeout / 2;
        self.core.set_state(SessionState::HasSession);
        debug!(self.core.logger, "session established";
               "session_id" => session_id, "timeout_ms" => timeout);
        Ok(())
    }

    /// Builds the set-watches packet for this pass, if any subscriptions need restoring, and
    /// spawns the task that polices its outcome.
    fn restore_watches_packet(&self) -> Option<Packet> {
        let zxid = self.core.last_zxid.load(Ordering::SeqCst);
        let request = self.core.watches.set_watches(zxid)?;
        let (tx, rx) = oneshot::channel();
        let packet = Packet {
            xid: self.core.next_xid(),
            opcode: OpCode::SetWatches,
            request,
            tx,
        };
        let logger = self.core.logger.clone();
        tokio::spawn(async move {
            match rx.await {
                Ok(Ok(_)) => trace!(logger, "watches restored"),
                // the transport died first; the registry is intact and the next
                // handshake re-issues the request
                Ok(Err(Error::ConnectionClosed))
                | Ok(Err(Error::SessionExpired))
                | Err(_) => {}
                Ok(Err(err)) => {
                    // continuing would leave the application with a silently degraded view
                    crit!(logger, "unable to restore watches: {}", err);
                    process::exit(1);
                }
            }
        });
        Some(packet)
    }

    /// Runs the send and receive pipelines over one connection and tears them down in order:
    /// the receive pipeline finishes first (it always ends with `Eof` or a fault), then the send
    /// pipeline is released and awaited, then the socket halves are dropped.
    async fn run_pipelines(&mut self, stream: TcpStream, first: Option<Packet>) -> LoopEnd {
        let (mut sock_read, mut sock_write) = stream.into_split();
        let (closer_tx, mut closer_rx) = oneshot::channel::<()>();
        let (abort_tx, mut abort_rx) = oneshot::channel::<()>();

        let core = Arc::clone(&self.core);
        let ping_interval = self.ping_interval;
        let mut queue = self
            .queue
            .take()
            .expect("send queue receiver is owned by a previous pass");
        let send_task = tokio::spawn(async move {
            let result = send_loop(
                &core,
                &mut queue,
                first,
                &mut sock_write,
                &mut closer_rx,
                ping_interval,
            )
            .await;
            if result.is_err() {
                // the socket is beyond use; unblock the receive pipeline
                let _ = abort_tx.send(());
            }
            (result, queue)
        });

        let end = recv_loop(&self.core, &mut sock_read, &mut abort_rx, self.recv_timeout).await;

        // the receive pipeline is done; release the send pipeline and wait for it
        drop(closer_tx);
        let (send_result, queue) = send_task.await.expect("send pipeline panicked");
        if let Err(err) = send_result {
            debug!(self.core.logger, "send pipeline stopped: {}", err);
        }
        self.queue = Some(queue);
        // both pipelines have terminated; this closes the read half, the write half went
        // down with the send task
        drop(sock_read);
        end
    }

    /// Fails every entry in the correlation table with `err`. Runs exactly once per pass.
    fn flush(&self, err: Error) {
        let mut requests = self
            .core
            .requests
            .lock()
            .expect("request table lock poisoned");
        if !requests.is_empty() {
            debug!(
                self.core.logger,
                "failing {} in-flight requests: {}",
                requests.len(),
                err
            );
        }
        for (_, pending) in requests.drain() {
            let _ = pending.tx.send(Err(err.clone()));
        }
    }
}

enum SendOutcome {
    Sent,
    Closing,
}

/// Serializes one packet, registers it in the correlation table, and writes the frame.
///
/// The close signal is checked under the table lock so that a packet is never registered after
/// the receive pipeline has given up on the connection.
async fn transmit(
    core: &Core,
    buf: &mut Vec<u8>,
    sock: &mut OwnedWriteHalf,
    closer: &mut oneshot::Receiver<()>,
    packet: Packet,
) -> Result<SendOutcome, Error> {
    let Packet {
        xid,
        opcode,
        request,
        tx,
    } = packet;

    if let Err(err) = frame_packet(buf, xid, opcode, &request) {
        // tell the submitter and keep the pipeline alive
        let _ = tx.send(Err(Error::Marshalling(err.to_string())));
        return Ok(SendOutcome::Sent);
    }

    {
        let mut requests = core.requests.lock().expect("request table lock poisoned");
        if !matches!(closer.try_recv(), Ok(None)) {
            drop(requests);
            let _ = tx.send(Err(Error::ConnectionClosed));
            return Ok(SendOutcome::Closing);
        }
        requests.insert(xid, Pending { opcode, tx });
    }

    if let Err(err) = sock.write_all(buf).await {
        let err = Error::from(err);
        // the waiter must not be left for the flush; it gets the write error directly
        let pending = core
            .requests
            .lock()
            .expect("request table lock poisoned")
            .remove(&xid);
        if let Some(pending) = pending {
            let _ = pending.tx.send(Err(err.clone()));
        }
        return Err(err);
    }
    trace!(core.logger, "wrote request"; "xid" => xid, "opcode" => ?opcode);
    Ok(SendOutcome::Sent)
}

/// The single consumer of the outbound queue. Exits when told to close, when the queue closes
/// (every handle dropped), or on a write failure.
async fn send_loop(
    core: &Core,
    queue: &mut mpsc::Receiver<Packet>,
    first: Option<Packet>,
    sock: &mut OwnedWriteHalf,
    closer: &mut oneshot::Receiver<()>,
    ping_interval: Duration,
) -> Result<(), Error> {
    let mut buf = Vec::with_capacity(4096);

    if let Some(packet) = first {
        match transmit(core, &mut buf, sock, closer, packet).await? {
            SendOutcome::Sent => {}
            SendOutcome::Closing => return Ok(()),
        }
    }

    let mut pings = time::interval_at(time::Instant::now() + ping_interval, ping_interval);
    loop {
        tokio::select! {
            packet = queue.recv() => match packet {
                Some(packet) => match transmit(core, &mut buf, sock, closer, packet).await? {
                    SendOutcome::Sent => {}
                    SendOutcome::Closing => return Ok(()),
                },
                None => {
                    debug!(core.logger, "every handle is gone; closing the session");
                    core.request_quit();
                    frame_header_only(&mut buf, 0, OpCode::CloseSession);
                    let _ = sock.write_all(&buf).await;
                    return Ok(());
                }
            },
            _ = pings.tick() => {
                frame_header_only(&mut buf, PING_XID, OpCode::Ping);
                sock.write_all(&buf).await?;
                trace!(core.logger, "sent heartbeat");
            }
            _ = &mut *closer => return Ok(()),
        }
    }
}

/// Reads frames and routes them by xid: watch events to the registry and event channel, ping
/// echoes to the void, everything else to the waiter registered in the correlation table.
async fn recv_loop(
    core: &Core,
    sock: &mut OwnedReadHalf,
    abort: &mut oneshot::Receiver<()>,
    recv_timeout: Duration,
) -> LoopEnd {
    loop {
        let frame = tokio::select! {
            frame = read_frame(sock, recv_timeout) => match frame {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!(core.logger, "server closed the connection");
                    return LoopEnd::Eof;
                }
                Err(err) => return LoopEnd::Fault(err),
            },
            _ = &mut *abort => return LoopEnd::Fault(Error::ConnectionClosed),
        };

        if frame.len() < RESPONSE_HEADER_LEN {
            return LoopEnd::Fault(Error::Marshalling(format!(
                "frame of {} bytes cannot hold a response header",
                frame.len()
            )));
        }
        let xid = BigEndian::read_i32(&frame[0..4]);
        let zxid = BigEndian::read_i64(&frame[4..12]);
        let err_code = BigEndian::read_i32(&frame[12..16]);
        let body = &frame[RESPONSE_HEADER_LEN..];

        if xid == WATCH_EVENT_XID {
            let event = match WatchedEvent::read_from(&mut &*body) {
                Ok(event) => event,
                Err(err) => return LoopEnd::Fault(Error::Marshalling(err.to_string())),
            };
            trace!(core.logger, "watch event";
                   "path" => &event.path, "type" => ?event.event_type);
            let _ = core.event_tx.try_send(event.clone());
            core.watches.dispatch(&event);
        } else if xid == PING_XID {
            trace!(core.logger, "heartbeat acknowledged");
        } else if xid < 0 {
            info!(core.logger, "frame with unexpected reserved xid"; "xid" => xid);
        } else {
            if zxid > 0 {
                core.last_zxid.fetch_max(zxid, Ordering::SeqCst);
            }
            let pending = core
                .requests
                .lock()
                .expect("request table lock poisoned")
                .remove(&xid);
            let Pending { opcode, tx } = match pending {
                Some(pending) => pending,
                None => {
                    info!(core.logger, "response for unknown request"; "xid" => xid);
                    continue;
                }
            };
            if err_code != 0 {
                debug!(core.logger, "server error response";
                       "xid" => xid, "opcode" => ?opcode, "code" => err_code);
                let _ = tx.send(Err(Error::from_server_code(err_code)));
            } else {
                match Response::parse(opcode, body) {
                    Ok(response) => {
                        trace!(core.logger, "response"; "xid" => xid, "opcode" => ?opcode);
                        let _ = tx.send(Ok(response));
                    }
                    Err(err) => {
                        // the stream cannot be trusted past a body that fails to decode
                        let err = Error::Marshalling(err.to_string());
                        let _ = tx.send(Err(err.clone()));
                        return LoopEnd::Fault(err);
                    }
                }
            }
            if opcode == OpCode::CloseSession {
                debug!(core.logger, "session closed by our request");
                return LoopEnd::Eof;
            }
        }
    }
}

/// Reads one length-prefixed frame. `Ok(None)` is a clean end-of-stream at a frame boundary;
/// every read is bounded by `limit` so a dead server cannot park the pipeline forever.
async fn read_frame<R>(sock: &mut R, limit: Duration) -> Result<Option<Vec<u8>>, Error>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match time::timeout(limit, sock.read_exact(&mut len_buf)).await {
        Err(_) => return Err(Error::Io("read timed out".to_string())),
        Ok(Err(ref err)) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Ok(Err(err)) => return Err(err.into()),
        Ok(Ok(_)) => {}
    }
    let len = BigEndian::read_i32(&len_buf);
    if len < 0 {
        return Err(Error::Marshalling(format!("negative frame length {}", len)));
    }
    let mut frame = vec![0u8; len as usize];
    match time::timeout(limit, sock.read_exact(&mut frame)).await {
        Err(_) => Err(Error::Io("read timed out".to_string())),
        Ok(Err(err)) => Err(err.into()),
        Ok(Ok(_)) => Ok(Some(frame)),
    }
}

/// Frames a header-plus-body request: 4-byte length prefix, `{xid, opcode}`, body.
fn frame_packet(buf: &mut Vec<u8>, xid: i32, opcode: OpCode, request: &Request) -> io::Result<()> {
    buf.clear();
    buf.extend_from_slice(&[0; 4]);
    WriteBytesExt::write_i32::<BigEndian>(buf, xid)?;
    WriteBytesExt::write_i32::<BigEndian>(buf, opcode as i32)?;
    request.serialize_into(buf)?;
    let body_len = (buf.len() - 4) as i32;
    BigEndian::write_i32(&mut buf[..4], body_len);
    Ok(())
}

/// Frames a body-less request; pings and the last-resort close use this.
fn frame_header_only(buf: &mut Vec<u8>, xid: i32, opcode: OpCode) {
    buf.clear();
    WriteBytesExt::write_i32::<BigEndian>(buf, 8)
        .expect("Vec::write should never fail");
    WriteBytesExt::write_i32::<BigEndian>(buf, xid)
        .expect("Vec::write should never fail");
    WriteBytesExt::write_i32::<BigEndian>(buf, opcode as i32)
        .expect("Vec::write should never fail");
}
