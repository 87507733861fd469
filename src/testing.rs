//! A scripted, wire-level ZooKeeper stand-in for exercising the connection engine without an
//! ensemble. Tests drive it frame by frame: accept a connection, answer the handshake, then
//! read requests and reply in whatever order and with whatever bytes the scenario calls for.

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use slog::o;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub(crate) struct ScriptedServer {
    listener: TcpListener,
}

impl ScriptedServer {
    pub(crate) async fn bind() -> (ScriptedServer, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (ScriptedServer { listener }, addr)
    }

    pub(crate) async fn accept(&self) -> ScriptedSession {
        let (stream, _) = self.listener.accept().await.unwrap();
        ScriptedSession { stream }
    }
}

/// What the client claimed in its connect request.
#[derive(Debug)]
pub(crate) struct ConnectSeen {
    pub(crate) protocol_version: i32,
    pub(crate) last_zxid: i64,
    pub(crate) timeout: i32,
    pub(crate) session_id: i64,
    pub(crate) passwd: Vec<u8>,
}

pub(crate) struct ScriptedSession {
    stream: TcpStream,
}

impl ScriptedSession {
    pub(crate) async fn read_raw_frame(&mut self) -> Vec<u8> {
        let mut len_buf = [0u8; 4];
        self.stream.read_exact(&mut len_buf).await.unwrap();
        let len = BigEndian::read_i32(&len_buf) as usize;
        let mut frame = vec![0u8; len];
        self.stream.read_exact(&mut frame).await.unwrap();
        frame
    }

    async fn write_raw_frame(&mut self, body: &[u8]) {
        let mut buf = Vec::with_capacity(body.len() + 4);
        WriteBytesExt::write_i32::<BigEndian>(&mut buf, body.len() as i32).unwrap();
        buf.extend_from_slice(body);
        self.stream.write_all(&buf).await.unwrap();
    }

    /// Reads and decodes the header-less connect request that opens every connection.
    pub(crate) async fn expect_connect(&mut self) -> ConnectSeen {
        let frame = self.read_raw_frame().await;
        let passwd_len = BigEndian::read_i32(&frame[24..28]);
        let passwd_len = if passwd_len < 0 { 0 } else { passwd_len as usize };
        ConnectSeen {
            protocol_version: BigEndian::read_i32(&frame[0..4]),
            last_zxid: BigEndian::read_i64(&frame[4..12]),
            timeout: BigEndian::read_i32(&frame[12..16]),
            session_id: BigEndian::read_i64(&frame[16..24]),
            passwd: frame[28..28 + passwd_len].to_vec(),
        }
    }

    /// Accepts the session: the client adopts `session_id` and the negotiated timeout.
    pub(crate) async fn grant(&mut self, session_id: i64, timeout_ms: i32) {
        let mut body = Vec::new();
        WriteBytesExt::write_i32::<BigEndian>(&mut body, 0).unwrap();
        WriteBytesExt::write_i32::<BigEndian>(&mut body, timeout_ms).unwrap();
        WriteBytesExt::write_i64::<BigEndian>(&mut body, session_id).unwrap();
        WriteBytesExt::write_i32::<BigEndian>(&mut body, 16).unwrap();
        body.extend_from_slice(&[0u8; 16]);
        self.write_raw_frame(&body).await;
    }

    /// Refuses the session, which the client must treat as expiry.
    pub(crate) async fn deny(&mut self) {
        self.grant(0, 0).await;
    }

    /// Returns the next `(xid, opcode, body)` request, transparently echoing heartbeats.
    pub(crate) async fn read_request(&mut self) -> (i32, i32, Vec<u8>) {
        loop {
            let frame = self.read_raw_frame().await;
            let xid = BigEndian::read_i32(&frame[0..4]);
            let opcode = BigEndian::read_i32(&frame[4..8]);
            if xid == -2 {
                self.reply(-2, 0, 0, &[]).await;
                continue;
            }
            return (xid, opcode, frame[8..].to_vec());
        }
    }

    /// Writes a `{xid, zxid, err}` response header followed by `body`.
    pub(crate) async fn reply(&mut self, xid: i32, zxid: i64, err: i32, body: &[u8]) {
        let mut frame = Vec::with_capacity(16 + body.len());
        WriteBytesExt::write_i32::<BigEndian>(&mut frame, xid).unwrap();
        WriteBytesExt::write_i64::<BigEndian>(&mut frame, zxid).unwrap();
        WriteBytesExt::write_i32::<BigEndian>(&mut frame, err).unwrap();
        frame.extend_from_slice(body);
        self.write_raw_frame(&frame).await;
    }

    /// Pushes an unsolicited watch event at the client.
    pub(crate) async fn push_event(&mut self, type_code: i32, state_code: i32, path: &str) {
        let mut body = Vec::new();
        WriteBytesExt::write_i32::<BigEndian>(&mut body, type_code).unwrap();
        WriteBytesExt::write_i32::<BigEndian>(&mut body, state_code).unwrap();
        WriteBytesExt::write_i32::<BigEndian>(&mut body, path.len() as i32).unwrap();
        body.extend_from_slice(path.as_bytes());
        self.reply(-1, 0, 0, &body).await;
    }
}

/// A stat whose `mzxid` is `zxid`; the other fields are stable filler.
pub(crate) fn stat_body(zxid: i64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(68);
    WriteBytesExt::write_i64::<BigEndian>(&mut buf, zxid).unwrap(); // czxid
    WriteBytesExt::write_i64::<BigEndian>(&mut buf, zxid).unwrap(); // mzxid
    WriteBytesExt::write_i64::<BigEndian>(&mut buf, 1_500_000_000_000).unwrap(); // ctime
    WriteBytesExt::write_i64::<BigEndian>(&mut buf, 1_500_000_000_000).unwrap(); // mtime
    WriteBytesExt::write_i32::<BigEndian>(&mut buf, 0).unwrap(); // version
    WriteBytesExt::write_i32::<BigEndian>(&mut buf, 0).unwrap(); // cversion
    WriteBytesExt::write_i32::<BigEndian>(&mut buf, 0).unwrap(); // aversion
    WriteBytesExt::write_i64::<BigEndian>(&mut buf, 0).unwrap(); // ephemeral owner
    WriteBytesExt::write_i32::<BigEndian>(&mut buf, 0).unwrap(); // data length
    WriteBytesExt::write_i32::<BigEndian>(&mut buf, 0).unwrap(); // num children
    WriteBytesExt::write_i64::<BigEndian>(&mut buf, zxid).unwrap(); // pzxid
    buf
}

/// The body of a create response: the final path of the node.
pub(crate) fn path_body(path: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    WriteBytesExt::write_i32::<BigEndian>(&mut buf, path.len() as i32).unwrap();
    buf.extend_from_slice(path.as_bytes());
    buf
}

/// The body of a get-data response.
pub(crate) fn data_body(data: &[u8], zxid: i64) -> Vec<u8> {
    let mut buf = Vec::new();
    WriteBytesExt::write_i32::<BigEndian>(&mut buf, data.len() as i32).unwrap();
    buf.extend_from_slice(data);
    buf.extend_from_slice(&stat_body(zxid));
    buf
}

/// The body of a get-children response.
pub(crate) fn children_body(names: &[&str], zxid: i64) -> Vec<u8> {
    let mut buf = Vec::new();
    WriteBytesExt::write_i32::<BigEndian>(&mut buf, names.len() as i32).unwrap();
    for name in names {
        WriteBytesExt::write_i32::<BigEndian>(&mut buf, name.len() as i32).unwrap();
        buf.extend_from_slice(name.as_bytes());
    }
    buf.extend_from_slice(&stat_body(zxid));
    buf
}

/// Decodes the leading length-prefixed string of a request body, which for every node operation
/// is the path.
pub(crate) fn first_string(body: &[u8]) -> String {
    let len = BigEndian::read_i32(&body[0..4]) as usize;
    String::from_utf8(body[4..4 + len].to_vec()).unwrap()
}

pub(crate) fn test_logger() -> slog::Logger {
    use slog::Drain;
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, o!())
}
