mod conn;
mod error;
mod request;
mod response;
mod watch;

pub use self::error::ZkError;

pub(crate) use self::conn::{Core, Packet, SessionLoop, Settings};
pub(crate) use self::conn::{EVENT_CHANNEL_DEPTH, SEND_QUEUE_DEPTH};
pub(crate) use self::request::{OpCode, Request};
pub(crate) use self::response::Response;
pub(crate) use self::watch::WatchType;
