//! One accepted IPC connection: read a length-prefixed JSON request,
//! dispatch it, write a length-prefixed JSON reply, close.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::Duration;

use serde_json::Value;

use crate::error::Result;
use crate::reactor::io_object::{IoObject, IoObjectBase};
use crate::reactor::ReactorHandle;

use super::methods::{Args, HandlerContext, HandlerTable};

/// Requests larger than this are fatal: the connection is closed without a
/// reply.
const MAX_REQUEST_SIZE: u64 = 1024 * 1024;

/// How long a connection has to send a complete request before it is
/// closed.
const IPC_TIMEOUT: Duration = Duration::from_secs(10);

const SIZE_PREFIX_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    ReadingSize,
    ReadingBody(u64),
    Writing,
}

pub struct IpcConnection {
    base: IoObjectBase,
    phase: Phase,
    handlers: Rc<HandlerTable>,
    ctx: HandlerContext,
    client_id: u64,
}

impl IpcConnection {
    pub fn new(
        reactor: ReactorHandle,
        fd: RawFd,
        client_id: u64,
        handlers: Rc<HandlerTable>,
        ctx: HandlerContext,
    ) -> Self {
        let mut base = IoObjectBase::new(reactor.clone(), fd, format!("ipc-client-{client_id}"));

        // Cannot fail: `reactor` is the live handle the caller just used to
        // accept this connection.
        let timeout = reactor
            .clone()
            .schedule_after(
                IPC_TIMEOUT,
                Box::new(move || {
                    tracing::warn!(client_id, "IPC connection timed out");
                    reactor.close_object(fd);
                }),
            )
            .expect("reactor is alive for the lifetime of its own accept loop");
        base.attach_deferred(timeout);

        IpcConnection {
            base,
            phase: Phase::ReadingSize,
            handlers,
            ctx,
            client_id,
        }
    }

    fn handle_size(&mut self) -> Result<()> {
        if !self.base.try_read(SIZE_PREFIX_LEN)? {
            return Ok(());
        }
        let mut raw = [0u8; SIZE_PREFIX_LEN];
        raw.copy_from_slice(&self.base.read_buf()[..SIZE_PREFIX_LEN]);
        let size = u64::from_be_bytes(raw);

        if size > MAX_REQUEST_SIZE {
            tracing::warn!(client_id = self.client_id, size, "oversized IPC request, closing");
            self.base.close();
            return Ok(());
        }

        self.base.drain_read_prefix(SIZE_PREFIX_LEN);
        self.phase = Phase::ReadingBody(size);
        Ok(())
    }

    fn handle_body(&mut self, size: u64) -> Result<()> {
        if !self.base.try_read(size as usize)? {
            return Ok(());
        }
        let body = self.base.read_buf()[..size as usize].to_vec();
        self.base.drain_read_prefix(size as usize);

        let reply = match parse_request(&body) {
            Some((method, args)) => to_reply(self.handlers.dispatch(&self.ctx, &method, args)),
            None => {
                tracing::warn!(client_id = self.client_id, "malformed IPC request, closing");
                self.base.close();
                return Ok(());
            }
        };

        let framed = frame_reply(&reply);
        self.base.try_write(Some(&framed))?;
        self.phase = Phase::Writing;
        Ok(())
    }
}

impl IoObject for IpcConnection {
    fn base(&self) -> &IoObjectBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut IoObjectBase {
        &mut self.base
    }

    fn read_interest(&self) -> bool {
        matches!(self.phase, Phase::ReadingSize | Phase::ReadingBody(_))
    }

    fn write_interest(&self) -> bool {
        matches!(self.phase, Phase::Writing)
    }

    fn readable(&mut self) -> Result<()> {
        match self.phase {
            Phase::ReadingSize => self.handle_size(),
            Phase::ReadingBody(size) => self.handle_body(size),
            Phase::Writing => Ok(()),
        }
    }

    fn writable(&mut self) -> Result<()> {
        if self.base.try_write(None)? {
            self.base.close();
        }
        Ok(())
    }
}

/// A well-formed request is a JSON object whose values are all strings and
/// that contains `"method"`. Returns the method name and the remaining
/// keys as arguments, or `None` for any schema violation.
fn parse_request(body: &[u8]) -> Option<(String, Args)> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let object = value.as_object()?;

    let mut args = HashMap::new();
    for (key, value) in object {
        args.insert(key.clone(), value.as_str()?.to_string());
    }

    let method = args.remove("method")?;
    Some((method, args))
}

fn to_reply(result: Result<Value>) -> Value {
    match result {
        Ok(value) => serde_json::json!({ "result": value }),
        Err(err) if err.is_domain() => serde_json::json!({ "error": err.to_string() }),
        Err(err) => {
            tracing::error!(error = %err, "internal error dispatching IPC request");
            serde_json::json!({ "error": "Internal error" })
        }
    }
}

fn frame_reply(reply: &Value) -> Vec<u8> {
    let body = serde_json::to_vec(reply).expect("a json! value always serializes");
    let mut framed = Vec::with_capacity(SIZE_PREFIX_LEN + body.len());
    framed.extend_from_slice(&(body.len() as u64).to_be_bytes());
    framed.extend_from_slice(&body);
    framed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_request() {
        let body = br#"{"method":"metrics","host":"host-a"}"#;
        let (method, args) = parse_request(body).unwrap();
        assert_eq!(method, "metrics");
        assert_eq!(args.get("host"), Some(&"host-a".to_string()));
    }

    #[test]
    fn rejects_a_request_missing_method() {
        let body = br#"{"host":"host-a"}"#;
        assert!(parse_request(body).is_none());
    }

    #[test]
    fn rejects_a_request_with_non_string_values() {
        let body = br#"{"method":"metrics","count":5}"#;
        assert!(parse_request(body).is_none());
    }

    #[test]
    fn rejects_a_non_object_request() {
        assert!(parse_request(br#"[1,2,3]"#).is_none());
        assert!(parse_request(br#""just a string""#).is_none());
    }

    #[test]
    fn frames_a_reply_with_a_big_endian_length_prefix() {
        let framed = frame_reply(&serde_json::json!({ "result": 1 }));
        let (len_bytes, body) = framed.split_at(SIZE_PREFIX_LEN);
        let mut raw = [0u8; SIZE_PREFIX_LEN];
        raw.copy_from_slice(len_bytes);
        assert_eq!(u64::from_be_bytes(raw) as usize, body.len());
    }
}
