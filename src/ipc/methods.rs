//! The dispatch table: method name → handler over named string arguments.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::hosts::HostSet;
use crate::store::MetricStore;

pub type Args = HashMap<String, String>;

/// Process-wide state every method may consult, shared read-only by every
/// connection. Every field is an `Rc`, so cloning `HandlerContext` is cheap
/// and keeps the handler table independent of any one connection's
/// lifetime.
#[derive(Clone)]
pub struct HandlerContext {
    pub store: Rc<RefCell<MetricStore>>,
    pub hosts: Rc<HostSet>,
    pub start_time: Rc<Cell<Option<Instant>>>,
}

type Handler = dyn Fn(&HandlerContext, Args) -> Result<Value>;

/// Name → handler mapping, built once and shared by every connection.
pub struct HandlerTable {
    handlers: HashMap<&'static str, Box<Handler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        let mut handlers: HashMap<&'static str, Box<Handler>> = HashMap::new();
        handlers.insert("uptime", Box::new(uptime));
        handlers.insert("metrics", Box::new(metrics));
        HandlerTable { handlers }
    }

    pub fn dispatch(&self, ctx: &HandlerContext, method: &str, args: Args) -> Result<Value> {
        match self.handlers.get(method) {
            Some(handler) => handler(ctx, args),
            None => Err(Error::MethodNotFound(method.to_string())),
        }
    }
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::new()
    }
}

fn uptime(ctx: &HandlerContext, args: Args) -> Result<Value> {
    if !args.is_empty() {
        return Err(Error::BadArgument("uptime takes no arguments".to_string()));
    }
    let start = ctx.start_time.get().ok_or(Error::MonitorNotStarted)?;
    let seconds = Instant::now().saturating_duration_since(start).as_secs();
    Ok(Value::from(seconds))
}

fn metrics(ctx: &HandlerContext, mut args: Args) -> Result<Value> {
    let host = args
        .remove("host")
        .ok_or_else(|| Error::BadArgument("metrics requires a 'host' argument".to_string()))?;
    if !args.is_empty() {
        return Err(Error::BadArgument(format!(
            "unexpected argument(s): {}",
            args.keys().cloned().collect::<Vec<_>>().join(", ")
        )));
    }
    let snapshot = ctx.store.borrow().get(&host, &ctx.hosts)?;
    Ok(serde_json::to_value(snapshot).expect("a map of Sample values always serializes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hosts::HostSet;

    fn context() -> HandlerContext {
        HandlerContext {
            store: Rc::new(RefCell::new(MetricStore::new())),
            hosts: Rc::new(HostSet::from_iter(["host-a".to_string()])),
            start_time: Rc::new(Cell::new(None)),
        }
    }

    #[test]
    fn uptime_fails_before_a_start_time_is_recorded() {
        let table = HandlerTable::new();
        let ctx = context();
        let err = table.dispatch(&ctx, "uptime", Args::new()).unwrap_err();
        assert!(matches!(err, Error::MonitorNotStarted));
    }

    #[test]
    fn uptime_reports_non_negative_elapsed_seconds() {
        let table = HandlerTable::new();
        let ctx = context();
        ctx.start_time.set(Some(Instant::now()));
        let result = table.dispatch(&ctx, "uptime", Args::new()).unwrap();
        assert!(result.as_u64().unwrap() < 5);
    }

    #[test]
    fn metrics_requires_the_host_argument() {
        let table = HandlerTable::new();
        let ctx = context();
        let err = table.dispatch(&ctx, "metrics", Args::new()).unwrap_err();
        assert!(matches!(err, Error::BadArgument(_)));
    }

    #[test]
    fn metrics_fails_for_an_unconfigured_host() {
        let table = HandlerTable::new();
        let ctx = context();
        let mut args = Args::new();
        args.insert("host".to_string(), "nope".to_string());
        let err = table.dispatch(&ctx, "metrics", args).unwrap_err();
        assert!(matches!(err, Error::UnknownHost(h) if h == "nope"));
    }

    #[test]
    fn metrics_returns_the_stored_snapshot() {
        let table = HandlerTable::new();
        let ctx = context();
        ctx.store.borrow_mut().put("host-a", "temperature", 21);
        let mut args = Args::new();
        args.insert("host".to_string(), "host-a".to_string());
        let result = table.dispatch(&ctx, "metrics", args).unwrap();
        assert_eq!(result["temperature"]["value"], 21);
    }

    #[test]
    fn unknown_method_is_a_domain_error() {
        let table = HandlerTable::new();
        let ctx = context();
        let err = table.dispatch(&ctx, "frobnicate", Args::new()).unwrap_err();
        assert!(matches!(err, Error::MethodNotFound(m) if m == "frobnicate"));
    }
}
