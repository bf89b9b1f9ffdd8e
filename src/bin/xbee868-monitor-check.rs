//! Nagios-style check plugin: query the daemon over IPC, compare the
//! result against threshold ranges, exit with the matching status code
//!.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use xbee868_monitor::nagios_range::Range;

const EXIT_OK: i32 = 0;
const EXIT_WARNING: i32 = 1;
const EXIT_CRITICAL: i32 = 2;
const EXIT_UNKNOWN: i32 = 3;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Metric {
    Temperature,
}

impl Metric {
    fn name(&self) -> &'static str {
        match self {
            Metric::Temperature => "temperature",
        }
    }
}

/// Query xbee868-monitord for one host's metric and report Nagios status.
#[derive(Parser, Debug)]
struct Args {
    /// Configured host name.
    host: String,

    /// Metric to check.
    metric: Metric,

    /// Warning threshold, Nagios range syntax.
    #[arg(short = 'w', long = "warning")]
    warning: Option<String>,

    /// Critical threshold, Nagios range syntax.
    #[arg(short = 'c', long = "critical")]
    critical: Option<String>,

    /// Path to the daemon's IPC socket.
    #[arg(long, default_value = "/var/run/xbee-868/monitor.socket")]
    socket: PathBuf,
}

fn main() {
    let args = Args::parse();
    std::process::exit(run(&args));
}

fn run(args: &Args) -> i32 {
    let warning = match args.warning.as_deref().map(Range::parse).transpose() {
        Ok(range) => range,
        Err(err) => return unknown(&format!("invalid -w range: {err}")),
    };
    let critical = match args.critical.as_deref().map(Range::parse).transpose() {
        Ok(range) => range,
        Err(err) => return unknown(&format!("invalid -c range: {err}")),
    };

    let value = match fetch_metric(&args.socket, &args.host, args.metric.name()) {
        Ok(value) => value,
        Err(message) => return unknown(&message),
    };

    if let Some(critical) = critical {
        if !critical.contains(value) {
            return report("CRITICAL", args, value, EXIT_CRITICAL);
        }
    }
    if let Some(warning) = warning {
        if !warning.contains(value) {
            return report("WARNING", args, value, EXIT_WARNING);
        }
    }
    report("OK", args, value, EXIT_OK)
}

fn report(status: &str, args: &Args, value: f64, code: i32) -> i32 {
    println!(
        "{} {} {} - value={}",
        args.metric.name().to_uppercase(),
        status,
        args.host,
        value
    );
    code
}

fn unknown(message: &str) -> i32 {
    println!("UNKNOWN - {message}");
    EXIT_UNKNOWN
}

fn fetch_metric(socket: &PathBuf, host: &str, metric: &str) -> Result<f64, String> {
    let mut stream = UnixStream::connect(socket).map_err(|err| format!("connect {}: {err}", socket.display()))?;

    let request = serde_json::json!({ "method": "metrics", "host": host });
    let body = serde_json::to_vec(&request).expect("request always serializes");
    stream
        .write_all(&(body.len() as u64).to_be_bytes())
        .and_then(|_| stream.write_all(&body))
        .map_err(|err| format!("write request: {err}"))?;

    let mut size_buf = [0u8; 8];
    stream.read_exact(&mut size_buf).map_err(|err| format!("read reply size: {err}"))?;
    let size = u64::from_be_bytes(size_buf) as usize;

    let mut body = vec![0u8; size];
    stream.read_exact(&mut body).map_err(|err| format!("read reply body: {err}"))?;

    let reply: serde_json::Value =
        serde_json::from_slice(&body).map_err(|err| format!("parse reply: {err}"))?;

    if let Some(error) = reply.get("error").and_then(|v| v.as_str()) {
        return Err(error.to_string());
    }

    let result = reply
        .get("result")
        .ok_or_else(|| "reply has neither 'result' nor 'error'".to_string())?;

    let value = result
        .get(metric)
        .and_then(|sample| sample.get("value"))
        .and_then(|v| v.as_i64())
        .ok_or_else(|| format!("no '{metric}' sample recorded yet for host '{host}'"))?;

    Ok(value as f64)
}
