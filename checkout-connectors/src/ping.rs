//! Reachability probe using the system `ping` binary
//!
//! Each host is pinged by its own subprocess, all hosts at once. A host is
//! alive when the subprocess exits successfully and reports at least one
//! round-trip time. Its time is the mean of the per-reply `time=` values,
//! falling back to the average in the summary line.
//!
//! ```text
//! alive             list of responsive hosts
//! num_alive         count of responsive hosts
//! unresponsive      list of hosts that did not answer
//! num_unresponsive  count of hosts that did not answer
//! min_time          fastest round trip over alive hosts (ms)
//! max_time          slowest round trip over alive hosts (ms)
//! times.<host>      round trip per host (ms), -1 when unresponsive
//! ```

use std::process::Stdio;

use async_trait::async_trait;
use checkout_core::config::Ping;
use checkout_core::errors::ToolError;
use checkout_core::traits::{ToolOutput, ToolProcedure};
use checkout_core::Value;
use futures::future::join_all;
use log::{debug, warn};
use tokio::process::Command;

use crate::ConnectorError;

/// Round trip reported for hosts that did not answer
pub const UNRESPONSIVE_TIME: f64 = -1.0;

const TOOL_NAME: &str = "ping";

/// Runs `ping` against every configured host
#[derive(Debug, Clone)]
pub struct PingProcedure {
    config: Ping,
    program: String,
}

impl PingProcedure {
    /// Probe using the `ping` found on `PATH`
    pub fn new(config: Ping) -> Self {
        Self { config, program: TOOL_NAME.to_string() }
    }

    /// Use a different ping binary
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn args(&self, host: &str) -> [String; 3] {
        let count_flag = if cfg!(windows) { "-n" } else { "-c" };
        [count_flag.to_string(), self.config.count.to_string(), host.to_string()]
    }

    fn decode(&self, bytes: &[u8]) -> String {
        let encoding = self.config.encoding.to_ascii_lowercase();
        if !matches!(encoding.as_str(), "utf-8" | "utf8" | "ascii") {
            warn!("ping: unsupported encoding {:?}, decoding as utf-8", self.config.encoding);
        }
        String::from_utf8_lossy(bytes).into_owned()
    }

    /// Round trip to `host` in ms, `None` if it did not answer
    async fn probe(&self, host: &str) -> Result<Option<f64>, ConnectorError> {
        let output = Command::new(&self.program)
            .args(self.args(host))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ConnectorError::Spawn { program: self.program.clone(), source })?;

        if !output.status.success() {
            debug!("ping {host}: exited with {}", output.status);
            return Ok(None);
        }
        let time = parse_round_trip(&self.decode(&output.stdout));
        debug!("ping {host}: {time:?} ms");
        Ok(time)
    }
}

#[async_trait]
impl ToolProcedure for PingProcedure {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn result_keys(&self) -> Vec<String> {
        self.config.result_keys()
    }

    async fn run(&self) -> Result<ToolOutput, ToolError> {
        let probes = join_all(self.config.hosts.iter().map(|host| self.probe(host))).await;
        let times = probes
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| err.into_tool_error(TOOL_NAME))?;
        Ok(summarize(&self.config.hosts, &times))
    }
}

/// Mean of the per-reply times, or the summary average when there are none
pub fn parse_round_trip(output: &str) -> Option<f64> {
    let replies: Vec<f64> = output
        .lines()
        .filter_map(|line| {
            let start = line.find("time=").or_else(|| line.find("time<"))?;
            leading_number(&line[start + 5..])
        })
        .collect();
    if !replies.is_empty() {
        return Some(replies.iter().sum::<f64>() / replies.len() as f64);
    }

    output.lines().find_map(summary_average)
}

/// `rtt min/avg/max/mdev = 0.04/0.05/0.06/0.01 ms` or `Average = 12ms`
fn summary_average(line: &str) -> Option<f64> {
    if line.contains("min/avg/max") {
        let (_, stats) = line.split_once('=')?;
        return leading_number(stats.trim().split('/').nth(1)?);
    }
    let start = line.find("Average =")?;
    leading_number(line[start + "Average =".len()..].trim_start())
}

fn leading_number(text: &str) -> Option<f64> {
    let end = text.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(text.len());
    text[..end].parse().ok()
}

/// Build the result keys from per-host round trips (`None` for unresponsive)
pub fn summarize(hosts: &[String], times: &[Option<f64>]) -> ToolOutput {
    let mut alive = Vec::new();
    let mut unresponsive = Vec::new();
    let mut output = ToolOutput::new();

    for (host, time) in hosts.iter().zip(times) {
        match time {
            Some(ms) => alive.push((host, *ms)),
            None => unresponsive.push(host),
        }
        output.insert(
            format!("{}{host}", Ping::TIMES_PREFIX),
            Value::Float(time.unwrap_or(UNRESPONSIVE_TIME)),
        );
    }

    let fastest = alive.iter().map(|(_, ms)| *ms).reduce(f64::min).unwrap_or(UNRESPONSIVE_TIME);
    let slowest = alive.iter().map(|(_, ms)| *ms).reduce(f64::max).unwrap_or(UNRESPONSIVE_TIME);

    output.insert("num_alive".into(), Value::Int(alive.len() as i64));
    output.insert("num_unresponsive".into(), Value::Int(unresponsive.len() as i64));
    output.insert("alive".into(), Value::List(alive.iter().map(|(h, _)| Value::from(h.as_str())).collect()));
    output.insert(
        "unresponsive".into(),
        Value::List(unresponsive.iter().map(|h| Value::from(h.as_str())).collect()),
    );
    output.insert("min_time".into(), Value::Float(fastest));
    output.insert("max_time".into(), Value::Float(slowest));
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINUX: &str = "\
PING localhost (127.0.0.1) 56(84) bytes of data.
64 bytes from localhost (127.0.0.1): icmp_seq=1 ttl=64 time=0.040 ms
64 bytes from localhost (127.0.0.1): icmp_seq=2 ttl=64 time=0.060 ms

--- localhost ping statistics ---
2 packets transmitted, 2 received, 0% packet loss, time 1001ms
rtt min/avg/max/mdev = 0.040/0.050/0.060/0.010 ms
";

    const WINDOWS: &str = "\
Reply from 10.0.0.1: bytes=32 time<1ms TTL=128
Reply from 10.0.0.1: bytes=32 time=3ms TTL=128
";

    #[test]
    fn parses_reply_times() {
        let mean = parse_round_trip(LINUX).unwrap();
        assert!((mean - 0.05).abs() < 1e-9);
        assert_eq!(parse_round_trip(WINDOWS), Some(2.0));
    }

    #[test]
    fn falls_back_to_summary() {
        assert_eq!(parse_round_trip("rtt min/avg/max/mdev = 1.0/2.5/4.0/0.3 ms"), Some(2.5));
        assert_eq!(parse_round_trip("    Minimum = 1ms, Maximum = 9ms, Average = 4ms"), Some(4.0));
    }

    #[test]
    fn no_replies_is_unresponsive() {
        assert_eq!(parse_round_trip("Request timed out.\nRequest timed out."), None);
        assert_eq!(parse_round_trip(""), None);
    }

    #[test]
    fn summary_keys() {
        let hosts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let output = summarize(&hosts, &[Some(2.0), None, Some(5.0)]);

        assert_eq!(output["num_alive"], Value::Int(2));
        assert_eq!(output["num_unresponsive"], Value::Int(1));
        assert_eq!(output["alive"], Value::List(vec![Value::from("a"), Value::from("c")]));
        assert_eq!(output["unresponsive"], Value::List(vec![Value::from("b")]));
        assert_eq!(output["min_time"], Value::Float(2.0));
        assert_eq!(output["max_time"], Value::Float(5.0));
        assert_eq!(output["times.b"], Value::Float(UNRESPONSIVE_TIME));

        let keys: Vec<String> = output.keys().cloned().collect();
        let mut declared = Ping::new(["a", "b", "c"]).result_keys();
        declared.sort();
        assert_eq!(keys, declared);
    }

    #[test]
    fn nobody_alive() {
        let output = summarize(&["a".to_string()], &[None]);
        assert_eq!(output["min_time"], Value::Float(UNRESPONSIVE_TIME));
        assert_eq!(output["alive"], Value::List(Vec::new()));
    }

    #[tokio::test]
    async fn missing_binary_fails_the_tool() {
        let procedure = PingProcedure::new(Ping::new(["localhost"])).with_program("/nonexistent/ping");
        let err = procedure.run().await.unwrap_err();
        assert!(matches!(err, ToolError::Failed { ref tool, .. } if tool == "ping"));
        assert!(err.to_string().contains("failed to spawn /nonexistent/ping"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_or_failing_probe_is_unresponsive() {
        for program in ["true", "false"] {
            let procedure = PingProcedure::new(Ping::new(["h1"])).with_program(program);
            let output = procedure.run().await.unwrap();
            assert_eq!(output["num_unresponsive"], Value::Int(1), "{program}");
        }
    }
}
