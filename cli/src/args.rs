//! Command-line flags of the `steemwatch` binary.
//!
//! `steemwatch [-s URL] [-b] [-H] [-t] [-o] [-r RANGE]... [-a ACCOUNT] [-c N]`.
//! The server falls back to `$STEEMWATCH_SERVER`, then to a local node.

use anyhow::{anyhow, bail, Context, Result};

pub const DEFAULT_SERVER: &str = "ws://127.0.0.1:8090";
pub const SERVER_ENV: &str = "STEEMWATCH_SERVER";

/// What the invocation asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Watch(WatchOptions),
    Help,
    Version,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchOptions {
    pub server: String,
    pub blocks: bool,
    pub headers: bool,
    pub tx: bool,
    pub ops: bool,
    pub ranges: Vec<String>,
    pub account: Option<String>,
    pub chunk_size: Option<u64>,
}

impl WatchOptions {
    fn new(server: String) -> Self {
        Self {
            server,
            blocks: false,
            headers: false,
            tx: false,
            ops: false,
            ranges: Vec::new(),
            account: None,
            chunk_size: None,
        }
    }
}

/// Parse arguments (program name excluded). `default_server` applies when
/// no `--server` is given.
pub fn parse_args(args: &[String], default_server: &str) -> Result<Command> {
    let mut opts = WatchOptions::new(default_server.to_string());
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        let flag = arg.as_str();
        let mut value = |flag: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| anyhow!("{flag} requires a value"))
        };
        match flag {
            "-h" | "--help" => return Ok(Command::Help),
            "-V" | "--version" => return Ok(Command::Version),
            "-s" | "--server" => opts.server = value(flag)?,
            "-b" | "--blocks" => opts.blocks = true,
            "-H" | "--headers" => opts.headers = true,
            "-t" | "--tx" => opts.tx = true,
            "-o" | "--ops" => opts.ops = true,
            "-r" | "--range" => opts.ranges.push(value(flag)?),
            "-a" | "--account" => opts.account = Some(value(flag)?),
            "-c" | "--chunk-size" => {
                let raw = value(flag)?;
                let size: u64 = raw
                    .parse()
                    .with_context(|| format!("invalid chunk size `{raw}`"))?;
                if size == 0 {
                    bail!("chunk size must be positive");
                }
                opts.chunk_size = Some(size);
            }
            other => bail!("unknown argument: {other}"),
        }
    }

    if opts.account.is_none() && opts.ranges.is_empty() {
        opts.ranges.push(String::new());
    }
    if !opts.ranges.is_empty() && !(opts.blocks || opts.headers || opts.tx || opts.ops) {
        opts.blocks = true;
    }
    Ok(Command::Watch(opts))
}
