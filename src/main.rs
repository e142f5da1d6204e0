//! Purpose: `hsekv` CLI entry point for KVDB administration and record access.
//! Role: Binary crate root; parses args, initializes the runtime, emits JSON on stdout.
//! Invariants: Commands emit one JSON document on stdout; errors are JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: All data access goes through `api::Kvdb` (home lock + persisted metadata).
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use bstr::ByteSlice;
use clap::{CommandFactory, Parser, Subcommand, ValueHint, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};

mod command_dispatch;

use hsekv::api::{self, Error, ErrorKind, to_exit_code};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage).with_message(clap_error_summary(&err)));
            }
        },
    };

    hsekv::core::global::install_tracing("warn");
    api::init::<&str>(None, &[])?;

    let home = cli.home.unwrap_or_else(|| PathBuf::from("."));
    let result = command_dispatch::dispatch_command(cli.command, home, cli.params);
    api::fini();
    result
}

#[derive(Parser)]
#[command(
    name = "hsekv",
    version,
    about = "Administer and query an embedded transactional key-value database",
    long_about = None,
    after_help = r#"EXAMPLES
  $ hsekv --home ./db kvdb create
  $ hsekv --home ./db kvs create users --prefix-length 4
  $ hsekv --home ./db put users usr:alice '{"age": 31}'
  $ hsekv --home ./db get users usr:alice
  $ hsekv --home ./db scan users --filter usr: --limit 10

Parameters are key=value strings: `--param` applies to the KVDB create or open call."#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        help = "KVDB home directory (default: current directory)",
        value_hint = ValueHint::DirPath
    )]
    home: Option<PathBuf>,
    #[arg(
        long = "param",
        global = true,
        value_name = "KEY=VALUE",
        help = "KVDB parameter (repeatable)"
    )]
    params: Vec<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Create, drop, inspect, or compact the KVDB")]
    Kvdb {
        #[command(subcommand)]
        command: KvdbCommand,
    },
    #[command(about = "Create, drop, or list key-value stores")]
    Kvs {
        #[command(subcommand)]
        command: KvsCommand,
    },
    #[command(about = "Store a value under a key")]
    Put {
        kvs: String,
        key: String,
        value: String,
    },
    #[command(about = "Print the value stored under a key")]
    Get { kvs: String, key: String },
    #[command(about = "Delete a key, or every key with a prefix")]
    Del {
        kvs: String,
        key: String,
        #[arg(long, help = "Treat KEY as a prefix of exactly the KVS prefix length")]
        prefix: bool,
    },
    #[command(about = "List records in key order")]
    Scan {
        kvs: String,
        #[arg(long, help = "Only keys starting with this prefix")]
        filter: Option<String>,
        #[arg(long, help = "Iterate in descending key order")]
        reverse: bool,
        #[arg(long, help = "Start at the first key at or past this one")]
        from: Option<String>,
        #[arg(long, help = "Stop after this many records")]
        limit: Option<usize>,
    },
    #[command(about = "Print version information")]
    Version,
    #[command(
        arg_required_else_help = true,
        about = "Generate shell completions",
        after_help = r#"EXAMPLES
  $ hsekv completion bash > ~/.local/share/bash-completion/completions/hsekv
  $ hsekv completion zsh > ~/.zfunc/_hsekv"#
    )]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum KvdbCommand {
    #[command(about = "Create a KVDB in the home directory")]
    Create,
    #[command(about = "Remove the KVDB and all of its data")]
    Drop,
    #[command(about = "Show stores, media classes, and compaction status")]
    Info,
    #[command(about = "Prune versions no live snapshot can see")]
    Compact,
}

#[derive(Subcommand)]
enum KvsCommand {
    #[command(about = "Create a key-value store")]
    Create {
        name: String,
        #[arg(long, default_value_t = 0, help = "Key prefix length (0..=32)")]
        prefix_length: usize,
    },
    #[command(about = "Drop a key-value store and its data")]
    Drop { name: String },
    #[command(about = "List key-value stores")]
    List,
}

fn bytes_json(bytes: &[u8]) -> Value {
    json!(bytes.to_str_lossy())
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_error(err: &Error) {
    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::AlreadyExists => "already exists".to_string(),
        ErrorKind::Busy => "resource is busy".to_string(),
        ErrorKind::Permission => "permission denied".to_string(),
        ErrorKind::Corrupt => "corrupt data".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
        ErrorKind::Canceled => "operation canceled".to_string(),
        ErrorKind::Unsupported => "unsupported".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    inner.insert("errno".to_string(), json!(err.errno()));
    if let Some(kvs) = err.kvs() {
        inner.insert("kvs".to_string(), json!(kvs));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if err.is_expired() {
        inner.insert("context".to_string(), json!("txn_expired"));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command, KvsCommand, bytes_json, error_json};
    use clap::Parser;
    use hsekv::api::{Error, ErrorKind};
    use serde_json::json;

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "hsekv",
            "kvs",
            "create",
            "users",
            "--prefix-length",
            "4",
            "--home",
            "/tmp/db",
            "--param",
            "read_only=false",
        ])
        .expect("parse");
        assert_eq!(cli.home.as_deref(), Some(std::path::Path::new("/tmp/db")));
        assert_eq!(cli.params, vec!["read_only=false".to_string()]);
        match cli.command {
            Command::Kvs {
                command: KvsCommand::Create { name, prefix_length },
            } => {
                assert_eq!(name, "users");
                assert_eq!(prefix_length, 4);
            }
            _ => panic!("unexpected command"),
        }
    }

    #[test]
    fn error_json_carries_kind_and_errno() {
        let err = Error::new(ErrorKind::NotFound)
            .with_message("kvs not found")
            .with_kvs("users");
        let value = error_json(&err);
        assert_eq!(value["error"]["kind"], json!("NotFound"));
        assert_eq!(value["error"]["kvs"], json!("users"));
        assert_eq!(value["error"]["errno"], json!(libc::ENOENT));
    }

    #[test]
    fn non_utf8_bytes_render_lossily() {
        assert_eq!(bytes_json(b"ab\xffc"), json!("ab\u{FFFD}c"));
    }
}
