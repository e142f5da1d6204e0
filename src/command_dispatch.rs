//! Purpose: Hold top-level CLI command dispatch for `hsekv`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Each command opens the KVDB for its own duration and closes it before returning.
//! Invariants: `--param` values go to the KVDB create or open call unchanged.

use super::*;
use hsekv::api::{Cursor, CursorOptions, CursorResult, Kvdb, Mclass, Version};
use std::path::Path;

pub(super) fn dispatch_command(
    command: Command,
    home: PathBuf,
    params: Vec<String>,
) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "hsekv", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            emit_json(json!({
                "name": "hsekv",
                "version": Version::STRING,
                "major": Version::major(),
                "minor": Version::minor(),
                "patch": Version::patch(),
            }));
            Ok(RunOutcome::ok())
        }
        Command::Kvdb { command } => dispatch_kvdb(command, &home, &params),
        Command::Kvs { command } => dispatch_kvs(command, &home, &params),
        Command::Put { kvs, key, value } => {
            with_kvs(&home, &params, &kvs, |store| store.put(None, &key, &value))?;
            emit_json(json!({ "kvs": kvs, "key": key, "stored": true }));
            Ok(RunOutcome::ok())
        }
        Command::Get { kvs, key } => {
            let value = with_kvs(&home, &params, &kvs, |store| store.get(None, &key))?;
            let Some(value) = value else {
                return Err(Error::new(ErrorKind::NotFound)
                    .with_message("key not found")
                    .with_kvs(kvs));
            };
            emit_json(json!({
                "kvs": kvs,
                "key": key,
                "value": bytes_json(&value),
                "len": value.len(),
            }));
            Ok(RunOutcome::ok())
        }
        Command::Del { kvs, key, prefix } => {
            with_kvs(&home, &params, &kvs, |store| {
                if prefix {
                    store.prefix_delete(None, &key)
                } else {
                    store.delete(None, &key)
                }
            })?;
            emit_json(json!({ "kvs": kvs, "key": key, "prefix": prefix, "deleted": true }));
            Ok(RunOutcome::ok())
        }
        Command::Scan {
            kvs,
            filter,
            reverse,
            from,
            limit,
        } => {
            let records = with_kvs(&home, &params, &kvs, |store| {
                let mut options = CursorOptions::new();
                if let Some(filter) = filter.as_deref() {
                    options = options.filter(filter);
                }
                if reverse {
                    options = options.reverse();
                }
                let mut cursor = store.cursor(options)?;
                if let Some(from) = from.as_deref() {
                    cursor.seek(from)?;
                }
                scan_records(&mut cursor, limit)
            })?;
            emit_json(json!({ "kvs": kvs, "count": records.len(), "records": records }));
            Ok(RunOutcome::ok())
        }
    }
}

fn dispatch_kvdb(command: KvdbCommand, home: &Path, params: &[String]) -> Result<RunOutcome, Error> {
    match command {
        KvdbCommand::Create => {
            Kvdb::create(home, params)?;
            emit_json(json!({ "home": home.display().to_string(), "created": true }));
        }
        KvdbCommand::Drop => {
            Kvdb::destroy(home)?;
            emit_json(json!({ "home": home.display().to_string(), "dropped": true }));
        }
        KvdbCommand::Info => {
            let kvdb = Kvdb::open(home, params)?;
            let info = kvdb_info_json(&kvdb)?;
            kvdb.close()?;
            emit_json(info);
        }
        KvdbCommand::Compact => {
            let kvdb = Kvdb::open(home, params)?;
            let removed = kvdb.compact()?;
            let status = kvdb.compact_status()?;
            kvdb.close()?;
            emit_json(json!({ "removed": removed, "status": status }));
        }
    }
    Ok(RunOutcome::ok())
}

fn dispatch_kvs(command: KvsCommand, home: &Path, params: &[String]) -> Result<RunOutcome, Error> {
    let kvdb = Kvdb::open(home, params)?;
    match command {
        KvsCommand::Create {
            name,
            prefix_length,
        } => {
            kvdb.kvs_create(&name, &[format!("prefix.length={prefix_length}")])?;
            emit_json(json!({ "kvs": name, "prefix_length": prefix_length, "created": true }));
        }
        KvsCommand::Drop { name } => {
            kvdb.kvs_drop(&name)?;
            emit_json(json!({ "kvs": name, "dropped": true }));
        }
        KvsCommand::List => {
            emit_json(json!({ "kvs": kvdb.kvs_names()? }));
        }
    }
    kvdb.close()?;
    Ok(RunOutcome::ok())
}

fn with_kvs<T>(
    home: &Path,
    params: &[String],
    name: &str,
    op: impl FnOnce(&hsekv::api::Kvs) -> Result<T, Error>,
) -> Result<T, Error> {
    let kvdb = Kvdb::open(home, params)?;
    let kvs = kvdb.kvs_open::<&str>(name, &[])?;
    let out = op(&kvs)?;
    kvs.close();
    kvdb.close()?;
    Ok(out)
}

fn scan_records(cursor: &mut Cursor, limit: Option<usize>) -> Result<Vec<Value>, Error> {
    let mut records = Vec::new();
    while limit.is_none_or(|limit| records.len() < limit) {
        match cursor.read()? {
            CursorResult::Record { key, value } => records.push(json!({
                "key": bytes_json(key),
                "value": bytes_json(value),
            })),
            CursorResult::Eof => break,
        }
    }
    Ok(records)
}

fn kvdb_info_json(kvdb: &Kvdb) -> Result<Value, Error> {
    let mut stores = Vec::new();
    for name in kvdb.kvs_names()? {
        let kvs = kvdb.kvs_open::<&str>(&name, &[])?;
        stores.push(json!({ "name": name, "prefix_length": kvs.prefix_length() }));
    }
    let mut media = Map::new();
    for mclass in Mclass::ALL {
        if kvdb.mclass_is_configured(mclass) {
            media.insert(mclass.to_string(), json!(kvdb.mclass_info(mclass)?));
        }
    }
    Ok(json!({
        "home": kvdb.home().display().to_string(),
        "kvs": stores,
        "mclass": media,
        "compact": kvdb.compact_status()?,
        "params": {
            "read_only": kvdb.param("read_only")?,
            "txn_timeout": kvdb.param("txn_timeout")?,
        },
    }))
}
