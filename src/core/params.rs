//! Purpose: Parse `key=value` parameter lists and JSON config files into typed settings.
//! Exports: `ParamSet`, the per-scope param structs, `KvdbConfig`, `load_kvdb_config`.
//! Role: The only place that interprets parameter strings; callers pass them through opaquely.
//! Invariants: Unknown keys and malformed pairs are `Usage` errors, never ignored.
//! Invariants: Precedence is defaults, then config file, then explicit params.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::core::error::{Error, ErrorKind, io_error};
use crate::core::limits::KVS_PFX_LEN_MAX;

pub const KVDB_CONF_FILE: &str = "kvdb.conf";
pub const DEFAULT_TXN_TIMEOUT_MS: u64 = 10_000;

pub(crate) trait ParamSet: Default {
    const SCOPE: &'static str;

    fn apply(&mut self, key: &str, value: &str) -> Result<(), Error>;

    /// Canonical string form of a param, or `None` if this scope does not know it.
    fn get(&self, key: &str) -> Option<String>;
}

pub(crate) fn parse_params<P: ParamSet, S: AsRef<str>>(params: &[S]) -> Result<P, Error> {
    let mut set = P::default();
    apply_params(&mut set, params)?;
    Ok(set)
}

pub(crate) fn apply_params<P: ParamSet, S: AsRef<str>>(set: &mut P, params: &[S]) -> Result<(), Error> {
    for param in params {
        let (key, value) = split_pair(param.as_ref())?;
        set.apply(key, value)?;
    }
    Ok(())
}

pub(crate) fn apply_json<P: ParamSet>(set: &mut P, map: &Map<String, Value>) -> Result<(), Error> {
    for (key, value) in map {
        let text = match value {
            Value::String(text) => text.clone(),
            Value::Bool(flag) => flag.to_string(),
            Value::Number(number) => number.to_string(),
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("{} param {key} must be a scalar", P::SCOPE)));
            }
        };
        set.apply(key, &text)?;
    }
    Ok(())
}

fn split_pair(param: &str) -> Result<(&str, &str), Error> {
    match param.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim(), value.trim())),
        _ => Err(Error::new(ErrorKind::Usage)
            .with_message(format!("param `{param}` is not of the form key=value"))),
    }
}

fn unknown<P: ParamSet>(key: &str) -> Error {
    Error::new(ErrorKind::Usage).with_message(format!("unknown {} param: {key}", P::SCOPE))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, Error> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(Error::new(ErrorKind::Usage)
            .with_message(format!("param {key} expects true or false, got `{value}`"))),
    }
}

fn parse_u64(key: &str, value: &str) -> Result<u64, Error> {
    value.parse::<u64>().map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("param {key} expects an unsigned integer, got `{value}`"))
            .with_source(err)
    })
}

fn parse_path(key: &str, value: &str) -> Result<PathBuf, Error> {
    if value.is_empty() {
        return Err(Error::new(ErrorKind::Usage).with_message(format!("param {key} is empty")));
    }
    Ok(PathBuf::from(value))
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct GlobalParams {
    pub logging_enabled: bool,
    pub logging_level: tracing::Level,
}

impl Default for GlobalParams {
    fn default() -> Self {
        Self {
            logging_enabled: false,
            logging_level: tracing::Level::INFO,
        }
    }
}

impl ParamSet for GlobalParams {
    const SCOPE: &'static str = "global";

    fn apply(&mut self, key: &str, value: &str) -> Result<(), Error> {
        match key {
            "logging.enabled" => self.logging_enabled = parse_bool(key, value)?,
            "logging.level" => {
                self.logging_level = value.parse().map_err(|_| {
                    Error::new(ErrorKind::Usage)
                        .with_message(format!("param {key} expects a log level, got `{value}`"))
                })?;
            }
            _ => return Err(unknown::<Self>(key)),
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Option<String> {
        match key {
            "logging.enabled" => Some(self.logging_enabled.to_string()),
            "logging.level" => Some(self.logging_level.to_string().to_lowercase()),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct KvdbCreateParams {
    pub capacity_path: Option<PathBuf>,
    pub staging_path: Option<PathBuf>,
    pub pmem_path: Option<PathBuf>,
}

impl ParamSet for KvdbCreateParams {
    const SCOPE: &'static str = "kvdb create";

    fn apply(&mut self, key: &str, value: &str) -> Result<(), Error> {
        match key {
            "storage.capacity.path" => self.capacity_path = Some(parse_path(key, value)?),
            "storage.staging.path" => self.staging_path = Some(parse_path(key, value)?),
            "storage.pmem.path" => self.pmem_path = Some(parse_path(key, value)?),
            _ => return Err(unknown::<Self>(key)),
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Option<String> {
        let path = match key {
            "storage.capacity.path" => &self.capacity_path,
            "storage.staging.path" => &self.staging_path,
            "storage.pmem.path" => &self.pmem_path,
            _ => return None,
        };
        Some(
            path.as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_default(),
        )
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct KvdbOpenParams {
    pub read_only: bool,
    pub txn_timeout_ms: u64,
}

impl Default for KvdbOpenParams {
    fn default() -> Self {
        Self {
            read_only: false,
            txn_timeout_ms: DEFAULT_TXN_TIMEOUT_MS,
        }
    }
}

impl ParamSet for KvdbOpenParams {
    const SCOPE: &'static str = "kvdb";

    fn apply(&mut self, key: &str, value: &str) -> Result<(), Error> {
        match key {
            "read_only" => self.read_only = parse_bool(key, value)?,
            "txn_timeout" => self.txn_timeout_ms = parse_u64(key, value)?,
            _ => return Err(unknown::<Self>(key)),
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Option<String> {
        match key {
            "read_only" => Some(self.read_only.to_string()),
            "txn_timeout" => Some(self.txn_timeout_ms.to_string()),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct KvsCreateParams {
    pub prefix_length: usize,
}

impl ParamSet for KvsCreateParams {
    const SCOPE: &'static str = "kvs create";

    fn apply(&mut self, key: &str, value: &str) -> Result<(), Error> {
        match key {
            "prefix.length" => {
                let length = parse_u64(key, value)? as usize;
                if length > KVS_PFX_LEN_MAX {
                    return Err(Error::new(ErrorKind::Usage)
                        .with_message(format!("prefix.length must be at most {KVS_PFX_LEN_MAX}")));
                }
                self.prefix_length = length;
            }
            _ => return Err(unknown::<Self>(key)),
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Option<String> {
        match key {
            "prefix.length" => Some(self.prefix_length.to_string()),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct KvsOpenParams {
    pub transactions_enabled: bool,
}

impl ParamSet for KvsOpenParams {
    const SCOPE: &'static str = "kvs";

    fn apply(&mut self, key: &str, value: &str) -> Result<(), Error> {
        match key {
            "transactions.enabled" => self.transactions_enabled = parse_bool(key, value)?,
            _ => return Err(unknown::<Self>(key)),
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Option<String> {
        match key {
            "transactions.enabled" => Some(self.transactions_enabled.to_string()),
            _ => None,
        }
    }
}

/// Contents of `<home>/kvdb.conf`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct KvdbConfig {
    pub kvdb: Map<String, Value>,
    pub kvs: BTreeMap<String, Map<String, Value>>,
}

impl KvdbConfig {
    /// Open params for one kvs: the `default` section first, then the named section.
    pub fn kvs_layers<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Map<String, Value>> {
        self.kvs
            .get("default")
            .into_iter()
            .chain(self.kvs.get(name).filter(|_| name != "default"))
    }
}

pub(crate) fn load_kvdb_config(home: &Path) -> Result<KvdbConfig, Error> {
    let path = home.join(KVDB_CONF_FILE);
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(KvdbConfig::default()),
        Err(err) => return Err(io_error(err, &path)),
    };
    serde_json::from_str(&text).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid kvdb.conf")
            .with_path(&path)
            .with_source(err)
    })
}

pub(crate) fn load_global_config(path: &Path) -> Result<Map<String, Value>, Error> {
    let text = fs::read_to_string(path).map_err(|err| io_error(err, path))?;
    serde_json::from_str(&text).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("global config must be a JSON object")
            .with_path(path)
            .with_source(err)
    })
}
