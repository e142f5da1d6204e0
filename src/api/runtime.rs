// Process-wide init/fini, global params, and crate version reporting.
use std::path::Path;

use super::ApiResult;
use crate::core::global;

/// Initializes the process runtime. Safe to call more than once; later calls are no-ops.
///
/// `config` names an optional JSON file of flat global params; `params` override it.
pub fn init<S: AsRef<str>>(config: Option<&Path>, params: &[S]) -> ApiResult<()> {
    global::init(config, params)
}

/// Tears the runtime down. KVDB lifecycle calls fail with `Usage` until `init` runs again.
pub fn fini() {
    global::fini()
}

pub fn param(name: &str) -> ApiResult<String> {
    global::param(name)
}

pub struct Version;

impl Version {
    pub const STRING: &'static str = env!("CARGO_PKG_VERSION");

    pub fn major() -> u32 {
        env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or_default()
    }

    pub fn minor() -> u32 {
        env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or_default()
    }

    pub fn patch() -> u32 {
        env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::Version;

    #[test]
    fn version_parts_match_string() {
        let expected = format!("{}.{}.{}", Version::major(), Version::minor(), Version::patch());
        assert!(Version::STRING.starts_with(&expected));
    }
}
