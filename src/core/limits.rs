// Engine size limits and the key/value/name checks that enforce them.
use crate::core::error::{Error, ErrorKind};

pub const KVS_COUNT_MAX: usize = 256;
pub const KVS_KEY_LEN_MAX: usize = 1344;
pub const KVS_NAME_LEN_MAX: usize = 32;
pub const KVS_PFX_LEN_MAX: usize = 32;
pub const KVS_VALUE_LEN_MAX: usize = 1024 * 1024;

pub(crate) fn check_key(key: &[u8]) -> Result<(), Error> {
    if key.is_empty() {
        return Err(Error::new(ErrorKind::Usage).with_message("key is empty"));
    }
    if key.len() > KVS_KEY_LEN_MAX {
        return Err(Error::new(ErrorKind::Usage)
            .with_errno(libc::ENAMETOOLONG)
            .with_message(format!("key length {} exceeds {KVS_KEY_LEN_MAX}", key.len())));
    }
    Ok(())
}

pub(crate) fn check_value(value: &[u8]) -> Result<(), Error> {
    if value.len() > KVS_VALUE_LEN_MAX {
        return Err(Error::new(ErrorKind::Usage)
            .with_errno(libc::EMSGSIZE)
            .with_message(format!(
                "value length {} exceeds {KVS_VALUE_LEN_MAX}",
                value.len()
            )));
    }
    Ok(())
}

/// Filters and seek targets may be empty but never longer than a key.
pub(crate) fn check_bound(bound: &[u8]) -> Result<(), Error> {
    if bound.len() > KVS_KEY_LEN_MAX {
        return Err(Error::new(ErrorKind::Usage)
            .with_errno(libc::ENAMETOOLONG)
            .with_message(format!("bound length {} exceeds {KVS_KEY_LEN_MAX}", bound.len())));
    }
    Ok(())
}

pub(crate) fn check_kvs_name(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::new(ErrorKind::Usage).with_message("kvs name is empty"));
    }
    if name.len() > KVS_NAME_LEN_MAX {
        return Err(Error::new(ErrorKind::Usage)
            .with_errno(libc::ENAMETOOLONG)
            .with_message(format!("kvs name exceeds {KVS_NAME_LEN_MAX} bytes"))
            .with_kvs(name));
    }
    let valid = name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if !valid {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("kvs name may only contain [A-Za-z0-9_-]")
            .with_kvs(name));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{KVS_KEY_LEN_MAX, KVS_VALUE_LEN_MAX, check_key, check_kvs_name, check_value};
    use crate::core::error::ErrorKind;

    #[test]
    fn limits_match_engine_constants() {
        assert_eq!(super::KVS_COUNT_MAX, 256);
        assert_eq!(KVS_KEY_LEN_MAX, 1344);
        assert_eq!(super::KVS_PFX_LEN_MAX, 32);
        assert_eq!(super::KVS_NAME_LEN_MAX, 32);
        assert_eq!(KVS_VALUE_LEN_MAX, 1024 * 1024);
    }

    #[test]
    fn key_bounds_are_enforced() {
        assert_eq!(check_key(b"").unwrap_err().kind(), ErrorKind::Usage);
        assert!(check_key(&vec![b'k'; KVS_KEY_LEN_MAX]).is_ok());
        let err = check_key(&vec![b'k'; KVS_KEY_LEN_MAX + 1]).unwrap_err();
        assert_eq!(err.errno(), libc::ENAMETOOLONG);
    }

    #[test]
    fn empty_value_is_legal() {
        assert!(check_value(b"").is_ok());
        let err = check_value(&vec![0u8; KVS_VALUE_LEN_MAX + 1]).unwrap_err();
        assert_eq!(err.errno(), libc::EMSGSIZE);
    }

    #[test]
    fn kvs_names_are_restricted() {
        assert!(check_kvs_name("kvs-1_a").is_ok());
        assert!(check_kvs_name("").is_err());
        assert!(check_kvs_name("has/slash").is_err());
        assert!(check_kvs_name(&"n".repeat(33)).is_err());
    }
}
