// Error model shared by the engine, the access layer, the C ABI, and the CLI.
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    NotFound,
    AlreadyExists,
    Busy,
    Permission,
    Corrupt,
    Io,
    Canceled,
    Unsupported,
}

/// Extra classification attached by the engine to some failures.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ErrorContext {
    #[default]
    None,
    TxnExpired,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    path: Option<PathBuf>,
    kvs: Option<String>,
    errno: Option<i32>,
    context: ErrorContext,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            path: None,
            kvs: None,
            errno: None,
            context: ErrorContext::None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn kvs(&self) -> Option<&str> {
        self.kvs.as_deref()
    }

    /// The errno-equivalent code: explicit when the engine chose one, else the kind's default.
    pub fn errno(&self) -> i32 {
        self.errno.unwrap_or_else(|| to_errno(self.kind))
    }

    pub fn context(&self) -> ErrorContext {
        self.context
    }

    /// Optimistic-concurrency conflict: abandon the transaction and redo the unit of work.
    pub fn is_conflict(&self) -> bool {
        self.kind == ErrorKind::Canceled && self.context == ErrorContext::None
    }

    pub fn is_expired(&self) -> bool {
        self.context == ErrorContext::TxnExpired
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_kvs(mut self, kvs: impl Into<String>) -> Self {
        self.kvs = Some(kvs.into());
        self
    }

    pub fn with_errno(mut self, errno: i32) -> Self {
        self.errno = Some(errno);
        self
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(kvs) = &self.kvs {
            write!(f, " (kvs: {kvs})")?;
        }
        if let Some(path) = &self.path {
            write!(f, " (path: {})", path.display())?;
        }
        write!(f, " (errno: {})", self.errno())?;
        if self.context == ErrorContext::TxnExpired {
            write!(f, " (transaction expired)")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::AlreadyExists => 4,
        ErrorKind::Busy => 5,
        ErrorKind::Permission => 6,
        ErrorKind::Corrupt => 7,
        ErrorKind::Io => 8,
        ErrorKind::Canceled => 9,
        ErrorKind::Unsupported => 10,
    }
}

pub fn to_errno(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => libc::ENOTRECOVERABLE,
        ErrorKind::Usage => libc::EINVAL,
        ErrorKind::NotFound => libc::ENOENT,
        ErrorKind::AlreadyExists => libc::EEXIST,
        ErrorKind::Busy => libc::EBUSY,
        ErrorKind::Permission => libc::EACCES,
        ErrorKind::Corrupt => libc::EBADMSG,
        ErrorKind::Io => libc::EIO,
        ErrorKind::Canceled => libc::ECANCELED,
        ErrorKind::Unsupported => libc::ENOTSUP,
    }
}

pub(crate) fn io_error_kind(err: &io::Error) -> ErrorKind {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == libc::EACCES || errno == libc::EPERM {
        return ErrorKind::Permission;
    }
    match err.kind() {
        io::ErrorKind::NotFound => ErrorKind::NotFound,
        io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
        io::ErrorKind::WouldBlock => ErrorKind::Busy,
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::Io,
    }
}

pub(crate) fn io_error(err: io::Error, path: &Path) -> Error {
    Error::new(io_error_kind(&err))
        .with_errno(err.raw_os_error().unwrap_or(libc::EIO))
        .with_path(path)
        .with_source(err)
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorContext, ErrorKind, io_error_kind, to_errno, to_exit_code};

    #[test]
    fn exit_code_mapping_is_stable() {
        let cases = [
            (ErrorKind::Internal, 1),
            (ErrorKind::Usage, 2),
            (ErrorKind::NotFound, 3),
            (ErrorKind::AlreadyExists, 4),
            (ErrorKind::Busy, 5),
            (ErrorKind::Permission, 6),
            (ErrorKind::Corrupt, 7),
            (ErrorKind::Io, 8),
            (ErrorKind::Canceled, 9),
            (ErrorKind::Unsupported, 10),
        ];

        for (kind, code) in cases {
            assert_eq!(to_exit_code(kind), code);
        }
    }

    #[test]
    fn explicit_errno_wins_over_kind_default() {
        let err = Error::new(ErrorKind::Usage);
        assert_eq!(err.errno(), libc::EINVAL);

        let err = Error::new(ErrorKind::Usage).with_errno(libc::ENAMETOOLONG);
        assert_eq!(err.errno(), libc::ENAMETOOLONG);
        assert_eq!(to_errno(ErrorKind::Canceled), libc::ECANCELED);
    }

    #[test]
    fn conflict_and_expiry_are_distinguishable() {
        let conflict = Error::new(ErrorKind::Canceled);
        assert!(conflict.is_conflict());
        assert!(!conflict.is_expired());

        let expired = Error::new(ErrorKind::Canceled).with_context(ErrorContext::TxnExpired);
        assert!(!expired.is_conflict());
        assert!(expired.is_expired());
        assert!(expired.to_string().contains("transaction expired"));
    }

    #[test]
    fn io_errors_map_to_expected_kinds() {
        let err = std::io::Error::from_raw_os_error(libc::EAGAIN);
        assert_eq!(io_error_kind(&err), ErrorKind::Busy);

        let err = std::io::Error::from_raw_os_error(libc::EACCES);
        assert_eq!(io_error_kind(&err), ErrorKind::Permission);

        let err = std::io::Error::from_raw_os_error(libc::ENOENT);
        assert_eq!(io_error_kind(&err), ErrorKind::NotFound);

        let err = std::io::Error::from_raw_os_error(libc::EBADF);
        assert_eq!(io_error_kind(&err), ErrorKind::Io);
    }
}
