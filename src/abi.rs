//! Purpose: C ABI bridge for bindings (libhsekv).
//! Exports: C-callable kvdb/kvs/txn/cursor functions and the error helper.
//! Role: Stable ABI surface for non-Rust bindings over `api`.
//! Invariants: Opaque handles; explicit free/close functions; status 0 on success, -1 on failure.
//! Invariants: Caller buffers are (ptr, len, offset); a null ptr with non-zero len or an
//! Invariants: offset past len is a Usage error, never a memory access.
//! Invariants: Error kind codes match the CLI exit codes.
#![allow(clippy::result_large_err)]
#![allow(clippy::missing_safety_doc)]
#![allow(clippy::too_many_arguments)]
#![allow(non_camel_case_types)]

use crate::api::{
    self, ByteBuf, Cursor, CursorOptions, CursorRead, ErrorContext, Kvdb, Kvs, Transaction,
    TxnState,
};
use crate::core::error::{Error, ErrorKind, to_exit_code};
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::path::Path;
use std::ptr;

pub const HSEKV_CURSOR_REVERSE: u32 = 1;

pub const HSEKV_ERR_CTX_NONE: i32 = 0;
pub const HSEKV_ERR_CTX_TXN_EXPIRED: i32 = 1;

pub const HSEKV_TXN_INVALID: i32 = 0;
pub const HSEKV_TXN_ACTIVE: i32 = 1;
pub const HSEKV_TXN_COMMITTED: i32 = 2;
pub const HSEKV_TXN_ABORTED: i32 = 3;

pub struct hsekv_kvdb {
    kvdb: Kvdb,
}

pub struct hsekv_kvs {
    kvs: Kvs,
}

pub struct hsekv_txn {
    txn: Transaction,
}

pub struct hsekv_cursor {
    cursor: Cursor,
}

#[repr(C)]
pub struct hsekv_error {
    kind: i32,
    errno: i32,
    context: i32,
    message: *mut c_char,
}

#[unsafe(no_mangle)]
pub extern "C" fn hsekv_init(
    config: *const c_char,
    params: *const *const c_char,
    paramc: usize,
    out_err: *mut *mut hsekv_error,
) -> i32 {
    let result = (|| {
        let config = optional_str(config, "config")?;
        let params = parse_params(params, paramc)?;
        api::init(config.map(Path::new), &params)
    })();
    status(result, out_err)
}

#[unsafe(no_mangle)]
pub extern "C" fn hsekv_fini() {
    api::fini();
}

#[unsafe(no_mangle)]
pub extern "C" fn hsekv_kvdb_open(
    home: *const c_char,
    params: *const *const c_char,
    paramc: usize,
    out_kvdb: *mut *mut hsekv_kvdb,
    out_err: *mut *mut hsekv_error,
) -> i32 {
    if out_kvdb.is_null() {
        return fail(out_err, usage("out_kvdb is null"));
    }
    let result = (|| {
        let home = required_str(home, "home")?;
        let params = parse_params(params, paramc)?;
        Kvdb::open(home, &params)
    })();
    match result {
        Ok(kvdb) => {
            unsafe {
                *out_kvdb = Box::into_raw(Box::new(hsekv_kvdb { kvdb }));
            }
            0
        }
        Err(err) => fail(out_err, err),
    }
}

/// Closes and frees the handle. Null is a no-op.
#[unsafe(no_mangle)]
pub extern "C" fn hsekv_kvdb_close(kvdb: *mut hsekv_kvdb, out_err: *mut *mut hsekv_error) -> i32 {
    if kvdb.is_null() {
        return 0;
    }
    let handle = unsafe { Box::from_raw(kvdb) };
    status(handle.kvdb.close(), out_err)
}

#[unsafe(no_mangle)]
pub extern "C" fn hsekv_kvdb_kvs_open(
    kvdb: *mut hsekv_kvdb,
    name: *const c_char,
    params: *const *const c_char,
    paramc: usize,
    out_kvs: *mut *mut hsekv_kvs,
    out_err: *mut *mut hsekv_error,
) -> i32 {
    if out_kvs.is_null() {
        return fail(out_err, usage("out_kvs is null"));
    }
    let kvdb = match borrow(kvdb, "kvdb", out_err) {
        Ok(kvdb) => kvdb,
        Err(code) => return code,
    };
    let result = (|| {
        let name = required_str(name, "name")?;
        let params = parse_params(params, paramc)?;
        kvdb.kvdb.kvs_open(name, &params)
    })();
    match result {
        Ok(kvs) => {
            unsafe {
                *out_kvs = Box::into_raw(Box::new(hsekv_kvs { kvs }));
            }
            0
        }
        Err(err) => fail(out_err, err),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn hsekv_kvs_close(kvs: *mut hsekv_kvs) {
    if kvs.is_null() {
        return;
    }
    unsafe {
        drop(Box::from_raw(kvs));
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn hsekv_kvs_put(
    kvs: *mut hsekv_kvs,
    txn: *mut hsekv_txn,
    key: *const u8,
    key_len: usize,
    value: *const u8,
    value_len: usize,
    out_err: *mut *mut hsekv_error,
) -> i32 {
    let kvs = match borrow(kvs, "kvs", out_err) {
        Ok(kvs) => kvs,
        Err(code) => return code,
    };
    let result = (|| {
        let key = input_bytes(key, key_len, "key")?;
        let value = input_bytes(value, value_len, "value")?;
        kvs.kvs.put(optional_txn(txn), key, value)
    })();
    status(result, out_err)
}

/// Copies the value into `buf[buf_off..buf_len]`. `out_len` is the exact value length,
/// which may exceed the space provided. A null `buf` with zero length only queries.
#[unsafe(no_mangle)]
pub extern "C" fn hsekv_kvs_get(
    kvs: *mut hsekv_kvs,
    txn: *mut hsekv_txn,
    key: *const u8,
    key_len: usize,
    buf: *mut u8,
    buf_len: usize,
    buf_off: usize,
    out_found: *mut u8,
    out_len: *mut usize,
    out_err: *mut *mut hsekv_error,
) -> i32 {
    let kvs = match borrow(kvs, "kvs", out_err) {
        Ok(kvs) => kvs,
        Err(code) => return code,
    };
    let result = (|| {
        let key = input_bytes(key, key_len, "key")?;
        let mut out = output_region(buf, buf_len, buf_off, "buf")?;
        match out.as_mut() {
            Some(out) => kvs.kvs.get_into(optional_txn(txn), key, out),
            None => kvs.kvs.get_into(optional_txn(txn), key, &mut [0u8; 0]),
        }
    })();
    match result {
        Ok(lookup) => {
            store(out_found, u8::from(lookup.found));
            store(out_len, lookup.len);
            0
        }
        Err(err) => fail(out_err, err),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn hsekv_kvs_delete(
    kvs: *mut hsekv_kvs,
    txn: *mut hsekv_txn,
    key: *const u8,
    key_len: usize,
    out_err: *mut *mut hsekv_error,
) -> i32 {
    let kvs = match borrow(kvs, "kvs", out_err) {
        Ok(kvs) => kvs,
        Err(code) => return code,
    };
    let result = input_bytes(key, key_len, "key").and_then(|key| kvs.kvs.delete(optional_txn(txn), key));
    status(result, out_err)
}

#[unsafe(no_mangle)]
pub extern "C" fn hsekv_kvs_prefix_delete(
    kvs: *mut hsekv_kvs,
    txn: *mut hsekv_txn,
    pfx: *const u8,
    pfx_len: usize,
    out_err: *mut *mut hsekv_error,
) -> i32 {
    let kvs = match borrow(kvs, "kvs", out_err) {
        Ok(kvs) => kvs,
        Err(code) => return code,
    };
    let result = input_bytes(pfx, pfx_len, "pfx")
        .and_then(|pfx| kvs.kvs.prefix_delete(optional_txn(txn), pfx));
    status(result, out_err)
}

#[unsafe(no_mangle)]
pub extern "C" fn hsekv_txn_alloc(
    kvdb: *mut hsekv_kvdb,
    out_txn: *mut *mut hsekv_txn,
    out_err: *mut *mut hsekv_error,
) -> i32 {
    if out_txn.is_null() {
        return fail(out_err, usage("out_txn is null"));
    }
    let kvdb = match borrow(kvdb, "kvdb", out_err) {
        Ok(kvdb) => kvdb,
        Err(code) => return code,
    };
    let txn = kvdb.kvdb.transaction();
    unsafe {
        *out_txn = Box::into_raw(Box::new(hsekv_txn { txn }));
    }
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn hsekv_txn_begin(txn: *mut hsekv_txn, out_err: *mut *mut hsekv_error) -> i32 {
    match borrow(txn, "txn", out_err) {
        Ok(txn) => status(txn.txn.begin(), out_err),
        Err(code) => code,
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn hsekv_txn_commit(txn: *mut hsekv_txn, out_err: *mut *mut hsekv_error) -> i32 {
    match borrow(txn, "txn", out_err) {
        Ok(txn) => status(txn.txn.commit(), out_err),
        Err(code) => code,
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn hsekv_txn_abort(txn: *mut hsekv_txn, out_err: *mut *mut hsekv_error) -> i32 {
    match borrow(txn, "txn", out_err) {
        Ok(txn) => status(txn.txn.abort(), out_err),
        Err(code) => code,
    }
}

/// One of the `HSEKV_TXN_*` constants, or -1 for a null handle.
#[unsafe(no_mangle)]
pub extern "C" fn hsekv_txn_state(txn: *const hsekv_txn) -> i32 {
    if txn.is_null() {
        return -1;
    }
    match unsafe { &*txn }.txn.state() {
        TxnState::Invalid => HSEKV_TXN_INVALID,
        TxnState::Active => HSEKV_TXN_ACTIVE,
        TxnState::Committed => HSEKV_TXN_COMMITTED,
        TxnState::Aborted => HSEKV_TXN_ABORTED,
    }
}

/// Commits an ACTIVE transaction, then frees the handle. Null is a no-op.
#[unsafe(no_mangle)]
pub extern "C" fn hsekv_txn_free(txn: *mut hsekv_txn, out_err: *mut *mut hsekv_error) -> i32 {
    if txn.is_null() {
        return 0;
    }
    let handle = unsafe { Box::from_raw(txn) };
    status(handle.txn.close(), out_err)
}

#[unsafe(no_mangle)]
pub extern "C" fn hsekv_cursor_create(
    kvs: *mut hsekv_kvs,
    txn: *mut hsekv_txn,
    filter: *const u8,
    filter_len: usize,
    flags: u32,
    out_cursor: *mut *mut hsekv_cursor,
    out_err: *mut *mut hsekv_error,
) -> i32 {
    if out_cursor.is_null() {
        return fail(out_err, usage("out_cursor is null"));
    }
    let kvs = match borrow(kvs, "kvs", out_err) {
        Ok(kvs) => kvs,
        Err(code) => return code,
    };
    let result = (|| {
        if flags & !HSEKV_CURSOR_REVERSE != 0 {
            return Err(usage("unknown cursor flags"));
        }
        let filter = input_bytes(filter, filter_len, "filter")?;
        let mut options = CursorOptions::new().filter(filter);
        if flags & HSEKV_CURSOR_REVERSE != 0 {
            options = options.reverse();
        }
        if let Some(txn) = optional_txn(txn) {
            options = options.txn(txn);
        }
        kvs.kvs.cursor(options)
    })();
    match result {
        Ok(cursor) => {
            unsafe {
                *out_cursor = Box::into_raw(Box::new(hsekv_cursor { cursor }));
            }
            0
        }
        Err(err) => fail(out_err, err),
    }
}

/// Reads the next record into the key and value regions. `out_eof` is set to 1 at the end
/// of the sequence, in which case the lengths are left untouched.
#[unsafe(no_mangle)]
pub extern "C" fn hsekv_cursor_read(
    cursor: *mut hsekv_cursor,
    key_buf: *mut u8,
    key_buf_len: usize,
    key_buf_off: usize,
    val_buf: *mut u8,
    val_buf_len: usize,
    val_buf_off: usize,
    out_key_len: *mut usize,
    out_val_len: *mut usize,
    out_eof: *mut u8,
    out_err: *mut *mut hsekv_error,
) -> i32 {
    let cursor = match borrow(cursor, "cursor", out_err) {
        Ok(cursor) => cursor,
        Err(code) => return code,
    };
    let result = (|| {
        let mut key = output_region(key_buf, key_buf_len, key_buf_off, "key_buf")?;
        let mut value = output_region(val_buf, val_buf_len, val_buf_off, "val_buf")?;
        // Lengths are reported even when the caller passes no buffer at all.
        let mut empty_key = [0u8; 0];
        let mut empty_value = [0u8; 0];
        let key_out: &mut dyn api::OutputBuffer = match key.as_mut() {
            Some(buf) => buf,
            None => &mut empty_key,
        };
        let value_out: &mut dyn api::OutputBuffer = match value.as_mut() {
            Some(buf) => buf,
            None => &mut empty_value,
        };
        cursor.cursor.read_into(Some(key_out), Some(value_out))
    })();
    match result {
        Ok(CursorRead::Record(lens)) => {
            store(out_key_len, lens.key_len);
            store(out_val_len, lens.value_len);
            store(out_eof, 0);
            0
        }
        Ok(CursorRead::Eof) => {
            store(out_eof, 1);
            0
        }
        Err(err) => fail(out_err, err),
    }
}

/// Seeks and copies the landed key into `found_buf`; `out_found` is 0 when nothing remains.
#[unsafe(no_mangle)]
pub extern "C" fn hsekv_cursor_seek(
    cursor: *mut hsekv_cursor,
    key: *const u8,
    key_len: usize,
    found_buf: *mut u8,
    found_buf_len: usize,
    found_buf_off: usize,
    out_found: *mut u8,
    out_found_len: *mut usize,
    out_err: *mut *mut hsekv_error,
) -> i32 {
    let cursor = match borrow(cursor, "cursor", out_err) {
        Ok(cursor) => cursor,
        Err(code) => return code,
    };
    let result = (|| {
        let key = input_bytes(key, key_len, "key")?;
        let mut out = output_region(found_buf, found_buf_len, found_buf_off, "found_buf")?;
        match out.as_mut() {
            Some(out) => cursor.cursor.seek_into(key, out),
            None => cursor.cursor.seek_into(key, &mut [0u8; 0]),
        }
    })();
    match result {
        Ok(lookup) => {
            store(out_found, u8::from(lookup.found));
            store(out_found_len, lookup.len);
            0
        }
        Err(err) => fail(out_err, err),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn hsekv_cursor_seek_range(
    cursor: *mut hsekv_cursor,
    min: *const u8,
    min_len: usize,
    max: *const u8,
    max_len: usize,
    found_buf: *mut u8,
    found_buf_len: usize,
    found_buf_off: usize,
    out_found: *mut u8,
    out_found_len: *mut usize,
    out_err: *mut *mut hsekv_error,
) -> i32 {
    let cursor = match borrow(cursor, "cursor", out_err) {
        Ok(cursor) => cursor,
        Err(code) => return code,
    };
    let result = (|| {
        let min = input_bytes(min, min_len, "min")?;
        let max = input_bytes(max, max_len, "max")?;
        let mut out = output_region(found_buf, found_buf_len, found_buf_off, "found_buf")?;
        match out.as_mut() {
            Some(out) => cursor.cursor.seek_range_into(min, max, out),
            None => cursor.cursor.seek_range_into(min, max, &mut [0u8; 0]),
        }
    })();
    match result {
        Ok(lookup) => {
            store(out_found, u8::from(lookup.found));
            store(out_found_len, lookup.len);
            0
        }
        Err(err) => fail(out_err, err),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn hsekv_cursor_update_view(
    cursor: *mut hsekv_cursor,
    out_err: *mut *mut hsekv_error,
) -> i32 {
    match borrow(cursor, "cursor", out_err) {
        Ok(cursor) => status(cursor.cursor.update_view(), out_err),
        Err(code) => code,
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn hsekv_cursor_destroy(cursor: *mut hsekv_cursor) {
    if cursor.is_null() {
        return;
    }
    unsafe {
        drop(Box::from_raw(cursor));
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn hsekv_error_free(err: *mut hsekv_error) {
    if err.is_null() {
        return;
    }
    unsafe {
        let err = Box::from_raw(err);
        if !err.message.is_null() {
            drop(CString::from_raw(err.message));
        }
    }
}

fn borrow<'a, T>(handle: *mut T, name: &str, out_err: *mut *mut hsekv_error) -> Result<&'a mut T, i32> {
    if handle.is_null() {
        return Err(fail(out_err, usage(&format!("{name} is null"))));
    }
    unsafe { Ok(&mut *handle) }
}

fn optional_txn<'a>(txn: *mut hsekv_txn) -> Option<&'a Transaction> {
    if txn.is_null() {
        None
    } else {
        Some(unsafe { &(*txn).txn })
    }
}

fn input_bytes<'a>(ptr: *const u8, len: usize, name: &str) -> Result<&'a [u8], Error> {
    if ptr.is_null() {
        if len != 0 {
            return Err(usage(&format!("{name} is null with length {len}")));
        }
        return Ok(&[]);
    }
    Ok(unsafe { std::slice::from_raw_parts(ptr, len) })
}

fn output_region<'a>(
    ptr: *mut u8,
    len: usize,
    off: usize,
    name: &str,
) -> Result<Option<ByteBuf<&'a mut [u8]>>, Error> {
    if ptr.is_null() {
        if len != 0 || off != 0 {
            return Err(usage(&format!("{name} is null with length {len}")));
        }
        return Ok(None);
    }
    if off > len {
        return Err(usage(&format!("{name} offset {off} is beyond length {len}")));
    }
    let region = unsafe { std::slice::from_raw_parts_mut(ptr, len) };
    ByteBuf::new(region).with_position(off).map(Some)
}

fn required_str<'a>(input: *const c_char, name: &str) -> Result<&'a str, Error> {
    optional_str(input, name)?.ok_or_else(|| usage(&format!("{name} is null")))
}

fn optional_str<'a>(input: *const c_char, name: &str) -> Result<Option<&'a str>, Error> {
    if input.is_null() {
        return Ok(None);
    }
    unsafe { CStr::from_ptr(input) }
        .to_str()
        .map(Some)
        .map_err(|_| usage(&format!("{name} is not valid UTF-8")))
}

fn parse_params(params: *const *const c_char, count: usize) -> Result<Vec<String>, Error> {
    if params.is_null() {
        if count != 0 {
            return Err(usage("params is null with a non-zero count"));
        }
        return Ok(Vec::new());
    }
    let slice = unsafe { std::slice::from_raw_parts(params, count) };
    slice
        .iter()
        .map(|item| {
            if item.is_null() {
                return Err(usage("params contains null"));
            }
            required_str(*item, "param").map(str::to_string)
        })
        .collect()
}

fn store<T>(ptr: *mut T, value: T) {
    if !ptr.is_null() {
        unsafe {
            *ptr = value;
        }
    }
}

fn usage(message: &str) -> Error {
    Error::new(ErrorKind::Usage).with_message(message)
}

fn status(result: Result<(), Error>, out_err: *mut *mut hsekv_error) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => fail(out_err, err),
    }
}

fn fail(out_err: *mut *mut hsekv_error, err: Error) -> i32 {
    if out_err.is_null() {
        return -1;
    }
    let error = Box::new(hsekv_error {
        kind: to_exit_code(err.kind()),
        errno: err.errno(),
        context: match err.context() {
            ErrorContext::None => HSEKV_ERR_CTX_NONE,
            ErrorContext::TxnExpired => HSEKV_ERR_CTX_TXN_EXPIRED,
        },
        message: to_c_string(&err.to_string()),
    });
    unsafe {
        *out_err = Box::into_raw(error);
    }
    -1
}

fn to_c_string(input: &str) -> *mut c_char {
    CString::new(input)
        .map(|s| s.into_raw())
        .unwrap_or(ptr::null_mut())
}

#[cfg(test)]
mod tests {
    use super::{
        HSEKV_TXN_ACTIVE, HSEKV_TXN_COMMITTED, hsekv_cursor, hsekv_cursor_create,
        hsekv_cursor_destroy, hsekv_cursor_read, hsekv_error, hsekv_error_free, hsekv_init,
        hsekv_kvdb, hsekv_kvdb_close, hsekv_kvdb_kvs_open, hsekv_kvdb_open, hsekv_kvs,
        hsekv_kvs_close, hsekv_kvs_get, hsekv_kvs_put, hsekv_txn, hsekv_txn_alloc,
        hsekv_txn_begin, hsekv_txn_commit, hsekv_txn_free, hsekv_txn_state,
    };
    use crate::api::{Kvdb, to_exit_code};
    use crate::core::error::ErrorKind;
    use std::ffi::CString;
    use std::ptr;

    fn open_store(dir: &std::path::Path) -> (*mut hsekv_kvdb, *mut hsekv_kvs) {
        crate::api::init::<&str>(None, &[]).expect("init");
        Kvdb::create(dir, &[] as &[&str]).expect("create");
        let kvdb = Kvdb::open(dir, &[] as &[&str]).expect("open");
        kvdb.kvs_create("kvs", &["prefix.length=3"]).expect("kvs create");
        kvdb.close().expect("close");

        let home = CString::new(dir.to_string_lossy().as_bytes()).expect("home");
        let name = CString::new("kvs").expect("name");
        let param = CString::new("transactions.enabled=false").expect("param");
        let params = [param.as_ptr()];
        let mut err: *mut hsekv_error = ptr::null_mut();
        let mut kvdb: *mut hsekv_kvdb = ptr::null_mut();
        let mut kvs: *mut hsekv_kvs = ptr::null_mut();
        assert_eq!(hsekv_init(ptr::null(), ptr::null(), 0, &mut err), 0);
        assert_eq!(hsekv_kvdb_open(home.as_ptr(), ptr::null(), 0, &mut kvdb, &mut err), 0);
        assert_eq!(
            hsekv_kvdb_kvs_open(kvdb, name.as_ptr(), params.as_ptr(), 1, &mut kvs, &mut err),
            0
        );
        (kvdb, kvs)
    }

    #[test]
    fn put_get_reports_exact_length_with_offset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (kvdb, kvs) = open_store(dir.path());
        let mut err: *mut hsekv_error = ptr::null_mut();

        let rc = hsekv_kvs_put(kvs, ptr::null_mut(), b"key0".as_ptr(), 4, b"value0".as_ptr(), 6, &mut err);
        assert_eq!(rc, 0);

        let mut buf = [0u8; 6];
        let mut found = 0u8;
        let mut len = 0usize;
        let rc = hsekv_kvs_get(
            kvs,
            ptr::null_mut(),
            b"key0".as_ptr(),
            4,
            buf.as_mut_ptr(),
            buf.len(),
            2,
            &mut found,
            &mut len,
            &mut err,
        );
        assert_eq!(rc, 0);
        assert_eq!(found, 1);
        assert_eq!(len, 6);
        assert_eq!(&buf[2..], b"valu");

        let rc = hsekv_kvs_get(
            kvs,
            ptr::null_mut(),
            b"nope".as_ptr(),
            4,
            ptr::null_mut(),
            0,
            0,
            &mut found,
            &mut len,
            &mut err,
        );
        assert_eq!(rc, 0);
        assert_eq!(found, 0);

        hsekv_kvs_close(kvs);
        assert_eq!(hsekv_kvdb_close(kvdb, &mut err), 0);
    }

    #[test]
    fn bad_regions_fail_with_usage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (kvdb, kvs) = open_store(dir.path());
        let mut err: *mut hsekv_error = ptr::null_mut();

        let rc = hsekv_kvs_put(kvs, ptr::null_mut(), ptr::null(), 3, b"v".as_ptr(), 1, &mut err);
        assert_eq!(rc, -1);
        assert!(!err.is_null());
        assert_eq!(unsafe { (*err).kind }, to_exit_code(ErrorKind::Usage));
        assert_eq!(unsafe { (*err).errno }, libc::EINVAL);
        hsekv_error_free(err);

        let mut err: *mut hsekv_error = ptr::null_mut();
        let mut buf = [0u8; 4];
        let rc = hsekv_kvs_get(
            kvs,
            ptr::null_mut(),
            b"k".as_ptr(),
            1,
            buf.as_mut_ptr(),
            buf.len(),
            5,
            ptr::null_mut(),
            ptr::null_mut(),
            &mut err,
        );
        assert_eq!(rc, -1);
        assert_eq!(unsafe { (*err).kind }, to_exit_code(ErrorKind::Usage));
        hsekv_error_free(err);

        hsekv_kvs_close(kvs);
        let mut err: *mut hsekv_error = ptr::null_mut();
        assert_eq!(hsekv_kvdb_close(kvdb, &mut err), 0);
    }

    #[test]
    fn txn_and_cursor_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (kvdb, kvs) = open_store(dir.path());
        let mut err: *mut hsekv_error = ptr::null_mut();

        for i in 0..3u8 {
            let key = [b'k', b'e', b'y', b'0' + i];
            assert_eq!(hsekv_kvs_put(kvs, ptr::null_mut(), key.as_ptr(), 4, b"v".as_ptr(), 1, &mut err), 0);
        }

        let mut txn: *mut hsekv_txn = ptr::null_mut();
        assert_eq!(hsekv_txn_alloc(kvdb, &mut txn, &mut err), 0);
        assert_eq!(hsekv_txn_begin(txn, &mut err), 0);
        assert_eq!(hsekv_txn_state(txn), HSEKV_TXN_ACTIVE);
        assert_eq!(hsekv_txn_commit(txn, &mut err), 0);
        assert_eq!(hsekv_txn_state(txn), HSEKV_TXN_COMMITTED);
        assert_eq!(hsekv_txn_free(txn, &mut err), 0);

        let mut cursor: *mut hsekv_cursor = ptr::null_mut();
        let rc = hsekv_cursor_create(kvs, ptr::null_mut(), b"key".as_ptr(), 3, 0, &mut cursor, &mut err);
        assert_eq!(rc, 0);
        let mut reads = 0;
        loop {
            let mut key = [0u8; 8];
            let (mut key_len, mut val_len, mut eof) = (0usize, 0usize, 0u8);
            let rc = hsekv_cursor_read(
                cursor,
                key.as_mut_ptr(),
                key.len(),
                0,
                ptr::null_mut(),
                0,
                0,
                &mut key_len,
                &mut val_len,
                &mut eof,
                &mut err,
            );
            assert_eq!(rc, 0);
            if eof == 1 {
                break;
            }
            assert_eq!(key_len, 4);
            assert_eq!(val_len, 1);
            assert_eq!(key[3], b'0' + reads);
            reads += 1;
        }
        assert_eq!(reads, 3);
        hsekv_cursor_destroy(cursor);
        hsekv_kvs_close(kvs);
        assert_eq!(hsekv_kvdb_close(kvdb, &mut err), 0);
    }
}
