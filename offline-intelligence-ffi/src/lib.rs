// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! C ABI for the offline intelligence memory engine
//!
//! Every value the library allocates is released by a matching `*_free`
//! function: engines with [`oi_engine_free`], optimization results with
//! [`oi_optimization_result_free`], search results with
//! [`oi_search_result_free`] and strings with [`oi_string_free`]. Input
//! strings are borrowed for the duration of the call only.
//!
//! A null pointer for optional text means "absent"; an empty string means
//! "provided but empty".
//!
//! See `include/offline_intelligence.h` for the C declarations.

use offline_intelligence_memory::{EngineConfig, MemoryEngine, MemoryError, Message, SearchHit};
use offline_intelligence_telemetry::{init_logging, LoggingConfig};
use std::ffi::{c_char, c_int, CStr, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use tracing::{debug, warn};

/// Status of a fallible call
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OiStatus {
    Ok = 0,
    InvalidArgument = 1,
    AllocationFailure = 2,
    Internal = 3,
}

impl From<&MemoryError> for OiStatus {
    fn from(e: &MemoryError) -> Self {
        match e {
            e if e.is_caller_error() => OiStatus::InvalidArgument,
            MemoryError::AllocationFailure(_) => OiStatus::AllocationFailure,
            _ => OiStatus::Internal,
        }
    }
}

/// Opaque engine handle
pub struct OiEngine {
    inner: MemoryEngine,
}

/// A message: role tag and content
///
/// As input both strings are borrowed. As output both are owned by the
/// enclosing result.
#[repr(C)]
#[derive(Debug)]
pub struct OiMessage {
    pub role: *const c_char,
    pub content: *const c_char,
}

/// Result of [`oi_optimize_context`]
#[repr(C)]
#[derive(Debug)]
pub struct OiOptimizationResult {
    pub messages: *mut OiMessage,
    pub message_count: usize,
    pub original_count: usize,
    pub optimized_count: usize,
    pub compression_ratio: f32,
}

impl OiOptimizationResult {
    const EMPTY: Self = Self {
        messages: ptr::null_mut(),
        message_count: 0,
        original_count: 0,
        optimized_count: 0,
        compression_ratio: 1.0,
    };
}

/// One search hit
#[repr(C)]
#[derive(Debug)]
pub struct OiSearchHit {
    pub session_id: *mut c_char,
    pub position: usize,
    pub message: OiMessage,
    pub score: f32,
}

/// Result of [`oi_search`]
#[repr(C)]
#[derive(Debug)]
pub struct OiSearchResult {
    pub total: usize,
    /// One of "keyword", "semantic", "hybrid", "none"
    pub search_type: *mut c_char,
    pub hits: *mut OiSearchHit,
    pub hit_count: usize,
}

impl OiSearchResult {
    const EMPTY: Self = Self {
        total: 0,
        search_type: ptr::null_mut(),
        hits: ptr::null_mut(),
        hit_count: 0,
    };
}

// ============================================================================
// Engine lifecycle
// ============================================================================

/// Create an engine configured from `OI_*` environment variables.
///
/// Returns null on failure.
#[no_mangle]
pub extern "C" fn oi_engine_new() -> *mut OiEngine {
    guarded(ptr::null_mut(), || {
        let mut config = EngineConfig::default();
        if let Err(e) = config.apply_env_overrides() {
            warn!(error = %e, "Rejected engine configuration");
            return ptr::null_mut();
        }
        new_engine(config)
    })
}

/// Create an engine from a TOML configuration file.
///
/// Returns null on failure.
///
/// # Safety
/// `config_path` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn oi_engine_new_with_config(config_path: *const c_char) -> *mut OiEngine {
    guarded(ptr::null_mut(), || {
        let Ok(Some(path)) = borrow_str(config_path) else {
            return ptr::null_mut();
        };
        match EngineConfig::load(path) {
            Ok(config) => new_engine(config),
            Err(e) => {
                warn!(error = %e, path, "Failed to load engine configuration");
                ptr::null_mut()
            }
        }
    })
}

/// Release an engine. Null is ignored.
///
/// # Safety
/// `engine` must be null or a pointer returned by `oi_engine_new*` that has
/// not been freed.
#[no_mangle]
pub unsafe extern "C" fn oi_engine_free(engine: *mut OiEngine) {
    if engine.is_null() {
        return;
    }
    let engine = Box::from_raw(engine);
    if let Err(e) = engine.inner.shutdown() {
        warn!(error = %e, "Failed to flush sessions on shutdown");
    }
}

fn new_engine(config: EngineConfig) -> *mut OiEngine {
    if let Err(e) = init_logging(&LoggingConfig::from_env()) {
        // Logging is optional; keep going without it.
        eprintln!("offline-intelligence: logging disabled: {}", e);
    }
    match MemoryEngine::new(config) {
        Ok(inner) => Box::into_raw(Box::new(OiEngine { inner })),
        Err(e) => {
            warn!(error = %e, "Failed to create memory engine");
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Operations
// ============================================================================

/// Optimize a message history for a session.
///
/// On `Ok`, `*out` owns its message array and must be released with
/// [`oi_optimization_result_free`]. On any other status `*out` is left empty.
///
/// # Safety
/// `engine` must be a live engine; `session_id` a valid C string; `messages`
/// an array of `count` messages with valid C strings (may be null when
/// `count` is 0); `query` null or a valid C string; `out` writable.
#[no_mangle]
pub unsafe extern "C" fn oi_optimize_context(
    engine: *const OiEngine,
    session_id: *const c_char,
    messages: *const OiMessage,
    count: usize,
    query: *const c_char,
    out: *mut OiOptimizationResult,
) -> OiStatus {
    if out.is_null() {
        return OiStatus::InvalidArgument;
    }
    out.write(OiOptimizationResult::EMPTY);

    guarded(OiStatus::Internal, || {
        let Some(engine) = engine.as_ref() else {
            return OiStatus::InvalidArgument;
        };
        let (Ok(Some(session_id)), Ok(query), Ok(history)) = (
            borrow_str(session_id),
            borrow_str(query),
            read_messages(messages, count),
        ) else {
            return OiStatus::InvalidArgument;
        };

        let result = match engine.inner.optimize_context(session_id, &history, query) {
            Ok(result) => result,
            Err(e) => {
                debug!(error = %e, "optimize_context rejected");
                return OiStatus::from(&e);
            }
        };

        let owned = match owned_messages(&result.optimized_messages) {
            Ok(owned) => owned,
            Err(status) => return status,
        };
        let (ptr, len) = into_raw_array(owned);
        out.write(OiOptimizationResult {
            messages: ptr,
            message_count: len,
            original_count: result.original_count,
            optimized_count: result.optimized_count,
            compression_ratio: result.compression_ratio,
        });
        OiStatus::Ok
    })
}

/// Release the contents of an optimization result and reset it.
///
/// # Safety
/// `result` must be null or point to a result filled by
/// [`oi_optimize_context`] that has not been released.
#[no_mangle]
pub unsafe extern "C" fn oi_optimization_result_free(result: *mut OiOptimizationResult) {
    let Some(result) = result.as_mut() else {
        return;
    };
    for message in from_raw_array(result.messages, result.message_count).iter() {
        free_message(message);
    }
    *result = OiOptimizationResult::EMPTY;
}

/// Search stored messages.
///
/// `session_id` null searches every session. A negative `limit` is treated
/// as 0. On `Ok`, `*out` must be released with [`oi_search_result_free`].
///
/// # Safety
/// `engine` must be a live engine; `query` a valid C string; `session_id`
/// null or a valid C string; `out` writable.
#[no_mangle]
pub unsafe extern "C" fn oi_search(
    engine: *const OiEngine,
    query: *const c_char,
    session_id: *const c_char,
    limit: c_int,
    out: *mut OiSearchResult,
) -> OiStatus {
    if out.is_null() {
        return OiStatus::InvalidArgument;
    }
    out.write(OiSearchResult::EMPTY);

    guarded(OiStatus::Internal, || {
        let Some(engine) = engine.as_ref() else {
            return OiStatus::InvalidArgument;
        };
        let (Ok(Some(query)), Ok(session_id)) = (borrow_str(query), borrow_str(session_id)) else {
            return OiStatus::InvalidArgument;
        };

        let limit = usize::try_from(limit).unwrap_or(0);
        let result = engine.inner.search(query, session_id, limit);

        let Ok(search_type) = owned_string(result.search_type.as_str()) else {
            return OiStatus::AllocationFailure;
        };
        let hits = match owned_hits(&result.hits) {
            Ok(hits) => hits,
            Err(status) => {
                free_string(search_type);
                return status;
            }
        };
        let (ptr, len) = into_raw_array(hits);
        out.write(OiSearchResult {
            total: result.total,
            search_type,
            hits: ptr,
            hit_count: len,
        });
        OiStatus::Ok
    })
}

/// Release the contents of a search result and reset it.
///
/// # Safety
/// `result` must be null or point to a result filled by [`oi_search`] that
/// has not been released.
#[no_mangle]
pub unsafe extern "C" fn oi_search_result_free(result: *mut OiSearchResult) {
    let Some(result) = result.as_mut() else {
        return;
    };
    free_string(result.search_type);
    for hit in from_raw_array(result.hits, result.hit_count).iter() {
        free_hit(hit);
    }
    *result = OiSearchResult::EMPTY;
}

/// Generate a title for a message history.
///
/// Returns an owned string to release with [`oi_string_free`], or null when
/// the arguments are malformed.
///
/// # Safety
/// `engine` must be a live engine; `messages` an array of `count` messages
/// with valid C strings (may be null when `count` is 0).
#[no_mangle]
pub unsafe extern "C" fn oi_generate_title(
    engine: *const OiEngine,
    messages: *const OiMessage,
    count: usize,
) -> *mut c_char {
    guarded(ptr::null_mut(), || {
        let Some(engine) = engine.as_ref() else {
            return ptr::null_mut();
        };
        let Ok(history) = read_messages(messages, count) else {
            return ptr::null_mut();
        };
        owned_string(&engine.inner.generate_title(&history)).unwrap_or(ptr::null_mut())
    })
}

/// Release a string returned by this library. Null is ignored.
///
/// # Safety
/// `s` must be null or a string returned by this library that has not been
/// released.
#[no_mangle]
pub unsafe extern "C" fn oi_string_free(s: *mut c_char) {
    free_string(s);
}

// ============================================================================
// Marshaling helpers
// ============================================================================

fn guarded<T>(fallback: T, f: impl FnOnce() -> T) -> T {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        warn!("Recovered from a panic at the C boundary");
        fallback
    })
}

/// Null maps to `None`; invalid UTF-8 is an error.
unsafe fn borrow_str<'a>(s: *const c_char) -> Result<Option<&'a str>, OiStatus> {
    if s.is_null() {
        return Ok(None);
    }
    CStr::from_ptr(s)
        .to_str()
        .map(Some)
        .map_err(|_| OiStatus::InvalidArgument)
}

unsafe fn read_messages(messages: *const OiMessage, count: usize) -> Result<Vec<Message>, OiStatus> {
    if count == 0 {
        return Ok(Vec::new());
    }
    if messages.is_null() {
        return Err(OiStatus::InvalidArgument);
    }
    std::slice::from_raw_parts(messages, count)
        .iter()
        .map(|m| match (borrow_str(m.role)?, borrow_str(m.content)?) {
            (Some(role), Some(content)) => Ok(Message::new(role, content)),
            _ => Err(OiStatus::InvalidArgument),
        })
        .collect()
}

fn owned_string(s: &str) -> Result<*mut c_char, OiStatus> {
    CString::new(s.replace('\0', ""))
        .map(CString::into_raw)
        .map_err(|_| OiStatus::AllocationFailure)
}

unsafe fn free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

fn owned_message(message: &Message) -> Result<OiMessage, OiStatus> {
    let role = owned_string(message.role.as_str())?;
    match owned_string(&message.content) {
        Ok(content) => Ok(OiMessage { role, content }),
        Err(status) => {
            unsafe { free_string(role) };
            Err(status)
        }
    }
}

unsafe fn free_message(message: &OiMessage) {
    free_string(message.role as *mut c_char);
    free_string(message.content as *mut c_char);
}

fn owned_messages(messages: &[Message]) -> Result<Vec<OiMessage>, OiStatus> {
    let mut owned = Vec::with_capacity(messages.len());
    for message in messages {
        match owned_message(message) {
            Ok(m) => owned.push(m),
            Err(status) => {
                owned.iter().for_each(|m| unsafe { free_message(m) });
                return Err(status);
            }
        }
    }
    Ok(owned)
}

fn owned_hit(hit: &SearchHit) -> Result<OiSearchHit, OiStatus> {
    let session_id = owned_string(&hit.session_id)?;
    match owned_message(&hit.message) {
        Ok(message) => Ok(OiSearchHit {
            session_id,
            position: hit.position,
            message,
            score: hit.score,
        }),
        Err(status) => {
            unsafe { free_string(session_id) };
            Err(status)
        }
    }
}

unsafe fn free_hit(hit: &OiSearchHit) {
    free_string(hit.session_id);
    free_message(&hit.message);
}

fn owned_hits(hits: &[SearchHit]) -> Result<Vec<OiSearchHit>, OiStatus> {
    let mut owned = Vec::with_capacity(hits.len());
    for hit in hits {
        match owned_hit(hit) {
            Ok(h) => owned.push(h),
            Err(status) => {
                owned.iter().for_each(|h| unsafe { free_hit(h) });
                return Err(status);
            }
        }
    }
    Ok(owned)
}

fn into_raw_array<T>(items: Vec<T>) -> (*mut T, usize) {
    if items.is_empty() {
        return (ptr::null_mut(), 0);
    }
    let len = items.len();
    (Box::into_raw(items.into_boxed_slice()) as *mut T, len)
}

unsafe fn from_raw_array<T>(ptr: *mut T, len: usize) -> Box<[T]> {
    if ptr.is_null() || len == 0 {
        return Box::new([]);
    }
    Box::from_raw(ptr::slice_from_raw_parts_mut(ptr, len))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Owned {
        _strings: Vec<CString>,
        messages: Vec<OiMessage>,
    }

    fn messages(pairs: &[(&str, &str)]) -> Owned {
        let mut strings = Vec::new();
        let mut messages = Vec::new();
        for (role, content) in pairs {
            let role = CString::new(*role).unwrap();
            let content = CString::new(*content).unwrap();
            messages.push(OiMessage {
                role: role.as_ptr(),
                content: content.as_ptr(),
            });
            strings.push(role);
            strings.push(content);
        }
        Owned {
            _strings: strings,
            messages,
        }
    }

    fn paris() -> Owned {
        messages(&[
            ("system", "You are helpful"),
            ("user", "What is Paris?"),
            ("assistant", "A city in France"),
            ("user", "What's its population?"),
        ])
    }

    unsafe fn text(ptr: *const c_char) -> String {
        CStr::from_ptr(ptr).to_str().unwrap().to_string()
    }

    #[test]
    fn test_optimize_returns_owned_messages() {
        let engine = oi_engine_new();
        assert!(!engine.is_null());
        let input = paris();
        let session = CString::new("s1").unwrap();
        let mut out = OiOptimizationResult::EMPTY;

        unsafe {
            let status = oi_optimize_context(
                engine,
                session.as_ptr(),
                input.messages.as_ptr(),
                input.messages.len(),
                ptr::null(),
                &mut out,
            );
            assert_eq!(status, OiStatus::Ok);
            assert_eq!(out.original_count, 4);
            assert_eq!(out.optimized_count, 4);
            assert_eq!(out.message_count, 4);
            assert_eq!(out.compression_ratio, 1.0);

            let kept = std::slice::from_raw_parts(out.messages, out.message_count);
            assert_eq!(text(kept[0].role), "system");
            assert_eq!(text(kept[3].content), "What's its population?");

            oi_optimization_result_free(&mut out);
            assert!(out.messages.is_null());
            oi_optimization_result_free(&mut out);
            oi_engine_free(engine);
        }
    }

    #[test]
    fn test_optimize_rejects_bad_arguments() {
        let engine = oi_engine_new();
        let input = paris();
        let empty = CString::new("").unwrap();
        let mut out = OiOptimizationResult::EMPTY;

        unsafe {
            let status = oi_optimize_context(
                engine,
                empty.as_ptr(),
                input.messages.as_ptr(),
                input.messages.len(),
                ptr::null(),
                &mut out,
            );
            assert_eq!(status, OiStatus::InvalidArgument);
            assert!(out.messages.is_null());

            let status = oi_optimize_context(
                engine,
                ptr::null(),
                input.messages.as_ptr(),
                input.messages.len(),
                ptr::null(),
                &mut out,
            );
            assert_eq!(status, OiStatus::InvalidArgument);

            let session = CString::new("s1").unwrap();
            let status = oi_optimize_context(engine, session.as_ptr(), ptr::null(), 3, ptr::null(), &mut out);
            assert_eq!(status, OiStatus::InvalidArgument);

            let status = oi_optimize_context(
                ptr::null(),
                session.as_ptr(),
                ptr::null(),
                0,
                ptr::null(),
                &mut out,
            );
            assert_eq!(status, OiStatus::InvalidArgument);
            oi_engine_free(engine);
        }
    }

    #[test]
    fn test_search_and_limits() {
        let engine = oi_engine_new();
        let input = paris();
        let session = CString::new("s1").unwrap();
        let query = CString::new("population").unwrap();
        let mut optimized = OiOptimizationResult::EMPTY;
        let mut out = OiSearchResult::EMPTY;

        unsafe {
            oi_optimize_context(
                engine,
                session.as_ptr(),
                input.messages.as_ptr(),
                input.messages.len(),
                ptr::null(),
                &mut optimized,
            );
            oi_optimization_result_free(&mut optimized);

            assert_eq!(oi_search(engine, query.as_ptr(), session.as_ptr(), 10, &mut out), OiStatus::Ok);
            assert_eq!(out.total, 1);
            assert_eq!(text(out.search_type), "keyword");
            assert_eq!(out.hit_count, 1);
            let hits = std::slice::from_raw_parts(out.hits, out.hit_count);
            assert_eq!(text(hits[0].session_id), "s1");
            assert_eq!(hits[0].position, 3);
            oi_search_result_free(&mut out);

            assert_eq!(oi_search(engine, query.as_ptr(), ptr::null(), -5, &mut out), OiStatus::Ok);
            assert_eq!(out.total, 1);
            assert_eq!(out.hit_count, 0);
            assert!(out.hits.is_null());
            oi_search_result_free(&mut out);

            let unknown = CString::new("nope").unwrap();
            assert_eq!(oi_search(engine, query.as_ptr(), unknown.as_ptr(), 10, &mut out), OiStatus::Ok);
            assert_eq!(out.total, 0);
            assert_eq!(text(out.search_type), "none");
            oi_search_result_free(&mut out);

            assert_eq!(
                oi_search(engine, ptr::null(), session.as_ptr(), 10, &mut out),
                OiStatus::InvalidArgument
            );
            oi_engine_free(engine);
        }
    }

    #[test]
    fn test_generate_title() {
        let engine = oi_engine_new();
        let input = paris();
        let blank = messages(&[("user", "")]);

        unsafe {
            let title = oi_generate_title(engine, input.messages.as_ptr(), input.messages.len());
            assert_eq!(text(title), "What Is Paris");
            oi_string_free(title);

            let title = oi_generate_title(engine, blank.messages.as_ptr(), blank.messages.len());
            assert_eq!(text(title), "New Conversation");
            oi_string_free(title);

            let title = oi_generate_title(engine, ptr::null(), 0);
            assert_eq!(text(title), "New Conversation");
            oi_string_free(title);

            assert!(oi_generate_title(ptr::null(), ptr::null(), 0).is_null());
            oi_string_free(ptr::null_mut());
            oi_engine_free(engine);
        }
    }

    #[test]
    fn test_engine_from_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "[optimizer]\nmax_messages = 2\n").unwrap();
        let config_path = CString::new(path.to_str().unwrap()).unwrap();
        let input = paris();
        let session = CString::new("s1").unwrap();
        let mut out = OiOptimizationResult::EMPTY;

        unsafe {
            let engine = oi_engine_new_with_config(config_path.as_ptr());
            assert!(!engine.is_null());

            let status = oi_optimize_context(
                engine,
                session.as_ptr(),
                input.messages.as_ptr(),
                input.messages.len(),
                ptr::null(),
                &mut out,
            );
            assert_eq!(status, OiStatus::Ok);
            assert_eq!(out.original_count, 4);
            assert_eq!(out.optimized_count, 3);
            assert!((out.compression_ratio - 0.75).abs() < f32::EPSILON);
            oi_optimization_result_free(&mut out);
            oi_engine_free(engine);
        }

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[optimizer]\nmax_messages = \"many\"\n").unwrap();
        let bad = CString::new(bad.to_str().unwrap()).unwrap();
        let missing = CString::new(dir.path().join("missing.toml").to_str().unwrap()).unwrap();
        unsafe {
            assert!(oi_engine_new_with_config(bad.as_ptr()).is_null());
            assert!(oi_engine_new_with_config(missing.as_ptr()).is_null());
        }
    }

    #[test]
    fn test_engine_free_null_is_noop() {
        unsafe {
            oi_engine_free(ptr::null_mut());
            oi_optimization_result_free(ptr::null_mut());
            oi_search_result_free(ptr::null_mut());
            assert!(oi_engine_new_with_config(ptr::null()).is_null());
        }
    }
}
