#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(clippy::missing_safety_doc)]

use std::collections::{HashMap, HashSet};
use std::ffi::{c_char, c_void, CStr, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hdebug_contracts::HDEBUG_ABI_VERSION;
use hdebug_core::module_entry;
use hdebug_core::registry;
use hdebug_core::{
    AbiError, ContextId, DebugContext, DebugError, Diagnostic, Handle, HandleAbi,
    InvalidHandlePolicy, OpId,
};
use once_cell::sync::OnceCell;

pub type hdebug_h = usize;

pub const HDEBUG_H_NULL: hdebug_h = 0;

// Error codes reported by hdebug_last_error (0 = no error).
pub const HDEBUG_ERR_CONFIGURATION: u32 = 1;
pub const HDEBUG_ERR_INVALID_HANDLE: u32 = 100;
pub const HDEBUG_ERR_USE_AFTER_CLOSE: u32 = 101;
pub const HDEBUG_ERR_DOUBLE_CLOSE: u32 = 102;
pub const HDEBUG_ERR_TABLE_FULL: u32 = 103;
pub const HDEBUG_ERR_BAD_CTX: u32 = 200;
pub const HDEBUG_ERR_CALL: u32 = 300;
pub const HDEBUG_ERR_INTERNAL: u32 = 900;

pub const HDEBUG_POLICY_ABORT: u32 = 0;
pub const HDEBUG_POLICY_REPORT: u32 = 1;

/// Operation table shared by universal and debug contexts.
///
/// A universal context is identified by its address. Handle-returning entries
/// signal failure with `HDEBUG_H_NULL`; `is` signals it with -1.
#[repr(C)]
pub struct hdebug_ctx {
    pub name: *const c_char,
    pub abi_version: u32,
    pub private: *mut c_void,
    pub dup: Option<unsafe extern "C" fn(*mut hdebug_ctx, hdebug_h) -> hdebug_h>,
    pub close: Option<unsafe extern "C" fn(*mut hdebug_ctx, hdebug_h)>,
    pub long_from_i64: Option<unsafe extern "C" fn(*mut hdebug_ctx, i64) -> hdebug_h>,
    pub long_as_i64: Option<unsafe extern "C" fn(*mut hdebug_ctx, hdebug_h) -> i64>,
    pub is: Option<unsafe extern "C" fn(*mut hdebug_ctx, hdebug_h, hdebug_h) -> i32>,
    pub invoke:
        Option<unsafe extern "C" fn(*mut hdebug_ctx, u32, *const hdebug_h, usize) -> hdebug_h>,
}

// -------------------------
// Universal side: a C table seen through HandleAbi
// -------------------------

struct ForeignUniversal {
    ctx: *mut hdebug_ctx,
    name: String,
}

// The C universal context is process-lifetime and is driven by one
// interpreter at a time; callers that fan in from several threads serialize
// on their side.
unsafe impl Send for ForeignUniversal {}
unsafe impl Sync for ForeignUniversal {}

impl ForeignUniversal {
    unsafe fn new(ctx: *mut hdebug_ctx) -> Option<ForeignUniversal> {
        if ctx.is_null() || (*ctx).abi_version != HDEBUG_ABI_VERSION {
            return None;
        }
        let name = if (*ctx).name.is_null() {
            "universal".to_string()
        } else {
            CStr::from_ptr((*ctx).name).to_string_lossy().into_owned()
        };
        Some(ForeignUniversal { ctx, name })
    }

    fn missing(&self, slot: &str) -> AbiError {
        AbiError::call(
            HDEBUG_ERR_CALL,
            format!("universal context {} has no {slot}", self.name),
        )
    }

    fn handle_or_err(&self, h: hdebug_h, what: &str) -> Result<Handle, AbiError> {
        if h == HDEBUG_H_NULL {
            Err(AbiError::call(HDEBUG_ERR_CALL, format!("{what} failed")))
        } else {
            Ok(Handle(h))
        }
    }

    fn table(&self) -> &hdebug_ctx {
        unsafe { &*self.ctx }
    }
}

impl HandleAbi for ForeignUniversal {
    fn ctx_id(&self) -> ContextId {
        ContextId::from_addr(self.ctx as usize)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn dup(&self, h: Handle) -> Result<Handle, AbiError> {
        let f = self.table().dup.ok_or_else(|| self.missing("dup"))?;
        self.handle_or_err(unsafe { f(self.ctx, h.raw()) }, "dup")
    }

    fn close(&self, h: Handle) -> Result<(), AbiError> {
        let f = self.table().close.ok_or_else(|| self.missing("close"))?;
        unsafe { f(self.ctx, h.raw()) };
        Ok(())
    }

    fn from_i64(&self, value: i64) -> Result<Handle, AbiError> {
        let f = self
            .table()
            .long_from_i64
            .ok_or_else(|| self.missing("long_from_i64"))?;
        self.handle_or_err(unsafe { f(self.ctx, value) }, "long_from_i64")
    }

    fn as_i64(&self, h: Handle) -> Result<i64, AbiError> {
        let f = self
            .table()
            .long_as_i64
            .ok_or_else(|| self.missing("long_as_i64"))?;
        Ok(unsafe { f(self.ctx, h.raw()) })
    }

    fn is(&self, a: Handle, b: Handle) -> Result<bool, AbiError> {
        let f = self.table().is.ok_or_else(|| self.missing("is"))?;
        match unsafe { f(self.ctx, a.raw(), b.raw()) } {
            r if r < 0 => Err(AbiError::call(HDEBUG_ERR_CALL, "is failed")),
            r => Ok(r != 0),
        }
    }

    fn invoke(&self, op: OpId, args: &[Handle]) -> Result<Handle, AbiError> {
        let f = self.table().invoke.ok_or_else(|| self.missing("invoke"))?;
        // Handle is repr(transparent) over usize.
        let argv = args.as_ptr() as *const hdebug_h;
        self.handle_or_err(unsafe { f(self.ctx, op.0, argv, args.len()) }, "invoke")
    }
}

// -------------------------
// Debug side: state behind a debug hdebug_ctx
// -------------------------

struct NativeState {
    dctx: Arc<DebugContext>,
    name: CString,
    policy: AtomicU8,
    last_error: AtomicU32,
}

impl NativeState {
    fn policy(&self) -> InvalidHandlePolicy {
        match self.policy.load(Ordering::Relaxed) {
            0 => InvalidHandlePolicy::Abort,
            _ => InvalidHandlePolicy::Report,
        }
    }

    fn fail(&self, err: &AbiError) {
        let code = match err {
            AbiError::Handle(e) => debug_error_code(e),
            AbiError::Call { .. } => HDEBUG_ERR_CALL,
        };
        self.last_error.store(code, Ordering::Relaxed);
        if let AbiError::Handle(e) = err {
            if self.policy() == InvalidHandlePolicy::Abort {
                fatal(&Diagnostic::from_error(e, self.dctx.id()));
            }
        }
    }
}

fn debug_error_code(e: &DebugError) -> u32 {
    match e {
        DebugError::Configuration { .. } => HDEBUG_ERR_CONFIGURATION,
        DebugError::InvalidHandle { .. } => HDEBUG_ERR_INVALID_HANDLE,
        DebugError::UseAfterClose { .. } => HDEBUG_ERR_USE_AFTER_CLOSE,
        DebugError::DoubleClose { .. } => HDEBUG_ERR_DOUBLE_CLOSE,
        DebugError::TableFull { .. } => HDEBUG_ERR_TABLE_FULL,
    }
}

fn policy_byte(p: InvalidHandlePolicy) -> u8 {
    match p {
        InvalidHandlePolicy::Abort => HDEBUG_POLICY_ABORT as u8,
        InvalidHandlePolicy::Report => HDEBUG_POLICY_REPORT as u8,
    }
}

fn fatal(diag: &Diagnostic) -> ! {
    eprintln!("hdebug: fatal: {diag}");
    std::process::abort()
}

static LAST_GLOBAL_ERROR: AtomicU32 = AtomicU32::new(0);

/// Debug tables handed out by `hdebug_get_ctx`, keyed by debug context id.
static NATIVE_CTXS: OnceCell<Mutex<HashMap<ContextId, usize>>> = OnceCell::new();

fn native_ctxs() -> &'static Mutex<HashMap<ContextId, usize>> {
    NATIVE_CTXS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Addresses of every table filled by `fill_debug_table`. A universal table
/// has the same shape and ABI version, so only membership here makes
/// `private` safe to read as `NativeState`.
static DEBUG_TABLES: OnceCell<Mutex<HashSet<usize>>> = OnceCell::new();

fn debug_tables() -> &'static Mutex<HashSet<usize>> {
    DEBUG_TABLES.get_or_init(|| Mutex::new(HashSet::new()))
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn global_fail(err: &DebugError) {
    LAST_GLOBAL_ERROR.store(debug_error_code(err), Ordering::Relaxed);
    if registry::global().config().on_invalid == InvalidHandlePolicy::Abort {
        let mut diag = Diagnostic::new(err.code(), err.to_string());
        diag.handle = err.handle();
        fatal(&diag);
    }
}

unsafe fn state_of<'a>(ctx: *mut hdebug_ctx) -> Option<&'a NativeState> {
    if ctx.is_null() || !lock(debug_tables()).contains(&(ctx as usize)) {
        return None;
    }
    if (*ctx).abi_version != HDEBUG_ABI_VERSION {
        return None;
    }
    let st = (*ctx).private as *const NativeState;
    if st.is_null() {
        return None;
    }
    Some(&*st)
}

/// Runs `f` against the debug state behind `ctx`, turning errors and panics
/// into `fail` plus a recorded error code.
unsafe fn with_state<T>(
    ctx: *mut hdebug_ctx,
    fail: T,
    f: impl FnOnce(&NativeState) -> Result<T, AbiError>,
) -> T {
    let Some(st) = state_of(ctx) else {
        LAST_GLOBAL_ERROR.store(HDEBUG_ERR_BAD_CTX, Ordering::Relaxed);
        return fail;
    };
    match catch_unwind(AssertUnwindSafe(|| f(st))) {
        Ok(Ok(v)) => v,
        Ok(Err(e)) => {
            st.fail(&e);
            fail
        }
        Err(_) => {
            st.last_error.store(HDEBUG_ERR_INTERNAL, Ordering::Relaxed);
            fail
        }
    }
}

fn fill_debug_table(dst: &mut hdebug_ctx, dctx: Arc<DebugContext>) {
    let name = CString::new(dctx.name().replace('\0', "?")).unwrap_or_default();
    let policy = policy_byte(dctx.config().on_invalid);
    let st = Box::new(NativeState {
        dctx,
        name,
        policy: AtomicU8::new(policy),
        last_error: AtomicU32::new(0),
    });
    dst.name = st.name.as_ptr();
    dst.abi_version = HDEBUG_ABI_VERSION;
    dst.dup = Some(debug_dup);
    dst.close = Some(debug_close);
    dst.long_from_i64 = Some(debug_long_from_i64);
    dst.long_as_i64 = Some(debug_long_as_i64);
    dst.is = Some(debug_is);
    dst.invoke = Some(debug_invoke);
    // Debug contexts live for the rest of the process.
    dst.private = Box::into_raw(st) as *mut c_void;
    lock(debug_tables()).insert(dst as *mut hdebug_ctx as usize);
}

/// Returns the C table for `dctx`, allocating it on first request.
fn native_table_for(dctx: Arc<DebugContext>) -> *mut hdebug_ctx {
    let mut ctxs = lock(native_ctxs());
    if let Some(&ptr) = ctxs.get(&dctx.id()) {
        return ptr as *mut hdebug_ctx;
    }
    let id = dctx.id();
    let mut table = Box::new(empty_table());
    fill_debug_table(&mut table, dctx);
    let ptr = Box::into_raw(table);
    ctxs.insert(id, ptr as usize);
    ptr
}

fn empty_table() -> hdebug_ctx {
    hdebug_ctx {
        name: std::ptr::null(),
        abi_version: 0,
        private: std::ptr::null_mut(),
        dup: None,
        close: None,
        long_from_i64: None,
        long_as_i64: None,
        is: None,
        invoke: None,
    }
}

// -------------------------
// Debug trampolines
// -------------------------

unsafe extern "C" fn debug_dup(ctx: *mut hdebug_ctx, h: hdebug_h) -> hdebug_h {
    with_state(ctx, HDEBUG_H_NULL, |st| Ok(st.dctx.dup(Handle(h))?.raw()))
}

unsafe extern "C" fn debug_close(ctx: *mut hdebug_ctx, h: hdebug_h) {
    with_state(ctx, (), |st| st.dctx.close(Handle(h)))
}

unsafe extern "C" fn debug_long_from_i64(ctx: *mut hdebug_ctx, value: i64) -> hdebug_h {
    with_state(ctx, HDEBUG_H_NULL, |st| Ok(st.dctx.from_i64(value)?.raw()))
}

unsafe extern "C" fn debug_long_as_i64(ctx: *mut hdebug_ctx, h: hdebug_h) -> i64 {
    with_state(ctx, -1, |st| st.dctx.as_i64(Handle(h)))
}

unsafe extern "C" fn debug_is(ctx: *mut hdebug_ctx, a: hdebug_h, b: hdebug_h) -> i32 {
    with_state(ctx, -1, |st| Ok(st.dctx.is(Handle(a), Handle(b))? as i32))
}

unsafe extern "C" fn debug_invoke(
    ctx: *mut hdebug_ctx,
    op: u32,
    argv: *const hdebug_h,
    argc: usize,
) -> hdebug_h {
    with_state(ctx, HDEBUG_H_NULL, |st| {
        let args: Vec<Handle> = if argc == 0 || argv.is_null() {
            Vec::new()
        } else {
            std::slice::from_raw_parts(argv, argc)
                .iter()
                .map(|&h| Handle(h))
                .collect()
        };
        Ok(st.dctx.invoke(OpId(op), &args)?.raw())
    })
}

// -------------------------
// Public entry points
// -------------------------

/// Returns the unique debug context wrapping `uctx`, binding it on first use.
#[no_mangle]
pub unsafe extern "C" fn hdebug_get_ctx(uctx: *mut hdebug_ctx) -> *mut hdebug_ctx {
    bind_native(uctx, hdebug_core::bind)
}

/// Fills a caller-allocated debug table wrapping `uctx`. The result is not
/// registered until passed to `hdebug_set_ctx`. Returns 0 on success.
#[no_mangle]
pub unsafe extern "C" fn hdebug_ctx_init(dctx: *mut hdebug_ctx, uctx: *mut hdebug_ctx) -> i32 {
    catch_unwind(AssertUnwindSafe(|| {
        if dctx.is_null() {
            LAST_GLOBAL_ERROR.store(HDEBUG_ERR_BAD_CTX, Ordering::Relaxed);
            return -1;
        }
        let Some(fu) = ForeignUniversal::new(uctx) else {
            LAST_GLOBAL_ERROR.store(HDEBUG_ERR_BAD_CTX, Ordering::Relaxed);
            return -1;
        };
        let d = hdebug_core::ctx_init(registry::global(), Arc::new(fu));
        dctx.write(empty_table());
        fill_debug_table(&mut *dctx, Arc::new(d));
        0
    }))
    .unwrap_or(-1)
}

/// Registers a debug table built by `hdebug_ctx_init` as the debug context of
/// its universal context. Returns 0 on success.
#[no_mangle]
pub unsafe extern "C" fn hdebug_set_ctx(dctx: *mut hdebug_ctx) -> i32 {
    catch_unwind(AssertUnwindSafe(|| {
        let Some(st) = state_of(dctx) else {
            LAST_GLOBAL_ERROR.store(HDEBUG_ERR_BAD_CTX, Ordering::Relaxed);
            return -1;
        };
        match hdebug_core::set_ctx(st.dctx.clone()) {
            Ok(d) => {
                lock(native_ctxs()).insert(d.id(), dctx as usize);
                0
            }
            Err(e) => {
                global_fail(&e);
                -1
            }
        }
    }))
    .unwrap_or(-1)
}

#[no_mangle]
pub unsafe extern "C" fn hdebug_open_handle(dctx: *mut hdebug_ctx, uh: hdebug_h) -> hdebug_h {
    with_state(dctx, HDEBUG_H_NULL, |st| {
        Ok(st.dctx.open_handle(Handle(uh))?.raw())
    })
}

#[no_mangle]
pub unsafe extern "C" fn hdebug_unwrap_handle(dctx: *mut hdebug_ctx, dh: hdebug_h) -> hdebug_h {
    with_state(dctx, HDEBUG_H_NULL, |st| {
        Ok(st.dctx.unwrap_handle(Handle(dh))?.raw())
    })
}

#[no_mangle]
pub unsafe extern "C" fn hdebug_close_handle(dctx: *mut hdebug_ctx, dh: hdebug_h) {
    with_state(dctx, (), |st| {
        st.dctx.close_handle(Handle(dh))?;
        Ok(())
    })
}

/// Starts a new leak-detection generation and returns it.
#[no_mangle]
pub unsafe extern "C" fn hdebug_new_generation(dctx: *mut hdebug_ctx) -> u64 {
    with_state(dctx, 0, |st| Ok(st.dctx.new_generation()))
}

/// Number of handles opened in generation `since` or later that are still open.
#[no_mangle]
pub unsafe extern "C" fn hdebug_open_handle_count(dctx: *mut hdebug_ctx, since: u64) -> usize {
    with_state(dctx, 0, |st| Ok(st.dctx.open_handles(since).len()))
}

/// Last error recorded on `dctx`, or the last process-wide error (binding,
/// bad context pointer) when `dctx` is null. Reading clears it.
#[no_mangle]
pub unsafe extern "C" fn hdebug_last_error(dctx: *mut hdebug_ctx) -> u32 {
    if dctx.is_null() {
        return LAST_GLOBAL_ERROR.swap(0, Ordering::Relaxed);
    }
    match state_of(dctx) {
        Some(st) => st.last_error.swap(0, Ordering::Relaxed),
        None => HDEBUG_ERR_BAD_CTX,
    }
}

/// Switches the invalid-handle policy of `dctx`. Returns 0 on success.
#[no_mangle]
pub unsafe extern "C" fn hdebug_set_on_invalid(dctx: *mut hdebug_ctx, policy: u32) -> i32 {
    let Some(st) = state_of(dctx) else {
        return -1;
    };
    match policy {
        HDEBUG_POLICY_ABORT | HDEBUG_POLICY_REPORT => {
            st.policy.store(policy as u8, Ordering::Relaxed);
            0
        }
        _ => -1,
    }
}

/// Module init for the debug module, called directly by a host that links
/// it statically.
#[no_mangle]
pub unsafe extern "C" fn HDebugInit__debug(uctx: *mut hdebug_ctx) -> *mut hdebug_ctx {
    bind_native(uctx, module_entry::initialize)
}

unsafe fn bind_native(uctx: *mut hdebug_ctx, bind: module_entry::ModuleInit) -> *mut hdebug_ctx {
    catch_unwind(AssertUnwindSafe(|| {
        let Some(fu) = ForeignUniversal::new(uctx) else {
            LAST_GLOBAL_ERROR.store(HDEBUG_ERR_BAD_CTX, Ordering::Relaxed);
            return std::ptr::null_mut();
        };
        match bind(Arc::new(fu)) {
            Ok(d) => native_table_for(d),
            Err(e) => {
                global_fail(&e);
                std::ptr::null_mut()
            }
        }
    }))
    .unwrap_or(std::ptr::null_mut())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdebug_core::universal::op;
    use hdebug_core::MemoryUniversal;

    unsafe fn mem(ctx: *mut hdebug_ctx) -> &'static MemoryUniversal {
        &*((*ctx).private as *const MemoryUniversal)
    }

    unsafe extern "C" fn u_dup(ctx: *mut hdebug_ctx, h: hdebug_h) -> hdebug_h {
        mem(ctx).dup(Handle(h)).map(|h| h.raw()).unwrap_or(0)
    }

    unsafe extern "C" fn u_close(ctx: *mut hdebug_ctx, h: hdebug_h) {
        let _ = mem(ctx).close(Handle(h));
    }

    unsafe extern "C" fn u_from_i64(ctx: *mut hdebug_ctx, v: i64) -> hdebug_h {
        mem(ctx).from_i64(v).map(|h| h.raw()).unwrap_or(0)
    }

    unsafe extern "C" fn u_as_i64(ctx: *mut hdebug_ctx, h: hdebug_h) -> i64 {
        mem(ctx).as_i64(Handle(h)).unwrap_or(-1)
    }

    unsafe extern "C" fn u_is(ctx: *mut hdebug_ctx, a: hdebug_h, b: hdebug_h) -> i32 {
        mem(ctx).is(Handle(a), Handle(b)).map(|r| r as i32).unwrap_or(-1)
    }

    unsafe extern "C" fn u_invoke(
        ctx: *mut hdebug_ctx,
        op: u32,
        argv: *const hdebug_h,
        argc: usize,
    ) -> hdebug_h {
        let args: Vec<Handle> = std::slice::from_raw_parts(argv, argc)
            .iter()
            .map(|&h| Handle(h))
            .collect();
        mem(ctx)
            .invoke(OpId(op), &args)
            .map(|h| h.raw())
            .unwrap_or(0)
    }

    fn universal_table() -> *mut hdebug_ctx {
        let mem = Box::into_raw(Box::new(MemoryUniversal::new("c-universal")));
        Box::into_raw(Box::new(hdebug_ctx {
            name: b"c-universal\0".as_ptr() as *const c_char,
            abi_version: HDEBUG_ABI_VERSION,
            private: mem as *mut c_void,
            dup: Some(u_dup),
            close: Some(u_close),
            long_from_i64: Some(u_from_i64),
            long_as_i64: Some(u_as_i64),
            is: Some(u_is),
            invoke: Some(u_invoke),
        }))
    }

    /// A debug table built with hdebug_ctx_init, reporting instead of aborting.
    fn debug_table(uctx: *mut hdebug_ctx) -> *mut hdebug_ctx {
        unsafe {
            let dctx = Box::into_raw(Box::new(empty_table()));
            assert_eq!(hdebug_ctx_init(dctx, uctx), 0);
            assert_eq!(hdebug_set_on_invalid(dctx, HDEBUG_POLICY_REPORT), 0);
            dctx
        }
    }

    #[test]
    fn open_unwrap_close_through_c_surface() {
        let uctx = universal_table();
        let dctx = debug_table(uctx);
        unsafe {
            let dh = hdebug_open_handle(dctx, 0x1234);
            assert_ne!(dh, HDEBUG_H_NULL);
            assert_ne!(dh, 0x1234);
            assert_eq!(hdebug_unwrap_handle(dctx, dh), 0x1234);
            assert_eq!(hdebug_last_error(dctx), 0);

            hdebug_close_handle(dctx, dh);
            assert_eq!(hdebug_last_error(dctx), 0);
            assert_eq!(hdebug_unwrap_handle(dctx, dh), HDEBUG_H_NULL);
            assert_eq!(hdebug_last_error(dctx), HDEBUG_ERR_USE_AFTER_CLOSE);
            hdebug_close_handle(dctx, dh);
            assert_eq!(hdebug_last_error(dctx), HDEBUG_ERR_DOUBLE_CLOSE);
            assert_eq!(hdebug_unwrap_handle(dctx, 0x7777), HDEBUG_H_NULL);
            assert_eq!(hdebug_last_error(dctx), HDEBUG_ERR_INVALID_HANDLE);
            // Reading clears.
            assert_eq!(hdebug_last_error(dctx), 0);
        }
    }

    #[test]
    fn debug_table_forwards_operations() {
        let uctx = universal_table();
        let dctx = debug_table(uctx);
        unsafe {
            let t = &*dctx;
            let a = (t.long_from_i64.unwrap())(dctx, 40);
            let b = (t.long_from_i64.unwrap())(dctx, 2);
            let argv = [a, b];
            let sum = (t.invoke.unwrap())(dctx, op::ADD.0, argv.as_ptr(), argv.len());
            assert_eq!((t.long_as_i64.unwrap())(dctx, sum), 42);

            let a2 = (t.dup.unwrap())(dctx, a);
            assert_eq!((t.is.unwrap())(dctx, a, a2), 1);

            let gen = hdebug_new_generation(dctx);
            let leaked = (t.long_from_i64.unwrap())(dctx, 7);
            assert_eq!(hdebug_open_handle_count(dctx, gen), 1);
            for h in [a, a2, b, sum, leaked] {
                (t.close.unwrap())(dctx, h);
            }
            assert_eq!(hdebug_open_handle_count(dctx, 0), 0);
            assert_eq!(mem(uctx).live_objects(), 0);

            // Closed handle: nothing reaches the universal context.
            let calls = mem(uctx).calls();
            assert_eq!((t.long_as_i64.unwrap())(dctx, a), -1);
            assert_eq!(hdebug_last_error(dctx), HDEBUG_ERR_USE_AFTER_CLOSE);
            assert_eq!(mem(uctx).calls(), calls);
        }
    }

    #[test]
    fn bad_pointers_are_rejected() {
        unsafe {
            assert!(hdebug_get_ctx(std::ptr::null_mut()).is_null());
            assert_eq!(hdebug_last_error(std::ptr::null_mut()), HDEBUG_ERR_BAD_CTX);
            let mut bogus = empty_table();
            assert_eq!(hdebug_unwrap_handle(&mut bogus, 1), HDEBUG_H_NULL);
            assert_eq!(hdebug_last_error(&mut bogus), HDEBUG_ERR_BAD_CTX);
            assert_eq!(hdebug_set_on_invalid(&mut bogus, HDEBUG_POLICY_REPORT), -1);
        }
    }

    #[test]
    fn universal_table_is_not_a_debug_context() {
        let uctx = universal_table();
        unsafe {
            assert_eq!((*uctx).abi_version, HDEBUG_ABI_VERSION);
            assert!(state_of(uctx).is_none());
            assert_eq!(hdebug_last_error(uctx), HDEBUG_ERR_BAD_CTX);
            assert_eq!(hdebug_open_handle(uctx, 0x10), HDEBUG_H_NULL);
            assert_eq!(hdebug_unwrap_handle(uctx, 0x10), HDEBUG_H_NULL);
            hdebug_close_handle(uctx, 0x10);
            assert_eq!(hdebug_new_generation(uctx), 0);
            assert_eq!(hdebug_set_on_invalid(uctx, HDEBUG_POLICY_REPORT), -1);
            assert_eq!(hdebug_set_ctx(uctx), -1);
            // The host's object store was never touched.
            assert_eq!(mem(uctx).calls(), 0);

            let dctx = debug_table(uctx);
            assert!(state_of(dctx).is_some());
        }
    }

    // Only test binding through the process-wide registry.
    #[test]
    fn get_ctx_and_module_init_share_one_binding() {
        let uctx = universal_table();
        unsafe {
            let d1 = hdebug_get_ctx(uctx);
            assert!(!d1.is_null());
            assert_eq!(hdebug_get_ctx(uctx), d1);
            assert_eq!(HDebugInit__debug(uctx), d1);
            assert_eq!(hdebug_set_ctx(d1), 0);

            let name = CStr::from_ptr((*d1).name).to_str().unwrap();
            assert_eq!(name, "c-universal (debug)");
        }
    }
}
