//! Execution-context impersonation for native calls
//!
//! The host's native call gate is keyed by thread-local state of its own
//! privileged thread. A script worker that needs to call into it temporarily
//! installs the privileged thread's context handle on itself, runs the call
//! and puts its own handle back. The swap is only reachable through
//! [`ContextSwapGuard`], which restores the original handle on every exit
//! path including unwinding.

use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque, pointer-sized execution-context handle owned by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ContextHandle(usize);

impl ContextHandle {
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> usize {
        self.0
    }
}

/// Reads the calling thread's current context handle
pub type GetContextFn = fn() -> ContextHandle;
/// Installs a context handle on the calling thread
pub type SetContextFn = fn(ContextHandle);
/// Numeric identity of the calling thread, comparable with `privileged_thread_id`
pub type ThreadIdFn = fn() -> u64;

/// Values supplied once by the host at startup
#[derive(Debug, Clone, Copy)]
pub struct HostBindings {
    pub privileged_thread_id: u64,
    pub privileged_context: ContextHandle,
    pub get_context: GetContextFn,
    pub set_context: SetContextFn,
    pub current_thread_id: ThreadIdFn,
}

impl HostBindings {
    /// Bindings for an explicitly identified privileged thread, using this
    /// crate's thread numbering for identity checks
    pub fn new(
        privileged_thread_id: u64,
        privileged_context: ContextHandle,
        get_context: GetContextFn,
        set_context: SetContextFn,
    ) -> Self {
        Self {
            privileged_thread_id,
            privileged_context,
            get_context,
            set_context,
            current_thread_id,
        }
    }

    /// Capture the calling thread as the privileged thread
    pub fn for_current_thread(get_context: GetContextFn, set_context: SetContextFn) -> Self {
        Self::new(current_thread_id(), get_context(), get_context, set_context)
    }

    /// Use a host-provided thread identity (e.g. the OS thread id) instead of
    /// this crate's numbering
    pub fn with_thread_id_source(mut self, current_thread_id: ThreadIdFn) -> Self {
        self.current_thread_id = current_thread_id;
        self
    }

    pub fn is_privileged_thread(&self) -> bool {
        (self.current_thread_id)() == self.privileged_thread_id
    }
}

/// Process-unique numeric id of the calling thread, assigned on first use
pub fn current_thread_id() -> u64 {
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static THREAD_ID: u64 = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    }
    THREAD_ID.with(|id| *id)
}

/// Scoped impersonation of the privileged thread's context
pub(crate) struct ContextSwapGuard {
    original: ContextHandle,
    set_context: SetContextFn,
}

impl ContextSwapGuard {
    /// Save the calling thread's handle and install the privileged one
    pub(crate) fn install(bindings: &HostBindings) -> Self {
        let original = (bindings.get_context)();
        (bindings.set_context)(bindings.privileged_context);
        Self {
            original,
            set_context: bindings.set_context,
        }
    }
}

impl Drop for ContextSwapGuard {
    fn drop(&mut self) {
        (self.set_context)(self.original);
    }
}
