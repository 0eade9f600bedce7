//! Stand-in for the native side of the host
//!
//! A real host keys its native call gate on thread-local state of its main
//! thread. This module models that with a per-thread context handle: the
//! frame thread carries [`FRAME_CONTEXT`] and native entry points refuse to
//! run anywhere the handle differs.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use turnstile_host::{ContextHandle, HostBindings};

/// Context handle carried by the frame thread
pub const FRAME_CONTEXT: ContextHandle = ContextHandle::from_raw(0x7475_726e);

static FRAME: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static CONTEXT: Cell<ContextHandle> = const { Cell::new(ContextHandle::from_raw(0)) };
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NativeCallError {
    #[error("native call issued outside the frame thread's context")]
    WrongContext,
}

pub fn get_context() -> ContextHandle {
    CONTEXT.with(Cell::get)
}

pub fn set_context(handle: ContextHandle) {
    CONTEXT.with(|context| context.set(handle));
}

/// Mark the calling thread as the frame thread and describe it to the scheduler
pub(crate) fn become_frame_thread() -> HostBindings {
    set_context(FRAME_CONTEXT);
    HostBindings::for_current_thread(get_context, set_context)
}

pub(crate) fn advance_frame() -> u64 {
    FRAME.fetch_add(1, Ordering::SeqCst) + 1
}

/// Number of the frame currently being processed. Native: only callable
/// with the frame thread's context installed.
pub fn frame_number() -> Result<u64, NativeCallError> {
    if get_context() != FRAME_CONTEXT {
        return Err(NativeCallError::WrongContext);
    }
    Ok(FRAME.load(Ordering::SeqCst))
}
