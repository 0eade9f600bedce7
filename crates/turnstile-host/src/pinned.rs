use parking_lot::Mutex;
use std::ffi::{CString, NulError, c_char};

/// NUL-terminated string kept alive until the end of the current domain tick
#[derive(Debug, Clone, Copy)]
pub struct PinnedStr {
    ptr: *const c_char,
    len: usize,
}

// SAFETY: the pointer refers to an immutable heap buffer owned by the
// domain's pin arena; moving the address between threads does not create
// aliasing, and dereferencing it is already unsafe for the caller.
unsafe impl Send for PinnedStr {}
unsafe impl Sync for PinnedStr {}

impl PinnedStr {
    /// Raw pointer for native calls. Dangling once the tick that pinned it ends.
    pub fn as_ptr(&self) -> *const c_char {
        self.ptr
    }

    /// Length in bytes, excluding the terminator
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Arena of marshaled strings, released in bulk once per tick
#[derive(Debug, Default)]
pub(crate) struct PinnedStrings {
    strings: Mutex<Vec<CString>>,
}

impl PinnedStrings {
    pub(crate) fn pin(&self, value: &str) -> Result<PinnedStr, NulError> {
        let owned = CString::new(value)?;
        // The CString's buffer is boxed, so pushing it never moves the bytes
        let pinned = PinnedStr {
            ptr: owned.as_ptr(),
            len: value.len(),
        };
        self.strings.lock().push(owned);
        Ok(pinned)
    }

    pub(crate) fn release_all(&self) -> usize {
        let mut strings = self.strings.lock();
        let count = strings.len();
        strings.clear();
        count
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.strings.lock().len()
    }
}
