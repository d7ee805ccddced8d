//! Last-status slot for callers that poll for errors after the fact
//!
//! Thread-local. Each [`Engine`](crate::Engine) boundary call overwrites it,
//! so it reflects the most recent call made on the current thread and nothing
//! else. New code should use the returned `Result`s instead.

use std::cell::RefCell;

use crate::encoder::StatusCode;
use crate::resolver::ResolveError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LastStatus {
    Resolve(Option<ResolveError>),
    Encode(StatusCode),
}

thread_local! {
    static LAST_STATUS: RefCell<Option<LastStatus>> = const { RefCell::new(None) };
}

pub(crate) fn record(status: LastStatus) {
    LAST_STATUS.with(|slot| *slot.borrow_mut() = Some(status));
}

/// Status left by the last boundary call on this thread
pub fn last_status() -> Option<LastStatus> {
    LAST_STATUS.with(|slot| slot.borrow().clone())
}

pub fn last_resolve_error() -> Option<ResolveError> {
    match last_status() {
        Some(LastStatus::Resolve(err)) => err,
        _ => None,
    }
}

pub fn clear() {
    LAST_STATUS.with(|slot| *slot.borrow_mut() = None);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionHandle;
    use std::thread;

    #[test]
    fn test_slot_is_per_thread() {
        record(LastStatus::Encode(StatusCode::PathUnavailable));
        let other = thread::spawn(last_status).join().unwrap();
        assert_eq!(other, None);
        assert_eq!(last_status(), Some(LastStatus::Encode(StatusCode::PathUnavailable)));
        clear();
        assert_eq!(last_status(), None);
    }

    #[test]
    fn test_resolve_error_accessor() {
        record(LastStatus::Resolve(Some(ResolveError::SourceNotOpen(SessionHandle(3)))));
        assert_eq!(last_resolve_error(), Some(ResolveError::SourceNotOpen(SessionHandle(3))));
        record(LastStatus::Encode(StatusCode::Success));
        assert_eq!(last_resolve_error(), None);
    }
}
