//! Per-connection session state.

use crate::meta::inode::{InodeNo, ROOT_INO};
use std::sync::{Mutex, PoisonError};

/// The working directory of one client session.
///
/// Each connection owns its session and passes it to every namespace call.
/// The slot is the last lock in the namespace lock order.
#[derive(Debug)]
pub struct Session {
    id: u64,
    cwd: Mutex<InodeNo>,
}

impl Session {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            cwd: Mutex::new(ROOT_INO),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cwd(&self) -> InodeNo {
        *self.cwd.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_cwd(&self, ino: InodeNo) {
        *self.cwd.lock().unwrap_or_else(PoisonError::into_inner) = ino;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_starts_at_root() {
        let s = Session::new(3);
        assert_eq!(s.id(), 3);
        assert_eq!(s.cwd(), ROOT_INO);
        s.set_cwd(17);
        assert_eq!(s.cwd(), 17);
    }
}
