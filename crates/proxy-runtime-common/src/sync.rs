//! Small synchronization helpers shared across the workspace.

use std::sync::{Mutex, MutexGuard};

/// Locks a mutex, recovering the guard if a previous holder panicked.
/// Guest-visible state is status-code driven, so a poisoned lock is not
/// treated as fatal.
pub fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_recovers_from_poison() {
        let mutex = std::sync::Arc::new(Mutex::new(7u32));
        let clone = std::sync::Arc::clone(&mutex);
        let _ = std::thread::spawn(move || {
            let _guard = clone.lock().unwrap();
            panic!("poison it");
        })
        .join();

        assert_eq!(*lock(&mutex), 7);
    }
}
