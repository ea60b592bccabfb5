//! The process-wide execution token.
//!
//! Bytecode only runs while its thread holds the token, so at most one thread is inside an
//! eval loop at a time no matter how many runtimes exist. The holder hands the token to
//! waiting threads every `switch_interval` instructions and releases it entirely around
//! blocking host work.
//!
//! The lock is reentrant: a runtime driven from inside a host function of another runtime
//! on the same thread acquires it again without deadlocking.

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

static EXECUTION_TOKEN: ReentrantMutex<()> = parking_lot::const_reentrant_mutex(());

/// Proof that the current thread holds the execution token.
///
/// Acquired by every runtime entry point and released when dropped.
pub(crate) struct ExecutionToken {
    guard: ReentrantMutexGuard<'static, ()>,
    interval: u32,
    countdown: u32,
}

impl std::fmt::Debug for ExecutionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionToken")
            .field("interval", &self.interval)
            .field("countdown", &self.countdown)
            .finish_non_exhaustive()
    }
}

impl ExecutionToken {
    /// Blocks until the token is available. `interval` is the number of instructions
    /// between hand-offs.
    pub fn acquire(interval: u32) -> Self {
        let interval = interval.max(1);
        Self {
            guard: EXECUTION_TOKEN.lock(),
            interval,
            countdown: interval,
        }
    }

    /// Counts one instruction, handing the token over fairly when the interval is used up.
    #[inline]
    pub fn tick(&mut self) {
        self.countdown -= 1;
        if self.countdown == 0 {
            self.countdown = self.interval;
            ReentrantMutexGuard::bump(&mut self.guard);
        }
    }

    /// Runs `f` without the token, reacquiring it before returning.
    pub fn release_while<R>(&mut self, f: impl FnOnce() -> R) -> R {
        ReentrantMutexGuard::unlocked(&mut self.guard, f)
    }
}

/// True if some thread, possibly this one, holds the token.
#[must_use]
pub fn execution_token_held() -> bool {
    EXECUTION_TOKEN.is_locked()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_reentrant_and_released_around_host_work() {
        let mut outer = ExecutionToken::acquire(2);
        let inner = ExecutionToken::acquire(2);
        drop(inner);
        outer.tick();
        outer.tick();
        let other_thread_got_it = outer.release_while(|| {
            std::thread::spawn(|| {
                let _token = ExecutionToken::acquire(1);
                true
            })
            .join()
            .unwrap()
        });
        assert!(other_thread_got_it, "another thread runs while the token is released");
    }
}
