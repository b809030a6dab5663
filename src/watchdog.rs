//! This module contains the cooperative stop interface that the evaluator
//! polls while it explores execution paths.
//!
//! # Cooperative Stopping
//!
//! The evaluator only checks the watchdog between steps, every
//! [`Watchdog::poll_every`] iterations of its loop. A single step is never
//! interrupted, so a stop request takes effect at the next poll.

use std::{
    fmt::Debug,
    rc::Rc,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crate::constant::DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS;

/// A dynamically dispatched [`Watchdog`] instance.
pub type DynWatchdog = Rc<dyn Watchdog>;

/// An object that the evaluator polls to find out whether it has to abandon
/// the search.
pub trait Watchdog
where
    Self: Debug,
{
    /// Checks if the evaluator should stop and return an error.
    #[must_use]
    fn should_stop(&self) -> bool;

    /// Gets the number of loop iterations the evaluator should wait between
    /// polls.
    #[must_use]
    fn poll_every(&self) -> usize;
}

/// A watchdog that never asks the evaluator to stop.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LazyWatchdog;

impl LazyWatchdog {
    /// Wraps `self` into an [`Rc`].
    #[must_use]
    pub fn in_rc(self) -> DynWatchdog {
        Rc::new(self)
    }
}

impl Watchdog for LazyWatchdog {
    fn should_stop(&self) -> bool {
        false
    }

    fn poll_every(&self) -> usize {
        usize::MAX
    }
}

/// A watchdog that stops the evaluator once a shared flag is raised, for
/// example by another thread that enforces a timeout.
#[derive(Clone, Debug)]
pub struct FlagWatchdog {
    flag: Arc<AtomicBool>,

    poll_loop_iterations: usize,
}

impl FlagWatchdog {
    /// Constructs a watchdog observing `flag`, polled every
    /// [`DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS`] iterations.
    #[must_use]
    pub fn new(flag: Arc<AtomicBool>) -> Self {
        let poll_loop_iterations = DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS;
        Self {
            flag,
            poll_loop_iterations,
        }
    }

    /// Sets the number of loop iterations between polls.
    #[must_use]
    pub fn polling_every(mut self, iterations: usize) -> Self {
        self.poll_loop_iterations = iterations;
        self
    }

    /// Wraps the watchdog into an [`Rc`].
    #[must_use]
    pub fn in_rc(self) -> DynWatchdog {
        Rc::new(self)
    }
}

impl Watchdog for FlagWatchdog {
    fn should_stop(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    fn poll_every(&self) -> usize {
        self.poll_loop_iterations
    }
}

/// A watchdog that stops the evaluator once a time budget has elapsed.
#[derive(Clone, Debug)]
pub struct DeadlineWatchdog {
    deadline: Instant,

    poll_loop_iterations: usize,
}

impl DeadlineWatchdog {
    /// Constructs a watchdog that expires `budget` from now.
    #[must_use]
    pub fn new(budget: Duration) -> Self {
        let deadline = Instant::now() + budget;
        let poll_loop_iterations = DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS;
        Self {
            deadline,
            poll_loop_iterations,
        }
    }

    /// Sets the number of loop iterations between polls.
    #[must_use]
    pub fn polling_every(mut self, iterations: usize) -> Self {
        self.poll_loop_iterations = iterations;
        self
    }

    /// Wraps the watchdog into an [`Rc`].
    #[must_use]
    pub fn in_rc(self) -> DynWatchdog {
        Rc::new(self)
    }
}

impl Watchdog for DeadlineWatchdog {
    fn should_stop(&self) -> bool {
        Instant::now() >= self.deadline
    }

    fn poll_every(&self) -> usize {
        self.poll_loop_iterations
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        time::Duration,
    };

    use crate::watchdog::{DeadlineWatchdog, FlagWatchdog, LazyWatchdog, Watchdog};

    #[test]
    fn lazy_watchdog_never_stops() {
        let watchdog = LazyWatchdog.in_rc();
        assert!(!watchdog.should_stop());
    }

    #[test]
    fn flag_watchdog_follows_its_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let watchdog = FlagWatchdog::new(flag.clone()).polling_every(1);
        assert!(!watchdog.should_stop());
        assert_eq!(watchdog.poll_every(), 1);

        flag.store(true, Ordering::Relaxed);
        assert!(watchdog.should_stop());
    }

    #[test]
    fn expired_deadlines_stop() {
        assert!(DeadlineWatchdog::new(Duration::ZERO).should_stop());
        assert!(!DeadlineWatchdog::new(Duration::from_secs(3600)).should_stop());
    }
}
