//! Single-shot idle timer owned by a session

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub(crate) struct IdleTimer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl IdleTimer {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// Start counting down from now, replacing any previous deadline
    pub(crate) fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.delay);
    }

    pub(crate) fn disarm(&mut self) {
        self.deadline = None;
    }

    #[cfg(test)]
    pub(crate) fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Completes at the current deadline; never completes while disarmed
    ///
    /// The returned future does not borrow the timer, so it can be raced
    /// against the command channel and rebuilt after every command.
    pub(crate) fn expired(&self) -> impl Future<Output = ()> + 'static {
        let deadline = self.deadline;
        async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        }
    }
}
