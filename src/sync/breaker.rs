//! Broadcast volume guard.
//!
//! Applying received commands must never turn into an outbound broadcast
//! storm. Before each send the broadcaster asks the breaker whether the
//! pending window fits the session ceiling; once refused, the breaker stays
//! open until reset. Windows larger than one broadcast are split into chunks
//! of at most `max_per_broadcast` and never trip the breaker on their own.

use tracing::error;

use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreaker {
    max_per_broadcast: usize,
    session_ceiling: Option<usize>,
    sent_total: usize,
    open: bool,
}

impl CircuitBreaker {
    pub fn new(max_per_broadcast: usize, session_ceiling: Option<usize>) -> Self {
        CircuitBreaker {
            max_per_broadcast,
            session_ceiling,
            sent_total: 0,
            open: false,
        }
    }

    /// Largest number of commands one message may carry.
    pub fn max_per_broadcast(&self) -> usize {
        self.max_per_broadcast.max(1)
    }

    /// Checks whether `pending` more commands fit this session's budget.
    pub fn check(&mut self, pending: usize) -> Result<(), SyncError> {
        let ceiling = self.session_ceiling.unwrap_or(usize::MAX);
        if self.sent_total.saturating_add(pending) > ceiling {
            if !self.open {
                error!(
                    "Circuit breaker open: {} pending command(s) exceed session ceiling {} ({} sent this session)",
                    pending, ceiling, self.sent_total
                );
            }
            self.open = true;
        }
        if self.open {
            return Err(SyncError::CircuitOpen {
                pending,
                limit: ceiling,
            });
        }
        Ok(())
    }

    /// Records a successful broadcast of `sent` commands.
    pub fn record(&mut self, sent: usize) {
        self.sent_total += sent;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn sent_total(&self) -> usize {
        self.sent_total
    }

    /// Closes the breaker and starts a fresh session budget.
    pub fn reset(&mut self) {
        self.open = false;
        self.sent_total = 0;
    }
}
