//! Concurrency and rate limiting in front of the AI provider.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use crate::config::ProviderConfig;
use crate::error::WorkerError;
use crate::shutdown::Shutdown;

type IntervalLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared gate bounding in-flight provider calls and spacing their starts.
///
/// Capacity is a pool of tokens in a bounded channel: acquiring receives a
/// token, releasing sends it back. A worker waiting on the gate is parked in
/// the channel receive, not spinning. Call starts are additionally spaced by
/// `min_interval` through a burst-1 governor quota.
pub struct ProviderGate {
    tokens_tx: Sender<()>,
    tokens_rx: Receiver<()>,
    limiter: Option<IntervalLimiter>,
    max_concurrent: usize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    total_acquired: AtomicU64,
}

/// Held for the duration of one provider call. Dropping it releases the slot.
#[must_use = "dropping the permit releases the slot immediately"]
pub struct ProviderPermit<'a> {
    gate: &'a ProviderGate,
}

impl ProviderGate {
    pub fn new(max_concurrent: usize, min_interval: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        let (tokens_tx, tokens_rx) = bounded(max_concurrent);
        for _ in 0..max_concurrent {
            // Channel has exactly max_concurrent slots.
            let _ = tokens_tx.try_send(());
        }

        let limiter = Quota::with_period(min_interval).map(RateLimiter::direct);

        Self {
            tokens_tx,
            tokens_rx,
            limiter,
            max_concurrent,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            total_acquired: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(
            config.max_concurrent,
            Duration::from_millis(config.min_interval_ms),
        )
    }

    /// Blocks until a slot is free and the minimum interval has elapsed.
    pub fn acquire(&self) -> Result<ProviderPermit<'_>, WorkerError> {
        let permit = self.take_token(None)?;
        self.wait_for_interval(None)?;
        Ok(permit)
    }

    /// Like [`acquire`](Self::acquire), but gives up with
    /// [`WorkerError::ShuttingDown`] once `shutdown` triggers.
    pub fn acquire_cancellable(
        &self,
        shutdown: &Shutdown,
    ) -> Result<ProviderPermit<'_>, WorkerError> {
        let permit = self.take_token(Some(shutdown))?;
        self.wait_for_interval(Some(shutdown))?;
        Ok(permit)
    }

    pub fn release(&self, permit: ProviderPermit<'_>) {
        drop(permit);
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of permits held at the same time since creation.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn total_acquired(&self) -> u64 {
        self.total_acquired.load(Ordering::SeqCst)
    }

    fn take_token(&self, shutdown: Option<&Shutdown>) -> Result<ProviderPermit<'_>, WorkerError> {
        loop {
            if shutdown.is_some_and(Shutdown::is_triggered) {
                return Err(WorkerError::ShuttingDown);
            }
            match self.tokens_rx.recv_timeout(POLL_INTERVAL) {
                Ok(()) => break,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(WorkerError::ChannelClosed),
            }
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        self.total_acquired.fetch_add(1, Ordering::SeqCst);
        Ok(ProviderPermit { gate: self })
    }

    fn wait_for_interval(&self, shutdown: Option<&Shutdown>) -> Result<(), WorkerError> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };

        let clock = DefaultClock::default();
        while let Err(not_until) = limiter.check() {
            let wait = not_until.wait_time_from(clock.now());
            match shutdown {
                Some(shutdown) => {
                    if !shutdown.sleep(wait) {
                        return Err(WorkerError::ShuttingDown);
                    }
                }
                None => std::thread::sleep(wait),
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ProviderGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderGate")
            .field("max_concurrent", &self.max_concurrent)
            .field("rate_limited", &self.limiter.is_some())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl Drop for ProviderPermit<'_> {
    fn drop(&mut self) {
        self.gate.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.gate.tokens_tx.try_send(()).is_err() {
            log::error!("Provider gate token could not be returned");
        }
    }
}
