// Copyright (C) 2022 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of syslog-forward.
//
// syslog-forward is free software: you can redistribute it and/or modify it under the terms of the
// GNU General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// mpdpopm is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even
// the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details.
//
// You should have received a copy of the GNU General Public License along with mpdpopm.  If not,
// see <http://www.gnu.org/licenses/>.

//! Re-establishing a lost connection.
//!
//! The [`ReconnectEngine`] owns the connection lifecycle:
//!
//! ```text
//!              write failure / peer closed
//!   Connected ----------------------------> Reconnecting --+
//!       ^                                     |    ^       | connect failed,
//!       |          connect succeeded          |    +-------+ attempts < budget
//!       +-------------------------------------+
//!                                             | attempts == budget
//!                                             v
//!                                           Failed
//! ```
//!
//! The budget counts *consecutive* failures: any successful connect resets it. `Failed` is
//! terminal.

use crate::{
    config::{BackoffPolicy, TransportConfig},
    error::{Error, Result},
    transport::{Connection, Transport},
};

use backtrace::Backtrace;
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{error, info, warn};

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

/// Where the single current [`Connection`] lives
pub type ConnectionSlot = Mutex<Option<Box<dyn Connection>>>;

/// Connection lifecycle states
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Connected,
    Reconnecting,
    Failed,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                State::Connected => "connected",
                State::Reconnecting => "reconnecting",
                State::Failed => "failed",
            }
        )
    }
}

/// Consecutive failed connection attempts, against a fixed budget
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryState {
    attempts: u32,
    budget: u32,
}

impl RetryState {
    pub fn new(budget: u32) -> RetryState {
        RetryState {
            attempts: 0,
            budget,
        }
    }
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
    pub fn budget(&self) -> u32 {
        self.budget
    }
    pub fn exhausted(&self) -> bool {
        self.attempts >= self.budget
    }
    pub fn record_failure(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

/// Produces jittered, exponentially growing delays, capped at [`BackoffPolicy::cap`].
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
    rng: StdRng,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Backoff {
        Backoff {
            current: policy.base,
            policy,
            rng: StdRng::from_entropy(),
        }
    }
    /// The delay to observe after the next failure; `None` if backoff is disabled.
    pub fn next_sleep(&mut self) -> Option<Duration> {
        if self.policy.base.is_zero() {
            return None;
        }
        let max_ms = self.current.min(self.policy.cap).as_millis().min(u64::MAX as u128) as u64;
        let sleep_ms = match max_ms {
            0 | 1 => max_ms,
            _ => self.rng.gen_range(max_ms / 2..=max_ms),
        };
        self.current = self.current.saturating_mul(2).min(self.policy.cap);
        Some(Duration::from_millis(sleep_ms))
    }
    pub fn reset(&mut self) {
        self.current = self.policy.base;
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                     struct ReconnectEngine                                     //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Drives a [`Transport`] through the connection lifecycle.
///
/// The engine runs synchronously on whichever thread calls [`ReconnectEngine::reconnect`] (in
/// practice, the stream worker). Its [`State`] is published through a shared handle so that other
/// threads may observe it.
pub struct ReconnectEngine {
    transport: Arc<dyn Transport>,
    config: Arc<TransportConfig>,
    retry: RetryState,
    backoff: Backoff,
    state: Arc<Mutex<State>>,
}

impl ReconnectEngine {
    pub fn new(transport: Arc<dyn Transport>, config: Arc<TransportConfig>) -> ReconnectEngine {
        ReconnectEngine {
            retry: RetryState::new(config.retry_budget),
            backoff: Backoff::new(config.backoff.clone()),
            transport,
            config,
            state: Arc::new(Mutex::new(State::Connected)),
        }
    }
    pub fn state(&self) -> State {
        *self.state.lock()
    }
    /// A handle through which the current state can be read from other threads
    pub fn state_handle(&self) -> Arc<Mutex<State>> {
        self.state.clone()
    }
    pub fn retry_state(&self) -> &RetryState {
        &self.retry
    }
    /// Make a single connection attempt, with no retries.
    pub fn connect(&self) -> Result<Box<dyn Connection>> {
        let conn = self.transport.connect(&self.config)?;
        info!(
            "Connected to {}://{}",
            self.config.scheme, self.config.address
        );
        Ok(conn)
    }
    fn set_state(&self, state: State) {
        *self.state.lock() = state;
    }
    /// Replace the connection in `slot`, retrying up to the budget.
    ///
    /// Any connection currently in `slot` is closed first. On success, a new connection has been
    /// installed & the retry state reset. If `shutdown` is raised at any point, a freshly
    /// established connection is closed rather than installed & [`Error::Shutdown`] returned.
    /// Exhausting the budget moves the engine to [`State::Failed`] for good.
    pub fn reconnect(&mut self, slot: &ConnectionSlot, shutdown: &AtomicBool) -> Result<()> {
        if self.state() == State::Failed {
            return Err(Error::FailedTerminal {
                attempts: self.retry.attempts(),
                back: Backtrace::new(),
            });
        }
        self.set_state(State::Reconnecting);
        if let Some(mut stale) = slot.lock().take() {
            stale.close();
        }
        loop {
            if shutdown.load(Ordering::SeqCst) {
                return Err(Error::Shutdown);
            }
            if self.retry.exhausted() {
                self.set_state(State::Failed);
                error!(
                    "Giving up on {}://{} after {} consecutive failed attempts",
                    self.config.scheme,
                    self.config.address,
                    self.retry.attempts()
                );
                return Err(Error::FailedTerminal {
                    attempts: self.retry.attempts(),
                    back: Backtrace::new(),
                });
            }
            match self.transport.connect(&self.config) {
                Ok(mut conn) => {
                    let mut guard = slot.lock();
                    if shutdown.load(Ordering::SeqCst) {
                        conn.close();
                        return Err(Error::Shutdown);
                    }
                    *guard = Some(conn);
                    drop(guard);
                    self.retry.reset();
                    self.backoff.reset();
                    self.set_state(State::Connected);
                    info!(
                        "Reconnected to {}://{}",
                        self.config.scheme, self.config.address
                    );
                    return Ok(());
                }
                Err(err) => {
                    self.retry.record_failure();
                    warn!(
                        "Reconnect attempt {}/{} failed: {}",
                        self.retry.attempts(),
                        self.retry.budget(),
                        err
                    );
                    if !self.retry.exhausted() {
                        if let Some(delay) = self.backoff.next_sleep() {
                            thread::sleep(delay);
                        }
                    }
                }
            }
        }
    }
}
