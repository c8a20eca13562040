use std::time::Duration;

use souk_types::close::DisconnectCause;

/// Bounded fixed-delay retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(3),
        }
    }
}

/// What to do after a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Wait, then reconnect. `attempt` is 1-based; 0 for a server-initiated
    /// disconnect, which does not count against the budget.
    Retry { attempt: u32, delay: Duration },
    /// Budget exhausted.
    GiveUp,
    /// Credentials were refused; retrying cannot help.
    Terminal,
}

/// Attempt counter for one session.
#[derive(Debug, Clone)]
pub struct ReconnectState {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl ReconnectState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempts: 0 }
    }

    /// A handshake completed; the next failure starts a fresh schedule.
    pub fn on_connected(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn on_disconnect(&mut self, cause: DisconnectCause) -> Decision {
        match cause {
            DisconnectCause::Unauthorized => Decision::Terminal,
            DisconnectCause::ServerInitiated => Decision::Retry {
                attempt: 0,
                delay: Duration::ZERO,
            },
            DisconnectCause::Transport if self.attempts >= self.policy.max_attempts => Decision::GiveUp,
            DisconnectCause::Transport => {
                self.attempts += 1;
                Decision::Retry {
                    attempt: self.attempts,
                    delay: self.policy.delay,
                }
            }
        }
    }
}
