//! This module provides ways to tweak a [`MockServer`](crate::mock_server::MockServer), so that it can return errors on some tests

use std::error::Error;

/// This stores some behaviour tweaks, that describe how a mocked server will behave during a given test
///
/// So that a functions fails _n_ times after _m_ initial successes, set `(m, n)` for the suited parameter
#[derive(Default, Clone, Debug)]
pub struct MockBehaviour {
    /// If this is true, every action will be allowed
    pub is_suspended: bool,

    /// Sync requests that fail at the transport level
    pub sync_request_behaviour: (u32, u32),
    /// Sync requests that are answered with a token rejection (only when a token is presented)
    pub reject_token_behaviour: (u32, u32),
}

impl MockBehaviour {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every sync request will fail at once, for `n_fails` times
    pub fn fail_now(n_fails: u32) -> Self {
        Self {
            is_suspended: false,
            sync_request_behaviour: (0, n_fails),
            reject_token_behaviour: (0, 0),
        }
    }

    /// Suspend this mock behaviour until you call `resume`
    pub fn suspend(&mut self) {
        self.is_suspended = true;
    }
    /// Make this behaviour active again
    pub fn resume(&mut self) {
        self.is_suspended = false;
    }

    pub fn can_sync(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.sync_request_behaviour, "sync request")
    }

    pub fn can_accept_token(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.reject_token_behaviour, "token acceptance")
    }
}


/// Return Ok(()) in case the value is `(1+, _)` or `(_, 0)`, or return Err and decrement otherwise
fn decrement(value: &mut (u32, u32), descr: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
    let remaining_successes = value.0;
    let remaining_failures = value.1;

    if remaining_successes > 0 {
        value.0 -= 1;
        log::debug!("Mock behaviour: allowing a {} ({:?})", descr, value);
        Ok(())
    } else if remaining_failures > 0 {
        value.1 -= 1;
        log::debug!("Mock behaviour: failing a {} ({:?})", descr, value);
        Err(format!("Mocked behaviour requires this {} to fail this time. ({:?})", descr, value).into())
    } else {
        log::debug!("Mock behaviour: allowing a {} ({:?})", descr, value);
        Ok(())
    }
}
