//! Single-shot connection state shared by the client and the server
//!
//! The state lives in one atomic. `connect` and `close` are compare-and-swap
//! transitions, so when several callers race only one of them wins and the
//! rest observe [`StateError::NotTransitioned`].

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use thiserror::Error;

const DISCONNECTED: u8 = 0;
const CONNECTED: u8 = 1;

/// Observable connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No live connection, every guarded operation fails fast
    Disconnected,
    /// Dependencies checked and connection established
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connected => write!(f, "connected"),
        }
    }
}

/// Errors raised by state transitions and guards
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    /// The operation requires a live connection
    #[error("not connected")]
    NotConnected,

    /// Another caller already moved the state away from `expected`
    #[error("connection state not transitioned: expected {expected}")]
    NotTransitioned {
        /// State the transition started from
        expected: ConnectionStatus,
    },
}

/// Atomic two-state connection flag
#[derive(Debug, Default)]
pub struct ConnectionState {
    state: AtomicU8,
}

impl ConnectionState {
    /// Create a disconnected state
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(DISCONNECTED),
        }
    }

    /// Move Disconnected → Connected
    pub fn connect(&self) -> Result<(), StateError> {
        self.transition(DISCONNECTED, CONNECTED)
    }

    /// Move Connected → Disconnected
    pub fn close(&self) -> Result<(), StateError> {
        self.transition(CONNECTED, DISCONNECTED)
    }

    /// Lock-free read of the current state
    pub fn is_connected(&self) -> bool {
        self.state.load(Ordering::Acquire) == CONNECTED
    }

    /// Precondition guard for connected-only operations
    pub fn ensure_connected(&self) -> Result<(), StateError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(StateError::NotConnected)
        }
    }

    /// Current status
    pub fn status(&self) -> ConnectionStatus {
        if self.is_connected() {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }

    fn transition(&self, from: u8, to: u8) -> Result<(), StateError> {
        self.state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| StateError::NotTransitioned {
                expected: if from == CONNECTED {
                    ConnectionStatus::Connected
                } else {
                    ConnectionStatus::Disconnected
                },
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_starts_disconnected() {
        let state = ConnectionState::new();
        assert!(!state.is_connected());
        assert_eq!(state.status(), ConnectionStatus::Disconnected);
        assert_eq!(state.ensure_connected(), Err(StateError::NotConnected));
    }

    #[test]
    fn test_connect_then_close() {
        let state = ConnectionState::new();
        state.connect().unwrap();
        assert!(state.is_connected());
        assert!(state.ensure_connected().is_ok());

        state.close().unwrap();
        assert!(!state.is_connected());
    }

    #[test]
    fn test_connect_is_single_shot() {
        let state = ConnectionState::new();
        state.connect().unwrap();
        assert_eq!(
            state.connect(),
            Err(StateError::NotTransitioned {
                expected: ConnectionStatus::Disconnected
            })
        );
    }

    #[test]
    fn test_close_requires_connected() {
        let state = ConnectionState::new();
        assert_eq!(
            state.close(),
            Err(StateError::NotTransitioned {
                expected: ConnectionStatus::Connected
            })
        );
    }

    #[test]
    fn test_reconnect_after_close() {
        let state = ConnectionState::new();
        state.connect().unwrap();
        state.close().unwrap();
        assert!(state.connect().is_ok());
    }

    #[test]
    fn test_concurrent_connect_exactly_once() {
        const N: usize = 32;
        let state = Arc::new(ConnectionState::new());
        let barrier = Arc::new(std::sync::Barrier::new(N));

        let handles: Vec<_> = (0..N)
            .map(|_| {
                let state = state.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    state.connect()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let successes = results.iter().filter(|r| r.is_ok()).count();
        let rejected = results
            .iter()
            .filter(|r| matches!(r, Err(StateError::NotTransitioned { .. })))
            .count();

        assert_eq!(successes, 1);
        assert_eq!(rejected, N - 1);
        assert!(state.is_connected());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ConnectionStatus::Connected.to_string(), "connected");
        assert_eq!(ConnectionStatus::Disconnected.to_string(), "disconnected");
    }
}
