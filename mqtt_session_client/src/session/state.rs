// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Lifecycle state machine for a [`crate::session::SessionClient`].

use std::sync::RwLock;

use crate::error::ClientStateError;

/// Reason the client reached the `ShutDown` state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ShutdownCause {
    /// The user stopped the client
    UserStop,
    /// The connection manager returned a fatal error
    FatalError,
}

/// Lifecycle phase of the client. Transitions are one-way:
/// `NotStarted` -> `Started` -> `ShutDown`, with `ShutDown` absorbing.
#[derive(Clone, Copy, Debug)]
enum Lifecycle {
    NotStarted,
    Started,
    ShutDown(ShutdownCause),
}

/// Tracks the lifecycle of the session client.
pub(crate) struct SessionState {
    lifecycle: RwLock<Lifecycle>,
}

impl SessionState {
    pub(crate) fn new() -> Self {
        Self {
            lifecycle: RwLock::new(Lifecycle::NotStarted),
        }
    }

    /// Transition to `Started`.
    ///
    /// # Errors
    /// Returns a [`ClientStateError`] if the client was already started or shut down.
    pub(crate) fn transition_started(&self) -> Result<(), ClientStateError> {
        let mut lifecycle = self.lifecycle.write().unwrap();
        match *lifecycle {
            Lifecycle::NotStarted => {
                *lifecycle = Lifecycle::Started;
                log::info!("Session client started");
                Ok(())
            }
            Lifecycle::Started => Err(ClientStateError::AlreadyStarted),
            Lifecycle::ShutDown(_) => Err(ClientStateError::ShutDown),
        }
    }

    /// Transition to `ShutDown` with the given cause.
    ///
    /// # Errors
    /// Returns [`ClientStateError::ShutDown`] if the client was already shut down.
    pub(crate) fn transition_shutdown(&self, cause: ShutdownCause) -> Result<(), ClientStateError> {
        let mut lifecycle = self.lifecycle.write().unwrap();
        match *lifecycle {
            Lifecycle::ShutDown(_) => Err(ClientStateError::ShutDown),
            _ => {
                *lifecycle = Lifecycle::ShutDown(cause);
                log::info!("Session client shut down ({cause:?})");
                Ok(())
            }
        }
    }

    /// Validate that an operation is being made in the `Started` state.
    ///
    /// # Errors
    /// Returns a [`ClientStateError`] describing the current state otherwise.
    pub(crate) fn require_started(&self) -> Result<(), ClientStateError> {
        match *self.lifecycle.read().unwrap() {
            Lifecycle::NotStarted => Err(ClientStateError::NotStarted),
            Lifecycle::Started => Ok(()),
            Lifecycle::ShutDown(_) => Err(ClientStateError::ShutDown),
        }
    }

    /// Return the shutdown cause, if the client has shut down.
    pub(crate) fn shutdown_cause(&self) -> Option<ShutdownCause> {
        match *self.lifecycle.read().unwrap() {
            Lifecycle::ShutDown(cause) => Some(cause),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_progression() {
        let state = SessionState::new();
        assert_eq!(state.require_started(), Err(ClientStateError::NotStarted));
        assert_eq!(state.shutdown_cause(), None);

        state.transition_started().unwrap();
        assert_eq!(state.require_started(), Ok(()));

        state.transition_shutdown(ShutdownCause::UserStop).unwrap();
        assert_eq!(state.require_started(), Err(ClientStateError::ShutDown));
        assert_eq!(state.shutdown_cause(), Some(ShutdownCause::UserStop));
    }

    #[test]
    fn start_is_at_most_once() {
        let state = SessionState::new();
        state.transition_started().unwrap();
        assert_eq!(
            state.transition_started(),
            Err(ClientStateError::AlreadyStarted)
        );
    }

    #[test]
    fn shutdown_is_absorbing() {
        let state = SessionState::new();
        state.transition_started().unwrap();
        state
            .transition_shutdown(ShutdownCause::FatalError)
            .unwrap();
        // Subsequent transitions fail and do not overwrite the recorded cause
        assert_eq!(
            state.transition_shutdown(ShutdownCause::UserStop),
            Err(ClientStateError::ShutDown)
        );
        assert_eq!(state.transition_started(), Err(ClientStateError::ShutDown));
        assert_eq!(state.shutdown_cause(), Some(ShutdownCause::FatalError));
    }

    #[test]
    fn shutdown_before_start() {
        let state = SessionState::new();
        state.transition_shutdown(ShutdownCause::UserStop).unwrap();
        assert_eq!(state.require_started(), Err(ClientStateError::ShutDown));
        assert_eq!(state.transition_started(), Err(ClientStateError::ShutDown));
    }
}
