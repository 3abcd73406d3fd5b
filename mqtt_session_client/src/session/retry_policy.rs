// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Retry policies for connection attempts of a
//! [`SessionClient`](crate::session::SessionClient).

use std::time::Duration;

use rand::Rng;

use crate::control_packet::ConnectReturnCode;
use crate::error::{ConnectionError, StateError};
use crate::session::SessionErrorKind;

/// Trait defining interface for retry policies.
///
/// Consulted by the connection manager after every failed (retryable)
/// connection attempt and after every drop of an established connection.
/// Fatal errors are never offered to the policy.
pub trait RetryPolicy: Send + Sync {
    /// Get the delay before the next connection attempt.
    /// Returns None if no further attempt should be made.
    fn next_reconnect_delay(
        &self,
        prev_attempts: u32,
        error: &SessionErrorKind,
    ) -> Option<Duration>;
}

/// A retry policy that exponentially backs off the delay between reconnect
/// attempts, with the delay randomized within its upper half.
///
/// Delays double from `base_delay` up to `max_wait` as consecutive failures
/// accumulate. When the broker reports that it is shedding load (server busy,
/// quota exceeded, connection rate exceeded), the delay is raised to at least
/// `overload_floor` regardless of the attempt count.
pub struct ExponentialBackoffWithJitter {
    /// Delay before the first reconnect attempt.
    pub base_delay: Duration,
    /// The longest possible time to wait between reconnect attempts.
    pub max_wait: Duration,
    /// Minimum delay after a load-shedding refusal from the broker.
    pub overload_floor: Duration,
    /// The max number of reconnect attempts before giving up.
    pub max_reconnect_attempts: Option<u32>,
}

impl ExponentialBackoffWithJitter {
    // Past this many doublings the interval has long saturated max_wait for
    // any sane configuration; capping keeps the shift well-defined.
    const MAX_DOUBLINGS: u32 = 16;

    /// The deterministic interval for an attempt, before jitter.
    fn backoff_interval(&self, prev_attempts: u32, error: &SessionErrorKind) -> Duration {
        let doublings = prev_attempts.min(Self::MAX_DOUBLINGS);
        let interval = self
            .base_delay
            .saturating_mul(1_u32 << doublings)
            .min(self.max_wait);
        if is_broker_overload(error) {
            interval.max(self.overload_floor)
        } else {
            interval
        }
    }

    /// Randomize the upper half of the interval, spreading reconnecting
    /// clients apart while keeping at least half the interval as floor.
    fn apply_jitter(interval: Duration) -> Duration {
        let half = interval / 2;
        half + half.mul_f64(rand::thread_rng().gen::<f64>())
    }
}

/// Return true for failures where the broker reported it is shedding load.
fn is_broker_overload(error: &SessionErrorKind) -> bool {
    match error {
        SessionErrorKind::Connack(
            ConnectReturnCode::ServerBusy
            | ConnectReturnCode::QuotaExceeded
            | ConnectReturnCode::ConnectionRateExceeded,
        ) => true,
        SessionErrorKind::Connection(ConnectionError::MqttState(
            StateError::ServerDisconnect { reason_code, .. },
        )) => matches!(
            reason_code,
            crate::control_packet::DisconnectReasonCode::ServerBusy
                | crate::control_packet::DisconnectReasonCode::QuotaExceeded
                | crate::control_packet::DisconnectReasonCode::ConnectionRateExceeded
        ),
        _ => false,
    }
}

impl Default for ExponentialBackoffWithJitter {
    /// Indefinite reconnect, doubling from 250 milliseconds up to 60 seconds,
    /// holding load-shedding refusals to at least 10 seconds.
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(250),
            max_wait: Duration::from_secs(60),
            overload_floor: Duration::from_secs(10),
            max_reconnect_attempts: None,
        }
    }
}

impl RetryPolicy for ExponentialBackoffWithJitter {
    fn next_reconnect_delay(
        &self,
        prev_attempts: u32,
        error: &SessionErrorKind,
    ) -> Option<Duration> {
        if let Some(max_attempts) = self.max_reconnect_attempts {
            if prev_attempts >= max_attempts {
                return None;
            }
        }
        Some(Self::apply_jitter(self.backoff_interval(
            prev_attempts,
            error,
        )))
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::control_packet::DisconnectReasonCode;

    fn transport_error() -> SessionErrorKind {
        SessionErrorKind::ConnectTimeout
    }

    fn overload_connack() -> SessionErrorKind {
        SessionErrorKind::Connack(ConnectReturnCode::ServerBusy)
    }

    fn overload_disconnect() -> SessionErrorKind {
        SessionErrorKind::Connection(ConnectionError::MqttState(StateError::ServerDisconnect {
            reason_code: DisconnectReasonCode::QuotaExceeded,
            reason_string: None,
        }))
    }

    fn test_policy() -> ExponentialBackoffWithJitter {
        ExponentialBackoffWithJitter {
            base_delay: Duration::from_secs(1),
            max_wait: Duration::from_secs(60),
            overload_floor: Duration::from_secs(20),
            max_reconnect_attempts: None,
        }
    }

    #[test]
    fn delay_doubles_until_max_wait() {
        let policy = test_policy();
        for attempt in 0..10 {
            let interval = Duration::from_secs(1 << attempt).min(policy.max_wait);
            let delay = policy
                .next_reconnect_delay(attempt, &transport_error())
                .unwrap();
            // Jitter randomizes the upper half of the interval
            assert!(delay >= interval / 2);
            assert!(delay <= interval);
        }
    }

    #[test]
    fn delay_saturates_past_the_doubling_cap() {
        let policy = test_policy();
        let delay = policy
            .next_reconnect_delay(u32::MAX, &transport_error())
            .unwrap();
        assert!(delay <= policy.max_wait);
        assert!(delay >= policy.max_wait / 2);
    }

    #[test_case(overload_connack(); "server busy connack")]
    #[test_case(overload_disconnect(); "quota exceeded disconnect")]
    fn overload_raises_the_floor(error: SessionErrorKind) {
        let policy = test_policy();
        // The first attempt would otherwise wait at most base_delay
        let delay = policy.next_reconnect_delay(0, &error).unwrap();
        assert!(delay >= policy.overload_floor / 2);
        assert!(delay <= policy.overload_floor);
    }

    #[test_case(SessionErrorKind::ConnectTimeout; "connect timeout")]
    #[test_case(SessionErrorKind::Connack(ConnectReturnCode::ServerUnavailable); "server unavailable connack")]
    fn non_overload_errors_use_plain_backoff(error: SessionErrorKind) {
        let policy = test_policy();
        let delay = policy.next_reconnect_delay(0, &error).unwrap();
        assert!(delay <= policy.base_delay);
    }

    #[test]
    fn halts_after_max_attempts() {
        let policy = ExponentialBackoffWithJitter {
            max_reconnect_attempts: Some(3),
            ..test_policy()
        };
        assert!(policy
            .next_reconnect_delay(2, &transport_error())
            .is_some());
        assert!(policy
            .next_reconnect_delay(3, &transport_error())
            .is_none());
    }
}
