//! Reconnection backoff scheduling (spec §4.10).

use std::time::Duration;

/// A small set of error strings that stop reconnection immediately with a
/// permanent close (spec §4.10).
pub const INTOLERABLE_ERRORS: &[&str] = &[
    "Maximum redirects exceeded",
    "Server sent no subprotocol",
    "Server sent an invalid subprotocol",
    "Server sent a subprotocol but none was requested",
    "Invalid Sec-WebSocket-Accept header",
];

/// Whether `message` names one of the intolerable reconnect errors.
pub fn is_intolerable(message: &str) -> bool {
    INTOLERABLE_ERRORS.iter().any(|&e| message.contains(e))
}

/// Compute the delay before reconnect attempt number `attempt` (1-based),
/// given a `[0, 1)` random sample `jitter`.
///
/// `delay = min(backoff_max, backoff_min * 2^(attempt-1) * (0.5 + jitter*0.5))`
/// (spec §4.10: "exponential with 50-100% jitter").
pub fn reconnect_delay(
    backoff_min: Duration,
    backoff_max: Duration,
    attempt: u32,
    jitter: f64,
) -> Duration {
    debug_assert!((0.0..1.0).contains(&jitter));
    let exponent = attempt.saturating_sub(1).min(31);
    let base = backoff_min.as_secs_f64() * 2f64.powi(exponent as i32);
    let jittered = base * (0.5 + jitter * 0.5);
    Duration::from_secs_f64(jittered.min(backoff_max.as_secs_f64()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let min = Duration::from_millis(100);
        let max = Duration::from_millis(400);

        let d1 = reconnect_delay(min, max, 1, 0.0);
        let d1_hi = reconnect_delay(min, max, 1, 0.999);
        assert!(d1 >= Duration::from_millis(50) && d1_hi <= Duration::from_millis(100));

        let d2 = reconnect_delay(min, max, 2, 0.0);
        let d2_hi = reconnect_delay(min, max, 2, 0.999);
        assert!(d2 >= Duration::from_millis(100) && d2_hi <= Duration::from_millis(200));

        let d3_hi = reconnect_delay(min, max, 3, 0.999);
        assert!(d3_hi <= Duration::from_millis(400));

        // Further attempts stay capped at backoff_max.
        let d10 = reconnect_delay(min, max, 10, 0.999);
        assert!(d10 <= max);
    }

    #[test]
    fn recognizes_intolerable_errors() {
        assert!(is_intolerable("Server sent no subprotocol"));
        assert!(!is_intolerable("connection reset by peer"));
    }
}
