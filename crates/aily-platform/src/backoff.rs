use std::time::Duration;

/// Reconnect backoff: 1 s base doubling to a 30 s cap.
pub const BASE: Duration = Duration::from_secs(1);
pub const CAP: Duration = Duration::from_secs(30);
/// Jitter fraction applied to each delay (+20 %).
const JITTER_FRACTION: f64 = 0.20;

/// Delay before reconnect attempt `attempt` (0-based), jittered.
pub fn delay_for_attempt(attempt: u32) -> Duration {
    let base_ms = BASE.as_millis() as u64;
    let cap_ms = CAP.as_millis() as u64;
    let raw = base_ms.saturating_mul(1u64 << attempt.min(16)).min(cap_ms);
    Duration::from_millis(raw + jitter_ms(raw))
}

/// 0 … `JITTER_FRACTION * base` milliseconds of jitter, derived from the
/// current monotonic sub-second timestamp to avoid a rand dependency.
fn jitter_ms(base_ms: u64) -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    let max_jitter = ((base_ms as f64) * JITTER_FRACTION) as u64;
    if max_jitter == 0 {
        return 0;
    }
    (nanos as u64) % max_jitter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_to_cap() {
        assert!(delay_for_attempt(0) >= Duration::from_secs(1));
        assert!(delay_for_attempt(0) < Duration::from_millis(1300));
        assert!(delay_for_attempt(4) >= Duration::from_secs(16));
        // capped with at most 20% jitter on top
        assert!(delay_for_attempt(10) <= Duration::from_secs(36));
        assert!(delay_for_attempt(10) >= Duration::from_secs(30));
    }

    #[test]
    fn large_attempt_does_not_overflow() {
        let d = delay_for_attempt(u32::MAX);
        assert!(d >= CAP && d <= Duration::from_secs(36));
    }
}
