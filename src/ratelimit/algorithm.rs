//! Algorithm traits shared by every admission strategy.

/// A per-key rate limiting algorithm.
///
/// Implementations own their state and guard it internally, so a single
/// instance can be shared across threads behind an `Arc`.
pub trait Algorithm: Send + Sync {
    /// Decide whether the current request is admitted.
    ///
    /// Returns `true` if admitted, `false` if over limit. A denial is final
    /// for this attempt; nothing is queued.
    fn allow(&self) -> bool;
}

/// A rate limiting algorithm shared across many clients.
///
/// Unlike [`Algorithm`], one instance tracks every client itself and the
/// client id is passed on each call.
pub trait KeyedAlgorithm: Send + Sync {
    /// Decide whether the current request from `client_id` is admitted.
    fn allow(&self, client_id: &str) -> bool;
}

/// Reject a zero-valued construction parameter.
pub(crate) fn require_positive(name: &str, value: u64) -> crate::Result<()> {
    if value == 0 {
        return Err(crate::TurnstileError::Config(format!(
            "{} must be at least 1",
            name
        )));
    }
    Ok(())
}

/// Reject a zero-length duration.
pub(crate) fn require_nonzero(name: &str, value: std::time::Duration) -> crate::Result<()> {
    if value.is_zero() {
        return Err(crate::TurnstileError::Config(format!(
            "{} must be greater than zero",
            name
        )));
    }
    Ok(())
}

/// Number of whole `period`s contained in `elapsed`.
///
/// `period` must be non-zero; every constructor validates this.
pub(crate) fn whole_periods(elapsed: std::time::Duration, period: std::time::Duration) -> u64 {
    let periods = elapsed.as_nanos() / period.as_nanos();
    u64::try_from(periods).unwrap_or(u64::MAX)
}

/// The span covered by `count` whole `period`s.
///
/// Callers pass a `count` obtained from [`whole_periods`], so the span never
/// exceeds the elapsed time it was derived from.
pub(crate) fn span_of(period: std::time::Duration, count: u64) -> std::time::Duration {
    const NANOS_PER_SEC: u128 = 1_000_000_000;
    let nanos = period.as_nanos().saturating_mul(count as u128);
    let secs = u64::try_from(nanos / NANOS_PER_SEC).unwrap_or(u64::MAX);
    std::time::Duration::new(secs, (nanos % NANOS_PER_SEC) as u32)
}
