use crate::model::JobConfig;
use std::time::Duration;

/// Delay before retry number `attempt` (counted from 1): `max(base * 2^attempt, floor)`.
pub(crate) fn delay(cfg: &JobConfig, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    cfg.backoff_base.saturating_mul(factor).max(cfg.backoff_floor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_has_a_five_second_floor() {
        let cfg = JobConfig::default();
        let waits: Vec<u64> = (1..=6).map(|a| delay(&cfg, a).as_millis() as u64).collect();
        assert_eq!(waits, vec![5000, 5000, 8000, 16000, 32000, 64000]);
    }

    #[test]
    fn schedule_never_decreases() {
        let cfg = JobConfig::default();
        for attempt in 1..40 {
            assert!(delay(&cfg, attempt + 1) >= delay(&cfg, attempt));
        }
    }
}
