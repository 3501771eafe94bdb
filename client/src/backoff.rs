//! Error backoff schedule for failed update fetches.

use rand::Rng;

const MINUTE: u64 = 60;

/// Seconds to wait before the next update attempt after `errors`
/// consecutive failures.
///
/// The first failure retries after a minute; each further failure doubles
/// a jittered window until it pins at 8 hours.
pub(crate) fn wait_secs<R: Rng + ?Sized>(errors: u32, rng: &mut R) -> u64 {
    match errors {
        0 | 1 => 60,
        2 => rng.random_range(30 * MINUTE..=60 * MINUTE),
        3 => rng.random_range(60 * MINUTE..=120 * MINUTE),
        4 => rng.random_range(120 * MINUTE..=240 * MINUTE),
        5 => rng.random_range(240 * MINUTE..=480 * MINUTE),
        _ => 480 * MINUTE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_failure_waits_a_minute() {
        let mut rng = rand::rng();
        assert_eq!(wait_secs(1, &mut rng), 60);
    }

    #[test]
    fn jittered_windows_stay_in_range() {
        let mut rng = rand::rng();
        for _ in 0..100 {
            let w2 = wait_secs(2, &mut rng);
            assert!((30 * MINUTE..=60 * MINUTE).contains(&w2));
            let w3 = wait_secs(3, &mut rng);
            assert!((60 * MINUTE..=120 * MINUTE).contains(&w3));
            let w4 = wait_secs(4, &mut rng);
            assert!((120 * MINUTE..=240 * MINUTE).contains(&w4));
            let w5 = wait_secs(5, &mut rng);
            assert!((240 * MINUTE..=480 * MINUTE).contains(&w5));
        }
    }

    #[test]
    fn backoff_pins_at_eight_hours() {
        let mut rng = rand::rng();
        assert_eq!(wait_secs(6, &mut rng), 480 * MINUTE);
        assert_eq!(wait_secs(100, &mut rng), 480 * MINUTE);
    }
}
