use std::thread;
use std::time::Duration;

use log::debug;
use rand::Rng;

use crate::run_loop::StopSignal;

/// Uniform random pause in `[min, max]`. A degenerate range yields `min`.
pub fn pick_delay(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let mut rng = rand::thread_rng();
    Duration::from_secs_f64(rng.gen_range(min.as_secs_f64()..=max.as_secs_f64()))
}

/// Human-like pause between profile requests. Returns false when the stop
/// signal fired during the wait.
pub fn pause_between_requests(min: Duration, max: Duration, stop: &StopSignal) -> bool {
    let delay = pick_delay(min, max);
    debug!("Waiting {:.1}s before next request...", delay.as_secs_f64());
    sleep_with_stop(delay, stop)
}

/// Sleep in short slices so an external stop is honoured promptly.
/// Returns false when interrupted.
pub fn sleep_with_stop(total: Duration, stop: &StopSignal) -> bool {
    const SLICE: Duration = Duration::from_millis(500);
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if stop.is_stopped() {
            return false;
        }
        let chunk = remaining.min(SLICE);
        thread::sleep(chunk);
        remaining -= chunk;
    }
    !stop.is_stopped()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_stay_within_the_configured_bounds() {
        let min = Duration::from_millis(100);
        let max = Duration::from_millis(300);
        for _ in 0..100 {
            let delay = pick_delay(min, max);
            assert!(delay >= min, "delay {delay:?} below minimum");
            assert!(delay <= max, "delay {delay:?} above maximum");
        }
    }

    #[test]
    fn degenerate_range_yields_min() {
        let d = Duration::from_millis(250);
        assert_eq!(pick_delay(d, d), d);
        assert_eq!(pick_delay(d, Duration::from_millis(100)), d);
    }

    #[test]
    fn triggered_stop_interrupts_the_sleep() {
        let stop = StopSignal::new();
        stop.trigger();
        assert!(!sleep_with_stop(Duration::from_secs(60), &stop));
    }

    #[test]
    fn sleep_completes_when_not_stopped() {
        let stop = StopSignal::new();
        assert!(sleep_with_stop(Duration::from_millis(10), &stop));
    }
}
