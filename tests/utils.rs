use sni_proxy::utils::{BackoffCounter, exponential_backoff};
use std::time::Duration;

const BASE: Duration = Duration::from_millis(10);
const MAX: Duration = Duration::from_secs(5);

#[test]
fn test_exponential_backoff_doubles() {
    assert_eq!(exponential_backoff(0, BASE, MAX), Duration::from_millis(10));
    assert_eq!(exponential_backoff(1, BASE, MAX), Duration::from_millis(20));
    assert_eq!(exponential_backoff(2, BASE, MAX), Duration::from_millis(40));
    assert_eq!(exponential_backoff(5, BASE, MAX), Duration::from_millis(320));
}

#[test]
fn test_exponential_backoff_capped_by_max() {
    assert_eq!(exponential_backoff(9, BASE, MAX), MAX);
    assert_eq!(
        exponential_backoff(3, BASE, Duration::from_millis(50)),
        Duration::from_millis(50)
    );
}

#[test]
fn test_exponential_backoff_exponent_saturates() {
    let max = Duration::from_secs(3600);
    let at_cap = exponential_backoff(10, BASE, max);
    assert_eq!(at_cap, Duration::from_millis(10240));
    assert_eq!(exponential_backoff(11, BASE, max), at_cap);
    assert_eq!(exponential_backoff(u32::MAX, BASE, max), at_cap);
}

#[test]
fn test_backoff_counter_sequence() {
    let counter = BackoffCounter::new();
    assert_eq!(counter.attempts(), 0);
    assert_eq!(counter.next_delay(BASE, MAX), Duration::from_millis(10));
    assert_eq!(counter.next_delay(BASE, MAX), Duration::from_millis(20));
    assert_eq!(counter.next_delay(BASE, MAX), Duration::from_millis(40));
    assert_eq!(counter.attempts(), 3);
}

#[test]
fn test_backoff_counter_stays_at_cap() {
    let counter = BackoffCounter::default();
    for _ in 0..20 {
        counter.next_delay(BASE, MAX);
    }
    assert_eq!(counter.attempts(), 10);
    assert_eq!(counter.next_delay(BASE, MAX), MAX);
}

#[test]
fn test_backoff_counter_reset() {
    let counter = BackoffCounter::new();
    counter.next_delay(BASE, MAX);
    counter.next_delay(BASE, MAX);
    counter.reset();
    assert_eq!(counter.attempts(), 0);
    assert_eq!(counter.next_delay(BASE, MAX), BASE);
}
