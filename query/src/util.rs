use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::instant::Instant;

#[cfg(any(feature = "hydrate", feature = "csr"))]
use leptos::{leptos_dom::helpers::TimeoutHandle, prelude::*};

#[cfg(any(feature = "hydrate", feature = "csr"))]
pub(crate) fn use_timeout(func: impl Fn() -> Option<TimeoutHandle> + 'static) {
    let timeout: Arc<Mutex<Option<TimeoutHandle>>> = Arc::new(Mutex::new(None));
    let clean_up = {
        let timeout = timeout.clone();
        move || {
            let mut timeout = timeout.lock().unwrap();
            if let Some(handle) = timeout.take() {
                handle.clear();
            }
        }
    };

    on_cleanup(clean_up);

    Effect::new(move |_| {
        let mut timeout = timeout.lock().unwrap();
        if let Some(handle) = timeout.take() {
            handle.clear();
        }

        let result = func();
        *timeout = result;

        result
    });
}

/// Time remaining before `updated_at + stale_time` is reached, clamped to zero.
pub(crate) fn time_until_stale(updated_at: Instant, stale_time: Duration) -> Duration {
    let updated_at = updated_at.as_millis() as i64;
    let now = Instant::now().as_millis() as i64;
    let stale_time = stale_time.as_millis() as i64;
    let result = (updated_at + stale_time) - now;
    Duration::from_millis(result.max(0) as u64)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stale_time_in_the_future_is_nonzero() {
        let now = Instant::now();
        let remaining = time_until_stale(now, Duration::from_secs(10));
        assert!(remaining > Duration::ZERO);
        assert!(remaining <= Duration::from_secs(10));
    }

    #[test]
    fn stale_time_in_the_past_is_zero() {
        let past = Instant::from_millis(0);
        let remaining = time_until_stale(past, Duration::from_secs(10));
        assert_eq!(remaining, Duration::ZERO);
    }
}
