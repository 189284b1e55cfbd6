use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use leptos::{leptos_dom::helpers::TimeoutHandle, prelude::{on_cleanup, Effect}};
use leptos_norm_query::Instant;

/// Re-arms a single timeout every time `func` is re-run, clearing whatever
/// was pending first. `func` returns the handle for the timeout it just
/// scheduled (if any), so this has nothing to track beyond that handle.
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

pub fn time_until_stale(updated_at: Instant, stale_time: Duration) -> Duration {
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
    fn time_until_stale_is_zero_once_elapsed() {
        let updated_at = Instant::from_millis(0);
        assert_eq!(
            time_until_stale(updated_at, Duration::from_millis(1)),
            Duration::from_millis(0)
        );
    }
}
