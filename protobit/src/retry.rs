use std::time::Duration;

/// Runs `op` up to `attempts` times, sleeping `delay` between tries, as long as `should_retry`
/// accepts the error. `op` receives the zero-based attempt number.
pub fn retry_with_delay<T, E, F, P>(attempts: usize, delay: Duration, should_retry: P, mut op: F) -> Result<T, E>
where
    F: FnMut(usize) -> Result<T, E>,
    P: Fn(&E) -> bool,
{
    assert!(attempts >= 1);
    let mut attempt = 0;
    loop {
        match op(attempt) {
            Ok(v) => return Ok(v),
            Err(e) if attempt + 1 < attempts && should_retry(&e) => {
                attempt += 1;
                std::thread::sleep(delay);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::time::Instant;

    // 1) Immediate success: should not retry.
    #[test]
    fn retry_immediate_success() {
        let calls = Cell::new(0);
        let out: Result<i32, &str> = retry_with_delay(5, Duration::from_secs(1), |_| true, |_| {
            calls.set(calls.get() + 1);
            Ok(42)
        });
        assert_eq!(out.unwrap(), 42);
        assert_eq!(calls.get(), 1, "must not retry on success");
    }

    // 2) Succeeds after 2 failures: exactly 3 calls, attempt numbers 0, 1, 2.
    #[test]
    fn retry_succeeds_after_two_failures() {
        let seen = std::cell::RefCell::new(Vec::new());
        let res: Result<i32, &str> = retry_with_delay(3, Duration::from_millis(1), |_| true, |attempt| {
            seen.borrow_mut().push(attempt);
            if attempt < 2 { Err("not yet") } else { Ok(7) }
        });
        assert_eq!(res.unwrap(), 7);
        assert_eq!(*seen.borrow(), vec![0, 1, 2]);
    }

    // 3) All attempts fail: returns the *last* error.
    #[test]
    fn retry_all_fail_propagates_last_error() {
        let err = retry_with_delay::<(), _, _, _>(3, Duration::ZERO, |_| true, |attempt| {
            Err(match attempt {
                0 => "e1",
                1 => "e2",
                _ => "e3",
            })
        })
        .unwrap_err();
        assert_eq!(err, "e3");
    }

    // 4) attempts == 0 should panic due to the assert! guard.
    #[test]
    #[should_panic]
    fn retry_zero_attempts_panics() {
        let _ = retry_with_delay::<(), (), _, _>(0, Duration::ZERO, |_| true, |_| Ok(()));
    }

    // 5) Errors the predicate rejects are returned without retrying.
    #[test]
    fn retry_stops_on_non_retryable_error() {
        let calls = Cell::new(0);
        let res: Result<(), &str> = retry_with_delay(5, Duration::ZERO, |e| *e == "gone away", |_| {
            calls.set(calls.get() + 1);
            Err("syntax error")
        });
        assert_eq!(res.unwrap_err(), "syntax error");
        assert_eq!(calls.get(), 1);
    }

    // 6) Sleeps between attempts, attempts-1 times.
    #[test]
    fn retry_sleeps_between_attempts() {
        let delay = Duration::from_millis(20);
        let started = Instant::now();
        let _: Result<(), &str> = retry_with_delay(3, delay, |_| true, |_| Err("x"));
        assert!(started.elapsed() >= delay * 2);
    }
}
