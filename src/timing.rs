use super::Error;
use exec::{Event, Events};
use std::time::{Duration, Instant};

/// Wall clock and device time of one kernel invocation in nanoseconds.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Times {
    pub overall: f64,
    pub event: f64,
}

/// Device execution time of one completed command.
///
/// Commands without profiling information count as zero.
#[must_use]
pub fn time_event(event: &Event) -> u64 {
    event
        .profiling()
        .map_or(0, |profiling| profiling.elapsed_nanos())
}

/// Aggregate device time over every handle of an operation.
pub fn time_events<'a>(events: impl IntoIterator<Item = &'a Event>) -> u64 {
    events.into_iter().map(time_event).sum()
}

/// Time a closure that enqueues device work and waits for it.
///
/// The wall clock spans the whole closure, so it includes host dispatch
/// and the wait for completion. Device time is the sum over all handles
/// the closure returns.
pub fn timef<F>(mut f: F) -> Result<Times, Error>
where
    F: FnMut() -> Result<Events, Error>,
{
    let start = Instant::now();
    let events = f()?;
    let overall = start.elapsed();
    Ok(Times {
        overall: overall.as_nanos() as f64,
        event: time_events(&events) as f64,
    })
}

/// Harness clock that can be paused to exclude bookkeeping.
#[derive(Debug, Default, Clone)]
pub struct Stopwatch {
    elapsed: Duration,
    running_since: Option<Instant>,
}

impl Stopwatch {
    #[must_use]
    pub fn start() -> Self {
        Self {
            elapsed: Duration::ZERO,
            running_since: Some(Instant::now()),
        }
    }

    pub fn pause(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.elapsed += since.elapsed();
        }
    }

    pub fn resume(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    /// Time accumulated while running.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
            + self
                .running_since
                .map_or(Duration::ZERO, |since| since.elapsed())
    }

    /// Run `f` with the stopwatch paused.
    pub fn paused<R>(&mut self, f: impl FnOnce() -> R) -> R {
        let was_running = self.is_running();
        self.pause();
        let result = f();
        if was_running {
            self.resume();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::{Stopwatch, Times};
    use color_eyre::eyre;
    use exec::{Device, Events, Properties};
    use std::time::Duration;

    #[test]
    fn sums_all_events() -> eyre::Result<()> {
        crate::tests::init_test();
        let device = Device::new(Properties {
            compute_units: 1,
            ..Properties::host()
        })?;
        let times = super::timef(|| {
            let events: Events = (0..3)
                .map(|_| {
                    device.launch("sleep", || {
                        std::thread::sleep(Duration::from_millis(2));
                        Ok(())
                    })
                })
                .collect::<Result<_, _>>()?;
            device.wait(&events)?;
            Ok(events)
        })?;
        assert!(times.event >= 6e6, "device time {} misses events", times.event);
        assert!(times.overall >= times.event);
        Ok(())
    }

    #[test]
    fn device_time_bounded_by_wall_time() -> eyre::Result<()> {
        crate::tests::init_test();
        let device = Device::host()?;
        let samples = 200;
        let mut total = Times::default();
        for _ in 0..samples {
            let times = super::timef(|| {
                let event = device.launch("noop", || {
                    std::hint::black_box((0..64).sum::<u64>());
                    Ok(())
                })?;
                device.wait([&event])?;
                Ok(Events::from_iter([event]))
            })?;
            assert!(times.event >= 0.0 && times.overall >= 0.0);
            total.event += times.event;
            total.overall += times.overall;
        }
        let avg_event = total.event / f64::from(samples);
        let avg_overall = total.overall / f64::from(samples);
        assert!(
            avg_event <= avg_overall,
            "average device time {avg_event}ns exceeds wall time {avg_overall}ns"
        );
        Ok(())
    }

    #[test]
    fn failing_closure_propagates() {
        let result = super::timef(|| Err(exec::Error::QueueClosed.into()));
        assert!(matches!(
            result,
            Err(crate::Error::Device(exec::Error::QueueClosed))
        ));
    }

    #[test]
    fn paused_stopwatch_excludes_time() {
        let mut watch = Stopwatch::start();
        watch.paused(|| std::thread::sleep(Duration::from_millis(50)));
        assert!(watch.is_running());
        assert!(watch.elapsed() < Duration::from_millis(50));

        watch.pause();
        let frozen = watch.elapsed();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(watch.elapsed(), frozen);
        watch.resume();
        std::thread::sleep(Duration::from_millis(5));
        assert!(watch.elapsed() >= frozen + Duration::from_millis(5));
    }
}
