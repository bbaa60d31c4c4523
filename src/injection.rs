//! Injection profiles: when virtual users start.
//!
//! A profile is an ordered list of [`Injection`] directives. Directives run in
//! declared order; each one starts where the previous one ended, so the
//! resulting start offsets never decrease.
//!
//! # Directives
//! - `at_once(n)`: n users at the current offset.
//! - `ramp(n, d)`: n users spread evenly over `d`; user `i` starts at
//!   `offset + d * i / n`. The offset then moves by `d`.
//! - `nothing_for(d)`: moves the offset by `d`.
//! - `constant_rate(r, d)` / `ramp_rate(r0, r1, d)`: users arrive at a rate
//!   (users per second) that is linearly interpolated across `d`.
//!
//! # Arrival-rate math
//! Rate directives are discretized in ticks of [`ARRIVAL_TICK`]. For the tick
//! starting at `elapsed`, the instantaneous rate is sampled at the middle of the
//! tick:
//!
//! ```text
//! t = elapsed / duration
//! r(t) = start_rate + (end_rate - start_rate) * t
//! add_f = r(t) * tick_seconds
//! add_total = floor(add_f + fractional)
//! fractional = (add_f + fractional) - add_total
//! ```
//!
//! `add_total` users are spaced evenly inside the tick. Carrying `fractional`
//! across ticks keeps the long-run number of arrivals unbiased even when a tick
//! holds less than one user.

use std::time::Duration;

use internals::*;

/// Granularity of rate-based arrivals.
pub const ARRIVAL_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Injection {
    AtOnce { users: usize },
    Ramp { users: usize, during: Duration },
    NothingFor(Duration),
    /// Users per second, interpolated from `from` to `to`.
    Rate { from: f64, to: f64, during: Duration },
}

impl Injection {
    pub fn at_once(users: usize) -> Self {
        Self::AtOnce { users }
    }

    pub fn ramp(users: usize, during: Duration) -> Self {
        Self::Ramp { users, during }
    }

    pub fn nothing_for(during: Duration) -> Self {
        Self::NothingFor(during)
    }

    pub fn constant_rate(rate: f64, during: Duration) -> Self {
        Self::Rate {
            from: rate,
            to: rate,
            during,
        }
    }

    pub fn ramp_rate(from: f64, to: f64, during: Duration) -> Self {
        Self::Rate { from, to, during }
    }

    /// How far this directive moves the offset of the next one.
    fn span(&self) -> Duration {
        match self {
            Self::AtOnce { .. } => Duration::ZERO,
            Self::Ramp { during, .. } | Self::Rate { during, .. } => *during,
            Self::NothingFor(during) => *during,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InjectionProfile {
    steps: Vec<Injection>,
}

impl InjectionProfile {
    pub fn new(steps: Vec<Injection>) -> Self {
        Self { steps }
    }

    pub fn then(mut self, step: Injection) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(&self) -> &[Injection] {
        &self.steps
    }

    /// Time at which the last directive ends.
    pub fn duration(&self) -> Duration {
        self.steps.iter().map(Injection::span).sum()
    }

    /// Start offset of every user, relative to the beginning of the run.
    pub fn schedule(&self) -> Vec<Duration> {
        let mut starts = Vec::new();
        let mut offset = Duration::ZERO;

        for step in &self.steps {
            match *step {
                Injection::AtOnce { users } => {
                    starts.extend(std::iter::repeat_n(offset, users));
                }
                Injection::Ramp { users, during } => {
                    starts.extend((0..users).map(|i| offset + spread(during, i, users)));
                }
                Injection::NothingFor(_) => {}
                Injection::Rate { from, to, during } => {
                    rate_arrivals(&mut starts, offset, from, to, during);
                }
            }
            offset += step.span();
        }
        starts
    }
}

impl From<Vec<Injection>> for InjectionProfile {
    fn from(steps: Vec<Injection>) -> Self {
        Self::new(steps)
    }
}

/// `during * i / n`, exact in nanoseconds.
fn spread(during: Duration, i: usize, n: usize) -> Duration {
    if n == 0 {
        return Duration::ZERO;
    }
    let nanos = during.as_nanos() * i as u128 / n as u128;
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

fn rate_arrivals(starts: &mut Vec<Duration>, offset: Duration, from: f64, to: f64, during: Duration) {
    if during.is_zero() {
        return;
    }
    let mut fractional = 0.0;
    let mut elapsed = Duration::ZERO;
    while elapsed < during {
        let tick = ARRIVAL_TICK.min(during - elapsed);
        let (arrivals, f) = calc_arrivals(elapsed + tick / 2, during, from, to, fractional, tick);
        fractional = f;
        starts.extend((0..arrivals).map(|i| offset + elapsed + spread(tick, i, arrivals)));
        elapsed += tick;
    }
}

#[cfg(feature = "internals")]
pub use internals::*;

mod internals {
    use super::*;

    /// The arrival count is capped to keep a runaway rate from allocating
    /// an absurd schedule.
    pub const MAX_ARRIVALS_PER_TICK: usize = 1 << 20;

    /// Pure function computing how many users arrive in one tick.
    ///
    /// Linearly interpolates the rate at `elapsed` and carries the fractional
    /// part over to the next tick.
    ///
    /// Returns `(arrivals, next_fractional_part)`.
    pub fn calc_arrivals(
        elapsed: Duration,
        stage_duration: Duration,
        start_rate: f64,
        end_rate: f64,
        fractional: f64,
        tick: Duration,
    ) -> (usize, f64) {
        // Interpolation factor [0.0..1.0]
        let t = (elapsed.as_secs_f64() / stage_duration.as_secs_f64()).min(1.0);
        let tick_rate = start_rate + (end_rate - start_rate) * t;
        let add_f = tick_rate * tick.as_secs_f64();

        let add_total_f = (add_f + fractional).floor();
        let fractional = (add_f + fractional) - add_total_f;

        let add_total = if add_total_f >= MAX_ARRIVALS_PER_TICK as f64 {
            MAX_ARRIVALS_PER_TICK
        } else if add_total_f < 0.0 {
            0
        } else {
            add_total_f as usize
        };

        (add_total, fractional)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn assert_non_decreasing(starts: &[Duration]) {
        assert!(starts.windows(2).all(|w| w[0] <= w[1]), "{starts:?}");
    }

    #[test]
    fn ramp_spaces_users_evenly() {
        let profile = InjectionProfile::new(vec![Injection::ramp(5, secs(10))]);
        assert_eq!(profile.schedule(), [0, 2, 4, 6, 8].map(secs));
    }

    #[test]
    fn nothing_for_shifts_what_follows() {
        let profile = InjectionProfile::new(vec![
            Injection::nothing_for(secs(1)),
            Injection::ramp(5, secs(10)),
        ]);
        assert_eq!(profile.schedule(), [1, 3, 5, 7, 9].map(secs));
        assert_eq!(profile.duration(), secs(11));
    }

    #[test]
    fn at_once_then_ramp() {
        let profile = InjectionProfile::default()
            .then(Injection::at_once(3))
            .then(Injection::ramp(2, secs(4)));
        assert_eq!(profile.schedule(), [0, 0, 0, 0, 2].map(secs));
    }

    #[test]
    fn ramp_starts_stay_inside_the_window() {
        for users in [1, 2, 3, 7, 100, 1001] {
            for during in [Duration::ZERO, Duration::from_millis(1), secs(3), secs(60)] {
                let starts = InjectionProfile::new(vec![Injection::ramp(users, during)]).schedule();
                assert_eq!(starts.len(), users);
                assert_eq!(starts[0], Duration::ZERO);
                assert!(starts.iter().all(|s| *s <= during));
                assert_non_decreasing(&starts);

                if users > 1 && !during.is_zero() {
                    let gaps: Vec<_> = starts.windows(2).map(|w| w[1] - w[0]).collect();
                    let (min, max) = (gaps.iter().min().unwrap(), gaps.iter().max().unwrap());
                    assert!(*max - *min <= Duration::from_nanos(1));
                }
            }
        }
    }

    #[test]
    fn constant_rate_arrivals() {
        let starts = InjectionProfile::new(vec![
            Injection::nothing_for(secs(1)),
            Injection::constant_rate(10.0, secs(2)),
        ])
        .schedule();
        assert!((19..=20).contains(&starts.len()), "{}", starts.len());
        assert!(starts.iter().all(|s| *s >= secs(1) && *s < secs(3)));
        assert_non_decreasing(&starts);
    }

    #[test]
    fn ramp_rate_arrivals_follow_the_area_under_the_ramp() {
        // 0 -> 10 users/s over 10s is 50 users
        let starts = InjectionProfile::new(vec![Injection::ramp_rate(0.0, 10.0, secs(10))]).schedule();
        assert!((49..=50).contains(&starts.len()), "{}", starts.len());
        assert_non_decreasing(&starts);
        let first_half = starts.iter().filter(|s| **s < secs(5)).count();
        assert!(first_half < starts.len() / 2);
    }

    mod calc_arrivals {
        use super::*;

        #[test]
        fn linearity() {
            let mut end_rate = 100.;
            let mut expected = 1;
            for _ in 0..10 {
                let (n, f) = calc_arrivals(
                    secs(1),
                    secs(10),
                    0.,
                    end_rate,
                    0.,
                    Duration::from_millis(100),
                );
                assert_eq!(n, expected.min(MAX_ARRIVALS_PER_TICK));
                if expected < MAX_ARRIVALS_PER_TICK {
                    // powers of ten never leave a fractional carry
                    assert_eq!(f, 0.);
                }
                end_rate *= 10.;
                expected *= 10;
            }
        }

        #[test]
        fn fractional_accumulation() {
            let mut carry = 0.;
            let expected_fs = [0.25, 0.5, 0.75, 0.];

            for i in 0..10 {
                let (n, f) = calc_arrivals(
                    secs(1),
                    secs(10),
                    12.5,
                    12.5,
                    carry,
                    Duration::from_millis(100),
                );
                carry = f;

                let expected_f = expected_fs[i % 4];
                let expected_n = if expected_f == 0. { 2 } else { 1 };
                assert_eq!(n, expected_n);
                assert_eq!(f, expected_f);
            }
        }

        #[test]
        fn ramp_down() {
            let tick = Duration::from_millis(100);
            for i in 0..10 {
                let (n, f) = calc_arrivals(secs(i), secs(10), 100.0, 0.0, 0.0, tick);
                assert_eq!(n, (10 - i) as usize);
                assert_eq!(f, 0.0);
            }
            let (n, f) = calc_arrivals(secs(10), secs(10), 100.0, 0.0, 0.0, tick);
            assert_eq!((n, f), (0, 0.0));
        }

        #[test]
        fn hold_steady() {
            for i in 0..10 {
                let (n, f) =
                    calc_arrivals(secs(i), secs(10), 100., 100., 0.0, Duration::from_millis(100));
                assert_eq!(n, 10);
                assert_eq!(f, 0.0);
            }
        }

        #[test]
        fn elapsed_past_duration_caps_at_end_rate() {
            for i in 0..10 {
                let (n, f) =
                    calc_arrivals(secs(10 + i), secs(10), 0., 100., 0., Duration::from_millis(100));
                assert_eq!(n, 10);
                assert_eq!(f, 0.);
            }
        }

        #[test]
        fn negative_rate_yields_no_arrivals() {
            let (n, _) =
                calc_arrivals(secs(1), secs(10), -100., -100., 0., Duration::from_millis(100));
            assert_eq!(n, 0);
        }

        #[test]
        fn extreme_rate_is_capped() {
            let (n, _) = calc_arrivals(secs(1), secs(1), f64::MAX, f64::MAX, 0., secs(1));
            assert_eq!(n, MAX_ARRIVALS_PER_TICK);
        }
    }
}
