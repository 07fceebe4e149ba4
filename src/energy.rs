//! Energy margin tracker.
//!
//! The tracker keeps the most recent power reading of every registered switch and compares the
//! consumption since that reading against the share of the forecast budget for the elapsed time.
//! The resulting *real flex* is negative when the switch drew more than its share.

use std::{collections::HashMap, time::Duration};

use log::trace;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::{
    algorithms::{NodeId, Topology},
    error::Error,
    forecast::{bucket_index, ForecastSource, BUCKET_LENGTH},
    telemetry::Telemetry,
};

/// How consecutive readings are turned into a consumption delta.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PollStrategy {
    /// Compare the live reading against the last polled one, and prorate the budget to the time
    /// elapsed since that poll.
    ForecastNormalized,
    /// Like [`PollStrategy::ForecastNormalized`], but a query in the same time step as the last
    /// poll reports the delta between the last two polls, against the budget share of the time
    /// between them. Without such a window, a fifth of the bucket budget is used.
    #[default]
    PerFlowRead,
}

/// Power readings of a single switch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Accumulated draw at the last poll
    pub current: f64,
    /// Accumulated draw at the poll before
    pub last: f64,
    /// Time of the last poll
    pub time: Duration,
    /// Time of the poll before
    pub prev_time: Duration,
}

/// Per-switch energy samples, keyed by datapath id.
#[derive(Debug, Clone, Default)]
pub struct EnergyTracker {
    strategy: PollStrategy,
    samples: HashMap<u64, Sample>,
}

impl EnergyTracker {
    /// Create a tracker without any samples.
    pub fn new(strategy: PollStrategy) -> Self {
        Self {
            strategy,
            samples: HashMap::new(),
        }
    }

    /// The configured strategy
    pub fn strategy(&self) -> PollStrategy {
        self.strategy
    }

    /// Record the initial sample of a switch. Registering a switch twice resets its sample.
    pub fn register(&mut self, dpid: u64, draw: f64, now: Duration) {
        self.samples.insert(
            dpid,
            Sample {
                current: draw,
                last: draw,
                time: now,
                prev_time: now,
            },
        );
    }

    /// Returns `true` if the switch has a sample.
    pub fn is_registered(&self, dpid: u64) -> bool {
        self.samples.contains_key(&dpid)
    }

    /// Get the sample of a switch.
    pub fn sample(&self, dpid: u64) -> Option<&Sample> {
        self.samples.get(&dpid)
    }

    /// Record a new reading. The previous reading becomes the `last` one, unless it was taken at
    /// the same time, in which case only the current reading is updated.
    pub fn refresh(&mut self, dpid: u64, draw: f64, now: Duration) -> Result<(), Error> {
        let s = self
            .samples
            .get_mut(&dpid)
            .ok_or(Error::NotInitialized(dpid))?;
        if now == s.time {
            s.current = draw;
        } else {
            *s = Sample {
                current: draw,
                last: s.current,
                time: now,
                prev_time: s.time,
            };
        }
        Ok(())
    }

    /// Refresh every registered switch of the topology from the telemetry. Switches that did not
    /// connect yet are skipped.
    pub fn refresh_from(&mut self, topo: &Topology, telemetry: &dyn Telemetry, now: Duration) {
        for n in topo.switches() {
            let Some(dpid) = topo.dpid(n) else { continue };
            if self.refresh(dpid, telemetry.power_drawn(n), now).is_err() {
                trace!("Skip energy sample of unregistered switch {}", topo.name(n));
            }
        }
    }

    /// Compute the real flex of a switch, given its live accumulated draw and the budget of the
    /// current bucket.
    pub fn real_flex(&self, dpid: u64, live: f64, budget: f64, now: Duration) -> Result<f64, Error> {
        let s = self.samples.get(&dpid).ok_or(Error::NotInitialized(dpid))?;
        let elapsed = now.saturating_sub(s.time);
        if self.strategy == PollStrategy::PerFlowRead && elapsed.is_zero() {
            let window = s.time.saturating_sub(s.prev_time);
            if window.is_zero() {
                return Ok(budget / 5.0 - (s.current - s.last));
            }
            return Ok(budget * share(window) - (s.current - s.last));
        }
        Ok(budget * share(elapsed) - (live - s.current))
    }

    /// Compute the real flex of switch node `n`: look up its budget for the bucket of `now` and
    /// its live draw.
    pub fn margin(
        &self,
        topo: &Topology,
        n: NodeId,
        telemetry: &dyn Telemetry,
        forecast: &dyn ForecastSource,
        now: Duration,
    ) -> Result<f64, Error> {
        let switch = topo.switch(n).ok_or(Error::UnknownNode(n))?;
        if !self.is_registered(switch.dpid) {
            return Err(Error::NotInitialized(switch.dpid));
        }
        let budget = forecast.budget(&switch.name, bucket_index(now))?;
        self.real_flex(switch.dpid, telemetry.power_drawn(n), budget, now)
    }

    /// Drop all samples.
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Fraction of a bucket covered by `d`, in whole seconds.
fn share(d: Duration) -> f64 {
    d.as_secs() as f64 / BUCKET_LENGTH.as_secs() as f64
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use approx::assert_relative_eq;
    use strum::IntoEnumIterator;

    use super::*;
    use crate::{flow::MacAddr, forecast::ForecastTable, telemetry::StaticTelemetry};

    const T0: Duration = Duration::from_secs(3600);
    const T1: Duration = Duration::from_secs(3600 + 900);

    #[test]
    fn margin_within_and_over_budget() {
        for strategy in PollStrategy::iter() {
            let mut e = EnergyTracker::new(strategy);
            e.register(1, 1000.0, T0);
            assert_relative_eq!(e.real_flex(1, 1040.0, 100.0, T1).unwrap(), 60.0);
            assert_relative_eq!(e.real_flex(1, 1140.0, 100.0, T1).unwrap(), -40.0);
        }
    }

    #[test]
    fn budget_is_prorated() {
        let mut e = EnergyTracker::new(PollStrategy::ForecastNormalized);
        e.register(1, 0.0, T0);
        let half = T0 + Duration::from_millis(450_900);
        assert_relative_eq!(e.real_flex(1, 10.0, 100.0, half).unwrap(), 40.0);
        // no time elapsed: no share of the budget
        assert_relative_eq!(e.real_flex(1, 10.0, 100.0, T0).unwrap(), -10.0);
    }

    #[test]
    fn per_flow_read_same_step() {
        let mut e = EnergyTracker::new(PollStrategy::PerFlowRead);
        e.register(1, 100.0, T0);
        // nothing to compare yet: a fifth of the budget
        assert_relative_eq!(e.real_flex(1, 999.0, 100.0, T0).unwrap(), 20.0);

        let t = T0 + Duration::from_secs(180);
        e.refresh(1, 130.0, t).unwrap();
        assert_eq!(
            *e.sample(1).unwrap(),
            Sample {
                current: 130.0,
                last: 100.0,
                time: t,
                prev_time: T0,
            }
        );
        // the live reading is ignored within the same step
        assert_relative_eq!(e.real_flex(1, 999.0, 100.0, t).unwrap(), -10.0);
        assert_relative_eq!(e.real_flex(1, 150.0, 100.0, t + T1 - T0).unwrap(), 80.0);
    }

    #[test]
    fn per_flow_read_window_follows_polls() {
        let mut e = EnergyTracker::new(PollStrategy::PerFlowRead);
        e.register(1, 0.0, T0);
        let ten = Duration::from_secs(10);
        // 1 unit per second against a budget of 100 per bucket
        for i in 1..=18 {
            e.refresh(1, 10.0 * i as f64, T0 + ten * i).unwrap();
        }
        let now = T0 + ten * 18;
        assert_relative_eq!(e.real_flex(1, 0.0, 100.0, now).unwrap(), 100.0 / 90.0 - 10.0);

        // a second reading at the same time only updates the current one
        e.refresh(1, 185.0, now).unwrap();
        let s = *e.sample(1).unwrap();
        assert_eq!((s.last, s.time, s.prev_time), (170.0, now, now - ten));
        assert_relative_eq!(e.real_flex(1, 0.0, 100.0, now).unwrap(), 100.0 / 90.0 - 15.0);
    }

    #[test]
    fn not_initialized() {
        let mut e = EnergyTracker::default();
        assert!(matches!(e.real_flex(7, 0.0, 1.0, T0), Err(Error::NotInitialized(7))));
        assert!(matches!(e.refresh(7, 0.0, T0), Err(Error::NotInitialized(7))));
        e.register(7, 0.0, T0);
        assert!(e.is_registered(7));
        e.clear();
        assert!(!e.is_registered(7));
    }

    #[test]
    fn margin_from_topology() {
        let mut topo = Topology::new();
        let h = topo.add_host("h", None, MacAddr::from(1));
        let s0 = topo.add_switch("s0", 1);
        let s1 = topo.add_switch("s1", 2);
        topo.add_links_from([(h, s0), (s0, s1)]);

        let mut forecast = ForecastTable::new();
        forecast.insert_constant("s0", 60.0, 40.0);
        let mut telemetry = StaticTelemetry::default();
        telemetry.set_power(s0, 40.0).set_power(s1, 5.0);

        let mut e = EnergyTracker::new(PollStrategy::ForecastNormalized);
        e.register(1, 0.0, Duration::ZERO);
        let now = Duration::from_secs(900);

        assert_relative_eq!(e.margin(&topo, s0, &telemetry, &forecast, now).unwrap(), 60.0);
        assert!(matches!(
            e.margin(&topo, s1, &telemetry, &forecast, now),
            Err(Error::NotInitialized(2))
        ));
        e.register(2, 0.0, Duration::ZERO);
        assert!(matches!(
            e.margin(&topo, s1, &telemetry, &forecast, now),
            Err(Error::MissingForecast { .. })
        ));
        assert!(matches!(
            e.margin(&topo, h, &telemetry, &forecast, now),
            Err(Error::UnknownNode(_))
        ));

        e.refresh_from(&topo, &telemetry, now);
        assert_eq!(e.sample(1).unwrap().current, 40.0);
        assert_eq!(e.sample(2).unwrap().current, 5.0);
    }

    #[test]
    fn strategy_names() {
        assert_eq!(PollStrategy::from_str("per_flow_read").unwrap(), PollStrategy::PerFlowRead);
        assert_eq!(PollStrategy::ForecastNormalized.to_string(), "forecast_normalized");
    }
}
