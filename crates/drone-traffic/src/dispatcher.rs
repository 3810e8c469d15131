//! Dispatcher: owner of the simulated clock and relay of waypoints.
//!
//! The dispatcher loop is the only writer of the clock. Every sample interval
//! of real time it moves the clock forward one simulated second per elapsed
//! interval and offers each drone its next pending waypoint. Drones see the
//! dispatcher only through [`ControlCenter`], the [`DispatchLink`] it hands
//! them.

use crate::agent::{Agent, AgentHandle, AgentReport, AgentSettings, ShutdownToken};
use crate::clock::SimClock;
use crate::config::SimConfig;
use crate::error::{Result, SimError};
use crate::link::{DispatchLink, TrafficReport};
use chrono::NaiveTime;
use drone_domain::{DroneId, PointOfInterest, Position, TrafficCondition, Waypoint};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, info, warn};

/// Shared state the drones call back into: the clock, the fleet roster and
/// the report log.
#[derive(Debug)]
pub struct ControlCenter {
    clock: SimClock,
    agents: BTreeMap<DroneId, AgentHandle>,
    reports: Mutex<Vec<TrafficReport>>,
}

impl ControlCenter {
    fn new(start: NaiveTime, agents: BTreeMap<DroneId, AgentHandle>) -> Self {
        Self {
            clock: SimClock::new(start),
            agents,
            reports: Mutex::new(Vec::new()),
        }
    }

    pub fn agent(&self, id: DroneId) -> Option<&AgentHandle> {
        self.agents.get(&id)
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentHandle> {
        self.agents.values()
    }

    /// Copy of every report filed so far, in arrival order.
    pub fn reports(&self) -> Vec<TrafficReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DispatchLink for ControlCenter {
    fn time(&self) -> NaiveTime {
        self.clock.now()
    }

    fn report_traffic(&self, drone_id: DroneId, station: &str, condition: TrafficCondition) {
        let speed_mps = self.agents.get(&drone_id).map_or(0.0, AgentHandle::speed);
        let time = self.clock.now();

        info!(
            drone_id = %drone_id,
            station,
            condition = %condition,
            "Dispatcher is reporting traffic: {}, {}, {:.2}, {}",
            drone_id,
            time,
            speed_mps,
            condition
        );

        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(TrafficReport {
                drone_id,
                station: station.to_string(),
                condition,
                speed_mps,
                time,
            });
    }
}

/// Why the dispatcher loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    /// The clock reached the configured end time.
    EndOfSimulation,
    /// Every drone had stopped on its own before the end time.
    FleetStopped,
}

#[derive(Debug, Clone, Copy)]
struct DispatchOutcome {
    reason: StopReason,
    stopped_at: NaiveTime,
}

/// Result of a finished simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSummary {
    pub started_at: NaiveTime,
    pub stopped_at: NaiveTime,
    pub stop_reason: StopReason,
    pub agents: Vec<AgentReport>,
    pub reports: Vec<TrafficReport>,
}

impl SimulationSummary {
    pub fn agent(&self, id: DroneId) -> Option<&AgentReport> {
        self.agents.iter().find(|a| a.drone_id == id)
    }
}

/// The coordinator, before it is started.
pub struct Dispatcher {
    config: SimConfig,
    center: Arc<ControlCenter>,
    agents: Vec<Agent>,
    pending: BTreeMap<DroneId, VecDeque<Waypoint>>,
    token: ShutdownToken,
}

impl Dispatcher {
    /// Build one drone per route, each placed at its route's first waypoint.
    ///
    /// Routes must already be in arrival order; they are never re-sorted. A
    /// drone with an empty route starts at (0, 0) and stops as soon as it is
    /// started.
    pub fn new(
        routes: impl IntoIterator<Item = (DroneId, Vec<Waypoint>)>,
        points: Vec<PointOfInterest>,
        config: SimConfig,
    ) -> Result<Self> {
        config.validate()?;

        let mut pending = BTreeMap::new();
        for (id, route) in routes {
            if let Some(stray) = route.iter().find(|wp| wp.drone_id != id) {
                return Err(SimError::RouteMismatch {
                    key: id,
                    found: stray.drone_id,
                });
            }
            pending.insert(id, VecDeque::from(route));
        }

        let handles: BTreeMap<_, _> = pending
            .keys()
            .map(|&id| (id, AgentHandle::new(id)))
            .collect();
        let center = Arc::new(ControlCenter::new(config.start_time, handles));
        let link: Arc<dyn DispatchLink> = center.clone();
        let points: Arc<[PointOfInterest]> = points.into();
        let settings = AgentSettings::from(&config);

        let agents = center
            .agents
            .values()
            .map(|handle| {
                let start = pending
                    .get(&handle.id())
                    .and_then(VecDeque::front)
                    .map_or(Position::new(0.0, 0.0), |wp| wp.position);
                Agent::with_handle(
                    handle,
                    start,
                    Arc::clone(&points),
                    Arc::clone(&link),
                    settings.clone(),
                )
            })
            .collect();

        Ok(Self {
            config,
            center,
            agents,
            pending,
            token: ShutdownToken::new(),
        })
    }

    pub fn center(&self) -> Arc<ControlCenter> {
        Arc::clone(&self.center)
    }

    /// Load every drone's queue, spawn the drone tasks and the dispatcher loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(mut self) -> Simulation {
        let started_at = self.center.clock.now();
        let mut agents = Vec::with_capacity(self.agents.len());

        for agent in std::mem::take(&mut self.agents) {
            let id = agent.id();
            let handle = agent.handle();
            info!(drone_id = %id, "Sending initial destinations to drone {}", id);

            if let Some(pending) = self.pending.get_mut(&id) {
                while let Some(next) = pending.front() {
                    if !handle.add_destination(*next) {
                        break;
                    }
                    pending.pop_front();
                }
            }
            debug!(drone_id = %id, queued = handle.queued(), "Drone launched");

            agents.push(tokio::spawn(agent.run()));
        }

        let center = Arc::clone(&self.center);
        let dispatcher = tokio::spawn(self.run());

        Simulation {
            center,
            started_at,
            dispatcher,
            agents,
            token: ShutdownToken::new(),
        }
    }

    /// Start and wait for every task to finish.
    pub async fn run_to_completion(self) -> Result<SimulationSummary> {
        self.start().join().await
    }

    async fn run(mut self) -> DispatchOutcome {
        let sample = self.config.sample_interval;
        let end = self.config.end_time;
        let mut ticker = interval(sample);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut exhausted = BTreeSet::new();
        let mut last = Instant::now();

        let reason = loop {
            if self.center.clock.now() >= end {
                break StopReason::EndOfSimulation;
            }

            ticker.tick().await;

            let intervals = last.elapsed().as_nanos() / sample.as_nanos();
            if intervals == 0 {
                continue;
            }
            last = Instant::now();

            self.center
                .clock
                .advance(u32::try_from(intervals).unwrap_or(u32::MAX));
            self.feed_agents(&mut exhausted);

            if self.center.agents.values().all(AgentHandle::is_terminated) {
                warn!("Every drone stopped before {}", end);
                break StopReason::FleetStopped;
            }
        };

        let stopped_at = self.center.clock.now();
        info!("Shutting down at {}", stopped_at);

        for handle in self.center.agents.values() {
            handle.terminate(&self.token);
        }

        DispatchOutcome { reason, stopped_at }
    }

    /// Offer each active drone its next pending waypoint. A rejected waypoint
    /// stays at the front of the pending list for the next interval.
    fn feed_agents(&mut self, exhausted: &mut BTreeSet<DroneId>) {
        for (id, handle) in &self.center.agents {
            if handle.is_terminated() {
                continue;
            }
            let Some(pending) = self.pending.get_mut(id) else {
                continue;
            };

            match pending.front() {
                Some(next) => {
                    if handle.add_destination(*next) {
                        pending.pop_front();
                    } else {
                        debug!(drone_id = %id, "Drone {} queue full, retrying", id);
                    }
                }
                None => {
                    if exhausted.insert(*id) {
                        info!(drone_id = %id, "Dispatcher has no more destinations for drone {}", id);
                    }
                }
            }
        }
    }
}

/// A running simulation.
pub struct Simulation {
    center: Arc<ControlCenter>,
    started_at: NaiveTime,
    dispatcher: JoinHandle<DispatchOutcome>,
    agents: Vec<JoinHandle<AgentReport>>,
    token: ShutdownToken,
}

impl Simulation {
    pub fn center(&self) -> &Arc<ControlCenter> {
        &self.center
    }

    /// Wait for the dispatcher, then for every drone.
    pub async fn join(self) -> Result<SimulationSummary> {
        let outcome = match self.dispatcher.await {
            Ok(outcome) => outcome,
            Err(err) => {
                for handle in self.center.agents() {
                    handle.terminate(&self.token);
                }
                return Err(err.into());
            }
        };

        let mut agents = Vec::with_capacity(self.agents.len());
        for task in self.agents {
            agents.push(task.await?);
        }

        Ok(SimulationSummary {
            started_at: self.started_at,
            stopped_at: outcome.stopped_at,
            stop_reason: outcome.reason,
            agents,
            reports: self.center.reports(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Termination;
    use drone_domain::geo::EARTH_RADIUS_M;
    use std::time::Duration;

    fn at(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    fn config(end: NaiveTime) -> SimConfig {
        SimConfig {
            start_time: at(7, 45, 0),
            end_time: end,
            sample_interval: Duration::from_millis(10),
            agent_tick: Duration::from_millis(5),
            report_radius_m: 350.0,
            crash_rate: 0.0,
            seed: Some(1),
        }
    }

    fn east(meters: f64) -> f64 {
        (meters / EARTH_RADIUS_M).to_degrees()
    }

    fn one_km_east(id: u32, lat: f64) -> Vec<Waypoint> {
        vec![
            Waypoint::new(DroneId(id), lat, 0.0, at(7, 45, 0)),
            Waypoint::new(DroneId(id), lat, east(1000.0), at(7, 46, 1)),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_drones_fly_one_km_east() {
        let routes = [(DroneId(1), one_km_east(1, 0.0)), (DroneId(2), one_km_east(2, 0.0))];
        let dispatcher = Dispatcher::new(routes, vec![], config(at(7, 50, 0))).unwrap();

        let summary = dispatcher.run_to_completion().await.unwrap();

        assert_eq!(summary.agents.len(), 2);
        for id in [DroneId(1), DroneId(2)] {
            let report = summary.agent(id).unwrap();
            assert_eq!(report.outcome, Termination::Completed);
            assert_eq!(report.legs_completed, 2);
            assert!((report.final_speed_mps - 16.67).abs() < 0.1, "speed {}", report.final_speed_mps);
            assert!((report.final_position.longitude - east(1000.0)).abs() < 1e-12);
        }
        assert_eq!(summary.stop_reason, StopReason::FleetStopped);
        assert!(summary.stopped_at < at(7, 50, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shuts_fleet_down_at_end_time() {
        let routes = [(
            DroneId(1),
            vec![
                Waypoint::new(DroneId(1), 0.0, 0.0, at(7, 45, 0)),
                Waypoint::new(DroneId(1), 0.0, 0.5, at(9, 0, 0)),
            ],
        )];
        let end = at(7, 46, 0);
        let summary = Dispatcher::new(routes, vec![], config(end))
            .unwrap()
            .run_to_completion()
            .await
            .unwrap();

        assert_eq!(summary.stop_reason, StopReason::EndOfSimulation);
        assert_eq!(summary.stopped_at, end);
        let report = summary.agent(DroneId(1)).unwrap();
        assert_eq!(report.outcome, Termination::Shutdown);
        assert_eq!(report.legs_completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_route_does_not_disturb_fleet() {
        let routes = [(DroneId(1), vec![]), (DroneId(2), one_km_east(2, 0.0))];
        let summary = Dispatcher::new(routes, vec![], config(at(7, 50, 0)))
            .unwrap()
            .run_to_completion()
            .await
            .unwrap();

        assert_eq!(summary.agent(DroneId(1)).unwrap().outcome, Termination::NoWaypoints);
        let busy = summary.agent(DroneId(2)).unwrap();
        assert_eq!(busy.outcome, Termination::Completed);
        assert_eq!(busy.legs_completed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_pressure_delivers_every_waypoint() {
        let route: Vec<_> = (0..15u32)
            .map(|n| Waypoint::new(DroneId(9), 0.0, east(10.0 * f64::from(n)), at(7, 45, 2 * n)))
            .collect();
        let dispatcher = Dispatcher::new([(DroneId(9), route)], vec![], config(at(7, 50, 0))).unwrap();

        let simulation = dispatcher.start();
        assert_eq!(simulation.center().agent(DroneId(9)).unwrap().queued(), 10);

        let summary = simulation.join().await.unwrap();
        let report = summary.agent(DroneId(9)).unwrap();
        assert_eq!(report.outcome, Termination::Completed);
        assert_eq!(report.legs_completed, 15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collects_reports_near_points_of_interest() {
        let points = vec![
            PointOfInterest::new("Kennington", 0.0, east(500.0)),
            PointOfInterest::new("Elsewhere", 1.0, 1.0),
        ];
        let routes = [(DroneId(3), one_km_east(3, 0.0))];
        let summary = Dispatcher::new(routes, points, config(at(7, 50, 0)))
            .unwrap()
            .run_to_completion()
            .await
            .unwrap();

        assert!(!summary.reports.is_empty());
        for report in &summary.reports {
            assert_eq!(report.drone_id, DroneId(3));
            assert_eq!(report.station, "Kennington");
            assert!(TrafficCondition::ALL.contains(&report.condition));
            assert!(report.speed_mps > 0.0);
            assert!(report.time > at(7, 45, 0) && report.time < at(7, 50, 0));
        }
        assert_eq!(
            summary.agent(DroneId(3)).unwrap().reports_sent as usize,
            summary.reports.len()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_catches_up_whole_intervals_after_a_stall() {
        let routes = [(
            DroneId(4),
            vec![
                Waypoint::new(DroneId(4), 0.0, 0.0, at(7, 45, 0)),
                Waypoint::new(DroneId(4), 0.0, 0.5, at(9, 0, 0)),
            ],
        )];
        let simulation = Dispatcher::new(routes, vec![], config(at(7, 46, 0)))
            .unwrap()
            .start();
        let center = Arc::clone(simulation.center());

        // one tick at 10 ms
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(center.time(), at(7, 45, 1));

        // 42 ms since the last tick: four whole intervals, 2 ms left over
        tokio::time::advance(Duration::from_millis(37)).await;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(center.time(), at(7, 45, 5));

        // the leftover is dropped, so the tick at 60 ms is too early to count
        tokio::time::sleep(Duration::from_millis(13)).await;
        assert_eq!(center.time(), at(7, 45, 5));

        let summary = simulation.join().await.unwrap();
        assert_eq!(summary.stop_reason, StopReason::EndOfSimulation);
        assert_eq!(summary.stopped_at, at(7, 46, 0));
    }

    #[test]
    fn test_rejects_route_addressed_to_other_drone() {
        let routes = [(DroneId(1), vec![Waypoint::new(DroneId(2), 0.0, 0.0, at(8, 0, 0))])];
        let result = Dispatcher::new(routes, vec![], config(at(8, 10, 0)));
        assert!(matches!(
            result,
            Err(SimError::RouteMismatch { key: DroneId(1), found: DroneId(2) })
        ));
    }

    #[test]
    fn test_center_reports_are_safe_to_file_concurrently() {
        let dispatcher =
            Dispatcher::new([(DroneId(1), one_km_east(1, 0.0))], vec![], config(at(8, 0, 0))).unwrap();
        let center = dispatcher.center();

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..100 {
                        center.report_traffic(DroneId(1), "Oval", TrafficCondition::Light);
                    }
                });
            }
        });

        let reports = center.reports();
        assert_eq!(reports.len(), 400);
        assert!(reports.iter().all(|r| r.time == at(7, 45, 0)));
    }
}
