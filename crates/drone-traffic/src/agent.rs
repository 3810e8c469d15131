//! Drone control loop.
//!
//! A drone flies its queued waypoints in order. For every leg it picks the
//! constant speed and heading that land it on the waypoint at the scheduled
//! time, then dead-reckons forward once per simulated second. Points of
//! interest within the report radius produce traffic reports back to the
//! dispatcher.

use crate::config::SimConfig;
use crate::link::DispatchLink;
use crate::queue::WaypointQueue;
use chrono::NaiveTime;
use drone_domain::{DroneId, PointOfInterest, Position, TrafficCondition, Waypoint};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

/// Flat-Earth meters per degree of latitude.
const METERS_PER_DEGREE_LAT: f64 = 110_540.0;
/// Flat-Earth meters per degree of longitude at the equator.
const METERS_PER_DEGREE_LON: f64 = 111_320.0;

/// Authority to stop drones. Only the dispatcher can mint one.
#[derive(Debug)]
pub struct ShutdownToken {
    _private: (),
}

impl ShutdownToken {
    pub(crate) const fn new() -> Self {
        Self { _private: () }
    }
}

/// Why a drone stopped flying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Termination {
    /// The queue was empty before the first leg.
    NoWaypoints,
    /// Every queued waypoint was reached.
    Completed,
    /// Fault injection fired.
    Crashed,
    /// Stopped by the dispatcher.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPhase {
    AwaitingFirstWaypoint,
    EnRoute,
    Terminated(Termination),
}

/// Per-drone tuning taken from [`SimConfig`].
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub report_radius_m: f64,
    pub crash_rate: f64,
    pub tick: Duration,
    pub seed: Option<u64>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from(&SimConfig::default())
    }
}

impl From<&SimConfig> for AgentSettings {
    fn from(config: &SimConfig) -> Self {
        Self {
            report_radius_m: config.report_radius_m,
            crash_rate: config.crash_rate,
            tick: config.agent_tick,
            seed: config.seed,
        }
    }
}

/// State visible outside the drone task.
#[derive(Debug, Default)]
struct AgentStatus {
    terminated: AtomicBool,
    speed_bits: AtomicU64,
}

/// Cloneable handle the dispatcher keeps for each drone.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    id: DroneId,
    queue: Arc<WaypointQueue>,
    status: Arc<AgentStatus>,
}

impl AgentHandle {
    /// Fresh handle with an empty queue, for a drone not yet built.
    #[must_use]
    pub fn new(id: DroneId) -> Self {
        Self {
            id,
            queue: Arc::new(WaypointQueue::new()),
            status: Arc::new(AgentStatus::default()),
        }
    }

    #[must_use]
    pub const fn id(&self) -> DroneId {
        self.id
    }

    /// Offer a waypoint to the drone. Never blocks; `false` means the drone's
    /// memory is full and the caller should retry later.
    pub fn add_destination(&self, waypoint: Waypoint) -> bool {
        self.queue.offer(waypoint)
    }

    /// Ask the drone to stop at its next tick.
    pub fn terminate(&self, _token: &ShutdownToken) {
        self.status.terminated.store(true, Ordering::Release);
    }

    pub fn is_terminated(&self) -> bool {
        self.status.terminated.load(Ordering::Acquire)
    }

    /// Speed of the current leg, in m/s.
    pub fn speed(&self) -> f64 {
        f64::from_bits(self.status.speed_bits.load(Ordering::Relaxed))
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

/// End-of-flight summary for one drone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReport {
    pub drone_id: DroneId,
    pub outcome: Termination,
    pub legs_completed: u32,
    pub reports_sent: u32,
    pub final_position: Position,
    pub final_speed_mps: f64,
}

/// A drone and its control-loop state. Owned by the drone's own task.
pub struct Agent {
    id: DroneId,
    position: Position,
    heading_deg: f64,
    speed_mps: f64,
    leg_distance_m: f64,
    travelled_m: f64,
    legs_completed: u32,
    reports_sent: u32,
    phase: AgentPhase,
    queue: Arc<WaypointQueue>,
    status: Arc<AgentStatus>,
    points: Arc<[PointOfInterest]>,
    link: Arc<dyn DispatchLink>,
    settings: AgentSettings,
    rng: StdRng,
}

impl Agent {
    pub fn new(
        id: DroneId,
        start: Position,
        points: Arc<[PointOfInterest]>,
        link: Arc<dyn DispatchLink>,
        settings: AgentSettings,
    ) -> Self {
        Self::with_handle(&AgentHandle::new(id), start, points, link, settings)
    }

    /// Build the drone behind an existing handle.
    pub fn with_handle(
        handle: &AgentHandle,
        start: Position,
        points: Arc<[PointOfInterest]>,
        link: Arc<dyn DispatchLink>,
        settings: AgentSettings,
    ) -> Self {
        let id = handle.id;
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(u64::from(id.0))),
            None => StdRng::from_entropy(),
        };

        Self {
            id,
            position: start,
            heading_deg: 0.0,
            speed_mps: 0.0,
            leg_distance_m: 0.0,
            travelled_m: 0.0,
            legs_completed: 0,
            reports_sent: 0,
            phase: AgentPhase::AwaitingFirstWaypoint,
            queue: Arc::clone(&handle.queue),
            status: Arc::clone(&handle.status),
            points,
            link,
            settings,
            rng,
        }
    }

    #[must_use]
    pub fn handle(&self) -> AgentHandle {
        AgentHandle {
            id: self.id,
            queue: Arc::clone(&self.queue),
            status: Arc::clone(&self.status),
        }
    }

    #[must_use]
    pub const fn id(&self) -> DroneId {
        self.id
    }

    #[must_use]
    pub const fn position(&self) -> Position {
        self.position
    }

    #[must_use]
    pub const fn speed_mps(&self) -> f64 {
        self.speed_mps
    }

    #[must_use]
    pub const fn heading_deg(&self) -> f64 {
        self.heading_deg
    }

    #[must_use]
    pub const fn phase(&self) -> AgentPhase {
        self.phase
    }

    #[must_use]
    pub const fn legs_completed(&self) -> u32 {
        self.legs_completed
    }

    #[must_use]
    pub const fn is_terminated(&self) -> bool {
        matches!(self.phase, AgentPhase::Terminated(_))
    }

    /// Plan the first leg. A drone with nothing queued stops here.
    pub fn start(&mut self, now: NaiveTime) {
        if self.phase == AgentPhase::AwaitingFirstWaypoint {
            self.set_destination(now);
        }
    }

    /// One control-loop iteration covering `elapsed_secs` of simulated time.
    ///
    /// Less than a second is a no-op, as is any call before the first leg has
    /// been planned or after the drone has stopped.
    pub fn step(&mut self, elapsed_secs: i64, now: NaiveTime) {
        if self.phase != AgentPhase::EnRoute || elapsed_secs < 1 {
            return;
        }
        self.check_nearby_locations();
        self.advance(elapsed_secs, now);
    }

    /// Drive the drone from the shared clock until it stops or is shut down.
    pub async fn run(mut self) -> AgentReport {
        let mut ticker = interval(self.settings.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut last = self.link.time();
        self.start(last);

        while self.phase == AgentPhase::EnRoute {
            ticker.tick().await;

            if self.status.terminated.load(Ordering::Acquire) {
                self.finish(Termination::Shutdown);
                break;
            }

            let now = self.link.time();
            let elapsed = (now - last).num_seconds();
            if elapsed >= 1 {
                self.step(elapsed, now);
                last = now;
            }
        }

        let report = self.report();
        info!(
            drone_id = %self.id,
            outcome = ?report.outcome,
            legs = report.legs_completed,
            "Drone {} stopped at {}",
            self.id,
            self.position
        );
        report
    }

    #[must_use]
    pub fn report(&self) -> AgentReport {
        let outcome = match self.phase {
            AgentPhase::Terminated(cause) => cause,
            _ => Termination::Shutdown,
        };
        AgentReport {
            drone_id: self.id,
            outcome,
            legs_completed: self.legs_completed,
            reports_sent: self.reports_sent,
            final_position: self.position,
            final_speed_mps: self.speed_mps,
        }
    }

    /// Choose speed and heading to reach the head of the queue on schedule.
    fn set_destination(&mut self, now: NaiveTime) {
        let Some(next) = self.queue.peek() else {
            let cause = if self.legs_completed == 0 {
                Termination::NoWaypoints
            } else {
                Termination::Completed
            };
            info!(drone_id = %self.id, "Drone {} has no more destinations", self.id);
            self.finish(cause);
            return;
        };

        // a waypoint already due is flown in a single second
        let seconds = (next.arrival - now).num_seconds().max(1);

        self.leg_distance_m = self.position.distance_to_m(&next.position);
        self.travelled_m = 0.0;
        self.speed_mps = self.leg_distance_m / whole_seconds(seconds);
        self.heading_deg = self.position.bearing_to_deg(&next.position);
        self.phase = AgentPhase::EnRoute;
        self.status
            .speed_bits
            .store(self.speed_mps.to_bits(), Ordering::Relaxed);

        debug!(
            drone_id = %self.id,
            distance_m = self.leg_distance_m,
            speed_mps = self.speed_mps,
            heading_deg = self.heading_deg,
            arrival = %next.arrival,
            "New leg planned"
        );
    }

    /// Report traffic for every point of interest within range.
    fn check_nearby_locations(&mut self) {
        for poi in self.points.iter() {
            if self.position.distance_to_m(&poi.position) > self.settings.report_radius_m {
                continue;
            }
            let condition =
                TrafficCondition::ALL[self.rng.gen_range(0..TrafficCondition::ALL.len())];
            info!(
                drone_id = %self.id,
                station = %poi.name,
                "Drone {} is sending report from {} to dispatcher",
                self.id,
                poi.name
            );
            self.link.report_traffic(self.id, &poi.name, condition);
            self.reports_sent += 1;
        }
    }

    /// Dead-reckon along the current heading. May crash instead.
    fn advance(&mut self, elapsed_secs: i64, now: NaiveTime) {
        if self.settings.crash_rate > 0.0 && self.rng.gen_bool(self.settings.crash_rate) {
            warn!(
                drone_id = %self.id,
                "Drone {} crashed into a building at {}",
                self.id,
                self.position
            );
            self.finish(Termination::Crashed);
            return;
        }

        let d = self.speed_mps * whole_seconds(elapsed_secs);
        let heading = self.heading_deg.to_radians();
        let delta_lat = d * heading.cos() / METERS_PER_DEGREE_LAT;
        let delta_lon =
            d * heading.sin() / (METERS_PER_DEGREE_LON * self.position.latitude.to_radians().cos());

        self.position.latitude += delta_lat;
        self.position.longitude += delta_lon;
        self.travelled_m += d;

        if self.travelled_m >= self.leg_distance_m {
            self.arrive(now);
        }
    }

    fn arrive(&mut self, now: NaiveTime) {
        if let Some(reached) = self.queue.poll() {
            self.position = reached.position;
            self.legs_completed += 1;
            debug!(
                drone_id = %self.id,
                scheduled = %reached.arrival,
                actual = %now,
                "Waypoint reached"
            );
        }
        self.set_destination(now);
    }

    fn finish(&mut self, cause: Termination) {
        self.phase = AgentPhase::Terminated(cause);
        self.status.terminated.store(true, Ordering::Release);
    }
}

/// Simulated durations stay within one day, well inside `i32`.
fn whole_seconds(secs: i64) -> f64 {
    f64::from(i32::try_from(secs).unwrap_or(i32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimClock;
    use drone_domain::geo::EARTH_RADIUS_M;
    use std::sync::Mutex;

    struct TestLink {
        clock: SimClock,
        reports: Mutex<Vec<(DroneId, String, TrafficCondition)>>,
    }

    impl TestLink {
        fn starting_at(start: NaiveTime) -> Arc<Self> {
            Arc::new(Self {
                clock: SimClock::new(start),
                reports: Mutex::default(),
            })
        }

        fn clock(&self) -> &SimClock {
            &self.clock
        }

        fn reports(&self) -> Vec<(DroneId, String, TrafficCondition)> {
            self.reports.lock().unwrap().clone()
        }
    }

    impl DispatchLink for TestLink {
        fn time(&self) -> NaiveTime {
            self.clock().now()
        }

        fn report_traffic(&self, drone_id: DroneId, station: &str, condition: TrafficCondition) {
            self.reports
                .lock()
                .unwrap()
                .push((drone_id, station.to_string(), condition));
        }
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    fn settings() -> AgentSettings {
        AgentSettings {
            report_radius_m: 350.0,
            crash_rate: 0.0,
            tick: Duration::from_millis(1),
            seed: Some(42),
        }
    }

    /// Longitude offset of a point `meters` due east of (0, 0).
    fn east_of_origin(meters: f64) -> f64 {
        (meters / EARTH_RADIUS_M).to_degrees()
    }

    fn agent(link: &Arc<TestLink>, points: Vec<PointOfInterest>, settings: AgentSettings) -> Agent {
        let link: Arc<dyn DispatchLink> = link.clone();
        Agent::new(DroneId(7), Position::new(0.0, 0.0), points.into(), link, settings)
    }

    #[test]
    fn test_speed_and_heading_for_leg() {
        let link = TestLink::starting_at(at(7, 45, 0));
        let mut drone = agent(&link, vec![], settings());
        let target = Waypoint::new(DroneId(7), 0.0, east_of_origin(1000.0), at(7, 46, 0));
        assert!(drone.handle().add_destination(target));

        drone.start(link.time());

        assert_eq!(drone.phase(), AgentPhase::EnRoute);
        assert!((drone.speed_mps() - 16.67).abs() < 0.01, "speed {}", drone.speed_mps());
        assert!((drone.heading_deg() - 90.0).abs() < 1e-6);
        assert!((drone.handle().speed() - drone.speed_mps()).abs() < f64::EPSILON);
    }

    #[test]
    fn test_moves_monotonically_towards_target() {
        let link = TestLink::starting_at(at(7, 45, 0));
        let mut drone = agent(&link, vec![], settings());
        let target = Waypoint::new(DroneId(7), 0.0, east_of_origin(1000.0), at(7, 46, 0));
        drone.handle().add_destination(target);
        drone.start(link.time());

        let mut remaining = drone.position().distance_to_m(&target.position);
        for tick in 1..=70 {
            let now = link.clock().advance(1);
            drone.step(1, now);
            if drone.is_terminated() {
                break;
            }
            let current = drone.position().distance_to_m(&target.position);
            if tick < 59 {
                assert!(current < remaining, "tick {tick}: {current} >= {remaining}");
            }
            remaining = current;
        }

        assert_eq!(drone.legs_completed(), 1);
        assert_eq!(drone.position(), target.position);
        assert_eq!(drone.phase(), AgentPhase::Terminated(Termination::Completed));
    }

    #[test]
    fn test_consumes_waypoints_in_offer_order() {
        let link = TestLink::starting_at(at(8, 0, 0));
        let mut drone = agent(&link, vec![], settings());
        let waypoints: Vec<_> = (1..=4u32)
            .map(|n| {
                Waypoint::new(
                    DroneId(7),
                    0.0,
                    east_of_origin(100.0 * f64::from(n)),
                    at(8, 0, 10 * n),
                )
            })
            .collect();
        for wp in &waypoints {
            assert!(drone.handle().add_destination(*wp));
        }
        drone.start(link.time());

        let mut reached = Vec::new();
        for _ in 0..200 {
            let legs = drone.legs_completed();
            let now = link.clock().advance(1);
            drone.step(1, now);
            if drone.legs_completed() > legs {
                reached.push(drone.position());
            }
            if drone.is_terminated() {
                break;
            }
        }

        let expected: Vec<_> = waypoints.iter().map(|wp| wp.position).collect();
        assert_eq!(reached, expected);
    }

    #[test]
    fn test_reports_nearby_point_of_interest() {
        let link = TestLink::starting_at(at(7, 45, 0));
        let points = vec![
            PointOfInterest::new("Oval", 0.001, 0.001),
            PointOfInterest::new("Far Away", 1.0, 1.0),
        ];
        let mut drone = agent(&link, points, settings());
        drone
            .handle()
            .add_destination(Waypoint::new(DroneId(7), 0.0, 0.05, at(8, 0, 0)));
        drone.start(link.time());

        let now = link.clock().advance(1);
        drone.step(1, now);

        let reports = link.reports();
        assert_eq!(reports.len(), 1);
        let (id, station, condition) = &reports[0];
        assert_eq!(*id, DroneId(7));
        assert_eq!(station, "Oval");
        assert!(TrafficCondition::ALL.contains(condition));
    }

    #[test]
    fn test_no_report_before_first_leg() {
        let link = TestLink::starting_at(at(7, 45, 0));
        let points = vec![PointOfInterest::new("Oval", 0.0, 0.0)];
        let mut drone = agent(&link, points, settings());
        drone
            .handle()
            .add_destination(Waypoint::new(DroneId(7), 0.0, 0.05, at(8, 0, 0)));

        drone.step(5, link.clock().advance(5));

        assert!(link.reports().is_empty());
        assert_eq!(drone.phase(), AgentPhase::AwaitingFirstWaypoint);
    }

    #[test]
    fn test_sub_second_step_is_noop() {
        let link = TestLink::starting_at(at(7, 45, 0));
        let points = vec![PointOfInterest::new("Oval", 0.0, 0.0)];
        let mut drone = agent(&link, points, settings());
        drone
            .handle()
            .add_destination(Waypoint::new(DroneId(7), 0.0, 0.05, at(8, 0, 0)));
        drone.start(link.time());

        drone.step(0, link.time());

        assert_eq!(drone.position(), Position::new(0.0, 0.0));
        assert!(link.reports().is_empty());
    }

    #[test]
    fn test_empty_queue_terminates_immediately() {
        let link = TestLink::starting_at(at(7, 45, 0));
        let mut drone = agent(&link, vec![], settings());
        let handle = drone.handle();

        drone.start(link.time());

        assert_eq!(drone.phase(), AgentPhase::Terminated(Termination::NoWaypoints));
        assert!(handle.is_terminated());
    }

    #[test]
    fn test_crash_skips_move() {
        let link = TestLink::starting_at(at(7, 45, 0));
        let mut drone = agent(
            &link,
            vec![],
            AgentSettings {
                crash_rate: 1.0,
                ..settings()
            },
        );
        drone
            .handle()
            .add_destination(Waypoint::new(DroneId(7), 0.0, 0.05, at(8, 0, 0)));
        drone.start(link.time());

        drone.step(1, link.clock().advance(1));

        assert_eq!(drone.phase(), AgentPhase::Terminated(Termination::Crashed));
        assert_eq!(drone.position(), Position::new(0.0, 0.0));
        assert!(drone.handle().is_terminated());
    }

    #[test]
    fn test_overdue_waypoint_flown_in_one_second() {
        let link = TestLink::starting_at(at(7, 45, 0));
        let mut drone = agent(&link, vec![], settings());
        let target = Waypoint::new(DroneId(7), 0.0, east_of_origin(500.0), at(7, 40, 0));
        drone.handle().add_destination(target);
        drone.start(link.time());

        assert!((drone.speed_mps() - 500.0).abs() < 0.01);
        drone.step(1, link.clock().advance(1));
        assert_eq!(drone.legs_completed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let link = TestLink::starting_at(at(7, 45, 0));
        let drone = agent(&link, vec![], settings());
        let handle = drone.handle();
        handle.add_destination(Waypoint::new(DroneId(7), 0.0, 0.05, at(8, 0, 0)));

        let task = tokio::spawn(drone.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_terminated());

        handle.terminate(&ShutdownToken::new());
        let report = task.await.unwrap();

        assert_eq!(report.outcome, Termination::Shutdown);
        assert_eq!(report.drone_id, DroneId(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_follows_shared_clock() {
        let link = TestLink::starting_at(at(7, 45, 0));
        let drone = agent(&link, vec![], settings());
        let handle = drone.handle();
        let target = Waypoint::new(DroneId(7), 0.0, east_of_origin(200.0), at(7, 45, 20));
        handle.add_destination(target);

        let task = tokio::spawn(drone.run());
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(3)).await;
            if handle.is_terminated() {
                break;
            }
            link.clock().advance(1);
        }
        let report = task.await.unwrap();

        assert_eq!(report.outcome, Termination::Completed);
        assert_eq!(report.legs_completed, 1);
        assert_eq!(report.final_position, target.position);
    }
}
