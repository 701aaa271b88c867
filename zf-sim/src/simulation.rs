//! Gillespie stochastic simulation of a [`Network`].
//!
//! A [`GillespieSimulator`] owns the network it evolves. Each exact step draws a reaction and an
//! exponential waiting time from the current propensities, applies the reaction's ±1 change and
//! recomputes the propensities. Trajectories are sampled on an integer tick grid: the value
//! recorded at tick `t` is the state at time `t`, so ticks skipped by a long waiting time repeat
//! the state that was current when the span started.
//!
//! Perturbations are scheduled by tick. When a trajectory reaches a scheduled tick the
//! perturbations run once, the propensities are recomputed and the pending draw is discarded;
//! exponential waiting times are memoryless, so redrawing from the tick is exact.
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{
    AtomicBool,
    AtomicUsize,
    Ordering,
};
use std::sync::Arc;

use derive_setters::Setters;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{
    debug,
    info,
    instrument,
    warn,
};

use crate::error::{
    NetworkError,
    Result,
};
use crate::model::{
    KineticsMut,
    Network,
};
use crate::propensity::{
    NodeOrder,
    PropensityEngine,
    Reaction,
};
use crate::sampling::{
    self,
    derive_seed,
    Draw,
};

/// A scheduled change to populations or rate constants.
pub type Perturbation = Box<dyn Fn(&mut KineticsMut<'_>) + Send + Sync>;

/// Perturbations keyed by the tick at which they fire.
#[derive(Default)]
pub struct Schedule(BTreeMap<usize, Vec<Perturbation>>);

impl Schedule {
    /// Empty schedule.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `perturbation` at `tick`; several perturbations at one tick run in insertion order.
    #[must_use]
    pub fn at(mut self, tick: usize, perturbation: impl Fn(&mut KineticsMut<'_>) + Send + Sync + 'static) -> Self {
        self.insert(tick, Box::new(perturbation));
        self
    }

    /// Add a boxed perturbation at `tick`.
    pub fn insert(&mut self, tick: usize, perturbation: Perturbation) {
        self.0.entry(tick).or_default().push(perturbation);
    }

    /// Perturbations due at `tick`.
    fn due(&self, tick: usize) -> Option<&[Perturbation]> {
        self.0.get(&tick).map(Vec::as_slice)
    }

    /// Number of ticks with at least one perturbation.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when nothing is scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.iter().map(|(tick, fs)| (tick, fs.len()))).finish()
    }
}

/// Perturbation that overrides the population and/or rate constants of every transcription
/// factor; `None` leaves that quantity alone.
#[must_use]
pub fn force_transcription_factors(population: Option<u64>, beta: Option<f64>, gamma: Option<f64>) -> Perturbation {
    Box::new(move |view: &mut KineticsMut<'_>| {
        view.for_each_transcription_factor(|tf| {
            if let Some(population) = population {
                tf.population = population;
            }
            if let Some(beta) = beta {
                tf.beta = beta;
            }
            if let Some(gamma) = gamma {
                tf.gamma = gamma;
            }
        });
    })
}

/// Shared flag for stopping running trajectories at their next tick boundary.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every trajectory holding this token to stop.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether [`CancellationToken::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// How a trajectory ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Termination {
    /// Every tick was simulated.
    Completed,
    /// Total propensity reached zero; the remaining ticks repeat the final state.
    ///
    /// Padding stops at the next scheduled perturbation, which still runs and may revive the
    /// trajectory. A replicate is reported as absorbed only if it is still absorbed at its last
    /// tick.
    Absorbed,
    /// Stopped through a [`CancellationToken`]; the remaining ticks repeat the last state.
    Cancelled,
}

/// Lifecycle of a simulator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimState {
    /// Built, nothing simulated yet.
    Ready,
    /// Inside a trajectory.
    Running,
    /// Inside a trajectory with zero total propensity; only a perturbation can revive it.
    Absorbed,
    /// The last trajectory finished.
    Done,
}

/// Run-wide settings.
#[derive(Clone, Debug, Default, Setters)]
#[setters(prefix = "with_")]
pub struct SimulationConfig {
    /// Base seed; replicate `r` uses a stream derived from it. Random when unset.
    #[setters(strip_option)]
    pub seed: Option<u64>,
    /// Checked at every tick boundary.
    pub cancellation: CancellationToken,
}

/// One recorded trajectory: a time and a population row per tick.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Trajectory {
    /// Columns per population row.
    nodes: usize,
    /// Tick times, `0, 1, 2, …`.
    times: Vec<f64>,
    /// Row-major `tick × node` populations in [`NodeOrder`].
    populations: Vec<u64>,
    /// How the run ended.
    termination: Termination,
}

impl Trajectory {
    /// Empty recording with room for `ticks` rows.
    fn with_capacity(nodes: usize, ticks: usize) -> Self {
        Self {
            nodes,
            times: Vec::with_capacity(ticks),
            populations: Vec::with_capacity(ticks * nodes),
            termination: Termination::Completed,
        }
    }

    /// Append the current state of `network` as the row for `tick`.
    #[allow(clippy::cast_precision_loss)]
    fn record(&mut self, tick: usize, network: &Network, order: &NodeOrder) {
        self.times.push(tick as f64);
        self.populations
            .extend(order.iter().map(|id| network.node(id).map_or(0, |node| node.population)));
    }

    /// Number of recorded ticks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// True when nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Tick times.
    #[must_use]
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Row-major `tick × node` populations.
    #[must_use]
    pub fn populations(&self) -> &[u64] {
        &self.populations
    }

    /// Population of node `node` (in [`NodeOrder`]) at `tick`.
    #[must_use]
    pub fn population(&self, tick: usize, node: usize) -> Option<u64> {
        (node < self.nodes).then(|| self.populations.get(tick * self.nodes + node).copied()).flatten()
    }

    /// How the run ended.
    #[must_use]
    pub const fn termination(&self) -> Termination {
        self.termination
    }
}

/// Replicate trajectories stacked into dense `replicate × tick` and `replicate × tick × node`
/// arrays.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Ensemble {
    /// Node labels in [`NodeOrder`].
    labels: Vec<String>,
    /// Ticks per replicate.
    ticks: usize,
    /// Row-major `replicate × tick` times.
    times: Vec<f64>,
    /// Row-major `replicate × tick × node` populations.
    populations: Vec<u64>,
    /// Per-replicate outcome.
    terminations: Vec<Termination>,
}

impl Ensemble {
    /// Stack `trajectories`, each `ticks` long.
    fn new(labels: Vec<String>, ticks: usize, trajectories: Vec<Trajectory>) -> Self {
        let mut ensemble = Self {
            labels,
            ticks,
            times: Vec::with_capacity(trajectories.len() * ticks),
            populations: Vec::new(),
            terminations: Vec::with_capacity(trajectories.len()),
        };
        for trajectory in trajectories {
            ensemble.times.extend(trajectory.times);
            ensemble.populations.extend(trajectory.populations);
            ensemble.terminations.push(trajectory.termination);
        }
        ensemble
    }

    /// Node labels, one per population column.
    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Number of replicates.
    #[must_use]
    pub fn replicates(&self) -> usize {
        self.terminations.len()
    }

    /// Ticks per replicate.
    #[must_use]
    pub const fn ticks(&self) -> usize {
        self.ticks
    }

    /// Number of nodes per population row.
    #[must_use]
    pub fn nodes(&self) -> usize {
        self.labels.len()
    }

    /// Dense `replicate × tick` times.
    #[must_use]
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Dense `replicate × tick × node` populations.
    #[must_use]
    pub fn populations(&self) -> &[u64] {
        &self.populations
    }

    /// Time of `tick` in `replicate`.
    #[must_use]
    pub fn time(&self, replicate: usize, tick: usize) -> Option<f64> {
        (tick < self.ticks).then(|| self.times.get(replicate * self.ticks + tick).copied()).flatten()
    }

    /// Population of `node` at `tick` in `replicate`.
    #[must_use]
    pub fn population(&self, replicate: usize, tick: usize, node: usize) -> Option<u64> {
        if tick >= self.ticks || node >= self.nodes() {
            return None;
        }
        self.populations.get((replicate * self.ticks + tick) * self.nodes() + node).copied()
    }

    /// Mean population of `node` at `tick` across replicates.
    #[must_use]
    pub fn mean_population(&self, tick: usize, node: usize) -> Option<f64> {
        if self.replicates() == 0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let sum = (0..self.replicates())
            .map(|r| self.population(r, tick, node).map(|p| p as f64))
            .sum::<Option<f64>>()?;
        #[allow(clippy::cast_precision_loss)]
        Some(sum / self.replicates() as f64)
    }

    /// Mean population of every node at the last tick; empty when nothing was simulated.
    #[must_use]
    pub fn terminal_means(&self) -> Vec<f64> {
        let Some(last) = self.ticks.checked_sub(1) else { return vec![] };
        (0..self.nodes()).filter_map(|node| self.mean_population(last, node)).collect()
    }

    /// Outcome of `replicate`.
    #[must_use]
    pub fn termination(&self, replicate: usize) -> Option<Termination> {
        self.terminations.get(replicate).copied()
    }

    /// Outcome of every replicate.
    #[must_use]
    pub fn terminations(&self) -> &[Termination] {
        &self.terminations
    }
}

/// Exact stochastic simulator for one network.
#[derive(Debug)]
pub struct GillespieSimulator {
    /// The network being evolved.
    network: Network,
    /// Propensities of `network`.
    engine: PropensityEngine,
    /// The network as it was at construction; replicates start from here.
    template: Arc<Network>,
    /// Run settings.
    config: SimulationConfig,
    /// Seed all replicate streams derive from.
    base_seed: u64,
    /// Stream index of the next replicate.
    next_stream: u64,
    /// Generator for the current trajectory.
    rng: StdRng,
    /// Lifecycle state.
    state: SimState,
    /// Simulated time within the current trajectory.
    time: f64,
}

impl GillespieSimulator {
    /// Take ownership of `network` and compute its initial propensities.
    ///
    /// # Errors
    ///
    /// [`NetworkError::InvalidTopology`] if the wiring is invalid, or any error of
    /// [`PropensityEngine::new`].
    #[instrument(skip_all, fields(nodes = network.node_count(), edges = network.edge_count()))]
    pub fn new(network: Network, config: SimulationConfig) -> Result<Self> {
        network.check_topology()?;
        let engine = PropensityEngine::new(&network)?;
        let base_seed = config.seed.unwrap_or_else(rand::random);
        info!(seed = base_seed, "simulator ready");

        Ok(Self {
            template: Arc::new(network.clone()),
            network,
            engine,
            config,
            base_seed,
            next_stream: 0,
            rng: StdRng::seed_from_u64(base_seed),
            state: SimState::Ready,
            time: 0.0,
        })
    }

    /// Current network state.
    #[must_use]
    pub const fn network(&self) -> &Network {
        &self.network
    }

    /// Latest propensities.
    #[must_use]
    pub fn propensities(&self) -> &[f64] {
        self.engine.propensities()
    }

    /// Node indexing of population rows and propensities.
    #[must_use]
    pub const fn order(&self) -> &NodeOrder {
        self.engine.order()
    }

    /// Lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SimState {
        self.state
    }

    /// Simulated time within the current trajectory.
    #[must_use]
    pub const fn time(&self) -> f64 {
        self.time
    }

    /// Base seed in use, for reproducing a run.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.base_seed
    }

    /// Run settings.
    #[must_use]
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Draw the next reaction and waiting time without applying it.
    pub fn draw(&mut self) -> Draw {
        sampling::draw(self.engine.propensities(), &mut self.rng)
    }

    /// Change populations or rate constants by hand and recompute propensities.
    ///
    /// # Errors
    ///
    /// Any error of [`PropensityEngine::update`].
    pub fn perturb(&mut self, f: impl FnOnce(&mut KineticsMut<'_>)) -> Result<()> {
        f(&mut self.network.kinetics_mut());
        self.engine.update(&self.network)?;
        Ok(())
    }

    /// One exact step: draw, apply, advance time, recompute. Returns the draw; an absorbed draw
    /// changes nothing but the state.
    ///
    /// # Errors
    ///
    /// Any error of [`PropensityEngine::update`].
    pub fn step(&mut self) -> Result<Draw> {
        let next = self.draw();
        match next.reaction {
            None => self.state = SimState::Absorbed,
            Some(reaction) => {
                self.apply(reaction)?;
                self.time += next.tau;
                self.engine.update(&self.network)?;
                self.state = SimState::Running;
            },
        }
        Ok(next)
    }

    /// Apply the population change of `reaction`.
    fn apply(&mut self, reaction: usize) -> Result<()> {
        let Reaction { node, change } =
            self.engine.events().reaction(reaction).ok_or(NetworkError::UnknownHandle(reaction))?;
        let id = self.engine.order().get(node).ok_or(NetworkError::UnknownHandle(node))?;
        let target = self.network.node_mut(id).ok_or(NetworkError::UnknownHandle(id.index()))?;
        target.population = if change > 0 {
            target.population.saturating_add(1)
        } else {
            target.population.saturating_sub(1)
        };
        Ok(())
    }

    /// Run one trajectory of `duration` ticks from the current network state, continuing the
    /// current random stream.
    ///
    /// # Errors
    ///
    /// Any error of [`PropensityEngine::update`].
    #[instrument(skip(self, schedule), fields(scheduled = schedule.len()))]
    pub fn run_trajectory(&mut self, duration: usize, schedule: Schedule) -> Result<Trajectory> {
        self.trajectory(duration, &schedule)
    }

    /// Core loop shared by every run mode.
    #[allow(clippy::cast_precision_loss)]
    fn trajectory(&mut self, duration: usize, schedule: &Schedule) -> Result<Trajectory> {
        let order = self.engine.order().clone();
        let mut recording = Trajectory::with_capacity(order.len(), duration);
        self.time = 0.0;
        self.state = SimState::Running;
        self.engine.update(&self.network)?;

        let mut tick = 0;
        let mut absorbed = false;
        'run: while tick < duration {
            let next = self.draw();
            absorbed = next.is_absorbed();
            if absorbed {
                self.state = SimState::Absorbed;
            }
            let event_time = self.time + next.tau;

            while tick < duration && (tick as f64) < event_time {
                if self.config.cancellation.is_cancelled() {
                    while tick < duration {
                        recording.record(tick, &self.network, &order);
                        tick += 1;
                    }
                    self.state = SimState::Done;
                    recording.termination = Termination::Cancelled;
                    return Ok(recording);
                }

                let perturbed = self.reach_tick(tick, schedule)?;
                recording.record(tick, &self.network, &order);
                tick += 1;
                if perturbed {
                    self.time = (tick - 1) as f64;
                    self.state = SimState::Running;
                    absorbed = false;
                    continue 'run;
                }
            }
            if tick >= duration {
                break;
            }

            if let Some(reaction) = next.reaction {
                self.apply(reaction)?;
            }
            self.time = event_time;
            self.engine.update(&self.network)?;
        }

        self.state = SimState::Done;
        if absorbed {
            recording.termination = Termination::Absorbed;
        }
        Ok(recording)
    }

    /// Run the perturbations due at `tick`, if any, and recompute propensities after them.
    fn reach_tick(&mut self, tick: usize, schedule: &Schedule) -> Result<bool> {
        let Some(due) = schedule.due(tick) else { return Ok(false) };
        let mut view = self.network.kinetics_mut();
        for perturbation in due {
            perturbation(&mut view);
        }
        self.engine.update(&self.network)?;
        debug!(tick, count = due.len(), "perturbations applied");
        Ok(true)
    }

    /// Run `replicates` trajectories one after another. Each starts from a fresh copy of the
    /// construction-time network with its own random stream, so changes made by a perturbation
    /// never reach a later replicate.
    ///
    /// # Errors
    ///
    /// Any error of [`PropensityEngine::update`].
    #[instrument(skip(self, schedule), fields(scheduled = schedule.len(), seed = self.base_seed))]
    pub fn run(&mut self, duration: usize, replicates: usize, schedule: Schedule) -> Result<Ensemble> {
        let labels = self.order().labels(&self.network);
        let first = self.next_stream;

        let mut trajectories = Vec::with_capacity(replicates);
        for r in 0..replicates as u64 {
            self.network = (*self.template).clone();
            self.rng = StdRng::seed_from_u64(derive_seed(self.base_seed, first + r));
            let trajectory = self.trajectory(duration, &schedule)?;
            debug!(replicate = r, termination = ?trajectory.termination, "replicate finished");
            trajectories.push(trajectory);
        }
        self.next_stream = first + replicates as u64;

        let ensemble = Ensemble::new(labels, duration, trajectories);
        report(&ensemble);
        Ok(ensemble)
    }

    /// Run `replicates` trajectories on the rayon pool.
    ///
    /// # Errors
    ///
    /// See [`GillespieSimulator::run_parallel_with_progress`].
    pub fn run_parallel(&mut self, duration: usize, replicates: usize, schedule: Schedule) -> Result<Ensemble> {
        self.run_parallel_with_progress(duration, replicates, schedule, |_| ())
    }

    /// Run `replicates` trajectories on the rayon pool, calling `progress` with the number of
    /// finished replicates after each one completes.
    ///
    /// Every replicate works on its own copy of the construction-time network, so perturbations in
    /// one never reach another. Replicate `r` starts from the same network and draws from the same
    /// stream as in [`GillespieSimulator::run`], so both modes return the same ensemble.
    ///
    /// # Errors
    ///
    /// The first error of any replicate.
    #[instrument(skip(self, schedule, progress), fields(scheduled = schedule.len(), seed = self.base_seed))]
    pub fn run_parallel_with_progress<F>(
        &mut self,
        duration: usize,
        replicates: usize,
        schedule: Schedule,
        progress: F,
    ) -> Result<Ensemble>
    where
        F: Fn(usize) + Sync,
    {
        let labels = self.order().labels(&self.network);
        let first = self.next_stream;
        let finished = AtomicUsize::new(0);

        let this = &*self;
        let trajectories = (0..replicates as u64)
            .into_par_iter()
            .map(|r| {
                let mut worker = this.fork(first + r);
                let trajectory = worker.trajectory(duration, &schedule)?;
                progress(finished.fetch_add(1, Ordering::Relaxed) + 1);
                Ok(trajectory)
            })
            .collect::<Result<Vec<_>>>()?;
        self.next_stream = first + replicates as u64;
        self.state = SimState::Done;

        let ensemble = Ensemble::new(labels, duration, trajectories);
        report(&ensemble);
        Ok(ensemble)
    }

    /// Independent simulator on a fresh copy of the construction-time network, drawing from
    /// stream `stream`.
    fn fork(&self, stream: u64) -> Self {
        Self {
            network: (*self.template).clone(),
            engine: self.engine.clone(),
            template: Arc::clone(&self.template),
            config: self.config.clone(),
            base_seed: self.base_seed,
            next_stream: stream + 1,
            rng: StdRng::seed_from_u64(derive_seed(self.base_seed, stream)),
            state: SimState::Ready,
            time: 0.0,
        }
    }
}

/// Log the outcome of a run.
fn report(ensemble: &Ensemble) {
    let count = |t| ensemble.terminations().iter().filter(|&&x| x == t).count();
    let cancelled = count(Termination::Cancelled);
    if cancelled > 0 {
        warn!(cancelled, replicates = ensemble.replicates(), "run cancelled");
    }
    info!(
        replicates = ensemble.replicates(),
        ticks = ensemble.ticks(),
        absorbed = count(Termination::Absorbed),
        "run complete"
    );
}

#[cfg(test)]
mod tests {
    use assertables::*;
    use rstest::*;
    use tracing_test::traced_test;

    use super::*;
    use crate::model::{
        Kinetics,
        NodeType,
    };

    /// One node decaying from `population` with no production.
    fn decay(population: u64, gamma: f64) -> Network {
        let mut network = Network::new();
        network
            .add_node("A", NodeType::TranscriptionFactor, Kinetics::new(population, 0.0, gamma))
            .unwrap();
        network
    }

    fn seeded(network: Network, seed: u64) -> GillespieSimulator {
        GillespieSimulator::new(network, SimulationConfig::default().with_seed(seed)).unwrap()
    }

    #[rstest]
    fn test_trajectory_shape() {
        let mut sim = seeded(Network::with_counts(1, 0, 2), 5);
        let trajectory = sim.run_trajectory(10, Schedule::new()).unwrap();

        assert_eq!(trajectory.len(), 10);
        assert_eq!(trajectory.populations().len(), 30);
        assert_eq!(trajectory.times(), (0..10).map(f64::from).collect::<Vec<_>>());
        assert_eq!(sim.state(), SimState::Done);
    }

    #[rstest]
    fn test_zero_duration_records_nothing() {
        let mut sim = seeded(decay(3, 1.0), 1);
        let trajectory = sim.run_trajectory(0, Schedule::new()).unwrap();
        assert!(trajectory.is_empty());
        assert_eq!(trajectory.termination(), Termination::Completed);
    }

    #[rstest]
    fn test_absorbed_draw() {
        let mut sim = seeded(decay(0, 1.0), 1);
        assert_eq!(sim.draw(), Draw::ABSORBED);
        assert_eq!(sim.step().unwrap(), Draw::ABSORBED);
        assert_eq!(sim.state(), SimState::Absorbed);
    }

    #[rstest]
    fn test_absorption_fills_remaining_ticks() {
        let mut sim = seeded(decay(3, 5.0), 9);
        let trajectory = sim.run_trajectory(50, Schedule::new()).unwrap();

        assert_eq!(trajectory.len(), 50);
        assert_eq!(trajectory.termination(), Termination::Absorbed);
        assert_eq!(trajectory.population(0, 0), Some(3));
        assert_eq!(trajectory.population(49, 0), Some(0));
    }

    #[rstest]
    fn test_populations_never_increase_without_production() {
        let mut sim = seeded(decay(200, 0.1), 2);
        let trajectory = sim.run_trajectory(40, Schedule::new()).unwrap();
        for pair in trajectory.populations().windows(2) {
            assert_le!(pair[1], pair[0]);
        }
    }

    #[rstest]
    fn test_step_applies_one_event() {
        let mut sim = seeded(decay(10, 1.0), 3);
        let next = sim.step().unwrap();

        assert_eq!(next.reaction, Some(1));
        assert_eq!(sim.network().node_by_label("A").unwrap().population, 9);
        assert_eq!(sim.time(), next.tau);
        assert_eq!(sim.propensities(), [0.0, 9.0]);
    }

    #[rstest]
    fn test_perturbation_revives_absorbed_trajectory() {
        let mut sim = seeded(decay(0, 0.5), 4);
        let schedule = Schedule::new().at(5, |view| {
            view.node_by_label_mut("A").unwrap().beta = 100.0;
        });
        let trajectory = sim.run_trajectory(20, schedule).unwrap();

        for tick in 0..5 {
            assert_eq!(trajectory.population(tick, 0), Some(0));
        }
        assert_gt!(trajectory.population(19, 0).unwrap(), 0);
        assert_eq!(trajectory.termination(), Termination::Completed);
    }

    #[rstest]
    fn test_perturbation_visible_at_its_tick() {
        let mut sim = seeded(decay(0, 0.0), 4);
        let trajectory = sim.run_trajectory(5, Schedule::new().at(2, |view| {
            view.node_by_label_mut("A").unwrap().population = 7;
        }));
        let trajectory = trajectory.unwrap();
        let column: Vec<_> = (0..5).filter_map(|t| trajectory.population(t, 0)).collect();
        assert_eq!(column, [0, 0, 7, 7, 7]);
    }

    #[rstest]
    fn test_perturbation_runs_once_per_replicate() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let schedule = Schedule::new().at(3, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut sim = seeded(Network::with_counts(1, 0, 0), 8);
        sim.run(10, 4, schedule).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[rstest]
    fn test_perturbation_past_duration_never_runs() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let schedule = Schedule::new().at(10, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut sim = seeded(Network::with_counts(1, 0, 0), 8);
        sim.run(10, 2, schedule).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[rstest]
    fn test_replicates_restart_from_initial_populations() {
        let mut sim = seeded(decay(50, 0.5), 6);
        let ensemble = sim.run(30, 3, Schedule::new()).unwrap();
        for r in 0..3 {
            assert_eq!(ensemble.population(r, 0, 0), Some(50));
        }
    }

    #[rstest]
    fn test_force_transcription_factors() {
        let mut sim = seeded(Network::with_counts(2, 1, 0), 1);
        sim.perturb(|view| force_transcription_factors(Some(2), Some(5.0), None)(view)).unwrap();

        for label in ["TF_0", "TF_1"] {
            let tf = sim.network().node_by_label(label).unwrap();
            assert_eq!((tf.population, tf.beta, tf.gamma), (2, 5.0, 0.1));
        }
        assert_eq!(sim.propensities()[..4], [5.0, 0.2, 5.0, 0.2]);
    }

    #[rstest]
    fn test_cancelled_run_pads_ticks() {
        let token = CancellationToken::new();
        token.cancel();
        let config = SimulationConfig::default().with_seed(1).with_cancellation(token);
        let mut sim = GillespieSimulator::new(decay(10, 0.1), config).unwrap();

        let ensemble = sim.run_parallel(15, 3, Schedule::new()).unwrap();
        assert_eq!(ensemble.terminations(), [Termination::Cancelled; 3]);
        assert_eq!(ensemble.population(2, 14, 0), Some(10));
    }

    #[rstest]
    fn test_sequential_and_parallel_agree() {
        let mut network = Network::with_counts(1, 0, 1);
        let (tf, te) = (network.id_of("TF_0").unwrap(), network.id_of("TE_0").unwrap());
        network.add_edge(tf, te, 3.0, 2.0).unwrap();
        network.node_mut(tf).unwrap().population = 4;

        let sequential = seeded(network.clone(), 77).run(20, 6, Schedule::new()).unwrap();
        let parallel = seeded(network, 77).run_parallel(20, 6, Schedule::new()).unwrap();
        assert_eq!(sequential, parallel);
    }

    #[rstest]
    fn test_rate_knockdown_agrees_across_modes() {
        let mut network = Network::with_counts(1, 0, 1);
        let (tf, te) = (network.id_of("TF_0").unwrap(), network.id_of("TE_0").unwrap());
        network.add_edge(tf, te, 5.0, 2.0).unwrap();
        let node = network.node_mut(tf).unwrap();
        (node.population, node.beta, node.gamma) = (10, 10.0, 1.0);

        let knockdown = || {
            let mut schedule = Schedule::new();
            schedule.insert(10, force_transcription_factors(None, Some(0.0), None));
            schedule
        };
        let sequential = seeded(network.clone(), 5).run(20, 4, knockdown()).unwrap();
        let parallel = seeded(network, 5).run_parallel(20, 4, knockdown()).unwrap();
        assert_eq!(sequential, parallel);
    }

    #[rstest]
    fn test_sequential_replicates_start_from_construction_rates() {
        let mut sim = seeded(decay(0, 1.0), 2);
        let schedule = Schedule::new().at(0, |view| {
            view.node_by_label_mut("A").unwrap().beta = 50.0;
        });
        sim.run(5, 2, schedule).unwrap();

        let ensemble = sim.run(5, 3, Schedule::new()).unwrap();
        assert_eq!(ensemble.terminations(), [Termination::Absorbed; 3]);
        assert_eq!(ensemble.terminal_means(), [0.0]);
    }

    #[rstest]
    fn test_ticks_record_state_at_integer_times() {
        let mut network = Network::with_counts(1, 0, 1);
        let (tf, te) = (network.id_of("TF_0").unwrap(), network.id_of("TE_0").unwrap());
        network.add_edge(tf, te, 4.0, 2.0).unwrap();
        let node = network.node_mut(tf).unwrap();
        (node.population, node.beta, node.gamma) = (5, 3.0, 0.5);
        let ticks: u32 = 30;

        // Replay the same stream event by event; row `t` holds every event with time <= t.
        let mut replay = network.clone();
        let mut engine = PropensityEngine::new(&replay).unwrap();
        let order = engine.order().clone();
        let mut rng = StdRng::seed_from_u64(derive_seed(9, 0));
        let mut time = 0.0;
        let mut pending = sampling::draw(engine.propensities(), &mut rng);
        let mut expected = Vec::new();
        for tick in 0..ticks {
            while let Some(reaction) = pending.reaction.filter(|_| time + pending.tau <= f64::from(tick)) {
                let Reaction { node, change } = engine.events().reaction(reaction).unwrap();
                let target = replay.node_mut(order.get(node).unwrap()).unwrap();
                target.population = target.population.checked_add_signed(change.into()).unwrap();
                time += pending.tau;
                engine.update(&replay).unwrap();
                pending = sampling::draw(engine.propensities(), &mut rng);
            }
            expected.extend(order.iter().map(|id| replay.node(id).unwrap().population));
        }

        let ensemble = seeded(network, 9).run(usize::try_from(ticks).unwrap(), 1, Schedule::new()).unwrap();
        assert_eq!(ensemble.populations(), expected);
        assert_ne!(expected[..2], expected[expected.len() - 2..]);
    }

    #[rstest]
    fn test_transcription_factor_may_regulate_heterochromatin() {
        let types: std::collections::HashMap<String, NodeType> = [
            ("TF".to_owned(), NodeType::TranscriptionFactor),
            ("ZF".to_owned(), NodeType::ZincFingerRepressor),
            ("TE".to_owned(), NodeType::TransposableElement),
        ]
        .into();
        let mut network = crate::builder::NetworkBuilder::default()
            .from_edge_list(&[("TF", "ZF"), ("ZF", "TE")], &types)
            .unwrap();
        let (tf, het) = (network.id_of("TF").unwrap(), network.heterochromatin()[0]);
        network.add_edge(tf, het, 1.0, 2.0).unwrap();
        network.node_mut(tf).unwrap().population = 10;

        let mut sim = seeded(network, 3);
        assert_eq!(sim.network().degree(het), 3);
        let ensemble = sim.run(10, 2, Schedule::new()).unwrap();
        assert_eq!(ensemble.nodes(), 4);
        assert_eq!(ensemble.population(0, 0, 0), Some(10));
    }

    #[rstest]
    fn test_parallel_reports_progress() {
        let mut sim = seeded(Network::with_counts(1, 0, 0), 3);
        let seen = AtomicUsize::new(0);
        sim.run_parallel_with_progress(5, 8, Schedule::new(), |done| {
            seen.fetch_max(done, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 8);
    }

    #[rstest]
    fn test_consecutive_runs_use_fresh_streams() {
        let mut sim = seeded(decay(100, 0.2), 12);
        let first = sim.run(10, 2, Schedule::new()).unwrap();
        let second = sim.run(10, 2, Schedule::new()).unwrap();
        assert_ne!(first.populations(), second.populations());
    }

    #[rstest]
    fn test_invalid_topology_rejected() {
        let mut network = Network::with_counts(0, 1, 1);
        let (zf, te) = (network.id_of("ZF_0").unwrap(), network.id_of("TE_0").unwrap());
        network.add_edge(zf, te, 1.0, 2.0).unwrap();

        let res = GillespieSimulator::new(network, SimulationConfig::default());
        assert!(matches!(res, Err(NetworkError::InvalidTopology { .. })));
    }

    #[rstest]
    #[traced_test]
    fn test_run_is_logged() {
        let mut sim = seeded(decay(5, 0.1), 1);
        sim.run(3, 2, Schedule::new()).unwrap();
        assert!(logs_contain("run complete"));
    }

    #[rstest]
    fn test_ensemble_means() {
        let trajectories = vec![
            Trajectory {
                nodes: 2,
                times: vec![0.0, 1.0],
                populations: vec![1, 10, 3, 20],
                termination: Termination::Completed,
            },
            Trajectory {
                nodes: 2,
                times: vec![0.0, 1.0],
                populations: vec![1, 10, 5, 40],
                termination: Termination::Absorbed,
            },
        ];
        let ensemble = Ensemble::new(vec!["a".into(), "b".into()], 2, trajectories);

        assert_eq!(ensemble.time(1, 1), Some(1.0));
        assert_eq!(ensemble.population(1, 1, 1), Some(40));
        assert_none!(ensemble.population(0, 2, 0));
        assert_eq!(ensemble.mean_population(1, 0), Some(4.0));
        assert_eq!(ensemble.terminal_means(), [4.0, 30.0]);
        assert_eq!(ensemble.termination(1), Some(Termination::Absorbed));
    }
}
