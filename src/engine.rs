use crate::config::Config;
use crate::lattice::Lattice;
use crate::model::{Cell, State};
use crate::sampling::sample_bounded_normal;
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::Normal;
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Status climbed from its floor to its ceiling with high combined
    /// income and condition; the gentrification duration is recorded.
    GentrificationComplete,
    /// The tick cap was reached first; the run is inconclusive.
    ReachedMaxTicks,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::GentrificationComplete => write!(f, "gentrification cycle complete"),
            Outcome::ReachedMaxTicks => write!(f, "reached the maximum tick count"),
        }
    }
}

/// Simulation engine.
///
/// Holds the configuration, current state, and random number generator, and
/// provides methods to initialize, run, save, and load simulations.
#[derive(Serialize, Deserialize)]
pub struct Engine {
    cfg: Config,
    state: State,
    rng: ChaCha12Rng,
}

impl Engine {
    /// Create a new `Engine` with the given configuration and a random
    /// initial neighborhood.
    pub fn generate_initial_condition(cfg: Config) -> Result<Self> {
        let mut rng = match cfg.run.seed {
            Some(seed) => ChaCha12Rng::seed_from_u64(seed),
            None => ChaCha12Rng::try_from_os_rng()?,
        };

        let mut lattice = Lattice::new(cfg.grid.width, cfg.grid.height, cfg.grid.torus);
        let mut cells = Vec::with_capacity(lattice.len());
        for index in 0..lattice.len() {
            let (x, y) = lattice.position(index);
            let condition =
                sample_bounded_normal(&mut rng, cfg.model.initial_condition, 0.1, 0.0, 1.0)?;
            lattice.set_condition_at(x, y, condition);

            // Incomes initially differ little from property conditions.
            let income = sample_bounded_normal(&mut rng, condition, 0.025, 0.0, 1.0)?;
            cells.push(Cell::new(x, y, income));
        }

        let mean_income = cells.iter().map(Cell::income).sum::<f64>() / cells.len() as f64;
        let state = State {
            tick: 0,
            status: cfg.model.initial_status,
            mean_income,
            mean_condition: lattice.mean_condition(),
            hit_bottom: false,
            last_bottom_tick: 0,
            gentrification_duration: None,
            lattice,
            cells,
        };

        Ok(Self { cfg, state, rng })
    }

    pub fn cfg(&self) -> &Config {
        &self.cfg
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// The run has reached a terminal state and cannot be extended.
    pub fn is_finished(&self) -> bool {
        self.state.gentrification_duration.is_some() || self.state.tick >= self.cfg.run.max_ticks
    }

    /// Run the simulation, saving state snapshots to a trajectory file, until
    /// the configured number of saves is written or the run terminates.
    pub fn run_simulation<P: AsRef<Path>>(&mut self, file: P) -> Result<Option<Outcome>> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        let mut outcome = None;
        for i_save in 0..self.cfg.output.saves_per_file {
            for _ in 0..self.cfg.output.steps_per_save {
                outcome = self.step().context("failed to perform step")?;
                if outcome.is_some() {
                    break;
                }
            }

            encode::write(&mut writer, &self.state).context("failed to serialize state")?;

            let progress = 100.0 * (i_save + 1) as f64 / self.cfg.output.saves_per_file as f64;
            log::info!("completed {progress:06.2}%");

            if let Some(outcome) = outcome {
                log::info!("run reached a terminal state: {outcome}");
                break;
            }
        }

        writer.flush().context("failed to flush writer stream")?;

        Ok(outcome)
    }

    /// Save a checkpoint of the entire engine state.
    ///
    /// Can be used to resume the simulation later.
    pub fn save_checkpoint<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, &self).context("failed to serialize engine")?;
        Ok(())
    }

    /// Load a previously saved engine checkpoint.
    pub fn load_checkpoint<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let engine = decode::from_read(&mut reader).context("failed to deserialize engine")?;
        Ok(engine)
    }

    /// Advance the simulation one tick: decide, commit, aggregate, detect.
    ///
    /// Both passes traverse the cells in row-major order and draw from the
    /// single engine generator, so seeded runs are bit-exact reproducible.
    pub fn step(&mut self) -> Result<Option<Outcome>> {
        let old_conditions = self.state.lattice.conditions().to_vec();

        // Decide: every cell observes the same committed snapshot.
        let mut decisions = Vec::with_capacity(self.state.cells.len());
        for cell in &self.state.cells {
            let u = self.rng.random::<f64>();
            decisions.push(cell.decide(
                &self.state.lattice,
                &self.state.cells,
                self.state.status,
                &self.cfg.model,
                u,
            ));
        }

        // Commit: starts only after every cell has decided.
        let status = self.state.status;
        let mut income_change = 0.0;
        for (cell, decision) in self.state.cells.iter_mut().zip(&decisions) {
            cell.commit(
                decision,
                &mut self.state.lattice,
                status,
                &self.cfg.model,
                &mut income_change,
                &mut self.rng,
            )
            .context("failed to commit cell decision")?;
        }

        self.aggregate(&old_conditions, income_change)
            .context("failed to update neighborhood status")?;
        self.state.tick += 1;

        self.state.track_bottom();
        if self.state.cycle_complete() {
            self.state.mark_cycle_complete();
            return Ok(Some(Outcome::GentrificationComplete));
        }
        if self.state.tick >= self.cfg.run.max_ticks {
            return Ok(Some(Outcome::ReachedMaxTicks));
        }

        Ok(None)
    }

    /// Global feedback update: uniform depreciation, then status moves by the
    /// per-cell mean of the aggregate income and condition deltas plus noise.
    /// Status is the sole channel through which local decisions feel the
    /// aggregate state one tick later.
    fn aggregate(&mut self, old_conditions: &[f64], income_change: f64) -> Result<()> {
        self.state.lattice.depreciate(self.cfg.model.depreciation_rate);

        let condition_delta_sum: f64 = self
            .state
            .lattice
            .conditions()
            .iter()
            .zip(old_conditions)
            .map(|(new, old)| new - old)
            .sum();

        let n_cells = self.state.cells.len() as f64;
        let noise = Normal::new(0.0, self.cfg.model.status_var)?.sample(&mut self.rng);
        self.state.status = (self.state.status
            + (income_change + condition_delta_sum) / n_cells
            + noise)
            .clamp(0.0, 1.0);

        self.state.mean_income = self.state.cells.iter().map(Cell::income).sum::<f64>() / n_cells;
        self.state.mean_condition = self.state.lattice.mean_condition();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GridConfig, ModelConfig, OutputConfig, RedrawBounds, RunConfig};
    use std::fs;

    fn active_config() -> Config {
        Config {
            grid: GridConfig {
                height: 6,
                width: 6,
                torus: true,
            },
            model: ModelConfig {
                depreciation_rate: 0.01,
                mobility: 0.3,
                initial_status: 0.5,
                initial_condition: 0.5,
                status_var: 0.05,
                distance_gradient: 0.0,
                redraw_bounds: RedrawBounds::Quartile,
            },
            run: RunConfig {
                max_ticks: 200,
                seed: Some(42),
            },
            output: OutputConfig {
                steps_per_save: 4,
                saves_per_file: 4,
            },
        }
    }

    fn quiet_config() -> Config {
        let mut cfg = active_config();
        cfg.model.depreciation_rate = 0.0;
        cfg.model.mobility = 0.0;
        cfg.model.status_var = 0.0;
        cfg.run.max_ticks = 10;
        cfg
    }

    #[test]
    fn run_halts_exactly_at_the_tick_cap() {
        let mut engine = Engine::generate_initial_condition(quiet_config()).unwrap();
        let mut ticks = 0;
        let outcome = loop {
            ticks += 1;
            if let Some(outcome) = engine.step().unwrap() {
                break outcome;
            }
            assert!(ticks < 50, "run failed to halt");
        };
        assert_eq!(outcome, Outcome::ReachedMaxTicks);
        assert_eq!(ticks, 10);
        assert_eq!(engine.state().tick, 10);
        assert_eq!(engine.state().gentrification_duration, None);
        assert!(engine.is_finished());
    }

    #[test]
    fn status_is_a_fixpoint_without_deltas_and_noise() {
        let mut engine = Engine::generate_initial_condition(quiet_config()).unwrap();
        let old_conditions = engine.state().lattice.conditions().to_vec();
        engine.aggregate(&old_conditions, 0.0).unwrap();
        assert_eq!(engine.state().status, 0.5);
    }

    #[test]
    fn invariants_hold_across_an_active_run() {
        let mut engine = Engine::generate_initial_condition(active_config()).unwrap();
        for _ in 0..200 {
            let outcome = engine.step().unwrap();
            let state = engine.state();

            assert!((0.0..=1.0).contains(&state.status));
            for &condition in state.lattice.conditions() {
                assert!((0.0..=1.0).contains(&condition));
            }
            for cell in &state.cells {
                assert!((0.0..=1.0).contains(&cell.income()));
                assert_eq!(cell.occupied(), cell.income() > 0.0);
            }

            if outcome.is_some() {
                break;
            }
        }
    }

    #[test]
    fn seeded_runs_reproduce_bit_exact() {
        let mut first = Engine::generate_initial_condition(active_config()).unwrap();
        let mut second = Engine::generate_initial_condition(active_config()).unwrap();
        for _ in 0..20 {
            first.step().unwrap();
            second.step().unwrap();
        }
        assert_eq!(first.state(), second.state());
    }

    #[test]
    fn checkpoint_roundtrip_preserves_the_run() {
        let dir = std::env::temp_dir().join(format!("vicinia-checkpoint-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let file = dir.join("checkpoint.msgpack");

        let mut engine = Engine::generate_initial_condition(active_config()).unwrap();
        for _ in 0..7 {
            engine.step().unwrap();
        }
        engine.save_checkpoint(&file).unwrap();

        let mut restored = Engine::load_checkpoint(&file).unwrap();
        assert_eq!(engine.cfg(), restored.cfg());
        assert_eq!(engine.state(), restored.state());

        // The restored generator continues the original stream.
        for _ in 0..7 {
            engine.step().unwrap();
            restored.step().unwrap();
        }
        assert_eq!(engine.state(), restored.state());

        fs::remove_dir_all(&dir).ok();
    }
}
