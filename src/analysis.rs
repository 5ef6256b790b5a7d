use crate::model::State;
use crate::stats::{Accumulator, Extrema};
use anyhow::{Context, Result};
use rmp_serde::decode;
use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

/// An observable computed over a trajectory of state snapshots.
pub trait Obs {
    fn update(&mut self, state: &State) -> Result<()>;
    fn report(&self) -> serde_json::Value;
}

/// Summary of the status trajectory: moments plus where it bottomed out and
/// peaked.
pub struct StatusObs {
    acc: Accumulator,
    extrema: Extrema,
}

impl StatusObs {
    pub fn new() -> Self {
        Self {
            acc: Accumulator::new(),
            extrema: Extrema::new(),
        }
    }
}

impl Obs for StatusObs {
    fn update(&mut self, state: &State) -> Result<()> {
        self.acc.add(state.status);
        self.extrema.observe(state.tick, state.status);
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({
            "status": self.acc.report(),
            "status_extrema": self.extrema.report(),
        })
    }
}

/// Fraction of occupied cells per snapshot.
pub struct OccupancyObs {
    acc: Accumulator,
}

impl OccupancyObs {
    pub fn new() -> Self {
        Self {
            acc: Accumulator::new(),
        }
    }
}

impl Obs for OccupancyObs {
    fn update(&mut self, state: &State) -> Result<()> {
        let occupied = state.cells.iter().filter(|cell| cell.occupied()).count();
        self.acc.add(occupied as f64 / state.cells.len() as f64);
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({ "occupancy": self.acc.report() })
    }
}

/// Population mean income and condition per snapshot.
pub struct WealthObs {
    income: Accumulator,
    condition: Accumulator,
}

impl WealthObs {
    pub fn new() -> Self {
        Self {
            income: Accumulator::new(),
            condition: Accumulator::new(),
        }
    }
}

impl Obs for WealthObs {
    fn update(&mut self, state: &State) -> Result<()> {
        self.income.add(state.mean_income);
        self.condition.add(state.mean_condition);
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({
            "mean_income": self.income.report(),
            "mean_condition": self.condition.report(),
        })
    }
}

/// Cycle outcome as of the last snapshot seen: whether status hit its floor,
/// when, and the gentrification duration if the cycle completed.
pub struct CycleObs {
    tick: usize,
    hit_bottom: bool,
    last_bottom_tick: usize,
    gentrification_duration: Option<f64>,
}

impl CycleObs {
    pub fn new() -> Self {
        Self {
            tick: 0,
            hit_bottom: false,
            last_bottom_tick: 0,
            gentrification_duration: None,
        }
    }
}

impl Obs for CycleObs {
    fn update(&mut self, state: &State) -> Result<()> {
        self.tick = state.tick;
        self.hit_bottom = state.hit_bottom;
        self.last_bottom_tick = state.last_bottom_tick;
        self.gentrification_duration = state.gentrification_duration;
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({
            "last_tick": self.tick,
            "hit_bottom": self.hit_bottom,
            "last_bottom_tick": self.last_bottom_tick,
            "gentrification_duration": self.gentrification_duration,
        })
    }
}

/// Runs every observable over the snapshots of one or more trajectory files.
pub struct Analyzer {
    obs_ptr_vec: Vec<Box<dyn Obs>>,
}

impl Analyzer {
    pub fn new() -> Self {
        let obs_ptr_vec: Vec<Box<dyn Obs>> = vec![
            Box::new(StatusObs::new()),
            Box::new(OccupancyObs::new()),
            Box::new(WealthObs::new()),
            Box::new(CycleObs::new()),
        ];
        Self { obs_ptr_vec }
    }

    /// Feed every snapshot in a trajectory file to the observables.
    ///
    /// A run that terminates early writes fewer snapshots than configured, so
    /// the file is read to its end rather than to a fixed count.
    pub fn add_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);

        loop {
            let state: State = match decode::from_read(&mut reader) {
                Ok(state) => state,
                Err(error) if end_of_stream(&error) => break,
                Err(error) => return Err(error).context("failed to read state"),
            };
            for obs in &mut self.obs_ptr_vec {
                obs.update(&state).context("failed to update observable")?;
            }
        }
        Ok(())
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let writer = BufWriter::new(file);

        let reports: Vec<_> = self.obs_ptr_vec.iter().map(|obs| obs.report()).collect();
        serde_json::to_writer_pretty(writer, &reports)?;
        Ok(())
    }
}

fn end_of_stream(error: &decode::Error) -> bool {
    matches!(
        error,
        decode::Error::InvalidMarkerRead(io_error)
            if io_error.kind() == std::io::ErrorKind::UnexpectedEof
    )
}
