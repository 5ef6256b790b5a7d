use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Simulation configuration.
///
/// Loaded from a TOML file and validated before use; any out-of-range
/// parameter would silently push incomes, conditions, or status outside
/// `[0, 1]`, so construction is the only place values are checked.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    pub grid: GridConfig,
    pub model: ModelConfig,
    pub run: RunConfig,
    pub output: OutputConfig,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub height: usize,
    pub width: usize,

    /// Wrap neighborhoods around the edges instead of truncating them.
    #[serde(default)]
    pub torus: bool,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Per-tick condition decay subtracted uniformly from the lattice.
    pub depreciation_rate: f64,
    /// Base vacate probability.
    pub mobility: f64,
    /// Seed value for the neighborhood status feedback variable.
    pub initial_status: f64,
    /// Mean of the initial per-cell condition draw.
    pub initial_condition: f64,
    /// Standard deviation of the noise injected into status every tick.
    pub status_var: f64,

    /// North-south scaling of asking prices; 0 disables it.
    #[serde(default)]
    pub distance_gradient: f64,

    /// Which bounds the vacancy income redraw uses.
    #[serde(default)]
    pub redraw_bounds: RedrawBounds,
}

/// Bounds of the income draw a prospective occupant makes against a vacant
/// cell's asking price.
///
/// `Quartile` is the canonical rule; `PriceFloor` uses the asking price itself
/// as the lower bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RedrawBounds {
    #[default]
    Quartile,
    PriceFloor,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Tick cap after which a run halts inconclusively.
    pub max_ticks: usize,

    /// Seed for the generator; absent means OS entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Number of ticks between trajectory saves.
    pub steps_per_save: usize,
    /// Number of saves written per trajectory file.
    pub saves_per_file: usize,
}

impl Config {
    /// Load a [`Config`] from a TOML file and validate it.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed, or if any
    /// configuration value is out of range.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        let config: Config = toml::from_str(&contents).context("failed to parse config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        check_num(self.grid.height, 2..=512).context("invalid grid height")?;
        check_num(self.grid.width, 2..=512).context("invalid grid width")?;

        check_num(self.model.depreciation_rate, 0.0..=0.1).context("invalid depreciation rate")?;
        check_num(self.model.mobility, 0.0..=1.0).context("invalid mobility")?;
        check_num(self.model.initial_status, 0.0..=1.0).context("invalid initial status")?;
        check_num(self.model.initial_condition, 0.0..=1.0).context("invalid initial condition")?;
        check_num(self.model.status_var, 0.0..=0.5).context("invalid status variance")?;
        check_num(self.model.distance_gradient, -1.0..=1.0)
            .context("invalid distance gradient")?;

        check_num(self.run.max_ticks, 1..=1_000_000).context("invalid maximum tick count")?;

        check_num(self.output.steps_per_save, 1..=10_000)
            .context("invalid number of steps per save")?;
        check_num(self.output.saves_per_file, 1..=10_000)
            .context("invalid number of saves per file")?;

        Ok(())
    }
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}
