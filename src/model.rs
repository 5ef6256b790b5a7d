use crate::config::{ModelConfig, RedrawBounds};
use crate::lattice::Lattice;
use crate::sampling::sample_bounded_normal;
use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Condition lost per tick of continued vacancy, as a multiple of the
/// depreciation rate.
const VACANCY_DECAY_FACTOR: f64 = 0.2;

/// Ticks are months; cycle durations are reported in years.
const TICKS_PER_YEAR: f64 = 12.0;

/// A property cell: an occupied dwelling or a vacancy at a fixed lattice slot.
///
/// Income belongs to the occupant and is therefore cell state; condition
/// belongs to the [`Lattice`]. The asking price is set when the occupant
/// decides to leave and decays while the cell stays vacant, so it survives
/// across ticks; it is meaningful only while the cell is vacant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    x: usize,
    y: usize,
    income: f64,
    occupied: bool,
    asking_price: f64,
}

/// Output of a cell's decide phase, consumed by its commit phase the same
/// tick and invalid outside it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Decision {
    pub vacate: bool,
    pub asking_price: Option<f64>,
    pub rent_gap: f64,
    pub renovate: bool,
}

impl Cell {
    pub fn new(x: usize, y: usize, income: f64) -> Self {
        Self {
            x,
            y,
            income,
            occupied: true,
            asking_price: 0.0,
        }
    }

    pub fn x(&self) -> usize {
        self.x
    }

    pub fn y(&self) -> usize {
        self.y
    }

    pub fn income(&self) -> f64 {
        self.income
    }

    pub fn occupied(&self) -> bool {
        self.occupied
    }

    pub fn asking_price(&self) -> f64 {
        self.asking_price
    }

    /// Decide phase. Reads only the previous tick's committed snapshot (the
    /// lattice, the cell vector, and the global status) plus this cell's own
    /// uniform mobility draw `u`; mutates nothing, so the evaluation order
    /// across cells cannot affect the outcome.
    pub fn decide(
        &self,
        lattice: &Lattice,
        cells: &[Cell],
        status: f64,
        params: &ModelConfig,
        u: f64,
    ) -> Decision {
        let neighbors = neighbors_with_expansion(lattice, self.x, self.y);

        let neighbor_mean_income =
            neighbors.iter().map(|&i| cells[i].income).sum::<f64>() / neighbors.len() as f64;
        let income_gap = (self.income - neighbor_mean_income).max(0.0);

        let own_condition = lattice.condition_at(self.x, self.y);
        let neighborhood_mean_condition = neighbors
            .iter()
            .map(|&i| lattice.conditions()[i])
            .sum::<f64>()
            / neighbors.len() as f64;
        // Freshly computed every tick, never cached across ticks.
        let rent_gap = (neighborhood_mean_condition - own_condition).max(0.0);

        let mut decision = Decision {
            rent_gap,
            ..Decision::default()
        };

        if self.occupied {
            decision.vacate = u < params.mobility * (1.5 - status + income_gap);
            if decision.vacate {
                let value = 0.5 * (own_condition + neighbor_mean_income);
                let gradient = 1.0
                    + params.distance_gradient * (0.5 - self.y as f64 / lattice.height() as f64);
                decision.asking_price = Some((value * gradient).clamp(0.0, 1.0));
            } else {
                decision.renovate = rent_gap > 0.0 && self.income > own_condition;
            }
        }

        decision
    }

    /// Commit phase. Mutates only this cell's own fields, the lattice value at
    /// its own coordinate, and the shared `income_change` accumulator, using
    /// nothing but snapshot values and this cell's same-tick decision.
    pub fn commit<R: Rng + ?Sized>(
        &mut self,
        decision: &Decision,
        lattice: &mut Lattice,
        status: f64,
        params: &ModelConfig,
        income_change: &mut f64,
        rng: &mut R,
    ) -> Result<()> {
        if decision.vacate {
            *income_change -= self.income;
            self.income = 0.0;
            self.occupied = false;
            if let Some(price) = decision.asking_price {
                self.asking_price = price;
            }
        } else if !self.occupied {
            let bound = status + self.asking_price;
            let (lower, upper) = match params.redraw_bounds {
                RedrawBounds::Quartile => (0.25 * bound, (0.75 * bound).min(1.0)),
                RedrawBounds::PriceFloor => {
                    let upper = (0.75 * bound).min(1.0);
                    (self.asking_price, upper.max(self.asking_price))
                }
            };
            let income = sample_bounded_normal(rng, 0.5 * bound, 0.1, lower, upper)?;

            if income > self.asking_price {
                *income_change += income - self.income;
                self.income = income;
                self.occupied = true;

                // New owners improve a property that lags its neighborhood.
                if decision.rent_gap > 0.0 && income > lattice.condition_at(self.x, self.y) {
                    self.improve(lattice, status, rng)?;
                }
            } else {
                self.asking_price = 0.5 * (self.asking_price + income);
                let decayed = lattice.condition_at(self.x, self.y)
                    - VACANCY_DECAY_FACTOR * params.depreciation_rate;
                lattice.set_condition_at(self.x, self.y, decayed);
            }
        } else if decision.renovate {
            self.improve(lattice, status, rng)?;
        }

        Ok(())
    }

    fn improve<R: Rng + ?Sized>(
        &self,
        lattice: &mut Lattice,
        status: f64,
        rng: &mut R,
    ) -> Result<()> {
        let condition = lattice.condition_at(self.x, self.y);
        let improvement = sample_bounded_normal(rng, status - condition, 0.1, 0.0, 0.5)?;
        lattice.set_condition_at(self.x, self.y, condition + improvement);
        Ok(())
    }
}

/// Moore neighborhood starting at radius 1, expanding until at least one
/// neighbor exists. Only degenerate grids need more than one iteration; the
/// radius is capped at the larger grid dimension.
fn neighbors_with_expansion(lattice: &Lattice, x: usize, y: usize) -> Vec<usize> {
    let max_radius = lattice.width().max(lattice.height());
    let mut radius = 1;
    loop {
        let neighbors = lattice.neighbor_indices(x, y, radius);
        if !neighbors.is_empty() || radius >= max_radius {
            return neighbors;
        }
        radius += 1;
    }
}

/// Full simulation state at the end of a tick.
///
/// One value of this type is serialized per trajectory save; it is the entire
/// surface a rendering or metrics layer needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub tick: usize,
    pub status: f64,
    pub mean_income: f64,
    pub mean_condition: f64,
    pub hit_bottom: bool,
    pub last_bottom_tick: usize,
    pub gentrification_duration: Option<f64>,
    pub lattice: Lattice,
    pub cells: Vec<Cell>,
}

impl State {
    /// Record a status floor hit. Exact comparison against the clamped
    /// boundary is intentional: the clamp in the aggregation step makes the
    /// boundary reachable. The latest bottom wins.
    pub fn track_bottom(&mut self) {
        if self.status == 0.0 {
            self.hit_bottom = true;
            self.last_bottom_tick = self.tick;
        }
    }

    /// A full boom-bust-recovery trajectory: the status floor was hit earlier
    /// and status now sits at its ceiling with high combined wealth.
    pub fn cycle_complete(&self) -> bool {
        self.hit_bottom
            && self.status == 1.0
            && 0.5 * (self.mean_condition + self.mean_income) > 0.5
    }

    /// Record the duration of the completed cycle, in years.
    pub fn mark_cycle_complete(&mut self) {
        self.gentrification_duration =
            Some((self.tick - self.last_bottom_tick) as f64 / TICKS_PER_YEAR);
    }
}
