use serde::{Deserialize, Serialize};

/// Fixed-size grid of property conditions.
///
/// Condition is a neighborhood-level resource read concurrently by many cells,
/// so it lives here rather than on the cells themselves. Values are stored in
/// row-major order and every write clamps into `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lattice {
    width: usize,
    height: usize,
    torus: bool,
    condition: Vec<f64>,
}

impl Lattice {
    pub fn new(width: usize, height: usize, torus: bool) -> Self {
        Self {
            width,
            height,
            torus,
            condition: vec![0.0; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn len(&self) -> usize {
        self.condition.len()
    }

    pub fn index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    pub fn position(&self, index: usize) -> (usize, usize) {
        (index % self.width, index / self.width)
    }

    pub fn condition_at(&self, x: usize, y: usize) -> f64 {
        self.condition[self.index(x, y)]
    }

    pub fn set_condition_at(&mut self, x: usize, y: usize, value: f64) {
        let index = self.index(x, y);
        self.condition[index] = value.clamp(0.0, 1.0);
    }

    pub fn conditions(&self) -> &[f64] {
        &self.condition
    }

    pub fn mean_condition(&self) -> f64 {
        self.condition.iter().sum::<f64>() / self.condition.len() as f64
    }

    /// Subtract a uniform depreciation from every cell, clamping at zero.
    pub fn depreciate(&mut self, rate: f64) {
        for value in &mut self.condition {
            *value = (*value - rate).clamp(0.0, 1.0);
        }
    }

    /// Moore neighborhood of `(x, y)` at the given radius, center excluded.
    ///
    /// On a torus the offsets wrap around the edges; positions that coincide
    /// after wrapping (small grids, large radii) are reported once. On a
    /// bounded grid the neighborhood is truncated at the edges, so corner and
    /// edge cells have fewer neighbors and callers must average over however
    /// many indices come back.
    pub fn neighbor_indices(&self, x: usize, y: usize, radius: usize) -> Vec<usize> {
        let center = self.index(x, y);
        let r = radius as isize;
        let mut indices = Vec::with_capacity((2 * radius + 1).pow(2) - 1);

        for dy in -r..=r {
            for dx in -r..=r {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let nx = x as isize + dx;
                let ny = y as isize + dy;
                if self.torus {
                    let nx = nx.rem_euclid(self.width as isize) as usize;
                    let ny = ny.rem_euclid(self.height as isize) as usize;
                    indices.push(self.index(nx, ny));
                } else if (0..self.width as isize).contains(&nx)
                    && (0..self.height as isize).contains(&ny)
                {
                    indices.push(self.index(nx as usize, ny as usize));
                }
            }
        }

        indices.sort_unstable();
        indices.dedup();
        indices.retain(|&index| index != center);
        indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_corner_has_three_neighbors() {
        let lattice = Lattice::new(3, 3, false);
        let neighbors = lattice.neighbor_indices(0, 0, 1);
        assert_eq!(neighbors.len(), 3);
        assert_eq!(neighbors, vec![1, 3, 4]);
    }

    #[test]
    fn bounded_edge_has_five_neighbors() {
        let lattice = Lattice::new(3, 3, false);
        assert_eq!(lattice.neighbor_indices(1, 0, 1).len(), 5);
    }

    #[test]
    fn interior_cell_has_eight_neighbors() {
        let lattice = Lattice::new(3, 3, false);
        assert_eq!(lattice.neighbor_indices(1, 1, 1).len(), 8);
    }

    #[test]
    fn torus_corner_has_eight_neighbors() {
        let lattice = Lattice::new(3, 3, true);
        assert_eq!(lattice.neighbor_indices(0, 0, 1).len(), 8);
    }

    #[test]
    fn torus_wrapping_reports_coincident_positions_once() {
        // On a 2x2 torus the eight offsets collapse onto the three other
        // cells; the center itself never appears.
        let lattice = Lattice::new(2, 2, true);
        let neighbors = lattice.neighbor_indices(0, 0, 1);
        assert_eq!(neighbors, vec![1, 2, 3]);
    }

    #[test]
    fn radius_two_covers_the_full_ring() {
        let lattice = Lattice::new(5, 5, false);
        assert_eq!(lattice.neighbor_indices(2, 2, 2).len(), 24);
    }

    #[test]
    fn condition_writes_clamp_into_unit_interval() {
        let mut lattice = Lattice::new(2, 2, false);
        lattice.set_condition_at(0, 0, 1.7);
        lattice.set_condition_at(1, 0, -0.3);
        assert_eq!(lattice.condition_at(0, 0), 1.0);
        assert_eq!(lattice.condition_at(1, 0), 0.0);
    }

    #[test]
    fn depreciation_clamps_at_zero() {
        let mut lattice = Lattice::new(2, 2, false);
        lattice.set_condition_at(0, 0, 0.5);
        lattice.set_condition_at(1, 0, 0.002);
        lattice.depreciate(0.01);
        assert!((lattice.condition_at(0, 0) - 0.49).abs() < 1e-12);
        assert_eq!(lattice.condition_at(1, 0), 0.0);
    }

    #[test]
    fn index_and_position_are_inverses() {
        let lattice = Lattice::new(4, 3, false);
        for index in 0..lattice.len() {
            let (x, y) = lattice.position(index);
            assert_eq!(lattice.index(x, y), index);
        }
    }
}
