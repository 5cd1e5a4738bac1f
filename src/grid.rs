//! Food grid for the environment.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Square grid of per-cell food densities.
///
/// Densities are integers clamped to `[0, food_cap]`; regrowth is monotonic
/// up to the cap between ticks. Owned exclusively by the environment
/// coordinator and read-shared with agents through world snapshots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FoodGrid {
    grid_size: usize,
    cells: Vec<u32>,
    food_cap: u32,
}

impl FoodGrid {
    /// Create a new empty food grid
    pub fn new(grid_size: usize, food_cap: u32) -> Self {
        Self {
            grid_size,
            cells: vec![0; grid_size * grid_size],
            food_cap,
        }
    }

    /// Seed a fraction of cells with random food amounts
    pub fn initialize<R: Rng>(&mut self, density: f32, rng: &mut R) {
        if self.food_cap == 0 {
            return;
        }
        for cell in &mut self.cells {
            if rng.gen::<f32>() < density {
                *cell = rng.gen_range(1..=self.food_cap);
            }
        }
    }

    #[inline]
    fn index(&self, x: u8, y: u8) -> Option<usize> {
        let x = x as usize;
        let y = y as usize;
        if x < self.grid_size && y < self.grid_size {
            Some(y * self.grid_size + x)
        } else {
            None
        }
    }

    /// Get food amount at position (0 outside the grid)
    #[inline]
    pub fn get(&self, x: u8, y: u8) -> u32 {
        self.index(x, y).map(|i| self.cells[i]).unwrap_or(0)
    }

    /// Set food amount at position, clamped to the cap
    #[inline]
    pub fn set(&mut self, x: u8, y: u8, amount: u32) {
        let cap = self.food_cap;
        if let Some(i) = self.index(x, y) {
            self.cells[i] = amount.min(cap);
        }
    }

    /// Consume food at position, returns the amount actually consumed
    #[inline]
    pub fn consume(&mut self, x: u8, y: u8, max_amount: u32) -> u32 {
        match self.index(x, y) {
            Some(i) => {
                let consumed = self.cells[i].min(max_amount);
                self.cells[i] -= consumed;
                consumed
            }
            None => 0,
        }
    }

    /// Add food at position, clamped to the cap; returns the amount added
    pub fn introduce(&mut self, x: u8, y: u8, amount: u32) -> u32 {
        let cap = self.food_cap;
        match self.index(x, y) {
            Some(i) => {
                let added = (cap - self.cells[i]).min(amount);
                self.cells[i] += added;
                added
            }
            None => 0,
        }
    }

    /// Regrow every cell by `rate`, monotonic up to the cap
    pub fn regrow(&mut self, rate: u32) {
        for cell in &mut self.cells {
            *cell = (*cell + rate).min(self.food_cap);
        }
    }

    /// With probability `rate`, add `amount` food at one random cell
    pub fn introduce_random<R: Rng>(&mut self, rate: f64, amount: u32, rng: &mut R) {
        if rate <= 0.0 || rng.gen::<f64>() >= rate {
            return;
        }
        let x = rng.gen_range(0..self.grid_size) as u8;
        let y = rng.gen_range(0..self.grid_size) as u8;
        self.introduce(x, y, amount);
    }

    /// Sum of food in cells along a direction ray, up to `range` cells
    pub fn sense_direction(&self, x: u8, y: u8, dx: i8, dy: i8, range: u8) -> u32 {
        let mut total = 0;
        let mut cx = x as i16;
        let mut cy = y as i16;

        for _ in 0..range {
            cx += dx as i16;
            cy += dy as i16;

            if cx >= 0 && cx < self.grid_size as i16 && cy >= 0 && cy < self.grid_size as i16 {
                total += self.cells[cy as usize * self.grid_size + cx as usize];
            }
        }

        total
    }

    /// Get total food in the grid
    pub fn total_food(&self) -> u64 {
        self.cells.iter().map(|&c| c as u64).sum()
    }

    /// Get grid size
    #[inline]
    pub fn size(&self) -> usize {
        self.grid_size
    }

    /// Per-cell cap
    #[inline]
    pub fn cap(&self) -> u32 {
        self.food_cap
    }

    /// Flattened row-major cells, for snapshot publication
    pub fn cells(&self) -> &[u32] {
        &self.cells
    }

    /// Rebuild a grid from flattened snapshot cells
    pub fn from_cells(grid_size: usize, food_cap: u32, cells: Vec<u32>) -> Self {
        Self {
            grid_size,
            cells,
            food_cap,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume() {
        let mut grid = FoodGrid::new(10, 50);
        grid.set(3, 3, 25);

        assert_eq!(grid.get(3, 3), 25);

        let consumed = grid.consume(3, 3, 10);
        assert_eq!(consumed, 10);
        assert_eq!(grid.get(3, 3), 15);

        let consumed = grid.consume(3, 3, 100);
        assert_eq!(consumed, 15);
        assert_eq!(grid.get(3, 3), 0);
    }

    #[test]
    fn test_regrow_monotonic_up_to_cap() {
        let mut grid = FoodGrid::new(4, 10);
        grid.set(1, 1, 9);
        grid.regrow(3);

        assert_eq!(grid.get(1, 1), 10);
        assert_eq!(grid.get(0, 0), 3);

        grid.regrow(3);
        assert_eq!(grid.get(1, 1), 10);
    }

    #[test]
    fn test_introduce_respects_cap() {
        let mut grid = FoodGrid::new(4, 10);
        grid.set(2, 2, 8);
        let added = grid.introduce(2, 2, 5);
        assert_eq!(added, 2);
        assert_eq!(grid.get(2, 2), 10);
    }

    #[test]
    fn test_out_of_bounds_is_inert() {
        let mut grid = FoodGrid::new(4, 10);
        assert_eq!(grid.get(9, 9), 0);
        assert_eq!(grid.consume(9, 9, 5), 0);
        assert_eq!(grid.introduce(9, 9, 5), 0);
    }

    #[test]
    fn test_sense_direction() {
        let mut grid = FoodGrid::new(10, 50);
        grid.set(5, 4, 10);
        grid.set(6, 4, 20);
        grid.set(7, 4, 15);

        let sensed = grid.sense_direction(4, 4, 1, 0, 3);
        assert_eq!(sensed, 45);
        let sensed = grid.sense_direction(4, 4, -1, 0, 3);
        assert_eq!(sensed, 0);
    }

    #[test]
    fn test_total_food() {
        let mut grid = FoodGrid::new(4, 10);
        grid.set(0, 0, 4);
        grid.set(3, 3, 6);
        assert_eq!(grid.total_food(), 10);
    }
}
