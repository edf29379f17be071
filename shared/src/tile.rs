use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bounds::{LatLng, MapBounds};

pub const DEFAULT_TILE_SIZE_DEG: f64 = 0.1;

/// Tolerance, in tile units, for coordinates sitting on a tile edge.
const EDGE_EPSILON: f64 = 1e-9;

/// Grid cell used as the cache partition key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileId {
    pub row: i32,
    pub col: i32,
}

impl TileId {
    pub const fn new(row: i32, col: i32) -> Self {
        Self { row, col }
    }

    pub const fn offset(&self, d_row: i32, d_col: i32) -> Self {
        Self {
            row: self.row + d_row,
            col: self.col + d_col,
        }
    }

    /// Chebyshev distance in tiles.
    pub fn distance(&self, other: &TileId) -> i32 {
        (self.row - other.row)
            .abs()
            .max((self.col - other.col).abs())
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.row, self.col)
    }
}

/// Order in which the eight neighbours of a tile are visited:
/// north, south, east, west, then the diagonals.
const RING_OFFSETS: [(i32, i32); 8] = [
    (1, 0),
    (-1, 0),
    (0, 1),
    (0, -1),
    (1, 1),
    (1, -1),
    (-1, 1),
    (-1, -1),
];

/// Fixed-degree grid dividing the world into square tiles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileGrid {
    size_deg: f64,
}

impl Default for TileGrid {
    fn default() -> Self {
        Self::new(DEFAULT_TILE_SIZE_DEG)
    }
}

impl TileGrid {
    pub fn new(size_deg: f64) -> Self {
        let size_deg = if size_deg.is_finite() && size_deg > 0.0 {
            size_deg
        } else {
            DEFAULT_TILE_SIZE_DEG
        };
        Self { size_deg }
    }

    pub fn size_deg(&self) -> f64 {
        self.size_deg
    }

    fn index(&self, degrees: f64) -> i32 {
        (degrees / self.size_deg + EDGE_EPSILON).floor() as i32
    }

    /// Inclusive tile span of `[low, high]`; an upper edge lying exactly on a
    /// tile boundary does not pull in the next tile.
    fn span(&self, low: f64, high: f64) -> (i32, i32) {
        let start = self.index(low);
        let end = (high / self.size_deg - EDGE_EPSILON).ceil() as i32 - 1;
        (start, end.max(start))
    }

    pub fn tile_for(&self, point: LatLng) -> TileId {
        TileId {
            row: self.index(point.lat),
            col: self.index(point.lng),
        }
    }

    pub fn tile_bounds(&self, tile: TileId) -> MapBounds {
        let south = tile.row as f64 * self.size_deg;
        let west = tile.col as f64 * self.size_deg;
        MapBounds::from_edges(south + self.size_deg, south, west + self.size_deg, west)
    }

    /// Number of tiles `bounds` touches, computed without enumerating them.
    pub fn tile_count(&self, bounds: &MapBounds) -> usize {
        let (row_start, row_end) = self.span(bounds.south, bounds.north);
        let (col_start, col_end) = self.span(bounds.west, bounds.east);
        let rows = (row_end - row_start + 1) as usize;
        let cols = (col_end - col_start + 1) as usize;
        rows.saturating_mul(cols)
    }

    pub fn tiles_covering(&self, bounds: &MapBounds) -> Vec<TileId> {
        let (row_start, row_end) = self.span(bounds.south, bounds.north);
        let (col_start, col_end) = self.span(bounds.west, bounds.east);

        let mut tiles = Vec::with_capacity(self.tile_count(bounds));
        for row in row_start..=row_end {
            for col in col_start..=col_end {
                tiles.push(TileId { row, col });
            }
        }
        tiles
    }

    /// The `(2r+1)²` block of tiles centred on `center`, row-major.
    pub fn neighborhood(&self, center: TileId, radius: i32) -> Vec<TileId> {
        let radius = radius.max(0);
        let mut tiles = Vec::with_capacity(((2 * radius + 1) * (2 * radius + 1)) as usize);
        for d_row in -radius..=radius {
            for d_col in -radius..=radius {
                tiles.push(center.offset(d_row, d_col));
            }
        }
        tiles
    }

    pub fn ring(&self, center: TileId) -> Vec<TileId> {
        RING_OFFSETS
            .iter()
            .map(|&(d_row, d_col)| center.offset(d_row, d_col))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{TileGrid, TileId};
    use crate::bounds::{LatLng, MapBounds};

    #[test]
    fn same_point_maps_to_same_tile() {
        let grid = TileGrid::new(0.1);
        let a = grid.tile_for(LatLng::new(44.05, 12.55));
        let b = grid.tile_for(LatLng::new(44.05, 12.55));
        assert_eq!(a, b);
        assert_eq!(a, TileId::new(440, 125));
    }

    #[test]
    fn negative_coordinates_floor_away_from_zero() {
        let grid = TileGrid::new(0.1);
        assert_eq!(grid.tile_for(LatLng::new(-0.05, -0.05)), TileId::new(-1, -1));
    }

    #[test]
    fn tile_bounds_contain_their_points() {
        let grid = TileGrid::new(0.1);
        let point = LatLng::new(44.05, 12.55);
        let tile = grid.tile_for(point);
        let bounds = grid.tile_bounds(tile);
        assert!(bounds.contains(point));
        assert!((bounds.height_deg() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn tiles_covering_spans_every_touched_cell() {
        let grid = TileGrid::new(0.1);
        let bounds = MapBounds::new(44.15, 44.02, 12.58, 12.45).expect("valid bounds");
        let tiles = grid.tiles_covering(&bounds);
        assert_eq!(tiles.len(), grid.tile_count(&bounds));
        assert_eq!(tiles.len(), 4);
        assert!(tiles.contains(&TileId::new(440, 124)));
        assert!(tiles.contains(&TileId::new(441, 125)));
    }

    #[test]
    fn bounds_ending_on_a_tile_edge_stay_in_one_tile() {
        let grid = TileGrid::new(0.1);
        let bounds = MapBounds::new(44.1, 44.0, 12.6, 12.5).expect("valid bounds");
        assert_eq!(grid.tiles_covering(&bounds), vec![TileId::new(440, 125)]);
        assert_eq!(grid.tile_bounds(TileId::new(440, 125)), bounds);
    }

    #[test]
    fn neighborhood_and_ring_shapes() {
        let grid = TileGrid::default();
        let center = TileId::new(10, 20);
        let block = grid.neighborhood(center, 1);
        assert_eq!(block.len(), 9);
        assert!(block.iter().all(|tile| tile.distance(&center) <= 1));

        let ring = grid.ring(center);
        assert_eq!(ring.len(), 8);
        assert!(!ring.contains(&center));
        assert_eq!(ring[0], TileId::new(11, 20));
        assert_eq!(ring[3], TileId::new(10, 19));
    }

    #[test]
    fn invalid_size_falls_back_to_default() {
        assert_eq!(TileGrid::new(0.0).size_deg(), super::DEFAULT_TILE_SIZE_DEG);
        assert_eq!(TileGrid::new(f64::NAN).size_deg(), super::DEFAULT_TILE_SIZE_DEG);
    }
}
