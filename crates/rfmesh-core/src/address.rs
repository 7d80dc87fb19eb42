//! Hierarchical geographic mesh addressing.
//!
//! A mesh address names a cell in a fixed world grid: the projected unit
//! square is split into 256x256 regions, and each region into a 64x64
//! sub-grid. The string form is `"O1.O2.O3"` where O1 is the region row
//! plus one (1-255), O2 the region column (0-255), and O3 the packed 12-bit
//! cell id (1-4095). The mapping is a deterministic function of (lat, lng,
//! projection); out-of-range positions clamp at the poles and antimeridian.

use crate::geo::{LatLng, Projection};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Regions per axis of the world grid.
const REGIONS_PER_AXIS: u32 = 256;
/// Cells per axis inside one region.
const CELLS_PER_AXIS: u32 = 64;
/// Total grid columns (and rows): 256 * 64.
const GRID_EXTENT: u32 = REGIONS_PER_AXIS * CELLS_PER_AXIS;

/// A grid cell address: region row + 1, region column, packed cell id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeshAddress {
    /// Region row plus one, 1-255.
    pub region_row: u8,
    /// Region column, 0-255.
    pub region_col: u8,
    /// Packed cell id `(cell_y << 6) | cell_x`, 1-4095.
    pub cell: u16,
}

impl MeshAddress {
    /// Address of the grid cell containing `point` under `projection`.
    pub fn from_lat_lng(point: &LatLng, projection: Projection) -> MeshAddress {
        let (x, y) = projection.project(point);
        let gx = ((x * GRID_EXTENT as f64) as u32).min(GRID_EXTENT - 1);
        let gy = ((y * GRID_EXTENT as f64) as u32).min(GRID_EXTENT - 1);

        // Row 255 folds into the last addressable region row (O1 caps at 255).
        let region_row = ((gy / CELLS_PER_AXIS) + 1).min(255) as u8;
        let region_col = (gx / CELLS_PER_AXIS) as u8;
        // Cell 0 is not addressable; the corner cell folds into its neighbor.
        let cell = (((gy % CELLS_PER_AXIS) << 6) | (gx % CELLS_PER_AXIS)).max(1) as u16;

        MeshAddress { region_row, region_col, cell }
    }

    /// Center of this address's grid cell under `projection`.
    pub fn to_lat_lng(&self, projection: Projection) -> LatLng {
        let cell_x = (self.cell & 0x3F) as u32;
        let cell_y = (self.cell >> 6) as u32;
        let gx = self.region_col as u32 * CELLS_PER_AXIS + cell_x;
        let gy = (self.region_row as u32 - 1) * CELLS_PER_AXIS + cell_y;

        let x = (gx as f64 + 0.5) / GRID_EXTENT as f64;
        let y = (gy as f64 + 0.5) / GRID_EXTENT as f64;
        projection.unproject(x, y)
    }

    /// Parse `"O1.O2.O3"`, returning `None` on any malformed input: wrong
    /// segment count, non-numeric segments, or out-of-range octets.
    pub fn parse(s: &str) -> Option<MeshAddress> {
        let mut parts = s.split('.');
        let o1: u32 = parts.next()?.parse().ok()?;
        let o2: u32 = parts.next()?.parse().ok()?;
        let o3: u32 = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        if !(1..=255).contains(&o1) || o2 > 255 || !(1..=4095).contains(&o3) {
            return None;
        }
        Some(MeshAddress {
            region_row: o1 as u8,
            region_col: o2 as u8,
            cell: o3 as u16,
        })
    }
}

impl fmt::Display for MeshAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.region_row, self.region_col, self.cell)
    }
}

impl FromStr for MeshAddress {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        MeshAddress::parse(s).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_stays_within_one_cell() {
        let points = [
            LatLng::new(47.6062, -122.3321),
            LatLng::new(0.0, 0.0),
            LatLng::new(-33.8688, 151.2093),
            LatLng::new(84.99, 179.99),
            LatLng::new(-84.99, -179.99),
        ];
        for projection in [Projection::WebMercator, Projection::Equirectangular] {
            for p in points {
                let addr = MeshAddress::from_lat_lng(&p, projection);
                let center = addr.to_lat_lng(projection);
                let again = MeshAddress::from_lat_lng(&center, projection);
                // Center of the decoded cell maps back to the same address.
                assert_eq!(addr, again, "{p:?} under {projection:?}");
            }
        }
    }

    #[test]
    fn test_component_ranges() {
        let extremes = [
            LatLng::new(90.0, 180.0),
            LatLng::new(-90.0, -180.0),
            LatLng::new(89.9999, 179.9999),
        ];
        for p in extremes {
            let addr = MeshAddress::from_lat_lng(&p, Projection::WebMercator);
            assert!((1..=255).contains(&addr.region_row));
            assert!((1..=4095).contains(&addr.cell));
        }
    }

    #[test]
    fn test_format_parse_round_trip() {
        let addr = MeshAddress { region_row: 17, region_col: 203, cell: 1044 };
        let s = addr.to_string();
        assert_eq!(s, "17.203.1044");
        assert_eq!(MeshAddress::parse(&s), Some(addr));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        // Wrong segment counts
        assert_eq!(MeshAddress::parse("1.2"), None);
        assert_eq!(MeshAddress::parse("1.2.3.4"), None);
        assert_eq!(MeshAddress::parse(""), None);
        // Non-numeric segments
        assert_eq!(MeshAddress::parse("a.2.3"), None);
        assert_eq!(MeshAddress::parse("1.2.c"), None);
        assert_eq!(MeshAddress::parse("1..3"), None);
        // Out-of-range octets
        assert_eq!(MeshAddress::parse("0.2.3"), None);
        assert_eq!(MeshAddress::parse("256.2.3"), None);
        assert_eq!(MeshAddress::parse("1.256.3"), None);
        assert_eq!(MeshAddress::parse("1.2.0"), None);
        assert_eq!(MeshAddress::parse("1.2.4096"), None);
    }

    #[test]
    fn test_nearby_points_share_regions() {
        // Two points ~100 m apart land in the same or adjacent cells.
        let a = LatLng::new(47.6062, -122.3321);
        let b = LatLng::new(47.6071, -122.3321);
        let aa = MeshAddress::from_lat_lng(&a, Projection::WebMercator);
        let ab = MeshAddress::from_lat_lng(&b, Projection::WebMercator);
        assert_eq!(aa.region_col, ab.region_col);
        assert!(aa.region_row.abs_diff(ab.region_row) <= 1);
    }
}
