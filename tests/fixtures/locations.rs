//! Real Las Vegas / Henderson points for realistic fixtures.
//!
//! Coordinates come from OpenStreetMap and are routable with the OSRM
//! Nevada extract.

use dispatch_planner::geo::Coordinate;

#[derive(Debug, Clone, Copy)]
pub struct Location {
    pub name: &'static str,
    pub lat: f64,
    pub lng: f64,
}

impl Location {
    pub const fn new(name: &'static str, lat: f64, lng: f64) -> Self {
        Self { name, lat, lng }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lng)
    }
}

/// Warehouse used as the depot in realistic tests.
pub const DEPOT: Location = Location::new("East Tropicana Warehouse", 36.1001, -115.1140);

/// Customer stops along the Strip.
pub const STRIP: &[Location] = &[
    Location::new("Wynn Las Vegas", 36.1263781, -115.1658180),
    Location::new("Bellagio", 36.1126, -115.1767),
    Location::new("Caesars Palace", 36.1162, -115.1745),
    Location::new("MGM Grand", 36.1023654, -115.1688720),
    Location::new("Grand Lux Cafe", 36.1216416, -115.1685024),
    Location::new("Hard Rock Cafe", 36.1041592, -115.1722166),
];

/// Customer stops in Henderson.
pub const HENDERSON: &[Location] = &[
    Location::new("Green Valley Ranch Area", 36.0308, -115.0825),
    Location::new("Sunset Station Area", 36.0614, -115.0631),
    Location::new("Islander's Grill", 36.0335058, -114.9856162),
    Location::new("Naga", 36.0137634, -114.9928676),
    Location::new("RibCage", 35.9949754, -115.0999810),
    Location::new("Buffalo Wild Wings Henderson", 36.0090449, -114.9917034),
];

/// Stops spread across the metro area.
pub fn metro() -> Vec<Location> {
    STRIP.iter().chain(HENDERSON).copied().collect()
}
