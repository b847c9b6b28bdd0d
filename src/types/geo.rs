//! Geospatial point index.
//!
//! Points carry (longitude, latitude) and are bucketed into 10°×10° tiles
//! used to prune candidate scans for radius and box queries. Distances use
//! the haversine formula with an Earth radius of 6371 km.

use bytes::Bytes;
use std::collections::{HashMap, HashSet};

/// Earth's radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Tile edge in degrees for the coarse spatial buckets.
const TILE_DEGREES: f64 = 10.0;

/// Geohash alphabet (base-32, omitting a/i/l/o).
const GEOHASH_BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// A named point with coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoPoint {
    /// Member name
    pub member: Bytes,
    /// Longitude in [-180, 180]
    pub longitude: f64,
    /// Latitude in [-90, 90]
    pub latitude: f64,
}

/// A radius/box query hit with the computed distance attached.
#[derive(Debug, Clone)]
pub struct GeoResult {
    /// The matched point
    pub point: GeoPoint,
    /// Distance from the query center, in the query's unit
    pub distance: f64,
}

/// Distance units accepted by geo queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoUnit {
    /// Meters
    Meters,
    /// Kilometers
    Kilometers,
    /// Miles
    Miles,
    /// Feet
    Feet,
}

impl GeoUnit {
    /// Parse a unit name (`m`, `km`, `mi`, `ft` and long forms).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "m" | "meters" => Some(Self::Meters),
            "km" | "kilometers" => Some(Self::Kilometers),
            "mi" | "miles" => Some(Self::Miles),
            "ft" | "feet" => Some(Self::Feet),
            _ => None,
        }
    }

    /// Convert a distance in kilometers to this unit.
    pub fn from_km(self, km: f64) -> f64 {
        match self {
            Self::Meters => km * 1000.0,
            Self::Kilometers => km,
            Self::Miles => km * 0.621371,
            Self::Feet => km * 3280.84,
        }
    }

    /// Convert a distance in this unit to kilometers.
    pub fn to_km(self, value: f64) -> f64 {
        match self {
            Self::Meters => value / 1000.0,
            Self::Kilometers => value,
            Self::Miles => value * 1.60934,
            Self::Feet => value * 0.0003048,
        }
    }
}

/// Coarse tile identifier: floor(lon/10), floor(lat/10).
type Tile = (i32, i32);

#[inline]
fn tile_of(longitude: f64, latitude: f64) -> Tile {
    (
        (longitude / TILE_DEGREES).floor() as i32,
        (latitude / TILE_DEGREES).floor() as i32,
    )
}

/// A geospatial index over named points.
///
/// Member names are unique; re-adding a member moves it. The tile buckets
/// are an internal pruning structure, not part of the wire contract.
#[derive(Debug, Clone, Default)]
pub struct GeoIndex {
    /// member -> (longitude, latitude)
    points: HashMap<Bytes, (f64, f64)>,
    /// tile -> member names in that tile
    tiles: HashMap<Tile, HashSet<Bytes>>,
}

impl GeoIndex {
    /// Create a new empty index.
    pub fn new() -> Self {
        Self {
            points: HashMap::new(),
            tiles: HashMap::new(),
        }
    }

    /// Number of points in the index.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns true if the index has no points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Validate coordinates against canonical bounds.
    pub fn valid_coordinates(longitude: f64, latitude: f64) -> bool {
        (-180.0..=180.0).contains(&longitude) && (-90.0..=90.0).contains(&latitude)
    }

    /// Add or move a point. Returns true if the member is new.
    ///
    /// Coordinates must already be validated by the caller.
    pub fn add(&mut self, member: Bytes, longitude: f64, latitude: f64) -> bool {
        let is_new = if let Some(&(old_lon, old_lat)) = self.points.get(&member) {
            let old_tile = tile_of(old_lon, old_lat);
            if let Some(set) = self.tiles.get_mut(&old_tile) {
                set.remove(&member);
                if set.is_empty() {
                    self.tiles.remove(&old_tile);
                }
            }
            false
        } else {
            true
        };

        self.tiles
            .entry(tile_of(longitude, latitude))
            .or_default()
            .insert(member.clone());
        self.points.insert(member, (longitude, latitude));
        is_new
    }

    /// Remove a point. Returns true if it existed.
    pub fn remove(&mut self, member: &[u8]) -> bool {
        if let Some((lon, lat)) = self.points.remove(member) {
            let tile = tile_of(lon, lat);
            if let Some(set) = self.tiles.get_mut(&tile) {
                set.remove(member);
                if set.is_empty() {
                    self.tiles.remove(&tile);
                }
            }
            true
        } else {
            false
        }
    }

    /// Get a member's position.
    pub fn position(&self, member: &[u8]) -> Option<(f64, f64)> {
        self.points.get(member).copied()
    }

    /// Distance between two members, in the requested unit.
    pub fn distance(&self, a: &[u8], b: &[u8], unit: GeoUnit) -> Option<f64> {
        let &(lon1, lat1) = self.points.get(a)?;
        let &(lon2, lat2) = self.points.get(b)?;
        Some(unit.from_km(haversine_km(lon1, lat1, lon2, lat2)))
    }

    /// Points within `radius` (in `unit`) of a center, distances attached,
    /// sorted by distance ascending with ties broken by member name.
    pub fn radius(&self, longitude: f64, latitude: f64, radius: f64, unit: GeoUnit) -> Vec<GeoResult> {
        let radius_km = unit.to_km(radius);
        let mut results: Vec<GeoResult> = self
            .candidates_near(longitude, latitude, radius_km)
            .filter_map(|(member, &(lon, lat))| {
                let d_km = haversine_km(longitude, latitude, lon, lat);
                if d_km <= radius_km {
                    Some(GeoResult {
                        point: GeoPoint {
                            member: member.clone(),
                            longitude: lon,
                            latitude: lat,
                        },
                        distance: unit.from_km(d_km),
                    })
                } else {
                    None
                }
            })
            .collect();

        sort_by_distance(&mut results);
        results
    }

    /// Points within `radius` of an existing member. None if the member
    /// is not in the index.
    pub fn radius_by_member(&self, member: &[u8], radius: f64, unit: GeoUnit) -> Option<Vec<GeoResult>> {
        let &(lon, lat) = self.points.get(member)?;
        Some(self.radius(lon, lat, radius, unit))
    }

    /// Points inside a lon/lat-degree box centered on a point.
    /// `width` and `height` are in degrees of longitude and latitude.
    pub fn search_box(&self, longitude: f64, latitude: f64, width: f64, height: f64) -> Vec<GeoResult> {
        let min_lon = longitude - width / 2.0;
        let max_lon = longitude + width / 2.0;
        let min_lat = latitude - height / 2.0;
        let max_lat = latitude + height / 2.0;

        let mut results: Vec<GeoResult> = self
            .points
            .iter()
            .filter(|(_, &(lon, lat))| {
                lon >= min_lon && lon <= max_lon && lat >= min_lat && lat <= max_lat
            })
            .map(|(member, &(lon, lat))| GeoResult {
                point: GeoPoint {
                    member: member.clone(),
                    longitude: lon,
                    latitude: lat,
                },
                distance: haversine_km(longitude, latitude, lon, lat),
            })
            .collect();

        sort_by_distance(&mut results);
        results
    }

    /// 12-character geohash of a member's position.
    pub fn geohash(&self, member: &[u8]) -> Option<String> {
        let &(lon, lat) = self.points.get(member)?;
        Some(encode_geohash(lon, lat))
    }

    /// Members whose name starts with `prefix` (domain conventions such as
    /// `atm:`, `merchant:`, `user:<id>:`).
    pub fn members_with_prefix(&self, prefix: &[u8]) -> Vec<GeoPoint> {
        self.points
            .iter()
            .filter(|(member, _)| member.starts_with(prefix))
            .map(|(member, &(lon, lat))| GeoPoint {
                member: member.clone(),
                longitude: lon,
                latitude: lat,
            })
            .collect()
    }

    /// Iterate all points (snapshot support).
    pub fn iter(&self) -> impl Iterator<Item = GeoPoint> + '_ {
        self.points.iter().map(|(member, &(lon, lat))| GeoPoint {
            member: member.clone(),
            longitude: lon,
            latitude: lat,
        })
    }

    /// Estimate memory usage.
    pub fn memory_usage(&self) -> usize {
        let base = size_of::<Self>();
        let point_data: usize = self.points.keys().map(|k| k.len() + 16).sum();
        base + point_data + self.tiles.len() * 32
    }

    /// Candidate points for a radius query, pruned to the tiles the query
    /// circle can touch. Falls back to a full scan for oversized radii.
    fn candidates_near(
        &self,
        longitude: f64,
        latitude: f64,
        radius_km: f64,
    ) -> Box<dyn Iterator<Item = (&Bytes, &(f64, f64))> + '_> {
        // One degree of latitude is ~111 km. Near the poles a longitude
        // degree shrinks to nothing, so widen conservatively there.
        let lat_span = radius_km / 111.0;
        let cos_lat = latitude.to_radians().cos().abs().max(0.01);
        let lon_span = radius_km / (111.0 * cos_lat);

        let tile_span = (lat_span.max(lon_span) / TILE_DEGREES).ceil() as i64 + 1;
        if tile_span > 4 {
            // Circle covers too many tiles for pruning to pay off
            return Box::new(self.points.iter());
        }

        let (center_x, center_y) = tile_of(longitude, latitude);
        let span = tile_span as i32;
        let mut members: Vec<&Bytes> = Vec::new();
        for dx in -span..=span {
            for dy in -span..=span {
                if let Some(set) = self.tiles.get(&(center_x + dx, center_y + dy)) {
                    members.extend(set.iter());
                }
            }
        }

        Box::new(
            members
                .into_iter()
                .filter_map(move |m| self.points.get_key_value(m)),
        )
    }
}

/// Sort results by distance ascending, ties broken by member name.
fn sort_by_distance(results: &mut [GeoResult]) {
    results.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.point.member.cmp(&b.point.member))
    });
}

/// Great-circle distance in kilometers between two (lon, lat) points.
pub fn haversine_km(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Encode a position as a 12-character geohash.
///
/// Longitude and latitude are bisected alternately (longitude first),
/// interleaving one bit per step, 5 bits per output character.
pub fn encode_geohash(longitude: f64, latitude: f64) -> String {
    let mut lon_range = (-180.0f64, 180.0f64);
    let mut lat_range = (-90.0f64, 90.0f64);

    let mut hash = String::with_capacity(12);
    let mut bits = 0u8;
    let mut bit_count = 0u8;
    let mut even_bit = true; // longitude on even bits

    while hash.len() < 12 {
        if even_bit {
            let mid = (lon_range.0 + lon_range.1) / 2.0;
            if longitude >= mid {
                bits = (bits << 1) | 1;
                lon_range.0 = mid;
            } else {
                bits <<= 1;
                lon_range.1 = mid;
            }
        } else {
            let mid = (lat_range.0 + lat_range.1) / 2.0;
            if latitude >= mid {
                bits = (bits << 1) | 1;
                lat_range.0 = mid;
            } else {
                bits <<= 1;
                lat_range.1 = mid;
            }
        }
        even_bit = !even_bit;

        bit_count += 1;
        if bit_count == 5 {
            hash.push(GEOHASH_BASE32[bits as usize] as char);
            bits = 0;
            bit_count = 0;
        }
    }

    hash
}
