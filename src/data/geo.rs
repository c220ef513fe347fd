use crate::data::geohash;
use crate::data::skiplist::{Insert, SortedSet};
use crate::error::ServerError;

/// Mean Earth radius used by the Haversine formula, in meters.
pub const EARTH_RADIUS_M: f64 = 6_372_797.560856;

/// A geospatial index: member positions encoded as 52-bit geohashes and
/// kept in a sorted set keyed by the hash, so radius queries become a
/// handful of contiguous score-range scans.
#[derive(Debug)]
pub struct GeoIndex {
    bits: u32,
    set: SortedSet<u64>,
}

/// One radius-search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoHit {
    pub member: String,
    pub lat: f64,
    pub lon: f64,
    pub distance_m: f64,
}

impl Default for GeoIndex {
    fn default() -> Self {
        GeoIndex::new(geohash::MAX_BITS)
    }
}

impl GeoIndex {
    pub fn new(bits: u32) -> Self {
        GeoIndex {
            bits: bits.min(geohash::MAX_BITS),
            set: SortedSet::new(),
        }
    }

    /// Validates bounds, encodes and stores the member. Reports whether the
    /// member is new to the index.
    pub fn add(&mut self, member: &str, lat: f64, lon: f64) -> Result<bool, ServerError> {
        self.validate(lat, lon)?;
        let hash = geohash::encode(lat, lon, self.bits);
        Ok(self.set.insert(member, hash) == Insert::Added)
    }

    fn validate(&self, lat: f64, lon: f64) -> Result<(), ServerError> {
        if !(lat > geohash::LAT_MIN && lat < geohash::LAT_MAX) {
            return Err(ServerError::InvalidArguments(format!(
                "invalid latitude value: {lat}"
            )));
        }
        if !(lon > geohash::LON_MIN && lon < geohash::LON_MAX) {
            return Err(ServerError::InvalidArguments(format!(
                "invalid longitude value: {lon}"
            )));
        }
        Ok(())
    }

    /// Decoded position of a member, as `(lat, lon)` of its cell center.
    pub fn position(&self, member: &str) -> Option<(f64, f64)> {
        let hash = self.set.score(member)?;
        Some(geohash::decode(hash, self.bits))
    }

    /// Great-circle distance between two members, in meters.
    pub fn distance(&self, member1: &str, member2: &str) -> Result<f64, ServerError> {
        let hash1 = self.set.score(member1).ok_or_else(|| {
            ServerError::InvalidArguments(format!("member '{member1}' missing in set"))
        })?;
        let hash2 = self.set.score(member2).ok_or_else(|| {
            ServerError::InvalidArguments(format!("member '{member2}' missing in set"))
        })?;

        let (lat1, lon1) = geohash::decode(hash1, self.bits);
        let (lat2, lon2) = geohash::decode(hash2, self.bits);
        Ok(haversine(lat1, lon1, lat2, lon2))
    }

    pub fn remove(&mut self, member: &str) -> bool {
        self.set.remove(member)
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Members within `radius_m` of the center, sorted by distance.
    ///
    /// Picks a coarser precision whose 3x3 cell block covers the disk,
    /// scans the score range of the center cell and its 8 neighbors, then
    /// filters by true Haversine distance.
    pub fn search_radius(&self, lat: f64, lon: f64, radius_m: f64) -> Vec<GeoHit> {
        let bits = geohash::bits_for_radius(radius_m, self.bits);
        let center = geohash::encode(lat, lon, bits);

        let mut cells = vec![center];
        cells.extend(geohash::neighbors(center, bits));
        cells.sort_unstable();
        cells.dedup();

        let shift = self.bits - bits;
        let mut hits = Vec::new();
        for cell in cells {
            let min = cell << shift;
            let max = ((cell + 1) << shift) - 1;
            for (member, hash) in self.set.range_by_score(min, max) {
                let (mlat, mlon) = geohash::decode(hash, self.bits);
                let distance_m = haversine(lat, lon, mlat, mlon);
                if distance_m <= radius_m {
                    hits.push(GeoHit {
                        member,
                        lat: mlat,
                        lon: mlon,
                        distance_m,
                    });
                }
            }
        }

        hits.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
        hits
    }
}

/// Great-circle distance on a sphere of radius `EARTH_RADIUS_M`.
pub fn haversine(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let v = ((lon2.to_radians() - lon1.to_radians()) / 2.0).sin();
    if v == 0.0 {
        // Same meridian: the arc is the latitude delta.
        return EARTH_RADIUS_M * (lat2.to_radians() - lat1.to_radians()).abs();
    }
    let u = ((lat2.to_radians() - lat1.to_radians()) / 2.0).sin();
    let a = u * u + lat1.to_radians().cos() * lat2.to_radians().cos() * v * v;
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

/// Meters-per-unit factors accepted by the distance commands.
pub fn unit_to_meters(unit: &str) -> Option<f64> {
    match unit.to_lowercase().as_str() {
        "m" => Some(1.0),
        "km" => Some(1000.0),
        "ft" => Some(0.3048),
        "mi" => Some(1609.34),
        _ => None,
    }
}
