//! 52-bit interleaved geohashing over the Web Mercator latitude band.
//!
//! Even bit positions (counted from the most significant encoded bit)
//! bisect the longitude range, odd positions the latitude range.

/// Latitude bound of the Web Mercator projection.
pub const LAT_MAX: f64 = 85.05112878;
pub const LAT_MIN: f64 = -85.05112878;
pub const LON_MAX: f64 = 180.0;
pub const LON_MIN: f64 = -180.0;

/// Maximum geohash precision: 26 longitude bits + 26 latitude bits fit a
/// u64 without precision loss.
pub const MAX_BITS: u32 = 52;

/// Encodes a coordinate into a `bits`-wide geohash.
pub fn encode(lat: f64, lon: f64, bits: u32) -> u64 {
    let bits = bits.min(MAX_BITS);
    let mut lat_range = (LAT_MIN, LAT_MAX);
    let mut lon_range = (LON_MIN, LON_MAX);

    let mut hash: u64 = 0;
    let mut is_even = true;

    for _ in 0..bits {
        hash <<= 1;
        if is_even {
            let mid = (lon_range.0 + lon_range.1) / 2.0;
            if lon >= mid {
                hash |= 1;
                lon_range.0 = mid;
            } else {
                lon_range.1 = mid;
            }
        } else {
            let mid = (lat_range.0 + lat_range.1) / 2.0;
            if lat >= mid {
                hash |= 1;
                lat_range.0 = mid;
            } else {
                lat_range.1 = mid;
            }
        }
        is_even = !is_even;
    }

    hash
}

/// Decodes a geohash back to the center of its bounding box as
/// `(lat, lon)`.
pub fn decode(hash: u64, bits: u32) -> (f64, f64) {
    let bits = bits.min(MAX_BITS);
    let mut lat_range = (LAT_MIN, LAT_MAX);
    let mut lon_range = (LON_MIN, LON_MAX);

    let mut is_even = true;

    for i in (0..bits).rev() {
        let bit = (hash >> i) & 1;
        if is_even {
            let mid = (lon_range.0 + lon_range.1) / 2.0;
            if bit == 1 {
                lon_range.0 = mid;
            } else {
                lon_range.1 = mid;
            }
        } else {
            let mid = (lat_range.0 + lat_range.1) / 2.0;
            if bit == 1 {
                lat_range.0 = mid;
            } else {
                lat_range.1 = mid;
            }
        }
        is_even = !is_even;
    }

    (
        (lat_range.0 + lat_range.1) / 2.0,
        (lon_range.0 + lon_range.1) / 2.0,
    )
}

/// The up-to-8 surrounding cells of a hash at the given precision.
///
/// Longitude wraps around the antimeridian; offsets that leave the
/// Mercator latitude band are skipped.
pub fn neighbors(hash: u64, bits: u32) -> Vec<u64> {
    const DIRECTIONS: [(f64, f64); 8] = [
        (1.0, 0.0),
        (1.0, 1.0),
        (0.0, 1.0),
        (-1.0, 1.0),
        (-1.0, 0.0),
        (-1.0, -1.0),
        (0.0, -1.0),
        (1.0, -1.0),
    ];

    let (center_lat, center_lon) = decode(hash, bits);

    let lat_bits = bits / 2;
    let lon_bits = bits - lat_bits;
    let lat_cell = (LAT_MAX - LAT_MIN) / (1u64 << lat_bits) as f64;
    let lon_cell = 360.0 / (1u64 << lon_bits) as f64;

    let mut result = Vec::with_capacity(8);
    for (dlat, dlon) in DIRECTIONS {
        let lat = center_lat + dlat * lat_cell;
        let mut lon = center_lon + dlon * lon_cell;

        if lon > LON_MAX {
            lon -= 360.0;
        } else if lon < LON_MIN {
            lon += 360.0;
        }
        if lat <= LAT_MIN || lat >= LAT_MAX {
            continue;
        }

        result.push(encode(lat, lon, bits));
    }
    result
}

/// Picks a precision whose cells are wide enough that the center cell and
/// its 8 neighbors cover a search disk of the given radius: starting from
/// `max_bits`, coarsen two bits at a time until a cell spans at least the
/// radius (and so at most ~2x the radius), staying even and within
/// `[2, max_bits]`.
pub fn bits_for_radius(radius_m: f64, max_bits: u32) -> u32 {
    let max_bits = max_bits.min(MAX_BITS);
    let mut bits = max_bits - (max_bits % 2);

    while bits > 2 && cell_width_m(bits) < radius_m {
        bits -= 2;
    }
    bits.max(2)
}

/// Approximate cell width in meters at the equator for the given total bit
/// count.
fn cell_width_m(bits: u32) -> f64 {
    const METERS_PER_DEGREE: f64 = 111_320.0;
    let lon_bits = bits - bits / 2;
    let cell_deg = 360.0 / (1u64 << lon_bits) as f64;
    cell_deg * METERS_PER_DEGREE
}
