//! Codec for the Google encoded polyline format used by real-time shapes.
//!
//! Coordinates are carried as zig-zag encoded varint deltas scaled by 1e5;
//! all arithmetic here is integer, floats only appear at the final division.

use thiserror::Error;

/// A coordinate pair, latitude first.
pub type LatLon = (f64, f64);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolylineError {
    #[error("encoded polyline ends mid-value at byte {offset}")]
    Truncated { offset: usize },
}

/// Decodes an encoded polyline string into an ordered list of coordinates.
///
/// # Errors
///
/// Returns [`PolylineError::Truncated`] if the string ends in the middle of
/// a varint value (continuation bit set on the last byte, or a latitude
/// delta without its longitude counterpart).
pub fn decode(encoded: &str) -> Result<Vec<LatLon>, PolylineError> {
    let bytes = encoded.as_bytes();
    let mut coords = Vec::new();
    let mut index = 0usize;
    let mut lat = 0i64;
    let mut lon = 0i64;

    while index < bytes.len() {
        lat += next_delta(bytes, &mut index)?;
        lon += next_delta(bytes, &mut index)?;
        coords.push((lat as f64 / 1e5, lon as f64 / 1e5));
    }

    Ok(coords)
}

/// Encodes an ordered list of coordinates into a polyline string.
///
/// Coordinates are rounded to 5 decimal digits, so `decode(encode(path))`
/// is exact for any path already at that precision.
pub fn encode(path: &[LatLon]) -> String {
    let mut out = String::new();
    let mut prev_lat = 0i64;
    let mut prev_lon = 0i64;

    for &(lat, lon) in path {
        let lat_e5 = (lat * 1e5).round() as i64;
        let lon_e5 = (lon * 1e5).round() as i64;
        encode_value(lat_e5 - prev_lat, &mut out);
        encode_value(lon_e5 - prev_lon, &mut out);
        prev_lat = lat_e5;
        prev_lon = lon_e5;
    }

    out
}

fn next_delta(bytes: &[u8], index: &mut usize) -> Result<i64, PolylineError> {
    let mut result: u64 = 0;
    let mut shift = 0u32;

    loop {
        if *index >= bytes.len() {
            return Err(PolylineError::Truncated { offset: *index });
        }
        let b = bytes[*index] as i64 - 63;
        *index += 1;
        if shift < 64 {
            result |= ((b & 0x1f) as u64) << shift;
        }
        shift += 5;
        if b < 0x20 {
            break;
        }
    }

    Ok(zigzag_decode(result))
}

fn zigzag_decode(value: u64) -> i64 {
    if value & 1 != 0 {
        !((value >> 1) as i64)
    } else {
        (value >> 1) as i64
    }
}

fn encode_value(value: i64, out: &mut String) {
    // zig-zag: sign moves to the low bit
    let mut v = ((value << 1) ^ (value >> 63)) as u64;
    loop {
        let mut chunk = (v & 0x1f) as u8;
        v >>= 5;
        if v > 0 {
            chunk |= 0x20;
        }
        out.push((chunk + 63) as char);
        if v == 0 {
            break;
        }
    }
}
