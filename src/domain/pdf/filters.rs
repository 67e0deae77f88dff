//! Stream filters: FlateDecode with PNG predictors, and Flate encoding.

use super::object::{Dictionary, Object};
use crate::infra::error::{SigningError, SigningResult};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Decode stream data according to `/Filter` and `/DecodeParms`.
pub fn decode_stream(dict: &Dictionary, data: &[u8]) -> SigningResult<Vec<u8>> {
    let filters: Vec<&str> = match dict.get("Filter") {
        None => return Ok(data.to_vec()),
        Some(Object::Name(n)) => vec![n.as_str()],
        Some(Object::Array(items)) => items.iter().filter_map(Object::as_name).collect(),
        Some(other) => {
            return Err(SigningError::DocumentError(format!(
                "unsupported /Filter value of type {}",
                other.type_name()
            )))
        }
    };
    let params: Vec<Option<&Dictionary>> = match dict.get("DecodeParms") {
        Some(Object::Dictionary(d)) => vec![Some(d)],
        Some(Object::Array(items)) => items.iter().map(Object::as_dict).collect(),
        _ => Vec::new(),
    };

    let mut current = data.to_vec();
    for (i, filter) in filters.iter().enumerate() {
        match *filter {
            "FlateDecode" | "Fl" => {
                current = inflate(&current)?;
                if let Some(Some(p)) = params.get(i) {
                    current = apply_predictor(p, &current)?;
                }
            }
            other => {
                return Err(SigningError::DocumentError(format!(
                    "unsupported stream filter /{other}"
                )))
            }
        }
    }
    Ok(current)
}

fn inflate(data: &[u8]) -> SigningResult<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| SigningError::DocumentError(format!("FlateDecode failed: {e}")))?;
    Ok(out)
}

pub fn flate_encode(data: &[u8]) -> SigningResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn param(params: &Dictionary, key: &str, default: i64) -> i64 {
    params.get(key).and_then(Object::as_integer).unwrap_or(default)
}

fn positive_param(params: &Dictionary, key: &str, default: i64) -> SigningResult<usize> {
    usize::try_from(param(params, key, default).max(1)).map_err(|_| oversized_row())
}

fn oversized_row() -> SigningError {
    SigningError::DocumentError("predictor row length exceeds the stream data".to_string())
}

fn apply_predictor(params: &Dictionary, data: &[u8]) -> SigningResult<Vec<u8>> {
    let predictor = param(params, "Predictor", 1);
    if predictor < 10 {
        if predictor == 1 {
            return Ok(data.to_vec());
        }
        return Err(SigningError::DocumentError(format!(
            "unsupported predictor {predictor}"
        )));
    }
    let colors = positive_param(params, "Colors", 1)?;
    let bits = positive_param(params, "BitsPerComponent", 8)?;
    let columns = positive_param(params, "Columns", 1)?;
    let bits_per_pixel = colors.checked_mul(bits).ok_or_else(oversized_row)?;
    let bpp = bits_per_pixel.div_ceil(8);
    let row_len = bits_per_pixel
        .checked_mul(columns)
        .ok_or_else(oversized_row)?
        .div_ceil(8);
    if data.is_empty() {
        return Ok(Vec::new());
    }
    // A row never spans more than the stream itself.
    if row_len >= data.len() {
        return Err(oversized_row());
    }

    let mut out = Vec::with_capacity(data.len());
    let mut prev = vec![0u8; row_len];
    for chunk in data.chunks(row_len + 1) {
        if chunk.len() < row_len + 1 {
            break;
        }
        let kind = chunk[0];
        let mut row = chunk[1..].to_vec();
        for i in 0..row_len {
            let left = if i >= bpp { row[i - bpp] } else { 0 };
            let up = prev[i];
            let up_left = if i >= bpp { prev[i - bpp] } else { 0 };
            row[i] = match kind {
                0 => row[i],
                1 => row[i].wrapping_add(left),
                2 => row[i].wrapping_add(up),
                3 => row[i].wrapping_add(((u16::from(left) + u16::from(up)) / 2) as u8),
                4 => row[i].wrapping_add(paeth(left, up, up_left)),
                other => {
                    return Err(SigningError::DocumentError(format!(
                        "invalid PNG row filter {other}"
                    )))
                }
            };
        }
        out.extend_from_slice(&row);
        prev = row;
    }
    Ok(out)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = i16::from(a) + i16::from(b) - i16::from(c);
    let pa = (p - i16::from(a)).abs();
    let pb = (p - i16::from(b)).abs();
    let pc = (p - i16::from(c)).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}
