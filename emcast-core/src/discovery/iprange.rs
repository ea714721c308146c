//! IP address expression expansion.
//!
//! A four-octet expression may put a hyphenated sub-range in exactly
//! one octet (`192.168.1.1-4`, half-open: 1, 2, 3) or a `*` meaning
//! the full 0–255 range. Everything else must be plain decimal.

use std::net::Ipv4Addr;

use crate::error::EmcastError;

#[derive(Debug, Clone, Copy)]
enum Octet {
    Fixed(u8),
    /// Half-open `[start, stop)`; `stop` may be 256 to include 255.
    Range(u8, u16),
}

/// Expand an address expression into concrete addresses.
///
/// A bare dotted quad expands to itself. A second ranged octet, or any
/// non-digit content outside valid range syntax, rejects the whole
/// expression.
pub fn expand(expr: &str) -> Result<Vec<Ipv4Addr>, EmcastError> {
    let reject = |reason: &'static str| EmcastError::InvalidIpExpression {
        expr: expr.to_string(),
        reason,
    };

    let parts: Vec<&str> = expr.split('.').collect();
    if parts.len() != 4 {
        return Err(reject("expected four dotted octets"));
    }

    let mut octets = [Octet::Fixed(0); 4];
    let mut ranged: Option<usize> = None;
    for (idx, part) in parts.iter().enumerate() {
        octets[idx] = if *part == "*" {
            if ranged.replace(idx).is_some() {
                return Err(reject("only one octet may be a range"));
            }
            Octet::Range(0, 256)
        } else if let Some((start, stop)) = part.split_once('-') {
            if ranged.replace(idx).is_some() {
                return Err(reject("only one octet may be a range"));
            }
            let start: u8 = parse_decimal(start).ok_or_else(|| reject("invalid range start"))?;
            let stop: u16 = parse_decimal(stop).ok_or_else(|| reject("invalid range stop"))?;
            if stop > 256 {
                return Err(reject("range stop out of bounds"));
            }
            Octet::Range(start, stop)
        } else {
            Octet::Fixed(parse_decimal(part).ok_or_else(|| reject("octet is not a decimal 0-255"))?)
        };
    }

    let addr_with = |octets: &[Octet; 4], idx: usize, value: u8| {
        let mut o = [0u8; 4];
        for (i, oct) in octets.iter().enumerate() {
            o[i] = match oct {
                Octet::Fixed(v) => *v,
                Octet::Range(..) => value,
            };
            if i != idx {
                debug_assert!(matches!(oct, Octet::Fixed(_)));
            }
        }
        Ipv4Addr::new(o[0], o[1], o[2], o[3])
    };

    match ranged {
        None => {
            let fixed: Vec<u8> = octets
                .iter()
                .map(|o| match o {
                    Octet::Fixed(v) => *v,
                    Octet::Range(..) => unreachable!(),
                })
                .collect();
            Ok(vec![Ipv4Addr::new(fixed[0], fixed[1], fixed[2], fixed[3])])
        }
        Some(idx) => {
            let (start, stop) = match octets[idx] {
                Octet::Range(start, stop) => (start, stop),
                Octet::Fixed(_) => unreachable!(),
            };
            Ok((u16::from(start)..stop)
                .map(|v| addr_with(&octets, idx, v as u8))
                .collect())
        }
    }
}

/// Strict decimal parse: digits only, in bounds for the target type.
fn parse_decimal<T: std::str::FromStr>(s: &str) -> Option<T> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
