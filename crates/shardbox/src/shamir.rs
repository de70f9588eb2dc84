//! shamir secret sharing over GF(256)
//!
//! each byte of the secret gets its own random polynomial of degree
//! `threshold - 1`. share `i` (0-based) is the evaluation at `x = i + 1`,
//! the secret sits at `x = 0`.

use rand::RngCore;
use thiserror::Error;

/// largest number of shares a GF(256) split can produce
pub const MAX_SHARES: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShamirError {
    #[error("invalid threshold {threshold} for {parts} parts")]
    InvalidThreshold { threshold: usize, parts: usize },

    #[error("too many shares: {0}")]
    TooManyShares(usize),

    #[error("no shares to join")]
    NoShares,

    #[error("duplicate share index {0}")]
    DuplicateIndex(u8),

    #[error("share index {0} out of range")]
    IndexOutOfRange(u8),

    #[error("shares have different lengths")]
    LengthMismatch,
}

/// pluggable shamir backend
pub trait Shamir: Send + Sync {
    /// split `secret` into `parts` shares, any `threshold` of which recover it
    fn split(&self, secret: &[u8], parts: usize, threshold: usize) -> Result<Vec<Vec<u8>>, ShamirError>;

    /// recover the secret from `(index, share)` pairs, index as returned by `split`
    fn join(&self, shares: &[(u8, &[u8])]) -> Result<Vec<u8>, ShamirError>;
}

/// byte-wise shamir over GF(256) with the AES polynomial
#[derive(Clone, Copy, Debug, Default)]
pub struct Gf256Shamir;

/// GF(256) multiplication using AES polynomial (x^8 + x^4 + x^3 + x + 1)
fn gf256_mul(a: u8, b: u8) -> u8 {
    let mut result = 0u8;
    let mut a = a;
    let mut b = b;

    while b != 0 {
        if b & 1 != 0 {
            result ^= a;
        }
        let hi = a & 0x80;
        a <<= 1;
        if hi != 0 {
            a ^= 0x1b;
        }
        b >>= 1;
    }
    result
}

/// a^254 = a^(-1) in GF(256)
fn gf256_inv(a: u8) -> u8 {
    if a == 0 {
        return 0;
    }
    let mut result = a;
    for _ in 0..6 {
        result = gf256_mul(result, result);
        result = gf256_mul(result, a);
    }
    gf256_mul(result, result)
}

fn gf256_div(a: u8, b: u8) -> u8 {
    gf256_mul(a, gf256_inv(b))
}

/// horner evaluation, coefficients lowest degree first
fn poly_eval(coeffs: &[u8], x: u8) -> u8 {
    coeffs
        .iter()
        .rev()
        .fold(0u8, |acc, &c| gf256_mul(acc, x) ^ c)
}

/// lagrange weights for interpolating at x = 0
fn lagrange_weights(xs: &[u8]) -> Vec<u8> {
    xs.iter()
        .enumerate()
        .map(|(i, &xi)| {
            let mut num = 1u8;
            let mut den = 1u8;
            for (j, &xj) in xs.iter().enumerate() {
                if i != j {
                    num = gf256_mul(num, xj); // (0 - xj) = xj
                    den = gf256_mul(den, xi ^ xj); // (xi - xj)
                }
            }
            gf256_div(num, den)
        })
        .collect()
}

impl Shamir for Gf256Shamir {
    fn split(&self, secret: &[u8], parts: usize, threshold: usize) -> Result<Vec<Vec<u8>>, ShamirError> {
        if parts > MAX_SHARES {
            return Err(ShamirError::TooManyShares(parts));
        }
        if threshold == 0 || threshold > parts {
            return Err(ShamirError::InvalidThreshold { threshold, parts });
        }
        if parts == 1 {
            return Ok(vec![secret.to_vec()]);
        }

        let mut rng = rand::thread_rng();
        let mut shares = vec![vec![0u8; secret.len()]; parts];
        let mut coeffs = vec![0u8; threshold];

        for (i, &byte) in secret.iter().enumerate() {
            coeffs[0] = byte;
            rng.fill_bytes(&mut coeffs[1..]);

            for (p, share) in shares.iter_mut().enumerate() {
                share[i] = poly_eval(&coeffs, p as u8 + 1);
            }
        }

        Ok(shares)
    }

    fn join(&self, shares: &[(u8, &[u8])]) -> Result<Vec<u8>, ShamirError> {
        let (_, first) = shares.first().ok_or(ShamirError::NoShares)?;
        if shares.len() == 1 {
            return Ok(first.to_vec());
        }

        let mut xs = Vec::with_capacity(shares.len());
        for &(index, share) in shares {
            if share.len() != first.len() {
                return Err(ShamirError::LengthMismatch);
            }
            let x = index
                .checked_add(1)
                .ok_or(ShamirError::IndexOutOfRange(index))?;
            if xs.contains(&x) {
                return Err(ShamirError::DuplicateIndex(index));
            }
            xs.push(x);
        }

        let weights = lagrange_weights(&xs);
        let secret = (0..first.len())
            .map(|i| {
                shares
                    .iter()
                    .zip(&weights)
                    .fold(0u8, |acc, ((_, share), &w)| acc ^ gf256_mul(share[i], w))
            })
            .collect();

        Ok(secret)
    }
}
