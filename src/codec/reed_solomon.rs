//! Systematic Reed-Solomon codec over GF(256).
//!
//! Codewords are laid out as `data (k) | parity (n - k)` with the first data byte as
//! the highest-degree coefficient. The generator polynomial has roots α^0 .. α^(n-k-1).
//! Decoding is errors-only: syndromes, Berlekamp-Massey, Chien search restricted to
//! the `n` positions of the shortened code, then Forney.

use super::gf::{alpha_pow, div, eval_high_first, eval_low_first, mul};
use super::{Codec, RsCode};
use crate::error::JpwlError;

/// Reed-Solomon codec caching the generator of the last selected code.
#[derive(Debug, Default)]
pub struct ReedSolomon {
    code: Option<RsCode>,
    generator: Vec<u8>,
}

impl ReedSolomon {
    pub fn new() -> Self {
        Self::default()
    }

    /// Code whose generator is currently cached.
    pub fn current_code(&self) -> Option<RsCode> {
        self.code
    }

    fn select(&mut self, code: RsCode) {
        if self.code == Some(code) {
            return;
        }
        // Highest degree first, monic.
        let parity_len = code.parity_len();
        let mut generator = Vec::with_capacity(parity_len + 1);
        generator.push(1u8);
        for i in 0..parity_len {
            let root = alpha_pow(i);
            generator.push(0);
            for j in (1..generator.len()).rev() {
                generator[j] ^= mul(generator[j - 1], root);
            }
        }
        self.generator = generator;
        self.code = Some(code);
    }
}

fn check_lengths(code: RsCode, data_len: usize, parity_len: usize) -> Result<(), JpwlError> {
    if data_len > code.k() || parity_len != code.parity_len() {
        return Err(JpwlError::InvalidParameter);
    }
    Ok(())
}

/// Syndromes S_i = r(α^i); returns false when all are zero.
fn syndromes(codeword: &[u8], syndromes: &mut [u8]) -> bool {
    let mut any = false;
    for (i, s) in syndromes.iter_mut().enumerate() {
        *s = eval_high_first(codeword, alpha_pow(i));
        any |= *s != 0;
    }
    any
}

/// Berlekamp-Massey. Returns the error locator (lowest degree first) and its degree.
fn error_locator(syndromes: &[u8]) -> (Vec<u8>, usize) {
    let parity_len = syndromes.len();
    let mut lambda = vec![0u8; parity_len + 1];
    let mut previous = vec![0u8; parity_len + 1];
    lambda[0] = 1;
    previous[0] = 1;
    let mut degree = 0usize;
    let mut shift = 1usize;
    let mut previous_discrepancy = 1u8;

    for r in 0..parity_len {
        let mut discrepancy = syndromes[r];
        for i in 1..=degree {
            discrepancy ^= mul(lambda[i], syndromes[r - i]);
        }
        if discrepancy == 0 {
            shift += 1;
            continue;
        }

        let scale = div(discrepancy, previous_discrepancy);
        let saved = lambda.clone();
        for (i, &b) in previous.iter().enumerate() {
            if b != 0 && i + shift <= parity_len {
                lambda[i + shift] ^= mul(scale, b);
            }
        }
        if 2 * degree <= r {
            degree = r + 1 - degree;
            previous = saved;
            previous_discrepancy = discrepancy;
            shift = 1;
        } else {
            shift += 1;
        }
    }
    (lambda, degree)
}

impl Codec for ReedSolomon {
    fn encode(&mut self, code: RsCode, data: &[u8], parity: &mut [u8]) -> Result<(), JpwlError> {
        check_lengths(code, data.len(), parity.len())?;
        self.select(code);

        parity.fill(0);
        let padding = code.k() - data.len();
        for &byte in data.iter().chain(std::iter::repeat_n(&0u8, padding)) {
            let feedback = byte ^ parity[0];
            parity.copy_within(1.., 0);
            let last = parity.len() - 1;
            parity[last] = 0;
            if feedback != 0 {
                for (p, &g) in parity.iter_mut().zip(&self.generator[1..]) {
                    *p ^= mul(g, feedback);
                }
            }
        }
        Ok(())
    }

    fn decode(&mut self, code: RsCode, data: &mut [u8], parity: &mut [u8]) -> Result<usize, JpwlError> {
        check_lengths(code, data.len(), parity.len())?;
        let (n, k) = (code.n(), code.k());
        let parity_len = code.parity_len();

        let mut codeword = [0u8; 255];
        codeword[..data.len()].copy_from_slice(data);
        codeword[k..n].copy_from_slice(parity);
        let codeword = &mut codeword[..n];

        let mut synd = vec![0u8; parity_len];
        if !syndromes(codeword, &mut synd) {
            return Ok(0);
        }

        let (lambda, degree) = error_locator(&synd);
        if degree == 0 || 2 * degree > parity_len {
            return Err(JpwlError::Uncorrectable);
        }
        let lambda = &lambda[..=degree];

        // Byte at position p is the coefficient of x^(n-1-p); its locator root is α^-(n-1-p).
        let positions: Vec<usize> = (0..n)
            .filter(|&p| eval_low_first(lambda, alpha_pow(255 - (n - 1 - p))) == 0)
            .collect();
        if positions.len() != degree {
            return Err(JpwlError::Uncorrectable);
        }

        // Ω(x) = S(x)Λ(x) mod x^(n-k)
        let omega: Vec<u8> = (0..parity_len)
            .map(|i| {
                (0..=i.min(degree)).fold(0u8, |acc, j| acc ^ mul(synd[i - j], lambda[j]))
            })
            .collect();
        // Formal derivative; only odd powers survive in characteristic 2.
        let derivative: Vec<u8> = (1..lambda.len())
            .map(|i| if i % 2 == 1 { lambda[i] } else { 0 })
            .collect();

        for &p in &positions {
            if p >= data.len() && p < k {
                // Error located in the zero padding of a shortened block.
                return Err(JpwlError::Uncorrectable);
            }
            let power = n - 1 - p;
            let x = alpha_pow(power);
            let x_inv = alpha_pow(255 - power);
            let denominator = eval_low_first(&derivative, x_inv);
            if denominator == 0 {
                return Err(JpwlError::Uncorrectable);
            }
            let magnitude = mul(x, div(eval_low_first(&omega, x_inv), denominator));
            if magnitude == 0 {
                return Err(JpwlError::Uncorrectable);
            }
            codeword[p] ^= magnitude;
        }

        if syndromes(codeword, &mut synd) {
            return Err(JpwlError::Uncorrectable);
        }

        data.copy_from_slice(&codeword[..data.len()]);
        parity.copy_from_slice(&codeword[k..n]);
        Ok(degree)
    }
}
