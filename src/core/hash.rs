use crate::core::image::PixelGrid;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Rendered width of every fingerprint.
pub const HASH_HEX_LEN: usize = 16;

const HASH_SIDE: u32 = 8;
const DCT_SIDE: usize = 32;
// Low-frequency coefficients kept per axis; the extra column replaces DC.
const DCT_KEEP: usize = 8;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HashError {
    #[error("Cannot hash an empty pixel grid")]
    EmptyGrid,

    #[error("Hash must be {expected} hex characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Invalid hex in hash: {value}")]
    InvalidHex { value: String },
}

/// 64-bit fingerprint rendered as 16 zero-padded hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FixedHash(u64);

impl FixedHash {
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub fn hamming_distance(self, other: FixedHash) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    pub fn similarity(self, other: FixedHash) -> f64 {
        similarity_from_distance(self.hamming_distance(other))
    }

    fn from_bools(bits: impl IntoIterator<Item = bool>) -> Self {
        let mut value = 0u64;
        for (i, bit) in bits.into_iter().take(64).enumerate() {
            if bit {
                value |= 1 << (63 - i);
            }
        }
        Self(value)
    }
}

impl fmt::Display for FixedHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for FixedHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != HASH_HEX_LEN {
            return Err(HashError::InvalidLength {
                expected: HASH_HEX_LEN,
                actual: s.len(),
            });
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex {
                value: s.to_string(),
            });
        }
        u64::from_str_radix(s, 16)
            .map(FixedHash)
            .map_err(|_| HashError::InvalidHex {
                value: s.to_string(),
            })
    }
}

impl TryFrom<String> for FixedHash {
    type Error = HashError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FixedHash> for String {
    fn from(hash: FixedHash) -> Self {
        hash.to_string()
    }
}

/// `1 - distance / (4 * hex_len)`: each hex character carries four bits.
pub fn similarity_from_distance(distance: u32) -> f64 {
    1.0 - distance as f64 / (4 * HASH_HEX_LEN) as f64
}

/// Similarity of two rendered hashes.
pub fn calculate_similarity(hash1: &str, hash2: &str) -> Result<f64, HashError> {
    let left: FixedHash = hash1.parse()?;
    let right: FixedHash = hash2.parse()?;
    Ok(left.similarity(right))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    Average,
    Difference,
    Perceptual,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 3] = [
        HashAlgorithm::Average,
        HashAlgorithm::Difference,
        HashAlgorithm::Perceptual,
    ];
}

/// The three fingerprints every successfully decoded item carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaHashes {
    pub average_hash: FixedHash,
    pub difference_hash: FixedHash,
    pub perceptual_hash: FixedHash,
}

impl MediaHashes {
    pub fn new(average: FixedHash, difference: FixedHash, perceptual: FixedHash) -> Self {
        Self {
            average_hash: average,
            difference_hash: difference,
            perceptual_hash: perceptual,
        }
    }

    pub fn get(&self, algorithm: HashAlgorithm) -> FixedHash {
        match algorithm {
            HashAlgorithm::Average => self.average_hash,
            HashAlgorithm::Difference => self.difference_hash,
            HashAlgorithm::Perceptual => self.perceptual_hash,
        }
    }

    pub fn similarity(&self, other: &MediaHashes, algorithm: HashAlgorithm) -> f64 {
        self.get(algorithm).similarity(other.get(algorithm))
    }

    /// Highest similarity across the three algorithms.
    pub fn best_similarity(&self, other: &MediaHashes) -> f64 {
        HashAlgorithm::ALL
            .iter()
            .map(|&algorithm| self.similarity(other, algorithm))
            .fold(0.0, f64::max)
    }
}

/// Computes perceptual fingerprints from decoded pixels.
pub struct HashExtractor;

impl HashExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, grid: &PixelGrid) -> Result<MediaHashes, HashError> {
        Ok(MediaHashes {
            average_hash: self.average_hash(grid)?,
            difference_hash: self.difference_hash(grid)?,
            perceptual_hash: self.perceptual_hash(grid)?,
        })
    }

    pub fn compute(&self, grid: &PixelGrid, algorithm: HashAlgorithm) -> Result<FixedHash, HashError> {
        match algorithm {
            HashAlgorithm::Average => self.average_hash(grid),
            HashAlgorithm::Difference => self.difference_hash(grid),
            HashAlgorithm::Perceptual => self.perceptual_hash(grid),
        }
    }

    /// 8x8 luma, bit set where the pixel is brighter than the mean.
    pub fn average_hash(&self, grid: &PixelGrid) -> Result<FixedHash, HashError> {
        ensure_not_empty(grid)?;
        let small = grid.luma_resized(HASH_SIDE, HASH_SIDE);
        let values: Vec<f64> = small.pixels().map(|p| p[0] as f64).collect();
        let mean = values.iter().sum::<f64>() / values.len() as f64;

        Ok(FixedHash::from_bools(values.iter().map(|&v| v > mean)))
    }

    /// 9x8 luma, bit set where a pixel is brighter than its right neighbour.
    pub fn difference_hash(&self, grid: &PixelGrid) -> Result<FixedHash, HashError> {
        ensure_not_empty(grid)?;
        let small = grid.luma_resized(HASH_SIDE + 1, HASH_SIDE);

        let mut bits = Vec::with_capacity((HASH_SIDE * HASH_SIDE) as usize);
        for y in 0..HASH_SIDE {
            for x in 0..HASH_SIDE {
                bits.push(small.get_pixel(x, y)[0] > small.get_pixel(x + 1, y)[0]);
            }
        }
        Ok(FixedHash::from_bools(bits))
    }

    /// 32x32 luma through a DCT-II; the 8x8 low-frequency block with DC
    /// swapped for coefficient (0, 8), thresholded against its median.
    pub fn perceptual_hash(&self, grid: &PixelGrid) -> Result<FixedHash, HashError> {
        ensure_not_empty(grid)?;
        let small = grid.luma_resized(DCT_SIDE as u32, DCT_SIDE as u32);
        let coefficients = low_frequency_coefficients(&small);

        let mut sorted = coefficients.clone();
        sorted.sort_by(f64::total_cmp);
        let mid = sorted.len() / 2;
        let median = (sorted[mid - 1] + sorted[mid]) / 2.0;

        Ok(FixedHash::from_bools(coefficients.iter().map(|&c| c > median)))
    }

    pub fn calculate_similarity(
        &self,
        hash1: &MediaHashes,
        hash2: &MediaHashes,
        algorithm: HashAlgorithm,
    ) -> f64 {
        hash1.similarity(hash2, algorithm)
    }

    pub fn calculate_best_similarity(&self, hash1: &MediaHashes, hash2: &MediaHashes) -> f64 {
        hash1.best_similarity(hash2)
    }
}

impl Default for HashExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_not_empty(grid: &PixelGrid) -> Result<(), HashError> {
    if grid.is_empty() {
        Err(HashError::EmptyGrid)
    } else {
        Ok(())
    }
}

fn low_frequency_coefficients(block: &GrayImage) -> Vec<f64> {
    let freqs = DCT_KEEP + 1;
    let table = cosine_table(freqs);

    // Rows first: row_pass[y][u] = sum_x p(x, y) * cos_x(u)
    let mut row_pass = vec![[0.0f64; DCT_KEEP + 1]; DCT_SIDE];
    for (y, row) in row_pass.iter_mut().enumerate() {
        for (u, slot) in row.iter_mut().enumerate() {
            *slot = (0..DCT_SIDE)
                .map(|x| block.get_pixel(x as u32, y as u32)[0] as f64 * table[u][x])
                .sum();
        }
    }

    let coefficient = |v: usize, u: usize| -> f64 {
        (0..DCT_SIDE).map(|y| row_pass[y][u] * table[v][y]).sum()
    };

    let mut coefficients = Vec::with_capacity(DCT_KEEP * DCT_KEEP);
    for v in 0..DCT_KEEP {
        for u in 0..DCT_KEEP {
            if v == 0 && u == 0 {
                coefficients.push(coefficient(0, DCT_KEEP));
            } else {
                coefficients.push(coefficient(v, u));
            }
        }
    }
    coefficients
}

fn cosine_table(freqs: usize) -> Vec<[f64; DCT_SIDE]> {
    (0..freqs)
        .map(|k| {
            let mut row = [0.0f64; DCT_SIDE];
            for (n, slot) in row.iter_mut().enumerate() {
                *slot = ((2 * n + 1) as f64 * k as f64 * PI / (2 * DCT_SIDE) as f64).cos();
            }
            row
        })
        .collect()
}
