//! Random number sources for dice.
//!
//! Battles draw every die through a [`RandomSource`] handed in with the
//! battle context, so tests can script exact outcomes and replays can reseed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

/// Random source failures. These are harness bugs, never game-rule outcomes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RandomError {
    #[error("random source exhausted after {drawn} draws")]
    Exhausted { drawn: usize },
    #[error("scripted value {value} out of range for a die with {max} sides")]
    OutOfRange { value: u32, max: u32 },
    #[error("cannot draw from an empty range")]
    InvalidRange,
}

pub trait RandomSource {
    /// Draw a value in `0..max_exclusive`.
    fn next(&mut self, max_exclusive: u32) -> Result<u32, RandomError>;

    fn next_many(&mut self, max_exclusive: u32, count: u32) -> Result<Vec<u32>, RandomError> {
        (0..count).map(|_| self.next(max_exclusive)).collect()
    }

    /// Total draws so far.
    fn total_drawn(&self) -> usize;
}

/// Replays a fixed list of values; running out is an error.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRandomSource {
    values: Vec<u32>,
    position: usize,
}

impl ScriptedRandomSource {
    pub fn new(values: impl Into<Vec<u32>>) -> Self {
        Self {
            values: values.into(),
            position: 0,
        }
    }

    /// A source that fails on the first draw.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn remaining(&self) -> usize {
        self.values.len() - self.position
    }
}

impl RandomSource for ScriptedRandomSource {
    fn next(&mut self, max_exclusive: u32) -> Result<u32, RandomError> {
        if max_exclusive == 0 {
            return Err(RandomError::InvalidRange);
        }
        let value = *self
            .values
            .get(self.position)
            .ok_or(RandomError::Exhausted {
                drawn: self.position,
            })?;
        if value >= max_exclusive {
            return Err(RandomError::OutOfRange {
                value,
                max: max_exclusive,
            });
        }
        self.position += 1;
        log::trace!("scripted draw #{} = {}", self.position, value);
        Ok(value)
    }

    fn total_drawn(&self) -> usize {
        self.position
    }
}

/// Seeded PRNG for real games and odds estimation.
pub struct SeededRandomSource {
    rng: StdRng,
    drawn: usize,
}

impl SeededRandomSource {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            drawn: 0,
        }
    }
}

impl RandomSource for SeededRandomSource {
    fn next(&mut self, max_exclusive: u32) -> Result<u32, RandomError> {
        if max_exclusive == 0 {
            return Err(RandomError::InvalidRange);
        }
        self.drawn += 1;
        Ok(self.rng.gen_range(0..max_exclusive))
    }

    fn total_drawn(&self) -> usize {
        self.drawn
    }
}
