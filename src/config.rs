//! Database configuration.

use crate::error::{OrionError, Result};

/// Configuration for a database.
///
/// `dimension` is fixed for the lifetime of the database; every stored and
/// queried vector must have exactly this many components. `capacity` sizes
/// the initial ANN index and is advisory: inserting past it triggers a
/// transparent index rebuild at a larger capacity.
///
/// # Example
///
/// ```
/// use oriondb::Config;
///
/// let config = Config::new(128, 10_000).unwrap();
/// assert_eq!(config.dimension, 128);
/// assert!(Config::new(0, 10_000).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Number of f32 components per vector. Immutable after creation.
    pub dimension: u32,
    /// Initial ANN index capacity in vectors. Grows via rebuild.
    pub capacity: u64,
}

impl Config {
    /// Create a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`OrionError::InvalidConfig`] if `dimension` or `capacity`
    /// is zero.
    pub fn new(dimension: u32, capacity: u64) -> Result<Self> {
        if dimension == 0 {
            return Err(OrionError::InvalidConfig(
                "vector dimension must be greater than 0".to_string(),
            ));
        }
        if capacity == 0 {
            return Err(OrionError::InvalidConfig(
                "index capacity must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            dimension,
            capacity,
        })
    }

    /// Dimension as a `usize` for slice-length comparisons.
    #[inline]
    pub fn dim(&self) -> usize {
        self.dimension as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = Config::new(2, 1000).unwrap();
        assert_eq!(config.dim(), 2);
        assert_eq!(config.capacity, 1000);
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(matches!(
            Config::new(0, 100),
            Err(OrionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            Config::new(8, 0),
            Err(OrionError::InvalidConfig(_))
        ));
    }
}
