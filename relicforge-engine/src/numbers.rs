//! Numeric conversion helpers centralizing safe numeric casts.

use num_traits::cast::cast;

const TWO_POW_53: f64 = 9_007_199_254_740_992.0;

/// Map a raw 64-bit draw onto `[0.0, 1.0)` using the top 53 bits.
#[must_use]
pub fn unit_from_u64(sample: u64) -> f64 {
    let mantissa = sample >> 11;
    let value = cast::<u64, f64>(mantissa).unwrap_or(0.0) / TWO_POW_53;
    value.clamp(0.0, 1.0 - f64::EPSILON)
}

/// Floor a non-negative f64 into u32, returning 0 for non-finite or negative values.
#[must_use]
pub fn floor_f64_to_u32(value: f64) -> u32 {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    let max = cast::<u32, f64>(u32::MAX).unwrap_or(f64::MAX);
    cast::<f64, u32>(value.min(max).floor()).unwrap_or(0)
}

/// Floor a non-negative f64 into u64, returning 0 for non-finite or negative values.
#[must_use]
pub fn floor_f64_to_u64(value: f64) -> u64 {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    let max = cast::<u64, f64>(u64::MAX).unwrap_or(f64::MAX);
    cast::<f64, u64>(value.min(max).floor()).unwrap_or(0)
}

/// Convert u64 to f64 while allowing precision loss in a single location.
#[must_use]
pub fn u64_to_f64(value: u64) -> f64 {
    cast::<u64, f64>(value).unwrap_or(0.0)
}

/// Convert a count into f64 for probability math.
#[must_use]
pub fn usize_to_f64(value: usize) -> f64 {
    cast::<usize, f64>(value).unwrap_or(0.0)
}

/// Pick an index from cumulative weights with a unit roll.
///
/// Falls back to the last index when floating-point drift leaves the roll
/// above the final cumulative bound.
#[must_use]
pub fn pick_weighted(weights: &[f64], roll: f64) -> usize {
    let mut cumulative = 0.0;
    for (idx, weight) in weights.iter().enumerate() {
        cumulative += weight.max(0.0);
        if roll < cumulative {
            return idx;
        }
    }
    weights.len().saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_samples_stay_in_half_open_range() {
        assert!((unit_from_u64(0) - 0.0).abs() < f64::EPSILON);
        assert!(unit_from_u64(u64::MAX) < 1.0);
        let mid = unit_from_u64(u64::MAX / 2);
        assert!((mid - 0.5).abs() < 1e-9);
    }

    #[test]
    fn floors_handle_non_finite() {
        assert_eq!(floor_f64_to_u32(f64::NAN), 0);
        assert_eq!(floor_f64_to_u32(-3.0), 0);
        assert_eq!(floor_f64_to_u32(7.9), 7);
        assert_eq!(floor_f64_to_u64(f64::INFINITY), 0);
        assert_eq!(floor_f64_to_u64(42.5), 42);
    }

    #[test]
    fn weighted_pick_walks_cumulative_bounds() {
        let weights = [0.5, 0.3, 0.15, 0.05];
        assert_eq!(pick_weighted(&weights, 0.0), 0);
        assert_eq!(pick_weighted(&weights, 0.49), 0);
        assert_eq!(pick_weighted(&weights, 0.5), 1);
        assert_eq!(pick_weighted(&weights, 0.94), 2);
        assert_eq!(pick_weighted(&weights, 0.999), 3);
        assert_eq!(pick_weighted(&weights, 1.5), 3);
    }
}
