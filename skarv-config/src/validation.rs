//! Custom validation functions shared across configuration modules.

use validator::ValidationError;

/// Highest endpoint id representable in the 64-bit participation mask.
pub const MAX_ENDPOINT_ID: u32 = 63;

/// Ring and queue capacities must be powers of two for cheap masking.
pub fn validate_power_of_two(value: usize) -> Result<(), ValidationError> {
    if value.is_power_of_two() {
        Ok(())
    } else {
        Err(ValidationError::new("must_be_power_of_two"))
    }
}

/// Contributor ids must fit the participation bitmask and be unique.
pub fn validate_contributor_ids(ids: &[u32]) -> Result<(), ValidationError> {
    let mut mask = 0u64;
    for &id in ids {
        if id > MAX_ENDPOINT_ID {
            return Err(ValidationError::new("contributor_id_out_of_range"));
        }
        if mask & (1 << id) != 0 {
            return Err(ValidationError::new("duplicate_contributor_id"));
        }
        mask |= 1 << id;
    }
    Ok(())
}
