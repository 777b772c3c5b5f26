//! Input validation for registry writes and CLI arguments.
//!
//! Everything here runs before a transaction is opened, so malformed input never
//! reaches the store.

use std::collections::HashSet;

use crate::registry::types::{Coordinate, SlotDescriptor};

/// Longest item identifier accepted (bytes).
pub const MAX_ITEM_ID_BYTES: usize = 256;
/// Longest display name accepted (bytes).
pub const MAX_DISPLAY_NAME_BYTES: usize = 1024;

/// Validation errors with helpful messages
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid coordinate '{input}': {reason}")]
    InvalidCoordinate { input: String, reason: String },

    #[error("block entity is missing its {axis} coordinate")]
    MissingCoordinate { axis: char },

    #[error("slot index {slot} at position {position} is negative")]
    NegativeSlot { position: usize, slot: i32 },

    #[error("item count {count} at position {position} is negative")]
    NegativeCount { position: usize, count: i32 },

    #[error("item id at position {position} is empty")]
    EmptyItemId { position: usize },

    #[error("item id at position {position} is too long (maximum {max} bytes)")]
    ItemIdTooLong { position: usize, max: usize },

    #[error("item id at position {position} contains invalid characters: {chars}")]
    InvalidItemId { position: usize, chars: String },

    #[error("display name at position {position} is too long (maximum {max} bytes)")]
    DisplayNameTooLong { position: usize, max: usize },

    #[error("too many slots ({count}) for one container")]
    TooManySlots { count: usize },
}

/// Check a single item identifier. Identifiers are stored as index key prefixes
/// terminated by a NUL byte, so NUL and other control characters are rejected.
pub fn validate_item_id(item_id: &str, position: usize) -> Result<(), ValidationError> {
    if item_id.trim().is_empty() {
        return Err(ValidationError::EmptyItemId { position });
    }
    if item_id.len() > MAX_ITEM_ID_BYTES {
        return Err(ValidationError::ItemIdTooLong {
            position,
            max: MAX_ITEM_ID_BYTES,
        });
    }
    let bad: HashSet<char> = item_id
        .chars()
        .filter(|c| c.is_control() || c.is_whitespace())
        .collect();
    if !bad.is_empty() {
        let mut chars: Vec<String> = bad
            .into_iter()
            .map(|c| format!("\\u{{{:04x}}}", c as u32))
            .collect();
        chars.sort();
        return Err(ValidationError::InvalidItemId {
            position,
            chars: chars.join(", "),
        });
    }
    Ok(())
}

/// Validate one slot descriptor at `position` in the replacement sequence.
pub fn validate_slot(descriptor: &SlotDescriptor, position: usize) -> Result<(), ValidationError> {
    if descriptor.slot < 0 {
        return Err(ValidationError::NegativeSlot {
            position,
            slot: descriptor.slot,
        });
    }
    if descriptor.count < 0 {
        return Err(ValidationError::NegativeCount {
            position,
            count: descriptor.count,
        });
    }
    validate_item_id(&descriptor.item_id, position)?;
    if descriptor.display_name.len() > MAX_DISPLAY_NAME_BYTES {
        return Err(ValidationError::DisplayNameTooLong {
            position,
            max: MAX_DISPLAY_NAME_BYTES,
        });
    }
    Ok(())
}

/// Validate a complete inventory. Slot positions are addressed with a `u32`.
pub fn validate_slots(slots: &[SlotDescriptor]) -> Result<(), ValidationError> {
    if slots.len() > u32::MAX as usize {
        return Err(ValidationError::TooManySlots { count: slots.len() });
    }
    for (position, descriptor) in slots.iter().enumerate() {
        validate_slot(descriptor, position)?;
    }
    Ok(())
}

/// Parse a coordinate written as `x,y,z`, `x y z` or `(x, y, z)`.
pub fn parse_coordinate(input: &str) -> Result<Coordinate, ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidCoordinate {
        input: input.to_string(),
        reason: reason.to_string(),
    };
    let trimmed = input
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')');
    let parts: Vec<&str> = trimmed
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() != 3 {
        return Err(invalid("expected exactly three integers"));
    }
    parse_coordinate_parts(parts[0], parts[1], parts[2]).map_err(|e| match e {
        ValidationError::InvalidCoordinate { reason, .. } => invalid(&reason),
        other => other,
    })
}

/// Parse three separate axis strings into a coordinate.
pub fn parse_coordinate_parts(x: &str, y: &str, z: &str) -> Result<Coordinate, ValidationError> {
    let axis = |name: char, raw: &str| {
        raw.trim()
            .parse::<i32>()
            .map_err(|_| ValidationError::InvalidCoordinate {
                input: format!("{} {} {}", x, y, z),
                reason: format!("{} axis '{}' is not a 32-bit integer", name, raw),
            })
    };
    Ok(Coordinate::new(axis('x', x)?, axis('y', y)?, axis('z', z)?))
}
