//! Structural validation of operations and base network rows.
//!
//! These checks need no store context: they only look at the payload of a
//! single operation or row. Checks that depend on state (entity existence,
//! endpoint resolution) happen while staging a batch in [`crate::apply`].
//!
//! Geometries only have to be well-formed here. A line string with two
//! identical vertices is accepted and stored; it is skipped later by
//! consumers that need a renderable shape.

use crate::error::NetworkError;
use crate::model::{Action, EntityKind, FeatureRow, Geometry, Operation};

/// Returns the reason `geometry` cannot be stored on an entity of `kind`.
pub fn geometry_problem(kind: EntityKind, geometry: &Geometry) -> Option<&'static str> {
    if !geometry.fits(kind) {
        return Some(match kind {
            EntityKind::Node => "node geometry must be a Point",
            EntityKind::Link => "link geometry must be a LineString",
        });
    }
    let coords = geometry.coords();
    if let Geometry::LineString(_) = geometry {
        if coords.len() < 2 {
            return Some("line string needs at least two vertices");
        }
    }
    if !coords.iter().all(|c| c.is_finite()) {
        return Some("geometry has a non-finite coordinate");
    }
    None
}

/// Validates one operation of a batch. `index` is its position in the
/// batch and is carried in the error.
pub fn validate_operation(index: usize, op: &Operation) -> Result<(), NetworkError> {
    let malformed = |reason: &str| NetworkError::MalformedOperation {
        index,
        reason: reason.to_string(),
    };

    match op.action {
        Action::Create => {}
        Action::Modify | Action::Delete => {
            if op.id.is_none() {
                return Err(malformed(&format!(
                    "{} of a {} needs a positive id",
                    op.action.as_str(),
                    op.kind
                )));
            }
        }
    }

    if op.action == Action::Delete {
        return Ok(());
    }

    let geometry = op
        .data
        .geometry
        .as_ref()
        .ok_or_else(|| malformed("missing geometry"))?;
    if let Some(reason) = geometry_problem(op.kind, geometry) {
        return Err(malformed(reason));
    }
    Ok(())
}

/// Validates one row of a base network upload.
pub fn validate_base_row(
    kind: EntityKind,
    index: usize,
    row: &FeatureRow,
) -> Result<(), NetworkError> {
    match geometry_problem(kind, &row.geometry) {
        Some(reason) => Err(NetworkError::InvalidBaseRow {
            kind,
            index,
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}
