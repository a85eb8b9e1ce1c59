use std::fmt;

use crate::join::option::JoinSide;

/// Non-fatal condition observed while joining. Diagnostics are returned
/// alongside the result and never change the number of output rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// The two inputs carry different coordinate-reference tags. Reported at
    /// most once per join.
    CrsMismatch {
        left: Option<String>,
        right: Option<String>,
    },
    /// A driver feature with a null or empty geometry; it matches nothing.
    EmptyGeometry { side: JoinSide, id: usize },
    /// Predicate evaluation failed on malformed input and was treated as no
    /// match.
    InvalidGeometry { left_id: usize, right_id: usize },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::CrsMismatch { left, right } => {
                write!(
                    f,
                    "CRS mismatch between the left ({}) and right ({}) inputs",
                    left.as_deref().unwrap_or("None"),
                    right.as_deref().unwrap_or("None")
                )
            }
            Diagnostic::EmptyGeometry { side, id } => {
                write!(f, "Geometry {id} on the {side} side is null or empty")
            }
            Diagnostic::InvalidGeometry { left_id, right_id } => {
                write!(
                    f,
                    "Predicate evaluation failed for left {left_id} and right {right_id}, \
                     treated as no match"
                )
            }
        }
    }
}

/// Compare the coordinate-reference tags of both inputs.
pub fn check_crs(left: Option<&str>, right: Option<&str>) -> Option<Diagnostic> {
    (left != right).then(|| {
        Diagnostic::CrsMismatch {
            left: left.map(str::to_owned),
            right: right.map(str::to_owned),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_crs() {
        assert_eq!(check_crs(None, None), None);
        assert_eq!(check_crs(Some("EPSG:4326"), Some("EPSG:4326")), None);

        let diagnostic = check_crs(Some("EPSG:4326"), None).unwrap();
        assert_eq!(
            diagnostic.to_string(),
            "CRS mismatch between the left (EPSG:4326) and right (None) inputs"
        );
        assert!(check_crs(Some("EPSG:4326"), Some("EPSG:3857")).is_some());
    }
}
