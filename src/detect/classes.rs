//! Static dress-code class taxonomy.
//!
//! One table feeds both the event filter and the renderer; the per-pipeline
//! label dictionaries this replaces drifted apart in practice. The table is
//! fixed at build time and is not policy: exemption windows suppress classes
//! at runtime, the taxonomy itself never changes.

use serde::{Deserialize, Serialize};

/// Disposition of a detection class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassKind {
    /// Dress-code violation, reportable unless an exemption window is active.
    Violation,
    /// Compliant uniform sighting, reportable, never exempt.
    Uniform,
    /// Detected but never reportable (bags, jackets, masks).
    Ignored,
}

#[derive(Clone, Copy, Debug)]
pub struct ClassInfo {
    pub kind: ClassKind,
    pub label: &'static str,
}

const CLASS_TABLE: &[ClassInfo] = &[
    ClassInfo {
        kind: ClassKind::Violation,
        label: "Sleeveless",
    },
    ClassInfo {
        kind: ClassKind::Violation,
        label: "Cap",
    },
    ClassInfo {
        kind: ClassKind::Violation,
        label: "Shorts",
    },
    ClassInfo {
        kind: ClassKind::Uniform,
        label: "Uniform A",
    },
    ClassInfo {
        kind: ClassKind::Uniform,
        label: "Uniform B",
    },
    ClassInfo {
        kind: ClassKind::Uniform,
        label: "Uniform C",
    },
    ClassInfo {
        kind: ClassKind::Ignored,
        label: "Bag",
    },
    ClassInfo {
        kind: ClassKind::Ignored,
        label: "Jacket",
    },
    ClassInfo {
        kind: ClassKind::Ignored,
        label: "Mask",
    },
];

const UNKNOWN: ClassInfo = ClassInfo {
    kind: ClassKind::Ignored,
    label: "Unknown",
};

/// Look up a class id. Ids the model emits that we have no row for are
/// treated as ignored rather than rejected.
pub fn classify(class_id: u32) -> ClassInfo {
    CLASS_TABLE
        .get(class_id as usize)
        .copied()
        .unwrap_or(UNKNOWN)
}

/// Reverse lookup for violation labels, used when ingesting exemption
/// windows whose wire form names the dress code rather than the class id.
pub fn class_id_for_violation(label: &str) -> Option<u32> {
    CLASS_TABLE.iter().enumerate().find_map(|(id, info)| {
        if info.kind == ClassKind::Violation && info.label.eq_ignore_ascii_case(label) {
            Some(id as u32)
        } else {
            None
        }
    })
}
