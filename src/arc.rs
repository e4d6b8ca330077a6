use serde::Serialize;

use crate::normalize::parse_csv_list;

/// One step of a class arc: a name, the track types that fit it, and how
/// many tracks it wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhaseDescriptor {
    pub name: &'static str,
    pub types: &'static [&'static str],
    pub count: usize,
}

const fn phase(
    name: &'static str,
    types: &'static [&'static str],
    count: usize,
) -> PhaseDescriptor {
    PhaseDescriptor { name, types, count }
}

const WARMUP: &[&str] = &["warmup"];
const BUILD: &[&str] = &["endurance", "intervals"];
const PEAK: &[&str] = &["climb", "sprint"];
const PEAK_WITH_INTERVALS: &[&str] = &["climb", "sprint", "intervals"];
const RECOVERY: &[&str] = &["recovery"];
const ACTIVE_RECOVERY: &[&str] = &["recovery", "endurance"];
const COOLDOWN: &[&str] = &["cooldown", "recovery"];

const SHORT_ARC: &[PhaseDescriptor] = &[
    phase("Warmup", WARMUP, 1),
    phase("Build", BUILD, 2),
    phase("Peak", PEAK_WITH_INTERVALS, 2),
    phase("Cooldown", COOLDOWN, 1),
];

const STANDARD_ARC: &[PhaseDescriptor] = &[
    phase("Warmup", WARMUP, 1),
    phase("Build", BUILD, 2),
    phase("Peak 1", PEAK, 2),
    phase("Recovery", RECOVERY, 1),
    phase("Peak 2", PEAK_WITH_INTERVALS, 2),
    phase("Cooldown", COOLDOWN, 1),
];

const LONG_ARC: &[PhaseDescriptor] = &[
    phase("Warmup", WARMUP, 2),
    phase("Build", BUILD, 2),
    phase("Peak 1", PEAK, 2),
    phase("Active Recovery", ACTIVE_RECOVERY, 1),
    phase("Peak 2", PEAK_WITH_INTERVALS, 2),
    phase("Recovery", RECOVERY, 1),
    phase("Peak 3", PEAK, 1),
    phase("Cooldown", COOLDOWN, 1),
];

/// Canonical arc for a class length: up to 30 min, up to 45 min, longer.
pub fn class_arc(duration_minutes: u32) -> &'static [PhaseDescriptor] {
    match duration_minutes {
        0..=30 => SHORT_ARC,
        31..=45 => STANDARD_ARC,
        _ => LONG_ARC,
    }
}

/// Phase a generated track belongs in, judged by its focus area.
pub fn phase_for_focus_area(focus_area: &str) -> &'static str {
    let value = focus_area.to_lowercase();
    if value.contains("warm") {
        "Warmup"
    } else if value.contains("cool") {
        "Cooldown"
    } else if value.contains("recover") {
        "Recovery"
    } else if value.contains("sprint") {
        "Peak 2"
    } else if value.contains("climb") {
        "Peak 1"
    } else {
        "Build"
    }
}

/// Slot vocabulary used by generated recommendations.
pub const SLOT_TYPES: &[&str] = &["warmup", "build", "climb", "sprint", "recovery", "cooldown"];

/// Map a free-text arc step onto the slot vocabulary by keyword; anything
/// unrecognised is a build.
pub fn slot_type_for(step: &str) -> &'static str {
    let value = step.to_lowercase();
    if value.contains("warm") {
        "warmup"
    } else if value.contains("cool") {
        "cooldown"
    } else if value.contains("recover") {
        "recovery"
    } else if value.contains("sprint") {
        "sprint"
    } else if value.contains("climb") {
        "climb"
    } else {
        "build"
    }
}

/// Exact slot vocabulary check for a suggested type; anything else is a build.
pub fn suggest_type(focus_area: Option<&str>) -> &'static str {
    let value = focus_area.map(|f| f.trim().to_lowercase()).unwrap_or_default();
    SLOT_TYPES
        .iter()
        .copied()
        .find(|t| *t == value)
        .unwrap_or("build")
}

pub fn default_arc_types(duration_minutes: u32) -> Vec<&'static str> {
    match duration_minutes {
        0..=30 => vec!["warmup", "build", "climb", "sprint", "cooldown"],
        31..=45 => vec!["warmup", "build", "climb", "recovery", "sprint", "cooldown"],
        _ => vec!["warmup", "build", "climb", "recovery", "climb", "sprint", "cooldown"],
    }
}

/// A caller-supplied comma separated arc, normalised; blank falls back to the
/// default for the class length.
pub fn normalize_arc_types(custom: Option<&str>, duration_minutes: u32) -> Vec<&'static str> {
    let provided = parse_csv_list(custom);
    if provided.is_empty() {
        return default_arc_types(duration_minutes);
    }
    provided.iter().map(|s| slot_type_for(s)).collect()
}
