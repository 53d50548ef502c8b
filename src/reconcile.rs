use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// One row of a program's study-plan template, in year/semester order.
/// `unit_code` is None for an elective slot with no fixed code; such a slot
/// may still be pre-resolved to a concrete unit via `replacement_code`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannerUnit {
    pub id: String,
    pub year: i64,
    pub semester: String,
    pub unit_code: Option<String>,
    pub unit_name: String,
    pub prerequisites: Option<String>,
    pub unit_type: String,
    pub replacement_code: Option<String>,
    pub replacement_name: Option<String>,
}

/// A unit actually recorded against a student.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentUnit {
    pub id: String,
    pub unit_code: Option<String>,
    pub unit_name: String,
    pub grade: Option<String>,
    pub completed: bool,
    pub unit_type: Option<String>,
}

/// One reconciled row: a planner slot with its matched record (if any), or a
/// trailing `extra` row for a student record no slot accounts for.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlignedRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planner: Option<PlannerUnit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student: Option<StudentUnit>,
    pub matched: bool,
    pub extra: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSummary {
    pub completed_count: usize,
    pub total_required: usize,
    pub completion_percent: i64,
    pub duplicate_codes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub rows: Vec<AlignedRow>,
    pub summary: ProgressSummary,
}

/// Trim and uppercase a unit code. Absent, empty, or whitespace-only codes
/// normalize to None; normalized codes are the sole equality basis for
/// matching.
pub fn normalize_code(raw: Option<&str>) -> Option<String> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_ascii_uppercase())
}

/// Extract a substitution code embedded in a display name as
/// `(filled with <CODE>)`, case-insensitively. Anything that does not match
/// the pattern means "no replacement" rather than an error.
pub fn parse_filled_with(unit_name: &str) -> Option<String> {
    let re = Regex::new(r"(?i)\(filled with\s+([^)\s]+)\s*\)").ok()?;
    let caps = re.captures(unit_name)?;
    normalize_code(Some(caps.get(1)?.as_str()))
}

/// The slot's substitution code, normalized. The structured field takes
/// precedence; the embedded marker is only a fallback parse.
pub fn effective_replacement(unit: &PlannerUnit) -> Option<String> {
    normalize_code(unit.replacement_code.as_deref())
        .or_else(|| parse_filled_with(&unit.unit_name))
}

/// Align a student's recorded units against a planner template.
///
/// Produces one row per planner slot in template order, followed by one
/// `extra` row per student record that no slot claimed and that matches no
/// planner code. Matching is first-match-wins in planner order; a claimed
/// code is consumed and cannot satisfy a later slot. Duplicate student codes
/// resolve last-write-wins in the lookup and are reported in the summary.
pub fn reconcile(planner: &[PlannerUnit], student_units: &[StudentUnit]) -> Reconciliation {
    let mut by_code: HashMap<String, usize> = HashMap::new();
    let mut duplicate_codes: Vec<String> = Vec::new();
    for (i, unit) in student_units.iter().enumerate() {
        if let Some(code) = normalize_code(unit.unit_code.as_deref()) {
            if by_code.insert(code.clone(), i).is_some() && !duplicate_codes.contains(&code) {
                duplicate_codes.push(code);
            }
        }
    }

    // Every code the template mentions, so a never-claimed student unit that
    // still names a planner code is not misreported as an extra.
    let mut planner_codes: HashSet<String> = HashSet::new();
    for slot in planner {
        if let Some(code) = normalize_code(slot.unit_code.as_deref()) {
            planner_codes.insert(code);
        }
        if let Some(code) = effective_replacement(slot) {
            planner_codes.insert(code);
        }
    }

    let mut consumed: HashSet<String> = HashSet::new();
    let mut rows: Vec<AlignedRow> = Vec::with_capacity(planner.len());
    let mut completed_count = 0usize;

    for slot in planner {
        let primary = normalize_code(slot.unit_code.as_deref());
        let replacement = effective_replacement(slot);

        let mut matched: Option<&StudentUnit> = None;
        for code in [primary, replacement].into_iter().flatten() {
            if consumed.contains(&code) {
                continue;
            }
            if let Some(&i) = by_code.get(&code) {
                consumed.insert(code);
                matched = Some(&student_units[i]);
                break;
            }
        }

        if let Some(unit) = matched {
            if unit.completed {
                completed_count += 1;
            }
        }
        rows.push(AlignedRow {
            planner: Some(slot.clone()),
            student: matched.cloned(),
            matched: matched.is_some(),
            extra: false,
        });
    }

    for unit in student_units {
        let is_extra = match normalize_code(unit.unit_code.as_deref()) {
            None => true,
            Some(code) => !consumed.contains(&code) && !planner_codes.contains(&code),
        };
        if is_extra {
            rows.push(AlignedRow {
                planner: None,
                student: Some(unit.clone()),
                matched: false,
                extra: true,
            });
        }
    }

    let total_required = planner.len();
    Reconciliation {
        rows,
        summary: ProgressSummary {
            completed_count,
            total_required,
            completion_percent: completion_percent(completed_count, total_required),
            duplicate_codes,
        },
    }
}

/// `round(100 * completed / required)`, with an empty template reported as 0
/// rather than a division error.
pub fn completion_percent(completed: usize, required: usize) -> i64 {
    if required == 0 {
        return 0;
    }
    (100.0 * completed as f64 / required as f64).round() as i64
}
