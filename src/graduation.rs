use serde::Serialize;
use std::collections::HashSet;

use crate::reconcile::{normalize_code, AlignedRow};

pub const REQUIRED_CREDITS: f64 = 300.0;
pub const DEFAULT_UNIT_CREDITS: f64 = 12.5;
const MPU_REQUIRED_UNITS: usize = 3;

const TYPE_CORE: &str = "Core";
const TYPE_MAJOR: &str = "Major";
const TYPE_MPU: &str = "MPU";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraduationReport {
    pub can_graduate: bool,
    pub total_credits: f64,
    pub required_credits: f64,
    pub missing_core_units: Vec<String>,
    pub missing_major_units: Vec<String>,
    pub mpu_requirement_met: bool,
    pub mpu_types_completed: Vec<String>,
    pub messages: Vec<String>,
}

fn slot_completed(row: &AlignedRow) -> bool {
    row.matched
        && row
            .student
            .as_ref()
            .map(|s| s.completed)
            .unwrap_or(false)
}

fn slot_label(row: &AlignedRow) -> String {
    let Some(slot) = row.planner.as_ref() else {
        return String::new();
    };
    normalize_code(slot.unit_code.as_deref()).unwrap_or_else(|| slot.unit_name.clone())
}

/// Evaluate graduation eligibility from the reconciled planner view.
///
/// `rows` is the output of the reconciler for the student's applicable
/// planner (extras included, planner-less rows are ignored here);
/// `total_credits` is the sum of credit points over completed records.
/// Malaysian students must additionally complete at least three distinct MPU
/// units, or every MPU slot when the template carries fewer than three.
pub fn evaluate(rows: &[AlignedRow], total_credits: f64, malaysian: bool) -> GraduationReport {
    let mut missing_core_units: Vec<String> = Vec::new();
    let mut missing_major_units: Vec<String> = Vec::new();
    let mut mpu_slot_count = 0usize;
    let mut mpu_completed: HashSet<String> = HashSet::new();

    for row in rows {
        let Some(slot) = row.planner.as_ref() else {
            continue;
        };
        match slot.unit_type.as_str() {
            TYPE_CORE => {
                if !slot_completed(row) {
                    missing_core_units.push(slot_label(row));
                }
            }
            TYPE_MAJOR => {
                if !slot_completed(row) {
                    missing_major_units.push(slot_label(row));
                }
            }
            TYPE_MPU => {
                mpu_slot_count += 1;
                if slot_completed(row) {
                    let code = row
                        .student
                        .as_ref()
                        .and_then(|s| normalize_code(s.unit_code.as_deref()))
                        .unwrap_or_else(|| slot_label(row));
                    mpu_completed.insert(code);
                }
            }
            _ => {}
        }
    }

    let mpu_required = if malaysian {
        mpu_slot_count.min(MPU_REQUIRED_UNITS)
    } else {
        0
    };
    let mpu_requirement_met = mpu_completed.len() >= mpu_required;
    let mut mpu_types_completed: Vec<String> = mpu_completed.into_iter().collect();
    mpu_types_completed.sort();

    let mut messages: Vec<String> = Vec::new();
    if total_credits < REQUIRED_CREDITS {
        messages.push(format!(
            "Insufficient credit points: {:.1}/{:.1}",
            total_credits, REQUIRED_CREDITS
        ));
    }
    if !missing_core_units.is_empty() {
        messages.push(format!(
            "Core units outstanding: {}",
            missing_core_units.join(", ")
        ));
    }
    if !missing_major_units.is_empty() {
        messages.push(format!(
            "Major units outstanding: {}",
            missing_major_units.join(", ")
        ));
    }
    if !mpu_requirement_met {
        messages.push(format!(
            "MPU requirement not met: {}/{} units completed",
            mpu_types_completed.len(),
            mpu_required
        ));
    }

    GraduationReport {
        can_graduate: messages.is_empty(),
        total_credits,
        required_credits: REQUIRED_CREDITS,
        missing_core_units,
        missing_major_units,
        mpu_requirement_met,
        mpu_types_completed,
        messages,
    }
}
