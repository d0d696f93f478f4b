//! Per-student, per-day attendance transitions.
//!
//! A scan moves the day row through `none -> checked in -> checked out`.
//! Anything after check-out is acknowledged without touching the row. The
//! remarks chosen at check-in stay for the rest of the day.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::clock::{Clock, WallTime};
use crate::err::Error;
use crate::models::{
    AttendanceRecord, AttendanceView, ManualEntry, ManualOutcome, Remarks, ScanMethod, Student,
    StudentId,
};
use crate::store::{AttendanceStore, StudentStore};

/// Arrivals strictly after this time are late.
pub const DEFAULT_LATE_THRESHOLD: &str = "08:00";

/// Each pass either applies a transition or observes that a concurrent
/// writer moved the row forward first. Rows only move forward under scans,
/// so this bound is reached only when manual entries keep rewriting the row.
const MAX_PASSES: usize = 4;

pub fn classify(time_in: WallTime, late_threshold: WallTime) -> Remarks {
    if time_in > late_threshold {
        Remarks::Late
    } else {
        Remarks::Present
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanOutcome {
    CheckedIn,
    CheckedOut,
    AlreadyComplete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReceipt {
    pub message: String,
    pub outcome: ScanOutcome,
    pub student_name: String,
    pub scan_method: ScanMethod,
    pub remarks: Remarks,
    /// Wall-clock time of this scan.
    pub time: WallTime,
    pub date: NaiveDate,
    pub time_in: Option<WallTime>,
    pub time_out: Option<WallTime>,
}

pub struct AttendanceEngine {
    students: Arc<dyn StudentStore>,
    ledger: Arc<dyn AttendanceStore>,
    clock: Arc<dyn Clock>,
    late_threshold: WallTime,
}

impl AttendanceEngine {
    pub fn new(
        students: Arc<dyn StudentStore>,
        ledger: Arc<dyn AttendanceStore>,
        clock: Arc<dyn Clock>,
        late_threshold: WallTime,
    ) -> Self {
        Self {
            students,
            ledger,
            clock,
            late_threshold,
        }
    }

    /// Records a scan at the current local time.
    pub async fn record_scan(
        &self,
        student_id: StudentId,
        method: ScanMethod,
    ) -> Result<ScanReceipt, Error> {
        let at = self.clock.local_now();
        self.record_scan_at(student_id, method, at).await
    }

    pub async fn record_scan_at(
        &self,
        student_id: StudentId,
        method: ScanMethod,
        at: NaiveDateTime,
    ) -> Result<ScanReceipt, Error> {
        let student = self
            .students
            .find_student(student_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Student {} does not exist", student_id)))?;

        let date = at.date();
        let time = WallTime::truncate(at.time());
        let (outcome, record) = self.transition(student_id, date, time).await?;
        log::debug!(
            "Scan for student {} on {} at {} via {}: {:?}",
            student_id,
            date,
            time,
            method,
            outcome
        );

        Ok(receipt(&student, method, time, outcome, record))
    }

    async fn transition(
        &self,
        student_id: StudentId,
        date: NaiveDate,
        time: WallTime,
    ) -> Result<(ScanOutcome, AttendanceRecord), Error> {
        let check_in_remarks = classify(time, self.late_threshold);

        for _ in 0..MAX_PASSES {
            let applied = match self.ledger.find_record(student_id, date).await? {
                None => self
                    .ledger
                    .insert_check_in(student_id, date, time, check_in_remarks)
                    .await?
                    .map(|r| (ScanOutcome::CheckedIn, r)),
                Some(existing) if existing.time_in.is_none() => self
                    .ledger
                    .fill_check_in(student_id, date, time, check_in_remarks)
                    .await?
                    .map(|r| (ScanOutcome::CheckedIn, r)),
                Some(existing) if existing.time_out.is_none() => self
                    .ledger
                    .set_check_out(student_id, date, time)
                    .await?
                    .map(|r| (ScanOutcome::CheckedOut, r)),
                Some(existing) => Some((ScanOutcome::AlreadyComplete, existing)),
            };

            if let Some(applied) = applied {
                return Ok(applied);
            }
            log::debug!(
                "Attendance row for student {} on {} changed during scan, re-reading",
                student_id,
                date
            );
        }

        Err(Error::Conflict {
            message: "Attendance record is being modified concurrently".to_string(),
        })
    }

    /// Inserts or overwrites the whole day row. No classification happens
    /// here; the caller's remarks are stored as given.
    pub async fn manual_entry(&self, entry: ManualEntry) -> Result<ManualOutcome, Error> {
        if self.students.find_student(entry.student_id).await?.is_none() {
            return Err(Error::not_found(format!(
                "Student {} does not exist",
                entry.student_id
            )));
        }
        let outcome = self.ledger.upsert_manual(&entry).await?;
        log::info!(
            "Manual attendance for student {} on {}: {:?}",
            entry.student_id,
            entry.date,
            outcome
        );
        Ok(outcome)
    }

    pub async fn list(&self, date: Option<NaiveDate>) -> Result<Vec<AttendanceView>, Error> {
        self.ledger.list_records(date).await
    }
}

fn receipt(
    student: &Student,
    method: ScanMethod,
    time: WallTime,
    outcome: ScanOutcome,
    record: AttendanceRecord,
) -> ScanReceipt {
    let message = match outcome {
        ScanOutcome::CheckedIn => format!(
            "Time in recorded via {}: marked {}",
            method, record.remarks
        ),
        ScanOutcome::CheckedOut => "Time out recorded successfully".to_string(),
        ScanOutcome::AlreadyComplete => "Attendance already complete for today".to_string(),
    };
    ScanReceipt {
        message,
        outcome,
        student_name: student.name.clone(),
        scan_method: method,
        remarks: record.remarks,
        time,
        date: record.date,
        time_in: record.time_in,
        time_out: record.time_out,
    }
}
