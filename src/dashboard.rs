//! Read-only overview of the roster and today's ledger.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::clock::Clock;
use crate::err::Error;
use crate::models::{Absentee, Strand};
use crate::store::{AttendanceStore, StudentStore};

/// Absences are counted over this many days back from today.
pub const ABSENCE_WINDOW_DAYS: i64 = 7;
pub const ABSENCE_ALERT_DAYS: i64 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub date: NaiveDate,
    pub total_students: i64,
    pub total_attendance_today: i64,
    pub strand_counts: BTreeMap<Strand, i64>,
    pub absent_students: Vec<Absentee>,
}

pub struct Dashboard {
    students: Arc<dyn StudentStore>,
    ledger: Arc<dyn AttendanceStore>,
    clock: Arc<dyn Clock>,
}

impl Dashboard {
    pub fn new(
        students: Arc<dyn StudentStore>,
        ledger: Arc<dyn AttendanceStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            students,
            ledger,
            clock,
        }
    }

    pub async fn stats(&self) -> Result<DashboardStats, Error> {
        let today = self.clock.local_now().date();

        let mut strand_counts: BTreeMap<Strand, i64> =
            Strand::ALL.iter().map(|strand| (*strand, 0)).collect();
        for (strand, count) in self.students.count_by_strand().await? {
            strand_counts.insert(strand, count);
        }
        let total_students = strand_counts.values().sum();

        Ok(DashboardStats {
            date: today,
            total_students,
            total_attendance_today: self.ledger.count_present(today).await?,
            strand_counts,
            absent_students: self
                .ledger
                .frequent_absentees(today - Duration::days(ABSENCE_WINDOW_DAYS), ABSENCE_ALERT_DAYS)
                .await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::AttendanceEngine;
    use crate::clock::{parse_date, FixedClock, WallTime};
    use crate::models::{ManualEntry, NewStudent, Remarks, ScanMethod, StudentId};
    use crate::store::MemoryStore;
    use chrono::Utc;

    async fn enroll(store: &MemoryStore, name: &str, strand: Strand) -> StudentId {
        store
            .insert_student(NewStudent {
                name: name.into(),
                strand,
                qr_code: crate::models::new_qr_code(),
                created_at: Utc::now(),
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn counts_roster_and_todays_present_scans() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::at(
            parse_date("2024-03-11").unwrap(),
            WallTime::from_hm(7, 40).unwrap(),
        ));
        let engine = AttendanceEngine::new(
            store.clone(),
            store.clone(),
            clock.clone(),
            WallTime::from_hm(8, 0).unwrap(),
        );
        let dashboard = Dashboard::new(store.clone(), store.clone(), clock.clone());

        let early = enroll(&store, "Juan Dela Cruz", Strand::Abm).await;
        let late = enroll(&store, "Maria Clara", Strand::Abm).await;
        let absent = enroll(&store, "Jose Rizal", Strand::Css).await;

        engine.record_scan(early, ScanMethod::Qr).await.unwrap();
        engine.record_scan(early, ScanMethod::Qr).await.unwrap();
        clock.advance(Duration::minutes(45));
        engine.record_scan(late, ScanMethod::Face).await.unwrap();

        for day in ["2024-03-04", "2024-03-06", "2024-03-08", "2024-03-01"] {
            engine
                .manual_entry(ManualEntry {
                    student_id: absent,
                    date: parse_date(day).unwrap(),
                    time_in: None,
                    time_out: None,
                    remarks: Remarks::Absent,
                })
                .await
                .unwrap();
        }

        let stats = dashboard.stats().await.unwrap();
        assert_eq!(stats.total_students, 3);
        assert_eq!(stats.total_attendance_today, 1);
        assert_eq!(stats.strand_counts[&Strand::Abm], 2);
        assert_eq!(stats.strand_counts[&Strand::Css], 1);
        assert_eq!(stats.strand_counts[&Strand::Eim], 0);
        assert_eq!(stats.strand_counts.len(), Strand::ALL.len());
        // 2024-03-01 falls outside the window.
        assert_eq!(
            stats.absent_students,
            vec![Absentee {
                student_id: absent,
                name: "Jose Rizal".into(),
                absent_days: 3,
            }]
        );
    }

    #[tokio::test]
    async fn empty_roster_reports_zeroes() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::at(
            parse_date("2024-03-11").unwrap(),
            WallTime::from_hm(9, 0).unwrap(),
        ));
        let stats = Dashboard::new(store.clone(), store, clock).stats().await.unwrap();
        assert_eq!(stats.total_students, 0);
        assert_eq!(stats.total_attendance_today, 0);
        assert!(stats.strand_counts.values().all(|count| *count == 0));
        assert!(stats.absent_students.is_empty());
    }
}
