use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;

use super::{AccountStore, AttendanceStore, SessionStore, StudentStore};
use crate::clock::WallTime;
use crate::err::Error;
use crate::models::{
    Absentee, AttendanceRecord, AttendanceView, ManualEntry, ManualOutcome, NewAccount, NewStudent,
    RecordId, Remarks, Role, Session, Strand, Student, StudentId, UserAccount,
};

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    users: Vec<UserAccount>,
    sessions: HashMap<String, Session>,
    students: Vec<Student>,
    attendance: BTreeMap<(StudentId, NaiveDate), AttendanceRecord>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Process-local backend. All tables sit behind one lock, so every trait
/// call is a serialized transaction.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn session_count(&self) -> usize {
        self.tables.lock().await.sessions.len()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn find_account(&self, username: &str) -> Result<Option<UserAccount>, Error> {
        let tables = self.tables.lock().await;
        Ok(tables.users.iter().find(|u| u.username == username).cloned())
    }

    async fn insert_account(&self, account: NewAccount) -> Result<Option<UserAccount>, Error> {
        let mut tables = self.tables.lock().await;
        if tables.users.iter().any(|u| u.username == account.username) {
            return Ok(None);
        }
        let user = UserAccount {
            id: tables.next_id(),
            username: account.username,
            password_hash: account.password_hash,
            role: account.role,
            created_at: account.created_at,
        };
        tables.users.push(user.clone());
        Ok(Some(user))
    }

    async fn count_admins(&self) -> Result<i64, Error> {
        let tables = self.tables.lock().await;
        Ok(tables.users.iter().filter(|u| u.role == Role::Admin).count() as i64)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: &Session) -> Result<(), Error> {
        let mut tables = self.tables.lock().await;
        tables.sessions.insert(session.token.clone(), session.clone());
        Ok(())
    }

    async fn find_live_session(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<(Session, UserAccount)>, Error> {
        let tables = self.tables.lock().await;
        let session = match tables.sessions.get(token) {
            Some(session) if now < session.expires_at => session,
            _ => return Ok(None),
        };
        Ok(tables
            .users
            .iter()
            .find(|u| u.id == session.user_id)
            .map(|user| (session.clone(), user.clone())))
    }

    async fn delete_session(&self, token: &str) -> Result<bool, Error> {
        let mut tables = self.tables.lock().await;
        Ok(tables.sessions.remove(token).is_some())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let mut tables = self.tables.lock().await;
        let before = tables.sessions.len();
        tables.sessions.retain(|_, s| now < s.expires_at);
        Ok((before - tables.sessions.len()) as u64)
    }
}

#[async_trait]
impl StudentStore for MemoryStore {
    async fn insert_student(&self, student: NewStudent) -> Result<Student, Error> {
        let mut tables = self.tables.lock().await;
        if tables.students.iter().any(|s| s.qr_code == student.qr_code) {
            return Err(Error::Conflict {
                message: format!("QR code `{}` is already assigned", student.qr_code),
            });
        }
        let student = Student {
            id: tables.next_id(),
            name: student.name,
            strand: student.strand,
            qr_code: student.qr_code,
            created_at: student.created_at,
        };
        tables.students.push(student.clone());
        Ok(student)
    }

    async fn find_student(&self, id: StudentId) -> Result<Option<Student>, Error> {
        let tables = self.tables.lock().await;
        Ok(tables.students.iter().find(|s| s.id == id).cloned())
    }

    async fn find_student_by_qr(&self, qr_code: &str) -> Result<Option<Student>, Error> {
        let tables = self.tables.lock().await;
        Ok(tables.students.iter().find(|s| s.qr_code == qr_code).cloned())
    }

    async fn list_students(&self) -> Result<Vec<Student>, Error> {
        let tables = self.tables.lock().await;
        let mut students = tables.students.clone();
        students.sort_by_key(|s| Reverse((s.created_at, s.id)));
        Ok(students)
    }

    async fn count_by_strand(&self) -> Result<Vec<(Strand, i64)>, Error> {
        let tables = self.tables.lock().await;
        let mut counts: BTreeMap<Strand, i64> = BTreeMap::new();
        for student in &tables.students {
            *counts.entry(student.strand).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }
}

#[async_trait]
impl AttendanceStore for MemoryStore {
    async fn find_record(
        &self,
        student_id: StudentId,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, Error> {
        let tables = self.tables.lock().await;
        Ok(tables.attendance.get(&(student_id, date)).cloned())
    }

    async fn insert_check_in(
        &self,
        student_id: StudentId,
        date: NaiveDate,
        time_in: WallTime,
        remarks: Remarks,
    ) -> Result<Option<AttendanceRecord>, Error> {
        let mut tables = self.tables.lock().await;
        if tables.attendance.contains_key(&(student_id, date)) {
            return Ok(None);
        }
        let record = AttendanceRecord {
            id: tables.next_id(),
            student_id,
            date,
            time_in: Some(time_in),
            time_out: None,
            remarks,
        };
        tables.attendance.insert((student_id, date), record.clone());
        Ok(Some(record))
    }

    async fn fill_check_in(
        &self,
        student_id: StudentId,
        date: NaiveDate,
        time_in: WallTime,
        remarks: Remarks,
    ) -> Result<Option<AttendanceRecord>, Error> {
        let mut tables = self.tables.lock().await;
        match tables.attendance.get_mut(&(student_id, date)) {
            Some(record) if record.time_in.is_none() => {
                record.time_in = Some(time_in);
                record.remarks = remarks;
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn set_check_out(
        &self,
        student_id: StudentId,
        date: NaiveDate,
        time_out: WallTime,
    ) -> Result<Option<AttendanceRecord>, Error> {
        let mut tables = self.tables.lock().await;
        match tables.attendance.get_mut(&(student_id, date)) {
            Some(record) if record.time_in.is_some() && record.time_out.is_none() => {
                record.time_out = Some(time_out);
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn upsert_manual(&self, entry: &ManualEntry) -> Result<ManualOutcome, Error> {
        let mut tables = self.tables.lock().await;
        let key = (entry.student_id, entry.date);
        if let Some(record) = tables.attendance.get_mut(&key) {
            record.time_in = entry.time_in;
            record.time_out = entry.time_out;
            record.remarks = entry.remarks;
            return Ok(ManualOutcome::Updated(record.id));
        }
        let id: RecordId = tables.next_id();
        tables.attendance.insert(
            key,
            AttendanceRecord {
                id,
                student_id: entry.student_id,
                date: entry.date,
                time_in: entry.time_in,
                time_out: entry.time_out,
                remarks: entry.remarks,
            },
        );
        Ok(ManualOutcome::Inserted(id))
    }

    async fn list_records(&self, date: Option<NaiveDate>) -> Result<Vec<AttendanceView>, Error> {
        let tables = self.tables.lock().await;
        let mut views: Vec<AttendanceView> = tables
            .attendance
            .values()
            .filter(|r| date.map_or(true, |d| r.date == d))
            .filter_map(|r| {
                let student = tables.students.iter().find(|s| s.id == r.student_id)?;
                Some(AttendanceView {
                    record: r.clone(),
                    student_name: student.name.clone(),
                    strand: student.strand,
                })
            })
            .collect();
        views.sort_by_key(|v| Reverse((v.record.date, v.record.time_in)));
        Ok(views)
    }

    async fn count_present(&self, date: NaiveDate) -> Result<i64, Error> {
        let tables = self.tables.lock().await;
        // One row per (student, date), so rows are already distinct students.
        Ok(tables
            .attendance
            .values()
            .filter(|r| r.date == date && r.remarks == Remarks::Present)
            .count() as i64)
    }

    async fn frequent_absentees(
        &self,
        since: NaiveDate,
        min_days: i64,
    ) -> Result<Vec<Absentee>, Error> {
        let tables = self.tables.lock().await;
        let mut absent_days: BTreeMap<StudentId, i64> = BTreeMap::new();
        for record in tables.attendance.values() {
            if record.date >= since && record.remarks == Remarks::Absent {
                *absent_days.entry(record.student_id).or_default() += 1;
            }
        }
        Ok(absent_days
            .into_iter()
            .filter(|(_, days)| *days >= min_days)
            .filter_map(|(student_id, days)| {
                let student = tables.students.iter().find(|s| s.id == student_id)?;
                Some(Absentee {
                    student_id,
                    name: student.name.clone(),
                    absent_days: days,
                })
            })
            .collect())
    }
}
