//! Storage seams.
//!
//! Every table is shared mutable state between concurrent requests. The
//! traits expose only operations a backend can perform atomically; no
//! caller ever splits a read-modify-write across two calls and relies on
//! nothing changing in between.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::clock::WallTime;
use crate::err::Error;
use crate::models::{
    Absentee, AttendanceRecord, AttendanceView, ManualEntry, ManualOutcome, NewAccount, NewStudent,
    Remarks, Session, Strand, Student, StudentId, UserAccount,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_account(&self, username: &str) -> Result<Option<UserAccount>, Error>;

    /// Returns `None` when the username is already taken.
    async fn insert_account(&self, account: NewAccount) -> Result<Option<UserAccount>, Error>;

    async fn count_admins(&self) -> Result<i64, Error>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: &Session) -> Result<(), Error>;

    /// The session row for `token` together with its owner, provided the row
    /// exists and `now < expires_at`.
    async fn find_live_session(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<(Session, UserAccount)>, Error>;

    /// Returns whether a row was deleted.
    async fn delete_session(&self, token: &str) -> Result<bool, Error>;

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, Error>;
}

#[async_trait]
pub trait StudentStore: Send + Sync {
    async fn insert_student(&self, student: NewStudent) -> Result<Student, Error>;

    async fn find_student(&self, id: StudentId) -> Result<Option<Student>, Error>;

    async fn find_student_by_qr(&self, qr_code: &str) -> Result<Option<Student>, Error>;

    async fn list_students(&self) -> Result<Vec<Student>, Error>;

    /// Student count per strand. Strands without students may be omitted.
    async fn count_by_strand(&self) -> Result<Vec<(Strand, i64)>, Error>;
}

/// Ledger primitives. Each conditional write either applies completely and
/// returns the resulting row, or does nothing and returns `None`.
#[async_trait]
pub trait AttendanceStore: Send + Sync {
    async fn find_record(
        &self,
        student_id: StudentId,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, Error>;

    /// Inserts the day row with `time_in` set, unless one already exists.
    async fn insert_check_in(
        &self,
        student_id: StudentId,
        date: NaiveDate,
        time_in: WallTime,
        remarks: Remarks,
    ) -> Result<Option<AttendanceRecord>, Error>;

    /// Sets `time_in` and `remarks` on an existing row whose `time_in` is unset.
    async fn fill_check_in(
        &self,
        student_id: StudentId,
        date: NaiveDate,
        time_in: WallTime,
        remarks: Remarks,
    ) -> Result<Option<AttendanceRecord>, Error>;

    /// Sets `time_out` on a row that has `time_in` but no `time_out`.
    async fn set_check_out(
        &self,
        student_id: StudentId,
        date: NaiveDate,
        time_out: WallTime,
    ) -> Result<Option<AttendanceRecord>, Error>;

    /// Inserts or fully overwrites the day row.
    async fn upsert_manual(&self, entry: &ManualEntry) -> Result<ManualOutcome, Error>;

    /// Newest day first, then latest check-in first.
    async fn list_records(&self, date: Option<NaiveDate>) -> Result<Vec<AttendanceView>, Error>;

    /// Distinct students marked present on `date`.
    async fn count_present(&self, date: NaiveDate) -> Result<i64, Error>;

    /// Students with at least `min_days` absent rows dated on or after `since`.
    async fn frequent_absentees(
        &self,
        since: NaiveDate,
        min_days: i64,
    ) -> Result<Vec<Absentee>, Error>;
}

/// A backend holding every table.
pub trait Store: AccountStore + SessionStore + StudentStore + AttendanceStore {}

impl<T> Store for T where T: AccountStore + SessionStore + StudentStore + AttendanceStore {}
