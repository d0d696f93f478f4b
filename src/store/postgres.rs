use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;

use super::{AccountStore, AttendanceStore, SessionStore, StudentStore};
use crate::clock::WallTime;
use crate::err::Error;
use crate::models::{
    Absentee, AttendanceRecord, AttendanceView, ManualEntry, ManualOutcome, NewAccount, NewStudent,
    Remarks, Role, Session, Strand, Student, StudentId, UnknownVariant, UserAccount,
};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        username VARCHAR(100) UNIQUE NOT NULL,
        password_hash VARCHAR(255) NOT NULL,
        role TEXT NOT NULL DEFAULT 'teacher' CHECK (role IN ('admin', 'teacher')),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS students (
        id BIGSERIAL PRIMARY KEY,
        name VARCHAR(255) NOT NULL,
        strand TEXT NOT NULL CHECK (strand IN ('HUMSS', 'ABM', 'CSS', 'SMAW', 'AUTO', 'EIM')),
        qr_code VARCHAR(255) UNIQUE NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS sessions (
        token TEXT PRIMARY KEY,
        user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        issued_at TIMESTAMPTZ NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS attendance (
        id BIGSERIAL PRIMARY KEY,
        student_id BIGINT NOT NULL REFERENCES students(id) ON DELETE CASCADE,
        date DATE NOT NULL,
        time_in TIME,
        time_out TIME,
        remarks TEXT NOT NULL DEFAULT 'absent' CHECK (remarks IN ('present', 'late', 'absent')),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (student_id, date)
    )"#,
];

/// Serializes schema creation across processes starting together.
const SCHEMA_LOCK: i64 = 0x726f_6c6c_6361_6c6c;

const RECORD_COLUMNS: &str = "id, student_id, date, time_in, time_out, remarks";

#[derive(Debug, Clone, FromRow)]
struct UserRow {
    id: i64,
    username: String,
    password_hash: String,
    role: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
struct SessionUserRow {
    token: String,
    user_id: i64,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    username: String,
    password_hash: String,
    role: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
struct StudentRow {
    id: i64,
    name: String,
    strand: String,
    qr_code: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
struct RecordRow {
    id: i64,
    student_id: i64,
    date: NaiveDate,
    time_in: Option<NaiveTime>,
    time_out: Option<NaiveTime>,
    remarks: String,
}

#[derive(Debug, Clone, FromRow)]
struct RecordViewRow {
    id: i64,
    student_id: i64,
    date: NaiveDate,
    time_in: Option<NaiveTime>,
    time_out: Option<NaiveTime>,
    remarks: String,
    student_name: String,
    strand: String,
}

fn corrupt(err: UnknownVariant) -> Error {
    Error::internal("CorruptRow", err.to_string())
}

impl TryFrom<UserRow> for UserAccount {
    type Error = Error;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(UserAccount {
            id: row.id,
            username: row.username,
            password_hash: row.password_hash,
            role: row.role.parse::<Role>().map_err(corrupt)?,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<StudentRow> for Student {
    type Error = Error;

    fn try_from(row: StudentRow) -> Result<Self, Self::Error> {
        Ok(Student {
            id: row.id,
            name: row.name,
            strand: row.strand.parse().map_err(corrupt)?,
            qr_code: row.qr_code,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<RecordRow> for AttendanceRecord {
    type Error = Error;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        Ok(AttendanceRecord {
            id: row.id,
            student_id: row.student_id,
            date: row.date,
            time_in: row.time_in.map(WallTime::truncate),
            time_out: row.time_out.map(WallTime::truncate),
            remarks: row.remarks.parse().map_err(corrupt)?,
        })
    }
}

fn record(row: Option<RecordRow>) -> Result<Option<AttendanceRecord>, Error> {
    row.map(AttendanceRecord::try_from).transpose()
}

/// Postgres backend. Ledger writes are single conditional statements, so
/// the `(student_id, date)` constraint and row locks settle concurrent scans.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self, Error> {
        let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
        Ok(Self::new(pool))
    }

    /// Creates missing tables.
    pub async fn migrate(&self) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(SCHEMA_LOCK)
            .execute(&mut tx)
            .await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut tx).await?;
        }
        tx.commit().await?;
        log::info!("Database schema is ready");
        Ok(())
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn find_account(&self, username: &str) -> Result<Option<UserAccount>, Error> {
        sqlx::query_as::<_, UserRow>(
            "SELECT id, username, password_hash, role, created_at FROM users WHERE username = $1 LIMIT 1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?
        .map(UserAccount::try_from)
        .transpose()
    }

    async fn insert_account(&self, account: NewAccount) -> Result<Option<UserAccount>, Error> {
        sqlx::query_as::<_, UserRow>(
            "INSERT INTO users (username, password_hash, role, created_at) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (username) DO NOTHING \
             RETURNING id, username, password_hash, role, created_at",
        )
        .bind(&account.username)
        .bind(&account.password_hash)
        .bind(account.role.as_str())
        .bind(account.created_at)
        .fetch_optional(&self.pool)
        .await?
        .map(UserAccount::try_from)
        .transpose()
    }

    async fn count_admins(&self) -> Result<i64, Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE role = 'admin'")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn insert_session(&self, session: &Session) -> Result<(), Error> {
        let res = sqlx::query(
            "INSERT INTO sessions (token, user_id, issued_at, expires_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(&session.token)
        .bind(session.user_id)
        .bind(session.issued_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() < 1 {
            return Err(Error::internal("DatabaseError", "Could not store session"));
        }
        Ok(())
    }

    async fn find_live_session(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<(Session, UserAccount)>, Error> {
        let row = sqlx::query_as::<_, SessionUserRow>(
            "SELECT s.token, s.user_id, s.issued_at, s.expires_at, \
                    u.username, u.password_hash, u.role, u.created_at \
             FROM sessions s JOIN users u ON s.user_id = u.id \
             WHERE s.token = $1 AND s.expires_at > $2 LIMIT 1",
        )
        .bind(token)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };
        let session = Session {
            token: row.token,
            user_id: row.user_id,
            issued_at: row.issued_at,
            expires_at: row.expires_at,
        };
        let user = UserAccount {
            id: row.user_id,
            username: row.username,
            password_hash: row.password_hash,
            role: row.role.parse().map_err(corrupt)?,
            created_at: row.created_at,
        };
        Ok(Some((session, user)))
    }

    async fn delete_session(&self, token: &str) -> Result<bool, Error> {
        let affected = sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(affected.rows_affected() >= 1)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let affected = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(affected.rows_affected())
    }
}

#[async_trait]
impl StudentStore for PgStore {
    async fn insert_student(&self, student: NewStudent) -> Result<Student, Error> {
        let row = sqlx::query_as::<_, StudentRow>(
            "INSERT INTO students (name, strand, qr_code, created_at) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (qr_code) DO NOTHING \
             RETURNING id, name, strand, qr_code, created_at",
        )
        .bind(&student.name)
        .bind(student.strand.as_str())
        .bind(&student.qr_code)
        .bind(student.created_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(Error::Conflict {
                message: format!("QR code `{}` is already assigned", student.qr_code),
            }),
        }
    }

    async fn find_student(&self, id: StudentId) -> Result<Option<Student>, Error> {
        sqlx::query_as::<_, StudentRow>(
            "SELECT id, name, strand, qr_code, created_at FROM students WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Student::try_from)
        .transpose()
    }

    async fn find_student_by_qr(&self, qr_code: &str) -> Result<Option<Student>, Error> {
        sqlx::query_as::<_, StudentRow>(
            "SELECT id, name, strand, qr_code, created_at FROM students WHERE qr_code = $1",
        )
        .bind(qr_code)
        .fetch_optional(&self.pool)
        .await?
        .map(Student::try_from)
        .transpose()
    }

    async fn list_students(&self) -> Result<Vec<Student>, Error> {
        sqlx::query_as::<_, StudentRow>(
            "SELECT id, name, strand, qr_code, created_at FROM students ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Student::try_from)
        .collect()
    }

    async fn count_by_strand(&self) -> Result<Vec<(Strand, i64)>, Error> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT strand, COUNT(*) FROM students GROUP BY strand")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|(strand, count)| -> Result<(Strand, i64), Error> {
                Ok((strand.parse().map_err(corrupt)?, count))
            })
            .collect()
    }
}

#[async_trait]
impl AttendanceStore for PgStore {
    async fn find_record(
        &self,
        student_id: StudentId,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, Error> {
        let row = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {} FROM attendance WHERE student_id = $1 AND date = $2",
            RECORD_COLUMNS
        ))
        .bind(student_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;
        record(row)
    }

    async fn insert_check_in(
        &self,
        student_id: StudentId,
        date: NaiveDate,
        time_in: WallTime,
        remarks: Remarks,
    ) -> Result<Option<AttendanceRecord>, Error> {
        let row = sqlx::query_as::<_, RecordRow>(&format!(
            "INSERT INTO attendance (student_id, date, time_in, remarks) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (student_id, date) DO NOTHING RETURNING {}",
            RECORD_COLUMNS
        ))
        .bind(student_id)
        .bind(date)
        .bind(NaiveTime::from(time_in))
        .bind(remarks.as_str())
        .fetch_optional(&self.pool)
        .await?;
        record(row)
    }

    async fn fill_check_in(
        &self,
        student_id: StudentId,
        date: NaiveDate,
        time_in: WallTime,
        remarks: Remarks,
    ) -> Result<Option<AttendanceRecord>, Error> {
        let row = sqlx::query_as::<_, RecordRow>(&format!(
            "UPDATE attendance SET time_in = $3, remarks = $4 \
             WHERE student_id = $1 AND date = $2 AND time_in IS NULL RETURNING {}",
            RECORD_COLUMNS
        ))
        .bind(student_id)
        .bind(date)
        .bind(NaiveTime::from(time_in))
        .bind(remarks.as_str())
        .fetch_optional(&self.pool)
        .await?;
        record(row)
    }

    async fn set_check_out(
        &self,
        student_id: StudentId,
        date: NaiveDate,
        time_out: WallTime,
    ) -> Result<Option<AttendanceRecord>, Error> {
        let row = sqlx::query_as::<_, RecordRow>(&format!(
            "UPDATE attendance SET time_out = $3 \
             WHERE student_id = $1 AND date = $2 AND time_in IS NOT NULL AND time_out IS NULL \
             RETURNING {}",
            RECORD_COLUMNS
        ))
        .bind(student_id)
        .bind(date)
        .bind(NaiveTime::from(time_out))
        .fetch_optional(&self.pool)
        .await?;
        record(row)
    }

    async fn upsert_manual(&self, entry: &ManualEntry) -> Result<ManualOutcome, Error> {
        // xmax is zero only for a freshly inserted tuple.
        let (id, inserted): (i64, bool) = sqlx::query_as(
            "INSERT INTO attendance (student_id, date, time_in, time_out, remarks) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (student_id, date) DO UPDATE SET \
                time_in = EXCLUDED.time_in, \
                time_out = EXCLUDED.time_out, \
                remarks = EXCLUDED.remarks \
             RETURNING id, (xmax = 0) AS inserted",
        )
        .bind(entry.student_id)
        .bind(entry.date)
        .bind(entry.time_in.map(NaiveTime::from))
        .bind(entry.time_out.map(NaiveTime::from))
        .bind(entry.remarks.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(if inserted {
            ManualOutcome::Inserted(id)
        } else {
            ManualOutcome::Updated(id)
        })
    }

    async fn list_records(&self, date: Option<NaiveDate>) -> Result<Vec<AttendanceView>, Error> {
        let rows = sqlx::query_as::<_, RecordViewRow>(
            "SELECT a.id, a.student_id, a.date, a.time_in, a.time_out, a.remarks, \
                    s.name AS student_name, s.strand \
             FROM attendance a JOIN students s ON a.student_id = s.id \
             WHERE ($1::DATE IS NULL OR a.date = $1) \
             ORDER BY a.date DESC, a.time_in DESC NULLS LAST",
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<AttendanceView, Error> {
                let record = RecordRow {
                    id: row.id,
                    student_id: row.student_id,
                    date: row.date,
                    time_in: row.time_in,
                    time_out: row.time_out,
                    remarks: row.remarks,
                };
                Ok(AttendanceView {
                    record: record.try_into()?,
                    student_name: row.student_name,
                    strand: row.strand.parse().map_err(corrupt)?,
                })
            })
            .collect()
    }

    async fn count_present(&self, date: NaiveDate) -> Result<i64, Error> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(DISTINCT student_id) FROM attendance WHERE date = $1 AND remarks = 'present'",
        )
        .bind(date)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn frequent_absentees(
        &self,
        since: NaiveDate,
        min_days: i64,
    ) -> Result<Vec<Absentee>, Error> {
        let rows: Vec<(i64, String, i64)> = sqlx::query_as(
            "SELECT s.id, s.name, COUNT(a.id) AS absent_days \
             FROM students s JOIN attendance a ON a.student_id = s.id \
             WHERE a.date >= $1 AND a.remarks = 'absent' \
             GROUP BY s.id, s.name \
             HAVING COUNT(a.id) >= $2 \
             ORDER BY s.id",
        )
        .bind(since)
        .bind(min_days)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(student_id, name, absent_days)| Absentee {
                student_id,
                name,
                absent_days,
            })
            .collect())
    }
}
