use axum::async_trait;
use axum::extract::{Extension, FromRequest, Path, Query, RequestParts};
use axum::Json;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::attendance::ScanReceipt;
use crate::auth::{Authenticated, BearerToken, LoggedIn};
use crate::clock::{parse_date, WallTime};
use crate::dashboard::DashboardStats;
use crate::err::Error;
use crate::models::{
    AttendanceView, ManualEntry, ManualOutcome, RecordId, Remarks, Role, ScanMethod, Strand,
    Student, StudentId, UserSummary,
};
use crate::{breaks, proceeds, AppState, Payload};

/// JSON body whose parse failures surface as validation errors.
pub struct Body<T>(pub T);

#[async_trait]
impl<T, B> FromRequest<B> for Body<T>
where
    T: DeserializeOwned + Send,
    Json<T>: FromRequest<B>,
    B: Send,
{
    type Rejection = Error;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        Json::<T>::from_request(req)
            .await
            .map(|Json(value)| Body(value))
            .map_err(|_| Error::validation("Request body is not valid JSON for this endpoint"))
    }
}

fn required<T>(value: Option<T>, message: &str) -> Result<T, Error> {
    value.ok_or_else(|| Error::validation(message))
}

/// `""` and `null` both mean "no time".
fn optional_time(raw: Option<String>, field: &str) -> Result<Option<WallTime>, Error> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|_| Error::validation(format!("`{}` must be HH:MM", field))),
    }
}

fn date_param(raw: &str) -> Result<NaiveDate, Error> {
    parse_date(raw.trim()).ok_or_else(|| Error::validation("`date` must be YYYY-MM-DD"))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    message: &'static str,
    #[serde(flatten)]
    session: LoggedIn,
}

pub async fn login(
    Extension(state): Extension<AppState>,
    Body(body): Body<LoginRequest>,
) -> Payload<LoginResponse> {
    let (username, password) = match (body.username, body.password) {
        (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => (u, p),
        _ => return breaks(Error::validation("Username and password are required")),
    };
    let session = state.sessions.login(&username, &password).await?;
    proceeds(LoginResponse {
        message: "Login successful",
        session,
    })
}

#[derive(Debug, Serialize)]
pub struct Message {
    message: &'static str,
}

pub async fn logout(
    Extension(state): Extension<AppState>,
    BearerToken(token): BearerToken,
) -> Payload<Message> {
    state.sessions.logout(&token).await?;
    proceeds(Message {
        message: "Logged out",
    })
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    username: Option<String>,
    password: Option<String>,
    #[serde(default)]
    role: Role,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    message: &'static str,
    user: UserSummary,
}

pub async fn signup(
    Extension(state): Extension<AppState>,
    Body(body): Body<SignupRequest>,
) -> Payload<UserResponse> {
    let username = body.username.unwrap_or_default();
    let password = body.password.unwrap_or_default();
    let user = state
        .credentials
        .create_user(&username, &password, body.role)
        .await?;
    proceeds(UserResponse {
        message: "User registered successfully",
        user: user.summary(),
    })
}

pub async fn current_session(Authenticated(user): Authenticated) -> Payload<UserResponse> {
    proceeds(UserResponse {
        message: "Session is active",
        user,
    })
}

#[derive(Debug, Deserialize)]
pub struct CreateStudent {
    name: Option<String>,
    strand: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StudentResponse {
    student: Student,
}

#[derive(Debug, Serialize)]
pub struct StudentList {
    students: Vec<Student>,
}

pub async fn create_student(
    Authenticated(_): Authenticated,
    Extension(state): Extension<AppState>,
    Body(body): Body<CreateStudent>,
) -> Payload<StudentResponse> {
    let name = required(body.name, "Name and strand are required")?;
    let strand: Strand = required(body.strand, "Name and strand are required")?
        .parse()
        .map_err(|e: crate::models::UnknownVariant| Error::validation(e.to_string()))?;
    let student = state.roster.enroll(&name, strand).await?;
    proceeds(StudentResponse { student })
}

pub async fn list_students(
    Authenticated(_): Authenticated,
    Extension(state): Extension<AppState>,
) -> Payload<StudentList> {
    proceeds(StudentList {
        students: state.roster.list().await?,
    })
}

pub async fn get_student(
    Authenticated(_): Authenticated,
    Extension(state): Extension<AppState>,
    Path(id): Path<StudentId>,
) -> Payload<StudentResponse> {
    proceeds(StudentResponse {
        student: state.roster.get(id).await?,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordScan {
    #[serde(alias = "student_id")]
    student_id: Option<StudentId>,
    #[serde(alias = "scan_method")]
    scan_method: Option<ScanMethod>,
}

pub async fn record_scan(
    Authenticated(_): Authenticated,
    Extension(state): Extension<AppState>,
    Body(body): Body<RecordScan>,
) -> Payload<ScanReceipt> {
    let student_id = required(body.student_id, "Student ID is required")?;
    let method = body.scan_method.unwrap_or(ScanMethod::Manual);
    proceeds(state.attendance.record_scan(student_id, method).await?)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualAttendance {
    #[serde(alias = "student_id")]
    student_id: Option<StudentId>,
    date: Option<String>,
    #[serde(alias = "time_in")]
    time_in: Option<String>,
    #[serde(alias = "time_out")]
    time_out: Option<String>,
    remarks: Option<Remarks>,
}

#[derive(Debug, Serialize)]
pub struct ManualSaved {
    message: &'static str,
    id: RecordId,
    updated: bool,
}

pub async fn manual_attendance(
    Authenticated(user): Authenticated,
    Extension(state): Extension<AppState>,
    Body(body): Body<ManualAttendance>,
) -> Payload<ManualSaved> {
    let student_id = required(body.student_id, "Student ID and date are required")?;
    let date = date_param(&required(body.date, "Student ID and date are required")?)?;
    let entry = ManualEntry {
        student_id,
        date,
        time_in: optional_time(body.time_in, "timeIn")?,
        time_out: optional_time(body.time_out, "timeOut")?,
        remarks: body.remarks.unwrap_or(Remarks::Present),
    };

    log::info!("`{}` is writing attendance manually", user.username);
    proceeds(match state.attendance.manual_entry(entry).await? {
        ManualOutcome::Inserted(id) => ManualSaved {
            message: "Attendance recorded successfully",
            id,
            updated: false,
        },
        ManualOutcome::Updated(id) => ManualSaved {
            message: "Attendance updated successfully",
            id,
            updated: true,
        },
    })
}

#[derive(Debug, Deserialize)]
pub struct AttendanceQuery {
    date: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AttendanceList {
    attendance: Vec<AttendanceView>,
}

pub async fn list_attendance(
    Authenticated(_): Authenticated,
    Extension(state): Extension<AppState>,
    Query(query): Query<AttendanceQuery>,
) -> Payload<AttendanceList> {
    let date = query.date.as_deref().map(date_param).transpose()?;
    proceeds(AttendanceList {
        attendance: state.attendance.list(date).await?,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capture {
    scan_type: Option<ScanMethod>,
    payload: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recognized {
    message: String,
    student_id: StudentId,
    student_name: String,
}

pub async fn process_capture(
    Authenticated(_): Authenticated,
    Extension(state): Extension<AppState>,
    Body(body): Body<Capture>,
) -> Payload<Recognized> {
    let method = required(body.scan_type, "Capture and scan type required")?;
    let payload = required(body.payload, "Capture and scan type required")?;
    let student = state.scanner.detect(method, &payload).await?;
    proceeds(Recognized {
        message: format!("{} capture matched {}", method, student.name),
        student_id: student.id,
        student_name: student.name,
    })
}

pub async fn dashboard_stats(
    Authenticated(_): Authenticated,
    Extension(state): Extension<AppState>,
) -> Payload<DashboardStats> {
    proceeds(state.dashboard.stats().await?)
}
