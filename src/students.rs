use std::sync::Arc;

use crate::clock::Clock;
use crate::err::Error;
use crate::models::{new_qr_code, NewStudent, Strand, Student, StudentId};
use crate::store::StudentStore;

pub struct Roster {
    students: Arc<dyn StudentStore>,
    clock: Arc<dyn Clock>,
}

impl Roster {
    pub fn new(students: Arc<dyn StudentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { students, clock }
    }

    /// Adds a student with a freshly generated QR identifier.
    pub async fn enroll(&self, name: &str, strand: Strand) -> Result<Student, Error> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::validation("Name and strand are required"));
        }
        let student = self
            .students
            .insert_student(NewStudent {
                name: name.to_string(),
                strand,
                qr_code: new_qr_code(),
                created_at: self.clock.now_utc(),
            })
            .await?;
        log::info!("Enrolled student {} with QR code {}", student.id, student.qr_code);
        Ok(student)
    }

    pub async fn get(&self, id: StudentId) -> Result<Student, Error> {
        self.students
            .find_student(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Student {} does not exist", id)))
    }

    pub async fn list(&self) -> Result<Vec<Student>, Error> {
        self.students.list_students().await
    }
}
