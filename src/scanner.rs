//! Resolving a capture to a student.
//!
//! Recognition is an external capability with no accuracy contract. The
//! only built-in recognizer maps already-decoded QR text to a student.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::err::Error;
use crate::models::{ScanMethod, Student};
use crate::store::StudentStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    Recognized(Student),
    NotRecognized,
}

#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn detect(&self, capture: &str) -> Result<Detection, Error>;
}

pub struct QrCodeRecognizer {
    students: Arc<dyn StudentStore>,
}

impl QrCodeRecognizer {
    pub fn new(students: Arc<dyn StudentStore>) -> Self {
        Self { students }
    }
}

#[async_trait]
impl Recognizer for QrCodeRecognizer {
    async fn detect(&self, capture: &str) -> Result<Detection, Error> {
        let code = capture.trim();
        if code.is_empty() {
            return Ok(Detection::NotRecognized);
        }
        Ok(match self.students.find_student_by_qr(code).await? {
            Some(student) => Detection::Recognized(student),
            None => Detection::NotRecognized,
        })
    }
}

#[derive(Default)]
pub struct Scanner {
    recognizers: HashMap<ScanMethod, Arc<dyn Recognizer>>,
}

impl Scanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recognizer(mut self, method: ScanMethod, recognizer: Arc<dyn Recognizer>) -> Self {
        self.recognizers.insert(method, recognizer);
        self
    }

    /// Methods without a registered recognizer never recognize anything.
    pub async fn detect(&self, method: ScanMethod, capture: &str) -> Result<Student, Error> {
        let detection = match self.recognizers.get(&method) {
            Some(recognizer) => recognizer.detect(capture).await?,
            None => {
                log::debug!("No recognizer registered for {} captures", method);
                Detection::NotRecognized
            }
        };
        match detection {
            Detection::Recognized(student) => Ok(student),
            Detection::NotRecognized => Err(Error::NotRecognized {
                message: format!("{} capture not recognized", method),
            }),
        }
    }
}
