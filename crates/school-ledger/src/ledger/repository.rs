use serde::{Deserialize, Serialize};

use super::domain::{
    Amount, AnnualAverage, ClassOffering, ClassOfferingId, DiscountType, DiscountTypeId,
    Enrollment, GradeLevel, Payment, PaymentId, SchoolYear, Student, StudentDiscount,
    StudentDiscountId, StudentId,
};

/// Storage abstraction so the ledger can be exercised against any persistence backend.
///
/// Reads are individual; writes only happen through [`LedgerRepository::apply`], which must
/// commit the whole batch or nothing.
pub trait LedgerRepository: Send + Sync {
    fn student(&self, id: &StudentId) -> Result<Option<Student>, RepositoryError>;
    fn students(&self) -> Result<Vec<Student>, RepositoryError>;

    fn class_offering(&self, id: &ClassOfferingId)
        -> Result<Option<ClassOffering>, RepositoryError>;
    fn class_offerings(&self, school_year: SchoolYear)
        -> Result<Vec<ClassOffering>, RepositoryError>;
    fn tuition_rate(
        &self,
        level: &GradeLevel,
        school_year: SchoolYear,
    ) -> Result<Option<Amount>, RepositoryError>;

    fn discount_type(&self, id: &DiscountTypeId) -> Result<Option<DiscountType>, RepositoryError>;
    fn discount_types(&self) -> Result<Vec<DiscountType>, RepositoryError>;
    fn student_discount(
        &self,
        id: &StudentDiscountId,
    ) -> Result<Option<StudentDiscount>, RepositoryError>;
    fn student_discounts(
        &self,
        student_id: &StudentId,
        school_year: SchoolYear,
    ) -> Result<Vec<StudentDiscount>, RepositoryError>;
    fn discounts_for_year(
        &self,
        school_year: SchoolYear,
    ) -> Result<Vec<StudentDiscount>, RepositoryError>;

    fn payment(&self, id: &PaymentId) -> Result<Option<Payment>, RepositoryError>;
    /// Payments for a student and year in recording order.
    fn payments(
        &self,
        student_id: &StudentId,
        school_year: SchoolYear,
    ) -> Result<Vec<Payment>, RepositoryError>;

    fn enrollment(
        &self,
        student_id: &StudentId,
        school_year: SchoolYear,
    ) -> Result<Option<Enrollment>, RepositoryError>;
    /// Every enrollment of a student, oldest school year first.
    fn enrollments_of(&self, student_id: &StudentId) -> Result<Vec<Enrollment>, RepositoryError>;
    fn enrollments_for_year(
        &self,
        school_year: SchoolYear,
    ) -> Result<Vec<Enrollment>, RepositoryError>;

    fn apply(&self, batch: LedgerBatch) -> Result<(), RepositoryError>;
}

/// A single persistence write.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerWrite {
    SaveStudent(Student),
    SaveClassOffering(ClassOffering),
    SetTuitionRate {
        level: GradeLevel,
        school_year: SchoolYear,
        amount: Amount,
    },
    SaveDiscountType(DiscountType),
    SaveStudentDiscount(StudentDiscount),
    /// Fails with a conflict when the (student, year) pair is already enrolled.
    InsertEnrollment(Enrollment),
    /// Replaces the class of an existing enrollment.
    ReassignEnrollment(Enrollment),
    /// Fails with a conflict when the payment id already exists.
    AppendPayment(Payment),
    /// Removes the student with its enrollments, discounts and payments.
    DeleteStudent(StudentId),
}

/// Writes committed atomically by [`LedgerRepository::apply`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerBatch {
    writes: Vec<LedgerWrite>,
}

impl LedgerBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, write: LedgerWrite) {
        self.writes.push(write);
    }

    pub fn with(mut self, write: LedgerWrite) -> Self {
        self.writes.push(write);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn writes(&self) -> &[LedgerWrite] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<LedgerWrite> {
        self.writes
    }
}

impl From<LedgerWrite> for LedgerBatch {
    fn from(write: LedgerWrite) -> Self {
        Self::new().with(write)
    }
}

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists: {0}")]
    Conflict(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Read-only access to year-end results owned by the grading subsystem.
pub trait GradeSource: Send + Sync {
    fn annual_average(
        &self,
        student_id: &StudentId,
        school_year: SchoolYear,
    ) -> Result<Option<AnnualAverage>, GradeSourceError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum GradeSourceError {
    #[error("grading service unavailable: {0}")]
    Unavailable(String),
}
