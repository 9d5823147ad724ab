use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::domain::{
    Amount, AnnualAverage, ClassOffering, ClassOfferingId, DiscountType, DiscountTypeId,
    Enrollment, GradeLevel, Payment, PaymentId, SchoolYear, Student, StudentDiscount,
    StudentDiscountId, StudentId,
};
use super::repository::{
    GradeSource, GradeSourceError, LedgerBatch, LedgerRepository, LedgerWrite, RepositoryError,
};

#[derive(Debug, Default, Clone)]
struct LedgerState {
    students: BTreeMap<StudentId, Student>,
    classes: BTreeMap<ClassOfferingId, ClassOffering>,
    tuition_rates: HashMap<(GradeLevel, SchoolYear), Amount>,
    discount_types: BTreeMap<DiscountTypeId, DiscountType>,
    discounts: BTreeMap<StudentDiscountId, StudentDiscount>,
    enrollments: BTreeMap<(StudentId, SchoolYear), Enrollment>,
    payments: Vec<Payment>,
}

impl LedgerState {
    fn apply(&mut self, write: LedgerWrite) -> Result<(), RepositoryError> {
        match write {
            LedgerWrite::SaveStudent(student) => {
                let duplicate_number = self.students.values().any(|existing| {
                    existing.id != student.id
                        && existing.registration_number == student.registration_number
                });
                if duplicate_number {
                    return Err(RepositoryError::Conflict(format!(
                        "registration number {}",
                        student.registration_number
                    )));
                }
                self.students.insert(student.id.clone(), student);
            }
            LedgerWrite::SaveClassOffering(offering) => {
                self.classes.insert(offering.id.clone(), offering);
            }
            LedgerWrite::SetTuitionRate {
                level,
                school_year,
                amount,
            } => {
                self.tuition_rates.insert((level, school_year), amount);
            }
            LedgerWrite::SaveDiscountType(discount_type) => {
                self.discount_types
                    .insert(discount_type.id.clone(), discount_type);
            }
            LedgerWrite::SaveStudentDiscount(discount) => {
                self.discounts.insert(discount.id.clone(), discount);
            }
            LedgerWrite::InsertEnrollment(enrollment) => {
                let key = (enrollment.student_id.clone(), enrollment.school_year);
                if self.enrollments.contains_key(&key) {
                    return Err(RepositoryError::Conflict(format!(
                        "enrollment of {} for {}",
                        key.0, key.1
                    )));
                }
                self.enrollments.insert(key, enrollment);
            }
            LedgerWrite::ReassignEnrollment(enrollment) => {
                let key = (enrollment.student_id.clone(), enrollment.school_year);
                match self.enrollments.get_mut(&key) {
                    Some(existing) => *existing = enrollment,
                    None => {
                        return Err(RepositoryError::NotFound(format!(
                            "enrollment of {} for {}",
                            key.0, key.1
                        )))
                    }
                }
            }
            LedgerWrite::AppendPayment(payment) => {
                if self.payments.iter().any(|existing| existing.id == payment.id) {
                    return Err(RepositoryError::Conflict(format!("payment {}", payment.id)));
                }
                self.payments.push(payment);
            }
            LedgerWrite::DeleteStudent(student_id) => {
                if self.students.remove(&student_id).is_none() {
                    return Err(RepositoryError::NotFound(format!("student {student_id}")));
                }
                self.enrollments
                    .retain(|(owner, _), _| owner != &student_id);
                self.discounts
                    .retain(|_, discount| discount.student_id != student_id);
                self.payments
                    .retain(|payment| payment.student_id != student_id);
            }
        }
        Ok(())
    }
}

/// In-process ledger store backing the API service and the test suites.
#[derive(Debug, Default, Clone)]
pub struct MemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, LedgerState>, RepositoryError> {
        self.state
            .read()
            .map_err(|_| RepositoryError::Unavailable("ledger store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, LedgerState>, RepositoryError> {
        self.state
            .write()
            .map_err(|_| RepositoryError::Unavailable("ledger store lock poisoned".to_string()))
    }
}

impl LedgerRepository for MemoryLedgerStore {
    fn student(&self, id: &StudentId) -> Result<Option<Student>, RepositoryError> {
        Ok(self.read()?.students.get(id).cloned())
    }

    fn students(&self) -> Result<Vec<Student>, RepositoryError> {
        Ok(self.read()?.students.values().cloned().collect())
    }

    fn class_offering(
        &self,
        id: &ClassOfferingId,
    ) -> Result<Option<ClassOffering>, RepositoryError> {
        Ok(self.read()?.classes.get(id).cloned())
    }

    fn class_offerings(
        &self,
        school_year: SchoolYear,
    ) -> Result<Vec<ClassOffering>, RepositoryError> {
        Ok(self
            .read()?
            .classes
            .values()
            .filter(|offering| offering.school_year == school_year)
            .cloned()
            .collect())
    }

    fn tuition_rate(
        &self,
        level: &GradeLevel,
        school_year: SchoolYear,
    ) -> Result<Option<Amount>, RepositoryError> {
        Ok(self
            .read()?
            .tuition_rates
            .get(&(level.clone(), school_year))
            .copied())
    }

    fn discount_type(&self, id: &DiscountTypeId) -> Result<Option<DiscountType>, RepositoryError> {
        Ok(self.read()?.discount_types.get(id).cloned())
    }

    fn discount_types(&self) -> Result<Vec<DiscountType>, RepositoryError> {
        Ok(self.read()?.discount_types.values().cloned().collect())
    }

    fn student_discount(
        &self,
        id: &StudentDiscountId,
    ) -> Result<Option<StudentDiscount>, RepositoryError> {
        Ok(self.read()?.discounts.get(id).cloned())
    }

    fn student_discounts(
        &self,
        student_id: &StudentId,
        school_year: SchoolYear,
    ) -> Result<Vec<StudentDiscount>, RepositoryError> {
        Ok(self
            .read()?
            .discounts
            .values()
            .filter(|discount| {
                &discount.student_id == student_id && discount.school_year == school_year
            })
            .cloned()
            .collect())
    }

    fn discounts_for_year(
        &self,
        school_year: SchoolYear,
    ) -> Result<Vec<StudentDiscount>, RepositoryError> {
        Ok(self
            .read()?
            .discounts
            .values()
            .filter(|discount| discount.school_year == school_year)
            .cloned()
            .collect())
    }

    fn payment(&self, id: &PaymentId) -> Result<Option<Payment>, RepositoryError> {
        Ok(self
            .read()?
            .payments
            .iter()
            .find(|payment| &payment.id == id)
            .cloned())
    }

    fn payments(
        &self,
        student_id: &StudentId,
        school_year: SchoolYear,
    ) -> Result<Vec<Payment>, RepositoryError> {
        let mut payments: Vec<Payment> = self
            .read()?
            .payments
            .iter()
            .filter(|payment| {
                &payment.student_id == student_id && payment.school_year == school_year
            })
            .cloned()
            .collect();
        payments.sort_by_key(|payment| payment.sequence);
        Ok(payments)
    }

    fn enrollment(
        &self,
        student_id: &StudentId,
        school_year: SchoolYear,
    ) -> Result<Option<Enrollment>, RepositoryError> {
        Ok(self
            .read()?
            .enrollments
            .get(&(student_id.clone(), school_year))
            .cloned())
    }

    fn enrollments_of(&self, student_id: &StudentId) -> Result<Vec<Enrollment>, RepositoryError> {
        Ok(self
            .read()?
            .enrollments
            .iter()
            .filter(|((owner, _), _)| owner == student_id)
            .map(|(_, enrollment)| enrollment.clone())
            .collect())
    }

    fn enrollments_for_year(
        &self,
        school_year: SchoolYear,
    ) -> Result<Vec<Enrollment>, RepositoryError> {
        Ok(self
            .read()?
            .enrollments
            .values()
            .filter(|enrollment| enrollment.school_year == school_year)
            .cloned()
            .collect())
    }

    fn apply(&self, batch: LedgerBatch) -> Result<(), RepositoryError> {
        let mut guard = self.write()?;
        let mut staged = guard.clone();
        for write in batch.into_writes() {
            staged.apply(write)?;
        }
        *guard = staged;
        Ok(())
    }
}

/// Annual averages keyed by student and year, standing in for the grading subsystem.
#[derive(Debug, Default, Clone)]
pub struct MemoryGradeBook {
    averages: Arc<RwLock<HashMap<(StudentId, SchoolYear), AnnualAverage>>>,
}

impl MemoryGradeBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, average: AnnualAverage) -> Result<(), GradeSourceError> {
        let mut guard = self
            .averages
            .write()
            .map_err(|_| GradeSourceError::Unavailable("grade book lock poisoned".to_string()))?;
        guard.insert(
            (average.student_id.clone(), average.school_year),
            average,
        );
        Ok(())
    }
}

impl GradeSource for MemoryGradeBook {
    fn annual_average(
        &self,
        student_id: &StudentId,
        school_year: SchoolYear,
    ) -> Result<Option<AnnualAverage>, GradeSourceError> {
        let guard = self
            .averages
            .read()
            .map_err(|_| GradeSourceError::Unavailable("grade book lock poisoned".to_string()))?;
        Ok(guard.get(&(student_id.clone(), school_year)).cloned())
    }
}
