use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

use crate::config::LedgerConfig;

use super::balance::{Balance, StudentYearLedger};
use super::calendar::{Clock, SystemClock};
use super::context::{IdSequence, LedgerContext};
use super::discounts::{
    DiscountGrant, DiscountLedger, DiscountTypeGroup, DiscountTypeView, ResolvedDiscount,
};
use super::domain::{
    Amount, ClassOffering, ClassOfferingId, DiscountType, DiscountTypeId, DiscountValue,
    Enrollment, EnrollmentState, GradeLevel, Payment, PaymentId, SchoolYear, Student,
    StudentDiscount, StudentDiscountId, StudentId, UserId,
};
use super::enrollment::{
    EnrollmentLifecycle, EnrollmentOutcome, Finalization, OnlinePreregistration,
    OnsiteRegistration, Reinscription, ReinscriptionOutcome,
};
use super::error::LedgerError;
use super::payments::{PaymentLedger, PaymentReceipt, PaymentRequest};
use super::reports::{self, StudentStatement, YearBalance, YearStatistics};
use super::repository::{GradeSource, LedgerRepository, LedgerWrite};
use super::tuition::{ClassOfferingDraft, TuitionPolicy};

/// One mutex per student, created on first use.
#[derive(Debug, Default)]
struct StudentLocks {
    locks: Mutex<HashMap<StudentId, Arc<Mutex<()>>>>,
}

impl StudentLocks {
    fn lock_for(&self, student_id: &StudentId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(student_id.clone()).or_default().clone()
    }

    fn forget(&self, student_id: &StudentId) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.remove(student_id);
    }
}

/// Facade over the ledger components, sharing one repository, clock, and configuration.
///
/// Every write touching a student runs under that student's lock so the balance it checks is
/// the balance it writes against. Catalogue writes (tuition rates, classes, discount types)
/// share a single lock. Reads take no lock.
pub struct SchoolLedgerService<R, G> {
    repository: Arc<R>,
    grades: Arc<G>,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
    ids: IdSequence,
    students: StudentLocks,
    catalog: Mutex<()>,
}

impl<R, G> SchoolLedgerService<R, G>
where
    R: LedgerRepository + 'static,
    G: GradeSource + 'static,
{
    pub fn new(repository: Arc<R>, grades: Arc<G>, config: LedgerConfig) -> Self {
        Self::with_clock(repository, grades, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        repository: Arc<R>,
        grades: Arc<G>,
        config: LedgerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            grades,
            clock,
            config,
            ids: IdSequence::default(),
            students: StudentLocks::default(),
            catalog: Mutex::new(()),
        }
    }

    fn context(&self) -> LedgerContext<'_, R> {
        LedgerContext::new(
            self.repository.as_ref(),
            self.clock.as_ref(),
            &self.config,
            &self.ids,
        )
    }

    fn lifecycle(&self) -> EnrollmentLifecycle<'_, R, G> {
        EnrollmentLifecycle::new(self.context(), self.grades.as_ref())
    }

    fn with_student<T>(
        &self,
        student_id: &StudentId,
        operation: impl FnOnce() -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let lock = self.students.lock_for(student_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        operation()
    }

    fn with_catalog<T>(
        &self,
        operation: impl FnOnce() -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let _guard = self.catalog.lock().unwrap_or_else(PoisonError::into_inner);
        operation()
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn active_year(&self) -> SchoolYear {
        self.context().active_year()
    }

    pub fn student(&self, student_id: &StudentId) -> Result<Student, LedgerError> {
        self.context().student(student_id)
    }

    pub fn students(&self) -> Result<Vec<Student>, LedgerError> {
        let mut students = self.repository.students()?;
        students.sort_by(|left, right| left.registration_number.cmp(&right.registration_number));
        Ok(students)
    }

    // Tuition and classes.

    pub fn get_tuition(
        &self,
        level: &GradeLevel,
        school_year: SchoolYear,
    ) -> Result<Option<Amount>, LedgerError> {
        TuitionPolicy::new(self.context()).get_tuition(level, school_year)
    }

    pub fn set_tuition(
        &self,
        level: &GradeLevel,
        school_year: SchoolYear,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        self.with_catalog(|| {
            TuitionPolicy::new(self.context()).set_tuition(level, school_year, amount)
        })
    }

    pub fn create_or_update_class_offering(
        &self,
        draft: ClassOfferingDraft,
    ) -> Result<ClassOffering, LedgerError> {
        self.with_catalog(|| {
            TuitionPolicy::new(self.context()).create_or_update_class_offering(draft)
        })
    }

    pub fn class_offering(&self, id: &ClassOfferingId) -> Result<ClassOffering, LedgerError> {
        self.context().class_offering(id)
    }

    pub fn class_offerings(
        &self,
        school_year: SchoolYear,
    ) -> Result<Vec<ClassOffering>, LedgerError> {
        TuitionPolicy::new(self.context()).class_offerings(school_year)
    }

    // Discounts.

    pub fn resolve_or_create_discount_type(
        &self,
        name: &str,
        rule: Option<DiscountValue>,
    ) -> Result<DiscountTypeId, LedgerError> {
        self.with_catalog(|| {
            DiscountLedger::new(self.context()).resolve_or_create_discount_type(name, rule)
        })
    }

    pub fn set_discount_type_active(
        &self,
        id: &DiscountTypeId,
        active: bool,
    ) -> Result<DiscountType, LedgerError> {
        self.with_catalog(|| {
            DiscountLedger::new(self.context()).set_discount_type_active(id, active)
        })
    }

    pub fn discount_types(&self) -> Result<Vec<DiscountTypeView>, LedgerError> {
        DiscountLedger::new(self.context()).discount_types()
    }

    pub fn grant_discount(&self, grant: DiscountGrant) -> Result<StudentDiscount, LedgerError> {
        let student_id = grant.student_id.clone();
        self.with_student(&student_id, || DiscountLedger::new(self.context()).grant(grant))
    }

    fn discount_owner(&self, id: &StudentDiscountId) -> Result<StudentId, LedgerError> {
        self.repository
            .student_discount(id)?
            .map(|discount| discount.student_id)
            .ok_or_else(|| LedgerError::not_found("discount", id))
    }

    pub fn approve_discount(
        &self,
        id: &StudentDiscountId,
        approver: &UserId,
    ) -> Result<StudentDiscount, LedgerError> {
        let student_id = self.discount_owner(id)?;
        self.with_student(&student_id, || {
            DiscountLedger::new(self.context()).approve(id, approver)
        })
    }

    pub fn deactivate_discount(
        &self,
        id: &StudentDiscountId,
    ) -> Result<StudentDiscount, LedgerError> {
        let student_id = self.discount_owner(id)?;
        self.with_student(&student_id, || DiscountLedger::new(self.context()).deactivate(id))
    }

    pub fn active_approved_discount_total(
        &self,
        student_id: &StudentId,
        school_year: SchoolYear,
    ) -> Result<Amount, LedgerError> {
        DiscountLedger::new(self.context()).active_approved_total(student_id, school_year)
    }

    pub fn discounts_of(
        &self,
        student_id: &StudentId,
        school_year: SchoolYear,
    ) -> Result<Vec<ResolvedDiscount>, LedgerError> {
        self.context().student(student_id)?;
        DiscountLedger::new(self.context()).discounts_of(student_id, school_year)
    }

    pub fn grouped_discounts_by_type(
        &self,
        school_year: SchoolYear,
    ) -> Result<Vec<DiscountTypeGroup>, LedgerError> {
        DiscountLedger::new(self.context()).grouped_by_type(school_year)
    }

    // Payments.

    pub fn record_payment(&self, request: PaymentRequest) -> Result<Payment, LedgerError> {
        let student_id = request.student_id.clone();
        self.with_student(&student_id, || PaymentLedger::new(self.context()).record(request))
    }

    pub fn total_paid(
        &self,
        student_id: &StudentId,
        school_year: SchoolYear,
    ) -> Result<Amount, LedgerError> {
        PaymentLedger::new(self.context()).total_paid(student_id, school_year)
    }

    pub fn payment_history(
        &self,
        student_id: &StudentId,
        school_year: SchoolYear,
    ) -> Result<Vec<Payment>, LedgerError> {
        PaymentLedger::new(self.context()).history(student_id, school_year)
    }

    pub fn payment_receipt(&self, payment_id: &PaymentId) -> Result<PaymentReceipt, LedgerError> {
        PaymentLedger::new(self.context()).receipt(payment_id)
    }

    // Balances and reports.

    pub fn balance_of(
        &self,
        student_id: &StudentId,
        school_year: SchoolYear,
    ) -> Result<Balance, LedgerError> {
        let ctx = self.context();
        ctx.student(student_id)?;
        let ledger = StudentYearLedger::load(ctx.repository, student_id, school_year)?;
        Ok(ledger.balance(ctx.today()))
    }

    pub fn arrears_of(&self, student_id: &StudentId) -> Result<Vec<YearBalance>, LedgerError> {
        let ctx = self.context();
        ctx.student(student_id)?;
        reports::arrears_of(ctx.repository, student_id, ctx.active_year(), ctx.today())
    }

    pub fn student_statement(
        &self,
        student_id: &StudentId,
    ) -> Result<StudentStatement, LedgerError> {
        let ctx = self.context();
        let student = ctx.student(student_id)?;
        reports::student_statement(ctx.repository, student, ctx.active_year(), ctx.today())
    }

    pub fn year_statistics(&self, school_year: SchoolYear) -> Result<YearStatistics, LedgerError> {
        let ctx = self.context();
        reports::year_statistics(ctx.repository, school_year, ctx.today())
    }

    // Enrollment lifecycle.

    pub fn preregister_online(
        &self,
        request: OnlinePreregistration,
    ) -> Result<Student, LedgerError> {
        self.lifecycle().preregister_online(request)
    }

    pub fn register_onsite(
        &self,
        request: OnsiteRegistration,
    ) -> Result<EnrollmentOutcome, LedgerError> {
        self.lifecycle().register_onsite(request)
    }

    pub fn finalize(
        &self,
        student_id: &StudentId,
        request: Finalization,
    ) -> Result<EnrollmentOutcome, LedgerError> {
        self.with_student(student_id, || self.lifecycle().finalize(student_id, request))
    }

    pub fn reinscribe(
        &self,
        student_id: &StudentId,
        request: Reinscription,
    ) -> Result<ReinscriptionOutcome, LedgerError> {
        self.with_student(student_id, || self.lifecycle().reinscribe(student_id, request))
    }

    pub fn reassign_class(
        &self,
        student_id: &StudentId,
        school_year: SchoolYear,
        class_offering_id: &ClassOfferingId,
    ) -> Result<Enrollment, LedgerError> {
        self.with_student(student_id, || {
            self.lifecycle()
                .reassign_class(student_id, school_year, class_offering_id)
        })
    }

    pub fn state_of(&self, student_id: &StudentId) -> Result<EnrollmentState, LedgerError> {
        self.lifecycle().state_of(student_id)
    }

    pub fn current_enrollment(
        &self,
        student_id: &StudentId,
    ) -> Result<Option<Enrollment>, LedgerError> {
        self.lifecycle().current_enrollment(student_id)
    }

    /// Remove a student and everything recorded against them in one write.
    pub fn delete_student(&self, student_id: &StudentId) -> Result<Student, LedgerError> {
        let student = self.with_student(student_id, || {
            let student = self.context().student(student_id)?;
            self.repository
                .apply(LedgerWrite::DeleteStudent(student_id.clone()).into())?;
            Ok(student)
        })?;
        self.students.forget(student_id);

        info!(
            %student_id,
            registration_number = %student.registration_number,
            "student deleted with enrollments, discounts and payments"
        );
        Ok(student)
    }
}
