use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, NaiveDate, Utc};

use crate::config::LedgerConfig;

use super::calendar::{Clock, SchoolCalendar};
use super::domain::{
    ClassOffering, ClassOfferingId, DiscountTypeId, PaymentId, SchoolYear, Student,
    StudentDiscountId, StudentId,
};
use super::error::LedgerError;
use super::repository::LedgerRepository;

/// Per-service identifier counters.
#[derive(Debug)]
pub struct IdSequence {
    students: AtomicU64,
    registrations: AtomicU64,
    classes: AtomicU64,
    discount_types: AtomicU64,
    discounts: AtomicU64,
    payments: AtomicU64,
}

impl Default for IdSequence {
    fn default() -> Self {
        Self {
            students: AtomicU64::new(1),
            registrations: AtomicU64::new(1),
            classes: AtomicU64::new(1),
            discount_types: AtomicU64::new(1),
            discounts: AtomicU64::new(1),
            payments: AtomicU64::new(1),
        }
    }
}

impl IdSequence {
    pub fn next_student_id(&self) -> StudentId {
        let id = self.students.fetch_add(1, Ordering::Relaxed);
        StudentId(format!("stu-{id:06}"))
    }

    /// Registration numbers are prefixed with the school year the student joined in.
    pub fn next_registration_number(&self, school_year: SchoolYear) -> String {
        let id = self.registrations.fetch_add(1, Ordering::Relaxed);
        format!("{}-{id:05}", school_year.start_year())
    }

    pub fn next_class_offering_id(&self) -> ClassOfferingId {
        let id = self.classes.fetch_add(1, Ordering::Relaxed);
        ClassOfferingId(format!("cls-{id:04}"))
    }

    pub fn next_discount_type_id(&self) -> DiscountTypeId {
        let id = self.discount_types.fetch_add(1, Ordering::Relaxed);
        DiscountTypeId(format!("dty-{id:04}"))
    }

    pub fn next_discount_id(&self) -> StudentDiscountId {
        let id = self.discounts.fetch_add(1, Ordering::Relaxed);
        StudentDiscountId(format!("dsc-{id:06}"))
    }

    /// Payment id together with its global recording sequence.
    pub fn next_payment(&self) -> (PaymentId, u64) {
        let sequence = self.payments.fetch_add(1, Ordering::Relaxed);
        (PaymentId(format!("pay-{sequence:06}")), sequence)
    }
}

/// Everything a ledger component needs besides its own arguments.
pub struct LedgerContext<'a, R> {
    pub repository: &'a R,
    pub clock: &'a dyn Clock,
    pub config: &'a LedgerConfig,
    pub ids: &'a IdSequence,
}

impl<R> Clone for LedgerContext<'_, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for LedgerContext<'_, R> {}

impl<'a, R> LedgerContext<'a, R>
where
    R: LedgerRepository,
{
    pub fn new(
        repository: &'a R,
        clock: &'a dyn Clock,
        config: &'a LedgerConfig,
        ids: &'a IdSequence,
    ) -> Self {
        Self {
            repository,
            clock,
            config,
            ids,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn calendar(&self) -> SchoolCalendar {
        SchoolCalendar::new(self.config.cutover_month)
    }

    pub fn active_year(&self) -> SchoolYear {
        self.calendar().active_year(self.clock)
    }

    pub fn student(&self, id: &StudentId) -> Result<Student, LedgerError> {
        self.repository
            .student(id)?
            .ok_or_else(|| LedgerError::not_found("student", id))
    }

    pub fn class_offering(&self, id: &ClassOfferingId) -> Result<ClassOffering, LedgerError> {
        self.repository
            .class_offering(id)?
            .ok_or_else(|| LedgerError::not_found("class offering", id))
    }
}
