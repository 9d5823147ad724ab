//! The one place where due, discount, paid, and remaining figures are computed.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::discounts::{self, ResolvedDiscount};
use super::domain::{
    Amount, ClassOffering, DiscountType, Enrollment, Payment, SchoolYear, StudentDiscount,
    StudentId,
};
use super::error::LedgerError;
use super::repository::LedgerRepository;
use super::tuition;

/// Authoritative balance figures for one student and school year.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub total_due: Amount,
    pub total_discount: Amount,
    pub net_due: Amount,
    pub total_paid: Amount,
    pub remaining: Amount,
    /// False whenever nothing is due: a student without tuition is undetermined, not settled.
    pub is_settled: bool,
}

impl Balance {
    pub fn compute(due: Amount, discount_total: Amount, total_paid: Amount) -> Self {
        let total_due = due.max(0);
        let total_discount = discount_total.clamp(0, total_due);
        let net_due = total_due.saturating_sub(total_discount).max(0);
        let total_paid = total_paid.max(0);
        let remaining = net_due.saturating_sub(total_paid).max(0);

        Self {
            total_due,
            total_discount,
            net_due,
            total_paid,
            remaining,
            is_settled: remaining == 0 && net_due > 0,
        }
    }
}

/// Everything recorded for one student in one school year, loaded in a single pass.
#[derive(Debug, Clone)]
pub struct StudentYearLedger {
    pub student_id: StudentId,
    pub school_year: SchoolYear,
    pub enrollment: Option<Enrollment>,
    pub class_offering: Option<ClassOffering>,
    pub tuition: Option<Amount>,
    pub discounts: Vec<(StudentDiscount, Option<DiscountType>)>,
    pub payments: Vec<Payment>,
}

impl StudentYearLedger {
    pub fn load<R>(
        repository: &R,
        student_id: &StudentId,
        school_year: SchoolYear,
    ) -> Result<Self, LedgerError>
    where
        R: LedgerRepository,
    {
        let enrollment = repository.enrollment(student_id, school_year)?;

        let (class_offering, tuition) = match &enrollment {
            Some(enrollment) => {
                let class_offering = repository.class_offering(&enrollment.class_offering_id)?;
                let policy_tuition = match &class_offering {
                    Some(offering) => {
                        tuition::tuition_for(repository, &offering.level, offering.school_year)?
                    }
                    None => None,
                };
                (
                    class_offering,
                    Some(policy_tuition.unwrap_or(enrollment.tuition_due_snapshot)),
                )
            }
            None => (None, None),
        };

        let mut discounts = Vec::new();
        for discount in repository.student_discounts(student_id, school_year)? {
            let discount_type = repository.discount_type(&discount.discount_type_id)?;
            discounts.push((discount, discount_type));
        }

        let payments = repository.payments(student_id, school_year)?;

        Ok(Self {
            student_id: student_id.clone(),
            school_year,
            enrollment,
            class_offering,
            tuition,
            discounts,
            payments,
        })
    }

    /// Tuition due, zero while the student has no class for the year.
    pub fn tuition_due(&self) -> Amount {
        self.tuition.unwrap_or(0)
    }

    pub fn discount_total(&self, today: NaiveDate) -> Amount {
        discounts::active_approved_total(
            self.discounts
                .iter()
                .map(|(discount, discount_type)| (discount, type_is_active(discount_type))),
            self.tuition_due(),
            today,
        )
    }

    pub fn total_paid(&self) -> Amount {
        self.payments
            .iter()
            .map(|payment| payment.amount)
            .fold(0, Amount::saturating_add)
    }

    pub fn balance(&self, today: NaiveDate) -> Balance {
        Balance::compute(
            self.tuition_due(),
            self.discount_total(today),
            self.total_paid(),
        )
    }

    /// Balance as it stood right after the payment with `sequence` was recorded.
    pub fn balance_through(&self, sequence: u64, today: NaiveDate) -> Balance {
        let paid = self
            .payments
            .iter()
            .filter(|payment| payment.sequence <= sequence)
            .map(|payment| payment.amount)
            .fold(0, Amount::saturating_add);
        Balance::compute(self.tuition_due(), self.discount_total(today), paid)
    }

    pub fn resolved_discounts(&self, today: NaiveDate) -> Vec<ResolvedDiscount> {
        self.discounts
            .iter()
            .map(|(discount, discount_type)| {
                ResolvedDiscount::resolve(
                    discount.clone(),
                    discount_type.as_ref(),
                    self.tuition_due(),
                    today,
                )
            })
            .collect()
    }
}

fn type_is_active(discount_type: &Option<DiscountType>) -> bool {
    discount_type.as_ref().is_some_and(|kind| kind.active)
}
