use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::balance::{Balance, StudentYearLedger};
use super::context::LedgerContext;
use super::domain::{
    Amount, Payment, PaymentId, PaymentKind, PaymentMethod, SchoolYear, StudentId, UserId,
};
use super::error::LedgerError;
use super::repository::{LedgerRepository, LedgerWrite};

/// Amount and method of a payment taken as part of a larger transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInput {
    pub amount: Amount,
    pub method: PaymentMethod,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub student_id: StudentId,
    pub school_year: SchoolYear,
    pub amount: Amount,
    pub method: PaymentMethod,
    pub recorded_by: UserId,
}

/// Payment plus the balance right after it, for receipt rendering. Never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentReceipt {
    pub payment: Payment,
    pub student_name: String,
    pub registration_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    pub balance: Balance,
}

/// Check a payment against the remaining balance and build it, without writing anything.
pub(crate) fn prepare_payment<R>(
    ctx: &LedgerContext<'_, R>,
    ledger: &StudentYearLedger,
    input: PaymentInput,
    kind: PaymentKind,
    recorded_by: &UserId,
) -> Result<Payment, LedgerError>
where
    R: LedgerRepository,
{
    if input.amount <= 0 {
        return Err(LedgerError::validation(format!(
            "payment amount must be positive (got {})",
            input.amount
        )));
    }
    if ledger.enrollment.is_none() {
        return Err(LedgerError::validation(format!(
            "student {} has no enrollment for {}",
            ledger.student_id, ledger.school_year
        )));
    }

    let remaining = ledger.balance(ctx.today()).remaining;
    if input.amount > remaining {
        warn!(
            student_id = %ledger.student_id,
            school_year = %ledger.school_year,
            remaining,
            attempted = input.amount,
            "payment refused: exceeds remaining balance"
        );
        return Err(LedgerError::validation(format!(
            "payment exceeds balance for {}: remaining {remaining}, attempted {}",
            ledger.school_year, input.amount
        )));
    }

    Ok(new_payment(
        ctx,
        ledger.student_id.clone(),
        ledger.school_year,
        input,
        kind,
        recorded_by,
    ))
}

/// First installment of a new enrollment: `0 < amount <= tuition`, and never above what is
/// left once already-approved discounts for that year are applied.
pub(crate) fn prepare_first_payment<R>(
    ctx: &LedgerContext<'_, R>,
    student_id: &StudentId,
    school_year: SchoolYear,
    tuition: Amount,
    discount_total: Amount,
    input: Option<PaymentInput>,
    recorded_by: &UserId,
) -> Result<Payment, LedgerError>
where
    R: LedgerRepository,
{
    let input = input.ok_or_else(|| {
        LedgerError::validation("a first payment is required to confirm the enrollment")
    })?;
    if input.amount <= 0 {
        return Err(LedgerError::validation(format!(
            "first payment must be positive (got {})",
            input.amount
        )));
    }
    if input.amount > tuition {
        return Err(LedgerError::validation(format!(
            "first payment {} exceeds tuition due {tuition}",
            input.amount
        )));
    }

    let remaining = Balance::compute(tuition, discount_total, 0).remaining;
    if input.amount > remaining {
        return Err(LedgerError::validation(format!(
            "first payment exceeds balance after discounts: remaining {remaining}, attempted {}",
            input.amount
        )));
    }

    Ok(new_payment(
        ctx,
        student_id.clone(),
        school_year,
        input,
        PaymentKind::FirstInstallment,
        recorded_by,
    ))
}

fn new_payment<R>(
    ctx: &LedgerContext<'_, R>,
    student_id: StudentId,
    school_year: SchoolYear,
    input: PaymentInput,
    kind: PaymentKind,
    recorded_by: &UserId,
) -> Payment
where
    R: LedgerRepository,
{
    let (id, sequence) = ctx.ids.next_payment();
    Payment {
        id,
        sequence,
        student_id,
        school_year,
        amount: input.amount,
        method: input.method,
        kind,
        recorded_at: ctx.now(),
        recorded_by: recorded_by.clone(),
    }
}

/// Append-only record of money received. Callers serialize writes per student.
pub struct PaymentLedger<'a, R> {
    ctx: LedgerContext<'a, R>,
}

impl<'a, R> PaymentLedger<'a, R>
where
    R: LedgerRepository,
{
    pub fn new(ctx: LedgerContext<'a, R>) -> Self {
        Self { ctx }
    }

    pub fn record(&self, request: PaymentRequest) -> Result<Payment, LedgerError> {
        self.ctx.student(&request.student_id)?;
        let ledger = StudentYearLedger::load(
            self.ctx.repository,
            &request.student_id,
            request.school_year,
        )?;

        let payment = prepare_payment(
            &self.ctx,
            &ledger,
            PaymentInput {
                amount: request.amount,
                method: request.method,
            },
            PaymentKind::Installment,
            &request.recorded_by,
        )?;

        self.ctx
            .repository
            .apply(LedgerWrite::AppendPayment(payment.clone()).into())?;

        info!(
            payment_id = %payment.id,
            student_id = %payment.student_id,
            school_year = %payment.school_year,
            amount = payment.amount,
            method = payment.method.label(),
            "payment recorded"
        );
        Ok(payment)
    }

    pub fn total_paid(
        &self,
        student_id: &StudentId,
        school_year: SchoolYear,
    ) -> Result<Amount, LedgerError> {
        Ok(self
            .ctx
            .repository
            .payments(student_id, school_year)?
            .iter()
            .map(|payment| payment.amount)
            .fold(0, Amount::saturating_add))
    }

    pub fn history(
        &self,
        student_id: &StudentId,
        school_year: SchoolYear,
    ) -> Result<Vec<Payment>, LedgerError> {
        self.ctx.student(student_id)?;
        Ok(self.ctx.repository.payments(student_id, school_year)?)
    }

    pub fn receipt(&self, payment_id: &PaymentId) -> Result<PaymentReceipt, LedgerError> {
        let payment = self
            .ctx
            .repository
            .payment(payment_id)?
            .ok_or_else(|| LedgerError::not_found("payment", payment_id))?;
        let student = self.ctx.student(&payment.student_id)?;
        let ledger = StudentYearLedger::load(
            self.ctx.repository,
            &payment.student_id,
            payment.school_year,
        )?;

        Ok(PaymentReceipt {
            balance: ledger.balance_through(payment.sequence, self.ctx.today()),
            student_name: student.full_name(),
            registration_number: student.registration_number,
            class_name: ledger.class_offering.map(|offering| offering.name),
            payment,
        })
    }
}
