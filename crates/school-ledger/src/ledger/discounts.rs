use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::balance::StudentYearLedger;
use super::context::LedgerContext;
use super::domain::{
    Amount, DiscountStatus, DiscountType, DiscountTypeId, DiscountValue, SchoolYear,
    StudentDiscount, StudentDiscountId, StudentId, UserId,
};
use super::error::LedgerError;
use super::repository::{LedgerRepository, LedgerWrite};

/// Monetary value of a discount against `tuition`, rounded half away from zero.
pub fn derive_amount(value: DiscountValue, tuition: Amount) -> Amount {
    match value {
        DiscountValue::Amount(amount) => amount,
        DiscountValue::Percentage(percentage) => {
            let raw = Decimal::from(tuition.max(0)) * percentage / Decimal::ONE_HUNDRED;
            raw.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                .to_i64()
                .unwrap_or(tuition)
        }
    }
}

/// Share of `tuition` a discount represents, to two decimal places. Zero when nothing is due.
pub fn derive_percentage(value: DiscountValue, tuition: Amount) -> Decimal {
    match value {
        DiscountValue::Percentage(percentage) => percentage,
        DiscountValue::Amount(_) if tuition <= 0 => Decimal::ZERO,
        DiscountValue::Amount(amount) => (Decimal::from(amount) * Decimal::ONE_HUNDRED
            / Decimal::from(tuition))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
    }
}

/// Bounds a grant must respect against the tuition it reduces.
pub fn validate_value(value: DiscountValue, reference_tuition: Amount) -> Result<(), LedgerError> {
    match value {
        DiscountValue::Amount(amount) if amount < 0 => Err(LedgerError::validation(format!(
            "discount amount cannot be negative (got {amount})"
        ))),
        DiscountValue::Amount(amount) if amount > reference_tuition => {
            Err(LedgerError::validation(format!(
                "discount amount {amount} exceeds tuition {reference_tuition}"
            )))
        }
        DiscountValue::Percentage(percentage)
            if percentage < Decimal::ZERO || percentage > Decimal::ONE_HUNDRED =>
        {
            Err(LedgerError::validation(format!(
                "discount percentage must be between 0 and 100 (got {percentage})"
            )))
        }
        _ => Ok(()),
    }
}

pub fn counts_toward_balance(
    discount: &StudentDiscount,
    type_active: bool,
    today: NaiveDate,
) -> bool {
    discount.status == DiscountStatus::Approved && type_active && !discount.is_expired(today)
}

/// Sum of approved, unexpired discounts on active types, clamped to `tuition` so stacked
/// grants can never push the due below zero.
pub fn active_approved_total<'a>(
    discounts: impl IntoIterator<Item = (&'a StudentDiscount, bool)>,
    tuition: Amount,
    today: NaiveDate,
) -> Amount {
    let total: Amount = discounts
        .into_iter()
        .filter(|(discount, type_active)| counts_toward_balance(discount, *type_active, today))
        .map(|(discount, _)| derive_amount(discount.value, tuition).max(0))
        .fold(0, Amount::saturating_add);
    total.clamp(0, tuition.max(0))
}

/// A grant with its amount and percentage derived against the student's tuition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedDiscount {
    #[serde(flatten)]
    pub discount: StudentDiscount,
    pub discount_type_name: String,
    pub amount: Amount,
    pub percentage: Decimal,
    pub counts_toward_balance: bool,
}

impl ResolvedDiscount {
    pub fn resolve(
        discount: StudentDiscount,
        discount_type: Option<&DiscountType>,
        tuition: Amount,
        today: NaiveDate,
    ) -> Self {
        let type_active = discount_type.is_some_and(|kind| kind.active);
        Self {
            discount_type_name: discount_type
                .map(|kind| kind.name.clone())
                .unwrap_or_default(),
            amount: derive_amount(discount.value, tuition),
            percentage: derive_percentage(discount.value, tuition),
            counts_toward_balance: counts_toward_balance(&discount, type_active, today),
            discount,
        }
    }
}

/// Donor-facing aggregate of every grant made under one discount type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscountTypeGroup {
    pub discount_type: DiscountType,
    pub discounts: Vec<ResolvedDiscount>,
    pub total_amount: Amount,
    pub active_count: usize,
    pub pending_count: usize,
}

/// Group grants by type, largest approved total first.
pub fn group_by_discount_type(
    types: &[DiscountType],
    discounts: Vec<ResolvedDiscount>,
) -> Vec<DiscountTypeGroup> {
    let by_id: HashMap<&DiscountTypeId, &DiscountType> =
        types.iter().map(|kind| (&kind.id, kind)).collect();
    let mut groups: HashMap<DiscountTypeId, DiscountTypeGroup> = HashMap::new();

    for resolved in discounts {
        let type_id = resolved.discount.discount_type_id.clone();
        let Some(discount_type) = by_id.get(&type_id) else {
            warn!(
                discount_id = %resolved.discount.id,
                %type_id,
                "discount references unknown type"
            );
            continue;
        };

        let group = groups
            .entry(type_id)
            .or_insert_with(|| DiscountTypeGroup {
                discount_type: (*discount_type).clone(),
                discounts: Vec::new(),
                total_amount: 0,
                active_count: 0,
                pending_count: 0,
            });

        match resolved.discount.status {
            DiscountStatus::Approved => {
                group.total_amount = group.total_amount.saturating_add(resolved.amount)
            }
            DiscountStatus::Pending => group.pending_count += 1,
            DiscountStatus::Deactivated => {}
        }
        if resolved.counts_toward_balance {
            group.active_count += 1;
        }
        group.discounts.push(resolved);
    }

    let mut groups: Vec<DiscountTypeGroup> = groups.into_values().collect();
    groups.sort_by(|left, right| {
        right
            .total_amount
            .cmp(&left.total_amount)
            .then_with(|| left.discount_type.name.cmp(&right.discount_type.name))
    });
    groups
}

/// Discount type with both representations derived against a reference tuition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscountTypeView {
    #[serde(flatten)]
    pub discount_type: DiscountType,
    pub is_percentage: bool,
    pub percentage: Option<Decimal>,
    pub fixed_amount: Option<Amount>,
}

impl DiscountTypeView {
    pub fn project(discount_type: DiscountType, reference_tuition: Amount) -> Self {
        let (percentage, fixed_amount) = match discount_type.rule {
            Some(rule) => (
                Some(derive_percentage(rule, reference_tuition)),
                Some(derive_amount(rule, reference_tuition)),
            ),
            None => (None, None),
        };
        Self {
            is_percentage: discount_type.is_percentage(),
            percentage,
            fixed_amount,
            discount_type,
        }
    }
}

/// Grant request; exactly one of amount or percentage travels in `value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountGrant {
    pub student_id: StudentId,
    pub discount_type_id: DiscountTypeId,
    pub value: DiscountValue,
    pub reason: String,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    pub school_year: SchoolYear,
    pub requested_by: UserId,
}

/// Per-student reductions and the discount-type catalogue they draw from.
pub struct DiscountLedger<'a, R> {
    ctx: LedgerContext<'a, R>,
}

impl<'a, R> DiscountLedger<'a, R>
where
    R: LedgerRepository,
{
    pub fn new(ctx: LedgerContext<'a, R>) -> Self {
        Self { ctx }
    }

    fn discount_type(&self, id: &DiscountTypeId) -> Result<DiscountType, LedgerError> {
        self.ctx
            .repository
            .discount_type(id)?
            .ok_or_else(|| LedgerError::not_found("discount type", id))
    }

    fn student_discount(&self, id: &StudentDiscountId) -> Result<StudentDiscount, LedgerError> {
        self.ctx
            .repository
            .student_discount(id)?
            .ok_or_else(|| LedgerError::not_found("discount", id))
    }

    /// Find a type by name (trimmed, case-insensitive) or create it. Never called by `grant`.
    pub fn resolve_or_create_discount_type(
        &self,
        name: &str,
        rule: Option<DiscountValue>,
    ) -> Result<DiscountTypeId, LedgerError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LedgerError::validation("discount type name is required"));
        }

        let existing = self
            .ctx
            .repository
            .discount_types()?
            .into_iter()
            .find(|kind| kind.name.trim().to_lowercase() == name.to_lowercase());
        if let Some(existing) = existing {
            return Ok(existing.id);
        }

        if let Some(rule) = rule {
            validate_value(rule, Amount::MAX)?;
        }

        let discount_type = DiscountType {
            id: self.ctx.ids.next_discount_type_id(),
            name: name.to_string(),
            rule,
            active: true,
        };
        let id = discount_type.id.clone();
        self.ctx
            .repository
            .apply(LedgerWrite::SaveDiscountType(discount_type).into())?;

        info!(discount_type_id = %id, name, "discount type created");
        Ok(id)
    }

    pub fn set_discount_type_active(
        &self,
        id: &DiscountTypeId,
        active: bool,
    ) -> Result<DiscountType, LedgerError> {
        let mut discount_type = self.discount_type(id)?;
        if discount_type.active == active {
            return Ok(discount_type);
        }
        discount_type.active = active;
        self.ctx
            .repository
            .apply(LedgerWrite::SaveDiscountType(discount_type.clone()).into())?;

        info!(discount_type_id = %id, active, "discount type toggled");
        Ok(discount_type)
    }

    pub fn discount_types(&self) -> Result<Vec<DiscountTypeView>, LedgerError> {
        let mut types = self.ctx.repository.discount_types()?;
        types.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(types
            .into_iter()
            .map(|kind| DiscountTypeView::project(kind, self.ctx.config.reference_tuition))
            .collect())
    }

    /// Record a pending grant after checking it against the student's tuition for the year.
    pub fn grant(&self, request: DiscountGrant) -> Result<StudentDiscount, LedgerError> {
        self.ctx.student(&request.student_id)?;
        let discount_type = self.discount_type(&request.discount_type_id)?;
        if !discount_type.active {
            return Err(LedgerError::validation(format!(
                "discount type '{}' is inactive",
                discount_type.name
            )));
        }

        if request.reason.trim().is_empty() {
            return Err(LedgerError::validation("a reason is required for every discount"));
        }
        if let Some(end_date) = request.end_date {
            if end_date < request.start_date {
                return Err(LedgerError::validation(format!(
                    "discount ends on {end_date}, before it starts on {}",
                    request.start_date
                )));
            }
        }

        let ledger = StudentYearLedger::load(
            self.ctx.repository,
            &request.student_id,
            request.school_year,
        )?;
        let reference_tuition = ledger.tuition.unwrap_or(self.ctx.config.reference_tuition);
        validate_value(request.value, reference_tuition)?;

        let DiscountGrant {
            student_id,
            discount_type_id,
            value,
            reason,
            start_date,
            end_date,
            school_year,
            requested_by,
        } = request;

        let discount = StudentDiscount {
            id: self.ctx.ids.next_discount_id(),
            student_id,
            discount_type_id,
            school_year,
            value,
            reason: reason.trim().to_string(),
            start_date,
            end_date,
            status: DiscountStatus::Pending,
            requested_by,
            approved_by: None,
        };

        self.ctx
            .repository
            .apply(LedgerWrite::SaveStudentDiscount(discount.clone()).into())?;

        info!(
            discount_id = %discount.id,
            student_id = %discount.student_id,
            school_year = %discount.school_year,
            amount = derive_amount(discount.value, reference_tuition),
            "discount granted, awaiting approval"
        );
        Ok(discount)
    }

    pub fn approve(
        &self,
        id: &StudentDiscountId,
        approver: &UserId,
    ) -> Result<StudentDiscount, LedgerError> {
        let mut discount = self.student_discount(id)?;
        if discount.status != DiscountStatus::Pending {
            return Err(LedgerError::invalid_state(format!(
                "discount {id} is {}, only pending discounts can be approved",
                discount.status.label()
            )));
        }

        discount.status = DiscountStatus::Approved;
        discount.approved_by = Some(approver.clone());
        self.ctx
            .repository
            .apply(LedgerWrite::SaveStudentDiscount(discount.clone()).into())?;

        info!(discount_id = %id, approver = %approver, "discount approved");
        Ok(discount)
    }

    /// Idempotent: deactivating an already deactivated discount returns it unchanged.
    pub fn deactivate(&self, id: &StudentDiscountId) -> Result<StudentDiscount, LedgerError> {
        let mut discount = self.student_discount(id)?;
        if discount.status == DiscountStatus::Deactivated {
            return Ok(discount);
        }

        discount.status = DiscountStatus::Deactivated;
        self.ctx
            .repository
            .apply(LedgerWrite::SaveStudentDiscount(discount.clone()).into())?;

        info!(discount_id = %id, "discount deactivated");
        Ok(discount)
    }

    pub fn active_approved_total(
        &self,
        student_id: &StudentId,
        school_year: SchoolYear,
    ) -> Result<Amount, LedgerError> {
        let ledger = StudentYearLedger::load(self.ctx.repository, student_id, school_year)?;
        Ok(ledger.discount_total(self.ctx.today()))
    }

    pub fn discounts_of(
        &self,
        student_id: &StudentId,
        school_year: SchoolYear,
    ) -> Result<Vec<ResolvedDiscount>, LedgerError> {
        let ledger = StudentYearLedger::load(self.ctx.repository, student_id, school_year)?;
        Ok(ledger.resolved_discounts(self.ctx.today()))
    }

    pub fn grouped_by_type(
        &self,
        school_year: SchoolYear,
    ) -> Result<Vec<DiscountTypeGroup>, LedgerError> {
        let today = self.ctx.today();
        let mut students: Vec<StudentId> = self
            .ctx
            .repository
            .discounts_for_year(school_year)?
            .into_iter()
            .map(|discount| discount.student_id)
            .collect();
        students.sort();
        students.dedup();

        let mut resolved = Vec::new();
        for student_id in &students {
            let ledger = StudentYearLedger::load(self.ctx.repository, student_id, school_year)?;
            resolved.extend(ledger.resolved_discounts(today));
        }

        let types = self.ctx.repository.discount_types()?;
        Ok(group_by_discount_type(&types, resolved))
    }
}
