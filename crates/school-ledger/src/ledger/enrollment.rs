//! Registration state machine: online pre-registration, finalization, onsite registration,
//! and year-over-year reinscription gated by arrears and promotion rules.
//!
//! A student's state is never stored. It is derived from their enrollments relative to the
//! active school year, so the "current" enrollment is always a lookup.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::balance::{Balance, StudentYearLedger};
use super::context::LedgerContext;
use super::discounts;
use super::domain::{
    Amount, ClassOffering, ClassOfferingId, Enrollment, EnrollmentState, GradeLevel,
    LevelLadder, ParentContact, ParentContactUpdate, Payment, PaymentKind, RegistrationMode,
    SchoolYear, Student, StudentId, StudentIdentity, UserId,
};
use super::error::LedgerError;
use super::payments::{prepare_first_payment, prepare_payment, PaymentInput};
use super::repository::{GradeSource, LedgerBatch, LedgerRepository, LedgerWrite};
use super::tuition::TuitionPolicy;

/// Derive the lifecycle state from a student's enrollments.
pub fn derive_state(enrollments: &[Enrollment], active_year: SchoolYear) -> EnrollmentState {
    match enrollments.iter().map(|enrollment| enrollment.school_year).max() {
        None => EnrollmentState::OnlinePreregistered,
        Some(latest) if latest > active_year => EnrollmentState::EnrolledNextYear,
        Some(latest) if latest == active_year => EnrollmentState::Finalized,
        Some(_) => EnrollmentState::ReinscriptionPending,
    }
}

/// Level for next year: promoted when admitted, repeated otherwise, capped at the top level.
pub fn resolve_target_level(
    ladder: &LevelLadder,
    previous_level: &GradeLevel,
    admitted: bool,
) -> Result<GradeLevel, LedgerError> {
    let previous = ladder.canonical(previous_level).ok_or_else(|| {
        LedgerError::validation(format!(
            "level {previous_level} is not part of the configured level ladder"
        ))
    })?;

    if !admitted {
        return Ok(previous);
    }
    ladder.next_level(&previous).ok_or_else(|| {
        LedgerError::validation(format!("no level follows {previous}"))
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlinePreregistration {
    pub student: StudentIdentity,
    #[serde(default)]
    pub parent: ParentContact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnsiteRegistration {
    pub student: StudentIdentity,
    #[serde(default)]
    pub parent: ParentContact,
    pub class_offering_id: ClassOfferingId,
    pub first_payment: PaymentInput,
    pub recorded_by: UserId,
}

/// Secretarial completion of an online pre-registration. Both fields are required; they are
/// optional here so a missing one is reported as a validation error rather than a parse error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finalization {
    #[serde(default)]
    pub class_offering_id: Option<ClassOfferingId>,
    #[serde(default)]
    pub first_payment: Option<PaymentInput>,
    pub recorded_by: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reinscription {
    /// Defaults to the year after the student's latest enrollment.
    #[serde(default)]
    pub school_year: Option<SchoolYear>,
    pub class_offering_id: ClassOfferingId,
    pub first_payment: PaymentInput,
    /// Settlement of the previous year's remaining balance, required when one exists.
    #[serde(default)]
    pub reliquat_payment: Option<PaymentInput>,
    /// Overrides the grading subsystem's figure for the previous year.
    #[serde(default)]
    pub annual_average: Option<f64>,
    #[serde(default)]
    pub parent: Option<ParentContactUpdate>,
    pub recorded_by: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrollmentOutcome {
    pub student: Student,
    pub enrollment: Enrollment,
    pub class_offering: ClassOffering,
    pub first_payment: Payment,
    pub balance: Balance,
    pub state: EnrollmentState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReinscriptionOutcome {
    #[serde(flatten)]
    pub enrollment: EnrollmentOutcome,
    pub previous_year: SchoolYear,
    pub previous_level: GradeLevel,
    pub target_level: GradeLevel,
    pub annual_average: f64,
    pub admitted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reliquat_settlement: Option<Payment>,
    pub previous_year_balance: Balance,
}

/// Orchestrates registration transitions. Callers serialize writes per student.
pub struct EnrollmentLifecycle<'a, R, G> {
    ctx: LedgerContext<'a, R>,
    grades: &'a G,
}

impl<'a, R, G> EnrollmentLifecycle<'a, R, G>
where
    R: LedgerRepository,
    G: GradeSource,
{
    pub fn new(ctx: LedgerContext<'a, R>, grades: &'a G) -> Self {
        Self { ctx, grades }
    }

    fn tuition(&self) -> TuitionPolicy<'a, R> {
        TuitionPolicy::new(self.ctx)
    }

    pub fn state_of(&self, student_id: &StudentId) -> Result<EnrollmentState, LedgerError> {
        self.ctx.student(student_id)?;
        let enrollments = self.ctx.repository.enrollments_of(student_id)?;
        Ok(derive_state(&enrollments, self.ctx.active_year()))
    }

    pub fn current_enrollment(
        &self,
        student_id: &StudentId,
    ) -> Result<Option<Enrollment>, LedgerError> {
        self.ctx.student(student_id)?;
        Ok(self
            .ctx
            .repository
            .enrollment(student_id, self.ctx.active_year())?)
    }

    fn new_student(
        &self,
        identity: StudentIdentity,
        parent: ParentContact,
        registration_mode: RegistrationMode,
    ) -> Result<Student, LedgerError> {
        if identity.first_name.trim().is_empty() || identity.last_name.trim().is_empty() {
            return Err(LedgerError::validation(
                "student first and last names are required",
            ));
        }

        let active_year = self.ctx.active_year();
        Ok(Student {
            id: self.ctx.ids.next_student_id(),
            registration_number: self.ctx.ids.next_registration_number(active_year),
            identity,
            registration_mode,
            parent,
            registered_on: self.ctx.today(),
        })
    }

    /// Class plus the first installment, checked and built but not written.
    fn prepare_enrollment(
        &self,
        student_id: &StudentId,
        class: &ClassOffering,
        first_payment: Option<PaymentInput>,
        recorded_by: &UserId,
    ) -> Result<(Enrollment, Payment), LedgerError> {
        let tuition = self.tuition().tuition_of(class)?;
        let discount_total = self.approved_discounts_before_enrollment(
            student_id,
            class.school_year,
            tuition,
        )?;
        let payment = prepare_first_payment(
            &self.ctx,
            student_id,
            class.school_year,
            tuition,
            discount_total,
            first_payment,
            recorded_by,
        )?;

        let enrollment = Enrollment {
            student_id: student_id.clone(),
            class_offering_id: class.id.clone(),
            school_year: class.school_year,
            tuition_due_snapshot: tuition,
            enrolled_on: self.ctx.today(),
        };
        Ok((enrollment, payment))
    }

    fn approved_discounts_before_enrollment(
        &self,
        student_id: &StudentId,
        school_year: SchoolYear,
        tuition: Amount,
    ) -> Result<Amount, LedgerError> {
        let mut entries = Vec::new();
        for discount in self.ctx.repository.student_discounts(student_id, school_year)? {
            let active = self
                .ctx
                .repository
                .discount_type(&discount.discount_type_id)?
                .is_some_and(|kind| kind.active);
            entries.push((discount, active));
        }
        Ok(discounts::active_approved_total(
            entries.iter().map(|(discount, active)| (discount, *active)),
            tuition,
            self.ctx.today(),
        ))
    }

    fn outcome(
        &self,
        student: Student,
        enrollment: Enrollment,
        class_offering: ClassOffering,
        first_payment: Payment,
    ) -> Result<EnrollmentOutcome, LedgerError> {
        let ledger =
            StudentYearLedger::load(self.ctx.repository, &student.id, enrollment.school_year)?;
        let enrollments = self.ctx.repository.enrollments_of(&student.id)?;
        Ok(EnrollmentOutcome {
            balance: ledger.balance(self.ctx.today()),
            state: derive_state(&enrollments, self.ctx.active_year()),
            student,
            enrollment,
            class_offering,
            first_payment,
        })
    }

    pub fn preregister_online(
        &self,
        request: OnlinePreregistration,
    ) -> Result<Student, LedgerError> {
        let student = self.new_student(request.student, request.parent, RegistrationMode::Online)?;
        self.ctx
            .repository
            .apply(LedgerWrite::SaveStudent(student.clone()).into())?;

        info!(
            student_id = %student.id,
            registration_number = %student.registration_number,
            "online pre-registration received"
        );
        Ok(student)
    }

    /// Walk-in registration: the student is created already enrolled for the active year.
    pub fn register_onsite(
        &self,
        request: OnsiteRegistration,
    ) -> Result<EnrollmentOutcome, LedgerError> {
        let OnsiteRegistration {
            student,
            parent,
            class_offering_id,
            first_payment,
            recorded_by,
        } = request;

        let class = self.ctx.class_offering(&class_offering_id)?;
        let active_year = self.ctx.active_year();
        if class.school_year != active_year {
            return Err(LedgerError::validation(format!(
                "onsite registration is for {active_year}; class {} belongs to {}",
                class.name, class.school_year
            )));
        }

        let student = self.new_student(student, parent, RegistrationMode::Onsite)?;
        let (enrollment, payment) =
            self.prepare_enrollment(&student.id, &class, Some(first_payment), &recorded_by)?;

        self.ctx.repository.apply(
            LedgerBatch::new()
                .with(LedgerWrite::SaveStudent(student.clone()))
                .with(LedgerWrite::InsertEnrollment(enrollment.clone()))
                .with(LedgerWrite::AppendPayment(payment.clone())),
        )?;

        info!(
            student_id = %student.id,
            class_offering_id = %class.id,
            school_year = %enrollment.school_year,
            tuition = enrollment.tuition_due_snapshot,
            first_payment = payment.amount,
            "onsite registration completed"
        );
        self.outcome(student, enrollment, class, payment)
    }

    pub fn finalize(
        &self,
        student_id: &StudentId,
        request: Finalization,
    ) -> Result<EnrollmentOutcome, LedgerError> {
        let student = self.ctx.student(student_id)?;
        let enrollments = self.ctx.repository.enrollments_of(student_id)?;
        let active_year = self.ctx.active_year();
        let state = derive_state(&enrollments, active_year);
        if state != EnrollmentState::OnlinePreregistered {
            return Err(LedgerError::invalid_state(format!(
                "student {student_id} is {}, only online pre-registrations can be finalized",
                state.label()
            )));
        }

        let class_offering_id = request.class_offering_id.ok_or_else(|| {
            LedgerError::validation("a class must be assigned to finalize the registration")
        })?;
        if request.first_payment.is_none() {
            return Err(LedgerError::validation(
                "a first payment is required to finalize the registration",
            ));
        }

        let class = self.ctx.class_offering(&class_offering_id)?;
        if class.school_year < active_year {
            return Err(LedgerError::validation(format!(
                "class {} belongs to past school year {}",
                class.name, class.school_year
            )));
        }
        if class.school_year > active_year.next() {
            return Err(LedgerError::validation(format!(
                "cannot finalize into {} ({}) while {active_year} is the active school year",
                class.name, class.school_year
            )));
        }

        let (enrollment, payment) = self.prepare_enrollment(
            student_id,
            &class,
            request.first_payment,
            &request.recorded_by,
        )?;

        self.ctx.repository.apply(
            LedgerBatch::new()
                .with(LedgerWrite::InsertEnrollment(enrollment.clone()))
                .with(LedgerWrite::AppendPayment(payment.clone())),
        )?;

        info!(
            %student_id,
            class_offering_id = %class.id,
            school_year = %enrollment.school_year,
            first_payment = payment.amount,
            "pre-registration finalized"
        );
        self.outcome(student, enrollment, class, payment)
    }

    /// Re-enroll a student for a new school year.
    ///
    /// Fails with [`LedgerError::BlockedByArrears`] when the previous year still owes money and
    /// the supplied settlement does not cover it; nothing is written in that case.
    pub fn reinscribe(
        &self,
        student_id: &StudentId,
        request: Reinscription,
    ) -> Result<ReinscriptionOutcome, LedgerError> {
        let mut student = self.ctx.student(student_id)?;
        let enrollments = self.ctx.repository.enrollments_of(student_id)?;
        let latest_year = enrollments
            .iter()
            .map(|enrollment| enrollment.school_year)
            .max()
            .ok_or_else(|| {
                LedgerError::invalid_state(format!(
                    "student {student_id} has never been enrolled; finalize the pre-registration instead"
                ))
            })?;

        let active_year = self.ctx.active_year();
        let target_year = request.school_year.unwrap_or_else(|| latest_year.next());
        if target_year > active_year.next() {
            return Err(LedgerError::validation(format!(
                "cannot reinscribe for {target_year} while {active_year} is the active school year"
            )));
        }
        if enrollments
            .iter()
            .any(|enrollment| enrollment.school_year == target_year)
        {
            return Err(LedgerError::invalid_state(format!(
                "student {student_id} is already enrolled for {target_year}"
            )));
        }

        let previous = enrollments
            .iter()
            .filter(|enrollment| enrollment.school_year < target_year)
            .max_by_key(|enrollment| enrollment.school_year)
            .ok_or_else(|| {
                LedgerError::invalid_state(format!(
                    "student {student_id} has no enrollment before {target_year}"
                ))
            })?;

        let today = self.ctx.today();
        let previous_ledger =
            StudentYearLedger::load(self.ctx.repository, student_id, previous.school_year)?;
        let reliquat = previous_ledger.balance(today).remaining;
        let supplied = request
            .reliquat_payment
            .map(|payment| payment.amount)
            .unwrap_or(0);

        if reliquat > 0 && supplied < reliquat {
            warn!(
                %student_id,
                previous_year = %previous.school_year,
                reliquat,
                supplied,
                "reinscription blocked by arrears"
            );
            return Err(LedgerError::BlockedByArrears {
                school_year: previous.school_year,
                reliquat,
                supplied,
            });
        }

        let settlement = match request.reliquat_payment {
            Some(input) if reliquat == 0 && input.amount == 0 => None,
            Some(input) if reliquat == 0 => {
                return Err(LedgerError::validation(format!(
                    "{} is fully paid; a settlement of {} would overpay it",
                    previous.school_year, input.amount
                )))
            }
            Some(input) => Some(prepare_payment(
                &self.ctx,
                &previous_ledger,
                input,
                PaymentKind::ArrearsSettlement,
                &request.recorded_by,
            )?),
            None => None,
        };

        let previous_class = match previous_ledger.class_offering.clone() {
            Some(class) => class,
            None => self.ctx.class_offering(&previous.class_offering_id)?,
        };

        let annual_average = match request.annual_average {
            Some(average) => average,
            None => self
                .grades
                .annual_average(student_id, previous.school_year)?
                .map(|average| average.average)
                .ok_or_else(|| {
                    LedgerError::validation(format!(
                        "no annual average recorded for {student_id} in {}",
                        previous.school_year
                    ))
                })?,
        };
        if !annual_average.is_finite() || annual_average < 0.0 {
            return Err(LedgerError::validation(format!(
                "annual average {annual_average} is not a valid grade"
            )));
        }
        let admitted = annual_average >= self.ctx.config.admission_threshold;
        let target_level =
            resolve_target_level(&self.ctx.config.levels, &previous_class.level, admitted)?;

        let class = self.ctx.class_offering(&request.class_offering_id)?;
        if class.school_year != target_year {
            return Err(LedgerError::validation(format!(
                "class {} belongs to {}, reinscription is for {target_year}",
                class.name, class.school_year
            )));
        }
        if class.level != target_level {
            return Err(LedgerError::validation(format!(
                "class {} is level {}, but the student must join {target_level} (average {annual_average})",
                class.name, class.level
            )));
        }

        let (enrollment, first_payment) = self.prepare_enrollment(
            student_id,
            &class,
            Some(request.first_payment),
            &request.recorded_by,
        )?;

        let mut batch = LedgerBatch::new();
        if let Some(settlement) = &settlement {
            batch.push(LedgerWrite::AppendPayment(settlement.clone()));
        }
        if let Some(update) = request.parent {
            student.parent.amend(update);
            batch.push(LedgerWrite::SaveStudent(student.clone()));
        }
        batch.push(LedgerWrite::InsertEnrollment(enrollment.clone()));
        batch.push(LedgerWrite::AppendPayment(first_payment.clone()));
        self.ctx.repository.apply(batch)?;

        info!(
            %student_id,
            previous_year = %previous.school_year,
            school_year = %target_year,
            previous_level = %previous_class.level,
            %target_level,
            admitted,
            reliquat_settled = settlement.as_ref().map(|payment| payment.amount).unwrap_or(0),
            first_payment = first_payment.amount,
            "reinscription completed"
        );

        let previous_year_balance =
            StudentYearLedger::load(self.ctx.repository, student_id, previous.school_year)?
                .balance(today);

        Ok(ReinscriptionOutcome {
            enrollment: self.outcome(student, enrollment, class, first_payment)?,
            previous_year: previous.school_year,
            previous_level: previous_class.level,
            target_level,
            annual_average,
            admitted,
            reliquat_settlement: settlement,
            previous_year_balance,
        })
    }

    /// Move an enrollment to another class of the same year. Once money has been taken the
    /// new class must be of the same level, so the tuition due cannot change under a payment.
    pub fn reassign_class(
        &self,
        student_id: &StudentId,
        school_year: SchoolYear,
        class_offering_id: &ClassOfferingId,
    ) -> Result<Enrollment, LedgerError> {
        self.ctx.student(student_id)?;
        let current = self
            .ctx
            .repository
            .enrollment(student_id, school_year)?
            .ok_or_else(|| {
                LedgerError::not_found("enrollment", format!("{student_id}/{school_year}"))
            })?;
        let current_class = self.ctx.class_offering(&current.class_offering_id)?;
        let class = self.ctx.class_offering(class_offering_id)?;

        if class.school_year != school_year {
            return Err(LedgerError::validation(format!(
                "class {} belongs to {}, not {school_year}",
                class.name, class.school_year
            )));
        }
        let has_payments = !self
            .ctx
            .repository
            .payments(student_id, school_year)?
            .is_empty();
        if has_payments && class.level != current_class.level {
            return Err(LedgerError::validation(format!(
                "payments exist for {school_year}; the student can only move between {} classes",
                current_class.level
            )));
        }

        let enrollment = Enrollment {
            class_offering_id: class.id.clone(),
            tuition_due_snapshot: self.tuition().tuition_of(&class)?,
            ..current
        };
        self.ctx
            .repository
            .apply(LedgerWrite::ReassignEnrollment(enrollment.clone()).into())?;

        info!(
            %student_id,
            %school_year,
            from = %current_class.id,
            to = %class.id,
            "class reassigned"
        );
        Ok(enrollment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn enrollment(year: i32) -> Enrollment {
        Enrollment {
            student_id: StudentId::new("stu-1"),
            class_offering_id: ClassOfferingId::new("cls-1"),
            school_year: SchoolYear::starting(year),
            tuition_due_snapshot: 150_000,
            enrolled_on: NaiveDate::from_ymd_opt(year, 9, 2).expect("valid date"),
        }
    }

    #[test]
    fn state_is_derived_from_enrollment_years() {
        let active = SchoolYear::starting(2024);
        assert_eq!(derive_state(&[], active), EnrollmentState::OnlinePreregistered);
        assert_eq!(
            derive_state(&[enrollment(2023), enrollment(2024)], active),
            EnrollmentState::Finalized
        );
        assert_eq!(
            derive_state(&[enrollment(2024), enrollment(2025)], active),
            EnrollmentState::EnrolledNextYear
        );
        assert_eq!(
            derive_state(&[enrollment(2023)], active),
            EnrollmentState::ReinscriptionPending
        );
    }

    #[test]
    fn admitted_students_move_up_one_level() {
        let ladder = LevelLadder::standard();
        let level = resolve_target_level(&ladder, &GradeLevel::new("5ème"), true).expect("known");
        assert_eq!(level, GradeLevel::new("4ème"));
    }

    #[test]
    fn failing_students_repeat_their_level() {
        let ladder = LevelLadder::standard();
        let level = resolve_target_level(&ladder, &GradeLevel::new("5ème"), false).expect("known");
        assert_eq!(level, GradeLevel::new("5ème"));
    }

    #[test]
    fn top_level_is_never_exceeded() {
        let ladder = LevelLadder::standard();
        let level =
            resolve_target_level(&ladder, &GradeLevel::new("Terminale"), true).expect("known");
        assert_eq!(level, GradeLevel::new("Terminale"));
    }

    #[test]
    fn unknown_level_is_rejected() {
        let ladder = LevelLadder::standard();
        assert!(matches!(
            resolve_target_level(&ladder, &GradeLevel::new("Master 2"), true),
            Err(LedgerError::Validation(_))
        ));
    }
}
