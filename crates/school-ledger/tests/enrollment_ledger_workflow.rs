//! Integration scenarios for the tuition ledger and the enrollment lifecycle.
//!
//! Scenarios drive the public service facade across a school-year rollover with a manual clock,
//! so balances, arrears, and promotion are checked the way the back office experiences them.

mod common {
    use std::sync::Arc;

    use chrono::NaiveDate;

    use school_ledger::config::LedgerConfig;
    use school_ledger::ledger::domain::Amount;
    use school_ledger::ledger::{
        ClassOffering, ClassOfferingDraft, Clock, EnrollmentOutcome, GradeLevel, ManualClock,
        MemoryGradeBook, MemoryLedgerStore, OnsiteRegistration, ParentContact, PaymentInput,
        PaymentMethod, SchoolLedgerService, SchoolYear, StudentIdentity, UserId,
    };

    pub(super) type Service = SchoolLedgerService<MemoryLedgerStore, MemoryGradeBook>;

    pub(super) struct Office {
        pub service: Service,
        pub grades: Arc<MemoryGradeBook>,
        pub clock: Arc<ManualClock>,
    }

    pub(super) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
    }

    pub(super) fn year(start: i32) -> SchoolYear {
        SchoolYear::starting(start)
    }

    pub(super) fn secretary() -> UserId {
        UserId::new("secretary-2")
    }

    pub(super) fn cash(amount: Amount) -> PaymentInput {
        PaymentInput {
            amount,
            method: PaymentMethod::Cash,
        }
    }

    /// Back office opened during the 2024-2025 school year.
    pub(super) fn office() -> Office {
        let grades = Arc::new(MemoryGradeBook::new());
        let clock = Arc::new(ManualClock::on(date(2024, 10, 1)));
        let service = SchoolLedgerService::with_clock(
            Arc::new(MemoryLedgerStore::new()),
            grades.clone(),
            LedgerConfig::default(),
            clock.clone() as Arc<dyn Clock>,
        );

        Office {
            service,
            grades,
            clock,
        }
    }

    pub(super) fn open_class(
        service: &Service,
        name: &str,
        level: &str,
        start: i32,
        tuition: Amount,
    ) -> ClassOffering {
        service
            .create_or_update_class_offering(ClassOfferingDraft {
                id: None,
                name: name.to_string(),
                level: GradeLevel::new(level),
                school_year: year(start),
                tuition_amount: tuition,
                principal_teacher: Some("M. Bamba".to_string()),
            })
            .expect("class offering saved")
    }

    pub(super) fn register(
        service: &Service,
        class: &ClassOffering,
        first_name: &str,
        first_payment: Amount,
    ) -> EnrollmentOutcome {
        service
            .register_onsite(OnsiteRegistration {
                student: StudentIdentity {
                    first_name: first_name.to_string(),
                    last_name: "Traoré".to_string(),
                    birth_date: Some(date(2011, 6, 9)),
                    birth_place: Some("Bouaké".to_string()),
                },
                parent: ParentContact {
                    mother_name: Some("Mariam Traoré".to_string()),
                    phone: Some("+225 05 11 22 33".to_string()),
                    ..ParentContact::default()
                },
                class_offering_id: class.id.clone(),
                first_payment: cash(first_payment),
                recorded_by: secretary(),
            })
            .expect("onsite registration succeeds")
    }

    /// Registers a 5ème student during 2023-2024 and leaves the clock in 2024-2025.
    pub(super) fn enrolled_last_year(
        office: &Office,
        first_name: &str,
        paid: Amount,
    ) -> EnrollmentOutcome {
        office.clock.set(date(2023, 9, 20));
        let class = office
            .service
            .class_offerings(year(2023))
            .expect("classes")
            .into_iter()
            .find(|class| class.name == "5ème A")
            .unwrap_or_else(|| open_class(&office.service, "5ème A", "5ème", 2023, 150_000));
        let outcome = register(&office.service, &class, first_name, paid);
        office.clock.set(date(2024, 9, 10));
        outcome
    }
}

use common::*;
use school_ledger::ledger::domain::Amount;
use school_ledger::ledger::{
    AnnualAverage, ClassOffering, DiscountGrant, DiscountValue, EnrollmentState, GradeLevel,
    LedgerError, PaymentKind, PaymentMethod, PaymentRequest, Reinscription, StudentId, UserId,
};

fn payment(student_id: &StudentId, start: i32, amount: Amount) -> PaymentRequest {
    PaymentRequest {
        student_id: student_id.clone(),
        school_year: year(start),
        amount,
        method: PaymentMethod::MobileMoney,
        recorded_by: secretary(),
    }
}

fn reinscription(class: &ClassOffering, reliquat: Option<Amount>) -> Reinscription {
    Reinscription {
        school_year: None,
        class_offering_id: class.id.clone(),
        first_payment: cash(40_000),
        reliquat_payment: reliquat.map(cash),
        annual_average: None,
        parent: None,
        recorded_by: secretary(),
    }
}

fn record_average(office: &Office, student_id: &StudentId, average: f64) {
    office
        .grades
        .record(AnnualAverage {
            student_id: student_id.clone(),
            school_year: year(2023),
            average,
            rank: Some(4),
            class_size: Some(38),
        })
        .expect("average recorded");
}

#[test]
fn discounted_student_pays_in_instalments() {
    let office = office();
    let service = &office.service;
    let class = open_class(service, "6ème B", "6ème", 2024, 150_000);
    let outcome = register(service, &class, "Ibrahim", 50_000);
    let student_id = &outcome.student.id;
    assert_eq!(outcome.state, EnrollmentState::Finalized);

    let type_id = service
        .resolve_or_create_discount_type("Sibling reduction", None)
        .expect("discount type");
    let pending = service
        .grant_discount(DiscountGrant {
            student_id: student_id.clone(),
            discount_type_id: type_id,
            value: DiscountValue::Amount(30_000),
            reason: "Two siblings already enrolled".to_string(),
            start_date: date(2024, 10, 1),
            end_date: None,
            school_year: year(2024),
            requested_by: secretary(),
        })
        .expect("grant recorded");
    service
        .approve_discount(&pending.id, &UserId::new("principal"))
        .expect("approval");

    service
        .record_payment(payment(student_id, 2024, 40_000))
        .expect("second instalment");

    let balance = service.balance_of(student_id, year(2024)).expect("balance");
    assert_eq!(balance.total_due, 150_000);
    assert_eq!(balance.total_discount, 30_000);
    assert_eq!(balance.total_paid, 90_000);
    assert_eq!(balance.remaining, 30_000);
    assert!(!balance.is_settled);

    let history = service
        .payment_history(student_id, year(2024))
        .expect("history");
    let kinds: Vec<_> = history.iter().map(|payment| payment.kind).collect();
    assert_eq!(
        kinds,
        vec![PaymentKind::FirstInstallment, PaymentKind::Installment]
    );
}

#[test]
fn overpayment_leaves_the_ledger_untouched() {
    let office = office();
    let service = &office.service;
    let class = open_class(service, "6ème B", "6ème", 2024, 150_000);
    let outcome = register(service, &class, "Fatou", 10_000);
    let student_id = &outcome.student.id;

    let error = service
        .record_payment(payment(student_id, 2024, 200_000))
        .expect_err("overpayment");
    assert!(matches!(error, LedgerError::Validation(_)));

    assert_eq!(service.total_paid(student_id, year(2024)).expect("paid"), 10_000);
    assert_eq!(
        service
            .payment_history(student_id, year(2024))
            .expect("history")
            .len(),
        1
    );
}

#[test]
fn arrears_block_reinscription_until_settled_in_full() {
    let office = office();
    let previous = enrolled_last_year(&office, "Moussa", 125_000);
    let service = &office.service;
    let student_id = &previous.student.id;
    let next_class = open_class(service, "4ème A", "4ème", 2024, 160_000);
    record_average(&office, student_id, 13.0);

    let error = service
        .reinscribe(student_id, reinscription(&next_class, Some(20_000)))
        .expect_err("partial settlement");
    match error {
        LedgerError::BlockedByArrears {
            school_year,
            reliquat,
            supplied,
        } => {
            assert_eq!(school_year, year(2023));
            assert_eq!(reliquat, 25_000);
            assert_eq!(supplied, 20_000);
        }
        other => panic!("expected arrears block, got {other:?}"),
    }
    assert_eq!(
        service.state_of(student_id).expect("state"),
        EnrollmentState::ReinscriptionPending
    );
    assert!(service
        .current_enrollment(student_id)
        .expect("lookup")
        .is_none());

    let outcome = service
        .reinscribe(student_id, reinscription(&next_class, Some(25_000)))
        .expect("reinscription");
    assert_eq!(outcome.enrollment.enrollment.school_year, year(2024));
    assert_eq!(outcome.previous_year_balance.remaining, 0);
    assert!(outcome.previous_year_balance.is_settled);
    let settlement = outcome.reliquat_settlement.expect("settlement recorded");
    assert_eq!(settlement.kind, PaymentKind::ArrearsSettlement);
    assert_eq!(settlement.school_year, year(2023));

    assert!(service.arrears_of(student_id).expect("arrears").is_empty());
    assert_eq!(
        service.state_of(student_id).expect("state"),
        EnrollmentState::Finalized
    );
    let statement = service.student_statement(student_id).expect("statement");
    assert_eq!(statement.years.len(), 2);
    assert_eq!(statement.total_remaining, 120_000);
}

#[test]
fn annual_average_decides_promotion_or_repeat() {
    let office = office();
    let promoted = enrolled_last_year(&office, "Aminata", 150_000);
    let repeating = enrolled_last_year(&office, "Seydou", 150_000);
    let service = &office.service;
    let fourth = open_class(service, "4ème A", "4ème", 2024, 160_000);
    let fifth = open_class(service, "5ème B", "5ème", 2024, 155_000);
    record_average(&office, &promoted.student.id, 12.5);
    record_average(&office, &repeating.student.id, 8.0);

    let outcome = service
        .reinscribe(&promoted.student.id, reinscription(&fourth, None))
        .expect("promotion");
    assert!(outcome.admitted);
    assert_eq!(outcome.previous_level, GradeLevel::new("5ème"));
    assert_eq!(outcome.target_level, GradeLevel::new("4ème"));

    let error = service
        .reinscribe(&repeating.student.id, reinscription(&fourth, None))
        .expect_err("not admitted to 4ème");
    assert!(matches!(error, LedgerError::Validation(_)));

    let outcome = service
        .reinscribe(&repeating.student.id, reinscription(&fifth, None))
        .expect("repeat year");
    assert!(!outcome.admitted);
    assert_eq!(outcome.target_level, GradeLevel::new("5ème"));
    assert_eq!(outcome.enrollment.balance.total_due, 155_000);

    let statistics = service.year_statistics(year(2024)).expect("statistics");
    assert_eq!(statistics.enrolled, 2);
    assert_eq!(statistics.total_due, 315_000);
    assert_eq!(statistics.total_paid, 80_000);
}

#[test]
fn discount_larger_than_tuition_is_rejected() {
    let office = office();
    let service = &office.service;
    let class = open_class(service, "3ème A", "3ème", 2024, 150_000);
    let outcome = register(service, &class, "Kadidja", 20_000);
    let student_id = &outcome.student.id;
    let type_id = service
        .resolve_or_create_discount_type("Staff child", None)
        .expect("discount type");

    let error = service
        .grant_discount(DiscountGrant {
            student_id: student_id.clone(),
            discount_type_id: type_id,
            value: DiscountValue::Amount(1_000_000),
            reason: "Typo in amount".to_string(),
            start_date: date(2024, 10, 1),
            end_date: None,
            school_year: year(2024),
            requested_by: secretary(),
        })
        .expect_err("discount above tuition");
    assert!(matches!(error, LedgerError::Validation(_)));
    assert!(service
        .discounts_of(student_id, year(2024))
        .expect("discounts")
        .is_empty());
}
