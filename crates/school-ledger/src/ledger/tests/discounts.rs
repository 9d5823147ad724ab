use rust_decimal_macros::dec;

use super::common::*;
use crate::ledger::discounts::DiscountGrant;
use crate::ledger::domain::{
    Amount, DiscountStatus, DiscountTypeId, DiscountValue, StudentDiscountId, StudentId,
};
use crate::ledger::error::LedgerError;

fn grant(student_id: &StudentId, type_id: &DiscountTypeId, value: DiscountValue) -> DiscountGrant {
    DiscountGrant {
        student_id: student_id.clone(),
        discount_type_id: type_id.clone(),
        value,
        reason: "Excellent results in 2023-2024".to_string(),
        start_date: date(2024, 9, 2),
        end_date: None,
        school_year: year(2024),
        requested_by: secretary(),
    }
}

fn scholarship(service: &MemoryService) -> DiscountTypeId {
    service
        .resolve_or_create_discount_type("Merit scholarship", None)
        .expect("discount type resolves")
}

#[test]
fn approved_discount_reduces_the_balance() {
    let harness = harness();
    let service = &harness.service;
    let class = open_class(service, "6ème A", "6ème", 2024, 150_000);
    let outcome = register(service, &class, 50_000);
    let student_id = &outcome.student.id;
    let type_id = scholarship(service);

    let pending = service
        .grant_discount(grant(student_id, &type_id, DiscountValue::Amount(30_000)))
        .expect("grant recorded");
    assert_eq!(pending.status, DiscountStatus::Pending);
    assert_eq!(
        service.balance_of(student_id, year(2024)).expect("balance").remaining,
        100_000
    );

    let approved = service
        .approve_discount(&pending.id, &director())
        .expect("approval");
    assert_eq!(approved.status, DiscountStatus::Approved);
    assert_eq!(approved.approved_by, Some(director()));

    let balance = service.balance_of(student_id, year(2024)).expect("balance");
    assert_eq!(balance.total_due, 150_000);
    assert_eq!(balance.total_discount, 30_000);
    assert_eq!(balance.net_due, 120_000);
    assert_eq!(balance.total_paid, 50_000);
    assert_eq!(balance.remaining, 70_000);
    assert!(!balance.is_settled);
    assert_eq!(
        service
            .active_approved_discount_total(student_id, year(2024))
            .expect("total"),
        30_000
    );
}

#[test]
fn percentage_and_amount_are_derived_from_each_other() {
    let harness = harness();
    let service = &harness.service;
    let class = open_class(service, "6ème A", "6ème", 2024, 150_000);
    let outcome = register(service, &class, 50_000);
    let student_id = &outcome.student.id;
    let type_id = scholarship(service);

    service
        .grant_discount(grant(student_id, &type_id, DiscountValue::Percentage(dec!(20))))
        .expect("percentage grant");
    service
        .grant_discount(grant(student_id, &type_id, DiscountValue::Amount(45_000)))
        .expect("amount grant");

    let resolved = service.discounts_of(student_id, year(2024)).expect("discounts");
    assert_eq!(resolved.len(), 2);
    assert_eq!(resolved[0].amount, 30_000);
    assert_eq!(resolved[0].percentage, dec!(20));
    assert_eq!(resolved[1].amount, 45_000);
    assert_eq!(resolved[1].percentage, dec!(30));
    assert!(resolved.iter().all(|discount| !discount.counts_toward_balance));
    assert_eq!(resolved[0].discount_type_name, "Merit scholarship");
}

#[test]
fn grants_are_bounded_by_the_tuition() {
    let harness = harness();
    let service = &harness.service;
    let class = open_class(service, "6ème A", "6ème", 2024, 150_000);
    let outcome = register(service, &class, 50_000);
    let student_id = &outcome.student.id;
    let type_id = scholarship(service);

    let error = service
        .grant_discount(grant(student_id, &type_id, DiscountValue::Amount(150_001)))
        .expect_err("above tuition");
    assert!(error.to_string().contains("exceeds tuition 150000"));

    for value in [
        DiscountValue::Amount(-1),
        DiscountValue::Percentage(dec!(100.5)),
        DiscountValue::Percentage(dec!(-3)),
    ] {
        assert!(matches!(
            service.grant_discount(grant(student_id, &type_id, value)),
            Err(LedgerError::Validation(_))
        ));
    }
    assert!(service
        .discounts_of(student_id, year(2024))
        .expect("discounts")
        .is_empty());
}

#[test]
fn grants_require_a_reason_and_a_coherent_period() {
    let harness = harness();
    let service = &harness.service;
    let class = open_class(service, "6ème A", "6ème", 2024, 150_000);
    let outcome = register(service, &class, 50_000);
    let student_id = &outcome.student.id;
    let type_id = scholarship(service);

    let mut blank_reason = grant(student_id, &type_id, DiscountValue::Amount(10_000));
    blank_reason.reason = "  ".to_string();
    assert!(matches!(
        service.grant_discount(blank_reason),
        Err(LedgerError::Validation(_))
    ));

    let mut backwards = grant(student_id, &type_id, DiscountValue::Amount(10_000));
    backwards.end_date = Some(date(2024, 8, 1));
    assert!(matches!(
        service.grant_discount(backwards),
        Err(LedgerError::Validation(_))
    ));

    assert!(matches!(
        service.grant_discount(grant(
            &StudentId::new("stu-404"),
            &type_id,
            DiscountValue::Amount(10_000)
        )),
        Err(LedgerError::NotFound {
            entity: "student",
            ..
        })
    ));
    assert!(matches!(
        service.grant_discount(grant(
            student_id,
            &DiscountTypeId::new("dty-404"),
            DiscountValue::Amount(10_000)
        )),
        Err(LedgerError::NotFound { .. })
    ));
}

#[test]
fn only_pending_discounts_can_be_approved() {
    let harness = harness();
    let service = &harness.service;
    let class = open_class(service, "6ème A", "6ème", 2024, 150_000);
    let outcome = register(service, &class, 50_000);
    let type_id = scholarship(service);
    let discount = service
        .grant_discount(grant(&outcome.student.id, &type_id, DiscountValue::Amount(10_000)))
        .expect("grant");

    service
        .approve_discount(&discount.id, &director())
        .expect("first approval");
    assert!(matches!(
        service.approve_discount(&discount.id, &director()),
        Err(LedgerError::InvalidState(_))
    ));
    assert!(matches!(
        service.approve_discount(&StudentDiscountId::new("dsc-404"), &director()),
        Err(LedgerError::NotFound { .. })
    ));
}

#[test]
fn deactivation_is_idempotent_and_stops_the_reduction() {
    let harness = harness();
    let service = &harness.service;
    let class = open_class(service, "6ème A", "6ème", 2024, 150_000);
    let outcome = register(service, &class, 50_000);
    let student_id = &outcome.student.id;
    let type_id = scholarship(service);
    let discount = service
        .grant_discount(grant(student_id, &type_id, DiscountValue::Amount(40_000)))
        .expect("grant");
    service
        .approve_discount(&discount.id, &director())
        .expect("approval");
    assert_eq!(
        service.balance_of(student_id, year(2024)).expect("balance").remaining,
        60_000
    );

    let first = service.deactivate_discount(&discount.id).expect("deactivate");
    let second = service.deactivate_discount(&discount.id).expect("deactivate again");
    assert_eq!(first, second);
    assert_eq!(second.status, DiscountStatus::Deactivated);
    assert_eq!(
        service.balance_of(student_id, year(2024)).expect("balance").remaining,
        100_000
    );
    assert!(matches!(
        service.approve_discount(&discount.id, &director()),
        Err(LedgerError::InvalidState(_))
    ));
}

#[test]
fn expired_discounts_stop_counting() {
    let harness = harness();
    let service = &harness.service;
    let class = open_class(service, "6ème A", "6ème", 2024, 150_000);
    let outcome = register(service, &class, 50_000);
    let student_id = &outcome.student.id;
    let type_id = scholarship(service);

    let mut first_term = grant(student_id, &type_id, DiscountValue::Amount(20_000));
    first_term.end_date = Some(date(2024, 10, 1));
    let discount = service.grant_discount(first_term).expect("grant");
    service
        .approve_discount(&discount.id, &director())
        .expect("approval");

    assert_eq!(
        service.balance_of(student_id, year(2024)).expect("balance").total_discount,
        0
    );
    let resolved = service.discounts_of(student_id, year(2024)).expect("discounts");
    assert_eq!(resolved[0].amount, 20_000);
    assert!(!resolved[0].counts_toward_balance);
}

#[test]
fn stacked_discounts_never_push_the_due_below_zero() {
    let harness = harness();
    let service = &harness.service;
    let class = open_class(service, "6ème A", "6ème", 2024, 150_000);
    let outcome = register(service, &class, 50_000);
    let student_id = &outcome.student.id;
    let type_id = scholarship(service);

    for amount in [100_000, 80_000] {
        let discount = service
            .grant_discount(grant(student_id, &type_id, DiscountValue::Amount(amount)))
            .expect("grant");
        service
            .approve_discount(&discount.id, &director())
            .expect("approval");
    }

    let balance = service.balance_of(student_id, year(2024)).expect("balance");
    assert_eq!(balance.total_discount, 150_000);
    assert_eq!(balance.net_due, 0);
    assert_eq!(balance.remaining, 0);
    assert!(!balance.is_settled);
}

#[test]
fn discount_types_resolve_by_name() {
    let harness = harness();
    let service = &harness.service;

    let rule = DiscountValue::Percentage(dec!(10));
    let created = service
        .resolve_or_create_discount_type("Sibling reduction", Some(rule))
        .expect("created");
    let resolved = service
        .resolve_or_create_discount_type("  sibling REDUCTION ", None)
        .expect("resolved");
    assert_eq!(created, resolved);
    assert!(matches!(
        service.resolve_or_create_discount_type("   ", None),
        Err(LedgerError::Validation(_))
    ));

    let views = service.discount_types().expect("types");
    assert_eq!(views.len(), 1);
    assert!(views[0].is_percentage);
    assert_eq!(views[0].percentage, Some(dec!(10)));
    assert_eq!(views[0].fixed_amount, Some(15_000));
}

#[test]
fn inactive_types_accept_no_new_grants_and_stop_counting() {
    let harness = harness();
    let service = &harness.service;
    let class = open_class(service, "6ème A", "6ème", 2024, 150_000);
    let outcome = register(service, &class, 50_000);
    let student_id = &outcome.student.id;
    let type_id = scholarship(service);
    let discount = service
        .grant_discount(grant(student_id, &type_id, DiscountValue::Amount(25_000)))
        .expect("grant");
    service
        .approve_discount(&discount.id, &director())
        .expect("approval");

    let disabled = service
        .set_discount_type_active(&type_id, false)
        .expect("toggle");
    assert!(!disabled.active);
    assert!(matches!(
        service.grant_discount(grant(student_id, &type_id, DiscountValue::Amount(5_000))),
        Err(LedgerError::Validation(_))
    ));
    assert_eq!(
        service.balance_of(student_id, year(2024)).expect("balance").total_discount,
        0
    );

    service
        .set_discount_type_active(&type_id, true)
        .expect("toggle back");
    assert_eq!(
        service.balance_of(student_id, year(2024)).expect("balance").total_discount,
        25_000
    );
}

#[test]
fn discounts_are_grouped_by_type_largest_total_first() {
    let harness = harness();
    let service = &harness.service;
    let class = open_class(service, "6ème A", "6ème", 2024, 150_000);
    let first = register(service, &class, 50_000);
    let second = register(service, &class, 50_000);
    let merit = scholarship(service);
    let sibling = service
        .resolve_or_create_discount_type("Sibling reduction", None)
        .expect("type");

    let approve = |student_id: &StudentId, type_id: &DiscountTypeId, amount| {
        let discount = service
            .grant_discount(grant(student_id, type_id, DiscountValue::Amount(amount)))
            .expect("grant");
        service
            .approve_discount(&discount.id, &director())
            .expect("approval");
    };
    approve(&first.student.id, &merit, 30_000);
    approve(&second.student.id, &merit, 20_000);
    approve(&second.student.id, &sibling, 15_000);
    service
        .grant_discount(grant(&first.student.id, &sibling, DiscountValue::Amount(15_000)))
        .expect("pending grant");

    let groups = service.grouped_discounts_by_type(year(2024)).expect("groups");
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].discount_type.id, merit);
    assert_eq!(groups[0].total_amount, 50_000);
    assert_eq!(groups[0].active_count, 2);
    assert_eq!(groups[0].pending_count, 0);
    assert_eq!(groups[1].discount_type.id, sibling);
    assert_eq!(groups[1].total_amount, 15_000);
    assert_eq!(groups[1].active_count, 1);
    assert_eq!(groups[1].pending_count, 1);
    assert_eq!(groups[1].discounts.len(), 2);
}

#[test]
fn huge_stacked_discounts_saturate_at_tuition() {
    let harness = harness();
    let service = &harness.service;
    let class = open_class(service, "Tle A", "Terminale", 2024, Amount::MAX);
    let outcome = register(service, &class, 50_000);
    let student_id = &outcome.student.id;
    let type_id = scholarship(service);

    for _ in 0..2 {
        let pending = service
            .grant_discount(grant(student_id, &type_id, DiscountValue::Amount(Amount::MAX - 10)))
            .expect("grant within tuition");
        service
            .approve_discount(&pending.id, &director())
            .expect("approval");
    }

    let balance = service.balance_of(student_id, year(2024)).expect("balance");
    assert_eq!(balance.total_due, Amount::MAX);
    assert_eq!(balance.total_discount, Amount::MAX);
    assert_eq!(balance.net_due, 0);
    assert_eq!(balance.remaining, 0);
    assert_eq!(
        service
            .active_approved_discount_total(student_id, year(2024))
            .expect("total"),
        Amount::MAX
    );

    let groups = service.grouped_discounts_by_type(year(2024)).expect("groups");
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].total_amount, Amount::MAX);

    let statistics = service.year_statistics(year(2024)).expect("statistics");
    assert_eq!(statistics.total_discount, Amount::MAX);
    assert_eq!(statistics.total_paid, 50_000);
}
