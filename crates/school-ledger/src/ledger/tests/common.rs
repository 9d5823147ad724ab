use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request};
use axum::response::Response;
use chrono::NaiveDate;
use serde_json::Value;

use crate::config::LedgerConfig;
use crate::ledger::domain::{
    Amount, AnnualAverage, ClassOffering, ClassOfferingId, DiscountType, DiscountTypeId,
    Enrollment, GradeLevel, Payment, PaymentId, PaymentMethod, SchoolYear, Student,
    StudentDiscount, StudentDiscountId, StudentId, StudentIdentity, UserId,
};
use crate::ledger::enrollment::{EnrollmentOutcome, OnlinePreregistration, OnsiteRegistration};
use crate::ledger::payments::PaymentInput;
use crate::ledger::repository::{LedgerBatch, LedgerRepository, RepositoryError};
use crate::ledger::tuition::ClassOfferingDraft;
use crate::ledger::{
    Clock, ManualClock, MemoryGradeBook, MemoryLedgerStore, ParentContact, SchoolLedgerService,
};

pub(super) type MemoryService = SchoolLedgerService<MemoryLedgerStore, MemoryGradeBook>;

pub(super) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

pub(super) fn year(start: i32) -> SchoolYear {
    SchoolYear::starting(start)
}

pub(super) fn level(name: &str) -> GradeLevel {
    GradeLevel::new(name)
}

pub(super) fn secretary() -> UserId {
    UserId::new("secretary-1")
}

pub(super) fn director() -> UserId {
    UserId::new("director")
}

pub(super) fn cash(amount: Amount) -> PaymentInput {
    PaymentInput {
        amount,
        method: PaymentMethod::Cash,
    }
}

pub(super) fn identity(first_name: &str, last_name: &str) -> StudentIdentity {
    StudentIdentity {
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        birth_date: Some(date(2012, 3, 14)),
        birth_place: Some("Abidjan".to_string()),
    }
}

pub(super) fn parent() -> ParentContact {
    ParentContact {
        father_name: Some("Koffi Kouassi".to_string()),
        phone: Some("+225 07 00 00 00".to_string()),
        ..ParentContact::default()
    }
}

/// Service, its collaborators, and the clock driving the active school year.
pub(super) struct Harness {
    pub service: Arc<MemoryService>,
    pub store: Arc<MemoryLedgerStore>,
    pub grades: Arc<MemoryGradeBook>,
    pub clock: Arc<ManualClock>,
}

/// Harness whose active year is 2024-2025.
pub(super) fn harness() -> Harness {
    harness_on(date(2024, 10, 15))
}

pub(super) fn harness_on(today: NaiveDate) -> Harness {
    let store = Arc::new(MemoryLedgerStore::new());
    let grades = Arc::new(MemoryGradeBook::new());
    let clock = Arc::new(ManualClock::on(today));
    let service = Arc::new(SchoolLedgerService::with_clock(
        store.clone(),
        grades.clone(),
        LedgerConfig::default(),
        clock.clone() as Arc<dyn Clock>,
    ));

    Harness {
        service,
        store,
        grades,
        clock,
    }
}

pub(super) fn draft(
    name: &str,
    level_name: &str,
    start: i32,
    amount: Amount,
) -> ClassOfferingDraft {
    ClassOfferingDraft {
        id: None,
        name: name.to_string(),
        level: level(level_name),
        school_year: year(start),
        tuition_amount: amount,
        principal_teacher: None,
    }
}

pub(super) fn open_class(
    service: &MemoryService,
    name: &str,
    level_name: &str,
    start: i32,
    amount: Amount,
) -> ClassOffering {
    service
        .create_or_update_class_offering(draft(name, level_name, start, amount))
        .expect("class offering saved")
}

pub(super) fn onsite(class: &ClassOffering, first_payment: Amount) -> OnsiteRegistration {
    OnsiteRegistration {
        student: identity("Awa", "Kouassi"),
        parent: parent(),
        class_offering_id: class.id.clone(),
        first_payment: cash(first_payment),
        recorded_by: secretary(),
    }
}

pub(super) fn register(
    service: &MemoryService,
    class: &ClassOffering,
    first_payment: Amount,
) -> EnrollmentOutcome {
    service
        .register_onsite(onsite(class, first_payment))
        .expect("onsite registration succeeds")
}

pub(super) fn preregister(service: &MemoryService) -> Student {
    service
        .preregister_online(OnlinePreregistration {
            student: identity("Yao", "N'Guessan"),
            parent: parent(),
        })
        .expect("pre-registration succeeds")
}

pub(super) fn record_average(
    grades: &MemoryGradeBook,
    student_id: &StudentId,
    start: i32,
    average: f64,
) {
    grades
        .record(AnnualAverage {
            student_id: student_id.clone(),
            school_year: year(start),
            average,
            rank: None,
            class_size: None,
        })
        .expect("grade recorded");
}

/// A student enrolled in 5ème for 2023-2024, created while that year was active, with the
/// harness clock then moved into 2024-2025.
pub(super) fn student_from_last_year(
    harness: &Harness,
    tuition: Amount,
    first_payment: Amount,
) -> (EnrollmentOutcome, ClassOffering) {
    harness.clock.set(date(2023, 10, 2));
    let class = open_class(&harness.service, "5ème A", "5ème", 2023, tuition);
    let outcome = register(&harness.service, &class, first_payment);
    harness.clock.set(date(2024, 9, 16));
    (outcome, class)
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

pub(super) fn json_request(method: Method, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body).expect("serialize body")))
        .expect("request builds")
}

pub(super) fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request builds")
}

/// Repository whose every call fails as if the backing store were down.
#[derive(Debug, Default)]
pub(super) struct UnavailableRepository;

fn unavailable<T>() -> Result<T, RepositoryError> {
    Err(RepositoryError::Unavailable("database offline".to_string()))
}

impl LedgerRepository for UnavailableRepository {
    fn student(&self, _id: &StudentId) -> Result<Option<Student>, RepositoryError> {
        unavailable()
    }

    fn students(&self) -> Result<Vec<Student>, RepositoryError> {
        unavailable()
    }

    fn class_offering(
        &self,
        _id: &ClassOfferingId,
    ) -> Result<Option<ClassOffering>, RepositoryError> {
        unavailable()
    }

    fn class_offerings(
        &self,
        _school_year: SchoolYear,
    ) -> Result<Vec<ClassOffering>, RepositoryError> {
        unavailable()
    }

    fn tuition_rate(
        &self,
        _level: &GradeLevel,
        _school_year: SchoolYear,
    ) -> Result<Option<Amount>, RepositoryError> {
        unavailable()
    }

    fn discount_type(&self, _id: &DiscountTypeId) -> Result<Option<DiscountType>, RepositoryError> {
        unavailable()
    }

    fn discount_types(&self) -> Result<Vec<DiscountType>, RepositoryError> {
        unavailable()
    }

    fn student_discount(
        &self,
        _id: &StudentDiscountId,
    ) -> Result<Option<StudentDiscount>, RepositoryError> {
        unavailable()
    }

    fn student_discounts(
        &self,
        _student_id: &StudentId,
        _school_year: SchoolYear,
    ) -> Result<Vec<StudentDiscount>, RepositoryError> {
        unavailable()
    }

    fn discounts_for_year(
        &self,
        _school_year: SchoolYear,
    ) -> Result<Vec<StudentDiscount>, RepositoryError> {
        unavailable()
    }

    fn payment(&self, _id: &PaymentId) -> Result<Option<Payment>, RepositoryError> {
        unavailable()
    }

    fn payments(
        &self,
        _student_id: &StudentId,
        _school_year: SchoolYear,
    ) -> Result<Vec<Payment>, RepositoryError> {
        unavailable()
    }

    fn enrollment(
        &self,
        _student_id: &StudentId,
        _school_year: SchoolYear,
    ) -> Result<Option<Enrollment>, RepositoryError> {
        unavailable()
    }

    fn enrollments_of(&self, _student_id: &StudentId) -> Result<Vec<Enrollment>, RepositoryError> {
        unavailable()
    }

    fn enrollments_for_year(
        &self,
        _school_year: SchoolYear,
    ) -> Result<Vec<Enrollment>, RepositoryError> {
        unavailable()
    }

    fn apply(&self, _batch: LedgerBatch) -> Result<(), RepositoryError> {
        unavailable()
    }
}
