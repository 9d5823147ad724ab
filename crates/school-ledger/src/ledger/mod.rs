//! Student tuition ledger and enrollment lifecycle.
//!
//! Components are layered leaves first: [`calendar`] and [`domain`] carry the vocabulary,
//! [`tuition`], [`discounts`] and [`payments`] own their records, [`balance`] computes what is
//! still owed, and [`enrollment`] drives registrations and reinscriptions on top of them.
//! [`SchoolLedgerService`] ties the components to a repository, a grade source, and a clock,
//! and [`ledger_router`] exposes it over HTTP.

pub mod balance;
pub mod calendar;
pub mod context;
pub mod discounts;
pub mod domain;
pub mod enrollment;
pub mod error;
pub mod memory;
pub mod payments;
pub mod reports;
pub mod repository;
pub mod router;
pub mod service;
pub mod tuition;

#[cfg(test)]
mod tests;

pub use balance::{Balance, StudentYearLedger};
pub use calendar::{Clock, FixedClock, ManualClock, SchoolCalendar, SystemClock};
pub use context::{IdSequence, LedgerContext};
pub use discounts::{
    DiscountGrant, DiscountLedger, DiscountTypeGroup, DiscountTypeView, ResolvedDiscount,
};
pub use domain::{
    AnnualAverage, ClassOffering, ClassOfferingId, DiscountStatus, DiscountType, DiscountTypeId,
    DiscountValue, Enrollment, EnrollmentState, GradeLevel, LevelLadder, ParentContact,
    ParentContactUpdate, Payment, PaymentId, PaymentKind, PaymentMethod, RegistrationMode,
    SchoolYear, Student, StudentDiscount, StudentDiscountId, StudentId, StudentIdentity, UserId,
};
pub use enrollment::{
    EnrollmentLifecycle, EnrollmentOutcome, Finalization, OnlinePreregistration,
    OnsiteRegistration, Reinscription, ReinscriptionOutcome,
};
pub use error::LedgerError;
pub use memory::{MemoryGradeBook, MemoryLedgerStore};
pub use payments::{PaymentInput, PaymentLedger, PaymentReceipt, PaymentRequest};
pub use reports::{StudentStatement, YearBalance, YearStatistics};
pub use repository::{
    GradeSource, GradeSourceError, LedgerBatch, LedgerRepository, LedgerWrite, RepositoryError,
};
pub use router::ledger_router;
pub use service::SchoolLedgerService;
pub use tuition::{ClassOfferingDraft, TuitionPolicy};
