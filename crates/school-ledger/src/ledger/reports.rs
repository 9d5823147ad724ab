use chrono::NaiveDate;
use serde::Serialize;

use super::balance::{Balance, StudentYearLedger};
use super::domain::{Amount, EnrollmentState, SchoolYear, Student, StudentId};
use super::enrollment::derive_state;
use super::error::LedgerError;
use super::repository::LedgerRepository;

/// Balance of one enrollment year, as printed on a statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct YearBalance {
    pub school_year: SchoolYear,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    pub balance: Balance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudentStatement {
    pub student: Student,
    pub state: EnrollmentState,
    pub years: Vec<YearBalance>,
    pub total_remaining: Amount,
}

/// Dashboard totals for one school year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct YearStatistics {
    pub school_year: SchoolYear,
    pub enrolled: usize,
    pub settled: usize,
    pub total_due: Amount,
    pub total_discount: Amount,
    pub total_paid: Amount,
    pub total_remaining: Amount,
}

impl YearStatistics {
    fn empty(school_year: SchoolYear) -> Self {
        Self {
            school_year,
            enrolled: 0,
            settled: 0,
            total_due: 0,
            total_discount: 0,
            total_paid: 0,
            total_remaining: 0,
        }
    }

    fn add(&mut self, balance: &Balance) {
        self.enrolled += 1;
        if balance.is_settled {
            self.settled += 1;
        }
        self.total_due = self.total_due.saturating_add(balance.total_due);
        self.total_discount = self.total_discount.saturating_add(balance.total_discount);
        self.total_paid = self.total_paid.saturating_add(balance.total_paid);
        self.total_remaining = self.total_remaining.saturating_add(balance.remaining);
    }
}

fn year_balance(ledger: &StudentYearLedger, today: NaiveDate) -> YearBalance {
    YearBalance {
        school_year: ledger.school_year,
        class_name: ledger.class_offering.as_ref().map(|class| class.name.clone()),
        level: ledger
            .class_offering
            .as_ref()
            .map(|class| class.level.to_string()),
        balance: ledger.balance(today),
    }
}

/// Every enrollment year of a student, oldest first.
pub fn student_statement<R>(
    repository: &R,
    student: Student,
    active_year: SchoolYear,
    today: NaiveDate,
) -> Result<StudentStatement, LedgerError>
where
    R: LedgerRepository,
{
    let enrollments = repository.enrollments_of(&student.id)?;
    let mut years = Vec::with_capacity(enrollments.len());
    for enrollment in &enrollments {
        let ledger = StudentYearLedger::load(repository, &student.id, enrollment.school_year)?;
        years.push(year_balance(&ledger, today));
    }

    Ok(StudentStatement {
        state: derive_state(&enrollments, active_year),
        total_remaining: years
            .iter()
            .map(|year| year.balance.remaining)
            .fold(0, Amount::saturating_add),
        student,
        years,
    })
}

/// Enrollment years strictly before `active_year` that still owe money.
pub fn arrears_of<R>(
    repository: &R,
    student_id: &StudentId,
    active_year: SchoolYear,
    today: NaiveDate,
) -> Result<Vec<YearBalance>, LedgerError>
where
    R: LedgerRepository,
{
    let mut arrears = Vec::new();
    for enrollment in repository.enrollments_of(student_id)? {
        if enrollment.school_year >= active_year {
            continue;
        }
        let ledger = StudentYearLedger::load(repository, student_id, enrollment.school_year)?;
        let entry = year_balance(&ledger, today);
        if entry.balance.remaining > 0 {
            arrears.push(entry);
        }
    }
    Ok(arrears)
}

pub fn year_statistics<R>(
    repository: &R,
    school_year: SchoolYear,
    today: NaiveDate,
) -> Result<YearStatistics, LedgerError>
where
    R: LedgerRepository,
{
    let mut statistics = YearStatistics::empty(school_year);
    for enrollment in repository.enrollments_for_year(school_year)? {
        let ledger = StudentYearLedger::load(repository, &enrollment.student_id, school_year)?;
        statistics.add(&ledger.balance(today));
    }
    Ok(statistics)
}
