use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Whole currency units. Signed so that negative input reaches validation instead of the parser.
pub type Amount = i64;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identifier of an enrolled or pre-registered student.
    StudentId
);
string_id!(ClassOfferingId);
string_id!(DiscountTypeId);
string_id!(StudentDiscountId);
string_id!(PaymentId);
string_id!(
    /// Staff member acting on the ledger (secretary, bursar, principal).
    UserId
);

/// A school year, identified by the calendar year it starts in ("2023-2024" is `2023`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchoolYear(i32);

impl SchoolYear {
    pub const fn starting(start_year: i32) -> Self {
        Self(start_year)
    }

    pub const fn start_year(self) -> i32 {
        self.0
    }

    pub const fn end_year(self) -> i32 {
        self.0 + 1
    }

    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub const fn previous(self) -> Self {
        Self(self.0 - 1)
    }

    /// School year a date falls in, given the month a new year starts.
    pub fn containing(date: NaiveDate, cutover_month: u32) -> Self {
        if date.month() >= cutover_month {
            Self(date.year())
        } else {
            Self(date.year() - 1)
        }
    }
}

impl fmt::Display for SchoolYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start_year(), self.end_year())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a school year (expected YYYY-YYYY with consecutive years)")]
pub struct SchoolYearParseError(pub String);

impl FromStr for SchoolYear {
    type Err = SchoolYearParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let invalid = || SchoolYearParseError(raw.to_string());

        match trimmed.split_once(['-', '/']) {
            Some((start, end)) => {
                let start: i32 = start.trim().parse().map_err(|_| invalid())?;
                let end: i32 = end.trim().parse().map_err(|_| invalid())?;
                if end != start + 1 {
                    return Err(invalid());
                }
                Ok(Self(start))
            }
            None => trimmed.parse().map(Self).map_err(|_| invalid()),
        }
    }
}

impl Serialize for SchoolYear {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SchoolYear {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Grade level label as used on class offerings ("CM2", "5ème", "Terminale").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GradeLevel(pub String);

impl GradeLevel {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GradeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered list of levels a student climbs through, lowest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelLadder {
    levels: Vec<GradeLevel>,
}

impl LevelLadder {
    /// Returns `None` for an empty ladder.
    pub fn new(levels: Vec<GradeLevel>) -> Option<Self> {
        if levels.is_empty() {
            None
        } else {
            Some(Self { levels })
        }
    }

    /// Primary through upper secondary, French-style.
    pub fn standard() -> Self {
        let levels = [
            "CP", "CE1", "CE2", "CM1", "CM2", "6ème", "5ème", "4ème", "3ème", "2nde", "1ère",
            "Terminale",
        ]
        .into_iter()
        .map(GradeLevel::new)
        .collect();
        Self { levels }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn contains(&self, level: &GradeLevel) -> bool {
        self.position(level).is_some()
    }

    /// The ladder's own spelling of `level`, matched case-insensitively.
    pub fn canonical(&self, level: &GradeLevel) -> Option<GradeLevel> {
        self.position(level).map(|index| self.levels[index].clone())
    }

    fn position(&self, level: &GradeLevel) -> Option<usize> {
        self.levels
            .iter()
            .position(|candidate| candidate.as_str().eq_ignore_ascii_case(level.as_str()))
    }

    /// Level after `level`, or `level` itself at the top of the ladder. `None` when unknown.
    pub fn next_level(&self, level: &GradeLevel) -> Option<GradeLevel> {
        let index = self.position(level)?;
        let next = (index + 1).min(self.levels.len() - 1);
        Some(self.levels[next].clone())
    }

    pub fn levels(&self) -> &[GradeLevel] {
        &self.levels
    }
}

/// A class of a given level for one school year, carrying the tuition charged for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassOffering {
    pub id: ClassOfferingId,
    pub name: String,
    pub level: GradeLevel,
    pub school_year: SchoolYear,
    #[serde(rename = "class_amount")]
    pub tuition_amount: Amount,
    #[serde(default)]
    pub principal_teacher: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationMode {
    Online,
    Onsite,
}

impl RegistrationMode {
    pub const fn label(self) -> &'static str {
        match self {
            RegistrationMode::Online => "online",
            RegistrationMode::Onsite => "onsite",
        }
    }
}

/// Identity captured at registration; not editable through reinscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentIdentity {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub birth_place: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentContact {
    #[serde(default)]
    pub father_name: Option<String>,
    #[serde(default)]
    pub mother_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl ParentContact {
    /// Overwrite every field present in `update`; absent fields are kept.
    pub fn amend(&mut self, update: ParentContactUpdate) {
        let ParentContactUpdate {
            father_name,
            mother_name,
            phone,
            email,
            address,
        } = update;

        if father_name.is_some() {
            self.father_name = father_name;
        }
        if mother_name.is_some() {
            self.mother_name = mother_name;
        }
        if phone.is_some() {
            self.phone = phone;
        }
        if email.is_some() {
            self.email = email;
        }
        if address.is_some() {
            self.address = address;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentContactUpdate {
    #[serde(default)]
    pub father_name: Option<String>,
    #[serde(default)]
    pub mother_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub registration_number: String,
    #[serde(flatten)]
    pub identity: StudentIdentity,
    pub registration_mode: RegistrationMode,
    pub parent: ParentContact,
    pub registered_on: NaiveDate,
}

impl Student {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.identity.first_name, self.identity.last_name)
    }
}

/// A student's seat in a class for one school year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub student_id: StudentId,
    pub class_offering_id: ClassOfferingId,
    pub school_year: SchoolYear,
    pub tuition_due_snapshot: Amount,
    pub enrolled_on: NaiveDate,
}

/// Caller-supplied reduction; the counterpart figure is derived on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountValue {
    Amount(Amount),
    Percentage(Decimal),
}

/// Donor or policy a reduction is granted under ("Bourse d'excellence", "Enfant du personnel").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountType {
    pub id: DiscountTypeId,
    pub name: String,
    #[serde(default)]
    pub rule: Option<DiscountValue>,
    pub active: bool,
}

impl DiscountType {
    pub fn is_percentage(&self) -> bool {
        matches!(self.rule, Some(DiscountValue::Percentage(_)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountStatus {
    Pending,
    Approved,
    Deactivated,
}

impl DiscountStatus {
    pub const fn label(self) -> &'static str {
        match self {
            DiscountStatus::Pending => "pending",
            DiscountStatus::Approved => "approved",
            DiscountStatus::Deactivated => "deactivated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentDiscount {
    pub id: StudentDiscountId,
    pub student_id: StudentId,
    pub discount_type_id: DiscountTypeId,
    pub school_year: SchoolYear,
    pub value: DiscountValue,
    pub reason: String,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    pub status: DiscountStatus,
    pub requested_by: UserId,
    #[serde(default)]
    pub approved_by: Option<UserId>,
}

impl StudentDiscount {
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.end_date.is_some_and(|end| end < today)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    MobileMoney,
    BankTransfer,
    Cheque,
}

impl PaymentMethod {
    pub const fn label(self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::MobileMoney => "mobile money",
            PaymentMethod::BankTransfer => "bank transfer",
            PaymentMethod::Cheque => "cheque",
        }
    }
}

/// Why a payment was taken; purely descriptive, every kind counts toward "total paid".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    FirstInstallment,
    Installment,
    ArrearsSettlement,
}

/// Append-only record of money received for one student and school year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    /// Global recording order; receipts replay the ledger up to this point.
    pub sequence: u64,
    pub student_id: StudentId,
    pub school_year: SchoolYear,
    pub amount: Amount,
    pub method: PaymentMethod,
    pub kind: PaymentKind,
    pub recorded_at: DateTime<Utc>,
    pub recorded_by: UserId,
}

pub const ADMISSION_THRESHOLD: f64 = 10.0;

/// Year-end result produced by the grading subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnualAverage {
    pub student_id: StudentId,
    pub school_year: SchoolYear,
    pub average: f64,
    #[serde(default)]
    pub rank: Option<u32>,
    #[serde(default)]
    pub class_size: Option<u32>,
}

impl AnnualAverage {
    pub fn is_admitted(&self) -> bool {
        self.is_admitted_at(ADMISSION_THRESHOLD)
    }

    pub fn is_admitted_at(&self, threshold: f64) -> bool {
        self.average >= threshold
    }
}

/// Where a student stands in the registration cycle relative to the active school year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentState {
    OnlinePreregistered,
    Finalized,
    ReinscriptionPending,
    EnrolledNextYear,
}

impl EnrollmentState {
    pub const fn label(self) -> &'static str {
        match self {
            EnrollmentState::OnlinePreregistered => "online pre-registered",
            EnrollmentState::Finalized => "finalized",
            EnrollmentState::ReinscriptionPending => "reinscription pending",
            EnrollmentState::EnrolledNextYear => "enrolled next year",
        }
    }
}
