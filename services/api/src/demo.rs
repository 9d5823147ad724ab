use crate::infra::parse_date;
use chrono::{Local, NaiveDate};
use clap::Args;
use rust_decimal::Decimal;
use school_ledger::config::{AppConfig, LedgerConfig};
use school_ledger::error::AppError;
use school_ledger::ledger::domain::Amount;
use school_ledger::ledger::{
    AnnualAverage, Balance, ClassOffering, ClassOfferingDraft, Clock, DiscountGrant,
    DiscountValue, GradeLevel, LedgerError, ManualClock, MemoryGradeBook, MemoryLedgerStore,
    OnsiteRegistration, ParentContact, PaymentInput, PaymentMethod, PaymentRequest,
    Reinscription, SchoolCalendar, SchoolLedgerService, SchoolYear, StudentIdentity,
    StudentStatement, UserId, YearStatistics,
};
use serde::Serialize;
use std::sync::Arc;

type DemoLedger = SchoolLedgerService<MemoryLedgerStore, MemoryGradeBook>;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// School year of the reinscription (e.g. 2024-2025). Defaults to the current one.
    #[arg(long)]
    pub(crate) year: Option<SchoolYear>,
    /// Override the reporting date (YYYY-MM-DD); must fall inside the reinscription year.
    #[arg(long, value_parser = parse_date)]
    pub(crate) today: Option<NaiveDate>,
    /// Tuition of the class the student starts in.
    #[arg(long, default_value_t = 150_000)]
    pub(crate) tuition: Amount,
    /// Print the walk-through summary as JSON instead of text.
    #[arg(long)]
    pub(crate) json: bool,
}

/// Everything the walk-through produced, in the order it happened.
#[derive(Debug, Serialize)]
pub(crate) struct DemoSummary {
    pub(crate) student: String,
    pub(crate) registration_number: String,
    pub(crate) previous_year: SchoolYear,
    pub(crate) active_year: SchoolYear,
    pub(crate) balance_before_rollover: Balance,
    pub(crate) blocked_reinscription: String,
    pub(crate) settlement: Amount,
    pub(crate) promoted_to: GradeLevel,
    pub(crate) admitted: bool,
    pub(crate) statement: StudentStatement,
    pub(crate) statistics: YearStatistics,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?.ledger;
    let (active_year, today) = demo_period(&args, &config)?;

    let summary = walkthrough(config, active_year, today, args.tuition)?;
    if args.json {
        let rendered = serde_json::to_string_pretty(&summary).map_err(std::io::Error::from)?;
        println!("{rendered}");
    } else {
        render_summary(&summary);
    }
    Ok(())
}

/// Reinscription year and reporting date, both following the configured cutover month.
fn demo_period(
    args: &DemoArgs,
    config: &LedgerConfig,
) -> Result<(SchoolYear, NaiveDate), AppError> {
    let calendar = SchoolCalendar::new(config.cutover_month);
    let (active_year, today) = match (args.year, args.today) {
        (_, Some(today)) => (calendar.year_of(today), today),
        (Some(year), None) => (year, start_of(year, config)),
        (None, None) => {
            let today = Local::now().date_naive();
            (calendar.year_of(today), today)
        }
    };
    if let Some(year) = args.year {
        if year != active_year {
            return Err(LedgerError::validation(format!(
                "{today} falls in {active_year}, not in {year}"
            ))
            .into());
        }
    }
    Ok((active_year, today))
}

fn start_of(year: SchoolYear, config: &LedgerConfig) -> NaiveDate {
    NaiveDate::from_ymd_opt(year.start_year(), config.cutover_month, 15)
        .unwrap_or_else(|| NaiveDate::MIN)
}

/// Register a student the year before `active_year`, leave arrears, then reinscribe them.
pub(crate) fn walkthrough(
    config: LedgerConfig,
    active_year: SchoolYear,
    today: NaiveDate,
    tuition: Amount,
) -> Result<DemoSummary, AppError> {
    let previous_year = active_year.previous();
    let previous_day = start_of(previous_year, &config);
    let clock = Arc::new(ManualClock::on(previous_day));
    let grades = Arc::new(MemoryGradeBook::new());
    let ledger: DemoLedger = SchoolLedgerService::with_clock(
        Arc::new(MemoryLedgerStore::new()),
        grades.clone(),
        config,
        clock.clone() as Arc<dyn Clock>,
    );
    let secretary = UserId::new("secretary");
    let director = UserId::new("director");

    let fifth = open_class(&ledger, "5ème A", "5ème", previous_year, tuition)?;
    let registered = ledger.register_onsite(OnsiteRegistration {
        student: StudentIdentity {
            first_name: "Awa".to_string(),
            last_name: "Kouassi".to_string(),
            birth_date: NaiveDate::from_ymd_opt(previous_year.start_year() - 12, 3, 14),
            birth_place: Some("Abidjan".to_string()),
        },
        parent: ParentContact {
            father_name: Some("Koffi Kouassi".to_string()),
            phone: Some("+225 07 00 00 00".to_string()),
            ..ParentContact::default()
        },
        class_offering_id: fifth.id.clone(),
        first_payment: PaymentInput {
            amount: tuition / 3,
            method: PaymentMethod::Cash,
        },
        recorded_by: secretary.clone(),
    })?;
    let student = registered.student;

    let sibling = ledger.resolve_or_create_discount_type(
        "Sibling reduction",
        Some(DiscountValue::Percentage(Decimal::TEN)),
    )?;
    let granted = ledger.grant_discount(DiscountGrant {
        student_id: student.id.clone(),
        discount_type_id: sibling,
        value: DiscountValue::Percentage(Decimal::TEN),
        reason: "Older brother enrolled in 3ème".to_string(),
        start_date: previous_day,
        end_date: None,
        school_year: previous_year,
        requested_by: secretary.clone(),
    })?;
    ledger.approve_discount(&granted.id, &director)?;
    ledger.record_payment(PaymentRequest {
        student_id: student.id.clone(),
        school_year: previous_year,
        amount: tuition / 3,
        method: PaymentMethod::MobileMoney,
        recorded_by: secretary.clone(),
    })?;
    grades
        .record(AnnualAverage {
            student_id: student.id.clone(),
            school_year: previous_year,
            average: 12.5,
            rank: Some(7),
            class_size: Some(42),
        })
        .map_err(LedgerError::from)?;
    let balance_before_rollover = ledger.balance_of(&student.id, previous_year)?;

    clock.set(today);
    let fourth = open_class(&ledger, "4ème A", "4ème", active_year, tuition + 10_000)?;
    let reinscription = |reliquat: Amount| Reinscription {
        school_year: Some(active_year),
        class_offering_id: fourth.id.clone(),
        first_payment: PaymentInput {
            amount: tuition / 4,
            method: PaymentMethod::Cash,
        },
        reliquat_payment: Some(PaymentInput {
            amount: reliquat,
            method: PaymentMethod::Cash,
        }),
        annual_average: None,
        parent: None,
        recorded_by: secretary.clone(),
    };

    let owed = balance_before_rollover.remaining;
    let blocked_reinscription = match ledger.reinscribe(&student.id, reinscription(owed / 2)) {
        Err(err @ LedgerError::BlockedByArrears { .. }) => err.to_string(),
        Err(err) => return Err(err.into()),
        Ok(_) => {
            return Err(LedgerError::invalid_state(
                "reinscription went through with arrears outstanding",
            )
            .into())
        }
    };
    let outcome = ledger.reinscribe(&student.id, reinscription(owed))?;

    Ok(DemoSummary {
        student: student.full_name(),
        registration_number: student.registration_number.clone(),
        previous_year,
        active_year,
        balance_before_rollover,
        blocked_reinscription,
        settlement: owed,
        promoted_to: outcome.target_level,
        admitted: outcome.admitted,
        statement: ledger.student_statement(&student.id)?,
        statistics: ledger.year_statistics(active_year)?,
    })
}

fn open_class(
    ledger: &DemoLedger,
    name: &str,
    level: &str,
    school_year: SchoolYear,
    tuition: Amount,
) -> Result<ClassOffering, LedgerError> {
    ledger.create_or_update_class_offering(ClassOfferingDraft {
        id: None,
        name: name.to_string(),
        level: GradeLevel::new(level),
        school_year,
        tuition_amount: tuition,
        principal_teacher: None,
    })
}

fn render_balance(label: &str, balance: &Balance) {
    println!(
        "- {label}: due {} | discount {} | paid {} | remaining {}{}",
        balance.total_due,
        balance.total_discount,
        balance.total_paid,
        balance.remaining,
        if balance.is_settled { " (settled)" } else { "" }
    );
}

fn render_summary(summary: &DemoSummary) {
    println!("School ledger walk-through");
    println!(
        "{} ({}) registered on site for {}",
        summary.student, summary.registration_number, summary.previous_year
    );
    render_balance(
        &format!("{} before rollover", summary.previous_year),
        &summary.balance_before_rollover,
    );

    println!("\nReinscription for {}", summary.active_year);
    println!("- first attempt refused: {}", summary.blocked_reinscription);
    println!("- arrears settled with {}", summary.settlement);
    println!(
        "- {} to {}",
        if summary.admitted {
            "promoted"
        } else {
            "repeating"
        },
        summary.promoted_to
    );

    println!("\nStatement ({:?})", summary.statement.state);
    for year in &summary.statement.years {
        let class = year.class_name.as_deref().unwrap_or("no class");
        render_balance(&format!("{} {class}", year.school_year), &year.balance);
    }
    println!("- total remaining: {}", summary.statement.total_remaining);

    let statistics = &summary.statistics;
    println!(
        "\n{}: {} enrolled, {} settled, {} collected of {} due",
        statistics.school_year,
        statistics.enrolled,
        statistics.settled,
        statistics.total_paid,
        statistics.total_due - statistics.total_discount
    );
}
