use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::context::LedgerContext;
use super::domain::{Amount, ClassOffering, ClassOfferingId, GradeLevel, SchoolYear};
use super::error::LedgerError;
use super::repository::{LedgerBatch, LedgerRepository, LedgerWrite, RepositoryError};

/// Tuition for a level and year: the recorded rate, else whatever an existing class charges.
pub fn tuition_for<R>(
    repository: &R,
    level: &GradeLevel,
    school_year: SchoolYear,
) -> Result<Option<Amount>, RepositoryError>
where
    R: LedgerRepository,
{
    if let Some(rate) = repository.tuition_rate(level, school_year)? {
        return Ok(Some(rate));
    }

    Ok(repository
        .class_offerings(school_year)?
        .into_iter()
        .find(|offering| &offering.level == level)
        .map(|offering| offering.tuition_amount))
}

/// Create-or-update payload for a class offering; `id: None` creates a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassOfferingDraft {
    #[serde(default)]
    pub id: Option<ClassOfferingId>,
    pub name: String,
    pub level: GradeLevel,
    pub school_year: SchoolYear,
    #[serde(rename = "class_amount")]
    pub tuition_amount: Amount,
    #[serde(default)]
    pub principal_teacher: Option<String>,
}

/// Keeps every class of a level and year on one tuition amount.
pub struct TuitionPolicy<'a, R> {
    ctx: LedgerContext<'a, R>,
}

impl<'a, R> TuitionPolicy<'a, R>
where
    R: LedgerRepository,
{
    pub fn new(ctx: LedgerContext<'a, R>) -> Self {
        Self { ctx }
    }

    pub fn get_tuition(
        &self,
        level: &GradeLevel,
        school_year: SchoolYear,
    ) -> Result<Option<Amount>, LedgerError> {
        Ok(tuition_for(self.ctx.repository, level, school_year)?)
    }

    fn canonical_level(&self, level: &GradeLevel) -> Result<GradeLevel, LedgerError> {
        self.ctx.config.levels.canonical(level).ok_or_else(|| {
            LedgerError::validation(format!(
                "level {level} is not part of the configured level ladder"
            ))
        })
    }

    /// Tuition a class charges under the current policy.
    pub fn tuition_of(&self, offering: &ClassOffering) -> Result<Amount, LedgerError> {
        Ok(self
            .get_tuition(&offering.level, offering.school_year)?
            .unwrap_or(offering.tuition_amount))
    }

    pub fn set_tuition(
        &self,
        level: &GradeLevel,
        school_year: SchoolYear,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let level = &self.canonical_level(level)?;
        if amount < 0 {
            return Err(LedgerError::validation(format!(
                "tuition for {level} in {school_year} cannot be negative (got {amount})"
            )));
        }

        let conflicting = self
            .ctx
            .repository
            .class_offerings(school_year)?
            .into_iter()
            .find(|offering| &offering.level == level && offering.tuition_amount != amount);

        if let Some(offering) = conflicting {
            warn!(
                %level,
                %school_year,
                existing = offering.tuition_amount,
                attempted = amount,
                "tuition change refused: classes already priced differently"
            );
            return Err(LedgerError::Conflict {
                level: level.clone(),
                school_year,
                existing: offering.tuition_amount,
                attempted: amount,
            });
        }

        self.ctx.repository.apply(
            LedgerWrite::SetTuitionRate {
                level: level.clone(),
                school_year,
                amount,
            }
            .into(),
        )?;

        info!(%level, %school_year, amount, "tuition rate recorded");
        Ok(())
    }

    /// Amount the draft would have to carry to be accepted, if it currently diverges.
    pub fn conflicting_amount(
        &self,
        draft: &ClassOfferingDraft,
    ) -> Result<Option<Amount>, LedgerError> {
        let siblings: Vec<ClassOffering> = self
            .ctx
            .repository
            .class_offerings(draft.school_year)?
            .into_iter()
            .filter(|offering| {
                offering.level == draft.level && Some(&offering.id) != draft.id.as_ref()
            })
            .collect();

        if let Some(sibling) = siblings.first() {
            if sibling.tuition_amount != draft.tuition_amount {
                return Ok(Some(sibling.tuition_amount));
            }
            return Ok(None);
        }

        if draft.id.is_some() {
            // The only class of its level may reprice the level.
            return Ok(None);
        }

        let rate = self
            .ctx
            .repository
            .tuition_rate(&draft.level, draft.school_year)?;
        Ok(rate.filter(|rate| *rate != draft.tuition_amount))
    }

    /// Level and year of a class are frozen once any enrollment points at it.
    fn ensure_unattended(&self, stored: &ClassOffering) -> Result<(), LedgerError> {
        let enrolled = self
            .ctx
            .repository
            .enrollments_for_year(stored.school_year)?
            .into_iter()
            .filter(|enrollment| enrollment.class_offering_id == stored.id)
            .count();
        if enrolled > 0 {
            return Err(LedgerError::invalid_state(format!(
                "class {} ({} {}) has {enrolled} enrollment(s) and keeps its level and year",
                stored.name, stored.level, stored.school_year
            )));
        }
        Ok(())
    }

    pub fn create_or_update_class_offering(
        &self,
        mut draft: ClassOfferingDraft,
    ) -> Result<ClassOffering, LedgerError> {
        draft.level = self.canonical_level(&draft.level)?;
        if draft.name.trim().is_empty() {
            return Err(LedgerError::validation("class name is required"));
        }
        if draft.tuition_amount < 0 {
            return Err(LedgerError::validation(format!(
                "class tuition cannot be negative (got {})",
                draft.tuition_amount
            )));
        }
        if let Some(id) = &draft.id {
            let stored = self.ctx.class_offering(id)?;
            if stored.level != draft.level || stored.school_year != draft.school_year {
                self.ensure_unattended(&stored)?;
            }
        }

        if let Some(existing) = self.conflicting_amount(&draft)? {
            warn!(
                level = %draft.level,
                school_year = %draft.school_year,
                existing,
                attempted = draft.tuition_amount,
                "class offering refused: tuition diverges from its level"
            );
            return Err(LedgerError::Conflict {
                level: draft.level,
                school_year: draft.school_year,
                existing,
                attempted: draft.tuition_amount,
            });
        }

        let ClassOfferingDraft {
            id,
            name,
            level,
            school_year,
            tuition_amount,
            principal_teacher,
        } = draft;

        let offering = ClassOffering {
            id: id.unwrap_or_else(|| self.ctx.ids.next_class_offering_id()),
            name: name.trim().to_string(),
            level: level.clone(),
            school_year,
            tuition_amount,
            principal_teacher,
        };

        self.ctx.repository.apply(
            LedgerBatch::new()
                .with(LedgerWrite::SaveClassOffering(offering.clone()))
                .with(LedgerWrite::SetTuitionRate {
                    level,
                    school_year,
                    amount: tuition_amount,
                }),
        )?;

        info!(
            class_offering_id = %offering.id,
            level = %offering.level,
            school_year = %offering.school_year,
            tuition = offering.tuition_amount,
            "class offering saved"
        );
        Ok(offering)
    }

    pub fn class_offerings(
        &self,
        school_year: SchoolYear,
    ) -> Result<Vec<ClassOffering>, LedgerError> {
        let mut offerings = self.ctx.repository.class_offerings(school_year)?;
        offerings.sort_by(|left, right| {
            left.level
                .cmp(&right.level)
                .then_with(|| left.name.cmp(&right.name))
        });
        Ok(offerings)
    }
}
