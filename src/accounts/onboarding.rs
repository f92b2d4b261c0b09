//! Onboarding form payloads.
//!
//! Forms arrive as flat strings from the browser. `validate` turns them into
//! insert payloads for the role-extension tables or a user-facing message.

use serde::Deserialize;
use uuid::Uuid;

use super::model::{NewExporterProfile, NewImporterProfile, Role};
use crate::error::LifecycleError;

const DEFAULT_EXPORTER_COUNTRY: &str = "India";
const DEFAULT_MOQ_UNIT: &str = "pieces";

/// Exporter business details.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExporterOnboardingForm {
    pub company_name: String,
    pub country: String,
    pub city: String,
    /// Comma-separated.
    pub products: String,
    pub moq: String,
    pub moq_unit: String,
    /// Comma-separated.
    pub certifications: String,
    pub description: String,
    pub phone: String,
    pub website: String,
}

impl ExporterOnboardingForm {
    pub fn validate(&self, user_id: Uuid) -> Result<NewExporterProfile, LifecycleError> {
        let company_name = required(&self.company_name, "Company name is required")?;
        let city = required(&self.city, "City is required")?;
        let products = split_list(&self.products);
        if products.is_empty() {
            return Err(LifecycleError::Validation("List at least one product".into()));
        }
        let moq = self
            .moq
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|moq| *moq > 0)
            .ok_or_else(|| {
                LifecycleError::Validation(
                    "Minimum order quantity must be a positive whole number".into(),
                )
            })?;

        Ok(NewExporterProfile {
            user_id,
            company_name,
            country: optional(&self.country).unwrap_or_else(|| DEFAULT_EXPORTER_COUNTRY.into()),
            city,
            products,
            moq,
            moq_unit: optional(&self.moq_unit).unwrap_or_else(|| DEFAULT_MOQ_UNIT.into()),
            certifications: split_list(&self.certifications),
            description: optional(&self.description),
            phone: optional(&self.phone),
            website: optional(&self.website),
        })
    }
}

/// Importer business details.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImporterOnboardingForm {
    pub company_name: String,
    pub country: String,
    pub city: String,
    /// Comma-separated.
    pub interested_categories: String,
    pub phone: String,
    pub website: String,
}

impl ImporterOnboardingForm {
    pub fn validate(&self, user_id: Uuid) -> Result<NewImporterProfile, LifecycleError> {
        Ok(NewImporterProfile {
            user_id,
            company_name: required(&self.company_name, "Company name is required")?,
            country: required(&self.country, "Country is required")?,
            city: required(&self.city, "City is required")?,
            interested_categories: split_list(&self.interested_categories),
            phone: optional(&self.phone),
            website: optional(&self.website),
        })
    }
}

/// A submitted onboarding form, tagged by the role it onboards.
#[derive(Debug, Clone)]
pub enum OnboardingSubmission {
    Exporter(ExporterOnboardingForm),
    Importer(ImporterOnboardingForm),
}

impl OnboardingSubmission {
    pub fn role(&self) -> Role {
        match self {
            Self::Exporter(_) => Role::Exporter,
            Self::Importer(_) => Role::Importer,
        }
    }
}

fn required(raw: &str, message: &str) -> Result<String, LifecycleError> {
    optional(raw).ok_or_else(|| LifecycleError::Validation(message.to_string()))
}

fn optional(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}
