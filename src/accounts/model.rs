//! Profile and role-extension data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Marketplace role of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Importer,
    Exporter,
    Admin,
}

impl Role {
    /// Roles a user may pick for themselves (signup form, OAuth link,
    /// role selector). `admin` is only ever granted out of band.
    pub fn is_self_assignable(&self) -> bool {
        !matches!(self, Self::Admin)
    }

    /// Parse a role that came from user-controlled input. Unknown values and
    /// `admin` yield `None`, which callers treat as "no signal".
    pub fn parse_untrusted(raw: &str) -> Option<Self> {
        raw.parse::<Role>().ok().filter(Role::is_self_assignable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Importer => "importer",
            Self::Exporter => "exporter",
            Self::Admin => "admin",
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Self::Importer
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "importer" => Ok(Self::Importer),
            "exporter" => Ok(Self::Exporter),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Moderation status of a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileStatus {
    Pending,
    Active,
    Suspended,
}

impl Default for ProfileStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl ProfileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Suspended => "suspended",
        }
    }
}

impl std::fmt::Display for ProfileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProfileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            other => Err(format!("unknown profile status '{other}'")),
        }
    }
}

/// Application-level record for an account. Keyed by the account id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub status: ProfileStatus,
    /// Authoritative "account is ready" flag.
    pub onboarding_completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for `profiles`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProfile {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub status: ProfileStatus,
    pub onboarding_completed: bool,
}

impl NewProfile {
    /// A freshly provisioned profile: not onboarded, pending moderation.
    pub fn provisioned(id: Uuid, email: impl Into<String>, role: Role) -> Self {
        Self {
            id,
            email: email.into(),
            role,
            status: ProfileStatus::Pending,
            onboarding_completed: false,
        }
    }
}

/// Partial update for `profiles`. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    pub role: Option<Role>,
    pub onboarding_completed: Option<bool>,
}

impl ProfileUpdate {
    pub fn role(role: Role) -> Self {
        Self {
            role: Some(role),
            ..Default::default()
        }
    }

    pub fn onboarding_completed() -> Self {
        Self {
            onboarding_completed: Some(true),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.role.is_none() && self.onboarding_completed.is_none()
    }
}

/// Exporter business details, created once when exporter onboarding completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExporterProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub company_name: String,
    pub country: String,
    pub city: String,
    pub products: Vec<String>,
    pub moq: u32,
    pub moq_unit: String,
    pub certifications: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Importer business details, created once when importer onboarding completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImporterProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub company_name: String,
    pub country: String,
    pub city: String,
    pub interested_categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for `exporter_profiles`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExporterProfile {
    pub user_id: Uuid,
    pub company_name: String,
    pub country: String,
    pub city: String,
    pub products: Vec<String>,
    pub moq: u32,
    pub moq_unit: String,
    pub certifications: Vec<String>,
    pub description: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
}

/// Insert payload for `importer_profiles`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewImporterProfile {
    pub user_id: Uuid,
    pub company_name: String,
    pub country: String,
    pub city: String,
    pub interested_categories: Vec<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
}

/// The role-specific extension row of an account, if any.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoleExtension {
    Exporter(ExporterProfile),
    Importer(ImporterProfile),
}
