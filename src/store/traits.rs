//! `ProfileStore`: the async interface for account persistence.

use async_trait::async_trait;
use uuid::Uuid;

use crate::accounts::model::{
    ExporterProfile, ImporterProfile, NewExporterProfile, NewImporterProfile, NewProfile,
    Profile, ProfileUpdate, Role, RoleExtension,
};
use crate::error::DatabaseError;

/// Headline numbers for the admin dashboard.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct AdminStats {
    pub total_users: u64,
    pub verified_exporters: u64,
    pub pending_exporters: u64,
    pub recent_pending: Vec<ExporterProfile>,
}

/// Backend-agnostic store for profiles and role-extension rows.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    // ── Profiles ────────────────────────────────────────────────────

    /// Get the profile for an account id.
    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, DatabaseError>;

    /// Insert a profile. A profile already present for the id is a
    /// `DatabaseError::Constraint`.
    async fn insert_profile(&self, profile: &NewProfile) -> Result<(), DatabaseError>;

    /// Apply a partial update. Missing profile is `DatabaseError::NotFound`.
    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<(), DatabaseError>;

    /// List profiles, newest first, up to `limit`.
    async fn list_profiles(&self, limit: usize) -> Result<Vec<Profile>, DatabaseError>;

    /// Total number of profiles.
    async fn count_profiles(&self) -> Result<u64, DatabaseError>;

    // ── Exporter extension ──────────────────────────────────────────

    async fn get_exporter_profile(
        &self,
        user_id: Uuid,
    ) -> Result<Option<ExporterProfile>, DatabaseError>;

    /// Insert the exporter extension row. One per account.
    async fn insert_exporter_profile(
        &self,
        profile: &NewExporterProfile,
    ) -> Result<ExporterProfile, DatabaseError>;

    /// Count exporter rows with the given verification flag.
    async fn count_exporters(&self, verified: bool) -> Result<u64, DatabaseError>;

    /// Exporter rows with the given verification flag, newest first.
    async fn list_exporters(
        &self,
        verified: bool,
        limit: usize,
    ) -> Result<Vec<ExporterProfile>, DatabaseError>;

    /// Flip an exporter row's `verified` flag. Returns the new value.
    async fn toggle_exporter_verified(&self, id: Uuid) -> Result<bool, DatabaseError>;

    // ── Importer extension ──────────────────────────────────────────

    async fn get_importer_profile(
        &self,
        user_id: Uuid,
    ) -> Result<Option<ImporterProfile>, DatabaseError>;

    /// Insert the importer extension row. One per account.
    async fn insert_importer_profile(
        &self,
        profile: &NewImporterProfile,
    ) -> Result<ImporterProfile, DatabaseError>;

    // ── Derived ─────────────────────────────────────────────────────

    /// The extension row matching `role`, if it exists.
    async fn get_role_extension(
        &self,
        user_id: Uuid,
        role: Role,
    ) -> Result<Option<RoleExtension>, DatabaseError> {
        Ok(match role {
            Role::Exporter => self
                .get_exporter_profile(user_id)
                .await?
                .map(RoleExtension::Exporter),
            Role::Importer => self
                .get_importer_profile(user_id)
                .await?
                .map(RoleExtension::Importer),
            Role::Admin => None,
        })
    }

    /// Whether any extension row exists for the account.
    async fn has_role_extension(&self, user_id: Uuid) -> Result<bool, DatabaseError> {
        let (exporter, importer) = tokio::try_join!(
            self.get_exporter_profile(user_id),
            self.get_importer_profile(user_id)
        )?;
        Ok(exporter.is_some() || importer.is_some())
    }

    /// Admin dashboard numbers. Independent reads are issued concurrently.
    async fn admin_stats(&self, recent_limit: usize) -> Result<AdminStats, DatabaseError> {
        let (total_users, verified_exporters, pending_exporters, recent_pending) = tokio::try_join!(
            self.count_profiles(),
            self.count_exporters(true),
            self.count_exporters(false),
            self.list_exporters(false, recent_limit)
        )?;
        Ok(AdminStats {
            total_users,
            verified_exporters,
            pending_exporters,
            recent_pending,
        })
    }
}
