//! libSQL implementation of `ProfileStore`.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::accounts::model::{
    ExporterProfile, ImporterProfile, NewExporterProfile, NewImporterProfile, NewProfile,
    Profile, ProfileStatus, ProfileUpdate, Role,
};
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::ProfileStore;

const PROFILE_COLUMNS: &str =
    "id, email, role, status, onboarding_completed, created_at, updated_at";

const EXPORTER_COLUMNS: &str = "id, user_id, company_name, country, city, products, moq, \
     moq_unit, certifications, description, phone, website, verified, created_at, updated_at";

const IMPORTER_COLUMNS: &str = "id, user_id, company_name, country, city, \
     interested_categories, phone, website, created_at, updated_at";

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(backend.conn()).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests and local development).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(backend.conn()).await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn count(&self, op: &str, sql: &str, args: impl libsql::params::IntoParams) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, args)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => {
                let n: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("{op} row parse: {e}")))?;
                Ok(n.max(0) as u64)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn to_json_list(op: &str, items: &[String]) -> Result<String, DatabaseError> {
    serde_json::to_string(items).map_err(|e| DatabaseError::Serialization(format!("{op}: {e}")))
}

fn from_json_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn parse_uuid(op: &str, raw: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(raw).map_err(|e| DatabaseError::Serialization(format!("{op}: bad id '{raw}': {e}")))
}

/// Unique/primary-key violations become `Constraint` so callers can tell
/// "already exists" apart from a failed write.
/// `LIMIT` bound that cannot wrap negative; SQLite reads a negative limit
/// as "no limit".
fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn write_error(op: &str, e: libsql::Error) -> DatabaseError {
    let message = e.to_string();
    if message.contains("UNIQUE constraint failed") || message.contains("PRIMARY KEY") {
        DatabaseError::Constraint(format!("{op}: {message}"))
    } else {
        DatabaseError::Query(format!("{op}: {message}"))
    }
}

/// Map a libsql Row to a Profile. Column order matches PROFILE_COLUMNS.
fn row_to_profile(row: &libsql::Row) -> Result<Profile, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("profile row parse: {e}"));
    let id: String = row.get(0).map_err(parse)?;
    let email: String = row.get(1).map_err(parse)?;
    let role: String = row.get(2).map_err(parse)?;
    let status: String = row.get(3).map_err(parse)?;
    let onboarding_completed: i64 = row.get(4).map_err(parse)?;
    let created_at: String = row.get(5).map_err(parse)?;
    let updated_at: String = row.get(6).map_err(parse)?;

    Ok(Profile {
        id: parse_uuid("profile", &id)?,
        email,
        role: role.parse::<Role>().map_err(DatabaseError::Serialization)?,
        status: status
            .parse::<ProfileStatus>()
            .map_err(DatabaseError::Serialization)?,
        onboarding_completed: onboarding_completed != 0,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

/// Map a libsql Row to an ExporterProfile. Column order matches EXPORTER_COLUMNS.
fn row_to_exporter(row: &libsql::Row) -> Result<ExporterProfile, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("exporter row parse: {e}"));
    let id: String = row.get(0).map_err(parse)?;
    let user_id: String = row.get(1).map_err(parse)?;
    let moq: i64 = row.get(6).map_err(parse)?;
    let verified: i64 = row.get(12).map_err(parse)?;
    let products: String = row.get(5).map_err(parse)?;
    let certifications: String = row.get(8).map_err(parse)?;
    let created_at: String = row.get(13).map_err(parse)?;
    let updated_at: String = row.get(14).map_err(parse)?;

    Ok(ExporterProfile {
        id: parse_uuid("exporter", &id)?,
        user_id: parse_uuid("exporter", &user_id)?,
        company_name: row.get(2).map_err(parse)?,
        country: row.get(3).map_err(parse)?,
        city: row.get(4).map_err(parse)?,
        products: from_json_list(&products),
        moq: u32::try_from(moq).unwrap_or(0),
        moq_unit: row.get(7).map_err(parse)?,
        certifications: from_json_list(&certifications),
        description: row.get::<String>(9).ok(),
        phone: row.get::<String>(10).ok(),
        website: row.get::<String>(11).ok(),
        verified: verified != 0,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

/// Map a libsql Row to an ImporterProfile. Column order matches IMPORTER_COLUMNS.
fn row_to_importer(row: &libsql::Row) -> Result<ImporterProfile, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("importer row parse: {e}"));
    let id: String = row.get(0).map_err(parse)?;
    let user_id: String = row.get(1).map_err(parse)?;
    let categories: String = row.get(5).map_err(parse)?;
    let created_at: String = row.get(8).map_err(parse)?;
    let updated_at: String = row.get(9).map_err(parse)?;

    Ok(ImporterProfile {
        id: parse_uuid("importer", &id)?,
        user_id: parse_uuid("importer", &user_id)?,
        company_name: row.get(2).map_err(parse)?,
        country: row.get(3).map_err(parse)?,
        city: row.get(4).map_err(parse)?,
        interested_categories: from_json_list(&categories),
        phone: row.get::<String>(6).ok(),
        website: row.get::<String>(7).ok(),
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

#[async_trait]
impl ProfileStore for LibSqlBackend {
    // ── Profiles ────────────────────────────────────────────────────

    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_profile: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_profile(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_profile: {e}"))),
        }
    }

    async fn insert_profile(&self, profile: &NewProfile) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO profiles (id, email, role, status, onboarding_completed, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    profile.id.to_string(),
                    profile.email.as_str(),
                    profile.role.as_str(),
                    profile.status.as_str(),
                    profile.onboarding_completed as i64,
                    now,
                ],
            )
            .await
            .map_err(|e| write_error("insert_profile", e))?;

        debug!(user_id = %profile.id, role = %profile.role, "Profile inserted");
        Ok(())
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<(), DatabaseError> {
        if update.is_empty() {
            return Ok(());
        }
        let now = Utc::now().to_rfc3339();
        let completed = match update.onboarding_completed {
            Some(flag) => libsql::Value::Integer(flag as i64),
            None => libsql::Value::Null,
        };
        let affected = self
            .conn()
            .execute(
                "UPDATE profiles SET
                    role = COALESCE(?1, role),
                    onboarding_completed = COALESCE(?2, onboarding_completed),
                    updated_at = ?3
                 WHERE id = ?4",
                params![
                    opt_text(update.role.as_ref().map(Role::as_str)),
                    completed,
                    now,
                    id.to_string(),
                ],
            )
            .await
            .map_err(|e| write_error("update_profile", e))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "profile".into(),
                id: id.to_string(),
            });
        }
        debug!(user_id = %id, update = ?update, "Profile updated");
        Ok(())
    }

    async fn list_profiles(&self, limit: usize) -> Result<Vec<Profile>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {PROFILE_COLUMNS} FROM profiles ORDER BY created_at DESC LIMIT ?1"),
                params![sql_limit(limit)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_profiles: {e}")))?;

        let mut profiles = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_profiles: {e}")))?
        {
            profiles.push(row_to_profile(&row)?);
        }
        Ok(profiles)
    }

    async fn count_profiles(&self) -> Result<u64, DatabaseError> {
        self.count("count_profiles", "SELECT COUNT(*) FROM profiles", ())
            .await
    }

    // ── Exporter extension ──────────────────────────────────────────

    async fn get_exporter_profile(
        &self,
        user_id: Uuid,
    ) -> Result<Option<ExporterProfile>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {EXPORTER_COLUMNS} FROM exporter_profiles WHERE user_id = ?1"),
                params![user_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_exporter_profile: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_exporter(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_exporter_profile: {e}"))),
        }
    }

    async fn insert_exporter_profile(
        &self,
        profile: &NewExporterProfile,
    ) -> Result<ExporterProfile, DatabaseError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO exporter_profiles ({EXPORTER_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0, ?13, ?13)"
                ),
                params![
                    id.to_string(),
                    profile.user_id.to_string(),
                    profile.company_name.as_str(),
                    profile.country.as_str(),
                    profile.city.as_str(),
                    to_json_list("insert_exporter_profile", &profile.products)?,
                    profile.moq as i64,
                    profile.moq_unit.as_str(),
                    to_json_list("insert_exporter_profile", &profile.certifications)?,
                    opt_text(profile.description.as_deref()),
                    opt_text(profile.phone.as_deref()),
                    opt_text(profile.website.as_deref()),
                    now.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_error("insert_exporter_profile", e))?;

        debug!(user_id = %profile.user_id, "Exporter profile inserted");
        Ok(ExporterProfile {
            id,
            user_id: profile.user_id,
            company_name: profile.company_name.clone(),
            country: profile.country.clone(),
            city: profile.city.clone(),
            products: profile.products.clone(),
            moq: profile.moq,
            moq_unit: profile.moq_unit.clone(),
            certifications: profile.certifications.clone(),
            description: profile.description.clone(),
            phone: profile.phone.clone(),
            website: profile.website.clone(),
            verified: false,
            created_at: now,
            updated_at: now,
        })
    }

    async fn count_exporters(&self, verified: bool) -> Result<u64, DatabaseError> {
        self.count(
            "count_exporters",
            "SELECT COUNT(*) FROM exporter_profiles WHERE verified = ?1",
            params![verified as i64],
        )
        .await
    }

    async fn list_exporters(
        &self,
        verified: bool,
        limit: usize,
    ) -> Result<Vec<ExporterProfile>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EXPORTER_COLUMNS} FROM exporter_profiles
                     WHERE verified = ?1 ORDER BY created_at DESC LIMIT ?2"
                ),
                params![verified as i64, sql_limit(limit)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_exporters: {e}")))?;

        let mut exporters = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_exporters: {e}")))?
        {
            exporters.push(row_to_exporter(&row)?);
        }
        Ok(exporters)
    }

    async fn toggle_exporter_verified(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn()
            .execute(
                "UPDATE exporter_profiles SET verified = 1 - verified, updated_at = ?1 WHERE id = ?2",
                params![now, id.to_string()],
            )
            .await
            .map_err(|e| write_error("toggle_exporter_verified", e))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "exporter_profile".into(),
                id: id.to_string(),
            });
        }

        let verified = self
            .count(
                "toggle_exporter_verified",
                "SELECT verified FROM exporter_profiles WHERE id = ?1",
                params![id.to_string()],
            )
            .await?
            != 0;
        info!(exporter_id = %id, verified, "Exporter verification toggled");
        Ok(verified)
    }

    // ── Importer extension ──────────────────────────────────────────

    async fn get_importer_profile(
        &self,
        user_id: Uuid,
    ) -> Result<Option<ImporterProfile>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {IMPORTER_COLUMNS} FROM importer_profiles WHERE user_id = ?1"),
                params![user_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_importer_profile: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_importer(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_importer_profile: {e}"))),
        }
    }

    async fn insert_importer_profile(
        &self,
        profile: &NewImporterProfile,
    ) -> Result<ImporterProfile, DatabaseError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO importer_profiles ({IMPORTER_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)"
                ),
                params![
                    id.to_string(),
                    profile.user_id.to_string(),
                    profile.company_name.as_str(),
                    profile.country.as_str(),
                    profile.city.as_str(),
                    to_json_list("insert_importer_profile", &profile.interested_categories)?,
                    opt_text(profile.phone.as_deref()),
                    opt_text(profile.website.as_deref()),
                    now.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_error("insert_importer_profile", e))?;

        debug!(user_id = %profile.user_id, "Importer profile inserted");
        Ok(ImporterProfile {
            id,
            user_id: profile.user_id,
            company_name: profile.company_name.clone(),
            country: profile.country.clone(),
            city: profile.city.clone(),
            interested_categories: profile.interested_categories.clone(),
            phone: profile.phone.clone(),
            website: profile.website.clone(),
            created_at: now,
            updated_at: now,
        })
    }
}
