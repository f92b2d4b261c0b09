//! Route surface and the single post-authentication redirect policy.

use serde::Serialize;

use super::model::{Profile, Role};
use super::state::AccountState;

/// Pages the lifecycle controller and route guard redirect between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Login,
    Signup,
    AdminLogin,
    Onboarding,
    OnboardingExporter,
    OnboardingImporter,
    Dashboard,
    DashboardExporter,
    DashboardImporter,
    AdminDashboard,
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Self::Login => "/login",
            Self::Signup => "/signup",
            Self::AdminLogin => "/admin/login",
            Self::Onboarding => "/onboarding",
            Self::OnboardingExporter => "/onboarding/exporter",
            Self::OnboardingImporter => "/onboarding/importer",
            Self::Dashboard => "/dashboard",
            Self::DashboardExporter => "/dashboard/exporter",
            Self::DashboardImporter => "/dashboard/importer",
            Self::AdminDashboard => "/admin/dashboard",
        }
    }

    /// The onboarding form for a role. Admins never onboard.
    pub fn onboarding_for(role: Role) -> Self {
        match role {
            Role::Exporter => Self::OnboardingExporter,
            Role::Importer => Self::OnboardingImporter,
            Role::Admin => Self::AdminDashboard,
        }
    }

    /// The landing page of a ready account.
    pub fn dashboard_for(role: Role) -> Self {
        match role {
            Role::Exporter => Self::DashboardExporter,
            Role::Importer => Self::DashboardImporter,
            Role::Admin => Self::AdminDashboard,
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}

/// Where an authenticated account with this profile belongs.
///
/// Priority: admin first (an admin profile is always complete), then
/// onboarding-incomplete, then the role dashboard.
pub fn resolve_destination(profile: &Profile) -> Route {
    AccountState::for_profile(profile).destination()
}
