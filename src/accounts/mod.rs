//! Account lifecycle: profiles, the state machine, routing, and the
//! controller that drives them.

pub mod controller;
pub mod model;
pub mod onboarding;
pub mod routing;
pub mod state;

pub use controller::{
    CallbackOutcome, LifecycleController, PageAccess, ResolvedAccount, SignupOutcome,
    SignupRequest,
};
pub use model::{Profile, ProfileStatus, Role};
pub use routing::{Route, resolve_destination};
pub use state::AccountState;
