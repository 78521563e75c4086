use crate::access::types::Role;
use crate::errors::LudoraError;
use crate::storage;
use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Settings keys the gate reads.
pub mod keys {
    pub const STUDENTS_ACCESS_MODE: &str = "students_access_mode";
    pub const STUDENT_ONBOARDING_ENABLED: &str = "student_onboarding_enabled";
    pub const PARENT_CONSENT_REQUIRED: &str = "parent_consent_required";
}

/// How broadly the student surface is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    All,
    InviteOnly,
    AuthedOnly,
}

impl AccessMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(AccessMode::All),
            "invite_only" => Some(AccessMode::InviteOnly),
            "authed_only" => Some(AccessMode::AuthedOnly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::All => "all",
            AccessMode::InviteOnly => "invite_only",
            AccessMode::AuthedOnly => "authed_only",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Read access to gate-relevant settings. Backed by the settings table in
/// production, by fixtures in tests.
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, LudoraError>;
}

/// Provider reading the app_settings table.
pub struct DbSettingsProvider {
    db: DatabaseConnection,
}

impl DbSettingsProvider {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SettingsProvider for DbSettingsProvider {
    async fn get(&self, key: &str) -> Result<Option<Value>, LudoraError> {
        storage::get_app_setting(&self.db, key).await
    }
}

/// Request-scoped facts the gate can see about the caller.
#[derive(Debug, Clone, Default)]
pub struct GateContext {
    pub role: Option<Role>,
    pub is_authenticated: bool,
    pub has_invite_code: bool,
    pub has_lobby_code: bool,
}

/// What a denied (or conditionally allowed) caller still needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateRequirements {
    /// Ways in that would satisfy the current mode, for clients to render.
    pub needs_any_of: Vec<String>,
    pub onboarding_enabled: bool,
    pub parent_consent_required: bool,
}

impl GateRequirements {
    fn open() -> Self {
        Self {
            needs_any_of: Vec::new(),
            onboarding_enabled: true,
            parent_consent_required: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateDecision {
    pub access_allowed: bool,
    pub access_mode: AccessMode,
    pub requirements: GateRequirements,
}

/// Entry gate for the student surface.
///
/// Unlike the entitlement resolver, which refuses on any backend failure,
/// the gate falls back to `all`/allowed when its settings cannot be read:
/// locking an entire class out over a bad settings row is the worse failure.
#[derive(Clone)]
pub struct StudentAccessGate {
    settings: Arc<dyn SettingsProvider>,
}

impl StudentAccessGate {
    pub fn new(settings: Arc<dyn SettingsProvider>) -> Self {
        Self { settings }
    }

    /// Decide whether the caller may enter. Infallible by contract.
    pub async fn validate_access(&self, context: &GateContext) -> GateDecision {
        let mode = match self.settings.get(keys::STUDENTS_ACCESS_MODE).await {
            Ok(Some(value)) => value
                .as_str()
                .and_then(AccessMode::parse)
                .unwrap_or(AccessMode::All),
            Ok(None) => AccessMode::All,
            Err(e) => {
                tracing::warn!(error = %e, "settings lookup failed, student gate falling open");
                return GateDecision {
                    access_allowed: true,
                    access_mode: AccessMode::All,
                    requirements: GateRequirements::open(),
                };
            }
        };

        let onboarding_enabled = self.flag(keys::STUDENT_ONBOARDING_ENABLED, true).await;
        let parent_consent_required = self.flag(keys::PARENT_CONSENT_REQUIRED, false).await;

        // Staff are never gated out of the student surface
        let privileged = matches!(
            context.role,
            Some(Role::Admin) | Some(Role::Sysadmin) | Some(Role::Teacher)
        );

        let (access_allowed, needs_any_of) = match mode {
            AccessMode::All => (true, Vec::new()),
            AccessMode::InviteOnly => (
                privileged
                    || context.is_authenticated
                    || context.has_invite_code
                    || context.has_lobby_code,
                vec![
                    "invite_code".to_string(),
                    "lobby_code".to_string(),
                    "authentication".to_string(),
                ],
            ),
            AccessMode::AuthedOnly => (
                privileged || context.is_authenticated,
                vec!["authentication".to_string()],
            ),
        };

        GateDecision {
            access_allowed,
            access_mode: mode,
            requirements: GateRequirements {
                needs_any_of,
                onboarding_enabled,
                parent_consent_required,
            },
        }
    }

    async fn flag(&self, key: &str, default: bool) -> bool {
        match self.settings.get(key).await {
            Ok(Some(value)) => value.as_bool().unwrap_or(default),
            _ => default,
        }
    }
}
