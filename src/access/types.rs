use serde::{Deserialize, Serialize};
use std::fmt;

/// Content kinds the catalog can hold. Every entity reference names one of
/// these plus an id; together they address at most one product record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    File,
    Game,
    Workshop,
    Course,
    Tool,
    LessonPlan,
    Bundle,
}

impl EntityKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(EntityKind::File),
            "game" => Some(EntityKind::Game),
            "workshop" => Some(EntityKind::Workshop),
            "course" => Some(EntityKind::Course),
            "tool" => Some(EntityKind::Tool),
            "lesson_plan" => Some(EntityKind::LessonPlan),
            "bundle" => Some(EntityKind::Bundle),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::File => "file",
            EntityKind::Game => "game",
            EntityKind::Workshop => "workshop",
            EntityKind::Course => "course",
            EntityKind::Tool => "tool",
            EntityKind::LessonPlan => "lesson_plan",
            EntityKind::Bundle => "bundle",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Platform roles, ordered here from most to least privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Sysadmin,
    Teacher,
    Student,
    Guest,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Role::Admin),
            "sysadmin" => Some(Role::Sysadmin),
            "teacher" => Some(Role::Teacher),
            "student" => Some(Role::Student),
            "guest" => Some(Role::Guest),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Sysadmin => "sysadmin",
            Role::Teacher => "teacher",
            Role::Student => "student",
            Role::Guest => "guest",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The actor an access check runs for. Built per request from the session
/// (or a verified token) and never stored.
#[derive(Debug, Clone)]
pub struct Subject {
    pub id: String,
    pub role: Role,
    /// Teacher the subject is linked to, when the caller already knows it.
    /// Left `None`, the resolver looks the link up itself for students.
    pub teacher_link_id: Option<String>,
}

impl Subject {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            teacher_link_id: None,
        }
    }

    /// An unauthenticated caller.
    pub fn guest() -> Self {
        Self {
            id: String::new(),
            role: Role::Guest,
            teacher_link_id: None,
        }
    }
}

/// A typed reference to one piece of content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Which rule granted (or denied) access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    Creator,
    Purchase,
    SubscriptionClaim,
    StudentViaTeacher,
    None,
}

/// A slot count that may be the `"unlimited"` sentinel. Serializes as a bare
/// number or the string `"unlimited"`; storage encodes unlimited as -1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allowance {
    Limited(i64),
    Unlimited,
}

impl Allowance {
    pub fn from_limit(limit: i64) -> Self {
        if limit < 0 {
            Allowance::Unlimited
        } else {
            Allowance::Limited(limit)
        }
    }
}

impl Serialize for Allowance {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Allowance::Limited(n) => serializer.serialize_i64(*n),
            Allowance::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}

impl<'de> Deserialize<'de> for Allowance {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Allowance::Limited)
                .ok_or_else(|| D::Error::custom("allowance must be an integer")),
            serde_json::Value::String(s) if s == "unlimited" => Ok(Allowance::Unlimited),
            _ => Err(D::Error::custom(
                "allowance must be an integer or \"unlimited\"",
            )),
        }
    }
}

/// The resolver's verdict for one (subject, entity) pair. Computed fresh on
/// every request; purchases and claims can change at any moment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessDecision {
    pub has_access: bool,
    pub access_type: AccessType,
    pub can_download: bool,
    pub can_preview: bool,
    pub can_play: bool,
    pub remaining_allowance: Allowance,
    pub expires_at: Option<i64>,
    pub reason: String,
    /// Set when the reference resolved to no product record at all, so
    /// callers can tell "not a product" apart from "no entitlement".
    pub entity_not_product: bool,
}

impl AccessDecision {
    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            has_access: false,
            access_type: AccessType::None,
            can_download: false,
            can_preview: false,
            can_play: false,
            remaining_allowance: Allowance::Limited(0),
            expires_at: None,
            reason: reason.into(),
            entity_not_product: false,
        }
    }

    pub fn not_a_product(entity: &EntityRef) -> Self {
        let mut decision = Self::denied(format!("no product record for {entity}"));
        decision.entity_not_product = true;
        decision
    }
}

/// Snapshot of one monthly allowance bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowanceStatus {
    pub month_year: String,
    pub product_type: String,
    pub limit: Allowance,
    pub used: i64,
    pub remaining: Allowance,
}
