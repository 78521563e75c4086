use crate::access::types::Role;
use std::collections::HashSet;

/// Administrative action identifiers, named at the routes that enforce them.
pub mod actions {
    pub const CONTENT_ACCESS: &str = "content_access";
    pub const ACCESS_GRANT: &str = "access_grant";
    pub const ACCESS_REVOKE: &str = "access_revoke";
    pub const ALLOWANCE_ADJUST: &str = "allowance_adjust";
    pub const TOKEN_ISSUE: &str = "token_issue";
    pub const JOB_VIEW: &str = "job_view";
    pub const JOB_TRIGGER: &str = "job_trigger";
    pub const PRODUCT_CREATE: &str = "product_create";
}

/// Whether `role` may perform the administrative `action`.
///
/// Admins always may. Sysadmins may unless the action appears in the
/// forbidden set, which ships empty and is only ever populated through
/// configuration. Every other role, never.
pub fn have_admin_access(role: Role, action: &str, forbidden_for_sysadmin: &HashSet<String>) -> bool {
    match role {
        Role::Admin => true,
        Role::Sysadmin => !forbidden_for_sysadmin.contains(action),
        Role::Teacher | Role::Student | Role::Guest => false,
    }
}
