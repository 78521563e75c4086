use crate::access::types::{AccessDecision, AccessType, Allowance, EntityRef, Role, Subject};
use crate::access::{admin, ledger, AccessPolicy};
use crate::entities;
use crate::errors::LudoraError;
use crate::storage;
use chrono::Utc;
use sea_orm::DatabaseConnection;

enum Entitlement {
    Granted(Grant),
    /// Had a completed purchase once, but its access window closed.
    ExpiredPurchase { expired_at: i64 },
    NotEntitled,
}

struct Grant {
    access_type: AccessType,
    can_download: bool,
    remaining_allowance: Allowance,
    expires_at: Option<i64>,
    reason: String,
}

impl Grant {
    fn into_decision(self) -> AccessDecision {
        AccessDecision {
            has_access: true,
            access_type: self.access_type,
            can_download: self.can_download,
            can_preview: true,
            can_play: true,
            remaining_allowance: self.remaining_allowance,
            expires_at: self.expires_at,
            reason: self.reason,
            entity_not_product: false,
        }
    }
}

/// Resolve what `subject` may do with `entity`.
///
/// Precedence, first match wins: admin override, ownership, purchase,
/// subscription claim, then one delegation hop from a student to their
/// linked teacher. Backend failures propagate to the caller; unlike the
/// student gate, this path fails closed.
pub async fn resolve_access(
    db: &DatabaseConnection,
    policy: &AccessPolicy,
    subject: &Subject,
    entity: &EntityRef,
) -> Result<AccessDecision, LudoraError> {
    // Privileged roles bypass the catalog entirely, orphaned products
    // included. Capability-equivalent to a creator grant; the reason string
    // keeps the two apart in logs.
    if admin::have_admin_access(
        subject.role,
        admin::actions::CONTENT_ACCESS,
        &policy.sysadmin_forbidden_actions,
    ) {
        tracing::debug!(subject = %subject.id, entity = %entity, "access resolved through admin override");
        return Ok(Grant {
            access_type: AccessType::Creator,
            can_download: true,
            remaining_allowance: Allowance::Unlimited,
            expires_at: None,
            reason: "administrative override".to_string(),
        }
        .into_decision());
    }

    let Some(product) = storage::get_product(db, entity.kind.as_str(), &entity.id).await? else {
        tracing::debug!(subject = %subject.id, entity = %entity, "access check against non-product entity");
        return Ok(AccessDecision::not_a_product(entity));
    };

    let verdict = match entitled(db, policy, subject, &product).await? {
        Entitlement::Granted(grant) => grant.into_decision(),
        miss => {
            // One hop only: the delegated evaluation below never delegates
            // again, so student chains stop at the first linked teacher.
            let mut delegated = None;
            if subject.role == Role::Student {
                if let Some(teacher) = linked_teacher(db, subject).await? {
                    if let Entitlement::Granted(grant) =
                        entitled(db, policy, &teacher, &product).await?
                    {
                        delegated = Some(
                            Grant {
                                access_type: AccessType::StudentViaTeacher,
                                can_download: false,
                                remaining_allowance: grant.remaining_allowance,
                                expires_at: grant.expires_at,
                                reason: "granted through linked teacher".to_string(),
                            }
                            .into_decision(),
                        );
                    }
                }
            }

            match (delegated, miss) {
                (Some(decision), _) => decision,
                (None, Entitlement::ExpiredPurchase { expired_at }) => {
                    let mut decision = AccessDecision::denied("purchase expired");
                    decision.expires_at = Some(expired_at);
                    decision
                }
                (None, _) => AccessDecision::denied("no purchase or claim found"),
            }
        }
    };

    tracing::debug!(
        subject = %subject.id,
        entity = %entity,
        has_access = verdict.has_access,
        access_type = ?verdict.access_type,
        "access resolved"
    );
    Ok(verdict)
}

/// Ownership, purchase, subscription claim, in that order. Delegation lives
/// in `resolve_access` so a delegated evaluation cannot recurse.
async fn entitled(
    db: &DatabaseConnection,
    policy: &AccessPolicy,
    subject: &Subject,
    product: &entities::product::Model,
) -> Result<Entitlement, LudoraError> {
    if product.creator_user_id.as_deref() == Some(subject.id.as_str()) {
        return Ok(Entitlement::Granted(Grant {
            access_type: AccessType::Creator,
            can_download: true,
            remaining_allowance: Allowance::Unlimited,
            expires_at: None,
            reason: "created by subject".to_string(),
        }));
    }

    // An expired purchase does not short-circuit: a later rule may still
    // grant, but if nothing does the denial must say "expired".
    let mut expired_at = None;
    if let Some(purchase) =
        storage::find_latest_completed_purchase(db, &subject.id, &product.id).await?
    {
        let now = Utc::now().timestamp();
        match purchase.access_expires_at {
            Some(expiry) if now > expiry => expired_at = Some(expiry),
            lifetime_or_future => {
                return Ok(Entitlement::Granted(Grant {
                    access_type: AccessType::Purchase,
                    can_download: true,
                    remaining_allowance: Allowance::Unlimited,
                    expires_at: lifetime_or_future,
                    reason: "active purchase".to_string(),
                }));
            }
        }
    }

    if subject.role == Role::Teacher {
        if let Some(subscription) = storage::find_active_subscription(db, &subject.id).await? {
            let month = ledger::current_month_key();
            if storage::find_claim(db, &subscription.id, &month, &product.product_type, &product.id)
                .await?
                .is_some()
            {
                let status =
                    ledger::check_allowance(db, &subscription, &month, &product.product_type)
                        .await?;
                return Ok(Entitlement::Granted(Grant {
                    access_type: AccessType::SubscriptionClaim,
                    can_download: policy.claim_download_enabled,
                    remaining_allowance: status.remaining,
                    expires_at: subscription.expires_at,
                    reason: "claimed through subscription".to_string(),
                }));
            }
        }
    }

    Ok(match expired_at {
        Some(expired_at) => Entitlement::ExpiredPurchase { expired_at },
        None => Entitlement::NotEntitled,
    })
}

async fn linked_teacher(
    db: &DatabaseConnection,
    subject: &Subject,
) -> Result<Option<Subject>, LudoraError> {
    let teacher_id = match &subject.teacher_link_id {
        Some(id) => id.clone(),
        None => match storage::find_teacher_for_student(db, &subject.id).await? {
            Some(link) => link.teacher_user_id,
            None => return Ok(None),
        },
    };

    let Some(teacher) = storage::get_user(db, &teacher_id).await? else {
        return Ok(None);
    };

    // The link target's real role matters: a link pointing at a non-teacher
    // grants nothing claim-wise and never chains further.
    let role = Role::parse(&teacher.role).unwrap_or(Role::Guest);
    Ok(Some(Subject::new(teacher.id, role)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::types::EntityKind;
    use crate::storage::test_db::TestDb;
    use crate::storage::NewProduct;
    use std::collections::HashSet;

    fn product(product_type: &str, title: &str, creator: Option<&str>) -> NewProduct {
        NewProduct {
            product_type: product_type.to_string(),
            title: title.to_string(),
            creator_user_id: creator.map(str::to_string),
            price_cents: 1500,
            access_duration_days: None,
            bundle_children: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_admin_override_skips_catalog() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();
        let policy = AccessPolicy::default();

        // Entity that does not exist anywhere
        let entity = EntityRef::new(EntityKind::Game, "ghost");
        let admin = Subject::new("a-1", Role::Admin);

        let decision = resolve_access(db, &policy, &admin, &entity).await.unwrap();
        assert!(decision.has_access);
        assert!(decision.can_download && decision.can_preview && decision.can_play);
        assert_eq!(decision.remaining_allowance, Allowance::Unlimited);
        assert!(!decision.entity_not_product);
    }

    #[tokio::test]
    async fn test_sysadmin_forbidden_content_access_falls_through() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        let mut policy = AccessPolicy {
            sysadmin_forbidden_actions: HashSet::from([admin::actions::CONTENT_ACCESS.to_string()]),
            ..AccessPolicy::default()
        };

        let owner = storage::create_user(db, "o@example.com", "pw", "Owner", "teacher")
            .await
            .unwrap();
        let product = storage::create_product(db, product("game", "Fractions", Some(&owner.id)))
            .await
            .unwrap();
        let entity = EntityRef::new(EntityKind::Game, &product.id);

        let sysadmin = Subject::new("s-1", Role::Sysadmin);
        let decision = resolve_access(db, &policy, &sysadmin, &entity).await.unwrap();
        assert!(!decision.has_access, "restricted sysadmin gets no bypass");
        assert_eq!(decision.access_type, AccessType::None);

        // Without the restriction the same subject passes
        policy.sysadmin_forbidden_actions.clear();
        let decision = resolve_access(db, &policy, &sysadmin, &entity).await.unwrap();
        assert!(decision.has_access);
    }

    #[tokio::test]
    async fn test_unknown_entity_reports_not_a_product() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();
        let policy = AccessPolicy::default();

        let subject = Subject::new("u-1", Role::Teacher);
        let entity = EntityRef::new(EntityKind::Course, "missing");

        let decision = resolve_access(db, &policy, &subject, &entity).await.unwrap();
        assert!(!decision.has_access);
        assert!(decision.entity_not_product);
        assert_eq!(decision.access_type, AccessType::None);
    }

    #[tokio::test]
    async fn test_guest_denied_on_real_product() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();
        let policy = AccessPolicy::default();

        let owner = storage::create_user(db, "o@example.com", "pw", "Owner", "teacher")
            .await
            .unwrap();
        let created = storage::create_product(db, product("file", "Worksheet", Some(&owner.id)))
            .await
            .unwrap();
        let entity = EntityRef::new(EntityKind::File, &created.id);

        let decision = resolve_access(db, &policy, &Subject::guest(), &entity)
            .await
            .unwrap();
        assert!(!decision.has_access);
        assert_eq!(decision.access_type, AccessType::None);
        assert_eq!(decision.remaining_allowance, Allowance::Limited(0));
        assert!(!decision.entity_not_product);
    }

    #[tokio::test]
    async fn test_kind_mismatch_is_not_a_product() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();
        let policy = AccessPolicy::default();

        let owner = storage::create_user(db, "o@example.com", "pw", "Owner", "teacher")
            .await
            .unwrap();
        let created = storage::create_product(db, product("game", "Spelling Bee", Some(&owner.id)))
            .await
            .unwrap();

        // Right id, wrong kind
        let entity = EntityRef::new(EntityKind::Workshop, &created.id);
        let decision = resolve_access(db, &policy, &Subject::new(&owner.id, Role::Teacher), &entity)
            .await
            .unwrap();
        assert!(decision.entity_not_product);
    }
}
