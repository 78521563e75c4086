use crate::access::types::{Allowance, AllowanceStatus};
use crate::access::AccessPolicy;
use crate::entities;
use crate::errors::LudoraError;
use crate::storage;
use chrono::Utc;
use sea_orm::{DatabaseConnection, SqlErr};

/// Calendar-month bucket key, e.g. "2026-08". Buckets never roll over or
/// merge; unused slots die with the month.
pub fn current_month_key() -> String {
    Utc::now().format("%Y-%m").to_string()
}

/// One claim attempt, fully specified by the caller.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub subscription_id: String,
    pub user_id: String,
    pub month_year: String,
    pub product_type: String,
    pub product_id: String,
    /// Accept the claim even when it would land at or below the low-slot
    /// warning threshold.
    pub skip_confirmation: bool,
}

/// What a claim attempt produced. Exhaustion is an outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// New claim recorded; one slot consumed.
    Claimed {
        claim: entities::subscription_claim::Model,
        remaining: Allowance,
    },
    /// This product was already claimed in this bucket; nothing consumed.
    AlreadyClaimed {
        claim: entities::subscription_claim::Model,
        remaining: Allowance,
    },
    /// The claim would leave at most the warning threshold of slots and the
    /// caller did not opt in; nothing consumed until they retry with
    /// `skip_confirmation` set.
    NeedsConfirmation { remaining_if_claimed: i64 },
    /// No slot left in this bucket.
    Exceeded { used: i64, limit: Allowance },
}

fn status_from(allowance: &entities::allowance::Model) -> AllowanceStatus {
    let limit = Allowance::from_limit(allowance.monthly_limit);
    let remaining = match limit {
        Allowance::Unlimited => Allowance::Unlimited,
        Allowance::Limited(l) => Allowance::Limited((l - allowance.used).max(0)),
    };

    AllowanceStatus {
        month_year: allowance.month_year.clone(),
        product_type: allowance.product_type.clone(),
        limit,
        used: allowance.used,
        remaining,
    }
}

/// Report the bucket for (subscription, month, product type), creating it
/// from the plan's limits on first touch.
pub async fn check_allowance(
    db: &DatabaseConnection,
    subscription: &entities::subscription::Model,
    month_year: &str,
    product_type: &str,
) -> Result<AllowanceStatus, LudoraError> {
    let allowance = storage::ensure_allowance(db, subscription, month_year, product_type).await?;
    Ok(status_from(&allowance))
}

/// Claim one product against a subscription's monthly allowance.
///
/// Idempotent per (subscription, month, product type, product): re-claiming
/// returns the existing claim without consuming another slot. The slot
/// itself is taken with a conditional update, so concurrent claims cannot
/// push `used` past the limit no matter how they interleave.
pub async fn claim(
    db: &DatabaseConnection,
    policy: &AccessPolicy,
    request: &ClaimRequest,
) -> Result<ClaimOutcome, LudoraError> {
    let subscription = storage::get_subscription(db, &request.subscription_id)
        .await?
        .ok_or_else(|| {
            LudoraError::NotFound(format!("Subscription not found: {}", request.subscription_id))
        })?;

    let allowance = storage::ensure_allowance(
        db,
        &subscription,
        &request.month_year,
        &request.product_type,
    )
    .await?;

    if let Some(existing) = storage::find_claim(
        db,
        &request.subscription_id,
        &request.month_year,
        &request.product_type,
        &request.product_id,
    )
    .await?
    {
        return Ok(ClaimOutcome::AlreadyClaimed {
            claim: existing,
            remaining: status_from(&allowance).remaining,
        });
    }

    let limit = Allowance::from_limit(allowance.monthly_limit);

    // Pre-checks give friendly answers on the common paths; the conditional
    // update below stays the authoritative gate under concurrency.
    if let Allowance::Limited(l) = limit {
        if allowance.used >= l {
            return Ok(ClaimOutcome::Exceeded {
                used: allowance.used,
                limit,
            });
        }
        let remaining_if_claimed = l - allowance.used - 1;
        if !request.skip_confirmation && remaining_if_claimed <= policy.low_allowance_threshold {
            return Ok(ClaimOutcome::NeedsConfirmation {
                remaining_if_claimed,
            });
        }
    }

    if !storage::consume_allowance_slot(
        db,
        &request.subscription_id,
        &request.month_year,
        &request.product_type,
    )
    .await?
    {
        let refreshed = reload_allowance(db, request).await?;
        return Ok(ClaimOutcome::Exceeded {
            used: refreshed.used,
            limit: Allowance::from_limit(refreshed.monthly_limit),
        });
    }

    match storage::create_claim(
        db,
        &request.subscription_id,
        &request.user_id,
        &request.month_year,
        &request.product_type,
        &request.product_id,
    )
    .await
    {
        Ok(claim) => {
            let refreshed = reload_allowance(db, request).await?;
            tracing::info!(
                subscription = %request.subscription_id,
                product = %request.product_id,
                month = %request.month_year,
                used = refreshed.used,
                "subscription claim recorded"
            );
            Ok(ClaimOutcome::Claimed {
                claim,
                remaining: status_from(&refreshed).remaining,
            })
        }
        Err(LudoraError::Db(e))
            if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) =>
        {
            // Lost a same-product race: return the winner's claim and hand
            // the slot we took back.
            storage::release_allowance_slot(
                db,
                &request.subscription_id,
                &request.month_year,
                &request.product_type,
            )
            .await?;
            let existing = storage::find_claim(
                db,
                &request.subscription_id,
                &request.month_year,
                &request.product_type,
                &request.product_id,
            )
            .await?
            .ok_or_else(|| {
                LudoraError::Other("Claim missing after unique conflict".to_string())
            })?;
            let refreshed = reload_allowance(db, request).await?;
            Ok(ClaimOutcome::AlreadyClaimed {
                claim: existing,
                remaining: status_from(&refreshed).remaining,
            })
        }
        Err(e) => Err(e),
    }
}

async fn reload_allowance(
    db: &DatabaseConnection,
    request: &ClaimRequest,
) -> Result<entities::allowance::Model, LudoraError> {
    storage::get_allowance(
        db,
        &request.subscription_id,
        &request.month_year,
        &request.product_type,
    )
    .await?
    .ok_or_else(|| LudoraError::Other("Allowance bucket vanished mid-claim".to_string()))
}

/// Undo a claim: delete it and return its slot to the bucket. False when no
/// such claim existed.
pub async fn release(
    db: &DatabaseConnection,
    subscription_id: &str,
    month_year: &str,
    product_type: &str,
    product_id: &str,
) -> Result<bool, LudoraError> {
    let removed =
        storage::delete_claim(db, subscription_id, month_year, product_type, product_id).await?;
    if removed == 0 {
        return Ok(false);
    }

    storage::release_allowance_slot(db, subscription_id, month_year, product_type).await?;
    tracing::info!(
        subscription = %subscription_id,
        product = %product_id,
        month = %month_year,
        "subscription claim released"
    );
    Ok(true)
}

/// Administrative correction of one bucket's limit. `month_year` defaults to
/// the current bucket. The adjusted limit never drops below what is already
/// used, and unlimited buckets cannot be nudged by a delta.
pub async fn adjust(
    db: &DatabaseConnection,
    subscription_id: &str,
    product_type: &str,
    month_year: Option<&str>,
    delta: i64,
    reason: &str,
    adjusted_by: &str,
) -> Result<AllowanceStatus, LudoraError> {
    let subscription = storage::get_subscription(db, subscription_id)
        .await?
        .ok_or_else(|| LudoraError::NotFound(format!("Subscription not found: {subscription_id}")))?;

    let month = month_year
        .map(str::to_string)
        .unwrap_or_else(current_month_key);

    let allowance = storage::ensure_allowance(db, &subscription, &month, product_type).await?;
    if allowance.monthly_limit < 0 {
        return Err(LudoraError::BadRequest(
            "Cannot adjust an unlimited allowance".to_string(),
        ));
    }

    let limit_before = allowance.monthly_limit;
    let limit_after = (limit_before + delta).max(allowance.used).max(0);

    storage::set_allowance_limit(db, subscription_id, &month, product_type, limit_after).await?;
    storage::create_allowance_adjustment(
        db,
        subscription_id,
        product_type,
        &month,
        delta,
        limit_before,
        limit_after,
        reason,
        adjusted_by,
    )
    .await?;

    tracing::info!(
        subscription = %subscription_id,
        product_type = %product_type,
        month = %month,
        delta,
        limit_before,
        limit_after,
        "allowance limit adjusted"
    );

    let refreshed = storage::get_allowance(db, subscription_id, &month, product_type)
        .await?
        .ok_or_else(|| LudoraError::Other("Allowance row missing after adjustment".to_string()))?;
    Ok(status_from(&refreshed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessPolicy;
    use crate::storage::test_db::TestDb;
    use serde_json::json;

    const MONTH: &str = "2026-08";

    async fn seed_subscription(
        db: &DatabaseConnection,
        benefits: serde_json::Value,
    ) -> entities::subscription::Model {
        let teacher = storage::create_user(db, "t@example.com", "pw", "Teacher", "teacher")
            .await
            .unwrap();
        let plan = storage::create_plan(db, "Classroom", &benefits).await.unwrap();
        storage::create_subscription(db, &teacher.id, &plan.id, None)
            .await
            .unwrap()
    }

    fn request(subscription: &entities::subscription::Model, product_id: &str, skip: bool) -> ClaimRequest {
        ClaimRequest {
            subscription_id: subscription.id.clone(),
            user_id: subscription.user_id.clone(),
            month_year: MONTH.to_string(),
            product_type: "workshop".to_string(),
            product_id: product_id.to_string(),
            skip_confirmation: skip,
        }
    }

    fn policy() -> AccessPolicy {
        AccessPolicy::default()
    }

    // ============================================================================
    // Claim Tests
    // ============================================================================

    #[tokio::test]
    async fn test_claim_consumes_one_slot() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();
        let sub = seed_subscription(db, json!({"workshop": 10})).await;

        let outcome = claim(db, &policy(), &request(&sub, "w-1", false)).await.unwrap();
        match outcome {
            ClaimOutcome::Claimed { claim, remaining } => {
                assert_eq!(claim.product_id, "w-1");
                assert_eq!(remaining, Allowance::Limited(9));
            }
            other => panic!("expected Claimed, got {other:?}"),
        }

        let bucket = storage::get_allowance(db, &sub.id, MONTH, "workshop")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bucket.used, 1);
    }

    #[tokio::test]
    async fn test_reclaim_is_idempotent() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();
        let sub = seed_subscription(db, json!({"workshop": 10})).await;

        let first = claim(db, &policy(), &request(&sub, "w-1", false)).await.unwrap();
        assert!(matches!(first, ClaimOutcome::Claimed { .. }));

        let second = claim(db, &policy(), &request(&sub, "w-1", false)).await.unwrap();
        match second {
            ClaimOutcome::AlreadyClaimed { claim, remaining } => {
                assert_eq!(claim.product_id, "w-1");
                assert_eq!(remaining, Allowance::Limited(9));
            }
            other => panic!("expected AlreadyClaimed, got {other:?}"),
        }

        let bucket = storage::get_allowance(db, &sub.id, MONTH, "workshop")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bucket.used, 1);
    }

    #[tokio::test]
    async fn test_claim_exceeded_when_bucket_full() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();
        let sub = seed_subscription(db, json!({"workshop": 1})).await;

        let first = claim(db, &policy(), &request(&sub, "w-1", true)).await.unwrap();
        assert!(matches!(first, ClaimOutcome::Claimed { .. }));

        let second = claim(db, &policy(), &request(&sub, "w-2", true)).await.unwrap();
        match second {
            ClaimOutcome::Exceeded { used, limit } => {
                assert_eq!(used, 1);
                assert_eq!(limit, Allowance::Limited(1));
            }
            other => panic!("expected Exceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_low_remaining_requires_confirmation() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();
        // limit 3, threshold 2: the very first claim would leave 2 slots
        let sub = seed_subscription(db, json!({"workshop": 3})).await;

        let tentative = claim(db, &policy(), &request(&sub, "w-1", false)).await.unwrap();
        match tentative {
            ClaimOutcome::NeedsConfirmation { remaining_if_claimed } => {
                assert_eq!(remaining_if_claimed, 2);
            }
            other => panic!("expected NeedsConfirmation, got {other:?}"),
        }

        // Nothing was consumed
        let bucket = storage::get_allowance(db, &sub.id, MONTH, "workshop")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bucket.used, 0);

        // Retrying with the confirmation flag goes through
        let confirmed = claim(db, &policy(), &request(&sub, "w-1", true)).await.unwrap();
        match confirmed {
            ClaimOutcome::Claimed { remaining, .. } => {
                assert_eq!(remaining, Allowance::Limited(2));
            }
            other => panic!("expected Claimed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ample_remaining_needs_no_confirmation() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();
        let sub = seed_subscription(db, json!({"workshop": 50})).await;

        let outcome = claim(db, &policy(), &request(&sub, "w-1", false)).await.unwrap();
        assert!(matches!(outcome, ClaimOutcome::Claimed { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_claims_cannot_overdraw() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();
        let sub = seed_subscription(db, json!({"workshop": 1})).await;

        let policy_a = policy();
        let policy_b = policy();
        let request_a = request(&sub, "w-1", true);
        let request_b = request(&sub, "w-2", true);
        let (a, b) = tokio::join!(
            claim(db, &policy_a, &request_a),
            claim(db, &policy_b, &request_b),
        );
        let a = a.unwrap();
        let b = b.unwrap();

        let claimed = [&a, &b]
            .iter()
            .filter(|o| matches!(o, ClaimOutcome::Claimed { .. }))
            .count();
        let exceeded = [&a, &b]
            .iter()
            .filter(|o| matches!(o, ClaimOutcome::Exceeded { .. }))
            .count();
        assert_eq!(claimed, 1, "exactly one claim should win: {a:?} / {b:?}");
        assert_eq!(exceeded, 1);

        let bucket = storage::get_allowance(db, &sub.id, MONTH, "workshop")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bucket.used, 1);
    }

    #[tokio::test]
    async fn test_concurrent_same_product_consumes_once() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();
        let sub = seed_subscription(db, json!({"workshop": 5})).await;

        let policy_a = policy();
        let policy_b = policy();
        let request_a = request(&sub, "w-1", true);
        let request_b = request(&sub, "w-1", true);
        let (a, b) = tokio::join!(
            claim(db, &policy_a, &request_a),
            claim(db, &policy_b, &request_b),
        );
        let a = a.unwrap();
        let b = b.unwrap();

        let claimed = [&a, &b]
            .iter()
            .filter(|o| matches!(o, ClaimOutcome::Claimed { .. }))
            .count();
        let already = [&a, &b]
            .iter()
            .filter(|o| matches!(o, ClaimOutcome::AlreadyClaimed { .. }))
            .count();
        assert_eq!(claimed, 1, "one writer wins: {a:?} / {b:?}");
        assert_eq!(already, 1);

        let bucket = storage::get_allowance(db, &sub.id, MONTH, "workshop")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bucket.used, 1, "duplicate claim must not hold a slot");
    }

    #[tokio::test]
    async fn test_unlimited_bucket_never_exhausts() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();
        let sub = seed_subscription(db, json!({"workshop": -1})).await;

        for i in 0..5 {
            let outcome = claim(db, &policy(), &request(&sub, &format!("w-{i}"), false))
                .await
                .unwrap();
            match outcome {
                ClaimOutcome::Claimed { remaining, .. } => {
                    assert_eq!(remaining, Allowance::Unlimited);
                }
                other => panic!("expected Claimed, got {other:?}"),
            }
        }

        let bucket = storage::get_allowance(db, &sub.id, MONTH, "workshop")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bucket.used, 5);
    }

    #[tokio::test]
    async fn test_claim_against_missing_subscription() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        let request = ClaimRequest {
            subscription_id: "nope".to_string(),
            user_id: "u".to_string(),
            month_year: MONTH.to_string(),
            product_type: "workshop".to_string(),
            product_id: "w-1".to_string(),
            skip_confirmation: true,
        };
        let err = claim(db, &policy(), &request).await.unwrap_err();
        assert!(matches!(err, LudoraError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_months_do_not_share_slots() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();
        let sub = seed_subscription(db, json!({"workshop": 1})).await;

        let mut july = request(&sub, "w-1", true);
        july.month_year = "2026-07".to_string();
        assert!(matches!(
            claim(db, &policy(), &july).await.unwrap(),
            ClaimOutcome::Claimed { .. }
        ));

        // August bucket is untouched by July's exhaustion
        let august = claim(db, &policy(), &request(&sub, "w-2", true)).await.unwrap();
        assert!(matches!(august, ClaimOutcome::Claimed { .. }));
    }

    // ============================================================================
    // Release Tests
    // ============================================================================

    #[tokio::test]
    async fn test_release_returns_the_slot() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();
        let sub = seed_subscription(db, json!({"workshop": 1})).await;

        assert!(matches!(
            claim(db, &policy(), &request(&sub, "w-1", true)).await.unwrap(),
            ClaimOutcome::Claimed { .. }
        ));
        assert!(matches!(
            claim(db, &policy(), &request(&sub, "w-2", true)).await.unwrap(),
            ClaimOutcome::Exceeded { .. }
        ));

        assert!(release(db, &sub.id, MONTH, "workshop", "w-1").await.unwrap());

        let outcome = claim(db, &policy(), &request(&sub, "w-2", true)).await.unwrap();
        assert!(matches!(outcome, ClaimOutcome::Claimed { .. }));
    }

    #[tokio::test]
    async fn test_release_of_unknown_claim() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();
        let sub = seed_subscription(db, json!({"workshop": 1})).await;

        assert!(!release(db, &sub.id, MONTH, "workshop", "w-404").await.unwrap());
    }

    // ============================================================================
    // Check Allowance Tests
    // ============================================================================

    #[tokio::test]
    async fn test_check_allowance_creates_fresh_bucket() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();
        let sub = seed_subscription(db, json!({"workshop": 10, "game": -1})).await;

        let status = check_allowance(db, &sub, MONTH, "workshop").await.unwrap();
        assert_eq!(status.limit, Allowance::Limited(10));
        assert_eq!(status.used, 0);
        assert_eq!(status.remaining, Allowance::Limited(10));

        let unlimited = check_allowance(db, &sub, MONTH, "game").await.unwrap();
        assert_eq!(unlimited.limit, Allowance::Unlimited);
        assert_eq!(unlimited.remaining, Allowance::Unlimited);

        // Product type absent from the plan means zero slots
        let zero = check_allowance(db, &sub, MONTH, "course").await.unwrap();
        assert_eq!(zero.limit, Allowance::Limited(0));
        assert_eq!(zero.remaining, Allowance::Limited(0));
    }

    // ============================================================================
    // Adjustment Tests
    // ============================================================================

    #[tokio::test]
    async fn test_adjust_expands_limit_and_audits() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();
        let sub = seed_subscription(db, json!({"workshop": 2})).await;

        let status = adjust(db, &sub.id, "workshop", Some(MONTH), 3, "school expanded", "admin-1")
            .await
            .unwrap();
        assert_eq!(status.limit, Allowance::Limited(5));
        assert_eq!(status.remaining, Allowance::Limited(5));

        let trail = storage::list_allowance_adjustments(db, &sub.id).await.unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].delta, 3);
        assert_eq!(trail[0].limit_before, 2);
        assert_eq!(trail[0].limit_after, 5);
        assert_eq!(trail[0].reason, "school expanded");
        assert_eq!(trail[0].adjusted_by, "admin-1");
    }

    #[tokio::test]
    async fn test_adjust_never_drops_below_used() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();
        let sub = seed_subscription(db, json!({"workshop": 5})).await;

        assert!(matches!(
            claim(db, &policy(), &request(&sub, "w-1", true)).await.unwrap(),
            ClaimOutcome::Claimed { .. }
        ));
        assert!(matches!(
            claim(db, &policy(), &request(&sub, "w-2", true)).await.unwrap(),
            ClaimOutcome::Claimed { .. }
        ));

        let status = adjust(db, &sub.id, "workshop", Some(MONTH), -10, "clawback", "admin-1")
            .await
            .unwrap();
        assert_eq!(status.limit, Allowance::Limited(2));
        assert_eq!(status.used, 2);
        assert_eq!(status.remaining, Allowance::Limited(0));
    }

    #[tokio::test]
    async fn test_adjust_rejects_unlimited_bucket() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();
        let sub = seed_subscription(db, json!({"workshop": -1})).await;

        let err = adjust(db, &sub.id, "workshop", Some(MONTH), 5, "noop", "admin-1")
            .await
            .unwrap_err();
        assert!(matches!(err, LudoraError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_adjust_missing_subscription() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        let err = adjust(db, "nope", "workshop", Some(MONTH), 1, "x", "admin-1")
            .await
            .unwrap_err();
        assert!(matches!(err, LudoraError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_adjust_defaults_to_current_month() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();
        let sub = seed_subscription(db, json!({"workshop": 2})).await;

        adjust(db, &sub.id, "workshop", None, 1, "bump", "admin-1")
            .await
            .unwrap();

        let month = current_month_key();
        let bucket = storage::get_allowance(db, &sub.id, &month, "workshop")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bucket.monthly_limit, 3);
    }

    #[test]
    fn test_month_key_shape() {
        let key = current_month_key();
        assert_eq!(key.len(), 7);
        assert_eq!(&key[4..5], "-");
        assert!(key[..4].chars().all(|c| c.is_ascii_digit()));
        assert!(key[5..].chars().all(|c| c.is_ascii_digit()));
    }
}
