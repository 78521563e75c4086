use crate::entities;
use crate::errors::LudoraError;
use crate::settings::Database as DbCfg;
use base64ct::Encoding;
use chrono::Utc;
use rand::{Rng, RngCore};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, Database, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, Set, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub product_type: String,
    pub title: String,
    pub creator_user_id: Option<String>,
    pub price_cents: i64,
    pub access_duration_days: Option<i64>,
    /// Product ids bundled under this product. Empty for plain products.
    pub bundle_children: Vec<String>,
}

/// Result of attempting to redeem a teacher invite code.
#[derive(Debug, Clone, PartialEq)]
pub enum InviteRedeemOutcome {
    Linked { teacher_user_id: String },
    NotFound,
    Expired,
    Exhausted,
}

pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, LudoraError> {
    let db = Database::connect(&cfg.url).await?;
    Ok(db)
}

fn random_id() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64ct::Base64UrlUnpadded::encode_string(&bytes)
}

/// Generate 8-character base-20 invite code in format XXXX-XXXX
/// Alphabet: BCDFGHJKLMNPQRSTVWXZ (consonants only, no ambiguous chars)
/// Entropy: 20^8 = ~43 bits
fn generate_invite_code() -> String {
    const ALPHABET: &[u8] = b"BCDFGHJKLMNPQRSTVWXZ";
    let mut rng = rand::thread_rng();
    let mut code = String::with_capacity(9);

    for i in 0..8 {
        if i == 4 {
            code.push('-');
        }
        let idx = rng.gen_range(0..ALPHABET.len());
        code.push(ALPHABET[idx] as char);
    }

    code
}

// User management functions

pub async fn create_user(
    db: &DatabaseConnection,
    email: &str,
    password: &str,
    display_name: &str,
    role: &str,
) -> Result<entities::user::Model, LudoraError> {
    use argon2::password_hash::{rand_core::OsRng, SaltString};
    use argon2::{Argon2, PasswordHasher};

    let id = random_id();
    let created_at = Utc::now().timestamp();

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| LudoraError::Other(format!("Password hashing failed: {}", e)))?
        .to_string();

    let user = entities::user::ActiveModel {
        id: Set(id),
        email: Set(email.to_string()),
        password_hash: Set(password_hash),
        display_name: Set(display_name.to_string()),
        role: Set(role.to_string()),
        enabled: Set(1),
        created_at: Set(created_at),
    };

    Ok(user.insert(db).await?)
}

pub async fn get_user(
    db: &DatabaseConnection,
    id: &str,
) -> Result<Option<entities::user::Model>, LudoraError> {
    use entities::user::{Column, Entity};

    Ok(Entity::find().filter(Column::Id.eq(id)).one(db).await?)
}

pub async fn get_user_by_email(
    db: &DatabaseConnection,
    email: &str,
) -> Result<Option<entities::user::Model>, LudoraError> {
    use entities::user::{Column, Entity};

    Ok(Entity::find().filter(Column::Email.eq(email)).one(db).await?)
}

pub async fn verify_user_password(
    db: &DatabaseConnection,
    email: &str,
    password: &str,
) -> Result<Option<entities::user::Model>, LudoraError> {
    use argon2::{Argon2, PasswordHash, PasswordVerifier};

    let user = match get_user_by_email(db, email).await? {
        Some(u) if u.enabled == 1 => u,
        _ => return Ok(None),
    };

    let parsed_hash = PasswordHash::new(&user.password_hash)
        .map_err(|e| LudoraError::Other(format!("Invalid password hash: {}", e)))?;

    if Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
    {
        Ok(Some(user))
    } else {
        Ok(None)
    }
}

/// Update user fields (display_name, role, enabled)
pub async fn update_user(
    db: &DatabaseConnection,
    id: &str,
    display_name: Option<String>,
    role: Option<String>,
    enabled: Option<bool>,
) -> Result<(), LudoraError> {
    use entities::user::{Column, Entity};

    let user = Entity::find()
        .filter(Column::Id.eq(id))
        .one(db)
        .await?
        .ok_or_else(|| LudoraError::NotFound(format!("User not found: {}", id)))?;

    let mut active: entities::user::ActiveModel = user.into();

    if let Some(display_name_val) = display_name {
        active.display_name = Set(display_name_val);
    }

    if let Some(role_val) = role {
        active.role = Set(role_val);
    }

    if let Some(enabled_val) = enabled {
        active.enabled = Set(if enabled_val { 1 } else { 0 });
    }

    active.update(db).await?;

    Ok(())
}

// Session functions

pub async fn create_session(
    db: &DatabaseConnection,
    user_id: &str,
    ttl_secs: i64,
    user_agent: Option<String>,
    ip_address: Option<String>,
) -> Result<entities::session::Model, LudoraError> {
    let token = random_id();
    let now = Utc::now().timestamp();

    let session = entities::session::ActiveModel {
        token: Set(token),
        user_id: Set(user_id.to_string()),
        created_at: Set(now),
        expires_at: Set(now + ttl_secs),
        user_agent: Set(user_agent),
        ip_address: Set(ip_address),
    };

    Ok(session.insert(db).await?)
}

pub async fn get_session(
    db: &DatabaseConnection,
    token: &str,
) -> Result<Option<entities::session::Model>, LudoraError> {
    use entities::session::{Column, Entity};

    if let Some(model) = Entity::find().filter(Column::Token.eq(token)).one(db).await? {
        // Check if session is expired
        let now = Utc::now().timestamp();
        if now > model.expires_at {
            return Ok(None);
        }

        Ok(Some(model))
    } else {
        Ok(None)
    }
}

pub async fn delete_session(db: &DatabaseConnection, token: &str) -> Result<(), LudoraError> {
    use entities::session::{Column, Entity};

    Entity::delete_many()
        .filter(Column::Token.eq(token))
        .exec(db)
        .await?;

    Ok(())
}

pub async fn cleanup_expired_sessions(db: &DatabaseConnection) -> Result<u64, LudoraError> {
    use entities::session::{Column, Entity};

    let now = Utc::now().timestamp();
    let result = Entity::delete_many()
        .filter(Column::ExpiresAt.lt(now))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}

// Catalog functions

pub async fn create_product(
    db: &DatabaseConnection,
    input: NewProduct,
) -> Result<entities::product::Model, LudoraError> {
    use entities::product::{Column, Entity};

    let id = random_id();
    let now = Utc::now().timestamp();

    let txn = db.begin().await?;

    let product = entities::product::ActiveModel {
        id: Set(id),
        product_type: Set(input.product_type),
        title: Set(input.title),
        creator_user_id: Set(input.creator_user_id),
        price_cents: Set(input.price_cents),
        access_duration_days: Set(input.access_duration_days),
        created_at: Set(now),
    };

    let model = product.insert(&txn).await?;

    for child_id in &input.bundle_children {
        let child = Entity::find()
            .filter(Column::Id.eq(child_id))
            .one(&txn)
            .await?;
        if child.is_none() {
            return Err(LudoraError::BadRequest(format!(
                "Unknown bundle child product: {}",
                child_id
            )));
        }

        let item = entities::bundle_item::ActiveModel {
            bundle_product_id: Set(model.id.clone()),
            child_product_id: Set(child_id.clone()),
        };
        item.insert(&txn).await?;
    }

    txn.commit().await?;

    Ok(model)
}

/// Look up a product by its (type, id) address. The type must match: the same
/// id under a different type is not the same entity.
pub async fn get_product(
    db: &DatabaseConnection,
    product_type: &str,
    id: &str,
) -> Result<Option<entities::product::Model>, LudoraError> {
    use entities::product::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::ProductType.eq(product_type))
        .filter(Column::Id.eq(id))
        .one(db)
        .await?)
}

pub async fn get_product_by_id(
    db: &DatabaseConnection,
    id: &str,
) -> Result<Option<entities::product::Model>, LudoraError> {
    use entities::product::{Column, Entity};

    Ok(Entity::find().filter(Column::Id.eq(id)).one(db).await?)
}

pub async fn find_product_by_title(
    db: &DatabaseConnection,
    product_type: &str,
    title: &str,
) -> Result<Option<entities::product::Model>, LudoraError> {
    use entities::product::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::ProductType.eq(product_type))
        .filter(Column::Title.eq(title))
        .one(db)
        .await?)
}

pub async fn list_products(
    db: &DatabaseConnection,
    product_type: Option<&str>,
) -> Result<Vec<entities::product::Model>, LudoraError> {
    use entities::product::{Column, Entity};

    let mut query = Entity::find();
    if let Some(product_type) = product_type {
        query = query.filter(Column::ProductType.eq(product_type));
    }

    Ok(query.order_by_desc(Column::CreatedAt).all(db).await?)
}

pub async fn list_bundle_children(
    db: &DatabaseConnection,
    bundle_product_id: &str,
) -> Result<Vec<entities::product::Model>, LudoraError> {
    use entities::bundle_item::{Column, Entity};

    let items = Entity::find()
        .filter(Column::BundleProductId.eq(bundle_product_id))
        .all(db)
        .await?;

    if items.is_empty() {
        return Ok(Vec::new());
    }

    let child_ids: Vec<String> = items.into_iter().map(|i| i.child_product_id).collect();

    Ok(entities::product::Entity::find()
        .filter(entities::product::Column::Id.is_in(child_ids))
        .all(db)
        .await?)
}

// Purchase functions

/// Most recent completed purchase of a product by a user, expired or not.
/// Callers decide what an expired purchase means.
pub async fn find_latest_completed_purchase(
    db: &DatabaseConnection,
    buyer_user_id: &str,
    product_id: &str,
) -> Result<Option<entities::purchase::Model>, LudoraError> {
    use entities::purchase::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::BuyerUserId.eq(buyer_user_id))
        .filter(Column::ProductId.eq(product_id))
        .filter(Column::PaymentStatus.eq("completed"))
        .order_by_desc(Column::CreatedAt)
        .order_by_desc(Column::Id)
        .one(db)
        .await?)
}

/// Record a completed purchase of a product. For bundles this also fans out
/// one child purchase per bundled product, all inheriting the parent expiry,
/// in a single transaction.
pub async fn grant_access(
    db: &DatabaseConnection,
    buyer_user_id: &str,
    product_id: &str,
) -> Result<entities::purchase::Model, LudoraError> {
    let now = Utc::now().timestamp();

    let txn = db.begin().await?;

    let product = entities::product::Entity::find()
        .filter(entities::product::Column::Id.eq(product_id))
        .one(&txn)
        .await?
        .ok_or_else(|| LudoraError::NotFound(format!("Product not found: {}", product_id)))?;

    let access_expires_at = product.access_duration_days.map(|days| now + days * 86400);

    let parent = entities::purchase::ActiveModel {
        id: Default::default(),
        buyer_user_id: Set(buyer_user_id.to_string()),
        product_id: Set(product.id.clone()),
        payment_status: Set("completed".to_string()),
        access_expires_at: Set(access_expires_at),
        bundle_parent_purchase_id: Set(None),
        created_at: Set(now),
        completed_at: Set(Some(now)),
    };
    let parent = parent.insert(&txn).await?;

    let items = entities::bundle_item::Entity::find()
        .filter(entities::bundle_item::Column::BundleProductId.eq(product_id))
        .all(&txn)
        .await?;

    for item in items {
        let child = entities::purchase::ActiveModel {
            id: Default::default(),
            buyer_user_id: Set(buyer_user_id.to_string()),
            product_id: Set(item.child_product_id),
            payment_status: Set("completed".to_string()),
            access_expires_at: Set(access_expires_at),
            bundle_parent_purchase_id: Set(Some(parent.id)),
            created_at: Set(now),
            completed_at: Set(Some(now)),
        };
        child.insert(&txn).await?;
    }

    txn.commit().await?;

    Ok(parent)
}

/// Refund the latest completed purchase of a product, together with any
/// bundle children granted by it. Returns the number of purchases refunded
/// (0 when there was nothing to revoke).
pub async fn revoke_access(
    db: &DatabaseConnection,
    buyer_user_id: &str,
    product_id: &str,
) -> Result<u64, LudoraError> {
    use entities::purchase::{Column, Entity};
    use sea_orm::sea_query::Expr;

    let txn = db.begin().await?;

    let purchase = Entity::find()
        .filter(Column::BuyerUserId.eq(buyer_user_id))
        .filter(Column::ProductId.eq(product_id))
        .filter(Column::PaymentStatus.eq("completed"))
        .order_by_desc(Column::CreatedAt)
        .order_by_desc(Column::Id)
        .one(&txn)
        .await?;

    let Some(purchase) = purchase else {
        return Ok(0);
    };

    let mut active: entities::purchase::ActiveModel = purchase.clone().into();
    active.payment_status = Set("refunded".to_string());
    active.update(&txn).await?;

    let children = Entity::update_many()
        .col_expr(Column::PaymentStatus, Expr::value("refunded"))
        .filter(Column::BundleParentPurchaseId.eq(purchase.id))
        .filter(Column::PaymentStatus.eq("completed"))
        .exec(&txn)
        .await?;

    txn.commit().await?;

    Ok(1 + children.rows_affected)
}

// Plan and subscription functions

pub async fn create_plan(
    db: &DatabaseConnection,
    name: &str,
    benefits: &Value,
) -> Result<entities::plan::Model, LudoraError> {
    let id = random_id();
    let now = Utc::now().timestamp();
    let benefits_json = serde_json::to_string(benefits)?;

    let plan = entities::plan::ActiveModel {
        id: Set(id),
        name: Set(name.to_string()),
        benefits: Set(benefits_json),
        created_at: Set(now),
    };

    Ok(plan.insert(db).await?)
}

pub async fn get_plan(
    db: &DatabaseConnection,
    id: &str,
) -> Result<Option<entities::plan::Model>, LudoraError> {
    use entities::plan::{Column, Entity};

    Ok(Entity::find().filter(Column::Id.eq(id)).one(db).await?)
}

pub async fn find_plan_by_name(
    db: &DatabaseConnection,
    name: &str,
) -> Result<Option<entities::plan::Model>, LudoraError> {
    use entities::plan::{Column, Entity};

    Ok(Entity::find().filter(Column::Name.eq(name)).one(db).await?)
}

pub async fn update_plan_benefits(
    db: &DatabaseConnection,
    id: &str,
    benefits: &Value,
) -> Result<(), LudoraError> {
    use entities::plan::{Column, Entity};

    let plan = Entity::find()
        .filter(Column::Id.eq(id))
        .one(db)
        .await?
        .ok_or_else(|| LudoraError::NotFound(format!("Plan not found: {}", id)))?;

    let mut active: entities::plan::ActiveModel = plan.into();
    active.benefits = Set(serde_json::to_string(benefits)?);
    active.update(db).await?;

    Ok(())
}

/// Monthly claim limit a plan grants for a product type. Types the plan does
/// not mention get 0; -1 means unlimited.
pub fn plan_monthly_limit(
    plan: &entities::plan::Model,
    product_type: &str,
) -> Result<i64, LudoraError> {
    let benefits: Value = serde_json::from_str(&plan.benefits)?;
    Ok(benefits
        .get(product_type)
        .and_then(|v| v.as_i64())
        .unwrap_or(0))
}

pub async fn create_subscription(
    db: &DatabaseConnection,
    user_id: &str,
    plan_id: &str,
    expires_at: Option<i64>,
) -> Result<entities::subscription::Model, LudoraError> {
    let id = random_id();
    let now = Utc::now().timestamp();

    let subscription = entities::subscription::ActiveModel {
        id: Set(id),
        user_id: Set(user_id.to_string()),
        plan_id: Set(plan_id.to_string()),
        status: Set("active".to_string()),
        started_at: Set(now),
        expires_at: Set(expires_at),
    };

    Ok(subscription.insert(db).await?)
}

pub async fn get_subscription(
    db: &DatabaseConnection,
    id: &str,
) -> Result<Option<entities::subscription::Model>, LudoraError> {
    use entities::subscription::{Column, Entity};

    Ok(Entity::find().filter(Column::Id.eq(id)).one(db).await?)
}

pub async fn find_active_subscription(
    db: &DatabaseConnection,
    user_id: &str,
) -> Result<Option<entities::subscription::Model>, LudoraError> {
    use entities::subscription::{Column, Entity};

    let now = Utc::now().timestamp();

    Ok(Entity::find()
        .filter(Column::UserId.eq(user_id))
        .filter(Column::Status.eq("active"))
        .filter(
            Condition::any()
                .add(Column::ExpiresAt.is_null())
                .add(Column::ExpiresAt.gt(now)),
        )
        .one(db)
        .await?)
}

/// Flip active subscriptions whose expiry has passed to "expired".
pub async fn expire_lapsed_subscriptions(db: &DatabaseConnection) -> Result<u64, LudoraError> {
    use entities::subscription::{Column, Entity};
    use sea_orm::sea_query::Expr;

    let now = Utc::now().timestamp();
    let result = Entity::update_many()
        .col_expr(Column::Status, Expr::value("expired"))
        .filter(Column::Status.eq("active"))
        .filter(Column::ExpiresAt.is_not_null())
        .filter(Column::ExpiresAt.lt(now))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}

// Allowance functions

/// Load the allowance bucket for (subscription, month, product type),
/// creating it with the plan's limit snapshot on first touch. Losing a
/// concurrent creation race falls back to the winner's row.
pub async fn ensure_allowance(
    db: &DatabaseConnection,
    subscription: &entities::subscription::Model,
    month_year: &str,
    product_type: &str,
) -> Result<entities::allowance::Model, LudoraError> {
    use entities::allowance::{Column, Entity};

    if let Some(model) = Entity::find()
        .filter(Column::SubscriptionId.eq(&subscription.id))
        .filter(Column::MonthYear.eq(month_year))
        .filter(Column::ProductType.eq(product_type))
        .one(db)
        .await?
    {
        return Ok(model);
    }

    let plan = get_plan(db, &subscription.plan_id).await?.ok_or_else(|| {
        LudoraError::NotFound(format!("Plan not found: {}", subscription.plan_id))
    })?;
    let monthly_limit = plan_monthly_limit(&plan, product_type)?;

    let row = entities::allowance::ActiveModel {
        subscription_id: Set(subscription.id.clone()),
        month_year: Set(month_year.to_string()),
        product_type: Set(product_type.to_string()),
        used: Set(0),
        monthly_limit: Set(monthly_limit),
    };

    match row.insert(db).await {
        Ok(model) => Ok(model),
        Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
            Ok(Entity::find()
                .filter(Column::SubscriptionId.eq(&subscription.id))
                .filter(Column::MonthYear.eq(month_year))
                .filter(Column::ProductType.eq(product_type))
                .one(db)
                .await?
                .ok_or_else(|| {
                    LudoraError::Other("Allowance row vanished after insert conflict".to_string())
                })?)
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn get_allowance(
    db: &DatabaseConnection,
    subscription_id: &str,
    month_year: &str,
    product_type: &str,
) -> Result<Option<entities::allowance::Model>, LudoraError> {
    use entities::allowance::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::SubscriptionId.eq(subscription_id))
        .filter(Column::MonthYear.eq(month_year))
        .filter(Column::ProductType.eq(product_type))
        .one(db)
        .await?)
}

/// Atomically take one slot from an allowance bucket. The increment and the
/// limit check are a single conditional UPDATE, so two racing claims can
/// never both take the last slot. Returns false when the bucket is missing
/// or exhausted.
pub async fn consume_allowance_slot(
    db: &DatabaseConnection,
    subscription_id: &str,
    month_year: &str,
    product_type: &str,
) -> Result<bool, LudoraError> {
    use entities::allowance::{Column, Entity};
    use sea_orm::sea_query::Expr;

    let result = Entity::update_many()
        .col_expr(Column::Used, Expr::col(Column::Used).add(1))
        .filter(Column::SubscriptionId.eq(subscription_id))
        .filter(Column::MonthYear.eq(month_year))
        .filter(Column::ProductType.eq(product_type))
        .filter(
            Condition::any()
                .add(Column::MonthlyLimit.eq(-1))
                .add(Expr::col(Column::Used).lt(Expr::col(Column::MonthlyLimit))),
        )
        .exec(db)
        .await?;

    Ok(result.rows_affected > 0)
}

/// Give one slot back. Never drives `used` below zero.
pub async fn release_allowance_slot(
    db: &DatabaseConnection,
    subscription_id: &str,
    month_year: &str,
    product_type: &str,
) -> Result<bool, LudoraError> {
    use entities::allowance::{Column, Entity};
    use sea_orm::sea_query::Expr;

    let result = Entity::update_many()
        .col_expr(Column::Used, Expr::col(Column::Used).sub(1))
        .filter(Column::SubscriptionId.eq(subscription_id))
        .filter(Column::MonthYear.eq(month_year))
        .filter(Column::ProductType.eq(product_type))
        .filter(Expr::col(Column::Used).gt(0))
        .exec(db)
        .await?;

    Ok(result.rows_affected > 0)
}

pub async fn set_allowance_limit(
    db: &DatabaseConnection,
    subscription_id: &str,
    month_year: &str,
    product_type: &str,
    monthly_limit: i64,
) -> Result<bool, LudoraError> {
    use entities::allowance::{Column, Entity};
    use sea_orm::sea_query::Expr;

    let result = Entity::update_many()
        .col_expr(Column::MonthlyLimit, Expr::value(monthly_limit))
        .filter(Column::SubscriptionId.eq(subscription_id))
        .filter(Column::MonthYear.eq(month_year))
        .filter(Column::ProductType.eq(product_type))
        .exec(db)
        .await?;

    Ok(result.rows_affected > 0)
}

#[allow(clippy::too_many_arguments)]
pub async fn create_allowance_adjustment(
    db: &DatabaseConnection,
    subscription_id: &str,
    product_type: &str,
    month_year: &str,
    delta: i64,
    limit_before: i64,
    limit_after: i64,
    reason: &str,
    adjusted_by: &str,
) -> Result<entities::allowance_adjustment::Model, LudoraError> {
    let now = Utc::now().timestamp();

    let adjustment = entities::allowance_adjustment::ActiveModel {
        id: Default::default(),
        subscription_id: Set(subscription_id.to_string()),
        product_type: Set(product_type.to_string()),
        month_year: Set(month_year.to_string()),
        delta: Set(delta),
        limit_before: Set(limit_before),
        limit_after: Set(limit_after),
        reason: Set(reason.to_string()),
        adjusted_by: Set(adjusted_by.to_string()),
        created_at: Set(now),
    };

    Ok(adjustment.insert(db).await?)
}

pub async fn list_allowance_adjustments(
    db: &DatabaseConnection,
    subscription_id: &str,
) -> Result<Vec<entities::allowance_adjustment::Model>, LudoraError> {
    use entities::allowance_adjustment::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::SubscriptionId.eq(subscription_id))
        .order_by_desc(Column::CreatedAt)
        .order_by_desc(Column::Id)
        .all(db)
        .await?)
}

// Claim functions

/// Insert a claim row. A duplicate (subscription, month, type, product)
/// violates the unique index and surfaces as a database error; callers
/// treat that as "already claimed".
pub async fn create_claim(
    db: &DatabaseConnection,
    subscription_id: &str,
    user_id: &str,
    month_year: &str,
    product_type: &str,
    product_id: &str,
) -> Result<entities::subscription_claim::Model, LudoraError> {
    let now = Utc::now().timestamp();

    let claim = entities::subscription_claim::ActiveModel {
        id: Default::default(),
        subscription_id: Set(subscription_id.to_string()),
        user_id: Set(user_id.to_string()),
        month_year: Set(month_year.to_string()),
        product_type: Set(product_type.to_string()),
        product_id: Set(product_id.to_string()),
        created_at: Set(now),
    };

    Ok(claim.insert(db).await?)
}

pub async fn find_claim(
    db: &DatabaseConnection,
    subscription_id: &str,
    month_year: &str,
    product_type: &str,
    product_id: &str,
) -> Result<Option<entities::subscription_claim::Model>, LudoraError> {
    use entities::subscription_claim::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::SubscriptionId.eq(subscription_id))
        .filter(Column::MonthYear.eq(month_year))
        .filter(Column::ProductType.eq(product_type))
        .filter(Column::ProductId.eq(product_id))
        .one(db)
        .await?)
}

pub async fn delete_claim(
    db: &DatabaseConnection,
    subscription_id: &str,
    month_year: &str,
    product_type: &str,
    product_id: &str,
) -> Result<u64, LudoraError> {
    use entities::subscription_claim::{Column, Entity};

    let result = Entity::delete_many()
        .filter(Column::SubscriptionId.eq(subscription_id))
        .filter(Column::MonthYear.eq(month_year))
        .filter(Column::ProductType.eq(product_type))
        .filter(Column::ProductId.eq(product_id))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}

// Teacher link functions

/// Attach a student to a teacher. A student has at most one teacher; linking
/// again replaces the previous link.
pub async fn link_student_to_teacher(
    db: &DatabaseConnection,
    student_user_id: &str,
    teacher_user_id: &str,
    source: &str,
) -> Result<(), LudoraError> {
    use entities::teacher_link::{Column, Entity};
    use sea_orm::sea_query::OnConflict;

    let now = Utc::now().timestamp();

    let link = entities::teacher_link::ActiveModel {
        student_user_id: Set(student_user_id.to_string()),
        teacher_user_id: Set(teacher_user_id.to_string()),
        source: Set(source.to_string()),
        created_at: Set(now),
    };

    Entity::insert(link)
        .on_conflict(
            OnConflict::column(Column::StudentUserId)
                .update_columns([Column::TeacherUserId, Column::Source, Column::CreatedAt])
                .to_owned(),
        )
        .exec(db)
        .await?;

    Ok(())
}

pub async fn find_teacher_for_student(
    db: &DatabaseConnection,
    student_user_id: &str,
) -> Result<Option<entities::teacher_link::Model>, LudoraError> {
    use entities::teacher_link::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::StudentUserId.eq(student_user_id))
        .one(db)
        .await?)
}

// Invite code functions

pub async fn create_invite_code(
    db: &DatabaseConnection,
    teacher_user_id: &str,
    max_uses: i64,
    ttl_secs: Option<i64>,
) -> Result<entities::invite_code::Model, LudoraError> {
    let code = generate_invite_code();
    let now = Utc::now().timestamp();

    let invite = entities::invite_code::ActiveModel {
        code: Set(code),
        teacher_user_id: Set(teacher_user_id.to_string()),
        expires_at: Set(ttl_secs.map(|ttl| now + ttl)),
        max_uses: Set(max_uses),
        use_count: Set(0),
        created_at: Set(now),
    };

    Ok(invite.insert(db).await?)
}

pub async fn redeem_invite_code(
    db: &DatabaseConnection,
    code: &str,
    student_user_id: &str,
) -> Result<InviteRedeemOutcome, LudoraError> {
    use entities::invite_code::{Column, Entity};
    use sea_orm::sea_query::Expr;

    let now = Utc::now().timestamp();

    let Some(invite) = Entity::find().filter(Column::Code.eq(code)).one(db).await? else {
        return Ok(InviteRedeemOutcome::NotFound);
    };

    if let Some(expires_at) = invite.expires_at {
        if now > expires_at {
            return Ok(InviteRedeemOutcome::Expired);
        }
    }

    // Take one use atomically; losing the race for the last use is the same
    // as finding the code exhausted.
    let result = Entity::update_many()
        .col_expr(Column::UseCount, Expr::col(Column::UseCount).add(1))
        .filter(Column::Code.eq(code))
        .filter(Expr::col(Column::UseCount).lt(Expr::col(Column::MaxUses)))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        return Ok(InviteRedeemOutcome::Exhausted);
    }

    link_student_to_teacher(db, student_user_id, &invite.teacher_user_id, "invite").await?;

    Ok(InviteRedeemOutcome::Linked {
        teacher_user_id: invite.teacher_user_id,
    })
}

// App settings functions

pub async fn get_app_setting(
    db: &DatabaseConnection,
    key: &str,
) -> Result<Option<Value>, LudoraError> {
    use entities::app_setting::{Column, Entity};

    if let Some(model) = Entity::find().filter(Column::Key.eq(key)).one(db).await? {
        let json: Value = serde_json::from_str(&model.value)?;
        Ok(Some(json))
    } else {
        Ok(None)
    }
}

pub async fn set_app_setting(
    db: &DatabaseConnection,
    key: &str,
    value: &Value,
) -> Result<(), LudoraError> {
    use entities::app_setting::{Column, Entity};
    use sea_orm::sea_query::OnConflict;

    let now = Utc::now().timestamp();
    let json = serde_json::to_string(value)?;

    let setting = entities::app_setting::ActiveModel {
        key: Set(key.to_string()),
        value: Set(json),
        updated_at: Set(now),
    };

    Entity::insert(setting)
        .on_conflict(
            OnConflict::column(Column::Key)
                .update_columns([Column::Value, Column::UpdatedAt])
                .to_owned(),
        )
        .exec(db)
        .await?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod test_db {
    use sea_orm::{Database, DatabaseConnection};
    use sea_orm_migration::MigratorTrait;
    use tempfile::NamedTempFile;

    /// Test database helper that keeps temp file alive
    pub(crate) struct TestDb {
        connection: DatabaseConnection,
        _temp_file: NamedTempFile,
    }

    impl TestDb {
        pub(crate) async fn new() -> Self {
            let temp_file = NamedTempFile::new().expect("Failed to create temp file");
            let db_path = temp_file.path().to_str().expect("Invalid temp file path");
            let db_url = format!("sqlite://{}?mode=rwc", db_path);

            let connection = Database::connect(&db_url)
                .await
                .expect("Failed to connect to test database");

            migration::Migrator::up(&connection, None)
                .await
                .expect("Failed to run migrations");

            Self {
                connection,
                _temp_file: temp_file,
            }
        }

        pub(crate) fn connection(&self) -> &DatabaseConnection {
            &self.connection
        }
    }
}
