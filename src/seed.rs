use crate::access::types::Role;
use crate::storage::{self, NewProduct};
use miette::{IntoDiagnostic, Result};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;

/// User definition from the seed file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDefinition {
    /// Email (unique identifier)
    pub email: String,
    /// Plain text password (will be hashed); never rotated for existing users
    pub password: String,
    pub display_name: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_role() -> String {
    "teacher".to_string()
}

fn default_true() -> bool {
    true
}

/// Plan definition from the seed file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDefinition {
    /// Plan name (unique identifier)
    pub name: String,
    /// Per-product-type monthly limits, -1 for unlimited
    pub benefits: Value,
}

/// Product definition from the seed file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductDefinition {
    pub product_type: String,
    /// Title (unique identifier within the product type)
    pub title: String,
    /// Creator looked up by email; absent means an orphaned system asset
    #[serde(default)]
    pub creator_email: Option<String>,
    #[serde(default)]
    pub price_cents: i64,
    #[serde(default)]
    pub access_duration_days: Option<i64>,
    /// Titles of bundle children; each must appear earlier in the file
    #[serde(default)]
    pub bundle_children: Vec<String>,
}

/// Root structure of the seed JSON file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub users: Vec<UserDefinition>,
    #[serde(default)]
    pub plans: Vec<PlanDefinition>,
    #[serde(default)]
    pub products: Vec<ProductDefinition>,
}

#[derive(Debug)]
enum SyncResult {
    Created,
    Updated,
    Unchanged,
}

/// Sync users, plans, and products from a JSON file to the database
/// (idempotent on natural keys: user email, plan name, product type+title).
pub async fn seed_from_file(db: &DatabaseConnection, file_path: &str) -> Result<()> {
    tracing::info!("Loading seed data from {}", file_path);

    let content = fs::read_to_string(file_path)
        .into_diagnostic()
        .map_err(|e| miette::miette!("Failed to read seed file at '{}': {}", file_path, e))?;

    let seed: SeedFile = serde_json::from_str(&content).into_diagnostic().map_err(|e| {
        miette::miette!(
            "Failed to parse seed JSON file: {}\n\nExpected format:\n{{\n  \"users\": [{{\"email\": \"t@school.example\", \"password\": \"...\", \"display_name\": \"Ms. T\", \"role\": \"teacher\"}}],\n  \"plans\": [{{\"name\": \"Classroom\", \"benefits\": {{\"game\": 50, \"workshop\": -1}}}}],\n  \"products\": [{{\"product_type\": \"game\", \"title\": \"Fractions\", \"creator_email\": \"t@school.example\"}}]\n}}",
            e
        )
    })?;

    tracing::info!(
        "Seed file holds {} user(s), {} plan(s), {} product(s)",
        seed.users.len(),
        seed.plans.len(),
        seed.products.len()
    );

    let mut created = 0;
    let mut updated = 0;
    let mut unchanged = 0;

    for user_def in &seed.users {
        match sync_user(db, user_def).await? {
            SyncResult::Created => created += 1,
            SyncResult::Updated => updated += 1,
            SyncResult::Unchanged => unchanged += 1,
        }
    }

    for plan_def in &seed.plans {
        match sync_plan(db, plan_def).await? {
            SyncResult::Created => created += 1,
            SyncResult::Updated => updated += 1,
            SyncResult::Unchanged => unchanged += 1,
        }
    }

    // Products are create-only: catalog content changes go through the API,
    // the seed file just guarantees presence.
    let mut known_titles: HashMap<String, String> = HashMap::new();
    for product_def in &seed.products {
        match sync_product(db, product_def, &mut known_titles).await? {
            SyncResult::Created => created += 1,
            SyncResult::Updated => updated += 1,
            SyncResult::Unchanged => unchanged += 1,
        }
    }

    tracing::info!(
        "Seed complete: {} created, {} updated, {} unchanged",
        created,
        updated,
        unchanged
    );

    Ok(())
}

async fn sync_user(db: &DatabaseConnection, user_def: &UserDefinition) -> Result<SyncResult> {
    if Role::parse(&user_def.role).is_none() {
        return Err(miette::miette!(
            "Unknown role '{}' for seed user {}",
            user_def.role,
            user_def.email
        ));
    }

    let existing = storage::get_user_by_email(db, &user_def.email)
        .await
        .into_diagnostic()?;

    match existing {
        None => {
            tracing::info!("Creating user: {}", user_def.email);
            let user = storage::create_user(
                db,
                &user_def.email,
                &user_def.password,
                &user_def.display_name,
                &user_def.role,
            )
            .await
            .into_diagnostic()?;

            if !user_def.enabled {
                storage::update_user(db, &user.id, None, None, Some(false))
                    .await
                    .into_diagnostic()?;
            }

            Ok(SyncResult::Created)
        }
        Some(existing_user) => {
            let display_matches = existing_user.display_name == user_def.display_name;
            let role_matches = existing_user.role == user_def.role;
            let enabled_matches = (existing_user.enabled == 1) == user_def.enabled;

            if display_matches && role_matches && enabled_matches {
                return Ok(SyncResult::Unchanged);
            }

            tracing::info!("Updating user: {}", user_def.email);
            storage::update_user(
                db,
                &existing_user.id,
                (!display_matches).then(|| user_def.display_name.clone()),
                (!role_matches).then(|| user_def.role.clone()),
                (!enabled_matches).then_some(user_def.enabled),
            )
            .await
            .into_diagnostic()?;

            Ok(SyncResult::Updated)
        }
    }
}

async fn sync_plan(db: &DatabaseConnection, plan_def: &PlanDefinition) -> Result<SyncResult> {
    if !plan_def.benefits.is_object() {
        return Err(miette::miette!(
            "Plan '{}' benefits must be an object of per-type limits",
            plan_def.name
        ));
    }

    let existing = storage::find_plan_by_name(db, &plan_def.name)
        .await
        .into_diagnostic()?;

    match existing {
        None => {
            tracing::info!("Creating plan: {}", plan_def.name);
            storage::create_plan(db, &plan_def.name, &plan_def.benefits)
                .await
                .into_diagnostic()?;
            Ok(SyncResult::Created)
        }
        Some(plan) => {
            let current: Value = serde_json::from_str(&plan.benefits).unwrap_or(Value::Null);
            if current == plan_def.benefits {
                return Ok(SyncResult::Unchanged);
            }

            tracing::info!("Updating plan benefits: {}", plan_def.name);
            storage::update_plan_benefits(db, &plan.id, &plan_def.benefits)
                .await
                .into_diagnostic()?;
            Ok(SyncResult::Updated)
        }
    }
}

async fn sync_product(
    db: &DatabaseConnection,
    product_def: &ProductDefinition,
    known_titles: &mut HashMap<String, String>,
) -> Result<SyncResult> {
    if crate::access::types::EntityKind::parse(&product_def.product_type).is_none() {
        return Err(miette::miette!(
            "Unknown product type '{}' for seed product '{}'",
            product_def.product_type,
            product_def.title
        ));
    }

    if let Some(existing) =
        storage::find_product_by_title(db, &product_def.product_type, &product_def.title)
            .await
            .into_diagnostic()?
    {
        known_titles.insert(product_def.title.clone(), existing.id);
        return Ok(SyncResult::Unchanged);
    }

    let creator_user_id = match &product_def.creator_email {
        Some(email) => {
            let user = storage::get_user_by_email(db, email)
                .await
                .into_diagnostic()?
                .ok_or_else(|| {
                    miette::miette!(
                        "Seed product '{}' names unknown creator {}",
                        product_def.title,
                        email
                    )
                })?;
            Some(user.id)
        }
        None => None,
    };

    let mut bundle_children = Vec::with_capacity(product_def.bundle_children.len());
    for child_title in &product_def.bundle_children {
        let child_id = known_titles.get(child_title).ok_or_else(|| {
            miette::miette!(
                "Bundle '{}' references '{}', which must appear earlier in the seed file",
                product_def.title,
                child_title
            )
        })?;
        bundle_children.push(child_id.clone());
    }

    tracing::info!("Creating product: {}", product_def.title);
    let product = storage::create_product(
        db,
        NewProduct {
            product_type: product_def.product_type.clone(),
            title: product_def.title.clone(),
            creator_user_id,
            price_cents: product_def.price_cents,
            access_duration_days: product_def.access_duration_days,
            bundle_children,
        },
    )
    .await
    .into_diagnostic()?;

    known_titles.insert(product_def.title.clone(), product.id);
    Ok(SyncResult::Created)
}

/// Make sure at least one admin account exists so a fresh install is usable.
pub async fn ensure_default_admin(db: &DatabaseConnection) -> Result<()> {
    const DEFAULT_ADMIN_EMAIL: &str = "admin@example.com";

    if storage::get_user_by_email(db, DEFAULT_ADMIN_EMAIL)
        .await
        .into_diagnostic()?
        .is_some()
    {
        return Ok(());
    }

    storage::create_user(db, DEFAULT_ADMIN_EMAIL, "password123", "Administrator", "admin")
        .await
        .into_diagnostic()?;
    tracing::warn!(
        "Created default admin {} with a well-known password; change it before exposing this service",
        DEFAULT_ADMIN_EMAIL
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_db::TestDb;
    use serde_json::json;
    use std::io::Write;

    fn write_seed(value: &Value) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(value.to_string().as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_seed_creates_everything_once() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        let seed = json!({
            "users": [
                {"email": "t@school.example", "password": "pw", "display_name": "Ms. T", "role": "teacher"}
            ],
            "plans": [
                {"name": "Classroom", "benefits": {"game": 50, "workshop": -1}}
            ],
            "products": [
                {"product_type": "game", "title": "Fractions", "creator_email": "t@school.example", "price_cents": 900},
                {"product_type": "bundle", "title": "Math Pack", "bundle_children": ["Fractions"]}
            ]
        });
        let file = write_seed(&seed);

        seed_from_file(db, file.path().to_str().unwrap()).await.unwrap();

        let teacher = storage::get_user_by_email(db, "t@school.example")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(teacher.role, "teacher");

        let plan = storage::find_plan_by_name(db, "Classroom").await.unwrap().unwrap();
        assert_eq!(storage::plan_monthly_limit(&plan, "game").unwrap(), 50);

        let game = storage::find_product_by_title(db, "game", "Fractions")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(game.creator_user_id.as_deref(), Some(teacher.id.as_str()));

        let bundle = storage::find_product_by_title(db, "bundle", "Math Pack")
            .await
            .unwrap()
            .unwrap();
        let children = storage::list_bundle_children(db, &bundle.id).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, game.id);
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        let seed = json!({
            "users": [
                {"email": "t@school.example", "password": "pw", "display_name": "Ms. T"}
            ],
            "plans": [
                {"name": "Classroom", "benefits": {"game": 10}}
            ],
            "products": [
                {"product_type": "game", "title": "Fractions"}
            ]
        });
        let file = write_seed(&seed);
        let path = file.path().to_str().unwrap().to_string();

        seed_from_file(db, &path).await.unwrap();
        seed_from_file(db, &path).await.unwrap();

        let products = storage::list_products(db, Some("game")).await.unwrap();
        assert_eq!(products.len(), 1, "second run must not duplicate");
    }

    #[tokio::test]
    async fn test_seed_updates_changed_plan_and_user() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        let before = json!({
            "users": [{"email": "t@school.example", "password": "pw", "display_name": "Ms. T"}],
            "plans": [{"name": "Classroom", "benefits": {"game": 10}}]
        });
        let file = write_seed(&before);
        seed_from_file(db, file.path().to_str().unwrap()).await.unwrap();

        let after = json!({
            "users": [{"email": "t@school.example", "password": "other", "display_name": "Dr. T", "role": "admin"}],
            "plans": [{"name": "Classroom", "benefits": {"game": 25}}]
        });
        let file = write_seed(&after);
        seed_from_file(db, file.path().to_str().unwrap()).await.unwrap();

        let user = storage::get_user_by_email(db, "t@school.example")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.display_name, "Dr. T");
        assert_eq!(user.role, "admin");
        // Existing passwords are left alone
        assert!(storage::verify_user_password(db, "t@school.example", "pw")
            .await
            .unwrap()
            .is_some());

        let plan = storage::find_plan_by_name(db, "Classroom").await.unwrap().unwrap();
        assert_eq!(storage::plan_monthly_limit(&plan, "game").unwrap(), 25);
    }

    #[tokio::test]
    async fn test_seed_rejects_unknown_role_and_forward_bundle_refs() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        let bad_role = json!({
            "users": [{"email": "x@example.com", "password": "pw", "display_name": "X", "role": "wizard"}]
        });
        let file = write_seed(&bad_role);
        assert!(seed_from_file(db, file.path().to_str().unwrap()).await.is_err());

        let forward_ref = json!({
            "products": [
                {"product_type": "bundle", "title": "Pack", "bundle_children": ["Later"]},
                {"product_type": "game", "title": "Later"}
            ]
        });
        let file = write_seed(&forward_ref);
        assert!(seed_from_file(db, file.path().to_str().unwrap()).await.is_err());
    }

    #[tokio::test]
    async fn test_ensure_default_admin_once() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        ensure_default_admin(db).await.unwrap();
        ensure_default_admin(db).await.unwrap();

        let admin = storage::get_user_by_email(db, "admin@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(admin.role, "admin");
    }
}
