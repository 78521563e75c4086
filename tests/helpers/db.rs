use ludora::entities;
use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, Set};
use sea_orm_migration::MigratorTrait;
use tempfile::NamedTempFile;

/// Test database with automatic cleanup
pub struct TestDb {
    connection: DatabaseConnection,
    _temp_file: NamedTempFile,
}

impl TestDb {
    /// Create a new test database with migrations applied
    pub async fn new() -> Self {
        // Create temporary SQLite database file
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let db_path = temp_file.path().to_str().expect("Invalid temp file path");
        let db_url = format!("sqlite://{}?mode=rwc", db_path);

        // Connect to database
        let connection = Database::connect(&db_url)
            .await
            .expect("Failed to connect to test database");

        // Run migrations
        migration::Migrator::up(&connection, None)
            .await
            .expect("Failed to run migrations");

        Self {
            connection,
            _temp_file: temp_file,
        }
    }

    /// Get database connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }
}

/// Create a test user with the given role. Every seeded user logs in with
/// "password123".
pub async fn seed_user(
    db: &DatabaseConnection,
    email: &str,
    role: &str,
) -> ludora::entities::user::Model {
    ludora::storage::create_user(db, email, "password123", email, role)
        .await
        .expect("Failed to create test user")
}

/// Insert a completed purchase row directly, bypassing `grant_access`, so
/// tests can control the expiry timestamp (including already-past ones).
pub async fn seed_completed_purchase(
    db: &DatabaseConnection,
    buyer_user_id: &str,
    product_id: &str,
    access_expires_at: Option<i64>,
) -> entities::purchase::Model {
    let now = chrono::Utc::now().timestamp();
    let purchase = entities::purchase::ActiveModel {
        id: Default::default(),
        buyer_user_id: Set(buyer_user_id.to_string()),
        product_id: Set(product_id.to_string()),
        payment_status: Set("completed".to_string()),
        access_expires_at: Set(access_expires_at),
        bundle_parent_purchase_id: Set(None),
        created_at: Set(now),
        completed_at: Set(Some(now)),
    };
    purchase
        .insert(db)
        .await
        .expect("Failed to insert test purchase")
}
