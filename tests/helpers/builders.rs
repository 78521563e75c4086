use ludora::entities;
use ludora::storage::{self, NewProduct};
use sea_orm::DatabaseConnection;
use serde_json::{Map, Value};

/// Builder for creating test users
pub struct UserBuilder {
    email: String,
    password: String,
    display_name: String,
    role: String,
    enabled: bool,
}

impl UserBuilder {
    pub fn new(email: &str) -> Self {
        Self {
            email: email.to_string(),
            password: "password123".to_string(),
            display_name: email.to_string(),
            role: "teacher".to_string(),
            enabled: true,
        }
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = password.to_string();
        self
    }

    pub fn with_display_name(mut self, display_name: &str) -> Self {
        self.display_name = display_name.to_string();
        self
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.role = role.to_string();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub async fn create(self, db: &DatabaseConnection) -> entities::user::Model {
        let user = storage::create_user(
            db,
            &self.email,
            &self.password,
            &self.display_name,
            &self.role,
        )
        .await
        .expect("Failed to create test user");

        if !self.enabled {
            storage::update_user(db, &user.id, None, None, Some(false))
                .await
                .expect("Failed to disable test user");
            return storage::get_user(db, &user.id)
                .await
                .expect("Failed to reload test user")
                .expect("Test user not found");
        }

        user
    }
}

/// Builder for creating test products
pub struct ProductBuilder {
    product_type: String,
    title: String,
    creator_user_id: Option<String>,
    price_cents: i64,
    access_duration_days: Option<i64>,
    bundle_children: Vec<String>,
}

impl ProductBuilder {
    pub fn new(product_type: &str, title: &str) -> Self {
        Self {
            product_type: product_type.to_string(),
            title: title.to_string(),
            creator_user_id: None,
            price_cents: 499,
            access_duration_days: None,
            bundle_children: Vec::new(),
        }
    }

    pub fn by_creator(mut self, user_id: &str) -> Self {
        self.creator_user_id = Some(user_id.to_string());
        self
    }

    pub fn with_price(mut self, cents: i64) -> Self {
        self.price_cents = cents;
        self
    }

    pub fn expires_after_days(mut self, days: i64) -> Self {
        self.access_duration_days = Some(days);
        self
    }

    pub fn with_children(mut self, child_ids: Vec<String>) -> Self {
        self.bundle_children = child_ids;
        self
    }

    pub async fn create(self, db: &DatabaseConnection) -> entities::product::Model {
        storage::create_product(
            db,
            NewProduct {
                product_type: self.product_type,
                title: self.title,
                creator_user_id: self.creator_user_id,
                price_cents: self.price_cents,
                access_duration_days: self.access_duration_days,
                bundle_children: self.bundle_children,
            },
        )
        .await
        .expect("Failed to create test product")
    }
}

/// Builder for creating an active subscription backed by a fresh plan
pub struct SubscriptionBuilder {
    user_id: String,
    plan_name: String,
    benefits: Map<String, Value>,
    expires_at: Option<i64>,
}

impl SubscriptionBuilder {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            plan_name: "Classroom Plan".to_string(),
            benefits: Map::new(),
            expires_at: None,
        }
    }

    pub fn with_plan_name(mut self, name: &str) -> Self {
        self.plan_name = name.to_string();
        self
    }

    /// Monthly claim limit the plan grants for one product type; -1 means
    /// unlimited.
    pub fn with_limit(mut self, product_type: &str, limit: i64) -> Self {
        self.benefits
            .insert(product_type.to_string(), Value::from(limit));
        self
    }

    pub fn expiring_at(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub async fn create(self, db: &DatabaseConnection) -> entities::subscription::Model {
        let plan = storage::create_plan(db, &self.plan_name, &Value::Object(self.benefits))
            .await
            .expect("Failed to create test plan");
        storage::create_subscription(db, &self.user_id, &plan.id, self.expires_at)
            .await
            .expect("Failed to create test subscription")
    }
}
