use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub product_type: String, // "file" | "game" | "workshop" | "course" | "tool" | "lesson_plan" | "bundle"
    pub title: String,
    pub creator_user_id: Option<String>, // NULL = orphaned (system asset, no owner)
    pub price_cents: i64,
    pub access_duration_days: Option<i64>, // NULL = lifetime access
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
