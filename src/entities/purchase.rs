use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "purchases")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = true)]
    pub id: i64,
    pub buyer_user_id: String,
    pub product_id: String,
    pub payment_status: String, // "cart" | "pending" | "completed" | "failed" | "refunded"
    pub access_expires_at: Option<i64>, // NULL = lifetime
    pub bundle_parent_purchase_id: Option<i64>, // set on auto-created bundle child rows
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
