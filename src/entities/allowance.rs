use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "allowances")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub subscription_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub month_year: String, // billing bucket key, "YYYY-MM"
    #[sea_orm(primary_key, auto_increment = false)]
    pub product_type: String,
    pub used: i64,
    pub monthly_limit: i64, // -1 = unlimited; snapshotted from the plan at bucket creation
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
