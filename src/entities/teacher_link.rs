use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "teacher_links")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub student_user_id: String,
    pub teacher_user_id: String,
    pub source: String, // "invite" | "lobby"
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
