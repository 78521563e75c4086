use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();

        // Audit trail for manual allowance corrections; one row per adjust call
        let id_col = match backend {
            sea_orm::DatabaseBackend::Postgres => ColumnDef::new(AllowanceAdjustments::Id)
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key()
                .to_owned(),
            _ => ColumnDef::new(AllowanceAdjustments::Id)
                .integer()
                .not_null()
                .auto_increment()
                .primary_key()
                .to_owned(),
        };

        manager
            .create_table(
                Table::create()
                    .table(AllowanceAdjustments::Table)
                    .if_not_exists()
                    .col(id_col)
                    .col(string(AllowanceAdjustments::SubscriptionId))
                    .col(string(AllowanceAdjustments::ProductType))
                    .col(string(AllowanceAdjustments::MonthYear))
                    .col(big_integer(AllowanceAdjustments::Delta))
                    .col(big_integer(AllowanceAdjustments::LimitBefore))
                    .col(big_integer(AllowanceAdjustments::LimitAfter))
                    .col(string(AllowanceAdjustments::Reason))
                    .col(string(AllowanceAdjustments::AdjustedBy))
                    .col(big_integer(AllowanceAdjustments::CreatedAt))
                    .to_owned(),
            )
            .await?;

        // Create index on allowance_adjustments.subscription_id
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_allowance_adjustments_subscription")
                    .table(AllowanceAdjustments::Table)
                    .col(AllowanceAdjustments::SubscriptionId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AllowanceAdjustments::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum AllowanceAdjustments {
    Table,
    Id,
    SubscriptionId,
    ProductType,
    MonthYear,
    Delta,
    LimitBefore,
    LimitAfter,
    Reason,
    AdjustedBy,
    CreatedAt,
}
