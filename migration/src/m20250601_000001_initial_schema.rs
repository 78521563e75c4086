use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

/// Auto-increment primary key with a backend-specific integer type.
/// SQLite only auto-increments INTEGER primary keys, Postgres wants BIGINT.
fn auto_pk(backend: sea_orm::DatabaseBackend, col: impl IntoIden) -> ColumnDef {
    match backend {
        sea_orm::DatabaseBackend::Postgres => ColumnDef::new(col)
            .big_integer()
            .not_null()
            .auto_increment()
            .primary_key()
            .to_owned(),
        _ => ColumnDef::new(col)
            .integer()
            .not_null()
            .auto_increment()
            .primary_key()
            .to_owned(),
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();

        // Enable foreign keys for SQLite
        if backend == sea_orm::DatabaseBackend::Sqlite {
            manager
                .get_connection()
                .execute_unprepared("PRAGMA foreign_keys = ON")
                .await?;
        }

        // Create users table
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Users::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Users::Email)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(string(Users::PasswordHash))
                    .col(string(Users::DisplayName))
                    .col(string(Users::Role))
                    .col(
                        ColumnDef::new(Users::Enabled)
                            .big_integer()
                            .not_null()
                            .default(1),
                    )
                    .col(big_integer(Users::CreatedAt))
                    .to_owned(),
            )
            .await?;

        // Create sessions table
        manager
            .create_table(
                Table::create()
                    .table(Sessions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Sessions::Token)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(Sessions::UserId))
                    .col(big_integer(Sessions::CreatedAt))
                    .col(big_integer(Sessions::ExpiresAt))
                    .col(string_null(Sessions::UserAgent))
                    .col(string_null(Sessions::IpAddress))
                    .to_owned(),
            )
            .await?;

        // Create index on sessions.expires_at
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_sessions_expires")
                    .table(Sessions::Table)
                    .col(Sessions::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        // Create products table
        manager
            .create_table(
                Table::create()
                    .table(Products::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Products::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(Products::ProductType))
                    .col(string(Products::Title))
                    .col(string_null(Products::CreatorUserId))
                    .col(big_integer(Products::PriceCents))
                    .col(big_integer_null(Products::AccessDurationDays))
                    .col(big_integer(Products::CreatedAt))
                    .to_owned(),
            )
            .await?;

        // Create index on products.creator_user_id
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_products_creator")
                    .table(Products::Table)
                    .col(Products::CreatorUserId)
                    .to_owned(),
            )
            .await?;

        // Create bundle_items table
        manager
            .create_table(
                Table::create()
                    .table(BundleItems::Table)
                    .if_not_exists()
                    .col(string(BundleItems::BundleProductId))
                    .col(string(BundleItems::ChildProductId))
                    .primary_key(
                        Index::create()
                            .col(BundleItems::BundleProductId)
                            .col(BundleItems::ChildProductId),
                    )
                    .to_owned(),
            )
            .await?;

        // Create purchases table
        manager
            .create_table(
                Table::create()
                    .table(Purchases::Table)
                    .if_not_exists()
                    .col(auto_pk(backend, Purchases::Id))
                    .col(string(Purchases::BuyerUserId))
                    .col(string(Purchases::ProductId))
                    .col(string(Purchases::PaymentStatus))
                    .col(big_integer_null(Purchases::AccessExpiresAt))
                    .col(big_integer_null(Purchases::BundleParentPurchaseId))
                    .col(big_integer(Purchases::CreatedAt))
                    .col(big_integer_null(Purchases::CompletedAt))
                    .to_owned(),
            )
            .await?;

        // Create index on purchases (buyer, product) for entitlement lookups
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_purchases_buyer_product")
                    .table(Purchases::Table)
                    .col(Purchases::BuyerUserId)
                    .col(Purchases::ProductId)
                    .to_owned(),
            )
            .await?;

        // Create plans table
        manager
            .create_table(
                Table::create()
                    .table(Plans::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Plans::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(Plans::Name))
                    .col(string(Plans::Benefits))
                    .col(big_integer(Plans::CreatedAt))
                    .to_owned(),
            )
            .await?;

        // Create subscriptions table
        manager
            .create_table(
                Table::create()
                    .table(Subscriptions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Subscriptions::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(Subscriptions::UserId))
                    .col(string(Subscriptions::PlanId))
                    .col(string(Subscriptions::Status))
                    .col(big_integer(Subscriptions::StartedAt))
                    .col(big_integer_null(Subscriptions::ExpiresAt))
                    .to_owned(),
            )
            .await?;

        // Create index on subscriptions.user_id
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_subscriptions_user")
                    .table(Subscriptions::Table)
                    .col(Subscriptions::UserId)
                    .to_owned(),
            )
            .await?;

        // Create allowances table (monthly usage buckets, one row per
        // subscription + billing month + product type)
        manager
            .create_table(
                Table::create()
                    .table(Allowances::Table)
                    .if_not_exists()
                    .col(string(Allowances::SubscriptionId))
                    .col(string(Allowances::MonthYear))
                    .col(string(Allowances::ProductType))
                    .col(
                        ColumnDef::new(Allowances::Used)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(big_integer(Allowances::MonthlyLimit))
                    .primary_key(
                        Index::create()
                            .col(Allowances::SubscriptionId)
                            .col(Allowances::MonthYear)
                            .col(Allowances::ProductType),
                    )
                    .to_owned(),
            )
            .await?;

        // Create subscription_claims table
        manager
            .create_table(
                Table::create()
                    .table(SubscriptionClaims::Table)
                    .if_not_exists()
                    .col(auto_pk(backend, SubscriptionClaims::Id))
                    .col(string(SubscriptionClaims::SubscriptionId))
                    .col(string(SubscriptionClaims::UserId))
                    .col(string(SubscriptionClaims::MonthYear))
                    .col(string(SubscriptionClaims::ProductType))
                    .col(string(SubscriptionClaims::ProductId))
                    .col(big_integer(SubscriptionClaims::CreatedAt))
                    .to_owned(),
            )
            .await?;

        // One claim per product per billing bucket; claim idempotency and the
        // concurrent-claim guard both hang off this index
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_claims_bucket_product")
                    .table(SubscriptionClaims::Table)
                    .col(SubscriptionClaims::SubscriptionId)
                    .col(SubscriptionClaims::MonthYear)
                    .col(SubscriptionClaims::ProductType)
                    .col(SubscriptionClaims::ProductId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Create teacher_links table
        manager
            .create_table(
                Table::create()
                    .table(TeacherLinks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TeacherLinks::StudentUserId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(TeacherLinks::TeacherUserId))
                    .col(string(TeacherLinks::Source))
                    .col(big_integer(TeacherLinks::CreatedAt))
                    .to_owned(),
            )
            .await?;

        // Create app_settings table
        manager
            .create_table(
                Table::create()
                    .table(AppSettings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AppSettings::Key)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(AppSettings::Value))
                    .col(big_integer(AppSettings::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        // Create job_executions table
        manager
            .create_table(
                Table::create()
                    .table(JobExecutions::Table)
                    .if_not_exists()
                    .col(auto_pk(backend, JobExecutions::Id))
                    .col(string(JobExecutions::JobName))
                    .col(big_integer(JobExecutions::StartedAt))
                    .col(big_integer_null(JobExecutions::CompletedAt))
                    .col(big_integer_null(JobExecutions::Success))
                    .col(string_null(JobExecutions::ErrorMessage))
                    .col(big_integer_null(JobExecutions::RecordsProcessed))
                    .to_owned(),
            )
            .await?;

        // Create index on job_executions.started_at
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_job_executions_started")
                    .table(JobExecutions::Table)
                    .col(JobExecutions::StartedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(JobExecutions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AppSettings::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TeacherLinks::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SubscriptionClaims::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Allowances::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Subscriptions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Plans::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Purchases::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(BundleItems::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Products::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Sessions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
    Email,
    PasswordHash,
    DisplayName,
    Role,
    Enabled,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Sessions {
    Table,
    Token,
    UserId,
    CreatedAt,
    ExpiresAt,
    UserAgent,
    IpAddress,
}

#[derive(DeriveIden)]
enum Products {
    Table,
    Id,
    ProductType,
    Title,
    CreatorUserId,
    PriceCents,
    AccessDurationDays,
    CreatedAt,
}

#[derive(DeriveIden)]
enum BundleItems {
    Table,
    BundleProductId,
    ChildProductId,
}

#[derive(DeriveIden)]
enum Purchases {
    Table,
    Id,
    BuyerUserId,
    ProductId,
    PaymentStatus,
    AccessExpiresAt,
    BundleParentPurchaseId,
    CreatedAt,
    CompletedAt,
}

#[derive(DeriveIden)]
enum Plans {
    Table,
    Id,
    Name,
    Benefits,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Subscriptions {
    Table,
    Id,
    UserId,
    PlanId,
    Status,
    StartedAt,
    ExpiresAt,
}

#[derive(DeriveIden)]
enum Allowances {
    Table,
    SubscriptionId,
    MonthYear,
    ProductType,
    Used,
    MonthlyLimit,
}

#[derive(DeriveIden)]
enum SubscriptionClaims {
    Table,
    Id,
    SubscriptionId,
    UserId,
    MonthYear,
    ProductType,
    ProductId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum TeacherLinks {
    Table,
    StudentUserId,
    TeacherUserId,
    Source,
    CreatedAt,
}

#[derive(DeriveIden)]
enum AppSettings {
    Table,
    Key,
    Value,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum JobExecutions {
    Table,
    Id,
    JobName,
    StartedAt,
    CompletedAt,
    Success,
    ErrorMessage,
    RecordsProcessed,
}
