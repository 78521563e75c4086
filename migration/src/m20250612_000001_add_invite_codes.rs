use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Create invite_codes table (teacher-issued codes students redeem to
        // establish a teacher link)
        manager
            .create_table(
                Table::create()
                    .table(InviteCodes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(InviteCodes::Code)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(InviteCodes::TeacherUserId))
                    .col(big_integer_null(InviteCodes::ExpiresAt))
                    .col(big_integer(InviteCodes::MaxUses))
                    .col(
                        ColumnDef::new(InviteCodes::UseCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(big_integer(InviteCodes::CreatedAt))
                    .to_owned(),
            )
            .await?;

        // Create index on invite_codes.teacher_user_id
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_invite_codes_teacher")
                    .table(InviteCodes::Table)
                    .col(InviteCodes::TeacherUserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(InviteCodes::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum InviteCodes {
    Table,
    Code,
    TeacherUserId,
    ExpiresAt,
    MaxUses,
    UseCount,
    CreatedAt,
}
