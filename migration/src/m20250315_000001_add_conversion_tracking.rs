use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // First time a user left the free tier (conversion funnel)
        manager
            .alter_table(
                Table::alter()
                    .table(UserCredits::Table)
                    .add_column_if_not_exists(timestamp_with_time_zone_null(
                        UserCredits::ConvertedAt,
                    ))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_user_credits_converted_at")
                    .table(UserCredits::Table)
                    .col(UserCredits::ConvertedAt)
                    .to_owned(),
            )
            .await?;

        // Cross-user range scans for admin analytics
        manager
            .create_index(
                Index::create()
                    .name("idx_credit_transactions_created_at")
                    .table(CreditTransactions::Table)
                    .col(CreditTransactions::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_credit_transactions_created_at")
                    .table(CreditTransactions::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_user_credits_converted_at")
                    .table(UserCredits::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .alter_table(
                Table::alter()
                    .table(UserCredits::Table)
                    .drop_column(UserCredits::ConvertedAt)
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum UserCredits {
    Table,
    ConvertedAt,
}

#[derive(DeriveIden)]
enum CreditTransactions {
    Table,
    CreatedAt,
}
