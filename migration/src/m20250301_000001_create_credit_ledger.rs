use sea_orm_migration::sea_query::extension::postgres::Type;
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_type(
                Type::create()
                    .as_enum(SubscriptionTier::Type)
                    .values([
                        SubscriptionTier::Free,
                        SubscriptionTier::Basic,
                        SubscriptionTier::Premium,
                        SubscriptionTier::Enterprise,
                    ])
                    .to_owned(),
            )
            .await?;

        manager
            .create_type(
                Type::create()
                    .as_enum(SubscriptionStatus::Type)
                    .values([
                        SubscriptionStatus::Active,
                        SubscriptionStatus::Inactive,
                        SubscriptionStatus::Cancelled,
                        SubscriptionStatus::PastDue,
                    ])
                    .to_owned(),
            )
            .await?;

        manager
            .create_type(
                Type::create()
                    .as_enum(TransactionType::Type)
                    .values([
                        TransactionType::Addition,
                        TransactionType::Deduction,
                        TransactionType::Refund,
                    ])
                    .to_owned(),
            )
            .await?;

        // One row per user; the balance is a materialized view of the transaction log
        manager
            .create_table(
                Table::create()
                    .table(UserCredits::Table)
                    .if_not_exists()
                    .col(string(UserCredits::UserId).primary_key())
                    .col(integer(UserCredits::Credits).default(0).not_null())
                    .col(
                        ColumnDef::new(UserCredits::SubscriptionTier)
                            .custom(SubscriptionTier::Type)
                            .not_null()
                            .default(SimpleExpr::Custom(
                                "'free'::subscription_tier".to_string(),
                            )),
                    )
                    .col(
                        ColumnDef::new(UserCredits::SubscriptionStatus)
                            .custom(SubscriptionStatus::Type)
                            .not_null()
                            .default(SimpleExpr::Custom(
                                "'active'::subscription_status".to_string(),
                            )),
                    )
                    .col(
                        timestamp_with_time_zone(UserCredits::LastCreditUpdate)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .col(
                        timestamp_with_time_zone(UserCredits::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .col(
                        timestamp_with_time_zone(UserCredits::UpdatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .check(Expr::col(UserCredits::Credits).gte(0))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_user_credits_subscription_tier")
                    .table(UserCredits::Table)
                    .col(UserCredits::SubscriptionTier)
                    .to_owned(),
            )
            .await?;

        // Append-only audit log, no foreign key to user_credits
        manager
            .create_table(
                Table::create()
                    .table(CreditTransactions::Table)
                    .if_not_exists()
                    .col(pk_uuid(CreditTransactions::Id))
                    .col(string(CreditTransactions::UserId).not_null())
                    .col(
                        ColumnDef::new(CreditTransactions::TransactionType)
                            .custom(TransactionType::Type)
                            .not_null(),
                    )
                    .col(integer(CreditTransactions::Amount).not_null())
                    .col(text(CreditTransactions::Reason).not_null())
                    .col(integer(CreditTransactions::BalanceAfter).not_null())
                    .col(
                        json_binary(CreditTransactions::Metadata)
                            .default(Expr::cust("'{}'::jsonb"))
                            .not_null(),
                    )
                    .col(
                        timestamp_with_time_zone(CreditTransactions::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .check(Expr::col(CreditTransactions::Amount).gte(0))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_credit_transactions_user_created")
                    .table(CreditTransactions::Table)
                    .col(CreditTransactions::UserId)
                    .col(CreditTransactions::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CreditTransactions::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(UserCredits::Table).to_owned())
            .await?;

        manager
            .drop_type(Type::drop().name(TransactionType::Type).to_owned())
            .await?;

        manager
            .drop_type(Type::drop().name(SubscriptionStatus::Type).to_owned())
            .await?;

        manager
            .drop_type(Type::drop().name(SubscriptionTier::Type).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum UserCredits {
    Table,
    UserId,
    Credits,
    SubscriptionTier,
    SubscriptionStatus,
    LastCreditUpdate,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum CreditTransactions {
    Table,
    Id,
    UserId,
    TransactionType,
    Amount,
    Reason,
    BalanceAfter,
    Metadata,
    CreatedAt,
}

#[derive(DeriveIden)]
enum SubscriptionTier {
    #[sea_orm(iden = "subscription_tier")]
    Type,
    Free,
    Basic,
    Premium,
    Enterprise,
}

#[derive(DeriveIden)]
enum SubscriptionStatus {
    #[sea_orm(iden = "subscription_status")]
    Type,
    Active,
    Inactive,
    Cancelled,
    PastDue,
}

#[derive(DeriveIden)]
enum TransactionType {
    #[sea_orm(iden = "transaction_type")]
    Type,
    Addition,
    Deduction,
    Refund,
}
