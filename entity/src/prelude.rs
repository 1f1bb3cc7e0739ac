pub use super::credit_transactions::Entity as CreditTransactions;
pub use super::user_credits::Entity as UserCredits;
