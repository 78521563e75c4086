pub mod builders;
pub mod db;

pub use builders::{ProductBuilder, SubscriptionBuilder, UserBuilder};
pub use db::TestDb;
