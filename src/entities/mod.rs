pub mod allowance;
pub mod allowance_adjustment;
pub mod app_setting;
pub mod bundle_item;
pub mod invite_code;
pub mod job_execution;
pub mod plan;
pub mod product;
pub mod purchase;
pub mod session;
pub mod subscription;
pub mod subscription_claim;
pub mod teacher_link;
pub mod user;

pub use allowance::Entity as Allowance;
pub use allowance_adjustment::Entity as AllowanceAdjustment;
pub use app_setting::Entity as AppSetting;
pub use bundle_item::Entity as BundleItem;
pub use invite_code::Entity as InviteCode;
pub use job_execution::Entity as JobExecution;
pub use plan::Entity as Plan;
pub use product::Entity as Product;
pub use purchase::Entity as Purchase;
pub use session::Entity as Session;
pub use subscription::Entity as Subscription;
pub use subscription_claim::Entity as SubscriptionClaim;
pub use teacher_link::Entity as TeacherLink;
pub use user::Entity as User;
