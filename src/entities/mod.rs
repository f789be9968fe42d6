pub mod connection;
pub mod mapping_account;
pub mod organization;
pub mod source_account;
pub mod user;

pub use connection::Entity as Connection;
pub use mapping_account::Entity as MappingAccount;
pub use organization::Entity as Organization;
pub use source_account::Entity as SourceAccount;
pub use user::Entity as User;
