pub mod error;
pub mod query;
pub mod repository;
pub mod testing;

pub use error::StoreError;
pub use query::{AccountPage, InactiveQuery, PageCursor};
pub use repository::AccountRepository;
