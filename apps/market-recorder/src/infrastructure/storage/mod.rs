//! Storage adapters implementing [`ConnectionFactory`].
//!
//! [`ConnectionFactory`]: crate::application::ports::ConnectionFactory

mod in_memory;
mod sqlite;

pub use in_memory::InMemoryStorage;
pub use sqlite::{SqliteConnectionFactory, count_rows};
