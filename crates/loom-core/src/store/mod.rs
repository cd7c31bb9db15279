pub mod database;
pub mod lock;
pub mod schema;
