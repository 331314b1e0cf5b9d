//! Target database implementations.

mod mysql;

pub use mysql::{MysqlSession, MysqlWriter};
