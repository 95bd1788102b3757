mod mysql;

pub use mysql::{MySqlBackend, MySqlConfig};
