pub mod command;
pub mod status;

pub use command::Command;
pub use status::ConnectionState;
