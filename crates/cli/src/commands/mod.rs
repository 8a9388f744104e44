pub mod config_cmd;
pub mod history;
pub mod replay;
pub mod store;
