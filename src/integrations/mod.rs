pub mod http;
pub mod notion;
pub mod todoist;
