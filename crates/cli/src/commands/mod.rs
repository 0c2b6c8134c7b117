pub mod chat;
pub mod history;
pub mod onboard;
pub mod status;
