pub mod business;
pub mod chat;
