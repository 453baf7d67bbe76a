pub mod delivery;
pub mod message_service;
