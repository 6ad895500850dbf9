pub mod command_service;
pub mod notification_service;
pub mod registry;
pub mod resolver;
