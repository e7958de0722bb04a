pub mod dto;
pub mod entity_service;
