pub mod entities_handler;
pub mod problem;
