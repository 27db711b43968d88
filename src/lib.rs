pub mod api;
pub mod booking;
pub mod config;
pub mod limits;
pub mod model;
pub mod observability;
pub mod session;
