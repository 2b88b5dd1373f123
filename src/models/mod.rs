pub mod api;
pub mod case;
pub mod job;
pub mod notification;
