pub mod activity_log;
pub mod actuator;
pub mod bus;
pub mod debouncer;
pub mod geometry;
pub mod gesture;
pub mod history;
pub mod identity;
pub mod movement;
pub mod tracking_controller;
