pub mod animator;
pub mod api;
pub mod commands;
pub mod selection;
pub mod session;
pub mod store;
pub mod util;
