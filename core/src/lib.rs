pub mod avatar;
pub mod error;
pub mod model;
pub mod wire;
