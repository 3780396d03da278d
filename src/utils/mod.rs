pub mod duration;
pub mod host;
pub mod ids;
