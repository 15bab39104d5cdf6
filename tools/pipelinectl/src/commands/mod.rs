pub mod config;
pub mod invoke;
pub mod route;
pub mod stacks;
