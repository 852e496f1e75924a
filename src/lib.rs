pub mod config;
pub mod messages;
pub mod mpc325;
pub mod runtime;
