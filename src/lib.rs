pub mod catalog;
pub mod cities;
pub mod config;
pub mod data;
pub mod errors;
pub mod etl;
pub mod render;
pub mod routing;
pub mod session;
pub mod shell;
