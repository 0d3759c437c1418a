pub mod browser;
pub mod cli;
pub mod crawler;
pub mod protocol;
pub mod utils;
