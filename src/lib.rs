pub mod config;
pub mod constants;
pub mod domain;
pub mod logging;
pub mod media;
pub mod services;
pub mod share;

#[cfg(test)]
mod testing;
