//! Request and response types for the JSON API.

pub mod products;
pub mod try_on;
