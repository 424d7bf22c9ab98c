pub mod access_code;
pub mod api;
pub mod candidate;
pub mod election;
pub mod lease;
#[cfg(test)]
pub mod memory;
pub mod mongodb;
pub mod store;
pub mod voter;
