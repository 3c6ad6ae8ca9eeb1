pub mod animals;
pub mod auth;
pub mod production;
pub mod system;
