pub mod gate;
pub mod health;
pub mod models;
pub mod table;
