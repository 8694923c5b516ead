pub mod board;
pub mod clock;
pub mod config;
pub mod demo;
pub mod interest;
pub mod item;
pub mod lifecycle;
pub mod registration;
