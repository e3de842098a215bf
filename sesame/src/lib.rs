pub mod commands;
pub mod compositor;
pub mod config;
pub mod error;
pub mod sockets;

pub use image::{Rgba, RgbaImage};
