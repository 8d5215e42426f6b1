pub mod config;
pub mod frame;
pub mod pcd;
pub mod settings;
