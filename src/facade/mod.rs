pub mod upgrader;

pub use upgrader::Upgrader;
