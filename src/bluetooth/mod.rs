pub mod client;
pub mod decoder;
pub mod scanner;

pub use client::Lywsd02Client;
pub use scanner::{AdvertisementReader, ScanConfig};
