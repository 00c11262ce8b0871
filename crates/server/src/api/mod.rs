mod network;
mod records;
mod vehicles;

pub use network::*;
pub use records::*;
pub use vehicles::*;
