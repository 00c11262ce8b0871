mod ingest;
mod vehicle;

pub use ingest::*;
pub use vehicle::*;
