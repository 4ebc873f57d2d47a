pub mod fs;
pub mod version;
