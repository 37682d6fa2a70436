pub mod fs;
pub mod memory;

pub use fs::FsPartStore;
pub use memory::InMemoryPartStore;
