mod repository;

pub use repository::MemoryAccountRepository;
