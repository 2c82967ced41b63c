//! Concrete collaborator implementations

pub mod memory;

pub use memory::{
    MemoryAuthenticator, MemoryCommandGateway, MemoryLogRepository, MemoryTransactionRepository,
};
