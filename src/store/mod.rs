pub mod error;
pub mod filestore;
pub mod memory;
pub mod traits;

pub use error::StoreError;
pub use filestore::FileCredentialStore;
pub use memory::MemoryCredentialStore;
pub use traits::CredentialStore;
