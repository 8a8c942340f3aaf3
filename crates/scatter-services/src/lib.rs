//! scatter-services — chunked transfers, sessions, and local storage built
//! on scatter-core.

pub mod assemble;
pub mod chunker;
pub mod datastore;
pub mod error;
pub mod file_store;
pub mod key_store;
pub mod session;

pub use assemble::{assemble_into, discard, Assembled, Assembler};
pub use chunker::{hash_file, hash_source, Chunk, Chunker};
pub use datastore::{Datastore, MemoryDatastore, MessageBody, StoredMessage};
pub use error::TransferError;
pub use file_store::{Commit, FileStore, PartFile};
pub use key_store::FileKeyStore;
pub use session::{
    write_session, BlockDataStream, Completion, SessionPackets, SessionReader, SessionState,
    StoragePolicy,
};
