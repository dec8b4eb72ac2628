pub mod config;
mod connection;
pub mod dir;
pub mod error;
pub mod paths;
pub mod storage;
pub mod write_back;

pub use config::{ParamsError, StorageParams};
pub use dir::DirHandle;
pub use error::{ErrorKind, StorageError};
pub use storage::{
    DIRECTORY_MIME_TYPE, DavStorage, FileStream, FileType, FreeSpace, ReadStream, Stat,
};
pub use write_back::{ModeError, OpenMode, WriteBackError, WriteHandle};
