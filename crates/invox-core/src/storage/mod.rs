pub mod dropbox;

pub use dropbox::{DropboxConnector, StorageError, StoredDocument, normalize_direct_url, sanitize_filename};
