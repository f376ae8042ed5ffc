//! Per-connection sessions
//!
//! Every accepted connection becomes exactly one [`IngestSession`] or one
//! [`ViewerSession`], depending on its request line.

pub mod context;
pub mod ingest;
pub mod viewer;

pub use context::{SessionContext, SessionRole};
pub use ingest::IngestSession;
pub use viewer::ViewerSession;
