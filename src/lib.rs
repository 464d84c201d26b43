pub mod critical;
pub mod error;
pub mod lock;
pub mod model;
pub mod oplog;
pub mod rotate;
pub mod store;
pub mod verify;
pub mod writer;

/// Tool identity recorded in every manifest.
pub const TOOL: &str = concat!("snapkeep ", env!("CARGO_PKG_VERSION"));
