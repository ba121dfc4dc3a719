//! Database metadata exposed as MCP resources under `db://schemas`.

pub mod tree;
pub mod uri;

pub use tree::{ResourceTree, SchemaSnapshot};
pub use uri::{ResourceTemplateDef, ResourceUri, TEMPLATES};
