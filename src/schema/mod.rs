//! Dialect-agnostic schema model.

mod column;
mod constraint;
mod path;
mod table;
mod view;

pub use column::{GeneratedType, GenerationStrategy, TableColumn};
pub use constraint::{
    ReferentialAction, TableCheck, TableExclusion, TableForeignKey, TableIndex, TableUnique,
};
pub use path::TablePath;
pub use table::{ConstraintRename, Table};
pub use view::{MetadataKind, View};
