// src/lib.rs
pub mod builtins;
pub mod column;
pub mod error;
pub mod extras;
pub mod flatten;
pub mod io;
pub mod pipeline;
pub mod records;
pub mod table;
pub mod variables;

pub use error::*;
pub use pipeline::*;

pub use column::{Column, ColumnKind};
pub use extras::{Extra, ExtraData};
pub use records::{Fields, Numbering, Record, Records, RowNumbers, MAX_ROW_NUM, ROW_NUM_FIELD};
pub use table::Table;
pub use variables::Variables;
