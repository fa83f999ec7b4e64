pub mod etl;

pub use crate::domain::model::{ColumnType, Field, Row, Schema, Table, Value};
pub use crate::domain::ports::{Pipeline, Storage};
pub use crate::utils::error::Result;
