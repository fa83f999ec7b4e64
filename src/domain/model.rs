use chrono::NaiveDate;
use std::cmp::Ordering;

use crate::utils::error::{EtlError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Date,
    Float64,
    Int32,
    Utf8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

impl Field {
    pub fn required(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
            nullable: false,
        }
    }

    pub fn nullable(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
            nullable: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}

/// 單一儲存格的值
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Date(NaiveDate),
    Float(f64),
    Int(i64),
    Text(String),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn from_opt_text(s: Option<String>) -> Self {
        s.map(Value::Text).unwrap_or(Value::Null)
    }

    pub fn from_opt_float(f: Option<f64>) -> Self {
        f.map(Value::Float).unwrap_or(Value::Null)
    }

    pub fn from_opt_int(i: Option<i64>) -> Self {
        i.map(Value::Int).unwrap_or(Value::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    fn matches(&self, column_type: ColumnType) -> bool {
        match (self, column_type) {
            (Value::Null, _) => true,
            (Value::Date(_), ColumnType::Date) => true,
            (Value::Float(_), ColumnType::Float64) => true,
            (Value::Int(i), ColumnType::Int32) => i32::try_from(*i).is_ok(),
            (Value::Text(_), ColumnType::Utf8) => true,
            _ => false,
        }
    }

    /// 排序用：null 排最前面，同型別才比較
    fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

pub type Row = Vec<Value>;

/// 一個 pipeline 的完整輸出：固定 schema + 資料列
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub schema: Schema,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(name: &str, schema: Schema) -> Self {
        Self {
            name: name.to_string(),
            schema,
            rows: Vec::new(),
        }
    }

    pub fn with_rows(name: &str, schema: Schema, rows: Vec<Row>) -> Self {
        Self {
            name: name.to_string(),
            schema,
            rows,
        }
    }

    pub fn push(&mut self, row: Row) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &Value>> {
        let idx = self.schema.index_of(name)?;
        Some(self.rows.iter().map(move |row| &row[idx]))
    }

    /// 穩定排序，多欄位遞增
    pub fn sort_by(&mut self, columns: &[&str]) -> Result<()> {
        let indices = columns
            .iter()
            .map(|name| {
                self.schema.index_of(name).ok_or_else(|| {
                    EtlError::validation(format!(
                        "cannot sort {} by unknown column '{}'",
                        self.name, name
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.rows.sort_by(|a, b| {
            indices
                .iter()
                .map(|&i| a[i].sort_cmp(&b[i]))
                .find(|ord| *ord != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for (row_idx, row) in self.rows.iter().enumerate() {
            if row.len() != self.schema.len() {
                return Err(EtlError::validation(format!(
                    "{}: row {} has {} values, schema declares {} columns",
                    self.name,
                    row_idx,
                    row.len(),
                    self.schema.len()
                )));
            }

            for (value, field) in row.iter().zip(&self.schema.fields) {
                if value.is_null() && !field.nullable {
                    return Err(EtlError::validation(format!(
                        "{}: row {} has null in non-nullable column '{}'",
                        self.name, row_idx, field.name
                    )));
                }
                if !value.matches(field.column_type) {
                    return Err(EtlError::validation(format!(
                        "{}: row {} value {:?} does not fit column '{}' ({:?})",
                        self.name, row_idx, value, field.name, field.column_type
                    )));
                }
            }
        }
        Ok(())
    }
}
