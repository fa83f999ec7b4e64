use chrono::NaiveDate;
use parquet::basic::{Compression, LogicalType, Repetition, Type as PhysicalType, ZstdLevel};
use parquet::data_type::{ByteArray, ByteArrayType, DoubleType, Int32Type};
use parquet::file::properties::{EnabledStatistics, WriterProperties, WriterVersion};
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::types::{Type, TypePtr};
use std::sync::Arc;

use crate::core::{ColumnType, Field, Schema, Table, Value};
use crate::utils::error::{EtlError, Result};

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

fn build_field(field: &Field) -> Result<TypePtr> {
    let (physical, logical) = match field.column_type {
        ColumnType::Date => (PhysicalType::INT32, Some(LogicalType::Date)),
        ColumnType::Float64 => (PhysicalType::DOUBLE, None),
        ColumnType::Int32 => (PhysicalType::INT32, None),
        ColumnType::Utf8 => (PhysicalType::BYTE_ARRAY, Some(LogicalType::String)),
    };
    let repetition = if field.nullable {
        Repetition::OPTIONAL
    } else {
        Repetition::REQUIRED
    };

    let ty = Type::primitive_type_builder(&field.name, physical)
        .with_logical_type(logical)
        .with_repetition(repetition)
        .build()?;
    Ok(Arc::new(ty))
}

pub fn build_schema(schema: &Schema) -> Result<TypePtr> {
    let fields = schema
        .fields
        .iter()
        .map(build_field)
        .collect::<Result<Vec<_>>>()?;

    let root = Type::group_type_builder("schema")
        .with_fields(fields)
        .build()?;
    Ok(Arc::new(root))
}

fn writer_properties() -> WriterProperties {
    WriterProperties::builder()
        .set_writer_version(WriterVersion::PARQUET_2_0)
        .set_compression(Compression::ZSTD(ZstdLevel::default()))
        .set_statistics_enabled(EnabledStatistics::Page)
        .build()
}

/// 依欄位取出非 null 值與 definition levels
fn column_values<'a, T>(
    table: &'a Table,
    idx: usize,
    field: &Field,
    convert: impl Fn(&'a Value) -> Option<T>,
) -> Result<(Vec<T>, Vec<i16>)> {
    let mut values = Vec::with_capacity(table.len());
    let mut def_levels = Vec::with_capacity(table.len());

    for row in &table.rows {
        let cell = &row[idx];
        if cell.is_null() {
            def_levels.push(0);
            continue;
        }
        let converted = convert(cell).ok_or_else(|| {
            EtlError::validation(format!(
                "{}: value {:?} does not fit column '{}'",
                table.name, cell, field.name
            ))
        })?;
        values.push(converted);
        def_levels.push(1);
    }

    Ok((values, def_levels))
}

/// 將 table 編碼成 zstd 壓縮的 Parquet bytes
///
/// 相同輸入一定產生相同 bytes，檔案內沒有時間戳。
pub fn encode_table(table: &Table) -> Result<Vec<u8>> {
    table.validate()?;

    let schema = build_schema(&table.schema)?;
    let mut buffer = Vec::new();
    let mut writer = SerializedFileWriter::new(&mut buffer, schema, Arc::new(writer_properties()))?;

    if !table.is_empty() {
        let mut row_group = writer.next_row_group()?;
        let mut idx = 0;

        while let Some(mut column) = row_group.next_column()? {
            let field = &table.schema.fields[idx];
            let defs = |levels: &[i16]| -> Option<Vec<i16>> {
                field.nullable.then(|| levels.to_vec())
            };

            match field.column_type {
                ColumnType::Date => {
                    let (values, levels) = column_values(table, idx, field, |v| {
                        v.as_date()
                            .map(|d| d.signed_duration_since(epoch()).num_days() as i32)
                    })?;
                    column
                        .typed::<Int32Type>()
                        .write_batch(&values, defs(&levels).as_deref(), None)?;
                }
                ColumnType::Int32 => {
                    let (values, levels) = column_values(table, idx, field, |v| match v {
                        Value::Int(i) => i32::try_from(*i).ok(),
                        _ => None,
                    })?;
                    column
                        .typed::<Int32Type>()
                        .write_batch(&values, defs(&levels).as_deref(), None)?;
                }
                ColumnType::Float64 => {
                    let (values, levels) = column_values(table, idx, field, |v| match v {
                        Value::Float(f) => Some(*f),
                        _ => None,
                    })?;
                    column
                        .typed::<DoubleType>()
                        .write_batch(&values, defs(&levels).as_deref(), None)?;
                }
                ColumnType::Utf8 => {
                    let (values, levels) = column_values(table, idx, field, |v| {
                        v.as_str().map(ByteArray::from)
                    })?;
                    column
                        .typed::<ByteArrayType>()
                        .write_batch(&values, defs(&levels).as_deref(), None)?;
                }
            }

            column.close()?;
            idx += 1;
        }

        row_group.close()?;
    }

    writer.close()?;
    Ok(buffer)
}
