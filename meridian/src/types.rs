//! Typed values, schemas, and tuple serialization.

use std::cmp::Ordering;
use std::fmt;

use bytes::{Buf, BufMut, BytesMut};
use chrono::{Datelike, NaiveDate};

use crate::errors::ExecutionError;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataType {
    Int,
    Varchar,
    Bool,
    Date,
}

/// A single column value. `Null` is a member of every type and sorts lowest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Int(i64),
    Varchar(String),
    Bool(bool),
    Date(NaiveDate),
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric addition for aggregation; anything non-numeric yields Null.
    pub fn add(&self, other: &Value) -> Value {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Value::Int(a + b),
            _ => Value::Null,
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Int(_) => 2,
                Value::Date(_) => 3,
                Value::Varchar(_) => 4,
            }
        }
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Varchar(a), Value::Varchar(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Varchar(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{}", if *v { "t" } else { "f" }),
            Value::Date(v) => write!(f, "{v}"),
            Value::Null => write!(f, "<NULL>"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    pub columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, idx: usize) -> &Column {
        &self.columns[idx]
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// A schema containing only the columns at `attrs`, in order.
    pub fn narrowed(&self, attrs: &[usize]) -> Schema {
        Schema {
            columns: attrs.iter().map(|&i| self.columns[i].clone()).collect(),
        }
    }
}

/// An ordered list of values matching some schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    pub values: Vec<Value>,
}

impl Tuple {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn value(&self, idx: usize) -> &Value {
        &self.values[idx]
    }

    /// Serializes values in order: a presence byte per value, then the
    /// payload. Deserialization is schema-driven.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for value in &self.values {
            match value {
                Value::Null => buf.put_u8(0),
                Value::Int(v) => {
                    buf.put_u8(1);
                    buf.put_i64(*v);
                }
                Value::Varchar(v) => {
                    buf.put_u8(1);
                    buf.put_u32(v.len() as u32);
                    buf.put_slice(v.as_bytes());
                }
                Value::Bool(v) => {
                    buf.put_u8(1);
                    buf.put_u8(*v as u8);
                }
                Value::Date(v) => {
                    buf.put_u8(1);
                    buf.put_i32(v.num_days_from_ce());
                }
            }
        }
        buf.to_vec()
    }

    pub fn deserialize(data: &[u8], schema: &Schema) -> Result<Tuple, ExecutionError> {
        let mut buf = data;
        let mut values = Vec::with_capacity(schema.column_count());
        for column in &schema.columns {
            if buf.remaining() < 1 {
                return Err(ExecutionError::TupleDecode(format!(
                    "payload exhausted before column {}",
                    column.name
                )));
            }
            if buf.get_u8() == 0 {
                values.push(Value::Null);
                continue;
            }
            let value = match column.data_type {
                DataType::Int => {
                    check_remaining(buf.remaining(), 8, &column.name)?;
                    Value::Int(buf.get_i64())
                }
                DataType::Varchar => {
                    check_remaining(buf.remaining(), 4, &column.name)?;
                    let len = buf.get_u32() as usize;
                    check_remaining(buf.remaining(), len, &column.name)?;
                    let s = String::from_utf8_lossy(&buf[..len]).into_owned();
                    buf.advance(len);
                    Value::Varchar(s)
                }
                DataType::Bool => {
                    check_remaining(buf.remaining(), 1, &column.name)?;
                    Value::Bool(buf.get_u8() != 0)
                }
                DataType::Date => {
                    check_remaining(buf.remaining(), 4, &column.name)?;
                    let days = buf.get_i32();
                    Value::Date(NaiveDate::from_num_days_from_ce_opt(days).ok_or_else(
                        || {
                            ExecutionError::TupleDecode(format!(
                                "invalid date payload in column {}",
                                column.name
                            ))
                        },
                    )?)
                }
            };
            values.push(value);
        }
        Ok(Tuple { values })
    }

    pub fn to_string_row(&self) -> Vec<String> {
        self.values.iter().map(|v| v.to_string()).collect()
    }
}

fn check_remaining(remaining: usize, needed: usize, column: &str) -> Result<(), ExecutionError> {
    if remaining < needed {
        return Err(ExecutionError::TupleDecode(format!(
            "payload exhausted inside column {column}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        Schema::new(vec![
            Column::new("id", DataType::Int),
            Column::new("name", DataType::Varchar),
            Column::new("active", DataType::Bool),
            Column::new("joined", DataType::Date),
        ])
    }

    #[test]
    fn serialize_deserialize_round_trips() {
        let schema = sample_schema();
        let tuple = Tuple::new(vec![
            Value::Int(42),
            Value::Varchar("meridian".to_string()),
            Value::Bool(true),
            Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()),
        ]);
        let bytes = tuple.serialize();
        let decoded = Tuple::deserialize(&bytes, &schema).unwrap();
        assert_eq!(decoded, tuple);
    }

    #[test]
    fn nulls_survive_serialization() {
        let schema = sample_schema();
        let tuple = Tuple::new(vec![Value::Null, Value::Null, Value::Null, Value::Null]);
        let decoded = Tuple::deserialize(&tuple.serialize(), &schema).unwrap();
        assert!(decoded.values.iter().all(Value::is_null));
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let schema = sample_schema();
        let tuple = Tuple::new(vec![
            Value::Int(1),
            Value::Varchar("x".to_string()),
            Value::Bool(false),
            Value::Null,
        ]);
        let mut bytes = tuple.serialize();
        bytes.truncate(bytes.len() - 3);
        assert!(Tuple::deserialize(&bytes, &schema).is_err());
    }

    #[test]
    fn null_sorts_below_everything() {
        assert!(Value::Null < Value::Int(i64::MIN));
        assert!(Value::Null < Value::Bool(false));
        assert!(Value::Int(3) < Value::Int(5));
        assert!(Value::Varchar("a".into()) < Value::Varchar("b".into()));
    }

    #[test]
    fn narrowed_schema_projects_columns() {
        let schema = sample_schema();
        let narrow = schema.narrowed(&[0, 2]);
        assert_eq!(narrow.column_count(), 2);
        assert_eq!(narrow.column(0).name, "id");
        assert_eq!(narrow.column(1).name, "active");
    }
}
