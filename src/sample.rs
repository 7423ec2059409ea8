//! Decoded status values: the operation-mode enum, the `Value` union, and
//! the ordered `Sample` a full status decode produces.

use rust_decimal::Decimal;

use crate::error::SchemaError;

/// Inverter operating state, as shown by the vendor's own monitoring tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    Wait,
    Normal,
    Fault,
    PermanentFault,
    Check,
    PvPowerOff,
}

impl OperationMode {
    pub fn from_code(code: u16) -> Result<Self, SchemaError> {
        match code {
            0 => Ok(Self::Wait),
            1 => Ok(Self::Normal),
            2 => Ok(Self::Fault),
            3 => Ok(Self::PermanentFault),
            4 => Ok(Self::Check),
            5 => Ok(Self::PvPowerOff),
            other => Err(SchemaError::UnknownOperationMode(other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wait => "Wait",
            Self::Normal => "Normal",
            Self::Fault => "Fault",
            Self::PermanentFault => "Permanent fault",
            Self::Check => "Check",
            Self::PvPowerOff => "PV power off",
        }
    }
}

impl std::fmt::Display for OperationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The value of one decoded status field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Decimal(Decimal),
    OperationMode(OperationMode),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Decimal(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_operation_mode(&self) -> Option<OperationMode> {
        match self {
            Value::OperationMode(v) => Some(*v),
            _ => None,
        }
    }
}

/// One decoded status snapshot: field name to value, in the order the
/// field registry declares them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sample {
    fields: Vec<(&'static str, Value)>,
}

impl Sample {
    pub(crate) fn new(fields: Vec<(&'static str, Value)>) -> Self {
        Self { fields }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn decimal(&self, name: &str) -> Option<Decimal> {
        self.get(name).and_then(Value::as_decimal)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_int)
    }

    pub fn operation_mode(&self) -> Option<OperationMode> {
        self.get("operation_mode").and_then(Value::as_operation_mode)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(&'static str, Value)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
