//! The self-describing status schema.
//!
//! A device-reported *format* byte string names, by position, which status
//! fields are present in a *payload* byte string: byte `i` of `format`
//! being type-id `T` means bytes `payload[2i..2i+2]` hold `T`'s value. The
//! field registry below restates the vendor's status-type class hierarchy
//! (`BytesStatusType` / `IntStatusType` / `DecimalStatusType` /
//! `OperationModeStatusType` / `OneOfStatusType` / `IfPresentStatusType`) as
//! a tagged-variant `Decoder` with a single evaluation function, so adding a
//! field is a data change rather than a new `impl`.

use rust_decimal::Decimal;

use crate::error::SchemaError;
use crate::sample::{OperationMode, Sample, Value};

/// A schema entry: how to locate and interpret one field's bytes inside a
/// `(format, payload)` pair.
#[derive(Debug, Clone, Copy)]
pub enum Decoder {
    /// Raw concatenated bytes at the indicated positions.
    Bytes { ids: &'static [u8] },
    /// Big-endian integer, optionally two's-complement signed.
    Int { ids: &'static [u8], signed: bool },
    /// Big-endian integer scaled by `10^scale`, kept as an exact decimal.
    Decimal { ids: &'static [u8], signed: bool, scale: i32 },
    /// The operation-mode enum, looked up from a single type-id.
    OperationMode { id: u8 },
    /// First constituent decoder that resolves to a value.
    OneOf(&'static [Decoder]),
    /// Delegates to `inner` only if `gate_id`'s presence in the format
    /// matches `want_present`.
    Gated {
        gate_id: u8,
        want_present: bool,
        inner: &'static Decoder,
    },
}

/// Locate each of `ids` in `format` and concatenate the corresponding
/// 2-byte payload slots, in the order `ids` is declared. `None` if any id
/// is absent from the format, or if the format names a slot the payload is
/// too short to contain (a tolerated size mismatch, see `Session::status`).
fn resolve_bytes(ids: &[u8], format: &[u8], payload: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(ids.len() * 2);
    for &id in ids {
        let index = format.iter().position(|&b| b == id)?;
        let start = index * 2;
        if start + 2 > payload.len() {
            return None;
        }
        out.extend_from_slice(&payload[start..start + 2]);
    }
    Some(out)
}

/// Interpret up to 8 concatenated big-endian bytes as a signed or unsigned
/// integer, widened into `i64`.
fn bytes_to_int(bytes: &[u8], signed: bool) -> i64 {
    let n = bytes.len().min(8);
    let mut widened = [0u8; 8];
    widened[8 - n..].copy_from_slice(&bytes[bytes.len() - n..]);
    if signed && n > 0 && bytes[0] & 0x80 != 0 {
        for b in widened[..8 - n].iter_mut() {
            *b = 0xFF;
        }
    }
    i64::from_be_bytes(widened)
}

/// `int_val * 10^scale`, exact (never binary floating point).
fn decimal_from_scaled(int_val: i64, scale: i32) -> Decimal {
    if scale <= 0 {
        Decimal::new(int_val, (-scale) as u32)
    } else {
        Decimal::from(int_val) * Decimal::from(10i64.pow(scale as u32))
    }
}

/// Evaluate one decoder against a `(format, payload)` pair.
pub fn eval(decoder: &Decoder, format: &[u8], payload: &[u8]) -> Result<Option<Value>, SchemaError> {
    match decoder {
        Decoder::Bytes { ids } => Ok(resolve_bytes(ids, format, payload).map(Value::Bytes)),
        Decoder::Int { ids, signed } => {
            Ok(resolve_bytes(ids, format, payload).map(|b| Value::Int(bytes_to_int(&b, *signed))))
        }
        Decoder::Decimal { ids, signed, scale } => Ok(resolve_bytes(ids, format, payload)
            .map(|b| Value::Decimal(decimal_from_scaled(bytes_to_int(&b, *signed), *scale)))),
        Decoder::OperationMode { id } => match resolve_bytes(&[*id], format, payload) {
            None => Ok(None),
            Some(b) => {
                let code = bytes_to_int(&b, false) as u16;
                Ok(Some(Value::OperationMode(OperationMode::from_code(code)?)))
            }
        },
        Decoder::OneOf(options) => {
            for option in *options {
                if let Some(value) = eval(option, format, payload)? {
                    return Ok(Some(value));
                }
            }
            Ok(None)
        }
        Decoder::Gated { gate_id, want_present, inner } => {
            let present = format.contains(gate_id);
            if present == *want_present {
                eval(inner, format, payload)
            } else {
                Ok(None)
            }
        }
    }
}

/// The field registry, in the order a decoded `Sample` reports them.
pub static FIELDS: &[(&str, Decoder)] = &[
    ("operation_mode", Decoder::OperationMode { id: 0x0C }),
    ("total_operation_time", Decoder::Int { ids: &[0x09, 0x0A], signed: false }),
    ("pv1_input_power", Decoder::Decimal { ids: &[0x27], signed: false, scale: 0 }),
    ("pv2_input_power", Decoder::Decimal { ids: &[0x28], signed: false, scale: 0 }),
    ("pv1_voltage", Decoder::Decimal { ids: &[0x01], signed: false, scale: -1 }),
    ("pv2_voltage", Decoder::Decimal { ids: &[0x02], signed: false, scale: -1 }),
    ("pv1_current", Decoder::Decimal { ids: &[0x04], signed: false, scale: -1 }),
    ("pv2_current", Decoder::Decimal { ids: &[0x05], signed: false, scale: -1 }),
    (
        "output_power",
        Decoder::OneOf(&[
            Decoder::Decimal { ids: &[0x0B], signed: false, scale: 0 },
            Decoder::Decimal { ids: &[0x34], signed: false, scale: 0 },
        ]),
    ),
    ("energy_today", Decoder::Decimal { ids: &[0x11], signed: false, scale: -2 }),
    (
        "energy_total",
        Decoder::OneOf(&[
            Decoder::Decimal { ids: &[0x07, 0x08], signed: false, scale: -1 },
            Decoder::Decimal { ids: &[0x35, 0x36], signed: false, scale: -1 },
        ]),
    ),
    (
        "grid_voltage",
        Decoder::Gated {
            gate_id: 0x51,
            want_present: false,
            inner: &Decoder::Decimal { ids: &[0x32], signed: false, scale: -1 },
        },
    ),
    (
        "grid_current",
        Decoder::Gated {
            gate_id: 0x51,
            want_present: false,
            inner: &Decoder::Decimal { ids: &[0x31], signed: false, scale: -1 },
        },
    ),
    (
        "grid_frequency",
        Decoder::Gated {
            gate_id: 0x51,
            want_present: false,
            inner: &Decoder::Decimal { ids: &[0x33], signed: false, scale: -2 },
        },
    ),
    (
        "grid_voltage_r_phase",
        Decoder::Gated {
            gate_id: 0x51,
            want_present: true,
            inner: &Decoder::Decimal { ids: &[0x32], signed: false, scale: -1 },
        },
    ),
    (
        "grid_current_r_phase",
        Decoder::Gated {
            gate_id: 0x51,
            want_present: true,
            inner: &Decoder::Decimal { ids: &[0x31], signed: false, scale: -1 },
        },
    ),
    (
        "grid_frequency_r_phase",
        Decoder::Gated {
            gate_id: 0x51,
            want_present: true,
            inner: &Decoder::Decimal { ids: &[0x33], signed: false, scale: -2 },
        },
    ),
    ("grid_voltage_s_phase", Decoder::Decimal { ids: &[0x52], signed: false, scale: -1 }),
    ("grid_current_s_phase", Decoder::Decimal { ids: &[0x51], signed: false, scale: -1 }),
    ("grid_frequency_s_phase", Decoder::Decimal { ids: &[0x53], signed: false, scale: -2 }),
    ("grid_voltage_t_phase", Decoder::Decimal { ids: &[0x72], signed: false, scale: -1 }),
    ("grid_current_t_phase", Decoder::Decimal { ids: &[0x71], signed: false, scale: -1 }),
    ("grid_frequency_t_phase", Decoder::Decimal { ids: &[0x73], signed: false, scale: -2 }),
    ("internal_temperature", Decoder::Decimal { ids: &[0x00], signed: true, scale: -1 }),
    ("heatsink_temperature", Decoder::Decimal { ids: &[0x2F], signed: true, scale: -1 }),
];

/// Decode a full status sample: evaluate every registered field in order
/// and collect the ones that resolve to a value.
pub fn decode_sample(format: &[u8], payload: &[u8]) -> Result<Sample, SchemaError> {
    let mut fields = Vec::with_capacity(FIELDS.len());
    for (name, decoder) in FIELDS {
        if let Some(value) = eval(decoder, format, payload)? {
            fields.push((*name, value));
        }
    }
    Ok(Sample::new(fields))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(format: &[u8], id: u8, value: u16) -> Vec<u8> {
        let index = format.iter().position(|&b| b == id).expect("id in format");
        let mut payload = vec![0u8; format.len() * 2];
        let start = index * 2;
        payload[start..start + 2].copy_from_slice(&value.to_be_bytes());
        payload
    }

    #[test]
    fn absent_field_is_none() {
        let format = [0x01, 0x04];
        let payload = vec![0u8; 4];
        let sample = decode_sample(&format, &payload).unwrap();
        assert!(sample.get("operation_mode").is_none());
    }

    #[test]
    fn decimal_scaling_is_exact() {
        let format = [0x01];
        let payload = slot(&format, 0x01, 2340);
        let sample = decode_sample(&format, &payload).unwrap();
        assert_eq!(sample.decimal("pv1_voltage").unwrap(), Decimal::new(2340, 1));
    }

    #[test]
    fn operation_mode_lookup() {
        let format = [0x0C];
        let payload = slot(&format, 0x0C, 1);
        let sample = decode_sample(&format, &payload).unwrap();
        assert_eq!(sample.operation_mode(), Some(OperationMode::Normal));
    }

    #[test]
    fn operation_mode_unknown_is_error() {
        let format = [0x0C];
        let payload = slot(&format, 0x0C, 9);
        let err = decode_sample(&format, &payload).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownOperationMode(9)));
    }

    #[test]
    fn gated_grid_voltage_three_phase() {
        let format = [0x32, 0x51];
        let mut payload = vec![0u8; 4];
        payload[0..2].copy_from_slice(&2300u16.to_be_bytes());
        let sample = decode_sample(&format, &payload).unwrap();
        assert!(sample.get("grid_voltage").is_none());
        assert_eq!(sample.decimal("grid_voltage_r_phase").unwrap(), Decimal::new(2300, 1));
    }

    #[test]
    fn gated_grid_voltage_single_phase() {
        let format = [0x32];
        let payload = slot(&format, 0x32, 2300);
        let sample = decode_sample(&format, &payload).unwrap();
        assert_eq!(sample.decimal("grid_voltage").unwrap(), Decimal::new(2300, 1));
        assert!(sample.get("grid_voltage_r_phase").is_none());
    }

    #[test]
    fn one_of_prefers_first_match() {
        let format = [0x0B, 0x34];
        let mut payload = vec![0u8; 4];
        payload[0..2].copy_from_slice(&200u16.to_be_bytes());
        payload[2..4].copy_from_slice(&999u16.to_be_bytes());
        let sample = decode_sample(&format, &payload).unwrap();
        assert_eq!(sample.decimal("output_power").unwrap(), Decimal::new(200, 0));
    }

    #[test]
    fn signed_negative_temperature() {
        let format = [0x00];
        let payload = slot(&format, 0x00, 0xFFF6); // -10 as i16
        let sample = decode_sample(&format, &payload).unwrap();
        assert_eq!(sample.decimal("internal_temperature").unwrap(), Decimal::new(-10, 1));
    }

    #[test]
    fn truncated_payload_is_tolerated_as_none() {
        let format = [0x01, 0x0C];
        let payload = vec![0x09, 0x24]; // only one slot present
        let sample = decode_sample(&format, &payload).unwrap();
        assert!(sample.get("pv1_voltage").is_some());
        assert!(sample.get("operation_mode").is_none());
    }
}
