//! Binary frame decoding
//!
//! Turns one raw frame into a [`SampleRecord`] using the layout derived by
//! [`FrameSchema`]. Decoding is pure apart from the capture timestamp.

use chrono::{DateTime, Local};

use crate::types::{FieldKind, FrameSchema, SampleRecord, SampleValue};
use crate::{IngestError, Result};

/// Decode a frame, stamping it with the current local time.
///
/// Fails with [`IngestError::Decode`] when `buffer` is shorter than
/// [`FrameSchema::frame_len`]. Bytes past the frame are ignored.
pub fn decode(buffer: &[u8], schema: &FrameSchema) -> Result<SampleRecord> {
    decode_at(buffer, schema, Local::now())
}

/// Decode a frame with an explicit capture timestamp.
pub fn decode_at(
    buffer: &[u8],
    schema: &FrameSchema,
    timestamp: DateTime<Local>,
) -> Result<SampleRecord> {
    let expected = schema.frame_len();
    if buffer.len() < expected {
        return Err(IngestError::Decode { expected, actual: buffer.len() });
    }

    let bits = &buffer[..schema.bool_region_len()];
    let floats = &buffer[schema.float_offset()..schema.float_offset() + schema.float_count() * 4];

    let mut bool_index = 0;
    let mut float_chunks = floats.chunks_exact(4);
    let mut values = Vec::with_capacity(schema.fields().len());

    for field in schema.fields() {
        match field.kind {
            FieldKind::Bool => {
                values.push(SampleValue::Bool(bit_at(bits, bool_index)));
                bool_index += 1;
            }
            FieldKind::Float => {
                // Length was checked against frame_len, so every float has a chunk.
                let chunk = float_chunks.next().ok_or(IngestError::Decode {
                    expected,
                    actual: buffer.len(),
                })?;
                let raw = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                values.push(SampleValue::Float(round_hundredths(raw)));
            }
        }
    }

    Ok(SampleRecord::new(timestamp, values))
}

/// Bit `index % 8` of byte `index / 8`, least significant bit first.
fn bit_at(bits: &[u8], index: usize) -> bool {
    bits[index / 8] & (1 << (index % 8)) != 0
}

/// Round to two decimals, half away from zero.
pub fn round_hundredths(value: f32) -> f64 {
    (f64::from(value) * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::encode_frame;
    use crate::types::FieldDescriptor;
    use proptest::prelude::*;

    fn ready_fault_temp() -> FrameSchema {
        FrameSchema::new(vec![
            FieldDescriptor::bool("ready"),
            FieldDescriptor::bool("fault"),
            FieldDescriptor::float("temp"),
        ])
        .unwrap()
    }

    #[test]
    fn decodes_ready_fault_temp_frame() {
        let schema = ready_fault_temp();
        let mut frame = vec![0b0000_0001, 0, 0, 0];
        frame.extend_from_slice(&23.456f32.to_le_bytes());
        frame.push(0);
        assert_eq!(frame.len(), schema.frame_len());

        let record = decode(&frame, &schema).unwrap();
        assert_eq!(
            record.values,
            vec![SampleValue::Bool(true), SampleValue::Bool(false), SampleValue::Float(23.46)]
        );
        assert_eq!(record.to_row()[1..], ["1", "0", "23.46"]);
    }

    #[test]
    fn short_buffer_is_a_decode_error() {
        let schema = ready_fault_temp();
        let err = decode(&[0u8; 8], &schema).unwrap_err();
        assert!(matches!(err, IngestError::Decode { expected: 9, actual: 8 }));

        let err = decode(&[], &schema).unwrap_err();
        assert!(matches!(err, IngestError::Decode { expected: 9, actual: 0 }));
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let schema = ready_fault_temp();
        let mut frame = encode_frame(&schema, &[false, true], &[-1.005]);
        frame.extend_from_slice(&[0xFF; 16]);
        let record = decode(&frame, &schema).unwrap();
        assert_eq!(record.values[0], SampleValue::Bool(false));
        assert_eq!(record.values[1], SampleValue::Bool(true));
        assert_eq!(record.values[2], SampleValue::Float(round_hundredths(-1.005)));
    }

    #[test]
    fn padding_bits_do_not_leak_into_values() {
        let schema = ready_fault_temp();
        let mut frame = encode_frame(&schema, &[true, false], &[0.0]);
        frame[0] |= 0b1111_1100;
        let record = decode(&frame, &schema).unwrap();
        assert_eq!(record.values[1], SampleValue::Bool(false));
    }

    #[test]
    fn float_region_starts_at_word_boundary() {
        let schema = ready_fault_temp();
        let mut frame = vec![0u8; 9];
        frame[0] = 0b0000_0011;
        frame[1..4].fill(0xEE);
        frame[4..8].copy_from_slice(&5.25f32.to_le_bytes());
        frame[8] = 0xFF;

        let record = decode(&frame, &schema).unwrap();
        assert_eq!(
            record.values,
            vec![SampleValue::Bool(true), SampleValue::Bool(true), SampleValue::Float(5.25)]
        );
    }

    #[test]
    fn interleaved_schema_emits_schema_order() {
        let schema = FrameSchema::new(vec![
            FieldDescriptor::float("pressure"),
            FieldDescriptor::bool("valve"),
            FieldDescriptor::float("flow"),
        ])
        .unwrap();
        let frame = encode_frame(&schema, &[true], &[1.5, 2.25]);
        let record = decode(&frame, &schema).unwrap();
        assert_eq!(
            record.values,
            vec![SampleValue::Float(1.5), SampleValue::Bool(true), SampleValue::Float(2.25)]
        );
    }

    #[test]
    fn decoding_is_deterministic_apart_from_timestamp() {
        let schema = ready_fault_temp();
        let frame = encode_frame(&schema, &[true, true], &[98.765]);
        let ts = Local::now();
        assert_eq!(decode_at(&frame, &schema, ts).unwrap(), decode_at(&frame, &schema, ts).unwrap());
    }

    #[test]
    fn rounding_matches_two_decimal_output() {
        assert_eq!(round_hundredths(23.456), 23.46);
        assert_eq!(round_hundredths(-0.004), -0.0);
        assert_eq!(round_hundredths(100.0), 100.0);
    }

    proptest! {
        #[test]
        fn encoded_values_survive_decoding(
            bools in prop::collection::vec(any::<bool>(), 0..70),
            floats in prop::collection::vec(-1.0e6f32..1.0e6f32, 0..12)
        ) {
            prop_assume!(!bools.is_empty() || !floats.is_empty());
            let fields = (0..bools.len())
                .map(|i| FieldDescriptor::bool(format!("b{}", i)))
                .chain((0..floats.len()).map(|i| FieldDescriptor::float(format!("f{}", i))))
                .collect();
            let schema = FrameSchema::new(fields).unwrap();

            let frame = encode_frame(&schema, &bools, &floats);
            prop_assert_eq!(frame.len(), schema.frame_len());

            let record = decode(&frame, &schema).unwrap();
            let decoded_bools: Vec<bool> =
                record.values.iter().filter_map(SampleValue::as_bool).collect();
            let decoded_floats: Vec<f64> =
                record.values.iter().filter_map(SampleValue::as_float).collect();

            prop_assert_eq!(decoded_bools, bools);
            for (decoded, original) in decoded_floats.iter().zip(&floats) {
                prop_assert!((decoded - f64::from(*original)).abs() <= 0.005 + 1e-9);
            }
        }

        #[test]
        fn every_truncation_is_rejected(cut in 0usize..9) {
            let schema = ready_fault_temp();
            let frame = encode_frame(&schema, &[true, false], &[1.0]);
            let is_decode_error = matches!(decode(&frame[..cut], &schema), Err(IngestError::Decode { .. }));
            prop_assert!(is_decode_error);
        }
    }
}
