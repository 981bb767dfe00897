//! Schema-driven payload encoding.
//!
//! Fields are written in declaration order, big-endian:
//! ```text
//! integer   [i64:8]
//! float     [f64:8]
//! boolean   [0|1:1]
//! string    [length:u32][utf-8 bytes]
//! optional  [0|1:1][inner iff 1]
//! union     [alternative:u8][alternative encoding]
//! list      [count:u32][count inner encodings]
//! ```
//! A packet type with an encode or decode override owns that direction entirely.

use std::sync::Arc;

use bytes::{Buf, BufMut};

use crate::{DecodeError, FieldType, Packet, PacketDescriptor, Value};

/// Encode a packet's payload.
pub fn encode(descriptor: &PacketDescriptor, packet: &Packet) -> crate::Result<Vec<u8>> {
    if packet.alias() != descriptor.alias() {
        return Err(crate::Error::Encode(format!(
            "packet {} can not be encoded as {}",
            packet.alias(),
            descriptor.alias()
        )));
    }
    if let Some(encoder) = descriptor.encode_override() {
        return encoder(packet);
    }
    let mut buffer = Vec::new();
    for (field, value) in descriptor.fields().iter().zip(packet.values()) {
        encode_value(&field.field_type, value, &mut buffer).map_err(|e| {
            crate::Error::Encode(format!("{}.{}: {e}", descriptor.alias(), field.name))
        })?;
    }
    log::trace!("encoded {}: {}b", descriptor.alias(), buffer.len());
    Ok(buffer)
}

/// Decode a payload into a packet of the given type.
///
/// Never reads past the end of `payload`, and never returns a packet whose
/// values do not conform to the descriptor.
pub fn decode(descriptor: &Arc<PacketDescriptor>, payload: &[u8]) -> crate::Result<Packet> {
    if let Some(decoder) = descriptor.decode_override() {
        let packet = decoder(descriptor, payload)?;
        if packet.alias() != descriptor.alias() {
            return Err(crate::Error::InvalidPacket(format!(
                "decoder for {} produced a {} packet",
                descriptor.alias(),
                packet.alias()
            )));
        }
        packet
            .check_conformance()
            .map_err(crate::Error::InvalidPacket)?;
        return Ok(packet);
    }
    let mut buffer = payload;
    let mut values = Vec::with_capacity(descriptor.fields().len());
    for field in descriptor.fields() {
        values.push(decode_value(&field.field_type, &mut buffer)?);
    }
    if buffer.has_remaining() {
        return Err(DecodeError::TrailingBytes(buffer.remaining()).into());
    }
    Ok(Packet::from_decoded(descriptor.clone(), values))
}

/// Append one value's encoding.
pub fn encode_value(
    field_type: &FieldType,
    value: &Value,
    buffer: &mut impl BufMut,
) -> Result<(), String> {
    match (field_type, value) {
        (FieldType::Integer, Value::Integer(i)) => buffer.put_i64(*i),
        (FieldType::Float, Value::Float(f)) => buffer.put_f64(*f),
        (FieldType::Boolean, Value::Boolean(b)) => buffer.put_u8(u8::from(*b)),
        (FieldType::String, Value::String(s)) => {
            let length = u32::try_from(s.len())
                .map_err(|_| format!("string of {}b is too long", s.len()))?;
            buffer.put_u32(length);
            buffer.put_slice(s.as_bytes());
        }
        (FieldType::Optional(_), Value::Null) => buffer.put_u8(0),
        (FieldType::Optional(inner), value) => {
            if !inner.accepts(value) {
                return Err(format!("expected {field_type}, got {}", value.kind()));
            }
            buffer.put_u8(1);
            encode_value(inner, value, buffer)?;
        }
        (FieldType::Union(alternatives), value) => {
            let Some(tag) = FieldType::union_alternative(alternatives, value) else {
                return Err(format!(
                    "{} does not match any alternative of {field_type}",
                    value.kind()
                ));
            };
            // validated at declaration: at most 256 alternatives
            buffer.put_u8(tag as u8);
            encode_value(&alternatives[tag], value, buffer)?;
        }
        (FieldType::List(inner), Value::List(values)) => {
            let count = u32::try_from(values.len())
                .map_err(|_| format!("list of {} values is too long", values.len()))?;
            buffer.put_u32(count);
            for value in values {
                encode_value(inner, value, buffer)?;
            }
        }
        (field_type, value) => {
            return Err(format!("expected {field_type}, got {}", value.kind()));
        }
    }
    Ok(())
}

/// Consume one value's encoding from the front of `buffer`.
pub fn decode_value(field_type: &FieldType, buffer: &mut &[u8]) -> Result<Value, DecodeError> {
    let value = match field_type {
        FieldType::Integer => {
            require(buffer, 8)?;
            Value::Integer(buffer.get_i64())
        }
        FieldType::Float => {
            require(buffer, 8)?;
            Value::Float(buffer.get_f64())
        }
        FieldType::Boolean => match read_u8(buffer)? {
            0 => Value::Boolean(false),
            1 => Value::Boolean(true),
            tag => {
                return Err(DecodeError::InvalidTag {
                    what: "boolean",
                    tag: tag.into(),
                })
            }
        },
        FieldType::String => {
            require(buffer, 4)?;
            let length = buffer.get_u32() as usize;
            require(buffer, length)?;
            let remaining: &[u8] = *buffer;
            let (string, rest) = remaining.split_at(length);
            *buffer = rest;
            Value::String(
                std::str::from_utf8(string)
                    .map_err(|_| DecodeError::InvalidUtf8)?
                    .to_string(),
            )
        }
        FieldType::Optional(inner) => match read_u8(buffer)? {
            0 => Value::Null,
            1 => decode_value(inner, buffer)?,
            tag => {
                return Err(DecodeError::InvalidTag {
                    what: "optional presence",
                    tag: tag.into(),
                })
            }
        },
        FieldType::Union(alternatives) => {
            let tag = read_u8(buffer)?;
            match alternatives.get(tag as usize) {
                Some(alternative) => decode_value(alternative, buffer)?,
                None => {
                    return Err(DecodeError::InvalidTag {
                        what: "union",
                        tag: tag.into(),
                    })
                }
            }
        }
        FieldType::List(inner) => {
            require(buffer, 4)?;
            let count = buffer.get_u32() as usize;
            // every encoding is at least 1 byte
            require(buffer, count)?;
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                values.push(decode_value(inner, buffer)?);
            }
            Value::List(values)
        }
    };
    Ok(value)
}

fn require(buffer: &&[u8], needed: usize) -> Result<(), DecodeError> {
    if buffer.remaining() < needed {
        return Err(DecodeError::TruncatedInput {
            needed,
            available: buffer.remaining(),
        });
    }
    Ok(())
}

fn read_u8(buffer: &mut &[u8]) -> Result<u8, DecodeError> {
    require(buffer, 1)?;
    Ok(buffer.get_u8())
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::{decode, decode_value, encode, encode_value};
    use crate::{DecodeError, Error, FieldType, Packet, PacketDescriptor, Value};

    fn everything() -> Arc<PacketDescriptor> {
        Arc::new(
            PacketDescriptor::builder("everything")
                .group("g")
                .field("i", FieldType::Integer)
                .field("f", FieldType::Float)
                .field("b", FieldType::Boolean)
                .field("s", FieldType::String)
                .field("o", FieldType::optional(FieldType::String))
                .field(
                    "u",
                    FieldType::union([FieldType::Integer, FieldType::String]),
                )
                .field("l", FieldType::list(FieldType::optional(FieldType::Integer)))
                .field(
                    "nested",
                    FieldType::list(FieldType::list(FieldType::union([
                        FieldType::Boolean,
                        FieldType::Float,
                    ]))),
                )
                .build()
                .expect("valid descriptor"),
        )
    }

    fn sample(descriptor: &Arc<PacketDescriptor>) -> Packet {
        Packet::builder(descriptor)
            .set("i", -42i64)
            .set("f", 2.5)
            .set("b", true)
            .set("s", "héllo")
            .set("o", Some("there"))
            .set("u", "alternative one")
            .set("l", vec![Some(1i64), None, Some(i64::MIN)])
            .set(
                "nested",
                Value::List(vec![
                    Value::List(vec![Value::Boolean(false), Value::Float(-0.5)]),
                    Value::List(vec![]),
                ]),
            )
            .build()
            .expect("valid packet")
    }

    #[test]
    fn round_trip() {
        let descriptor = everything();
        let packet = sample(&descriptor);
        let bytes = encode(&descriptor, &packet).expect("encodes");
        let decoded = decode(&descriptor, &bytes).expect("decodes");
        assert_eq!(packet, decoded);
    }

    #[test]
    fn round_trip_edge_values() {
        let descriptor = everything();
        let packet = Packet::builder(&descriptor)
            .set("i", i64::MAX)
            .set("f", f64::MIN_POSITIVE)
            .set("b", false)
            .set("s", "")
            .set("u", 0i64)
            .set("l", Vec::<Value>::new())
            .set("nested", Vec::<Value>::new())
            .build()
            .expect("valid packet");
        assert_eq!(Some(&Value::Null), packet.get("o"));
        let bytes = encode(&descriptor, &packet).expect("encodes");
        assert_eq!(packet, decode(&descriptor, &bytes).expect("decodes"));
    }

    #[test]
    fn wire_layout() {
        let mut buffer = Vec::new();
        encode_value(&FieldType::Integer, &Value::Integer(7), &mut buffer).expect("encodes");
        encode_value(&FieldType::String, &Value::from("hi"), &mut buffer).expect("encodes");
        encode_value(
            &FieldType::optional(FieldType::Boolean),
            &Value::Boolean(true),
            &mut buffer,
        )
        .expect("encodes");
        encode_value(
            &FieldType::union([FieldType::String, FieldType::Integer]),
            &Value::Integer(1),
            &mut buffer,
        )
        .expect("encodes");
        assert_eq!(
            vec![
                0, 0, 0, 0, 0, 0, 0, 7, // integer
                0, 0, 0, 2, b'h', b'i', // string
                1, 1, // optional boolean
                1, 0, 0, 0, 0, 0, 0, 0, 1, // union alternative 1, integer
            ],
            buffer
        );
    }

    #[test]
    fn every_strict_prefix_is_truncated() {
        let descriptor = everything();
        let bytes = encode(&descriptor, &sample(&descriptor)).expect("encodes");
        for length in 0..bytes.len() {
            match decode(&descriptor, &bytes[..length]) {
                Err(Error::Decode(DecodeError::TruncatedInput { .. })) => (),
                other => panic!("prefix of {length}b: expected truncation, got {other:?}"),
            }
        }
    }

    #[test]
    fn invalid_tags() {
        let mut buffer: &[u8] = &[2];
        assert_eq!(
            Err(DecodeError::InvalidTag {
                what: "boolean",
                tag: 2
            }),
            decode_value(&FieldType::Boolean, &mut buffer)
        );

        let mut buffer: &[u8] = &[9, 0];
        assert_eq!(
            Err(DecodeError::InvalidTag {
                what: "optional presence",
                tag: 9
            }),
            decode_value(&FieldType::optional(FieldType::Boolean), &mut buffer)
        );

        let mut buffer: &[u8] = &[2, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            Err(DecodeError::InvalidTag {
                what: "union",
                tag: 2
            }),
            decode_value(
                &FieldType::union([FieldType::Integer, FieldType::Float]),
                &mut buffer
            )
        );
    }

    #[test]
    fn oversized_list_count_is_truncated_before_allocating() {
        let mut buffer: &[u8] = &[0xff, 0xff, 0xff, 0xff, 1];
        assert!(matches!(
            decode_value(&FieldType::list(FieldType::Boolean), &mut buffer),
            Err(DecodeError::TruncatedInput { .. })
        ));
    }

    #[test]
    fn invalid_utf8() {
        let mut buffer: &[u8] = &[0, 0, 0, 2, 0xc3, 0x28];
        assert_eq!(
            Err(DecodeError::InvalidUtf8),
            decode_value(&FieldType::String, &mut buffer)
        );
    }

    #[test]
    fn trailing_bytes() {
        let descriptor = Arc::new(
            PacketDescriptor::builder("b")
                .field("b", FieldType::Boolean)
                .build()
                .expect("valid descriptor"),
        );
        assert!(matches!(
            decode(&descriptor, &[1, 0]),
            Err(Error::Decode(DecodeError::TrailingBytes(1)))
        ));
    }

    #[test]
    fn nonconforming_union_value_is_an_encode_error() {
        let mut buffer = Vec::new();
        let result = encode_value(
            &FieldType::union([FieldType::Integer, FieldType::String]),
            &Value::Boolean(true),
            &mut buffer,
        );
        assert!(result.is_err());
    }

    #[test]
    fn packet_of_another_type_is_an_encode_error() {
        let descriptor = everything();
        let other = Arc::new(
            PacketDescriptor::builder("other")
                .build()
                .expect("valid descriptor"),
        );
        let packet = Packet::builder(&other).build().expect("valid packet");
        assert!(matches!(
            encode(&descriptor, &packet),
            Err(Error::Encode(_))
        ));
    }

    #[test]
    fn overrides_win() {
        let descriptor = Arc::new(
            PacketDescriptor::builder("raw")
                .field("text", FieldType::String)
                .encode_with(|packet| {
                    Ok(packet
                        .get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .as_bytes()
                        .to_vec())
                })
                .decode_with(|descriptor, payload| {
                    Packet::builder(descriptor)
                        .set("text", String::from_utf8_lossy(payload).into_owned())
                        .build()
                })
                .build()
                .expect("valid descriptor"),
        );
        let packet = Packet::builder(&descriptor)
            .set("text", "verbatim")
            .build()
            .expect("valid packet");
        let bytes = encode(&descriptor, &packet).expect("encodes");
        assert_eq!(b"verbatim".to_vec(), bytes);
        assert_eq!(packet, decode(&descriptor, &bytes).expect("decodes"));
    }

    #[test]
    fn decode_override_output_is_checked() {
        let other = Arc::new(
            PacketDescriptor::builder("other")
                .build()
                .expect("valid descriptor"),
        );
        let descriptor = Arc::new(
            PacketDescriptor::builder("liar")
                .decode_with(move |_, _| Packet::builder(&other).build())
                .build()
                .expect("valid descriptor"),
        );
        assert!(matches!(
            decode(&descriptor, &[]),
            Err(Error::InvalidPacket(_))
        ));
    }
}
