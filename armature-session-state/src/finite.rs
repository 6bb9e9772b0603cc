//! Rejects non-finite floats before a value is converted to JSON.
//!
//! JSON has no NaN or infinity, and `serde_json` writes them as `null`.
//! Session values must round-trip, so they are refused up front instead.

use serde::ser::{self, Serialize};
use std::fmt;

/// Walk `value` and fail on the first NaN or infinite float.
pub(crate) fn check<T: Serialize + ?Sized>(value: &T) -> Result<(), NonFinite> {
    value.serialize(FloatCheck)
}

#[derive(Debug)]
pub(crate) struct NonFinite(String);

impl fmt::Display for NonFinite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for NonFinite {}

impl ser::Error for NonFinite {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self(msg.to_string())
    }
}

#[derive(Clone, Copy)]
struct FloatCheck;

type Checked = Result<(), NonFinite>;

fn finite(value: f64) -> Checked {
    if value.is_finite() {
        Ok(())
    } else {
        Err(NonFinite(format!("non-finite float {} cannot be stored", value)))
    }
}

impl ser::Serializer for FloatCheck {
    type Ok = ();
    type Error = NonFinite;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    fn serialize_f32(self, v: f32) -> Checked {
        finite(f64::from(v))
    }

    fn serialize_f64(self, v: f64) -> Checked {
        finite(v)
    }

    fn serialize_bool(self, _: bool) -> Checked {
        Ok(())
    }

    fn serialize_i8(self, _: i8) -> Checked {
        Ok(())
    }

    fn serialize_i16(self, _: i16) -> Checked {
        Ok(())
    }

    fn serialize_i32(self, _: i32) -> Checked {
        Ok(())
    }

    fn serialize_i64(self, _: i64) -> Checked {
        Ok(())
    }

    fn serialize_i128(self, _: i128) -> Checked {
        Ok(())
    }

    fn serialize_u8(self, _: u8) -> Checked {
        Ok(())
    }

    fn serialize_u16(self, _: u16) -> Checked {
        Ok(())
    }

    fn serialize_u32(self, _: u32) -> Checked {
        Ok(())
    }

    fn serialize_u64(self, _: u64) -> Checked {
        Ok(())
    }

    fn serialize_u128(self, _: u128) -> Checked {
        Ok(())
    }

    fn serialize_char(self, _: char) -> Checked {
        Ok(())
    }

    fn serialize_str(self, _: &str) -> Checked {
        Ok(())
    }

    fn serialize_bytes(self, _: &[u8]) -> Checked {
        Ok(())
    }

    fn serialize_none(self) -> Checked {
        Ok(())
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Checked {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Checked {
        Ok(())
    }

    fn serialize_unit_struct(self, _: &'static str) -> Checked {
        Ok(())
    }

    fn serialize_unit_variant(self, _: &'static str, _: u32, _: &'static str) -> Checked {
        Ok(())
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _: &'static str,
        value: &T,
    ) -> Checked {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        value: &T,
    ) -> Checked {
        value.serialize(self)
    }

    fn serialize_seq(self, _: Option<usize>) -> Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_tuple(self, _: usize) -> Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_tuple_struct(self, _: &'static str, _: usize) -> Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_map(self, _: Option<usize>) -> Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_struct(self, _: &'static str, _: usize) -> Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self, NonFinite> {
        Ok(self)
    }
}

impl ser::SerializeSeq for FloatCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Checked {
        value.serialize(FloatCheck)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeTuple for FloatCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Checked {
        value.serialize(FloatCheck)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeTupleStruct for FloatCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Checked {
        value.serialize(FloatCheck)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeTupleVariant for FloatCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Checked {
        value.serialize(FloatCheck)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeMap for FloatCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Checked {
        key.serialize(FloatCheck)
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Checked {
        value.serialize(FloatCheck)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeStruct for FloatCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, _: &'static str, value: &T) -> Checked {
        value.serialize(FloatCheck)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeStructVariant for FloatCheck {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, _: &'static str, value: &T) -> Checked {
        value.serialize(FloatCheck)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use std::collections::HashMap;

    #[derive(Serialize)]
    struct Reading {
        sensor: String,
        samples: Vec<f64>,
        calibration: Option<f32>,
    }

    #[test]
    fn test_finite_values_pass() {
        let reading = Reading {
            sensor: "t1".into(),
            samples: vec![1.5, -0.0, f64::MAX],
            calibration: Some(0.25),
        };
        assert!(check(&reading).is_ok());
        assert!(check(&HashMap::from([("k".to_string(), 1_u64)])).is_ok());
    }

    #[test]
    fn test_nested_non_finite_rejected() {
        let reading = Reading {
            sensor: "t1".into(),
            samples: vec![1.0, f64::NAN],
            calibration: None,
        };
        let err = check(&reading).unwrap_err();
        assert!(err.to_string().contains("NaN"));

        assert!(check(&Some(f32::INFINITY)).is_err());
        assert!(check(&(1_u8, f64::NEG_INFINITY)).is_err());
    }
}
