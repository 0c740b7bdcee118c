use std::collections::BTreeMap;
use std::fmt::Debug;
use std::hash::Hash;

use serde::ser::{self, Serialize, Serializer as _};
use serde_json::{Map, Value};

use crate::CoalesceError;

/// Turns the arguments of a call into the key that groups coalesced calls.
///
/// Implementations must be pure: the same arguments always need to produce the same key.
pub trait KeySerializer<Args>: Send + Sync + 'static {
    /// The key under which calls are grouped.
    type Key: Eq + Hash + Clone + Debug + Send + Sync + 'static;

    /// Derives the key for `args`.
    fn serialize(&self, args: &Args) -> Result<Self::Key, CoalesceError>;
}

/// The default [`KeySerializer`], a canonical deep structural encoding of the arguments.
///
/// The arguments are rendered as compact JSON with all object keys in sorted order. Two argument
/// lists map to the same key exactly if they are structurally equal, independent of object
/// identity or the iteration order of any maps they contain.
///
/// The encoding differs from plain `serde_json` where JSON would lose information: `Some(v)` is
/// wrapped into a one-element array, so that `None` and `Some(None)` stay apart.
///
/// Arguments that can not be represented faithfully fail with [`CoalesceError::Serialization`].
/// This includes maps with non-scalar keys and non-finite floats.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonKeys;

impl<Args: Serialize> KeySerializer<Args> for JsonKeys {
    type Key = String;

    fn serialize(&self, args: &Args) -> Result<String, CoalesceError> {
        let value = args.serialize(Canonical)?;
        Ok(serde_json::to_string(&value)?)
    }
}

fn key_error(msg: impl std::fmt::Display) -> serde_json::Error {
    ser::Error::custom(msg)
}

/// Serializes into a [`Value`] with sorted objects, rejecting lossy conversions.
struct Canonical;

impl ser::Serializer for Canonical {
    type Ok = Value;
    type Error = serde_json::Error;

    type SerializeSeq = Elements;
    type SerializeTuple = Elements;
    type SerializeTupleStruct = Elements;
    type SerializeTupleVariant = Variant<Elements>;
    type SerializeMap = Fields;
    type SerializeStruct = Fields;
    type SerializeStructVariant = Variant<Fields>;

    fn serialize_bool(self, v: bool) -> Result<Value, Self::Error> {
        Ok(Value::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> Result<Value, Self::Error> {
        Ok(v.into())
    }

    fn serialize_i16(self, v: i16) -> Result<Value, Self::Error> {
        Ok(v.into())
    }

    fn serialize_i32(self, v: i32) -> Result<Value, Self::Error> {
        Ok(v.into())
    }

    fn serialize_i64(self, v: i64) -> Result<Value, Self::Error> {
        Ok(v.into())
    }

    fn serialize_i128(self, v: i128) -> Result<Value, Self::Error> {
        serde_json::value::Serializer.serialize_i128(v)
    }

    fn serialize_u8(self, v: u8) -> Result<Value, Self::Error> {
        Ok(v.into())
    }

    fn serialize_u16(self, v: u16) -> Result<Value, Self::Error> {
        Ok(v.into())
    }

    fn serialize_u32(self, v: u32) -> Result<Value, Self::Error> {
        Ok(v.into())
    }

    fn serialize_u64(self, v: u64) -> Result<Value, Self::Error> {
        Ok(v.into())
    }

    fn serialize_u128(self, v: u128) -> Result<Value, Self::Error> {
        serde_json::value::Serializer.serialize_u128(v)
    }

    fn serialize_f32(self, v: f32) -> Result<Value, Self::Error> {
        if !v.is_finite() {
            return Err(key_error(format_args!("non-finite float `{v}` in arguments")));
        }
        serde_json::value::Serializer.serialize_f32(v)
    }

    fn serialize_f64(self, v: f64) -> Result<Value, Self::Error> {
        if !v.is_finite() {
            return Err(key_error(format_args!("non-finite float `{v}` in arguments")));
        }
        serde_json::value::Serializer.serialize_f64(v)
    }

    fn serialize_char(self, v: char) -> Result<Value, Self::Error> {
        Ok(Value::String(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> Result<Value, Self::Error> {
        Ok(Value::String(v.to_owned()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Value, Self::Error> {
        Ok(Value::Array(v.iter().map(|&b| b.into()).collect()))
    }

    fn serialize_none(self) -> Result<Value, Self::Error> {
        Ok(Value::Null)
    }

    fn serialize_some<T>(self, value: &T) -> Result<Value, Self::Error>
    where
        T: ?Sized + Serialize,
    {
        Ok(Value::Array(vec![value.serialize(Canonical)?]))
    }

    fn serialize_unit(self) -> Result<Value, Self::Error> {
        Ok(Value::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Value, Self::Error> {
        Ok(Value::Null)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<Value, Self::Error> {
        Ok(Value::String(variant.to_owned()))
    }

    fn serialize_newtype_struct<T>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Value, Self::Error>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Value, Self::Error>
    where
        T: ?Sized + Serialize,
    {
        let mut object = Map::new();
        object.insert(variant.to_owned(), value.serialize(Canonical)?);
        Ok(Value::Object(object))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<Elements, Self::Error> {
        Ok(Elements(Vec::with_capacity(len.unwrap_or_default())))
    }

    fn serialize_tuple(self, len: usize) -> Result<Elements, Self::Error> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<Elements, Self::Error> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<Variant<Elements>, Self::Error> {
        Ok(Variant {
            name: variant,
            inner: Elements(Vec::with_capacity(len)),
        })
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Fields, Self::Error> {
        Ok(Fields::default())
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Fields, Self::Error> {
        Ok(Fields::default())
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<Variant<Fields>, Self::Error> {
        Ok(Variant {
            name: variant,
            inner: Fields::default(),
        })
    }
}

struct Elements(Vec<Value>);

impl Elements {
    fn push<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), serde_json::Error> {
        self.0.push(value.serialize(Canonical)?);
        Ok(())
    }
}

impl ser::SerializeSeq for Elements {
    type Ok = Value;
    type Error = serde_json::Error;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Self::Error> {
        self.push(value)
    }

    fn end(self) -> Result<Value, Self::Error> {
        Ok(Value::Array(self.0))
    }
}

impl ser::SerializeTuple for Elements {
    type Ok = Value;
    type Error = serde_json::Error;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Self::Error> {
        self.push(value)
    }

    fn end(self) -> Result<Value, Self::Error> {
        Ok(Value::Array(self.0))
    }
}

impl ser::SerializeTupleStruct for Elements {
    type Ok = Value;
    type Error = serde_json::Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Self::Error> {
        self.push(value)
    }

    fn end(self) -> Result<Value, Self::Error> {
        Ok(Value::Array(self.0))
    }
}

/// Object members, kept sorted by key.
#[derive(Default)]
struct Fields {
    members: BTreeMap<String, Value>,
    next_key: Option<String>,
}

impl Fields {
    fn into_value(self) -> Value {
        Value::Object(self.members.into_iter().collect())
    }
}

impl ser::SerializeMap for Fields {
    type Ok = Value;
    type Error = serde_json::Error;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), Self::Error> {
        let key = match key.serialize(Canonical)? {
            Value::String(key) => key,
            Value::Number(key) => key.to_string(),
            Value::Bool(key) => key.to_string(),
            _ => return Err(key_error("map keys must be strings, numbers or booleans")),
        };
        self.next_key = Some(key);
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Self::Error> {
        let key = self
            .next_key
            .take()
            .ok_or_else(|| key_error("map value serialized before its key"))?;
        self.members.insert(key, value.serialize(Canonical)?);
        Ok(())
    }

    fn end(self) -> Result<Value, Self::Error> {
        Ok(self.into_value())
    }
}

impl ser::SerializeStruct for Fields {
    type Ok = Value;
    type Error = serde_json::Error;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), Self::Error> {
        self.members.insert(key.to_owned(), value.serialize(Canonical)?);
        Ok(())
    }

    fn end(self) -> Result<Value, Self::Error> {
        Ok(self.into_value())
    }
}

/// An enum variant with fields, rendered as `{"Variant": fields}`.
struct Variant<B> {
    name: &'static str,
    inner: B,
}

impl<B> Variant<B> {
    fn wrap(name: &str, value: Value) -> Value {
        let mut object = Map::new();
        object.insert(name.to_owned(), value);
        Value::Object(object)
    }
}

impl ser::SerializeTupleVariant for Variant<Elements> {
    type Ok = Value;
    type Error = serde_json::Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Self::Error> {
        self.inner.push(value)
    }

    fn end(self) -> Result<Value, Self::Error> {
        Ok(Self::wrap(self.name, Value::Array(self.inner.0)))
    }
}

impl ser::SerializeStructVariant for Variant<Fields> {
    type Ok = Value;
    type Error = serde_json::Error;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), Self::Error> {
        ser::SerializeStruct::serialize_field(&mut self.inner, key, value)
    }

    fn end(self) -> Result<Value, Self::Error> {
        Ok(Self::wrap(self.name, self.inner.into_value()))
    }
}

/// Any function deriving a key from the arguments can be used as a custom serializer.
///
/// This allows coalescing on a subset of the arguments, for example only the first one.
impl<Args, K, F> KeySerializer<Args> for F
where
    F: Fn(&Args) -> K + Send + Sync + 'static,
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    type Key = K;

    fn serialize(&self, args: &Args) -> Result<K, CoalesceError> {
        Ok(self(args))
    }
}
