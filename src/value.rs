//! Introspectable structured values
//!
//! A [`Structure`] describes the type of a compound value: an identifier and a
//! list of named fields, each of which is a scalar, an array of scalars or a
//! nested structure. Two structures are of the same type when they compare
//! equal, which is a structural comparison.
//!
//! A [`PVStructure`] is a value of some structure type. Each of its fields can
//! be looked up by dotted path (`"value.index"`) and has an offset, assigned
//! depth-first with the root at offset 0, which is what field masks refer to.

use crate::bitset::BitSet;
use crate::error::BuildError;
use serde_json::Value as Json;
use std::fmt;
use std::sync::Arc;


/// Identifier of the standard enumeration structure
pub const ENUM_ID: &str = "enum_t";

/// Identifier of the normative scalar structure
pub const NT_SCALAR_ID: &str = "epics:nt/NTScalar:1.0";

/// Identifier of the normative enumeration structure
pub const NT_ENUM_ID: &str = "epics:nt/NTEnum:1.0";


/// Type of a scalar field
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarType {
    Boolean,
    Int,
    Long,
    Double,
    String,
}
//
impl ScalarType {
    /// Value of a freshly created field of this type
    pub fn default_value(&self) -> ScalarValue {
        match *self {
            ScalarType::Boolean => ScalarValue::Boolean(false),
            ScalarType::Int => ScalarValue::Int(0),
            ScalarType::Long => ScalarValue::Long(0),
            ScalarType::Double => ScalarValue::Double(0.0),
            ScalarType::String => ScalarValue::String(String::new()),
        }
    }

    /// Convert some text to a value of this type
    pub fn parse(&self, text: &str) -> Result<ScalarValue, String> {
        let trimmed = text.trim();
        match *self {
            ScalarType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(ScalarValue::Boolean(true)),
                "false" | "0" => Ok(ScalarValue::Boolean(false)),
                _ => Err("not a boolean".to_owned()),
            },
            ScalarType::Int => trimmed.parse().map(ScalarValue::Int)
                                      .map_err(|e| e.to_string()),
            ScalarType::Long => trimmed.parse().map(ScalarValue::Long)
                                       .map_err(|e| e.to_string()),
            ScalarType::Double => trimmed.parse().map(ScalarValue::Double)
                                         .map_err(|e| e.to_string()),
            ScalarType::String => Ok(ScalarValue::String(text.to_owned())),
        }
    }

    /// Convert a JSON leaf to a value of this type
    pub fn from_json(&self, json: &Json) -> Result<ScalarValue, String> {
        match (*self, json) {
            (_, Json::String(text)) => self.parse(text),
            (ScalarType::Boolean, Json::Bool(b)) => Ok(ScalarValue::Boolean(*b)),
            (ScalarType::Int, Json::Number(n)) => n
                .as_i64()
                .and_then(|i| i32::try_from(i).ok())
                .map(ScalarValue::Int)
                .ok_or_else(|| format!("{} does not fit an int", n)),
            (ScalarType::Long, Json::Number(n)) => n
                .as_i64()
                .map(ScalarValue::Long)
                .ok_or_else(|| format!("{} does not fit a long", n)),
            (ScalarType::Double, Json::Number(n)) => n
                .as_f64()
                .map(ScalarValue::Double)
                .ok_or_else(|| format!("{} is not a double", n)),
            (ScalarType::String, Json::Number(n)) => {
                Ok(ScalarValue::String(n.to_string()))
            }
            (ScalarType::String, Json::Bool(b)) => {
                Ok(ScalarValue::String(b.to_string()))
            }
            (ty, other) => Err(format!("can't store {} in a {} field", other, ty)),
        }
    }
}
//
impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match *self {
            ScalarType::Boolean => "boolean",
            ScalarType::Int => "int",
            ScalarType::Long => "long",
            ScalarType::Double => "double",
            ScalarType::String => "string",
        };
        f.write_str(s)
    }
}


/// Type of a structure field
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldType {
    Scalar(ScalarType),
    ScalarArray(ScalarType),
    Structure(Arc<Structure>),
}
//
impl FieldType {
    /// Number of offsets taken by a field of this type, itself included
    pub fn field_count(&self) -> usize {
        match *self {
            FieldType::Scalar(_) | FieldType::ScalarArray(_) => 1,
            FieldType::Structure(ref s) => s.field_count(),
        }
    }

    fn default_value(&self) -> PVField {
        match *self {
            FieldType::Scalar(t) => PVField::Scalar(t.default_value()),
            FieldType::ScalarArray(t) => PVField::ScalarArray(t, Vec::new()),
            FieldType::Structure(ref s) => PVField::Structure(PVStructure::new(s)),
        }
    }
}
//
impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            FieldType::Scalar(t) => write!(f, "{}", t),
            FieldType::ScalarArray(t) => write!(f, "{}[]", t),
            FieldType::Structure(ref s) => write!(f, "structure {}", s.id),
        }
    }
}


/// Type descriptor of a structured value
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Structure {
    id: String,
    fields: Vec<(String, FieldType)>,
}
//
impl Structure {
    /// Describe a new structure type
    pub fn new(id: impl Into<String>, fields: Vec<(&str, FieldType)>) -> Arc<Self> {
        Arc::new(Structure {
            id: id.into(),
            fields: fields.into_iter()
                          .map(|(name, ty)| (name.to_owned(), ty))
                          .collect(),
        })
    }

    /// The standard enumeration: an index into a list of choices
    pub fn enum_t() -> Arc<Self> {
        Structure::new(ENUM_ID, vec![
            ("index", FieldType::Scalar(ScalarType::Int)),
            ("choices", FieldType::ScalarArray(ScalarType::String)),
        ])
    }

    /// Normative scalar record type
    pub fn nt_scalar(value_type: ScalarType) -> Arc<Self> {
        Structure::new(NT_SCALAR_ID, vec![
            ("value", FieldType::Scalar(value_type)),
            ("descriptor", FieldType::Scalar(ScalarType::String)),
        ])
    }

    /// Normative enumeration record type
    pub fn nt_enum() -> Arc<Self> {
        Structure::new(NT_ENUM_ID, vec![
            ("value", FieldType::Structure(Structure::enum_t())),
            ("descriptor", FieldType::Scalar(ScalarType::String)),
        ])
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn fields(&self) -> &[(String, FieldType)] {
        &self.fields
    }

    /// Check whether this is the standard enumeration type
    pub fn is_enum(&self) -> bool {
        self.id == ENUM_ID
    }

    /// Look up a direct field by name
    pub fn field(&self, name: &str) -> Option<&FieldType> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, ty)| ty)
    }

    /// Look up a field by dotted path
    pub fn sub_field(&self, path: &str) -> Option<&FieldType> {
        let (head, tail) = split_path(path);
        let field = self.field(head)?;
        match (tail, field) {
            (None, field) => Some(field),
            (Some(rest), FieldType::Structure(inner)) => inner.sub_field(rest),
            (Some(_), _) => None,
        }
    }

    /// Number of offsets taken by a value of this type, root included
    pub fn field_count(&self) -> usize {
        1 + self.fields.iter().map(|(_, ty)| ty.field_count()).sum::<usize>()
    }

    /// Offset of the field at some dotted path, relative to this structure
    pub fn offset_of(&self, path: &str) -> Option<usize> {
        let (head, tail) = split_path(path);
        let mut offset = 1;
        for (name, ty) in &self.fields {
            if name == head {
                return match (tail, ty) {
                    (None, _) => Some(offset),
                    (Some(rest), FieldType::Structure(inner)) => {
                        inner.offset_of(rest).map(|o| offset + o)
                    }
                    (Some(_), _) => None,
                };
            }
            offset += ty.field_count();
        }
        None
    }

    /// Restrict this type to some dotted field paths
    ///
    /// A path naming a structure keeps that structure whole. Nested
    /// structures that are only partially selected keep their identifier.
    /// Fails with the first path that names no field.
    pub fn select(&self, paths: &[&str]) -> Result<Arc<Structure>, String> {
        for path in paths {
            if self.sub_field(path).is_none() {
                return Err(format!("no field '{}'", path));
            }
        }
        Ok(Arc::new(self.select_checked(paths)))
    }

    fn select_checked(&self, paths: &[&str]) -> Structure {
        let mut fields = Vec::new();
        for (name, ty) in &self.fields {
            let mut whole = false;
            let mut tails = Vec::new();
            for path in paths {
                match split_path(path) {
                    (head, None) if head == name => whole = true,
                    (head, Some(tail)) if head == name => tails.push(tail),
                    _ => {}
                }
            }
            if whole {
                fields.push((name.clone(), ty.clone()));
            } else if !tails.is_empty() {
                if let FieldType::Structure(inner) = ty {
                    let selected = inner.select_checked(&tails);
                    fields.push((name.clone(), FieldType::Structure(Arc::new(selected))));
                }
            }
        }
        Structure { id: self.id.clone(), fields }
    }
}


fn split_path(path: &str) -> (&str, Option<&str>) {
    match path.split_once('.') {
        Some((head, tail)) => (head, Some(tail)),
        None => (path, None),
    }
}


/// Value of a scalar field
#[derive(Clone, Debug, PartialEq)]
pub enum ScalarValue {
    Boolean(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    String(String),
}
//
impl ScalarValue {
    pub fn scalar_type(&self) -> ScalarType {
        match *self {
            ScalarValue::Boolean(_) => ScalarType::Boolean,
            ScalarValue::Int(_) => ScalarType::Int,
            ScalarValue::Long(_) => ScalarType::Long,
            ScalarValue::Double(_) => ScalarType::Double,
            ScalarValue::String(_) => ScalarType::String,
        }
    }

    /// Numeric view of this value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            ScalarValue::Int(i) => Some(f64::from(i)),
            ScalarValue::Long(l) => Some(l as f64),
            ScalarValue::Double(d) => Some(d),
            ScalarValue::Boolean(_) | ScalarValue::String(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match *self {
            ScalarValue::String(ref s) => Some(s),
            _ => None,
        }
    }
}
//
impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ScalarValue::Boolean(b) => write!(f, "{}", b),
            ScalarValue::Int(i) => write!(f, "{}", i),
            ScalarValue::Long(l) => write!(f, "{}", l),
            ScalarValue::Double(d) => write!(f, "{}", d),
            ScalarValue::String(ref s) => write!(f, "{}", s),
        }
    }
}


/// Value of one field of a structure
#[derive(Clone, Debug, PartialEq)]
pub enum PVField {
    Scalar(ScalarValue),
    ScalarArray(ScalarType, Vec<ScalarValue>),
    Structure(PVStructure),
}
//
impl PVField {
    pub fn as_scalar(&self) -> Option<&ScalarValue> {
        match *self {
            PVField::Scalar(ref v) => Some(v),
            _ => None,
        }
    }

    pub fn as_structure(&self) -> Option<&PVStructure> {
        match *self {
            PVField::Structure(ref s) => Some(s),
            _ => None,
        }
    }

    /// Check that two leaf values can be assigned to one another
    fn same_leaf_type(&self, other: &PVField) -> bool {
        match (self, other) {
            (PVField::Scalar(a), PVField::Scalar(b)) => a.scalar_type() == b.scalar_type(),
            (PVField::ScalarArray(a, _), PVField::ScalarArray(b, _)) => a == b,
            _ => false,
        }
    }

    fn assign_json(&mut self,
                   offset: usize,
                   path: &str,
                   json: &Json,
                   changed: &mut BitSet) -> Result<(), BuildError> {
        let shape = |reason: String| BuildError::JsonShape {
            field: path.to_owned(),
            reason,
        };
        match self {
            PVField::Scalar(value) => {
                *value = value.scalar_type().from_json(json).map_err(shape)?;
                changed.set(offset);
            }
            PVField::ScalarArray(ty, values) => {
                let items = json.as_array()
                                .ok_or_else(|| shape("expected an array".to_owned()))?;
                *values = items.iter()
                               .map(|item| ty.from_json(item))
                               .collect::<Result<_, _>>()
                               .map_err(shape)?;
                changed.set(offset);
            }
            PVField::Structure(inner) => {
                inner.assign_json_at(offset, path, json, changed)?;
            }
        }
        Ok(())
    }
}


/// Value of a structure type
#[derive(Clone, Debug, PartialEq)]
pub struct PVStructure {
    structure: Arc<Structure>,
    fields: Vec<PVField>,
}
//
impl PVStructure {
    /// Create a value of some type, with every field at its default
    pub fn new(structure: &Arc<Structure>) -> Self {
        PVStructure {
            structure: structure.clone(),
            fields: structure.fields
                             .iter()
                             .map(|(_, ty)| ty.default_value())
                             .collect(),
        }
    }

    pub fn structure(&self) -> &Arc<Structure> {
        &self.structure
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.structure.fields.iter().position(|(n, _)| n == name)
    }

    /// Look up a field by dotted path
    pub fn sub_field(&self, path: &str) -> Option<&PVField> {
        let (head, tail) = split_path(path);
        let field = &self.fields[self.index_of(head)?];
        match (tail, field) {
            (None, field) => Some(field),
            (Some(rest), PVField::Structure(inner)) => inner.sub_field(rest),
            (Some(_), _) => None,
        }
    }

    /// Look up a field by dotted path, for modification
    pub fn sub_field_mut(&mut self, path: &str) -> Option<&mut PVField> {
        let (head, tail) = split_path(path);
        let index = self.index_of(head)?;
        match (tail, &mut self.fields[index]) {
            (None, field) => Some(field),
            (Some(rest), PVField::Structure(inner)) => inner.sub_field_mut(rest),
            (Some(_), _) => None,
        }
    }

    /// Shortcut to the scalar at some path
    pub fn scalar(&self, path: &str) -> Option<&ScalarValue> {
        self.sub_field(path).and_then(PVField::as_scalar)
    }

    /// Offset of the field at some path
    pub fn offset_of(&self, path: &str) -> Option<usize> {
        self.structure.offset_of(path)
    }

    /// Store a scalar at some path, returning its offset
    pub fn set_scalar(&mut self, path: &str, value: ScalarValue) -> Result<usize, BuildError> {
        let offset = self.offset_of(path)
                         .ok_or_else(|| BuildError::NoSuchField(path.to_owned()))?;
        match self.sub_field_mut(path) {
            Some(PVField::Scalar(slot)) if slot.scalar_type() == value.scalar_type() => {
                *slot = value;
                Ok(offset)
            }
            Some(PVField::Scalar(_)) => Err(BuildError::Parse {
                field: path.to_owned(),
                value: value.to_string(),
                reason: "scalar type mismatch".to_owned(),
            }),
            _ => Err(BuildError::NotScalar(path.to_owned())),
        }
    }

    /// Convert some text into the scalar at some path, returning its offset
    pub fn put_from(&mut self, path: &str, text: &str) -> Result<usize, BuildError> {
        let offset = self.offset_of(path)
                         .ok_or_else(|| BuildError::NoSuchField(path.to_owned()))?;
        match self.sub_field_mut(path) {
            Some(PVField::Scalar(slot)) => {
                *slot = slot.scalar_type().parse(text).map_err(|reason| {
                    BuildError::Parse {
                        field: path.to_owned(),
                        value: text.to_owned(),
                        reason,
                    }
                })?;
                Ok(offset)
            }
            Some(_) => Err(BuildError::NotScalar(path.to_owned())),
            None => Err(BuildError::NoSuchField(path.to_owned())),
        }
    }

    /// Assign a JSON document to the field at some path (the root if `None`),
    /// marking every leaf it sets in `changed`
    pub fn assign_json(&mut self,
                       path: Option<&str>,
                       json: &Json,
                       changed: &mut BitSet) -> Result<(), BuildError> {
        match path {
            None => self.assign_json_at(0, "", json, changed),
            Some(path) => {
                let offset = self.offset_of(path)
                                 .ok_or_else(|| BuildError::NoSuchField(path.to_owned()))?;
                let field = self.sub_field_mut(path)
                                .ok_or_else(|| BuildError::NoSuchField(path.to_owned()))?;
                field.assign_json(offset, path, json, changed)
            }
        }
    }

    fn assign_json_at(&mut self,
                      base: usize,
                      path: &str,
                      json: &Json,
                      changed: &mut BitSet) -> Result<(), BuildError> {
        let members = json.as_object().ok_or_else(|| BuildError::JsonShape {
            field: path.to_owned(),
            reason: "expected an object".to_owned(),
        })?;
        for (key, member) in members {
            let child_path = if path.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", path, key)
            };
            let index = self.index_of(key)
                            .ok_or_else(|| BuildError::NoSuchField(child_path.clone()))?;
            let offset = base + self.structure.offset_of(key).unwrap_or_default();
            self.fields[index].assign_json(offset, &child_path, member, changed)?;
        }
        Ok(())
    }

    /// Copy the fields of `source` which `mask` selects into this value
    ///
    /// Fields are matched by name, so `source` may be of a narrower type than
    /// this value. Selecting a structure offset selects its whole subtree.
    pub fn merge_from(&mut self, source: &PVStructure, mask: &BitSet) {
        self.merge_at(source, 0, mask, mask.get(0));
    }

    fn merge_at(&mut self, source: &PVStructure, base: usize, mask: &BitSet, all: bool) {
        let mut offset = base + 1;
        for ((name, ty), value) in source.structure.fields.iter().zip(&source.fields) {
            let selected = all || mask.get(offset);
            if let Some(index) = self.index_of(name) {
                match (&mut self.fields[index], value) {
                    (PVField::Structure(dest), PVField::Structure(src)) => {
                        dest.merge_at(src, offset, mask, selected);
                    }
                    (dest, src) if selected && dest.same_leaf_type(src) => {
                        *dest = src.clone();
                    }
                    _ => {}
                }
            }
            offset += ty.field_count();
        }
    }

    fn dump(&self, f: &mut fmt::Formatter, indent: usize) -> fmt::Result {
        for ((name, ty), value) in self.structure.fields.iter().zip(&self.fields) {
            match value {
                PVField::Scalar(v) => {
                    writeln!(f, "{:indent$}{} {} {}", "", ty, name, v, indent = indent)?
                }
                PVField::ScalarArray(_, values) => {
                    let items: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                    writeln!(f, "{:indent$}{} {} [{}]", "", ty, name, items.join(","),
                             indent = indent)?
                }
                PVField::Structure(inner) => {
                    writeln!(f, "{:indent$}{} {}", "", ty, name, indent = indent)?;
                    inner.dump(f, indent + 4)?;
                }
            }
        }
        Ok(())
    }
}
//
impl fmt::Display for PVStructure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "structure {}", self.structure.id)?;
        self.dump(f, 4)
    }
}


/// Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Offsets are assigned depth-first, root first
    #[test]
    fn offsets() {
        let nt = Structure::nt_enum();
        assert_eq!(nt.field_count(), 5);
        assert_eq!(nt.offset_of("value"), Some(1));
        assert_eq!(nt.offset_of("value.index"), Some(2));
        assert_eq!(nt.offset_of("value.choices"), Some(3));
        assert_eq!(nt.offset_of("descriptor"), Some(4));
        assert_eq!(nt.offset_of("value.nope"), None);
        assert_eq!(nt.offset_of("descriptor.x"), None);
    }

    /// Structure equality is structural, not by identity
    #[test]
    fn structural_equality() {
        assert_eq!(Structure::nt_scalar(ScalarType::Double),
                   Structure::nt_scalar(ScalarType::Double));
        assert_ne!(Structure::nt_scalar(ScalarType::Double),
                   Structure::nt_scalar(ScalarType::Int));
        assert_ne!(*Structure::nt_scalar(ScalarType::Double),
                   *Structure::nt_enum());
    }

    /// Selecting fields narrows the type but keeps identifiers
    #[test]
    fn select() {
        let nt = Structure::nt_enum();
        let narrowed = nt.select(&["value.index"]).unwrap();
        assert_eq!(narrowed.id(), NT_ENUM_ID);
        assert_eq!(narrowed.field_count(), 3);
        match narrowed.field("value") {
            Some(FieldType::Structure(s)) => assert!(s.is_enum()),
            other => panic!("unexpected value field {:?}", other),
        }
        assert_eq!(*nt.select(&["value", "descriptor"]).unwrap(), *nt);
        assert!(nt.select(&["nope"]).is_err());
    }

    /// Textual assignment follows the declared scalar type
    #[test]
    fn put_from_text() {
        let mut pv = PVStructure::new(&Structure::nt_scalar(ScalarType::Double));
        assert_eq!(pv.put_from("value", "3.14").unwrap(), 1);
        assert_eq!(pv.scalar("value"), Some(&ScalarValue::Double(3.14)));
        assert!(matches!(pv.put_from("value", "pi"), Err(BuildError::Parse { .. })));
        assert!(matches!(pv.put_from("nope", "1"), Err(BuildError::NoSuchField(_))));

        let mut pv = PVStructure::new(&Structure::nt_enum());
        assert!(matches!(pv.put_from("value", "1"), Err(BuildError::NotScalar(_))));
    }

    /// JSON assignment marks exactly the leaves it sets
    #[test]
    fn json_assignment() {
        let mut pv = PVStructure::new(&Structure::nt_enum());
        let mut changed = BitSet::new();
        pv.assign_json(None, &json!({"value": {"index": 2}}), &mut changed).unwrap();
        assert_eq!(pv.scalar("value.index"), Some(&ScalarValue::Int(2)));
        assert_eq!(changed.iter().collect::<Vec<_>>(), vec![2]);

        let mut changed = BitSet::new();
        pv.assign_json(Some("value.choices"), &json!(["a", "b"]), &mut changed).unwrap();
        assert_eq!(changed.iter().collect::<Vec<_>>(), vec![3]);

        let mut changed = BitSet::new();
        assert!(pv.assign_json(None, &json!({"bogus": 1}), &mut changed).is_err());
        assert!(pv.assign_json(None, &json!([1]), &mut changed).is_err());
    }

    /// Merging copies only the masked fields, matched by name
    #[test]
    fn merge() {
        let full = Structure::nt_enum();
        let mut record = PVStructure::new(&full);
        record.put_from("descriptor", "keep me").unwrap();

        let narrowed = full.select(&["value.index"]).unwrap();
        let mut update = PVStructure::new(&narrowed);
        let offset = update.put_from("value.index", "1").unwrap();
        let mut mask = BitSet::new();
        mask.set(offset);

        record.merge_from(&update, &mask);
        assert_eq!(record.scalar("value.index"), Some(&ScalarValue::Int(1)));
        assert_eq!(record.scalar("descriptor").and_then(ScalarValue::as_str),
                   Some("keep me"));

        // Nothing selected, nothing copied
        update.put_from("value.index", "7").unwrap();
        record.merge_from(&update, &BitSet::new());
        assert_eq!(record.scalar("value.index"), Some(&ScalarValue::Int(1)));
    }
}
