//! Put value builders
//!
//! A builder turns what a caller wants to write into a value of the structure
//! reported by the remote side, and marks the fields it set. Two ready-made
//! builders cover what the command-line tool accepts: a list of
//! `field=value` pairs, and a single JSON object describing the whole value.
//! Any function with the right signature is a builder too.

use crate::client::PutArgs;
use crate::error::BuildError;
use crate::value::{FieldType, PVField, PVStructure, ScalarValue, Structure};
use serde_json::Value as Json;
use std::sync::Arc;
use tracing::{debug, warn};


/// Producer of the value written by a put operation
pub trait PutValueBuilder: Send + Sync {
    /// Store a value of type `build` in `args.value`, and mark the fields
    /// which should be written in `args.changed`
    fn build(&self, build: &Arc<Structure>, args: &mut PutArgs) -> Result<(), BuildError>;
}
//
impl<F> PutValueBuilder for F
    where F: Fn(&Arc<Structure>, &mut PutArgs) -> Result<(), BuildError> + Send + Sync
{
    fn build(&self, build: &Arc<Structure>, args: &mut PutArgs) -> Result<(), BuildError> {
        self(build, args)
    }
}


/// How textual values aimed at enumerations are interpreted
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EnumMode {
    /// Try the text as a choice name, then as an index
    #[default]
    Auto,

    /// The text is always an index
    Number,

    /// The text is always a choice name
    String,
}


/// Builder writing a list of `field=value` pairs
///
/// Values starting with `{` or `[` are parsed as JSON and assigned to the
/// named field. Other values are converted to the type of the field, which
/// must be a scalar or an enumeration. Fields which do not exist, or which
/// can't take a textual value, are reported and skipped.
#[derive(Clone, Debug, Default)]
pub struct FieldValueBuilder {
    pairs: Vec<(String, String)>,
    enum_mode: EnumMode,
}
//
impl FieldValueBuilder {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        FieldValueBuilder { pairs, enum_mode: EnumMode::Auto }
    }

    pub fn with_enum_mode(mut self, enum_mode: EnumMode) -> Self {
        self.enum_mode = enum_mode;
        self
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }
}
//
impl PutValueBuilder for FieldValueBuilder {
    fn build(&self, build: &Arc<Structure>, args: &mut PutArgs) -> Result<(), BuildError> {
        let mut root = PVStructure::new(build);

        for (field, text) in &self.pairs {
            let Some(target) = build.sub_field(field) else {
                warn!("{}", BuildError::NoSuchField(field.clone()));
                continue;
            };

            if text.starts_with('{') || text.starts_with('[') {
                let json: Json = serde_json::from_str(text)?;
                root.assign_json(Some(field), &json, &mut args.changed)?;
                continue;
            }

            match target {
                FieldType::Structure(s) if s.is_enum() => {
                    let offset = put_enum(&mut root, field, text, self.enum_mode,
                                          args.previous())?;
                    args.changed.set(offset);
                }
                FieldType::Scalar(_) => {
                    let offset = root.put_from(field, text)?;
                    args.changed.set(offset);
                }
                _ => warn!("{}", BuildError::NotScalar(field.clone())),
            }
        }

        debug!("To be sent: {}\n{}", args.changed, root);
        args.value = Some(root);
        Ok(())
    }
}


/// Builder writing a JSON object onto the whole structure
#[derive(Clone, Debug)]
pub struct JsonBuilder {
    blob: String,
}
//
impl JsonBuilder {
    pub fn new(blob: impl Into<String>) -> Self {
        JsonBuilder { blob: blob.into() }
    }
}
//
impl PutValueBuilder for JsonBuilder {
    fn build(&self, build: &Arc<Structure>, args: &mut PutArgs) -> Result<(), BuildError> {
        let json: Json = serde_json::from_str(&self.blob)?;
        let mut root = PVStructure::new(build);
        root.assign_json(None, &json, &mut args.changed)?;
        debug!("To be sent: {}\n{}", args.changed, root);
        args.value = Some(root);
        Ok(())
    }
}


/// Either of the ready-made builders
#[derive(Clone, Debug)]
pub enum ValueBuilder {
    Fields(FieldValueBuilder),
    Json(JsonBuilder),
}
//
impl PutValueBuilder for ValueBuilder {
    fn build(&self, build: &Arc<Structure>, args: &mut PutArgs) -> Result<(), BuildError> {
        match *self {
            ValueBuilder::Fields(ref fields) => fields.build(build, args),
            ValueBuilder::Json(ref json) => json.build(build, args),
        }
    }
}


/// Store a textual value into the enumeration at `path`, returning the offset
/// of its index
///
/// Choice names can only be resolved against a fetched current value.
fn put_enum(root: &mut PVStructure,
            path: &str,
            text: &str,
            mode: EnumMode,
            previous: Option<&PVStructure>) -> Result<usize, BuildError> {
    let choices: Vec<&str> = match previous.and_then(|p| p.sub_field(&format!("{}.choices", path)))
    {
        Some(PVField::ScalarArray(_, values)) => values.iter()
                                                       .filter_map(ScalarValue::as_str)
                                                       .collect(),
        _ => Vec::new(),
    };
    let by_name = || choices.iter().position(|c| *c == text);
    let by_number = || {
        text.trim().parse::<i32>().map_err(|e| BuildError::Parse {
            field: path.to_owned(),
            value: text.to_owned(),
            reason: e.to_string(),
        })
    };
    let unknown_choice = || BuildError::Parse {
        field: path.to_owned(),
        value: text.to_owned(),
        reason: "not an enumeration choice".to_owned(),
    };

    let index = match mode {
        EnumMode::Number => by_number()?,
        EnumMode::String => {
            let position = by_name().ok_or_else(unknown_choice)?;
            i32::try_from(position).map_err(|_| unknown_choice())?
        }
        EnumMode::Auto => match by_name() {
            Some(position) => i32::try_from(position).map_err(|_| unknown_choice())?,
            None => by_number()?,
        },
    };
    root.set_scalar(&format!("{}.index", path), ScalarValue::Int(index))
}


/// Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitset::BitSet;
    use crate::value::ScalarType;

    fn pairs(list: &[(&str, &str)]) -> Vec<(String, String)> {
        list.iter().map(|(f, v)| (f.to_string(), v.to_string())).collect()
    }

    fn run(builder: &dyn PutValueBuilder,
           build: &Arc<Structure>,
           previous: Option<PVStructure>) -> Result<PutArgs, BuildError> {
        let mut args = PutArgs::new(previous, BitSet::new());
        builder.build(build, &mut args)?;
        Ok(args)
    }

    fn enum_record(choices: &[&str]) -> PVStructure {
        let mut pv = PVStructure::new(&Structure::nt_enum());
        let list = serde_json::json!(choices);
        pv.assign_json(Some("value.choices"), &list, &mut BitSet::new()).unwrap();
        pv
    }

    /// Scalars are parsed and marked
    #[test]
    fn scalar_pairs() {
        let build = Structure::nt_scalar(ScalarType::Double);
        let builder = FieldValueBuilder::new(pairs(&[("value", "3.14")]));
        let args = run(&builder, &build, None).unwrap();
        let value = args.value.unwrap();
        assert_eq!(value.scalar("value"), Some(&ScalarValue::Double(3.14)));
        assert_eq!(args.changed.iter().collect::<Vec<_>>(), vec![1]);
    }

    /// Unknown fields are skipped, bad values fail
    #[test]
    fn bad_pairs() {
        let build = Structure::nt_scalar(ScalarType::Double);
        let builder = FieldValueBuilder::new(pairs(&[("nope", "1"), ("value", "2")]));
        let args = run(&builder, &build, None).unwrap();
        assert_eq!(args.changed.iter().collect::<Vec<_>>(), vec![1]);

        let builder = FieldValueBuilder::new(pairs(&[("value", "two")]));
        assert!(matches!(run(&builder, &build, None), Err(BuildError::Parse { .. })));
    }

    /// JSON values are assigned to the named field
    #[test]
    fn json_pair() {
        let build = Structure::nt_enum();
        let builder = FieldValueBuilder::new(pairs(&[("value", r#"{"index": 1}"#)]));
        let args = run(&builder, &build, None).unwrap();
        assert_eq!(args.value.unwrap().scalar("value.index"), Some(&ScalarValue::Int(1)));
        assert_eq!(args.changed.iter().collect::<Vec<_>>(), vec![2]);

        let builder = FieldValueBuilder::new(pairs(&[("value", "{not json")]));
        assert!(matches!(run(&builder, &build, None), Err(BuildError::Json(_))));
    }

    /// Enumerations take indices or choice names
    #[test]
    fn enum_modes() {
        let build = Structure::nt_enum();
        let current = enum_record(&["Off", "On", "Fault"]);
        let index_of = |args: PutArgs| match args.value.unwrap().scalar("value.index") {
            Some(ScalarValue::Int(i)) => *i,
            other => panic!("unexpected index {:?}", other),
        };

        let auto = FieldValueBuilder::new(pairs(&[("value", "On")]));
        assert_eq!(index_of(run(&auto, &build, Some(current.clone())).unwrap()), 1);

        let auto_number = FieldValueBuilder::new(pairs(&[("value", "2")]));
        assert_eq!(index_of(run(&auto_number, &build, None).unwrap()), 2);

        let number = FieldValueBuilder::new(pairs(&[("value", "On")]))
            .with_enum_mode(EnumMode::Number);
        assert!(run(&number, &build, Some(current.clone())).is_err());

        let string = FieldValueBuilder::new(pairs(&[("value", "Fault")]))
            .with_enum_mode(EnumMode::String);
        let args = run(&string, &build, Some(current.clone())).unwrap();
        assert_eq!(args.changed.iter().collect::<Vec<_>>(), vec![2]);
        assert_eq!(index_of(args), 2);

        // Without the current value, names can't be resolved
        assert!(run(&string, &build, None).is_err());
    }

    /// Whole JSON objects are written onto the root
    #[test]
    fn json_blob() {
        let build = Structure::nt_enum();
        let builder = ValueBuilder::Json(JsonBuilder::new(r#"{"value":{"index":2}}"#));
        let args = run(&builder, &build, None).unwrap();
        assert_eq!(args.value.unwrap().scalar("value.index"), Some(&ScalarValue::Int(2)));
        assert_eq!(args.changed.iter().collect::<Vec<_>>(), vec![2]);

        let builder = JsonBuilder::new(r#"{"value":{"bogus":2}}"#);
        assert!(matches!(run(&builder, &build, None), Err(BuildError::NoSuchField(_))));
    }
}
