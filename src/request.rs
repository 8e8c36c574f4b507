//! Request descriptors
//!
//! A request descriptor tells the remote side which fields of a record the put
//! sub-operation should expose. It is written as text such as `field(value)`
//! or `record[block=true]field(value,descriptor)`. An empty field list, as in
//! `field()`, selects the whole record. Record-level options are checked for
//! syntax, but no provider in this crate acts on them, so they are not kept.

use crate::error::PutError;
use crate::value::Structure;
use std::str::FromStr;
use std::sync::Arc;


/// Request descriptor which selects the whole record
pub const REQUEST_ALL: &str = "field()";


/// Parsed request descriptor
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PvRequest {
    /// Dotted paths of the selected fields, empty meaning everything
    fields: Vec<String>,
}
//
impl PvRequest {
    /// Request which selects the whole record
    pub fn all() -> Self {
        PvRequest::default()
    }

    /// Parse a textual request descriptor
    pub fn parse(text: &str) -> Result<Self, PutError> {
        let invalid = |why: &str| PutError::InvalidRequest(format!("{}: '{}'", why, text));
        let mut request = PvRequest::default();
        let mut rest = text.trim();

        // Bare field lists are accepted as a shorthand for field(...)
        if !rest.is_empty() && !rest.contains(['(', '[', ')', ']']) {
            request.push_fields(rest);
            return Ok(request);
        }

        while !rest.is_empty() {
            if let Some(body) = rest.strip_prefix("record[") {
                let end = body.find(']').ok_or_else(|| invalid("unterminated record["))?;
                for option in body[..end].split(',').map(str::trim).filter(|o| !o.is_empty()) {
                    match option.split_once('=') {
                        Some((key, _)) if !key.trim().is_empty() => {}
                        _ => return Err(invalid("expected key=value option")),
                    }
                }
                rest = body[end + 1..].trim_start();
            } else if let Some(body) = rest.strip_prefix("field(") {
                let end = body.find(')').ok_or_else(|| invalid("unterminated field("))?;
                request.push_fields(&body[..end]);
                rest = body[end + 1..].trim_start();
            } else {
                return Err(invalid("unexpected text"));
            }
        }
        Ok(request)
    }

    fn push_fields(&mut self, list: &str) {
        self.fields.extend(list.split(',')
                               .map(str::trim)
                               .filter(|f| !f.is_empty())
                               .map(str::to_owned));
    }

    /// Selected field paths, empty when the whole record is requested
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Type exposed to a put sub-operation on a record of some type
    pub fn put_type(&self, record: &Arc<Structure>) -> Result<Arc<Structure>, String> {
        if self.fields.is_empty() {
            return Ok(record.clone());
        }
        let paths: Vec<&str> = self.fields.iter().map(String::as_str).collect();
        record.select(&paths)
    }
}
//
impl FromStr for PvRequest {
    type Err = PutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PvRequest::parse(s)
    }
}


/// Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ScalarType;

    /// Check the accepted request forms
    #[test]
    fn parse_forms() {
        assert_eq!(PvRequest::parse(REQUEST_ALL).unwrap(), PvRequest::all());
        assert_eq!(PvRequest::parse("").unwrap(), PvRequest::all());

        let r = PvRequest::parse("field(value)").unwrap();
        assert_eq!(r.fields(), ["value"]);

        let r: PvRequest = "record[block=true, process = passive]field(value, descriptor)"
            .parse()
            .unwrap();
        assert_eq!(r.fields(), ["value", "descriptor"]);
        assert_eq!(r, PvRequest::parse("field(value,descriptor)").unwrap());

        let r = PvRequest::parse("value,alarm.severity").unwrap();
        assert_eq!(r.fields(), ["value", "alarm.severity"]);
    }

    /// Check that malformed requests are rejected
    #[test]
    fn parse_errors() {
        for bad in ["field(value", "record[block", "record[block]junk", "record[=1]", "fi(eld"] {
            match PvRequest::parse(bad) {
                Err(PutError::InvalidRequest(_)) => {}
                other => panic!("'{}' should not parse, got {:?}", bad, other),
            }
        }
    }

    /// Check the put type derived from a record type
    #[test]
    fn put_type() {
        let record = Structure::nt_scalar(ScalarType::Double);
        assert_eq!(PvRequest::all().put_type(&record).unwrap(), record);

        let narrowed = PvRequest::parse("field(value)").unwrap().put_type(&record).unwrap();
        assert_eq!(narrowed.field_count(), 2);
        assert!(narrowed.field("descriptor").is_none());

        assert!(PvRequest::parse("field(bogus)").unwrap().put_type(&record).is_err());
    }
}
