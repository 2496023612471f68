// LDAP search filters: BER codec (RFC 4511 section 4.5.1), string
// representation (RFC 4515) and evaluation against entries.

use crate::ber::{BerReader, BerWriter, UNIVERSAL_OCTET_STRING_TYPE, UNIVERSAL_SEQUENCE_TYPE};
use crate::entry::{values_equal, Entry};
use crate::error::{DecodeStep, FilterError, ProtocolError};
use std::cmp::Ordering;
use std::fmt;

pub const FILTER_AND: u8 = 0xA0;
pub const FILTER_OR: u8 = 0xA1;
pub const FILTER_NOT: u8 = 0xA2;
pub const FILTER_EQUALITY: u8 = 0xA3;
pub const FILTER_SUBSTRINGS: u8 = 0xA4;
pub const FILTER_GREATER_OR_EQUAL: u8 = 0xA5;
pub const FILTER_LESS_OR_EQUAL: u8 = 0xA6;
pub const FILTER_PRESENT: u8 = 0x87;
pub const FILTER_APPROXIMATE: u8 = 0xA8;
pub const FILTER_EXTENSIBLE: u8 = 0xA9;

const SUBSTRING_INITIAL: u8 = 0x80;
const SUBSTRING_ANY: u8 = 0x81;
const SUBSTRING_FINAL: u8 = 0x82;
const EXTENSIBLE_MATCHING_RULE: u8 = 0x81;
const EXTENSIBLE_TYPE: u8 = 0x82;
const EXTENSIBLE_MATCH_VALUE: u8 = 0x83;
const EXTENSIBLE_DN_ATTRIBUTES: u8 = 0x84;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchFilter {
    And(Vec<SearchFilter>),
    Or(Vec<SearchFilter>),
    Not(Box<SearchFilter>),
    Equality { attr: String, value: Vec<u8> },
    Substrings {
        attr: String,
        initial: Option<Vec<u8>>,
        any: Vec<Vec<u8>>,
        final_: Option<Vec<u8>>,
    },
    GreaterOrEqual { attr: String, value: Vec<u8> },
    LessOrEqual { attr: String, value: Vec<u8> },
    Present(String),
    Approximate { attr: String, value: Vec<u8> },
    Extensible {
        matching_rule: Option<String>,
        attr: Option<String>,
        value: Vec<u8>,
        dn_attributes: bool,
    },
}

impl SearchFilter {
    /// `(objectClass=*)`, the filter clients send to match everything.
    pub fn match_all() -> Self {
        SearchFilter::Present("objectClass".to_string())
    }

    /// Decode one filter element.
    pub fn decode(reader: &mut BerReader) -> Result<Self, ProtocolError> {
        let tag = reader.peek_type().step("could not decode search filter")?;
        match tag {
            FILTER_AND | FILTER_OR => {
                reader.read_start_sequence().step("could not decode filter set")?;
                let mut filters = Vec::new();
                while reader.has_next_element() {
                    filters.push(Self::decode(reader)?);
                }
                reader.read_end_sequence().step("could not decode filter set")?;
                Ok(if tag == FILTER_AND {
                    SearchFilter::And(filters)
                } else {
                    SearchFilter::Or(filters)
                })
            }
            FILTER_NOT => {
                reader.read_start_sequence().step("could not decode not filter")?;
                let inner = Self::decode(reader)?;
                reader.read_end_sequence().step("could not decode not filter")?;
                Ok(SearchFilter::Not(Box::new(inner)))
            }
            FILTER_EQUALITY | FILTER_GREATER_OR_EQUAL | FILTER_LESS_OR_EQUAL | FILTER_APPROXIMATE => {
                let step = "could not decode attribute value assertion";
                reader.read_start_sequence().step(step)?;
                let attr = reader.read_octet_string_as_string().step(step)?;
                let value = reader.read_octet_string().step(step)?;
                reader.read_end_sequence().step(step)?;
                Ok(match tag {
                    FILTER_EQUALITY => SearchFilter::Equality { attr, value },
                    FILTER_GREATER_OR_EQUAL => SearchFilter::GreaterOrEqual { attr, value },
                    FILTER_LESS_OR_EQUAL => SearchFilter::LessOrEqual { attr, value },
                    _ => SearchFilter::Approximate { attr, value },
                })
            }
            FILTER_SUBSTRINGS => {
                let step = "could not decode substring filter";
                reader.read_start_sequence().step(step)?;
                let attr = reader.read_octet_string_as_string().step(step)?;
                reader.read_start_sequence().step(step)?;
                let mut initial = None;
                let mut any = Vec::new();
                let mut final_ = None;
                while reader.has_next_element() {
                    let element_tag = reader.peek_type().step(step)?;
                    let value = reader.read_octet_string().step(step)?;
                    match element_tag {
                        SUBSTRING_INITIAL => initial = Some(value),
                        SUBSTRING_ANY => any.push(value),
                        SUBSTRING_FINAL => final_ = Some(value),
                        other => {
                            return Err(ProtocolError::new(format!(
                                "invalid substring filter element type 0x{:02X}",
                                other
                            )))
                        }
                    }
                }
                reader.read_end_sequence().step(step)?;
                reader.read_end_sequence().step(step)?;
                if initial.is_none() && any.is_empty() && final_.is_none() {
                    return Err(ProtocolError::new(
                        "substring filter must contain at least one element",
                    ));
                }
                Ok(SearchFilter::Substrings { attr, initial, any, final_ })
            }
            FILTER_PRESENT => {
                let attr = reader
                    .read_octet_string_as_string()
                    .step("could not decode presence filter")?;
                Ok(SearchFilter::Present(attr))
            }
            FILTER_EXTENSIBLE => {
                let step = "could not decode extensible match filter";
                reader.read_start_sequence().step(step)?;
                let mut matching_rule = None;
                let mut attr = None;
                let mut value = None;
                let mut dn_attributes = false;
                while reader.has_next_element() {
                    match reader.peek_type().step(step)? {
                        EXTENSIBLE_MATCHING_RULE => {
                            matching_rule = Some(reader.read_octet_string_as_string().step(step)?)
                        }
                        EXTENSIBLE_TYPE => attr = Some(reader.read_octet_string_as_string().step(step)?),
                        EXTENSIBLE_MATCH_VALUE => value = Some(reader.read_octet_string().step(step)?),
                        EXTENSIBLE_DN_ATTRIBUTES => dn_attributes = reader.read_boolean().step(step)?,
                        other => {
                            return Err(ProtocolError::new(format!(
                                "invalid extensible match element type 0x{:02X}",
                                other
                            )))
                        }
                    }
                }
                reader.read_end_sequence().step(step)?;
                let value = value
                    .ok_or_else(|| ProtocolError::new("extensible match filter has no match value"))?;
                if matching_rule.is_none() && attr.is_none() {
                    return Err(ProtocolError::new(
                        "extensible match filter needs a matching rule or an attribute type",
                    ));
                }
                Ok(SearchFilter::Extensible { matching_rule, attr, value, dn_attributes })
            }
            other => Err(ProtocolError::new(format!(
                "invalid search filter type 0x{:02X}",
                other
            ))),
        }
    }

    pub fn encode(&self, writer: &mut BerWriter) -> Result<(), ProtocolError> {
        match self {
            SearchFilter::And(filters) | SearchFilter::Or(filters) => {
                let tag = if matches!(self, SearchFilter::And(_)) { FILTER_AND } else { FILTER_OR };
                writer.start_sequence(tag);
                for filter in filters {
                    filter.encode(writer)?;
                }
                writer.end_sequence().step("could not encode filter set")?;
            }
            SearchFilter::Not(inner) => {
                writer.start_sequence(FILTER_NOT);
                inner.encode(writer)?;
                writer.end_sequence().step("could not encode not filter")?;
            }
            SearchFilter::Equality { attr, value }
            | SearchFilter::GreaterOrEqual { attr, value }
            | SearchFilter::LessOrEqual { attr, value }
            | SearchFilter::Approximate { attr, value } => {
                let tag = match self {
                    SearchFilter::Equality { .. } => FILTER_EQUALITY,
                    SearchFilter::GreaterOrEqual { .. } => FILTER_GREATER_OR_EQUAL,
                    SearchFilter::LessOrEqual { .. } => FILTER_LESS_OR_EQUAL,
                    _ => FILTER_APPROXIMATE,
                };
                writer.start_sequence(tag);
                writer.write_string(attr);
                writer.write_octet_string(UNIVERSAL_OCTET_STRING_TYPE, value);
                writer.end_sequence().step("could not encode attribute value assertion")?;
            }
            SearchFilter::Substrings { attr, initial, any, final_ } => {
                writer.start_sequence(FILTER_SUBSTRINGS);
                writer.write_string(attr);
                writer.start_sequence(UNIVERSAL_SEQUENCE_TYPE);
                if let Some(initial) = initial {
                    writer.write_octet_string(SUBSTRING_INITIAL, initial);
                }
                for value in any {
                    writer.write_octet_string(SUBSTRING_ANY, value);
                }
                if let Some(final_) = final_ {
                    writer.write_octet_string(SUBSTRING_FINAL, final_);
                }
                writer.end_sequence().step("could not encode substring filter")?;
                writer.end_sequence().step("could not encode substring filter")?;
            }
            SearchFilter::Present(attr) => {
                writer.write_octet_string(FILTER_PRESENT, attr.as_bytes());
            }
            SearchFilter::Extensible { matching_rule, attr, value, dn_attributes } => {
                writer.start_sequence(FILTER_EXTENSIBLE);
                if let Some(rule) = matching_rule {
                    writer.write_octet_string(EXTENSIBLE_MATCHING_RULE, rule.as_bytes());
                }
                if let Some(attr) = attr {
                    writer.write_octet_string(EXTENSIBLE_TYPE, attr.as_bytes());
                }
                writer.write_octet_string(EXTENSIBLE_MATCH_VALUE, value);
                if *dn_attributes {
                    writer.write_boolean(EXTENSIBLE_DN_ATTRIBUTES, true);
                }
                writer.end_sequence().step("could not encode extensible match filter")?;
            }
        }
        Ok(())
    }

    /// Parse the RFC 4515 string form. The outer parentheses may be omitted.
    pub fn parse(s: &str) -> Result<Self, FilterError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(FilterError::new(s, "empty filter"));
        }
        let owned;
        let text = if trimmed.starts_with('(') {
            trimmed
        } else {
            owned = format!("({})", trimmed);
            owned.as_str()
        };
        let mut parser = FilterParser { input: s, text, pos: 0 };
        let filter = parser.parse_filter()?;
        if parser.pos != text.len() {
            return Err(FilterError::new(s, "unexpected characters after the filter"));
        }
        Ok(filter)
    }

    /// Evaluate the filter against an entry.
    pub fn matches(&self, entry: &Entry) -> bool {
        match self {
            SearchFilter::And(filters) => filters.iter().all(|f| f.matches(entry)),
            SearchFilter::Or(filters) => filters.iter().any(|f| f.matches(entry)),
            SearchFilter::Not(inner) => !inner.matches(entry),
            SearchFilter::Equality { attr, value } => entry.has_value(attr, value),
            SearchFilter::Approximate { attr, value } => {
                entry.values_of(attr).iter().any(|v| values_equal(v, value))
            }
            SearchFilter::GreaterOrEqual { attr, value } => entry
                .values_of(attr)
                .iter()
                .any(|v| compare_values(v, value) != Ordering::Less),
            SearchFilter::LessOrEqual { attr, value } => entry
                .values_of(attr)
                .iter()
                .any(|v| compare_values(v, value) != Ordering::Greater),
            SearchFilter::Present(attr) => entry.has_attribute(attr),
            SearchFilter::Substrings { attr, initial, any, final_ } => entry
                .values_of(attr)
                .iter()
                .any(|v| substring_match(v, initial.as_deref(), any, final_.as_deref())),
            SearchFilter::Extensible { attr, value, dn_attributes, .. } => {
                let in_entry = match attr {
                    Some(attr) => entry.values_of(attr).iter().any(|v| values_equal(v, value)),
                    None => entry.all_values().any(|v| values_equal(v, value)),
                };
                in_entry
                    || (*dn_attributes
                        && entry.dn.rdns().iter().flat_map(|r| r.avas()).any(|ava| {
                            attr.as_ref()
                                .map_or(true, |a| a.eq_ignore_ascii_case(ava.attr_type()))
                                && values_equal(ava.value().as_bytes(), value)
                        }))
            }
        }
    }
}

/// Integers compare numerically, everything else by normalized text.
fn compare_values(a: &[u8], b: &[u8]) -> Ordering {
    let as_int = |v: &[u8]| std::str::from_utf8(v).ok().and_then(|s| s.trim().parse::<i64>().ok());
    if let (Some(x), Some(y)) = (as_int(a), as_int(b)) {
        return x.cmp(&y);
    }
    let a = crate::dn::normalize_value(&String::from_utf8_lossy(a));
    let b = crate::dn::normalize_value(&String::from_utf8_lossy(b));
    a.cmp(&b)
}

fn substring_match(value: &[u8], initial: Option<&[u8]>, any: &[Vec<u8>], final_: Option<&[u8]>) -> bool {
    let norm = |v: &[u8]| crate::dn::normalize_value(&String::from_utf8_lossy(v));
    let value = norm(value);
    let mut rest = value.as_str();
    if let Some(initial) = initial {
        let initial = norm(initial);
        match rest.strip_prefix(initial.as_str()) {
            Some(r) => rest = r,
            None => return false,
        }
    }
    for part in any {
        let part = norm(part);
        match rest.find(part.as_str()) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    if let Some(final_) = final_ {
        return rest.ends_with(norm(final_).as_str());
    }
    true
}

struct FilterParser<'a> {
    input: &'a str,
    text: &'a str,
    pos: usize,
}

impl<'a> FilterParser<'a> {
    fn error(&self, reason: impl Into<String>) -> FilterError {
        FilterError::new(self.input, reason)
    }

    fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).copied()
    }

    fn expect(&mut self, c: u8) -> Result<(), FilterError> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected '{}' at position {}", c as char, self.pos)))
        }
    }

    fn parse_filter(&mut self) -> Result<SearchFilter, FilterError> {
        self.expect(b'(')?;
        let filter = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                SearchFilter::And(self.parse_list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                SearchFilter::Or(self.parse_list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                SearchFilter::Not(Box::new(self.parse_filter()?))
            }
            Some(_) => {
                let text = self.text;
                let start = self.pos;
                while let Some(c) = self.peek() {
                    if c == b'(' || c == b')' {
                        break;
                    }
                    self.pos += 1;
                }
                self.parse_item(&text[start..self.pos])?
            }
            None => return Err(self.error("unexpected end of filter")),
        };
        self.expect(b')')?;
        Ok(filter)
    }

    fn parse_list(&mut self) -> Result<Vec<SearchFilter>, FilterError> {
        let mut filters = Vec::new();
        while self.peek() == Some(b'(') {
            filters.push(self.parse_filter()?);
        }
        Ok(filters)
    }

    fn parse_item(&self, item: &str) -> Result<SearchFilter, FilterError> {
        let eq = item
            .find('=')
            .ok_or_else(|| self.error(format!("no '=' in filter component \"{}\"", item)))?;
        let value_text = &item[eq + 1..];
        let (lhs, kind) = match item[..eq].chars().last() {
            Some('~') => (&item[..eq - 1], Some(FILTER_APPROXIMATE)),
            Some('>') => (&item[..eq - 1], Some(FILTER_GREATER_OR_EQUAL)),
            Some('<') => (&item[..eq - 1], Some(FILTER_LESS_OR_EQUAL)),
            Some(':') => (&item[..eq - 1], Some(FILTER_EXTENSIBLE)),
            _ => (&item[..eq], None),
        };
        if kind == Some(FILTER_EXTENSIBLE) {
            return self.parse_extensible(lhs, value_text);
        }
        let attr = lhs.trim();
        if attr.is_empty() || !attr.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == ';') {
            return Err(self.error(format!("invalid attribute description \"{}\"", lhs)));
        }
        let attr = attr.to_string();
        match kind {
            Some(FILTER_APPROXIMATE) => Ok(SearchFilter::Approximate { attr, value: self.unescape(value_text)? }),
            Some(FILTER_GREATER_OR_EQUAL) => Ok(SearchFilter::GreaterOrEqual { attr, value: self.unescape(value_text)? }),
            Some(FILTER_LESS_OR_EQUAL) => Ok(SearchFilter::LessOrEqual { attr, value: self.unescape(value_text)? }),
            _ if value_text == "*" => Ok(SearchFilter::Present(attr)),
            _ if value_text.contains('*') => {
                let parts: Vec<&str> = value_text.split('*').collect();
                let last = parts.len() - 1;
                let mut initial = None;
                let mut any = Vec::new();
                let mut final_ = None;
                for (i, part) in parts.iter().enumerate() {
                    if part.is_empty() {
                        continue;
                    }
                    let value = self.unescape(part)?;
                    if i == 0 {
                        initial = Some(value);
                    } else if i == last {
                        final_ = Some(value);
                    } else {
                        any.push(value);
                    }
                }
                Ok(SearchFilter::Substrings { attr, initial, any, final_ })
            }
            _ => Ok(SearchFilter::Equality { attr, value: self.unescape(value_text)? }),
        }
    }

    fn parse_extensible(&self, lhs: &str, value_text: &str) -> Result<SearchFilter, FilterError> {
        let mut parts = lhs.split(':');
        let attr = parts.next().unwrap_or("").trim();
        let mut dn_attributes = false;
        let mut matching_rule = None;
        for part in parts {
            if part.eq_ignore_ascii_case("dn") {
                dn_attributes = true;
            } else if !part.is_empty() {
                matching_rule = Some(part.to_string());
            }
        }
        let attr = (!attr.is_empty()).then(|| attr.to_string());
        if attr.is_none() && matching_rule.is_none() {
            return Err(self.error("extensible match needs an attribute type or a matching rule"));
        }
        Ok(SearchFilter::Extensible {
            matching_rule,
            attr,
            value: self.unescape(value_text)?,
            dn_attributes,
        })
    }

    /// Resolve `\XX` escapes.
    fn unescape(&self, s: &str) -> Result<Vec<u8>, FilterError> {
        let bytes = s.as_bytes();
        let mut out = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'\\' {
                let hex = s
                    .get(i + 1..i + 3)
                    .ok_or_else(|| self.error("incomplete escape sequence"))?;
                let byte = u8::from_str_radix(hex, 16)
                    .map_err(|_| self.error(format!("invalid escape sequence \\{}", hex)))?;
                out.push(byte);
                i += 3;
            } else {
                out.push(bytes[i]);
                i += 1;
            }
        }
        Ok(out)
    }
}

fn escape_filter_value(value: &[u8]) -> String {
    let mut out = String::new();
    match std::str::from_utf8(value) {
        Ok(s) => {
            for c in s.chars() {
                match c {
                    '*' | '(' | ')' | '\\' | '\0' => out.push_str(&format!("\\{:02x}", c as u32)),
                    _ => out.push(c),
                }
            }
        }
        Err(_) => {
            for b in value {
                out.push_str(&format!("\\{:02x}", b));
            }
        }
    }
    out
}

impl fmt::Display for SearchFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchFilter::And(filters) | SearchFilter::Or(filters) => {
                f.write_str(if matches!(self, SearchFilter::And(_)) { "(&" } else { "(|" })?;
                for filter in filters {
                    write!(f, "{}", filter)?;
                }
                f.write_str(")")
            }
            SearchFilter::Not(inner) => write!(f, "(!{})", inner),
            SearchFilter::Equality { attr, value } => write!(f, "({}={})", attr, escape_filter_value(value)),
            SearchFilter::GreaterOrEqual { attr, value } => write!(f, "({}>={})", attr, escape_filter_value(value)),
            SearchFilter::LessOrEqual { attr, value } => write!(f, "({}<={})", attr, escape_filter_value(value)),
            SearchFilter::Approximate { attr, value } => write!(f, "({}~={})", attr, escape_filter_value(value)),
            SearchFilter::Present(attr) => write!(f, "({}=*)", attr),
            SearchFilter::Substrings { attr, initial, any, final_ } => {
                write!(f, "({}=", attr)?;
                if let Some(initial) = initial {
                    f.write_str(&escape_filter_value(initial))?;
                }
                f.write_str("*")?;
                for value in any {
                    write!(f, "{}*", escape_filter_value(value))?;
                }
                if let Some(final_) = final_ {
                    f.write_str(&escape_filter_value(final_))?;
                }
                f.write_str(")")
            }
            SearchFilter::Extensible { matching_rule, attr, value, dn_attributes } => {
                f.write_str("(")?;
                if let Some(attr) = attr {
                    f.write_str(attr)?;
                }
                if *dn_attributes {
                    f.write_str(":dn")?;
                }
                if let Some(rule) = matching_rule {
                    write!(f, ":{}", rule)?;
                }
                write!(f, ":={})", escape_filter_value(value))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dn::Dn;

    fn sample_entry() -> Entry {
        let mut entry = Entry::new(Dn::parse("uid=jdoe,ou=people,dc=example,dc=com").unwrap());
        entry.add_object_class("top");
        entry.add_object_class("inetOrgPerson");
        entry.add_value("uid", &[], b"jdoe".to_vec(), false);
        entry.add_value("cn", &[], b"John Doe".to_vec(), false);
        entry.add_value("sn", &[], b"Doe".to_vec(), false);
        entry.add_value("mail", &[], b"john.doe@example.com".to_vec(), false);
        entry.add_value("uidNumber", &[], b"1000".to_vec(), false);
        entry
    }

    fn round_trip(filter: &SearchFilter) -> SearchFilter {
        let mut writer = BerWriter::new();
        filter.encode(&mut writer).unwrap();
        let data = writer.into_vec();
        let mut reader = BerReader::new(&data);
        let decoded = SearchFilter::decode(&mut reader).unwrap();
        assert!(!reader.has_next_element());
        decoded
    }

    #[test]
    fn test_parse_simple_filters() {
        assert_eq!(SearchFilter::parse("(objectClass=*)").unwrap(), SearchFilter::match_all());
        assert_eq!(
            SearchFilter::parse("uid=jdoe").unwrap(),
            SearchFilter::Equality { attr: "uid".into(), value: b"jdoe".to_vec() }
        );
        assert_eq!(
            SearchFilter::parse("(uidNumber>=500)").unwrap(),
            SearchFilter::GreaterOrEqual { attr: "uidNumber".into(), value: b"500".to_vec() }
        );
    }

    #[test]
    fn test_parse_substrings() {
        let filter = SearchFilter::parse("(cn=Jo*n*Do*)").unwrap();
        assert_eq!(
            filter,
            SearchFilter::Substrings {
                attr: "cn".into(),
                initial: Some(b"Jo".to_vec()),
                any: vec![b"n".to_vec(), b"Do".to_vec()],
                final_: None,
            }
        );
        assert_eq!(filter.to_string(), "(cn=Jo*n*Do*)");
    }

    #[test]
    fn test_parse_nested_and_escapes() {
        let filter = SearchFilter::parse("(&(objectClass=person)(!(cn=a\\2ab)))").unwrap();
        match &filter {
            SearchFilter::And(parts) => {
                assert_eq!(parts.len(), 2);
                assert_eq!(
                    parts[1],
                    SearchFilter::Not(Box::new(SearchFilter::Equality {
                        attr: "cn".into(),
                        value: b"a*b".to_vec()
                    }))
                );
            }
            other => panic!("unexpected filter {:?}", other),
        }
        assert_eq!(filter.to_string(), "(&(objectClass=person)(!(cn=a\\2ab)))");
    }

    #[test]
    fn test_parse_extensible() {
        let filter = SearchFilter::parse("(ou:dn:caseIgnoreMatch:=people)").unwrap();
        assert_eq!(
            filter,
            SearchFilter::Extensible {
                matching_rule: Some("caseIgnoreMatch".into()),
                attr: Some("ou".into()),
                value: b"people".to_vec(),
                dn_attributes: true,
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(SearchFilter::parse("").is_err());
        assert!(SearchFilter::parse("(cn=a").is_err());
        assert!(SearchFilter::parse("(cn)").is_err());
        assert!(SearchFilter::parse("(cn=a\\zz)").is_err());
        assert!(SearchFilter::parse("(cn=a))").is_err());
    }

    #[test]
    fn test_ber_round_trip_all_kinds() {
        let filters = [
            "(&(objectClass=person)(|(uid=jdoe)(uid=other))(!(sn=Smith)))",
            "(cn=Jo*Doe)",
            "(uidNumber<=2000)",
            "(cn~=jon)",
            "(mail=*)",
            "(ou:dn:=people)",
        ];
        for text in filters {
            let filter = SearchFilter::parse(text).unwrap();
            assert_eq!(round_trip(&filter), filter, "{}", text);
        }
    }

    #[test]
    fn test_present_filter_encoding() {
        let mut writer = BerWriter::new();
        SearchFilter::match_all().encode(&mut writer).unwrap();
        let mut expected = vec![0x87, 0x0B];
        expected.extend_from_slice(b"objectClass");
        assert_eq!(writer.into_vec(), expected);
    }

    #[test]
    fn test_decode_unknown_filter_tag() {
        let data = [0xAA, 0x00];
        let mut reader = BerReader::new(&data);
        let err = SearchFilter::decode(&mut reader).unwrap_err();
        assert!(err.message.contains("invalid search filter type 0xAA"));
    }

    #[test]
    fn test_matches() {
        let entry = sample_entry();
        let check = |s: &str| SearchFilter::parse(s).unwrap().matches(&entry);
        assert!(check("(objectClass=inetorgperson)"));
        assert!(check("(cn=john doe)"));
        assert!(check("(cn=J*D*)"));
        assert!(check("(mail=*@example.com)"));
        assert!(!check("(mail=*@example.org)"));
        assert!(check("(uidNumber>=999)"));
        assert!(!check("(uidNumber>=1001)"));
        assert!(check("(uidNumber<=1000)"));
        assert!(check("(&(uid=jdoe)(!(sn=Smith)))"));
        assert!(check("(|(uid=nobody)(sn=doe))"));
        assert!(!check("(description=*)"));
        assert!(check("(ou:dn:=people)"));
        assert!(!check("(ou=people)"));
    }

    #[test]
    fn test_equality_follows_attribute_matching() {
        let mut entry = sample_entry();
        let password = crate::schema::Schema::core().attribute_type_or_default("userPassword");
        entry.add_typed_value(&password, &[], b"Secret".to_vec());
        let check = |s: &str| SearchFilter::parse(s).unwrap().matches(&entry);
        assert!(check("(userPassword=Secret)"));
        assert!(!check("(userPassword=secret)"));
        assert!(check("(sn=DOE)"));
    }
}
