// Directory entries, attributes, modifications and LDIF change records

use crate::dn::{normalize_value, Dn, Rdn};
use crate::error::{OperationError, ResultCode};
use crate::schema::{AttributeType, Schema};
use std::collections::BTreeMap;
use std::fmt;

/// Two attribute values are equal when their case-folded, whitespace
/// compacted text matches; non UTF-8 values compare byte for byte.
pub fn values_equal(a: &[u8], b: &[u8]) -> bool {
    match (std::str::from_utf8(a), std::str::from_utf8(b)) {
        (Ok(a), Ok(b)) => normalize_value(a) == normalize_value(b),
        _ => a == b,
    }
}

/// Equality rule an attribute applies to its own values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValueMatch {
    /// Case-folded, whitespace compacted text.
    #[default]
    CaseIgnore,
    /// Byte for byte.
    Exact,
}

impl ValueMatch {
    pub fn matches(self, a: &[u8], b: &[u8]) -> bool {
        match self {
            ValueMatch::CaseIgnore => values_equal(a, b),
            ValueMatch::Exact => a == b,
        }
    }
}

/// An attribute description (type plus options) with its values.
#[derive(Debug, Clone)]
pub struct Attribute {
    name: String,
    options: Vec<String>,
    values: Vec<Vec<u8>>,
    matching: ValueMatch,
}

impl Attribute {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: Vec::new(),
            values: Vec::new(),
            matching: ValueMatch::default(),
        }
    }

    pub fn with_options(name: impl Into<String>, options: Vec<String>) -> Self {
        let mut attr = Self::new(name);
        for option in options {
            attr.add_option(&option);
        }
        attr
    }

    /// Build an attribute from values, dropping duplicates.
    pub fn from_values(name: impl Into<String>, values: impl IntoIterator<Item = Vec<u8>>) -> Self {
        let mut attr = Self::new(name);
        for value in values {
            attr.add(value);
        }
        attr
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn matching(&self) -> ValueMatch {
        self.matching
    }

    /// Change the equality rule. Values already held are kept as they are.
    pub fn set_matching(&mut self, matching: ValueMatch) {
        self.matching = matching;
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn values(&self) -> &[Vec<u8>] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `name;option1;option2` as written in LDIF and on the wire.
    pub fn description(&self) -> String {
        let mut out = self.name.clone();
        for option in &self.options {
            out.push(';');
            out.push_str(option);
        }
        out
    }

    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|o| o.eq_ignore_ascii_case(option))
    }

    pub fn add_option(&mut self, option: &str) {
        if !self.has_option(option) {
            self.options.push(option.to_string());
        }
    }

    /// Same option set, ignoring order and case.
    pub fn has_same_options(&self, options: &[String]) -> bool {
        self.options.len() == options.len() && options.iter().all(|o| self.has_option(o))
    }

    pub fn contains(&self, value: &[u8]) -> bool {
        self.values.iter().any(|v| self.matching.matches(v, value))
    }

    /// Add `value`; returns `false` when an equal value is already present.
    pub fn add(&mut self, value: Vec<u8>) -> bool {
        if self.contains(&value) {
            return false;
        }
        self.values.push(value);
        true
    }

    pub fn remove(&mut self, value: &[u8]) -> bool {
        let before = self.values.len();
        let matching = self.matching;
        self.values.retain(|v| !matching.matches(v, value));
        self.values.len() != before
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

impl PartialEq for Attribute {
    fn eq(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
            && self.has_same_options(&other.options)
            && self.values.len() == other.values.len()
            && self.values.iter().all(|v| other.contains(v))
    }
}

impl Eq for Attribute {}

/// A directory entry. Attribute maps are keyed by the lowercase type name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    pub dn: Dn,
    /// Lowercase class name to the name as written.
    pub object_classes: BTreeMap<String, String>,
    pub user_attributes: BTreeMap<String, Vec<Attribute>>,
    pub operational_attributes: BTreeMap<String, Vec<Attribute>>,
}

impl Entry {
    pub fn new(dn: Dn) -> Self {
        Self {
            dn,
            ..Default::default()
        }
    }

    /// Returns `false` when the class was already present.
    pub fn add_object_class(&mut self, name: &str) -> bool {
        let key = name.to_ascii_lowercase();
        if self.object_classes.contains_key(&key) {
            return false;
        }
        self.object_classes.insert(key, name.to_string());
        true
    }

    pub fn has_object_class(&self, name: &str) -> bool {
        self.object_classes.contains_key(&name.to_ascii_lowercase())
    }

    /// Object class values as an `objectClass` attribute.
    pub fn object_class_attribute(&self) -> Attribute {
        Attribute::from_values(
            "objectClass",
            self.object_classes.values().map(|v| v.as_bytes().to_vec()),
        )
    }

    fn attribute_map_mut(&mut self, operational: bool) -> &mut BTreeMap<String, Vec<Attribute>> {
        if operational {
            &mut self.operational_attributes
        } else {
            &mut self.user_attributes
        }
    }

    /// Add one value to the attribute with exactly these options, creating it
    /// when needed. Returns `false` for a duplicate value.
    pub fn add_value(&mut self, name: &str, options: &[String], value: Vec<u8>, operational: bool) -> bool {
        self.insert_value(name, options, value, operational, ValueMatch::default())
    }

    /// Like [`Entry::add_value`], with the name, placement and equality rule
    /// taken from the attribute type.
    pub fn add_typed_value(&mut self, attr_type: &AttributeType, options: &[String], value: Vec<u8>) -> bool {
        self.insert_value(
            &attr_type.name,
            options,
            value,
            attr_type.operational,
            attr_type.syntax.value_match(),
        )
    }

    fn insert_value(
        &mut self,
        name: &str,
        options: &[String],
        value: Vec<u8>,
        operational: bool,
        matching: ValueMatch,
    ) -> bool {
        let attrs = self
            .attribute_map_mut(operational)
            .entry(name.to_ascii_lowercase())
            .or_default();
        if let Some(attr) = attrs.iter_mut().find(|a| a.has_same_options(options)) {
            return attr.add(value);
        }
        let mut attr = Attribute::with_options(name, options.to_vec());
        attr.set_matching(matching);
        attr.add(value);
        attrs.push(attr);
        true
    }

    /// Merge `attr` into the entry. `objectClass` values go to the object
    /// class map.
    pub fn add_attribute(&mut self, attr: Attribute, operational: bool) {
        if attr.name.eq_ignore_ascii_case("objectclass") {
            for value in attr.values() {
                self.add_object_class(&String::from_utf8_lossy(value));
            }
            return;
        }
        let options = attr.options.clone();
        for value in attr.values {
            self.insert_value(&attr.name, &options, value, operational, attr.matching);
        }
        // Keep the attribute even when it has no values yet.
        self.attribute_map_mut(operational)
            .entry(attr.name.to_ascii_lowercase())
            .or_default();
    }

    /// All attributes of a type (every option set), user or operational.
    pub fn get(&self, name: &str) -> Option<&Vec<Attribute>> {
        let key = name.to_ascii_lowercase();
        self.user_attributes
            .get(&key)
            .or_else(|| self.operational_attributes.get(&key))
    }

    pub fn is_operational(&self, name: &str) -> bool {
        self.operational_attributes
            .contains_key(&name.to_ascii_lowercase())
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        if name.eq_ignore_ascii_case("objectclass") {
            return !self.object_classes.is_empty();
        }
        self.get(name)
            .is_some_and(|attrs| attrs.iter().any(|a| !a.is_empty()))
    }

    pub fn has_value(&self, name: &str, value: &[u8]) -> bool {
        if name.eq_ignore_ascii_case("objectclass") {
            return std::str::from_utf8(value).is_ok_and(|v| self.has_object_class(v));
        }
        self.get(name)
            .is_some_and(|attrs| attrs.iter().any(|a| a.contains(value)))
    }

    /// Every value of a type, across option sets.
    pub fn values_of(&self, name: &str) -> Vec<&[u8]> {
        if name.eq_ignore_ascii_case("objectclass") {
            return self.object_classes.values().map(|v| v.as_bytes()).collect();
        }
        self.get(name)
            .map(|attrs| {
                attrs
                    .iter()
                    .flat_map(|a| a.values().iter().map(Vec::as_slice))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Lowercase names of user attributes present, `objectclass` first.
    pub fn attribute_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        if !self.object_classes.is_empty() {
            names.push("objectclass".to_string());
        }
        names.extend(self.user_attributes.keys().cloned());
        names
    }

    pub fn all_values(&self) -> impl Iterator<Item = &[u8]> {
        self.object_classes
            .values()
            .map(|v| v.as_bytes())
            .chain(
                self.user_attributes
                    .values()
                    .chain(self.operational_attributes.values())
                    .flatten()
                    .flat_map(|a| a.values().iter().map(Vec::as_slice)),
            )
    }

    pub fn remove_attribute(&mut self, name: &str) -> bool {
        let key = name.to_ascii_lowercase();
        if key == "objectclass" {
            let had = !self.object_classes.is_empty();
            self.object_classes.clear();
            return had;
        }
        self.user_attributes.remove(&key).is_some()
            || self.operational_attributes.remove(&key).is_some()
    }

    /// Add the RDN attribute values to the entry when they are missing.
    pub fn add_rdn_attributes_if_missing(&mut self, schema: &Schema) {
        let Some(rdn) = self.dn.rdn().cloned() else {
            return;
        };
        for ava in rdn.avas() {
            if ava.attr_type().eq_ignore_ascii_case("objectclass") {
                self.add_object_class(ava.value());
                continue;
            }
            let attr_type = schema.attribute_type_or_default(ava.attr_type());
            let value = ava.value().as_bytes().to_vec();
            if !self.has_value(&attr_type.name, &value) {
                self.add_typed_value(&attr_type, &[], value);
            }
        }
    }

    /// Remove the values of `rdn` that are not also in the current RDN.
    pub fn remove_rdn_values(&mut self, rdn: &Rdn) {
        for ava in rdn.avas() {
            let key = ava.attr_type().to_ascii_lowercase();
            for map in [&mut self.user_attributes, &mut self.operational_attributes] {
                if let Some(attrs) = map.get_mut(&key) {
                    for attr in attrs.iter_mut() {
                        attr.remove(ava.value().as_bytes());
                    }
                    attrs.retain(|a| !a.is_empty());
                    if attrs.is_empty() {
                        map.remove(&key);
                    }
                }
            }
        }
    }

    /// Apply one modify operation.
    pub fn apply_modification(&mut self, modification: &Modification) -> Result<(), OperationError> {
        let attr = &modification.attribute;
        let name = attr.name();
        if name.eq_ignore_ascii_case("objectclass") {
            return self.apply_object_class_modification(modification);
        }
        let operational = self.is_operational(name);
        match modification.mod_type {
            ModificationType::Add => {
                if attr.is_empty() {
                    return Err(OperationError::new(
                        ResultCode::PROTOCOL_ERROR,
                        format!("modify add of attribute {} requires at least one value", name),
                    ));
                }
                for value in attr.values() {
                    if !self.insert_value(name, attr.options(), value.clone(), operational, attr.matching) {
                        return Err(OperationError::new(
                            ResultCode::ATTRIBUTE_OR_VALUE_EXISTS,
                            format!(
                                "entry {} already contains value {} for attribute {}",
                                self.dn,
                                String::from_utf8_lossy(value),
                                name
                            ),
                        ));
                    }
                }
            }
            ModificationType::Delete => {
                let key = name.to_ascii_lowercase();
                let map = self.attribute_map_mut(operational);
                let Some(attrs) = map.get_mut(&key) else {
                    return Err(no_such_attribute(name));
                };
                let Some(index) = attrs.iter().position(|a| a.has_same_options(attr.options())) else {
                    return Err(no_such_attribute(name));
                };
                if attr.is_empty() {
                    attrs.remove(index);
                } else {
                    for value in attr.values() {
                        if !attrs[index].remove(value) {
                            return Err(OperationError::new(
                                ResultCode::NO_SUCH_ATTRIBUTE,
                                format!(
                                    "attribute {} does not contain value {}",
                                    name,
                                    String::from_utf8_lossy(value)
                                ),
                            ));
                        }
                    }
                    if attrs[index].is_empty() {
                        attrs.remove(index);
                    }
                }
                if attrs.is_empty() {
                    map.remove(&key);
                }
            }
            ModificationType::Replace => {
                let key = name.to_ascii_lowercase();
                let map = self.attribute_map_mut(operational);
                if let Some(attrs) = map.get_mut(&key) {
                    attrs.retain(|a| !a.has_same_options(attr.options()));
                    if attrs.is_empty() {
                        map.remove(&key);
                    }
                }
                for value in attr.values() {
                    self.insert_value(name, attr.options(), value.clone(), operational, attr.matching);
                }
            }
            ModificationType::Increment => {
                let increment = match attr.values() {
                    [value] => parse_integer(value).ok_or_else(|| {
                        OperationError::new(
                            ResultCode::INVALID_ATTRIBUTE_SYNTAX,
                            format!("increment value for {} is not an integer", name),
                        )
                    })?,
                    _ => {
                        return Err(OperationError::new(
                            ResultCode::PROTOCOL_ERROR,
                            format!("increment of attribute {} requires exactly one value", name),
                        ))
                    }
                };
                let key = name.to_ascii_lowercase();
                let attrs = self
                    .attribute_map_mut(operational)
                    .get_mut(&key)
                    .ok_or_else(|| no_such_attribute(name))?;
                let target = attrs
                    .iter_mut()
                    .find(|a| a.has_same_options(attr.options()))
                    .ok_or_else(|| no_such_attribute(name))?;
                let mut updated = Vec::with_capacity(target.len());
                for value in target.values() {
                    let current = parse_integer(value).ok_or_else(|| {
                        OperationError::new(
                            ResultCode::CONSTRAINT_VIOLATION,
                            format!("attribute {} has a non-integer value", name),
                        )
                    })?;
                    updated.push((current + increment).to_string().into_bytes());
                }
                target.clear();
                for value in updated {
                    target.add(value);
                }
            }
        }
        Ok(())
    }

    fn apply_object_class_modification(&mut self, modification: &Modification) -> Result<(), OperationError> {
        let values: Vec<String> = modification
            .attribute
            .values()
            .iter()
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .collect();
        match modification.mod_type {
            ModificationType::Add => {
                for value in &values {
                    if !self.add_object_class(value) {
                        return Err(OperationError::new(
                            ResultCode::ATTRIBUTE_OR_VALUE_EXISTS,
                            format!("entry {} already has object class {}", self.dn, value),
                        ));
                    }
                }
            }
            ModificationType::Delete => {
                if values.is_empty() {
                    self.object_classes.clear();
                }
                for value in &values {
                    if self.object_classes.remove(&value.to_ascii_lowercase()).is_none() {
                        return Err(no_such_attribute("objectClass"));
                    }
                }
            }
            ModificationType::Replace => {
                self.object_classes.clear();
                for value in &values {
                    self.add_object_class(value);
                }
            }
            ModificationType::Increment => {
                return Err(OperationError::new(
                    ResultCode::CONSTRAINT_VIOLATION,
                    "objectClass cannot be incremented",
                ));
            }
        }
        Ok(())
    }
}

fn no_such_attribute(name: &str) -> OperationError {
    OperationError::new(
        ResultCode::NO_SUCH_ATTRIBUTE,
        format!("entry does not contain attribute {}", name),
    )
}

fn parse_integer(value: &[u8]) -> Option<i64> {
    std::str::from_utf8(value).ok()?.trim().parse().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModificationType {
    Add = 0,
    Delete = 1,
    Replace = 2,
    Increment = 3,
}

impl ModificationType {
    /// LDIF keyword (`add`, `delete`, `replace`, `increment`).
    pub fn as_str(self) -> &'static str {
        match self {
            ModificationType::Add => "add",
            ModificationType::Delete => "delete",
            ModificationType::Replace => "replace",
            ModificationType::Increment => "increment",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.to_ascii_lowercase().as_str() {
            "add" => Some(ModificationType::Add),
            "delete" => Some(ModificationType::Delete),
            "replace" => Some(ModificationType::Replace),
            "increment" => Some(ModificationType::Increment),
            _ => None,
        }
    }
}

impl TryFrom<i64> for ModificationType {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ModificationType::Add),
            1 => Ok(ModificationType::Delete),
            2 => Ok(ModificationType::Replace),
            3 => Ok(ModificationType::Increment),
            other => Err(other),
        }
    }
}

impl fmt::Display for ModificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    pub mod_type: ModificationType,
    pub attribute: Attribute,
}

impl Modification {
    pub fn new(mod_type: ModificationType, attribute: Attribute) -> Self {
        Self { mod_type, attribute }
    }
}

/// A parsed LDIF change record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeRecordEntry {
    Add {
        dn: Dn,
        attributes: Vec<Attribute>,
    },
    Delete {
        dn: Dn,
    },
    Modify {
        dn: Dn,
        modifications: Vec<Modification>,
    },
    ModifyDn {
        dn: Dn,
        new_rdn: Rdn,
        delete_old_rdn: bool,
        new_superior: Option<Dn>,
    },
}

impl ChangeRecordEntry {
    pub fn dn(&self) -> &Dn {
        match self {
            ChangeRecordEntry::Add { dn, .. }
            | ChangeRecordEntry::Delete { dn }
            | ChangeRecordEntry::Modify { dn, .. }
            | ChangeRecordEntry::ModifyDn { dn, .. } => dn,
        }
    }

    /// LDIF `changetype` keyword.
    pub fn change_type(&self) -> &'static str {
        match self {
            ChangeRecordEntry::Add { .. } => "add",
            ChangeRecordEntry::Delete { .. } => "delete",
            ChangeRecordEntry::Modify { .. } => "modify",
            ChangeRecordEntry::ModifyDn { .. } => "modrdn",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> Entry {
        let mut entry = Entry::new(Dn::parse("cn=test,dc=example,dc=com").unwrap());
        entry.add_object_class("person");
        entry.add_value("cn", &[], b"test".to_vec(), false);
        entry.add_value("sn", &[], b"User".to_vec(), false);
        entry
    }

    fn modification(mod_type: ModificationType, name: &str, values: &[&str]) -> Modification {
        Modification::new(
            mod_type,
            Attribute::from_values(name, values.iter().map(|v| v.as_bytes().to_vec())),
        )
    }

    #[test]
    fn test_attribute_rejects_duplicate_values() {
        let mut attr = Attribute::new("cn");
        assert!(attr.add(b"Test".to_vec()));
        assert!(!attr.add(b"test".to_vec()));
        assert!(!attr.add(b"  TEST ".to_vec()));
        assert_eq!(attr.len(), 1);
        assert!(attr.remove(b"TEST"));
        assert!(attr.is_empty());
    }

    #[test]
    fn test_octet_string_values_match_exactly() {
        let schema = Schema::core();
        let password = schema.attribute_type_or_default("userPassword");
        let mut e = entry();
        assert!(e.add_typed_value(&password, &[], b"secret".to_vec()));
        assert!(e.add_typed_value(&password, &[], b"SECRET".to_vec()));
        assert!(!e.add_typed_value(&password, &[], b"secret".to_vec()));
        assert!(e.has_value("userPassword", b"SECRET"));
        assert!(!e.has_value("userPassword", b"Secret"));

        let cn = schema.attribute_type_or_default("cn");
        assert!(!e.add_typed_value(&cn, &[], b"TEST".to_vec()));

        let mut removal = Attribute::from_values("userPassword", vec![b"SECRET".to_vec()]);
        removal.set_matching(ValueMatch::Exact);
        e.apply_modification(&Modification::new(ModificationType::Delete, removal)).unwrap();
        assert_eq!(e.values_of("userPassword"), vec![b"secret".as_slice()]);

        let mut pin = Attribute::from_values("pin", vec![b"ab".to_vec()]);
        pin.set_matching(ValueMatch::Exact);
        e.apply_modification(&Modification::new(ModificationType::Add, pin)).unwrap();
        assert!(e.add_value("pin", &[], b"AB".to_vec(), false));
    }

    #[test]
    fn test_attribute_equality_ignores_value_order() {
        let a = Attribute::from_values("cn", vec![b"a".to_vec(), b"b".to_vec()]);
        let b = Attribute::from_values("CN", vec![b"b".to_vec(), b"a".to_vec()]);
        assert_eq!(a, b);
        let c = Attribute::with_options("cn", vec!["lang-fr".to_string()]);
        assert_ne!(Attribute::new("cn"), c);
    }

    #[test]
    fn test_options_create_separate_attributes() {
        let mut entry = entry();
        entry.add_value("cn", &["lang-fr".to_string()], b"essai".to_vec(), false);
        let attrs = entry.get("cn").unwrap();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[1].description(), "cn;lang-fr");
        assert_eq!(entry.values_of("CN").len(), 2);
    }

    #[test]
    fn test_object_class_lookup() {
        let entry = entry();
        assert!(entry.has_attribute("objectClass"));
        assert!(entry.has_value("objectclass", b"PERSON"));
        assert_eq!(entry.values_of("objectClass"), vec![b"person".as_slice()]);
        assert_eq!(entry.attribute_names(), vec!["objectclass", "cn", "sn"]);
    }

    #[test]
    fn test_add_rdn_attributes_if_missing() {
        let schema = Schema::core();
        let mut entry = Entry::new(Dn::parse("uid=jdoe+cn=John,dc=example").unwrap());
        entry.add_value("cn", &[], b"john".to_vec(), false);
        entry.add_rdn_attributes_if_missing(&schema);
        assert_eq!(entry.values_of("uid"), vec![b"jdoe".as_slice()]);
        assert_eq!(entry.values_of("cn").len(), 1);
    }

    #[test]
    fn test_apply_add_and_duplicate() {
        let mut entry = entry();
        entry
            .apply_modification(&modification(ModificationType::Add, "description", &["new value"]))
            .unwrap();
        assert!(entry.has_value("description", b"new value"));
        let err = entry
            .apply_modification(&modification(ModificationType::Add, "description", &["new value"]))
            .unwrap_err();
        assert_eq!(err.result_code, ResultCode::ATTRIBUTE_OR_VALUE_EXISTS);
    }

    #[test]
    fn test_apply_delete() {
        let mut entry = entry();
        entry
            .apply_modification(&modification(ModificationType::Delete, "sn", &["user"]))
            .unwrap();
        assert!(!entry.has_attribute("sn"));
        let err = entry
            .apply_modification(&modification(ModificationType::Delete, "sn", &[]))
            .unwrap_err();
        assert_eq!(err.result_code, ResultCode::NO_SUCH_ATTRIBUTE);
    }

    #[test]
    fn test_apply_replace() {
        let mut entry = entry();
        entry
            .apply_modification(&modification(ModificationType::Replace, "sn", &["Other", "Second"]))
            .unwrap();
        assert_eq!(entry.values_of("sn").len(), 2);
        entry
            .apply_modification(&modification(ModificationType::Replace, "sn", &[]))
            .unwrap();
        assert!(!entry.has_attribute("sn"));
    }

    #[test]
    fn test_apply_increment() {
        let mut entry = entry();
        entry.add_value("uidNumber", &[], b"1000".to_vec(), false);
        entry
            .apply_modification(&modification(ModificationType::Increment, "uidNumber", &["5"]))
            .unwrap();
        assert_eq!(entry.values_of("uidnumber"), vec![b"1005".as_slice()]);
        let err = entry
            .apply_modification(&modification(ModificationType::Increment, "sn", &["1"]))
            .unwrap_err();
        assert_eq!(err.result_code, ResultCode::CONSTRAINT_VIOLATION);
    }

    #[test]
    fn test_object_class_modifications() {
        let mut entry = entry();
        entry
            .apply_modification(&modification(ModificationType::Add, "objectClass", &["extensibleObject"]))
            .unwrap();
        assert!(entry.has_object_class("extensibleobject"));
        entry
            .apply_modification(&modification(ModificationType::Delete, "objectClass", &["extensibleObject"]))
            .unwrap();
        assert!(!entry.has_object_class("extensibleObject"));
    }

    #[test]
    fn test_modification_type_keywords() {
        assert_eq!(ModificationType::from_keyword("REPLACE"), Some(ModificationType::Replace));
        assert_eq!(ModificationType::from_keyword("bogus"), None);
        assert_eq!(ModificationType::try_from(3), Ok(ModificationType::Increment));
        assert_eq!(ModificationType::try_from(9), Err(9));
    }
}
