// Directory schema: attribute types, object classes, value syntaxes and the
// syntax enforcement policy consulted by the LDIF reader and the backend.

use crate::dn::Dn;
use crate::entry::{Entry, ValueMatch};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Attribute value syntaxes known to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Syntax {
    #[default]
    DirectoryString,
    Ia5String,
    Integer,
    Boolean,
    DistinguishedName,
    OctetString,
    TelephoneNumber,
    GeneralizedTime,
    Oid,
    Certificate,
    JpegPhoto,
    PrintableString,
}

impl Syntax {
    /// Syntaxes whose values must be transferred with the `binary` option.
    pub fn requires_ber_encoding(self) -> bool {
        matches!(self, Syntax::Certificate)
    }

    /// Binary syntaxes and passwords compare byte for byte, string syntaxes
    /// ignore case.
    pub fn value_match(self) -> ValueMatch {
        match self {
            Syntax::OctetString | Syntax::JpegPhoto | Syntax::Certificate => ValueMatch::Exact,
            _ => ValueMatch::CaseIgnore,
        }
    }

    /// Check a raw value against the syntax. The error is a short reason
    /// suitable for a log line or reject comment.
    pub fn value_is_acceptable(self, value: &[u8]) -> Result<(), String> {
        match self {
            Syntax::OctetString | Syntax::JpegPhoto => Ok(()),
            Syntax::Certificate => match value.first() {
                Some(0x30) => Ok(()),
                _ => Err("value is not a BER encoded certificate".to_string()),
            },
            _ => {
                let s = std::str::from_utf8(value)
                    .map_err(|_| "value is not valid UTF-8".to_string())?;
                self.string_is_acceptable(s)
            }
        }
    }

    fn string_is_acceptable(self, s: &str) -> Result<(), String> {
        match self {
            Syntax::DirectoryString => {
                if s.is_empty() {
                    Err("directory string values must not be empty".to_string())
                } else {
                    Ok(())
                }
            }
            Syntax::Ia5String => {
                if s.is_ascii() {
                    Ok(())
                } else {
                    Err(format!("\"{}\" contains non IA5 characters", s))
                }
            }
            Syntax::Integer => {
                let digits = s.strip_prefix('-').unwrap_or(s);
                let valid = !digits.is_empty()
                    && digits.chars().all(|c| c.is_ascii_digit())
                    && !(digits.len() > 1 && digits.starts_with('0'))
                    && s != "-0";
                if valid {
                    Ok(())
                } else {
                    Err(format!("\"{}\" is not a valid integer", s))
                }
            }
            Syntax::Boolean => match s {
                "TRUE" | "FALSE" => Ok(()),
                _ => Err(format!("\"{}\" is not TRUE or FALSE", s)),
            },
            Syntax::DistinguishedName => Dn::parse(s).map(|_| ()).map_err(|e| e.reason),
            Syntax::TelephoneNumber => {
                let valid = s.chars().any(|c| c.is_ascii_digit())
                    && s.chars()
                        .all(|c| c.is_ascii_digit() || " +-().".contains(c));
                if valid {
                    Ok(())
                } else {
                    Err(format!("\"{}\" is not a valid telephone number", s))
                }
            }
            Syntax::GeneralizedTime => {
                let bytes = s.as_bytes();
                let valid = bytes.len() >= 11
                    && bytes[..10].iter().all(u8::is_ascii_digit)
                    && (s.ends_with('Z') || s[10..].contains(|c| c == '+' || c == '-'));
                if valid {
                    Ok(())
                } else {
                    Err(format!("\"{}\" is not a valid generalized time", s))
                }
            }
            Syntax::Oid => {
                let numeric = !s.is_empty()
                    && s.split('.')
                        .all(|arc| !arc.is_empty() && arc.chars().all(|c| c.is_ascii_digit()));
                let descr = s.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
                    && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
                if numeric || descr {
                    Ok(())
                } else {
                    Err(format!("\"{}\" is not a valid OID or descriptor", s))
                }
            }
            Syntax::PrintableString => {
                let valid = !s.is_empty()
                    && s.chars()
                        .all(|c| c.is_ascii_alphanumeric() || " '()+,-./:?=".contains(c));
                if valid {
                    Ok(())
                } else {
                    Err(format!("\"{}\" contains non printable string characters", s))
                }
            }
            Syntax::OctetString | Syntax::JpegPhoto | Syntax::Certificate => Ok(()),
        }
    }
}

/// How strictly attribute values must match their syntax during import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyntaxPolicy {
    Accept,
    Warn,
    #[default]
    Reject,
}

impl fmt::Display for SyntaxPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyntaxPolicy::Accept => f.write_str("accept"),
            SyntaxPolicy::Warn => f.write_str("warn"),
            SyntaxPolicy::Reject => f.write_str("reject"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeType {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub syntax: Syntax,
    #[serde(default)]
    pub single_value: bool,
    #[serde(default)]
    pub operational: bool,
}

impl AttributeType {
    pub fn new(name: &str, syntax: Syntax) -> Self {
        Self {
            name: name.to_string(),
            aliases: Vec::new(),
            syntax,
            single_value: false,
            operational: false,
        }
    }

    pub fn lower_name(&self) -> String {
        self.name.to_ascii_lowercase()
    }

    fn names(&self) -> impl Iterator<Item = &String> {
        std::iter::once(&self.name).chain(self.aliases.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClassKind {
    Abstract,
    #[default]
    Structural,
    Auxiliary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectClass {
    pub name: String,
    #[serde(default)]
    pub superior: Option<String>,
    #[serde(default)]
    pub kind: ObjectClassKind,
    #[serde(default)]
    pub must: Vec<String>,
    #[serde(default)]
    pub may: Vec<String>,
}

/// Name-indexed schema registry. Lookups are case-insensitive and resolve
/// attribute type aliases.
#[derive(Debug, Clone)]
pub struct Schema {
    attribute_types: HashMap<String, Arc<AttributeType>>,
    object_classes: HashMap<String, Arc<ObjectClass>>,
    syntax_policy: SyntaxPolicy,
}

impl Default for Schema {
    fn default() -> Self {
        Self::core()
    }
}

impl Schema {
    /// Empty schema; every lookup falls back to defaults.
    pub fn empty() -> Self {
        Self {
            attribute_types: HashMap::new(),
            object_classes: HashMap::new(),
            syntax_policy: SyntaxPolicy::default(),
        }
    }

    pub fn with_syntax_policy(mut self, policy: SyntaxPolicy) -> Self {
        self.syntax_policy = policy;
        self
    }

    pub fn syntax_policy(&self) -> SyntaxPolicy {
        self.syntax_policy
    }

    pub fn add_attribute_type(&mut self, attr_type: AttributeType) {
        let attr_type = Arc::new(attr_type);
        for name in attr_type.names() {
            self.attribute_types
                .insert(name.to_ascii_lowercase(), attr_type.clone());
        }
    }

    pub fn add_object_class(&mut self, object_class: ObjectClass) {
        self.object_classes.insert(
            object_class.name.to_ascii_lowercase(),
            Arc::new(object_class),
        );
    }

    pub fn attribute_type(&self, name: &str) -> Option<Arc<AttributeType>> {
        self.attribute_types.get(&name.to_ascii_lowercase()).cloned()
    }

    /// Registered type, or a multi-valued directory string user attribute
    /// named after `name`.
    pub fn attribute_type_or_default(&self, name: &str) -> Arc<AttributeType> {
        self.attribute_type(name)
            .unwrap_or_else(|| Arc::new(AttributeType::new(name, Syntax::DirectoryString)))
    }

    pub fn object_class(&self, name: &str) -> Option<Arc<ObjectClass>> {
        self.object_classes.get(&name.to_ascii_lowercase()).cloned()
    }

    /// Registered class, or an auxiliary class without attributes.
    pub fn object_class_or_default(&self, name: &str) -> Arc<ObjectClass> {
        self.object_class(name).unwrap_or_else(|| {
            Arc::new(ObjectClass {
                name: name.to_string(),
                superior: Some("top".to_string()),
                kind: ObjectClassKind::Auxiliary,
                must: Vec::new(),
                may: Vec::new(),
            })
        })
    }

    /// Superior classes of `classes` that are not already listed, in
    /// discovery order.
    pub fn superior_closure<'a>(&self, classes: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let classes: Vec<&str> = classes.into_iter().collect();
        let mut seen: HashSet<String> = classes.iter().map(|c| c.to_ascii_lowercase()).collect();
        let mut missing = Vec::new();
        for class in classes {
            let mut current = self.object_class(class);
            while let Some(oc) = current {
                let Some(sup) = oc.superior.as_deref() else { break };
                let sup_class = self.object_class(sup);
                let sup_name = sup_class
                    .as_ref()
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| sup.to_string());
                if seen.insert(sup_name.to_ascii_lowercase()) {
                    missing.push(sup_name);
                }
                current = sup_class;
            }
        }
        missing
    }

    /// Check that `entry` conforms to its object classes.
    pub fn check_entry(&self, entry: &Entry) -> Result<(), String> {
        let mut classes = Vec::new();
        for name in entry.object_classes.values() {
            match self.object_class(name) {
                Some(oc) => classes.push(oc),
                None => {
                    return Err(format!(
                        "Entry {} has object class {} which is not defined in the schema",
                        entry.dn, name
                    ))
                }
            }
        }
        if !classes.iter().any(|oc| oc.kind == ObjectClassKind::Structural) {
            return Err(format!(
                "Entry {} does not include a structural object class",
                entry.dn
            ));
        }

        // Include the superiors even when the entry does not list them.
        let names: Vec<&str> = entry.object_classes.values().map(String::as_str).collect();
        for sup in self.superior_closure(names) {
            if let Some(oc) = self.object_class(&sup) {
                classes.push(oc);
            }
        }

        let extensible = classes
            .iter()
            .any(|oc| oc.name.eq_ignore_ascii_case("extensibleObject"));
        let mut allowed: HashSet<String> = HashSet::new();
        for oc in &classes {
            for must in &oc.must {
                let attr_type = self.attribute_type_or_default(must);
                if !attr_type.names().any(|n| entry.has_attribute(n)) {
                    return Err(format!(
                        "Entry {} is missing attribute {} required by object class {}",
                        entry.dn, must, oc.name
                    ));
                }
                allowed.extend(attr_type.names().map(|n| n.to_ascii_lowercase()));
            }
            for may in &oc.may {
                let attr_type = self.attribute_type_or_default(may);
                allowed.extend(attr_type.names().map(|n| n.to_ascii_lowercase()));
            }
        }

        for (key, attrs) in &entry.user_attributes {
            if !extensible && !allowed.contains(key) {
                return Err(format!(
                    "Entry {} includes attribute {} which is not allowed by any of its object classes",
                    entry.dn, key
                ));
            }
            let attr_type = self.attribute_type_or_default(key);
            if attr_type.single_value && attrs.iter().any(|a| a.len() > 1) {
                return Err(format!(
                    "Entry {} has multiple values for single-valued attribute {}",
                    entry.dn, attr_type.name
                ));
            }
        }
        Ok(())
    }

    /// Built-in core schema (a practical subset of RFC 4519, RFC 2798 and
    /// RFC 2307 plus the usual operational attributes).
    pub fn core() -> Self {
        use Syntax::*;
        let mut schema = Self::empty();

        let user_types: &[(&str, &[&str], Syntax, bool)] = &[
            ("objectClass", &[], Oid, false),
            ("cn", &["commonName"], DirectoryString, false),
            ("sn", &["surname"], DirectoryString, false),
            ("givenName", &["gn"], DirectoryString, false),
            ("initials", &[], DirectoryString, false),
            ("uid", &["userid"], DirectoryString, false),
            ("mail", &["rfc822Mailbox"], Ia5String, false),
            ("telephoneNumber", &[], TelephoneNumber, false),
            ("mobile", &["mobileTelephoneNumber"], TelephoneNumber, false),
            ("description", &[], DirectoryString, false),
            ("userPassword", &[], OctetString, false),
            ("o", &["organizationName"], DirectoryString, false),
            ("ou", &["organizationalUnitName"], DirectoryString, false),
            ("dc", &["domainComponent"], Ia5String, true),
            ("l", &["localityName"], DirectoryString, false),
            ("st", &["stateOrProvinceName"], DirectoryString, false),
            ("street", &["streetAddress"], DirectoryString, false),
            ("postalAddress", &[], DirectoryString, false),
            ("postalCode", &[], DirectoryString, false),
            ("title", &[], DirectoryString, false),
            ("displayName", &[], DirectoryString, true),
            ("employeeNumber", &[], DirectoryString, true),
            ("employeeType", &[], DirectoryString, false),
            ("departmentNumber", &[], DirectoryString, false),
            ("businessCategory", &[], DirectoryString, false),
            ("roomNumber", &[], DirectoryString, false),
            ("carLicense", &[], DirectoryString, false),
            ("preferredLanguage", &[], DirectoryString, true),
            ("labeledURI", &[], DirectoryString, false),
            ("member", &[], DistinguishedName, false),
            ("uniqueMember", &[], DistinguishedName, false),
            ("owner", &[], DistinguishedName, false),
            ("seeAlso", &[], DistinguishedName, false),
            ("manager", &[], DistinguishedName, false),
            ("secretary", &[], DistinguishedName, false),
            ("uidNumber", &[], Integer, true),
            ("gidNumber", &[], Integer, true),
            ("homeDirectory", &[], Ia5String, true),
            ("loginShell", &[], Ia5String, true),
            ("gecos", &[], Ia5String, true),
            ("memberUid", &[], Ia5String, false),
            ("serialNumber", &[], PrintableString, false),
            ("jpegPhoto", &[], JpegPhoto, false),
            ("userCertificate", &[], Certificate, false),
            ("cACertificate", &[], Certificate, false),
        ];
        for (name, aliases, syntax, single_value) in user_types {
            schema.add_attribute_type(AttributeType {
                name: name.to_string(),
                aliases: aliases.iter().map(|a| a.to_string()).collect(),
                syntax: *syntax,
                single_value: *single_value,
                operational: false,
            });
        }

        let operational_types: &[(&str, Syntax)] = &[
            ("createTimestamp", GeneralizedTime),
            ("modifyTimestamp", GeneralizedTime),
            ("creatorsName", DistinguishedName),
            ("modifiersName", DistinguishedName),
            ("entryUUID", DirectoryString),
            ("entryDN", DistinguishedName),
            ("subschemaSubentry", DistinguishedName),
            ("pwdChangedTime", GeneralizedTime),
        ];
        for (name, syntax) in operational_types {
            schema.add_attribute_type(AttributeType {
                name: name.to_string(),
                aliases: Vec::new(),
                syntax: *syntax,
                single_value: true,
                operational: true,
            });
        }

        let org_may: &[&str] = &[
            "description", "l", "st", "street", "postalAddress", "postalCode",
            "telephoneNumber", "userPassword", "seeAlso", "businessCategory",
        ];
        let classes: &[(&str, Option<&str>, ObjectClassKind, &[&str], &[&str])] = &[
            ("top", None, ObjectClassKind::Abstract, &["objectClass"], &[]),
            (
                "person",
                Some("top"),
                ObjectClassKind::Structural,
                &["sn", "cn"],
                &["userPassword", "telephoneNumber", "seeAlso", "description"],
            ),
            (
                "organizationalPerson",
                Some("person"),
                ObjectClassKind::Structural,
                &[],
                &["title", "ou", "l", "st", "street", "postalAddress", "postalCode"],
            ),
            (
                "inetOrgPerson",
                Some("organizationalPerson"),
                ObjectClassKind::Structural,
                &[],
                &[
                    "businessCategory", "carLicense", "departmentNumber", "displayName",
                    "employeeNumber", "employeeType", "givenName", "initials", "jpegPhoto",
                    "labeledURI", "mail", "manager", "mobile", "o", "preferredLanguage",
                    "roomNumber", "secretary", "uid", "userCertificate",
                ],
            ),
            ("organization", Some("top"), ObjectClassKind::Structural, &["o"], org_may),
            ("organizationalUnit", Some("top"), ObjectClassKind::Structural, &["ou"], org_may),
            (
                "domain",
                Some("top"),
                ObjectClassKind::Structural,
                &["dc"],
                &["description", "l", "o", "st", "street", "telephoneNumber", "seeAlso", "userPassword", "businessCategory"],
            ),
            ("locality", Some("top"), ObjectClassKind::Structural, &[], &["street", "seeAlso", "description", "st", "l"]),
            ("dcObject", Some("top"), ObjectClassKind::Auxiliary, &["dc"], &[]),
            ("uidObject", Some("top"), ObjectClassKind::Auxiliary, &["uid"], &[]),
            ("labeledURIObject", Some("top"), ObjectClassKind::Auxiliary, &[], &["labeledURI"]),
            (
                "groupOfNames",
                Some("top"),
                ObjectClassKind::Structural,
                &["member", "cn"],
                &["businessCategory", "seeAlso", "owner", "ou", "o", "description"],
            ),
            (
                "groupOfUniqueNames",
                Some("top"),
                ObjectClassKind::Structural,
                &["uniqueMember", "cn"],
                &["businessCategory", "seeAlso", "owner", "ou", "o", "description"],
            ),
            (
                "posixAccount",
                Some("top"),
                ObjectClassKind::Auxiliary,
                &["cn", "uid", "uidNumber", "gidNumber", "homeDirectory"],
                &["userPassword", "loginShell", "gecos", "description"],
            ),
            (
                "posixGroup",
                Some("top"),
                ObjectClassKind::Structural,
                &["cn", "gidNumber"],
                &["userPassword", "memberUid", "description"],
            ),
            (
                "device",
                Some("top"),
                ObjectClassKind::Structural,
                &["cn"],
                &["serialNumber", "seeAlso", "owner", "ou", "o", "l", "description"],
            ),
            ("extensibleObject", Some("top"), ObjectClassKind::Auxiliary, &[], &[]),
        ];
        for (name, superior, kind, must, may) in classes {
            schema.add_object_class(ObjectClass {
                name: name.to_string(),
                superior: superior.map(str::to_string),
                kind: *kind,
                must: must.iter().map(|a| a.to_string()).collect(),
                may: may.iter().map(|a| a.to_string()).collect(),
            });
        }
        schema
    }
}
