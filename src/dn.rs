// Distinguished names (RFC 4514): parsing, formatting and normalized comparison

use crate::error::DnError;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// One `type=value` pair of an RDN. The value is kept unescaped, in its
/// original case; `#`-prefixed BER hex values are kept verbatim.
#[derive(Debug, Clone)]
pub struct Ava {
    attr_type: String,
    value: String,
}

impl Ava {
    pub fn new(attr_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attr_type: attr_type.into(),
            value: value.into(),
        }
    }

    pub fn attr_type(&self) -> &str {
        &self.attr_type
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn normalized_type(&self) -> String {
        self.attr_type.to_ascii_lowercase()
    }

    /// Case-folded value with inner whitespace runs compacted to one space.
    pub fn normalized_value(&self) -> String {
        normalize_value(&self.value)
    }

    fn normalized(&self) -> String {
        format!("{}={}", self.normalized_type(), escape_value(&self.normalized_value()))
    }
}

/// Case-fold and compact whitespace the way DN and attribute value
/// comparisons do.
pub fn normalize_value(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl fmt::Display for Ava {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.attr_type, escape_value(&self.value))
    }
}

/// Relative distinguished name: one or more AVAs joined with `+`.
#[derive(Debug, Clone)]
pub struct Rdn {
    avas: Vec<Ava>,
}

impl Rdn {
    pub fn new(attr_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            avas: vec![Ava::new(attr_type, value)],
        }
    }

    pub fn from_avas(avas: Vec<Ava>) -> Result<Self, DnError> {
        if avas.is_empty() {
            return Err(DnError::new("", "an RDN needs at least one attribute value"));
        }
        Ok(Self { avas })
    }

    pub fn parse(s: &str) -> Result<Self, DnError> {
        let mut parser = Parser::new(s);
        parser.skip_spaces();
        let rdn = parser.parse_rdn()?;
        parser.skip_spaces();
        if !parser.at_end() {
            return Err(DnError::new(s, "unexpected characters after the RDN"));
        }
        Ok(rdn)
    }

    pub fn avas(&self) -> &[Ava] {
        &self.avas
    }

    /// First AVA; every RDN has at least one.
    pub fn first(&self) -> &Ava {
        &self.avas[0]
    }

    pub fn normalized(&self) -> String {
        let mut parts: Vec<String> = self.avas.iter().map(Ava::normalized).collect();
        parts.sort();
        parts.join("+")
    }
}

impl fmt::Display for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, ava) in self.avas.iter().enumerate() {
            if i > 0 {
                f.write_str("+")?;
            }
            write!(f, "{}", ava)?;
        }
        Ok(())
    }
}

impl PartialEq for Rdn {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Eq for Rdn {}

impl FromStr for Rdn {
    type Err = DnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Rdn::parse(s)
    }
}

/// Distinguished name. `rdns[0]` is the leaf RDN; the empty DN is the root DSE.
///
/// Equality, ordering and hashing use the normalized form, so
/// `CN=Test, dc=Example` equals `cn=test,dc=example`.
#[derive(Debug, Clone, Default)]
pub struct Dn {
    rdns: Vec<Rdn>,
}

impl Dn {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_rdns(rdns: Vec<Rdn>) -> Self {
        Self { rdns }
    }

    pub fn parse(s: &str) -> Result<Self, DnError> {
        let mut parser = Parser::new(s);
        parser.skip_spaces();
        if parser.at_end() {
            return Ok(Dn::root());
        }
        let mut rdns = Vec::new();
        loop {
            rdns.push(parser.parse_rdn()?);
            parser.skip_spaces();
            match parser.next() {
                None => break,
                Some(',') | Some(';') => {
                    parser.skip_spaces();
                    if parser.at_end() {
                        return Err(DnError::new(s, "empty RDN after separator"));
                    }
                }
                Some(c) => {
                    return Err(DnError::new(s, format!("unexpected character '{}'", c)));
                }
            }
        }
        Ok(Self { rdns })
    }

    pub fn is_root(&self) -> bool {
        self.rdns.is_empty()
    }

    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    pub fn num_components(&self) -> usize {
        self.rdns.len()
    }

    pub fn rdn(&self) -> Option<&Rdn> {
        self.rdns.first()
    }

    pub fn parent(&self) -> Option<Dn> {
        if self.rdns.is_empty() {
            return None;
        }
        Some(Dn {
            rdns: self.rdns[1..].to_vec(),
        })
    }

    pub fn child(&self, rdn: Rdn) -> Dn {
        let mut rdns = Vec::with_capacity(self.rdns.len() + 1);
        rdns.push(rdn);
        rdns.extend(self.rdns.iter().cloned());
        Dn { rdns }
    }

    /// True when `self` equals `base` or lies below it.
    pub fn is_descendant_of(&self, base: &Dn) -> bool {
        if base.rdns.len() > self.rdns.len() {
            return false;
        }
        let offset = self.rdns.len() - base.rdns.len();
        self.rdns[offset..]
            .iter()
            .zip(base.rdns.iter())
            .all(|(a, b)| a == b)
    }

    /// Immediate child of `parent`.
    pub fn is_child_of(&self, parent: &Dn) -> bool {
        self.rdns.len() == parent.rdns.len() + 1 && self.is_descendant_of(parent)
    }

    /// DN after a modify DN operation.
    pub fn rename(&self, new_rdn: Rdn, new_superior: Option<&Dn>) -> Dn {
        let parent = match new_superior {
            Some(sup) => sup.clone(),
            None => self.parent().unwrap_or_default(),
        };
        parent.child(new_rdn)
    }

    pub fn normalized(&self) -> String {
        self.rdns
            .iter()
            .map(Rdn::normalized)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rdn) in self.rdns.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", rdn)?;
        }
        Ok(())
    }
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.rdns == other.rdns
    }
}

impl Eq for Dn {}

impl Hash for Dn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

impl PartialOrd for Dn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Dn {
    fn cmp(&self, other: &Self) -> Ordering {
        self.normalized().cmp(&other.normalized())
    }
}

impl FromStr for Dn {
    type Err = DnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dn::parse(s)
    }
}

/// Escape an attribute value for its RFC 4514 string form.
pub fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, c) in value.chars().enumerate() {
        match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                out.push('\\');
                out.push(c);
            }
            '#' if i == 0 && !is_hex_form(value) => out.push_str("\\#"),
            ' ' if i == 0 || i == last => out.push_str("\\ "),
            '\0' => out.push_str("\\00"),
            _ => out.push(c),
        }
    }
    out
}

fn is_hex_form(value: &str) -> bool {
    value.len() > 1
        && value.starts_with('#')
        && value[1..].len() % 2 == 0
        && value[1..].chars().all(|c| c.is_ascii_hexdigit())
}

struct Parser<'a> {
    input: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> DnError {
        DnError::new(self.input, reason)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_spaces(&mut self) {
        while self.peek() == Some(' ') {
            self.pos += 1;
        }
    }

    fn parse_rdn(&mut self) -> Result<Rdn, DnError> {
        let mut avas = vec![self.parse_ava()?];
        loop {
            self.skip_spaces();
            if self.peek() == Some('+') {
                self.pos += 1;
                self.skip_spaces();
                avas.push(self.parse_ava()?);
            } else {
                break;
            }
        }
        Ok(Rdn { avas })
    }

    fn parse_ava(&mut self) -> Result<Ava, DnError> {
        let attr_type = self.parse_attr_type()?;
        self.skip_spaces();
        if self.next() != Some('=') {
            return Err(self.error(format!("no '=' after attribute type \"{}\"", attr_type)));
        }
        self.skip_spaces();
        let value = match self.peek() {
            Some('#') => self.parse_hex_value()?,
            Some('"') => self.parse_quoted_value()?,
            _ => self.parse_plain_value()?,
        };
        Ok(Ava { attr_type, value })
    }

    fn parse_attr_type(&mut self) -> Result<String, DnError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if start == self.pos {
            return Err(match self.peek() {
                Some(c) => self.error(format!("invalid character '{}' in attribute type", c)),
                None => self.error("missing attribute type"),
            });
        }
        let attr_type: String = self.chars[start..self.pos].iter().collect();
        let first = attr_type.chars().next().unwrap_or('-');
        if !first.is_ascii_alphanumeric() {
            return Err(self.error(format!("attribute type \"{}\" must start with a letter or digit", attr_type)));
        }
        Ok(attr_type)
    }

    fn parse_hex_value(&mut self) -> Result<String, DnError> {
        let start = self.pos;
        self.pos += 1;
        while let Some(c) = self.peek() {
            if c.is_ascii_hexdigit() {
                self.pos += 1;
            } else {
                break;
            }
        }
        let value: String = self.chars[start..self.pos].iter().collect();
        if !is_hex_form(&value) {
            return Err(self.error(format!("invalid hex value \"{}\"", value)));
        }
        Ok(value)
    }

    fn parse_quoted_value(&mut self) -> Result<String, DnError> {
        self.pos += 1;
        let mut bytes = Vec::new();
        loop {
            match self.next() {
                None => return Err(self.error("unterminated quoted value")),
                Some('"') => break,
                Some('\\') => self.parse_escape(&mut bytes)?,
                Some(c) => push_char(&mut bytes, c),
            }
        }
        String::from_utf8(bytes).map_err(|_| self.error("escaped value is not valid UTF-8"))
    }

    fn parse_plain_value(&mut self) -> Result<String, DnError> {
        let mut bytes = Vec::new();
        // Length of `bytes` up to the last escaped or non-space character.
        let mut significant = 0;
        while let Some(c) = self.peek() {
            match c {
                ',' | ';' | '+' => break,
                '\\' => {
                    self.pos += 1;
                    self.parse_escape(&mut bytes)?;
                    significant = bytes.len();
                }
                '"' | '<' | '>' | '=' => {
                    return Err(self.error(format!("unescaped '{}' in attribute value", c)));
                }
                _ => {
                    self.pos += 1;
                    push_char(&mut bytes, c);
                    if c != ' ' {
                        significant = bytes.len();
                    }
                }
            }
        }
        bytes.truncate(significant);
        String::from_utf8(bytes).map_err(|_| self.error("escaped value is not valid UTF-8"))
    }

    fn parse_escape(&mut self, bytes: &mut Vec<u8>) -> Result<(), DnError> {
        let c = self.next().ok_or_else(|| self.error("escape at end of value"))?;
        match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' | '#' | ' ' | '_' => {
                push_char(bytes, c);
                Ok(())
            }
            h if h.is_ascii_hexdigit() => {
                let l = self
                    .next()
                    .filter(|l| l.is_ascii_hexdigit())
                    .ok_or_else(|| self.error("incomplete hex escape"))?;
                let hex: String = [h, l].iter().collect();
                let byte = u8::from_str_radix(&hex, 16)
                    .map_err(|_| self.error(format!("invalid hex escape \\{}", hex)))?;
                bytes.push(byte);
                Ok(())
            }
            other => Err(self.error(format!("invalid escape \\{}", other))),
        }
    }
}

fn push_char(bytes: &mut Vec<u8>, c: char) {
    let mut buf = [0u8; 4];
    bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}
