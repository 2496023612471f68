// LDIF serialization of entries and change records (RFC 2849)

use crate::dn::Dn;
use crate::entry::{Attribute, ChangeRecordEntry, Entry};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::io::{self, Write};

/// Column at which long lines are folded.
pub const DEFAULT_WRAP_COLUMN: usize = 76;

/// Whether `value` can be written as-is after `attr: `. Anything else is
/// base64 encoded.
pub fn is_safe_string(value: &[u8]) -> bool {
    let Some(&first) = value.first() else {
        return true;
    };
    if matches!(first, b' ' | b':' | b'<') {
        return false;
    }
    if value.last() == Some(&b' ') {
        return false;
    }
    value
        .iter()
        .all(|&b| b.is_ascii() && !matches!(b, 0 | b'\n' | b'\r'))
}

pub struct LdifWriter<W: Write> {
    out: W,
    wrap_column: usize,
}

impl<W: Write> LdifWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            wrap_column: DEFAULT_WRAP_COLUMN,
        }
    }

    /// `0` disables folding.
    pub fn with_wrap_column(mut self, wrap_column: usize) -> Self {
        self.wrap_column = wrap_column;
        self
    }

    pub fn write_comment(&mut self, comment: &str) -> io::Result<()> {
        for line in comment.lines() {
            self.write_line(&format!("# {}", line))?;
        }
        Ok(())
    }

    /// Write `entry` followed by a blank line.
    pub fn write_entry(&mut self, entry: &Entry) -> io::Result<()> {
        self.write_dn(&entry.dn)?;
        for class in entry.object_classes.values() {
            self.write_value("objectClass", class.as_bytes())?;
        }
        for attrs in entry
            .user_attributes
            .values()
            .chain(entry.operational_attributes.values())
        {
            for attr in attrs {
                self.write_attribute(attr)?;
            }
        }
        self.out.write_all(b"\n")
    }

    pub fn write_change_record(&mut self, record: &ChangeRecordEntry) -> io::Result<()> {
        self.write_dn(record.dn())?;
        self.write_line(&format!("changetype: {}", record.change_type()))?;
        match record {
            ChangeRecordEntry::Add { attributes, .. } => {
                for attr in attributes {
                    self.write_attribute(attr)?;
                }
            }
            ChangeRecordEntry::Delete { .. } => {}
            ChangeRecordEntry::Modify { modifications, .. } => {
                for modification in modifications {
                    let description = modification.attribute.description();
                    self.write_line(&format!("{}: {}", modification.mod_type, description))?;
                    for value in modification.attribute.values() {
                        self.write_value(&description, value)?;
                    }
                    self.write_line("-")?;
                }
            }
            ChangeRecordEntry::ModifyDn {
                new_rdn,
                delete_old_rdn,
                new_superior,
                ..
            } => {
                self.write_value("newrdn", new_rdn.to_string().as_bytes())?;
                self.write_line(&format!("deleteoldrdn: {}", u8::from(*delete_old_rdn)))?;
                if let Some(new_superior) = new_superior {
                    self.write_value("newsuperior", new_superior.to_string().as_bytes())?;
                }
            }
        }
        self.out.write_all(b"\n")
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_dn(&mut self, dn: &Dn) -> io::Result<()> {
        self.write_value("dn", dn.to_string().as_bytes())
    }

    fn write_attribute(&mut self, attr: &Attribute) -> io::Result<()> {
        let description = attr.description();
        for value in attr.values() {
            self.write_value(&description, value)?;
        }
        Ok(())
    }

    fn write_value(&mut self, description: &str, value: &[u8]) -> io::Result<()> {
        if value.is_empty() {
            return self.write_line(&format!("{}:", description));
        }
        if is_safe_string(value) {
            // Safe strings are ASCII.
            let text = String::from_utf8_lossy(value);
            self.write_line(&format!("{}: {}", description, text))
        } else {
            self.write_line(&format!("{}:: {}", description, BASE64.encode(value)))
        }
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        if self.wrap_column == 0 || line.chars().count() <= self.wrap_column {
            self.out.write_all(line.as_bytes())?;
            return self.out.write_all(b"\n");
        }
        let chars: Vec<char> = line.chars().collect();
        let (first, mut rest) = chars.split_at(self.wrap_column);
        self.out.write_all(first.iter().collect::<String>().as_bytes())?;
        self.out.write_all(b"\n")?;
        // Continuation lines spend one column on the leading space.
        let chunk = self.wrap_column.saturating_sub(1).max(1);
        while !rest.is_empty() {
            let (head, tail) = rest.split_at(chunk.min(rest.len()));
            self.out.write_all(b" ")?;
            self.out.write_all(head.iter().collect::<String>().as_bytes())?;
            self.out.write_all(b"\n")?;
            rest = tail;
        }
        Ok(())
    }
}

/// Render one entry as LDIF text.
pub fn entry_to_ldif(entry: &Entry) -> io::Result<String> {
    let mut writer = LdifWriter::new(Vec::new());
    writer.write_entry(entry)?;
    Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dn::Rdn;
    use crate::entry::{Modification, ModificationType};

    fn sample_entry() -> Entry {
        let mut entry = Entry::new(Dn::parse("cn=test,dc=example,dc=com").unwrap());
        entry.add_object_class("top");
        entry.add_object_class("person");
        entry.add_value("cn", &[], b"test".to_vec(), false);
        entry.add_value("sn", &[], b"User".to_vec(), false);
        entry
    }

    #[test]
    fn test_safe_strings() {
        assert!(is_safe_string(b"plain value"));
        assert!(is_safe_string(b""));
        assert!(!is_safe_string(b" leading space"));
        assert!(!is_safe_string(b":colon"));
        assert!(!is_safe_string(b"<url"));
        assert!(!is_safe_string(b"trailing "));
        assert!(!is_safe_string(b"line\nbreak"));
        assert!(!is_safe_string("caf\u{e9}".as_bytes()));
    }

    #[test]
    fn test_write_entry() {
        let text = entry_to_ldif(&sample_entry()).unwrap();
        assert_eq!(
            text,
            "dn: cn=test,dc=example,dc=com\nobjectClass: person\nobjectClass: top\ncn: test\nsn: User\n\n"
        );
    }

    #[test]
    fn test_unsafe_values_are_base64_encoded() {
        let mut entry = sample_entry();
        entry.add_value("description", &["lang-fr".to_string()], "\u{e9}t\u{e9}".as_bytes().to_vec(), false);
        entry.add_value("seeAlso", &[], Vec::new(), false);
        let text = entry_to_ldif(&entry).unwrap();
        assert!(text.contains("description;lang-fr:: w6l0w6k=\n"));
        assert!(text.contains("seeAlso:\n"));
    }

    #[test]
    fn test_long_lines_are_folded() {
        let mut entry = sample_entry();
        let long = "x".repeat(200);
        entry.add_value("description", &[], long.clone().into_bytes(), false);
        let text = entry_to_ldif(&entry).unwrap();
        for line in text.lines() {
            assert!(line.len() <= DEFAULT_WRAP_COLUMN, "line too long: {}", line);
        }
        let unfolded = text.replace("\n ", "");
        assert!(unfolded.contains(&format!("description: {}\n", long)));
    }

    #[test]
    fn test_write_change_records() {
        let dn = Dn::parse("uid=a,dc=example").unwrap();
        let mut out = LdifWriter::new(Vec::new());
        out.write_change_record(&ChangeRecordEntry::Modify {
            dn: dn.clone(),
            modifications: vec![Modification::new(
                ModificationType::Replace,
                Attribute::from_values("mail", vec![b"a@example.com".to_vec()]),
            )],
        })
        .unwrap();
        out.write_change_record(&ChangeRecordEntry::ModifyDn {
            dn,
            new_rdn: Rdn::parse("uid=b").unwrap(),
            delete_old_rdn: true,
            new_superior: None,
        })
        .unwrap();
        let text = String::from_utf8(out.into_inner()).unwrap();
        assert_eq!(
            text,
            "dn: uid=a,dc=example\nchangetype: modify\nreplace: mail\nmail: a@example.com\n-\n\n\
             dn: uid=a,dc=example\nchangetype: modrdn\nnewrdn: uid=b\ndeleteoldrdn: 1\n\n"
        );
    }
}
