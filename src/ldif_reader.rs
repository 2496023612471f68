//! Streaming LDIF reader.
//!
//! The line assembler merges continuation lines and groups the logical lines
//! of one record; the parser turns a record into an [`Entry`] or a
//! [`ChangeRecordEntry`]. Records that fail are written verbatim to the
//! reject sink under a `# message` comment and counted.
//!
//! `read_entry` and `read_change_record` must be driven from one thread.
//! [`RejectHandle::reject_entry`] may be called from any number of import
//! workers; writes to the reject sink are serialized by a mutex.

use crate::dn::{Dn, Rdn};
use crate::entry::{Attribute, ChangeRecordEntry, Entry, Modification, ModificationType};
use crate::error::{LdifError, LdifReadError};
use crate::import::{ImportConfig, ImportEntryHook, PluginResult};
use crate::ldif_writer::LdifWriter;
use crate::schema::{Schema, SyntaxPolicy};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace, warn};
use url::Url;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const CHANGE_TYPES: &str = "add, delete, modify, moddn, modrdn";

/// A reject or skip destination shared with import workers.
pub type SharedSink = Arc<Mutex<Box<dyn Write + Send>>>;

#[derive(Debug, Default)]
struct ReaderCounters {
    entries_read: AtomicU64,
    entries_ignored: AtomicU64,
    entries_rejected: AtomicU64,
}

/// Clonable, thread-safe access to the reader's reject sink.
#[derive(Clone)]
pub struct RejectHandle {
    counters: Arc<ReaderCounters>,
    sink: Option<SharedSink>,
}

impl RejectHandle {
    /// Count `entry` as rejected and write it, with `message`, to the reject
    /// sink.
    pub fn reject_entry(&self, entry: &Entry, message: &str) {
        self.counters.entries_rejected.fetch_add(1, Ordering::Relaxed);
        let Some(sink) = &self.sink else {
            return;
        };
        let mut guard = match sink.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = write_rejected_entry(&mut **guard, entry, message) {
            warn!(error = %e, dn = %entry.dn, "failed to write to reject sink");
        }
    }
}

fn write_rejected_entry(out: &mut (dyn Write + Send), entry: &Entry, message: &str) -> io::Result<()> {
    if !message.is_empty() {
        writeln!(out, "# {}", message)?;
    }
    LdifWriter::new(&mut *out).write_entry(entry)?;
    out.flush()
}

fn write_record(sink: &SharedSink, lines: &[String], message: &str) {
    let mut guard = match sink.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let result = (|| -> io::Result<()> {
        if !message.is_empty() {
            writeln!(guard, "# {}", message)?;
        }
        for line in lines {
            writeln!(guard, "{}", line)?;
        }
        writeln!(guard)
    })();
    if let Err(e) = result {
        warn!(error = %e, "failed to write LDIF record to sink");
    }
}

/// Split `name;opt1;opt2` into an attribute without values. Attribute types
/// whose syntax needs BER encoding always carry the `binary` option.
pub fn parse_attr_description(attr_descr: &str, schema: &Schema) -> Attribute {
    let mut parts = attr_descr.split(';');
    let name = parts.next().unwrap_or_default();
    let options: Vec<String> = parts.filter(|o| !o.is_empty()).map(str::to_string).collect();
    let mut attr = Attribute::with_options(name, options);
    let syntax = schema.attribute_type_or_default(name).syntax;
    attr.set_matching(syntax.value_match());
    if syntax.requires_ber_encoding() {
        attr.add_option("binary");
    }
    attr
}

fn skip_spaces(line: &str, pos: usize) -> usize {
    let bytes = line.as_bytes();
    let mut pos = pos;
    while pos < bytes.len() && bytes[pos] == b' ' {
        pos += 1;
    }
    pos
}

pub struct LdifReader {
    config: ImportConfig,
    schema: Arc<Schema>,
    plugins: Vec<Arc<dyn ImportEntryHook>>,
    source: Option<Box<dyn BufRead + Send>>,
    line_number: u64,
    last_entry_line_number: u64,
    /// Logical lines of the record being parsed, for reject output.
    last_entry_lines: Vec<String>,
    counters: Arc<ReaderCounters>,
    reject_sink: Option<SharedSink>,
    skip_sink: Option<SharedSink>,
    closed: bool,
}

impl LdifReader {
    pub fn new(config: ImportConfig, schema: Arc<Schema>) -> io::Result<Self> {
        Self::with_plugins(config, schema, Vec::new())
    }

    /// Open the first source and announce the session to the plugins.
    pub fn with_plugins(
        mut config: ImportConfig,
        schema: Arc<Schema>,
        plugins: Vec<Arc<dyn ImportEntryHook>>,
    ) -> io::Result<Self> {
        let source = config.next_reader()?;
        let reject_sink = config
            .take_reject_writer()
            .map(|w| Arc::new(Mutex::new(w)));
        let skip_sink = config.take_skip_writer().map(|w| Arc::new(Mutex::new(w)));
        if config.invoke_import_plugins {
            for plugin in &plugins {
                trace!(plugin = plugin.name(), "import begin");
                plugin.on_import_begin(&config);
            }
        }
        Ok(Self {
            config,
            schema,
            plugins,
            source,
            line_number: 0,
            last_entry_line_number: 0,
            last_entry_lines: Vec::new(),
            counters: Arc::new(ReaderCounters::default()),
            reject_sink,
            skip_sink,
            closed: false,
        })
    }

    /// Entries read so far, including ignored and rejected ones.
    pub fn entries_read(&self) -> u64 {
        self.counters.entries_read.load(Ordering::Relaxed)
    }

    /// Entries skipped by the include/exclude rules.
    pub fn entries_ignored(&self) -> u64 {
        self.counters.entries_ignored.load(Ordering::Relaxed)
    }

    pub fn entries_rejected(&self) -> u64 {
        self.counters.entries_rejected.load(Ordering::Relaxed)
    }

    /// Line number of the first line of the last record read.
    pub fn last_entry_line_number(&self) -> u64 {
        self.last_entry_line_number
    }

    pub fn line_number(&self) -> u64 {
        self.line_number
    }

    pub fn reject_handle(&self) -> RejectHandle {
        RejectHandle {
            counters: self.counters.clone(),
            sink: self.reject_sink.clone(),
        }
    }

    /// Reject the last record returned, e.g. when the backend refuses it.
    pub fn reject_last_entry(&self, message: &str) {
        self.counters.entries_rejected.fetch_add(1, Ordering::Relaxed);
        if let Some(sink) = &self.reject_sink {
            write_record(sink, &self.last_entry_lines, message);
        }
    }

    /// Run the import-end plugin hooks, flush the sinks and release the
    /// source. Later reads return `None`.
    pub fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.source = None;
        if self.config.invoke_import_plugins {
            for plugin in &self.plugins {
                trace!(plugin = plugin.name(), "import end");
                plugin.on_import_end();
            }
        }
        for sink in [&self.reject_sink, &self.skip_sink].into_iter().flatten() {
            let mut guard = match sink.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.flush()?;
        }
        Ok(())
    }

    fn log_to_reject(&self, message: &str) {
        self.counters.entries_rejected.fetch_add(1, Ordering::Relaxed);
        debug!(line = self.last_entry_line_number, "rejecting LDIF record: {}", message);
        if let Some(sink) = &self.reject_sink {
            write_record(sink, &self.last_entry_lines, message);
        }
    }

    fn log_to_skip(&self, message: &str) {
        self.counters.entries_ignored.fetch_add(1, Ordering::Relaxed);
        if let Some(sink) = &self.skip_sink {
            write_record(sink, &self.last_entry_lines, message);
        }
    }

    /// Reject the current record and build the error describing why.
    fn reject(&self, message: String, can_continue_reading: bool) -> LdifError {
        self.log_to_reject(&message);
        LdifError::new(message, self.last_entry_line_number, can_continue_reading)
    }

    /// Read one physical line, without its line terminator. `None` at the end
    /// of the current source.
    fn read_physical_line(&mut self) -> io::Result<Option<String>> {
        let Some(source) = self.source.as_mut() else {
            return Ok(None);
        };
        let mut buf = Vec::new();
        if source.read_until(b'\n', &mut buf)? == 0 {
            return Ok(None);
        }
        self.line_number += 1;
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        let bytes = buf.strip_prefix(UTF8_BOM).unwrap_or(&buf);
        Ok(Some(String::from_utf8_lossy(bytes).into_owned()))
    }

    /// Collect the logical lines of the next record, chaining sources as
    /// each one runs out. `None` once every source is exhausted.
    pub fn read_entry_lines(&mut self) -> Result<Option<Vec<String>>, LdifReadError> {
        let mut lines: Vec<String> = Vec::new();
        loop {
            if self.source.is_none() {
                return Ok(if lines.is_empty() { None } else { Some(lines) });
            }
            let Some(line) = self.read_physical_line()? else {
                if !lines.is_empty() {
                    return Ok(Some(lines));
                }
                self.source = if self.closed {
                    None
                } else {
                    self.config.next_reader()?
                };
                continue;
            };

            if line.is_empty() {
                if lines.is_empty() {
                    continue;
                }
                return Ok(Some(lines));
            }
            if line.starts_with('#') {
                continue;
            }
            if line.starts_with(' ') || line.starts_with('\t') {
                match lines.last_mut() {
                    Some(last) => last.push_str(&line[1..]),
                    None => {
                        let message = format!(
                            "Unable to parse line {} (\"{}\") because it begins with a space but there is no previous line in the entry to continue",
                            self.line_number, line
                        );
                        self.last_entry_line_number = self.line_number;
                        self.last_entry_lines = vec![line];
                        self.log_to_reject(&message);
                        return Err(LdifError::new(message, self.line_number, false).into());
                    }
                }
                continue;
            }
            if lines.is_empty() {
                self.last_entry_line_number = self.line_number;
            }
            lines.push(line);
        }
    }

    /// Read the next entry that passes the inclusion rules and the import
    /// plugins. With `check_schema`, the entry is validated and its missing
    /// superior object classes are added.
    pub fn read_entry(&mut self, check_schema: bool) -> Result<Option<Entry>, LdifReadError> {
        loop {
            let Some(lines) = self.read_entry_lines()? else {
                return Ok(None);
            };
            self.last_entry_lines = lines.clone();
            let mut lines: VecDeque<String> = lines.into();

            let Some(dn) = self.read_dn(&mut lines)? else {
                // A version line on its own.
                continue;
            };
            self.counters.entries_read.fetch_add(1, Ordering::Relaxed);
            if !self.config.include_entry_dn(&dn) {
                debug!(dn = %dn, "skipping entry excluded by the include and exclude branches");
                self.log_to_skip(&format!(
                    "Skipping entry {} because the DN is not one that should be included based on the include and exclude branches",
                    dn
                ));
                continue;
            }

            let mut entry = self.create_entry(dn, &lines, check_schema)?;
            if !self.config.include_entry(&entry) {
                debug!(dn = %entry.dn, "skipping entry excluded by the include and exclude filters");
                self.log_to_skip(&format!(
                    "Skipping entry {} because it does not match the include and exclude filters",
                    entry.dn
                ));
                continue;
            }
            if !self.invoke_import_plugins(&mut entry) {
                continue;
            }
            self.validate_against_schema(check_schema, &mut entry)?;
            return Ok(Some(entry));
        }
    }

    fn create_entry(&mut self, dn: Dn, lines: &VecDeque<String>, check_schema: bool) -> Result<Entry, LdifReadError> {
        let mut entry = Entry::new(dn);
        for line in lines {
            self.read_attribute(line, &mut entry, check_schema)?;
        }
        trace!(dn = %entry.dn, "read entry");
        Ok(entry)
    }

    fn invoke_import_plugins(&self, entry: &mut Entry) -> bool {
        if !self.config.invoke_import_plugins {
            return true;
        }
        for plugin in &self.plugins {
            if let PluginResult::Reject(reason) = plugin.on_entry(entry) {
                let message = match reason {
                    Some(reason) => format!(
                        "Rejecting entry {} because it was rejected by a plugin: {}",
                        entry.dn, reason
                    ),
                    None => format!("Rejecting entry {} because it was rejected by a plugin", entry.dn),
                };
                debug!(plugin = plugin.name(), dn = %entry.dn, "entry rejected by import plugin");
                self.log_to_reject(&message);
                return false;
            }
        }
        true
    }

    fn validate_against_schema(&self, check_schema: bool, entry: &mut Entry) -> Result<(), LdifReadError> {
        if !check_schema {
            return Ok(());
        }
        if let Err(reason) = self.schema.check_entry(entry) {
            let message = format!(
                "Entry {} read from LDIF starting at line {} is not valid because it violates the server's schema configuration: {}",
                entry.dn, self.last_entry_line_number, reason
            );
            return Err(self.reject(message, true).into());
        }
        let superiors = self
            .schema
            .superior_closure(entry.object_classes.values().map(String::as_str));
        for superior in superiors {
            entry.add_object_class(&superior);
        }
        Ok(())
    }

    /// Position of the colon ending the attribute description.
    fn colon_position(&self, line: &str) -> Result<usize, LdifError> {
        match line.find(':') {
            Some(pos) if pos > 0 => Ok(pos),
            _ => Err(self.reject(
                format!(
                    "Unable to parse LDIF entry starting at line {} because line \"{}\" does not include an attribute name",
                    self.last_entry_line_number, line
                ),
                true,
            )),
        }
    }

    /// Pop the DN line, skipping a leading `version:` line. `None` when the
    /// record held nothing but the version line.
    fn read_dn(&mut self, lines: &mut VecDeque<String>) -> Result<Option<Dn>, LdifReadError> {
        loop {
            let Some(line) = lines.pop_front() else {
                return Ok(None);
            };
            let colon_pos = self.colon_position(&line)?;
            let attr_name = line[..colon_pos].to_ascii_lowercase();
            if attr_name == "version" {
                continue;
            }
            if attr_name != "dn" {
                return Err(self
                    .reject(
                        format!(
                            "Unable to parse LDIF entry starting at line {} because the first line does not contain a DN: \"{}\"",
                            self.last_entry_line_number, line
                        ),
                        true,
                    )
                    .into());
            }

            if colon_pos == line.len() - 1 {
                return Ok(Some(Dn::root()));
            }
            let dn_string = if line.as_bytes()[colon_pos + 1] == b':' {
                let pos = skip_spaces(&line, colon_pos + 2);
                self.base64_decode_dn(&line, pos)?
            } else {
                let pos = skip_spaces(&line, colon_pos + 1);
                line[pos..].to_string()
            };
            return match Dn::parse(&dn_string) {
                Ok(dn) => Ok(Some(dn)),
                Err(e) => Err(self
                    .reject(
                        format!(
                            "Unable to parse LDIF entry starting at line {} because line \"{}\" contains an invalid DN: {}",
                            self.last_entry_line_number, line, e
                        ),
                        true,
                    )
                    .with_cause(e)
                    .into()),
            };
        }
    }

    fn base64_decode_dn(&self, line: &str, pos: usize) -> Result<String, LdifError> {
        let decoded = BASE64
            .decode(line[pos..].trim_end())
            .map_err(|e| e.to_string())
            .and_then(|bytes| String::from_utf8(bytes).map_err(|e| e.to_string()));
        decoded.map_err(|e| {
            self.reject(
                format!(
                    "Unable to base64-decode the DN on line \"{}\" of the LDIF entry starting at line {}: {}",
                    line, self.last_entry_line_number, e
                ),
                true,
            )
        })
    }

    /// Decode the value following the colon at `colon_pos`: empty, `::`
    /// base64, `:<` URL, or the literal text.
    fn parse_single_value(&self, line: &str, colon_pos: usize, attr_name: &str, dn: &Dn) -> Result<Vec<u8>, LdifError> {
        let bytes = line.as_bytes();
        if colon_pos == bytes.len() - 1 {
            return Ok(Vec::new());
        }
        match bytes[colon_pos + 1] {
            b':' => {
                let pos = skip_spaces(line, colon_pos + 2);
                BASE64.decode(line[pos..].trim_end()).map_err(|e| {
                    self.reject(
                        format!(
                            "Unable to parse LDIF entry {} starting at line {} because it was not possible to base64-decode the value on line \"{}\": {}",
                            dn, self.last_entry_line_number, line, e
                        ),
                        true,
                    )
                    .with_cause(e)
                })
            }
            b'<' => {
                let pos = skip_spaces(line, colon_pos + 2);
                self.read_url_value(&line[pos..], attr_name, dn)
            }
            _ => {
                let pos = skip_spaces(line, colon_pos + 1);
                Ok(line[pos..].as_bytes().to_vec())
            }
        }
    }

    fn read_url_value(&self, text: &str, attr_name: &str, dn: &Dn) -> Result<Vec<u8>, LdifError> {
        let url = Url::parse(text).map_err(|e| {
            self.reject(
                format!(
                    "Unable to parse LDIF entry {} starting at line {} because the value of attribute {} was to be read from a URL but the URL was invalid: {}",
                    dn, self.last_entry_line_number, attr_name, e
                ),
                true,
            )
            .with_cause(e)
        })?;
        let path = match url.scheme() {
            "file" => url.to_file_path().ok(),
            _ => None,
        };
        let Some(path) = path else {
            return Err(self.reject(
                format!(
                    "Unable to parse LDIF entry {} starting at line {} because the value of attribute {} was to be read from URL {} which is not a local file URL",
                    dn, self.last_entry_line_number, attr_name, url
                ),
                true,
            ));
        };
        std::fs::read(&path).map_err(|e| {
            self.reject(
                format!(
                    "Unable to parse LDIF entry {} starting at line {} because the value of attribute {} was to be read from URL {} but an error occurred while trying to read that content: {}",
                    dn, self.last_entry_line_number, attr_name, url, e
                ),
                true,
            )
            .with_cause(e)
        })
    }

    /// Decode one attribute line of a content or add record into `entry`.
    fn read_attribute(&self, line: &str, entry: &mut Entry, check_schema: bool) -> Result<(), LdifError> {
        let colon_pos = self.colon_position(line)?;
        let attribute = parse_attr_description(&line[..colon_pos], &self.schema);
        let attr_name = attribute.name().to_string();
        let value = self.parse_single_value(line, colon_pos, &attr_name, &entry.dn)?;

        if attr_name.eq_ignore_ascii_case("objectclass") {
            if !self.config.include_object_classes {
                trace!(dn = %entry.dn, "skipping object class excluded by the import configuration");
                return Ok(());
            }
            let class_name = String::from_utf8_lossy(&value).trim().to_string();
            let class = self.schema.object_class_or_default(&class_name);
            if entry.has_object_class(&class.name) || !entry.add_object_class(&class_name) {
                warn!(
                    dn = %entry.dn,
                    line = self.last_entry_line_number,
                    "entry contains duplicate object class {}", class_name
                );
            }
            return Ok(());
        }

        let attr_type = self.schema.attribute_type_or_default(&attr_name);
        if !self.config.include_attribute(&attr_type) {
            trace!(dn = %entry.dn, attribute = %attr_name, "skipping attribute excluded by the import configuration");
            return Ok(());
        }
        if check_schema && !attr_type.syntax.requires_ber_encoding() && attribute.has_option("binary") {
            return Err(self.reject(
                format!(
                    "Unable to parse LDIF entry {} starting at line {} because it has attribute {} with the binary option, which its syntax does not allow",
                    entry.dn, self.last_entry_line_number, attr_name
                ),
                true,
            ));
        }
        let policy = self.schema.syntax_policy();
        if check_schema && policy != SyntaxPolicy::Accept {
            if let Err(reason) = attr_type.syntax.value_is_acceptable(&value) {
                let message = format!(
                    "Entry {} read from LDIF starting at line {} includes value \"{}\" for attribute {} that is invalid according to the associated syntax: {}",
                    entry.dn,
                    self.last_entry_line_number,
                    String::from_utf8_lossy(&value),
                    attr_name,
                    reason
                );
                if policy == SyntaxPolicy::Warn {
                    warn!("{}", message);
                } else {
                    return Err(self.reject(message, true));
                }
            }
        }

        let display_value = String::from_utf8_lossy(&value).into_owned();
        let added = entry.add_typed_value(&attr_type, attribute.options(), value);
        if !added && check_schema {
            return Err(self.reject(
                format!(
                    "Entry {} read from LDIF starting at line {} includes a duplicate attribute {} with value {}",
                    entry.dn, self.last_entry_line_number, attr_name, display_value
                ),
                true,
            ));
        }
        if check_schema && attr_type.single_value {
            let too_many = entry.get(&attr_type.name).is_some_and(|attrs| {
                attrs
                    .iter()
                    .any(|a| a.has_same_options(attribute.options()) && a.len() > 1)
            });
            if too_many {
                return Err(self.reject(
                    format!(
                        "Entry {} read from LDIF starting at line {} includes multiple values for single-valued attribute {}",
                        entry.dn, self.last_entry_line_number, attr_name
                    ),
                    true,
                ));
            }
        }
        Ok(())
    }

    /// Read the next change record. A record without a `changetype` line is
    /// an add when `default_add` is set and an error otherwise.
    pub fn read_change_record(&mut self, default_add: bool) -> Result<Option<ChangeRecordEntry>, LdifReadError> {
        loop {
            let Some(lines) = self.read_entry_lines()? else {
                return Ok(None);
            };
            self.last_entry_lines = lines.clone();
            let mut lines: VecDeque<String> = lines.into();

            let Some(dn) = self.read_dn(&mut lines)? else {
                continue;
            };
            let change_type = self.read_change_type(&mut lines)?;
            let record = match change_type.as_deref() {
                Some("add") => self.parse_add_change_record(dn, &lines)?,
                Some("delete") => self.parse_delete_change_record(dn, &lines)?,
                Some("modify") => self.parse_modify_change_record(dn, lines)?,
                Some("modrdn") | Some("moddn") => self.parse_modify_dn_change_record(dn, lines)?,
                None if default_add => self.parse_add_change_record(dn, &lines)?,
                other => {
                    let message = format!(
                        "Invalid changetype value {}; expected one of {}",
                        other.unwrap_or("(none)"),
                        CHANGE_TYPES
                    );
                    return Err(self.reject(message, false).into());
                }
            };
            return Ok(Some(record));
        }
    }

    /// Pop a leading `changetype` line and return its value.
    fn read_change_type(&self, lines: &mut VecDeque<String>) -> Result<Option<String>, LdifError> {
        let Some(line) = lines.front() else {
            return Ok(None);
        };
        let colon_pos = self.colon_position(line)?;
        if !line[..colon_pos].eq_ignore_ascii_case("changetype") {
            return Ok(None);
        }
        let Some(line) = lines.pop_front() else {
            return Ok(None);
        };
        if colon_pos == line.len() - 1 {
            return Err(self.reject(
                format!("Invalid changetype value (none); expected one of {}", CHANGE_TYPES),
                false,
            ));
        }
        if line.as_bytes()[colon_pos + 1] == b':' {
            let pos = skip_spaces(&line, colon_pos + 2);
            let decoded = BASE64
                .decode(line[pos..].trim_end())
                .map_err(|e| e.to_string())
                .and_then(|bytes| String::from_utf8(bytes).map_err(|e| e.to_string()));
            return decoded.map(Some).map_err(|e| {
                self.reject(
                    format!(
                        "Unable to base64-decode the changetype on line \"{}\" of the LDIF entry starting at line {}: {}",
                        line, self.last_entry_line_number, e
                    ),
                    true,
                )
            });
        }
        let pos = skip_spaces(&line, colon_pos + 1);
        Ok(Some(line[pos..].to_string()))
    }

    fn parse_add_change_record(&self, dn: Dn, lines: &VecDeque<String>) -> Result<ChangeRecordEntry, LdifError> {
        let mut entry = Entry::new(dn);
        for line in lines {
            self.read_attribute(line, &mut entry, self.config.validate_schema)?;
        }
        let mut attributes = Vec::new();
        if !entry.object_classes.is_empty() {
            attributes.push(entry.object_class_attribute());
        }
        let Entry {
            dn,
            user_attributes,
            operational_attributes,
            ..
        } = entry;
        attributes.extend(user_attributes.into_values().flatten());
        attributes.extend(operational_attributes.into_values().flatten());
        Ok(ChangeRecordEntry::Add { dn, attributes })
    }

    fn parse_delete_change_record(&self, dn: Dn, lines: &VecDeque<String>) -> Result<ChangeRecordEntry, LdifError> {
        if !lines.is_empty() {
            return Err(self.reject(
                format!("Delete change record for entry {} must not contain any attributes", dn),
                true,
            ));
        }
        Ok(ChangeRecordEntry::Delete { dn })
    }

    fn parse_modify_change_record(&self, dn: Dn, mut lines: VecDeque<String>) -> Result<ChangeRecordEntry, LdifError> {
        let mut modifications = Vec::new();
        while let Some(line) = lines.pop_front() {
            let operation = self.read_single_value_attribute(&line, &dn, None)?;
            let Some(mod_type) = ModificationType::from_keyword(operation.name()) else {
                return Err(self.reject(
                    format!(
                        "Invalid modify operation {}; expected one of add, delete, replace, increment",
                        operation.name()
                    ),
                    true,
                ));
            };
            let attr_descr = operation
                .values()
                .first()
                .map(|v| String::from_utf8_lossy(v).into_owned())
                .unwrap_or_default();
            let mut attribute = parse_attr_description(&attr_descr, &self.schema);
            while let Some(line) = lines.pop_front() {
                if line == "-" {
                    break;
                }
                let value = self.read_single_value_attribute(&line, &dn, Some(&attr_descr))?;
                for v in value.values() {
                    attribute.add(v.clone());
                }
            }
            modifications.push(Modification::new(mod_type, attribute));
        }
        Ok(ChangeRecordEntry::Modify { dn, modifications })
    }

    fn parse_modify_dn_change_record(&self, dn: Dn, mut lines: VecDeque<String>) -> Result<ChangeRecordEntry, LdifError> {
        let Some(line) = lines.pop_front() else {
            return Err(self.reject(
                format!("Modify DN change record for entry {} does not include a newrdn attribute", dn),
                true,
            ));
        };
        let rdn_string = self.modify_dn_value(&line, &dn, "newrdn")?;
        let new_rdn = Rdn::parse(&rdn_string).map_err(|e| {
            self.reject(
                format!(
                    "Unable to parse LDIF entry starting at line {} because line \"{}\" contains an invalid RDN: {}",
                    self.last_entry_line_number, line, e
                ),
                true,
            )
            .with_cause(e)
        })?;

        let Some(line) = lines.pop_front() else {
            return Err(self.reject(
                format!("Modify DN change record for entry {} does not include a deleteoldrdn attribute", dn),
                true,
            ));
        };
        let delete_old_rdn = self.modify_dn_value(&line, &dn, "deleteoldrdn")?;
        let delete_old_rdn = match delete_old_rdn.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => true,
            "false" | "no" | "0" => false,
            _ => {
                return Err(self.reject(
                    format!(
                        "Invalid value {} for the deleteoldrdn attribute; expected true or false",
                        delete_old_rdn
                    ),
                    true,
                ))
            }
        };

        let new_superior = match lines.pop_front() {
            Some(line) => {
                let value = self.modify_dn_value(&line, &dn, "newsuperior")?;
                Some(Dn::parse(&value).map_err(|e| {
                    self.reject(
                        format!(
                            "Unable to parse LDIF entry starting at line {} because line \"{}\" contains an invalid DN: {}",
                            self.last_entry_line_number, line, e
                        ),
                        true,
                    )
                    .with_cause(e)
                })?)
            }
            None => None,
        };
        Ok(ChangeRecordEntry::ModifyDn {
            dn,
            new_rdn,
            delete_old_rdn,
            new_superior,
        })
    }

    fn modify_dn_value(&self, line: &str, dn: &Dn, attr_name: &str) -> Result<String, LdifError> {
        let attr = self.read_single_value_attribute(line, dn, Some(attr_name))?;
        Ok(attr
            .values()
            .first()
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .unwrap_or_default())
    }

    /// Parse `line` as one attribute value. With `expected`, the line must
    /// name that attribute description.
    fn read_single_value_attribute(&self, line: &str, dn: &Dn, expected: Option<&str>) -> Result<Attribute, LdifError> {
        let colon_pos = self.colon_position(line)?;
        let attr_descr = &line[..colon_pos];
        let mut attribute = parse_attr_description(attr_descr, &self.schema);
        if let Some(expected) = expected {
            let expected_attr = parse_attr_description(expected, &self.schema);
            let same_type = self
                .schema
                .attribute_type_or_default(attribute.name())
                .name
                .eq_ignore_ascii_case(&self.schema.attribute_type_or_default(expected_attr.name()).name);
            if !same_type || !attribute.has_same_options(expected_attr.options()) {
                return Err(self.reject(
                    format!(
                        "Invalid attribute {} in change record for entry {}; expected {}",
                        attr_descr, dn, expected
                    ),
                    false,
                ));
            }
        }
        let value = self.parse_single_value(line, colon_pos, attribute.name(), dn)?;
        attribute.add(value);
        Ok(attribute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::ValueMatch;
    use crate::schema::{AttributeType, Syntax};
    use std::io::Cursor;
    use tempfile::NamedTempFile;

    /// In-memory sink whose contents stay readable after the reader takes
    /// ownership of a clone.
    #[derive(Clone, Default)]
    struct MemorySink(Arc<Mutex<Vec<u8>>>);

    impl MemorySink {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for MemorySink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn reader(ldif: &str) -> LdifReader {
        LdifReader::new(ImportConfig::from_reader(Cursor::new(ldif.to_string())), Arc::new(Schema::core())).unwrap()
    }

    fn reader_with_reject(ldif: &str) -> (LdifReader, MemorySink) {
        let sink = MemorySink::default();
        let config = ImportConfig::from_reader(Cursor::new(ldif.to_string())).with_reject_writer(sink.clone());
        (LdifReader::new(config, Arc::new(Schema::core())).unwrap(), sink)
    }

    fn values(entry: &Entry, name: &str) -> Vec<String> {
        entry
            .values_of(name)
            .into_iter()
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .collect()
    }

    #[test]
    fn test_read_simple_entry() {
        let mut r = reader("dn: cn=test,dc=example,dc=com\nobjectClass: person\ncn: test\nsn: User\n\n");
        let entry = r.read_entry(false).unwrap().unwrap();
        assert_eq!(entry.dn.to_string(), "cn=test,dc=example,dc=com");
        assert_eq!(entry.object_classes.values().collect::<Vec<_>>(), vec!["person"]);
        assert_eq!(entry.user_attributes.len(), 2);
        assert_eq!(values(&entry, "cn"), vec!["test"]);
        assert_eq!(values(&entry, "sn"), vec!["User"]);
        assert!(r.read_entry(false).unwrap().is_none());
        assert_eq!(r.entries_read(), 1);
    }

    #[test]
    fn test_read_modify_change_record() {
        let mut r = reader(
            "dn: cn=test,dc=example,dc=com\nchangetype: modify\nadd: description\ndescription: new value\n-\n\n",
        );
        match r.read_change_record(false).unwrap().unwrap() {
            ChangeRecordEntry::Modify { dn, modifications } => {
                assert_eq!(dn.to_string(), "cn=test,dc=example,dc=com");
                assert_eq!(modifications.len(), 1);
                assert_eq!(modifications[0].mod_type, ModificationType::Add);
                assert_eq!(modifications[0].attribute.name(), "description");
                assert_eq!(modifications[0].attribute.values(), &[b"new value".to_vec()]);
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_continuation_lines_join() {
        let one = "dn: cn=test,dc=example,dc=com\ndescription: a long folded value\n\n";
        let folded = "dn: cn=test,dc=exa\n mple,dc=com\ndescription: a lo\n ng fol\n\tded value\n\n";
        let a = reader(one).read_entry(false).unwrap().unwrap();
        let b = reader(folded).read_entry(false).unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(values(&b, "description"), vec!["a long folded value"]);
    }

    #[test]
    fn test_leading_space_without_previous_line_is_fatal() {
        let (mut r, sink) = reader_with_reject("\n continued\ndn: cn=x\n\n");
        let err = r.read_entry(false).unwrap_err();
        assert!(!err.can_continue_reading());
        assert!(err.to_string().contains("begins with a space"));
        match err {
            LdifReadError::Format(e) => assert_eq!(e.line_number, 2),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(r.entries_rejected(), 1);
        assert!(sink.contents().starts_with("# Unable to parse line 2"));
    }

    #[test]
    fn test_bom_comments_and_blank_lines() {
        let ldif = "\u{feff}# exported\n\n\n\u{feff}dn: cn=test,dc=example,dc=com\n# inline comment\ncn: test\n\n\n";
        let mut r = reader(ldif);
        let entry = r.read_entry(false).unwrap().unwrap();
        assert_eq!(values(&entry, "cn"), vec!["test"]);
        assert_eq!(r.last_entry_line_number(), 4);
        assert!(r.read_entry(false).unwrap().is_none());
    }

    #[test]
    fn test_version_line_is_skipped() {
        let mut r = reader("version: 1\n\ndn: cn=a,dc=example\ncn: a\n\nversion: 1\ndn: cn=b,dc=example\ncn: b\n");
        assert_eq!(r.read_entry(false).unwrap().unwrap().dn.to_string(), "cn=a,dc=example");
        assert_eq!(r.read_entry(false).unwrap().unwrap().dn.to_string(), "cn=b,dc=example");
        assert_eq!(r.entries_read(), 2);
    }

    #[test]
    fn test_sources_are_chained() {
        let mut config = ImportConfig::from_reader(Cursor::new("dn: cn=a,dc=example\ncn: a\n"));
        config.add_source(crate::import::LdifSource::Reader(Box::new(Cursor::new(""))));
        config.add_source(crate::import::LdifSource::Reader(Box::new(Cursor::new(
            "\ndn: cn=b,dc=example\ncn: b\n\n",
        ))));
        let mut r = LdifReader::new(config, Arc::new(Schema::core())).unwrap();
        let dns: Vec<String> = std::iter::from_fn(|| r.read_entry(false).unwrap())
            .map(|e| e.dn.to_string())
            .collect();
        assert_eq!(dns, vec!["cn=a,dc=example", "cn=b,dc=example"]);
    }

    #[test]
    fn test_value_encodings() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"from a file").unwrap();
        let url = Url::from_file_path(file.path()).unwrap();
        let ldif = format!(
            "dn:: Y249dGVzdCxkYz1leGFtcGxlLGRjPWNvbQ==\ncn: test\ndescription:: aMOpbGxv\nseeAlso:\nstreet:<   {}\n\n",
            url
        );
        let entry = reader(&ldif).read_entry(false).unwrap().unwrap();
        assert_eq!(entry.dn.to_string(), "cn=test,dc=example,dc=com");
        assert_eq!(values(&entry, "description"), vec!["h\u{e9}llo"]);
        assert_eq!(entry.values_of("seeAlso"), vec![b"".as_slice()]);
        assert_eq!(values(&entry, "street"), vec!["from a file"]);
    }

    #[test]
    fn test_root_dn() {
        let entry = reader("dn:\nobjectClass: top\n\n").read_entry(false).unwrap().unwrap();
        assert!(entry.dn.is_root());
    }

    #[test]
    fn test_bad_base64_is_rejected_and_reading_continues() {
        let ldif = "dn: cn=bad,dc=example\ncn: bad\ndescription:: !!!notbase64\n\ndn: cn=good,dc=example\ncn: good\n\n";
        let (mut r, sink) = reader_with_reject(ldif);
        let err = r.read_entry(false).unwrap_err();
        assert!(err.can_continue_reading());
        match &err {
            LdifReadError::Format(e) => assert_eq!(e.line_number, 1),
            other => panic!("unexpected error {:?}", other),
        }
        assert!(err.to_string().contains("base64-decode"));
        let next = r.read_entry(false).unwrap().unwrap();
        assert_eq!(next.dn.to_string(), "cn=good,dc=example");
        assert_eq!(r.entries_rejected(), 1);

        let rejected = sink.contents();
        assert!(rejected.starts_with("# "));
        assert!(rejected.ends_with("dn: cn=bad,dc=example\ncn: bad\ndescription:: !!!notbase64\n\n"));
    }

    #[test]
    fn test_missing_url_file_rejects_only_that_entry() {
        let ldif = "dn: cn=x,dc=example\ncn: x\ndescription:< file:///tmp/x-does-not-exist-ldif\n\ndn: cn=y,dc=example\ncn: y\n\n";
        let (mut r, sink) = reader_with_reject(ldif);
        let err = r.read_entry(false).unwrap_err();
        assert!(err.can_continue_reading());
        assert!(err.to_string().contains("error occurred while trying to read"));
        assert_eq!(r.read_entry(false).unwrap().unwrap().dn.to_string(), "cn=y,dc=example");
        assert!(sink.contents().contains("description:< file:///tmp/x-does-not-exist-ldif\n"));
    }

    #[test]
    fn test_first_line_must_be_dn() {
        let (mut r, _) = reader_with_reject("cn: x\n\n");
        let err = r.read_entry(false).unwrap_err();
        assert!(err.to_string().contains("does not contain a DN"));
        assert!(err.can_continue_reading());
    }

    #[test]
    fn test_options_make_distinct_attributes() {
        let ldif = "dn: cn=test,dc=example\ncn: test\ncn;lang-fr: essai\ncn;lang-fr: autre\n\n";
        let entry = reader(ldif).read_entry(false).unwrap().unwrap();
        let attrs = entry.get("cn").unwrap();
        assert_eq!(attrs.len(), 2);
        assert!(attrs[1].has_option("lang-fr"));
        assert_eq!(attrs[1].len(), 2);
    }

    #[test]
    fn test_duplicate_values_only_fail_with_schema_checking() {
        let ldif = "dn: cn=test,dc=example\nobjectClass: person\ncn: test\nsn: a\nsn: a\n\n";
        let entry = reader(ldif).read_entry(false).unwrap().unwrap();
        assert_eq!(values(&entry, "sn"), vec!["a"]);
        let err = reader(ldif).read_entry(true).unwrap_err();
        assert!(err.to_string().contains("duplicate attribute sn"));
    }

    #[test]
    fn test_password_values_differing_in_case_are_distinct() {
        let ldif = "dn: cn=t,dc=example\nobjectClass: person\ncn: t\nsn: t\nuserPassword: secret\nuserPassword: SECRET\n\n";
        for check_schema in [false, true] {
            let entry = reader(ldif).read_entry(check_schema).unwrap().unwrap();
            assert_eq!(values(&entry, "userPassword"), vec!["secret", "SECRET"]);
        }
        let exact = "dn: cn=t,dc=example\nobjectClass: person\ncn: t\nsn: t\nuserPassword: secret\nuserPassword: secret\n\n";
        let err = reader(exact).read_entry(true).unwrap_err();
        assert!(err.to_string().contains("duplicate attribute userPassword"));
    }

    #[test]
    fn test_rdn_values_are_not_added_by_the_reader() {
        let entry = reader("dn: cn=t,dc=example\nsn: x\n\n").read_entry(false).unwrap().unwrap();
        assert_eq!(entry.attribute_names(), vec!["sn"]);
        let err = reader("dn: cn=t,dc=example\nobjectClass: person\nsn: x\n\n")
            .read_entry(true)
            .unwrap_err();
        assert!(err.to_string().contains("violates the server's schema"));
    }

    #[test]
    fn test_duplicate_object_class_is_tolerated() {
        let ldif = "dn: cn=test,dc=example\nobjectClass: person\nobjectClass: Person\ncn: test\nsn: a\n\n";
        let entry = reader(ldif).read_entry(true).unwrap().unwrap();
        assert!(entry.has_object_class("person"));
        // Superior classes are materialized.
        assert!(entry.has_object_class("top"));
    }

    #[test]
    fn test_single_valued_attribute() {
        let mut schema = Schema::core();
        let mut attr = AttributeType::new("employeeNumber", Syntax::DirectoryString);
        attr.single_value = true;
        schema.add_attribute_type(attr);
        let ldif = "dn: cn=test,dc=example\nobjectClass: extensibleObject\nobjectClass: person\ncn: test\nsn: a\nemployeeNumber: 1\nemployeeNumber: 2\n\n";
        let mut r = LdifReader::new(ImportConfig::from_reader(Cursor::new(ldif)), Arc::new(schema)).unwrap();
        let err = r.read_entry(true).unwrap_err();
        assert!(err.to_string().contains("single-valued attribute employeeNumber"));
    }

    #[test]
    fn test_syntax_policy_levels() {
        let ldif = "dn: cn=test,dc=example\nobjectClass: extensibleObject\nobjectClass: person\ncn: test\nsn: a\nuidNumber: not-a-number\n\n";
        for (policy, accepted) in [
            (SyntaxPolicy::Accept, true),
            (SyntaxPolicy::Warn, true),
            (SyntaxPolicy::Reject, false),
        ] {
            let schema = Arc::new(Schema::core().with_syntax_policy(policy));
            let mut r = LdifReader::new(ImportConfig::from_reader(Cursor::new(ldif)), schema).unwrap();
            let result = r.read_entry(true);
            assert_eq!(result.is_ok(), accepted, "policy {}", policy);
            if accepted {
                let entry = result.unwrap().unwrap();
                assert_eq!(values(&entry, "uidNumber"), vec!["not-a-number"]);
            }
        }
    }

    #[test]
    fn test_schema_violation_is_rejected() {
        let (mut r, sink) = reader_with_reject("dn: cn=test,dc=example\nobjectClass: person\ncn: test\n\n");
        let err = r.read_entry(true).unwrap_err();
        assert!(err.to_string().contains("violates the server's schema"));
        assert!(sink.contents().contains("objectClass: person\n"));
    }

    #[test]
    fn test_skipped_entries_go_to_skip_sink() {
        let skip = MemorySink::default();
        let mut config = ImportConfig::from_reader(Cursor::new(
            "dn: cn=a,ou=Hidden,dc=example\ncn: a\n\ndn: cn=b,dc=example\ncn: b\n\n",
        ))
        .with_skip_writer(skip.clone());
        config.exclude_branches = vec![Dn::parse("ou=hidden,dc=example").unwrap()];
        let mut r = LdifReader::new(config, Arc::new(Schema::core())).unwrap();
        assert_eq!(r.read_entry(false).unwrap().unwrap().dn.to_string(), "cn=b,dc=example");
        assert_eq!(r.entries_read(), 2);
        assert_eq!(r.entries_ignored(), 1);
        let skipped = skip.contents();
        assert!(skipped.starts_with("# Skipping entry cn=a,ou=Hidden,dc=example"));
        assert!(skipped.contains("dn: cn=a,ou=Hidden,dc=example\ncn: a\n\n"));
    }

    #[test]
    fn test_excluded_attributes_and_object_classes() {
        let mut config = ImportConfig::from_reader(Cursor::new(
            "dn: cn=a,dc=example\nobjectClass: person\ncn: a\nsn: a\ndescription: gone\n\n",
        ));
        config.exclude_attribute_named("description");
        config.include_object_classes = false;
        let entry = LdifReader::new(config, Arc::new(Schema::core()))
            .unwrap()
            .read_entry(false)
            .unwrap()
            .unwrap();
        assert!(!entry.has_attribute("description"));
        assert!(entry.object_classes.is_empty());
    }

    #[test]
    fn test_binary_option_requires_binary_syntax() {
        let ldif = "dn: cn=a,dc=example\nobjectClass: person\ncn: a\nsn: a\ndescription;binary: x\n\n";
        assert!(reader(ldif).read_entry(false).is_ok());
        let err = reader(ldif).read_entry(true).unwrap_err();
        assert!(err.to_string().contains("binary option"));
    }

    #[test]
    fn test_parse_attr_description() {
        let schema = Schema::core();
        let attr = parse_attr_description("cn;lang-fr;;phonetic", &schema);
        assert_eq!(attr.name(), "cn");
        assert_eq!(attr.options(), &["lang-fr".to_string(), "phonetic".to_string()]);
        assert_eq!(attr.matching(), ValueMatch::CaseIgnore);
        let cert = parse_attr_description("userCertificate", &schema);
        assert!(cert.has_option("binary"));
        assert_eq!(cert.matching(), ValueMatch::Exact);
    }

    #[test]
    fn test_change_records() {
        let ldif = "\
dn: cn=new,dc=example
objectClass: person
cn: new
sn: n

dn: cn=old,dc=example
changetype: delete

dn: cn=old,dc=example
changetype: moddn
newrdn: cn=renamed
deleteoldrdn: yes
newsuperior: ou=moved,dc=example

dn: cn=x,dc=example
changetype:: bW9kcmRu
newrdn: cn=y
deleteoldrdn: FALSE

dn: cn=x,dc=example
changetype: modify
replace: sn
sn: a
sn: b
-
delete: description
-
";
        let mut r = reader(ldif);
        match r.read_change_record(true).unwrap().unwrap() {
            ChangeRecordEntry::Add { attributes, .. } => {
                assert_eq!(attributes[0].name(), "objectClass");
                assert_eq!(attributes.len(), 3);
            }
            other => panic!("unexpected record {:?}", other),
        }
        assert!(matches!(r.read_change_record(false).unwrap(), Some(ChangeRecordEntry::Delete { .. })));
        match r.read_change_record(false).unwrap().unwrap() {
            ChangeRecordEntry::ModifyDn {
                new_rdn,
                delete_old_rdn,
                new_superior,
                ..
            } => {
                assert_eq!(new_rdn, Rdn::parse("cn=renamed").unwrap());
                assert!(delete_old_rdn);
                assert_eq!(new_superior, Some(Dn::parse("ou=moved,dc=example").unwrap()));
            }
            other => panic!("unexpected record {:?}", other),
        }
        match r.read_change_record(false).unwrap().unwrap() {
            ChangeRecordEntry::ModifyDn {
                delete_old_rdn,
                new_superior,
                ..
            } => {
                assert!(!delete_old_rdn);
                assert!(new_superior.is_none());
            }
            other => panic!("unexpected record {:?}", other),
        }
        match r.read_change_record(false).unwrap().unwrap() {
            ChangeRecordEntry::Modify { modifications, .. } => {
                assert_eq!(modifications.len(), 2);
                assert_eq!(modifications[0].mod_type, ModificationType::Replace);
                assert_eq!(modifications[0].attribute.len(), 2);
                assert_eq!(modifications[1].mod_type, ModificationType::Delete);
                assert!(modifications[1].attribute.is_empty());
            }
            other => panic!("unexpected record {:?}", other),
        }
        assert!(r.read_change_record(false).unwrap().is_none());
    }

    #[test]
    fn test_change_record_errors() {
        let missing = reader("dn: cn=a,dc=example\ncn: a\n\n").read_change_record(false).unwrap_err();
        assert!(missing.to_string().contains("add, delete, modify, moddn, modrdn"));
        assert!(!missing.can_continue_reading());

        let unknown = reader("dn: cn=a,dc=example\nchangetype: rename\n\n").read_change_record(false).unwrap_err();
        assert!(unknown.to_string().contains("Invalid changetype value rename"));

        let delete = reader("dn: cn=a,dc=example\nchangetype: delete\ncn: a\n\n").read_change_record(false).unwrap_err();
        assert!(delete.to_string().contains("must not contain any attributes"));

        let wrong_attr = reader("dn: cn=a,dc=example\nchangetype: modify\nadd: mail\ncn: a\n-\n\n")
            .read_change_record(false)
            .unwrap_err();
        assert!(wrong_attr.to_string().contains("expected mail"));

        let no_delete_old = reader("dn: cn=a,dc=example\nchangetype: modrdn\nnewrdn: cn=b\n\n")
            .read_change_record(false)
            .unwrap_err();
        assert!(no_delete_old.to_string().contains("deleteoldrdn"));

        let bad_flag = reader("dn: cn=a,dc=example\nchangetype: modrdn\nnewrdn: cn=b\ndeleteoldrdn: maybe\n\n")
            .read_change_record(false)
            .unwrap_err();
        assert!(bad_flag.to_string().contains("Invalid value maybe"));
    }

    #[test]
    fn test_reject_last_entry_writes_record() {
        let (mut r, sink) = reader_with_reject("dn: cn=a,dc=example\ncn: a\n\n");
        r.read_entry(false).unwrap().unwrap();
        r.reject_last_entry("entry already exists");
        assert_eq!(r.entries_rejected(), 1);
        assert_eq!(sink.contents(), "# entry already exists\ndn: cn=a,dc=example\ncn: a\n\n");
    }

    #[test]
    fn test_reject_entry_from_many_threads() {
        let (r, sink) = reader_with_reject("");
        let handle = r.reject_handle();
        let workers: Vec<_> = (0..8)
            .map(|i| {
                let handle = handle.clone();
                std::thread::spawn(move || {
                    for j in 0..25 {
                        let mut entry = Entry::new(Dn::parse(&format!("cn=w{}e{},dc=example", i, j)).unwrap());
                        entry.add_value("cn", &[], format!("w{}e{}", i, j).into_bytes(), false);
                        handle.reject_entry(&entry, "refused by backend");
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(r.entries_rejected(), 200);
        // Every record arrives whole: comment, dn, value, blank line.
        let contents = sink.contents();
        let records: Vec<&str> = contents.split("\n\n").filter(|s| !s.is_empty()).collect();
        assert_eq!(records.len(), 200);
        for record in records {
            let lines: Vec<&str> = record.lines().collect();
            assert_eq!(lines.len(), 3, "interleaved record: {:?}", record);
            assert_eq!(lines[0], "# refused by backend");
            assert!(lines[1].starts_with("dn: cn=w"));
        }
    }

    #[test]
    fn test_writer_output_reads_back_equal() {
        let ldif = "dn: cn=test,dc=example,dc=com\nobjectClass: person\nobjectClass: top\ncn: test\ncn;lang-fr: essai\nsn: User\ndescription:: w6l0w6k=\ndescription: trailing \n\n";
        let first = reader(ldif).read_entry(false).unwrap().unwrap();
        let written = crate::ldif_writer::entry_to_ldif(&first).unwrap();
        let second = reader(&written).read_entry(false).unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_close_runs_end_hooks() {
        struct Counting(Arc<AtomicU64>);
        impl ImportEntryHook for Counting {
            fn name(&self) -> &str {
                "counting"
            }
            fn on_import_begin(&self, _config: &ImportConfig) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
            fn on_entry(&self, _entry: &mut Entry) -> PluginResult {
                PluginResult::Continue
            }
            fn on_import_end(&self) {
                self.0.fetch_add(10, Ordering::SeqCst);
            }
        }
        let calls = Arc::new(AtomicU64::new(0));
        let plugins: Vec<Arc<dyn ImportEntryHook>> = vec![Arc::new(Counting(calls.clone()))];
        let mut r = LdifReader::with_plugins(
            ImportConfig::from_reader(Cursor::new("dn: cn=a\ncn: a\n")),
            Arc::new(Schema::core()),
            plugins,
        )
        .unwrap();
        r.close().unwrap();
        r.close().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 11);
        assert!(r.read_entry(false).unwrap().is_none());
    }
}
