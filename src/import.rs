// LDIF import: source/sink configuration, inclusion rules, plugin hooks and
// the driver that loads entries into the backend.

use crate::backend::MemoryBackend;
use crate::config::ImportSettings;
use crate::dn::Dn;
use crate::entry::Entry;
use crate::filter::SearchFilter;
use crate::ldif_reader::LdifReader;
use crate::schema::{AttributeType, Schema};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One LDIF input.
pub enum LdifSource {
    File(PathBuf),
    Reader(Box<dyn Read + Send>),
}

impl fmt::Debug for LdifSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LdifSource::File(path) => f.debug_tuple("File").field(path).finish(),
            LdifSource::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

/// Everything an [`LdifReader`] needs to know about one import session.
pub struct ImportConfig {
    sources: VecDeque<LdifSource>,
    reject_writer: Option<Box<dyn Write + Send>>,
    skip_writer: Option<Box<dyn Write + Send>>,
    pub validate_schema: bool,
    pub include_branches: Vec<Dn>,
    pub exclude_branches: Vec<Dn>,
    pub include_filters: Vec<SearchFilter>,
    pub exclude_filters: Vec<SearchFilter>,
    include_attributes: HashSet<String>,
    exclude_attributes: HashSet<String>,
    pub include_object_classes: bool,
    pub invoke_import_plugins: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            sources: VecDeque::new(),
            reject_writer: None,
            skip_writer: None,
            validate_schema: true,
            include_branches: Vec::new(),
            exclude_branches: Vec::new(),
            include_filters: Vec::new(),
            exclude_filters: Vec::new(),
            include_attributes: HashSet::new(),
            exclude_attributes: HashSet::new(),
            include_object_classes: true,
            invoke_import_plugins: true,
        }
    }
}

impl fmt::Debug for ImportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportConfig")
            .field("sources", &self.sources)
            .field("reject_writer", &self.reject_writer.is_some())
            .field("skip_writer", &self.skip_writer.is_some())
            .field("validate_schema", &self.validate_schema)
            .field("include_branches", &self.include_branches)
            .field("exclude_branches", &self.exclude_branches)
            .field("include_filters", &self.include_filters)
            .field("exclude_filters", &self.exclude_filters)
            .field("include_attributes", &self.include_attributes)
            .field("exclude_attributes", &self.exclude_attributes)
            .field("include_object_classes", &self.include_object_classes)
            .field("invoke_import_plugins", &self.invoke_import_plugins)
            .finish()
    }
}

impl ImportConfig {
    pub fn from_paths<P: Into<PathBuf>>(paths: impl IntoIterator<Item = P>) -> Self {
        let mut config = Self::default();
        for path in paths {
            config.add_source(LdifSource::File(path.into()));
        }
        config
    }

    pub fn from_reader(reader: impl Read + Send + 'static) -> Self {
        let mut config = Self::default();
        config.add_source(LdifSource::Reader(Box::new(reader)));
        config
    }

    /// Build a session from the `import:` section of the configuration file.
    pub fn from_settings(settings: &ImportSettings) -> Result<Self> {
        let mut config = Self::from_paths(settings.ldif_files.iter().cloned());
        if let Some(path) = &settings.reject_file {
            config = config
                .with_reject_file(path)
                .with_context(|| format!("Failed to create reject file {}", path.display()))?;
        }
        if let Some(path) = &settings.skip_file {
            config = config
                .with_skip_file(path)
                .with_context(|| format!("Failed to create skip file {}", path.display()))?;
        }
        config.validate_schema = settings.validate_schema;
        config.include_object_classes = settings.include_object_classes;
        config.invoke_import_plugins = settings.invoke_import_plugins;
        config.include_branches = parse_dns(&settings.include_branches)?;
        config.exclude_branches = parse_dns(&settings.exclude_branches)?;
        config.include_filters = parse_filters(&settings.include_filters)?;
        config.exclude_filters = parse_filters(&settings.exclude_filters)?;
        for name in &settings.include_attributes {
            config.include_attribute_named(name);
        }
        for name in &settings.exclude_attributes {
            config.exclude_attribute_named(name);
        }
        Ok(config)
    }

    pub fn add_source(&mut self, source: LdifSource) {
        self.sources.push_back(source);
    }

    pub fn with_reject_writer(mut self, writer: impl Write + Send + 'static) -> Self {
        self.reject_writer = Some(Box::new(writer));
        self
    }

    pub fn with_skip_writer(mut self, writer: impl Write + Send + 'static) -> Self {
        self.skip_writer = Some(Box::new(writer));
        self
    }

    /// Create (or truncate) `path` and write rejected entries there.
    pub fn with_reject_file(self, path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(self.with_reject_writer(BufWriter::new(file)))
    }

    pub fn with_skip_file(self, path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(self.with_skip_writer(BufWriter::new(file)))
    }

    pub fn include_attribute_named(&mut self, name: &str) {
        self.include_attributes.insert(name.to_ascii_lowercase());
    }

    pub fn exclude_attribute_named(&mut self, name: &str) {
        self.exclude_attributes.insert(name.to_ascii_lowercase());
    }

    /// Open the next input, or `None` once every source has been consumed.
    pub(crate) fn next_reader(&mut self) -> io::Result<Option<Box<dyn BufRead + Send>>> {
        let Some(source) = self.sources.pop_front() else {
            return Ok(None);
        };
        Ok(Some(match source {
            LdifSource::File(path) => {
                debug!(path = %path.display(), "opening LDIF source");
                let file = File::open(&path).map_err(|e| {
                    io::Error::new(e.kind(), format!("{}: {}", path.display(), e))
                })?;
                Box::new(BufReader::new(file))
            }
            LdifSource::Reader(reader) => Box::new(BufReader::new(reader)),
        }))
    }

    pub(crate) fn take_reject_writer(&mut self) -> Option<Box<dyn Write + Send>> {
        self.reject_writer.take()
    }

    pub(crate) fn take_skip_writer(&mut self) -> Option<Box<dyn Write + Send>> {
        self.skip_writer.take()
    }

    /// DN-only inclusion check: excluded branches win over included ones.
    pub fn include_entry_dn(&self, dn: &Dn) -> bool {
        if self.exclude_branches.iter().any(|b| dn.is_descendant_of(b)) {
            return false;
        }
        self.include_branches.is_empty() || self.include_branches.iter().any(|b| dn.is_descendant_of(b))
    }

    /// Entry-level inclusion check over the include/exclude filters.
    pub fn include_entry(&self, entry: &Entry) -> bool {
        if self.exclude_filters.iter().any(|f| f.matches(entry)) {
            return false;
        }
        self.include_filters.is_empty() || self.include_filters.iter().any(|f| f.matches(entry))
    }

    pub fn include_attribute(&self, attr_type: &AttributeType) -> bool {
        let names: Vec<String> = std::iter::once(&attr_type.name)
            .chain(attr_type.aliases.iter())
            .map(|n| n.to_ascii_lowercase())
            .collect();
        if names.iter().any(|n| self.exclude_attributes.contains(n)) {
            return false;
        }
        self.include_attributes.is_empty()
            || names.iter().any(|n| self.include_attributes.contains(n))
    }
}

fn parse_dns(values: &[String]) -> Result<Vec<Dn>> {
    values
        .iter()
        .map(|v| Dn::parse(v).with_context(|| format!("Invalid branch DN {}", v)))
        .collect()
}

fn parse_filters(values: &[String]) -> Result<Vec<SearchFilter>> {
    values
        .iter()
        .map(|v| SearchFilter::parse(v).with_context(|| format!("Invalid import filter {}", v)))
        .collect()
}

/// Outcome of an import plugin for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginResult {
    Continue,
    /// Drop the entry; the message, if any, goes to the reject file.
    Reject(Option<String>),
}

/// LDIF import plugin. Entries pass through every hook in order; the first
/// rejection wins.
pub trait ImportEntryHook: Send + Sync {
    fn name(&self) -> &str;

    fn on_import_begin(&self, _config: &ImportConfig) {}

    fn on_entry(&self, entry: &mut Entry) -> PluginResult;

    fn on_import_end(&self) {}
}

/// Rejects entries that carry any of the given attributes, e.g. to keep
/// password hashes out of a test directory.
#[derive(Debug, Clone)]
pub struct RejectAttributesHook {
    attributes: Vec<String>,
}

impl RejectAttributesHook {
    pub fn new<S: Into<String>>(attributes: impl IntoIterator<Item = S>) -> Self {
        Self {
            attributes: attributes.into_iter().map(Into::into).collect(),
        }
    }
}

impl ImportEntryHook for RejectAttributesHook {
    fn name(&self) -> &str {
        "reject-attributes"
    }

    fn on_entry(&self, entry: &mut Entry) -> PluginResult {
        match self.attributes.iter().find(|a| entry.has_attribute(a)) {
            Some(attr) => PluginResult::Reject(Some(format!("attribute {} is not allowed", attr))),
            None => PluginResult::Continue,
        }
    }
}

/// Plugins enabled by the `import:` section.
pub fn configured_plugins(settings: &ImportSettings) -> Vec<Arc<dyn ImportEntryHook>> {
    let mut plugins: Vec<Arc<dyn ImportEntryHook>> = Vec::new();
    if !settings.reject_attributes.is_empty() {
        plugins.push(Arc::new(RejectAttributesHook::new(
            settings.reject_attributes.iter().cloned(),
        )));
    }
    plugins
}

/// End-of-import counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub entries_read: u64,
    pub entries_imported: u64,
    pub entries_ignored: u64,
    pub entries_rejected: u64,
}

/// Read every entry of the configured sources into `backend`. Entries that
/// the reader or the backend refuse are counted and routed to the reject
/// file; an unrecoverable LDIF error aborts the import.
pub fn import_ldif(
    config: ImportConfig,
    schema: Arc<Schema>,
    plugins: Vec<Arc<dyn ImportEntryHook>>,
    backend: &MemoryBackend,
) -> Result<ImportSummary> {
    let check_schema = config.validate_schema;
    let mut reader =
        LdifReader::with_plugins(config, Arc::clone(&schema), plugins).context("Failed to open LDIF source")?;
    let mut imported = 0u64;
    loop {
        match reader.read_entry(check_schema) {
            Ok(Some(mut entry)) => {
                entry.add_rdn_attributes_if_missing(&schema);
                let dn = entry.dn.clone();
                match backend.add(entry) {
                    Ok(()) => imported += 1,
                    Err(e) => {
                        debug!(dn = %dn, error = %e, "backend refused imported entry");
                        reader.reject_last_entry(&format!(
                            "Entry {} could not be added: {}",
                            dn, e.message
                        ));
                    }
                }
            }
            Ok(None) => break,
            Err(e) if e.can_continue_reading() => {
                debug!(error = %e, "skipping rejected LDIF entry");
            }
            Err(e) => {
                if let Err(close_err) = reader.close() {
                    warn!(error = %close_err, "failed to close LDIF reader");
                }
                return Err(e).context("LDIF import aborted");
            }
        }
    }
    reader.close().context("Failed to flush reject and skip files")?;

    let summary = ImportSummary {
        entries_read: reader.entries_read(),
        entries_imported: imported,
        entries_ignored: reader.entries_ignored(),
        entries_rejected: reader.entries_rejected(),
    };
    info!(
        read = summary.entries_read,
        imported = summary.entries_imported,
        ignored = summary.entries_ignored,
        rejected = summary.entries_rejected,
        "LDIF import finished"
    );
    Ok(summary)
}
