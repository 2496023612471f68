use crate::dn::{Dn, Rdn};
use crate::entry::{Entry, Modification};
use crate::error::{OperationError, ResultCode};
use crate::filter::SearchFilter;
use crate::ldap_protocol::{PartialAttribute, SearchResultEntry, SearchScope};
use crate::schema::Schema;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace};

/// WhoAmI extended operation (RFC 4532).
pub const WHO_AM_I_OID: &str = "1.3.6.1.4.1.4203.1.11.3";

/// Attribute selector meaning "no attributes".
const NO_ATTRIBUTES: &str = "1.1";

/// Entries found by a search, in DIT order (parents before children).
#[derive(Debug, Default)]
pub struct SearchResults {
    pub entries: Vec<SearchResultEntry>,
    pub size_limit_exceeded: bool,
}

/// Parameters of one search, borrowed from the request.
#[derive(Debug, Clone, Copy)]
pub struct SearchParams<'a> {
    pub base: &'a Dn,
    pub scope: SearchScope,
    pub filter: &'a SearchFilter,
    /// `0` means unlimited.
    pub size_limit: usize,
    pub types_only: bool,
    pub attributes: &'a [String],
}

/// In-memory directory tree keyed by normalized DN.
///
/// An entry may be added when it is one of the configured suffixes or when its
/// parent exists. Without suffixes any DN is accepted.
pub struct MemoryBackend {
    entries: RwLock<BTreeMap<String, Entry>>,
    suffixes: Vec<Dn>,
    schema: Arc<Schema>,
}

impl MemoryBackend {
    pub fn new(suffixes: Vec<Dn>) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            suffixes,
            schema: Arc::new(Schema::core()),
        }
    }

    pub fn with_schema(mut self, schema: Arc<Schema>) -> Self {
        self.schema = schema;
        self
    }

    pub fn suffixes(&self) -> &[Dn] {
        &self.suffixes
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Entry>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Entry>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn contains(&self, dn: &Dn) -> bool {
        self.read().contains_key(&dn.normalized())
    }

    pub fn get(&self, dn: &Dn) -> Option<Entry> {
        self.read().get(&dn.normalized()).cloned()
    }

    /// Every entry, parents before children.
    pub fn entries(&self) -> Vec<Entry> {
        let mut entries: Vec<Entry> = self.read().values().cloned().collect();
        entries.sort_by_key(|e| e.dn.num_components());
        entries
    }

    fn is_suffix(&self, dn: &Dn) -> bool {
        self.suffixes.iter().any(|s| s == dn)
    }

    fn check_parent(&self, entries: &BTreeMap<String, Entry>, dn: &Dn) -> Result<(), OperationError> {
        if self.suffixes.is_empty() || self.is_suffix(dn) {
            return Ok(());
        }
        if !self.suffixes.iter().any(|s| dn.is_descendant_of(s)) {
            return Err(OperationError::new(
                ResultCode::NO_SUCH_OBJECT,
                format!("entry {} does not belong to any suffix of this server", dn),
            ));
        }
        match dn.parent() {
            Some(parent) if entries.contains_key(&parent.normalized()) => Ok(()),
            Some(parent) => Err(OperationError::new(
                ResultCode::NO_SUCH_OBJECT,
                format!("parent entry {} does not exist", parent),
            )),
            None => Err(OperationError::new(
                ResultCode::UNWILLING_TO_PERFORM,
                "the root DSE cannot be added".to_string(),
            )),
        }
    }

    pub fn add(&self, entry: Entry) -> Result<(), OperationError> {
        let key = entry.dn.normalized();
        let mut entries = self.write();
        if entries.contains_key(&key) {
            return Err(OperationError::new(
                ResultCode::ENTRY_ALREADY_EXISTS,
                format!("entry {} already exists", entry.dn),
            ));
        }
        self.check_parent(&entries, &entry.dn)?;
        trace!(dn = %entry.dn, "adding entry");
        entries.insert(key, entry);
        Ok(())
    }

    pub fn delete(&self, dn: &Dn) -> Result<(), OperationError> {
        let key = dn.normalized();
        let mut entries = self.write();
        if !entries.contains_key(&key) {
            return Err(no_such_object(dn));
        }
        if entries.values().any(|e| e.dn.is_child_of(dn)) {
            return Err(OperationError::new(
                ResultCode::NOT_ALLOWED_ON_NON_LEAF,
                format!("entry {} has subordinate entries", dn),
            ));
        }
        entries.remove(&key);
        debug!(dn = %dn, "deleted entry");
        Ok(())
    }

    /// Apply `modifications` atomically: either all of them or none.
    pub fn modify(&self, dn: &Dn, modifications: &[Modification]) -> Result<(), OperationError> {
        let key = dn.normalized();
        let mut entries = self.write();
        let Some(current) = entries.get(&key) else {
            return Err(no_such_object(dn));
        };
        let mut updated = current.clone();
        for modification in modifications {
            updated.apply_modification(modification)?;
        }
        if let Some(rdn) = updated.dn.rdn() {
            for ava in rdn.avas() {
                if !updated.has_value(ava.attr_type(), ava.value().as_bytes()) {
                    return Err(OperationError::new(
                        ResultCode::NOT_ALLOWED_ON_RDN,
                        format!("the modification removes RDN attribute {} of entry {}", ava.attr_type(), dn),
                    ));
                }
            }
        }
        entries.insert(key, updated);
        Ok(())
    }

    /// Rename `dn`, moving its whole subtree along with it.
    pub fn modify_dn(
        &self,
        dn: &Dn,
        new_rdn: Rdn,
        delete_old_rdn: bool,
        new_superior: Option<&Dn>,
    ) -> Result<Dn, OperationError> {
        let mut entries = self.write();
        let Some(mut entry) = entries.get(&dn.normalized()).cloned() else {
            return Err(no_such_object(dn));
        };
        let new_dn = dn.rename(new_rdn, new_superior);
        if new_dn != *dn && entries.contains_key(&new_dn.normalized()) {
            return Err(OperationError::new(
                ResultCode::ENTRY_ALREADY_EXISTS,
                format!("entry {} already exists", new_dn),
            ));
        }
        if new_dn.is_descendant_of(dn) && new_dn != *dn {
            return Err(OperationError::new(
                ResultCode::UNWILLING_TO_PERFORM,
                format!("entry {} cannot be moved below itself", dn),
            ));
        }
        self.check_parent(&entries, &new_dn)?;

        let old_rdn = dn.rdn().cloned();
        entry.dn = new_dn.clone();
        if delete_old_rdn {
            if let Some(old_rdn) = &old_rdn {
                entry.remove_rdn_values(old_rdn);
            }
        }
        entry.add_rdn_attributes_if_missing(&self.schema);

        let depth = dn.num_components();
        let subordinates: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.dn != *dn && e.dn.is_descendant_of(dn))
            .map(|(k, _)| k.clone())
            .collect();
        entries.remove(&dn.normalized());
        for key in subordinates {
            if let Some(mut child) = entries.remove(&key) {
                let relative = child.dn.num_components() - depth;
                let mut rdns = child.dn.rdns()[..relative].to_vec();
                rdns.extend(new_dn.rdns().iter().cloned());
                child.dn = Dn::from_rdns(rdns);
                entries.insert(child.dn.normalized(), child);
            }
        }
        entries.insert(new_dn.normalized(), entry);
        debug!(old = %dn, new = %new_dn, "renamed entry");
        Ok(new_dn)
    }

    /// `Ok(true)` when the entry holds the value.
    pub fn compare(&self, dn: &Dn, attribute: &str, value: &[u8]) -> Result<bool, OperationError> {
        let entries = self.read();
        let Some(entry) = entries.get(&dn.normalized()) else {
            return Err(no_such_object(dn));
        };
        if !entry.has_attribute(attribute) {
            return Err(OperationError::new(
                ResultCode::NO_SUCH_ATTRIBUTE,
                format!("entry {} has no attribute {}", dn, attribute),
            ));
        }
        Ok(entry.has_value(attribute, value))
    }

    pub fn search(&self, params: SearchParams<'_>) -> Result<SearchResults, OperationError> {
        if params.base.is_root() && params.scope == SearchScope::BaseObject {
            let root_dse = self.root_dse();
            let mut results = SearchResults::default();
            if params.filter.matches(&root_dse) {
                results
                    .entries
                    .push(select_attributes(&root_dse, params.attributes, params.types_only));
            }
            return Ok(results);
        }

        let entries = self.read();
        if !params.base.is_root() && !entries.contains_key(&params.base.normalized()) {
            return Err(no_such_object(params.base));
        }
        let mut candidates: Vec<&Entry> = entries
            .values()
            .filter(|e| in_scope(&e.dn, params.base, params.scope))
            .filter(|e| params.filter.matches(e))
            .collect();
        candidates.sort_by_key(|e| e.dn.num_components());

        let mut results = SearchResults::default();
        for entry in candidates {
            if params.size_limit > 0 && results.entries.len() >= params.size_limit {
                results.size_limit_exceeded = true;
                break;
            }
            results
                .entries
                .push(select_attributes(entry, params.attributes, params.types_only));
        }
        trace!(base = %params.base, found = results.entries.len(), "search finished");
        Ok(results)
    }

    /// Server information published at the empty DN.
    fn root_dse(&self) -> Entry {
        let mut entry = Entry::new(Dn::root());
        entry.add_object_class("top");
        entry.add_object_class("extensibleObject");
        for suffix in &self.suffixes {
            entry.add_value("namingContexts", &[], suffix.to_string().into_bytes(), false);
        }
        entry.add_value("supportedLDAPVersion", &[], b"3".to_vec(), false);
        entry.add_value("supportedExtension", &[], WHO_AM_I_OID.as_bytes().to_vec(), false);
        entry
    }
}

fn no_such_object(dn: &Dn) -> OperationError {
    OperationError::new(ResultCode::NO_SUCH_OBJECT, format!("entry {} does not exist", dn))
}

fn in_scope(dn: &Dn, base: &Dn, scope: SearchScope) -> bool {
    match scope {
        SearchScope::BaseObject => dn == base,
        SearchScope::SingleLevel => dn.is_child_of(base),
        SearchScope::WholeSubtree => dn.is_descendant_of(base),
        SearchScope::Subordinates => dn != base && dn.is_descendant_of(base),
    }
}

/// Build the wire form of `entry` with the requested attributes: `*` (or an
/// empty list) for all user attributes, `+` for operational ones, `1.1` for
/// none, or explicit names.
pub fn select_attributes(entry: &Entry, requested: &[String], types_only: bool) -> SearchResultEntry {
    let all_user = requested.is_empty() || requested.iter().any(|a| a == "*");
    let all_operational = requested.iter().any(|a| a == "+");
    let wanted = |name: &str| {
        requested
            .iter()
            .filter(|a| !matches!(a.as_str(), "*" | "+" | NO_ATTRIBUTES))
            .any(|a| a.split(';').next().is_some_and(|base| base.eq_ignore_ascii_case(name)))
    };
    let values = |values: Vec<Vec<u8>>| if types_only { Vec::new() } else { values };

    let mut attributes = Vec::new();
    if !entry.object_classes.is_empty() && (all_user || wanted("objectClass")) {
        attributes.push(PartialAttribute::new(
            "objectClass",
            values(entry.object_classes.values().map(|v| v.as_bytes().to_vec()).collect()),
        ));
    }
    for (map, all) in [
        (&entry.user_attributes, all_user),
        (&entry.operational_attributes, all_operational),
    ] {
        for attrs in map.values() {
            for attr in attrs {
                if all || wanted(attr.name()) {
                    attributes.push(PartialAttribute::new(attr.description(), values(attr.values().to_vec())));
                }
            }
        }
    }
    SearchResultEntry {
        dn: entry.dn.to_string(),
        attributes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Attribute, ModificationType};

    fn dn(s: &str) -> Dn {
        Dn::parse(s).unwrap()
    }

    fn entry(s: &str, classes: &[&str], attrs: &[(&str, &str)]) -> Entry {
        let mut e = Entry::new(dn(s));
        for class in classes {
            e.add_object_class(class);
        }
        for (name, value) in attrs {
            e.add_value(name, &[], value.as_bytes().to_vec(), false);
        }
        e
    }

    fn populated() -> MemoryBackend {
        let backend = MemoryBackend::new(vec![dn("dc=example,dc=com")]);
        backend
            .add(entry("dc=example,dc=com", &["top", "domain"], &[("dc", "example")]))
            .unwrap();
        backend
            .add(entry("ou=People,dc=example,dc=com", &["organizationalUnit"], &[("ou", "People")]))
            .unwrap();
        backend
            .add(entry(
                "uid=jdoe,ou=People,dc=example,dc=com",
                &["inetOrgPerson"],
                &[("uid", "jdoe"), ("cn", "John Doe"), ("sn", "Doe")],
            ))
            .unwrap();
        backend
            .add(entry(
                "uid=asmith,ou=People,dc=example,dc=com",
                &["inetOrgPerson"],
                &[("uid", "asmith"), ("cn", "Alice Smith"), ("sn", "Smith")],
            ))
            .unwrap();
        backend
    }

    fn search(backend: &MemoryBackend, base: &str, scope: SearchScope, filter: &str) -> Vec<String> {
        let base = dn(base);
        let filter = SearchFilter::parse(filter).unwrap();
        backend
            .search(SearchParams {
                base: &base,
                scope,
                filter: &filter,
                size_limit: 0,
                types_only: false,
                attributes: &[],
            })
            .unwrap()
            .entries
            .into_iter()
            .map(|e| e.dn)
            .collect()
    }

    #[test]
    fn test_add_requires_parent() {
        let backend = populated();
        let err = backend
            .add(entry("uid=x,ou=Missing,dc=example,dc=com", &["person"], &[]))
            .unwrap_err();
        assert_eq!(err.result_code, ResultCode::NO_SUCH_OBJECT);
        let err = backend.add(entry("dc=other,dc=org", &["domain"], &[])).unwrap_err();
        assert_eq!(err.result_code, ResultCode::NO_SUCH_OBJECT);
        let err = backend
            .add(entry("UID=JDOE,ou=people,dc=example,dc=com", &["person"], &[]))
            .unwrap_err();
        assert_eq!(err.result_code, ResultCode::ENTRY_ALREADY_EXISTS);
        assert_eq!(backend.len(), 4);
    }

    #[test]
    fn test_without_suffixes_any_dn_is_accepted() {
        let backend = MemoryBackend::new(Vec::new());
        backend.add(entry("cn=orphan,o=nowhere", &["device"], &[])).unwrap();
        assert!(backend.contains(&dn("cn=orphan,o=nowhere")));
    }

    #[test]
    fn test_delete_leaf_only() {
        let backend = populated();
        let err = backend.delete(&dn("ou=People,dc=example,dc=com")).unwrap_err();
        assert_eq!(err.result_code, ResultCode::NOT_ALLOWED_ON_NON_LEAF);
        backend.delete(&dn("uid=jdoe,ou=People,dc=example,dc=com")).unwrap();
        let err = backend.delete(&dn("uid=jdoe,ou=People,dc=example,dc=com")).unwrap_err();
        assert_eq!(err.result_code, ResultCode::NO_SUCH_OBJECT);
    }

    #[test]
    fn test_search_scopes() {
        let backend = populated();
        let base = "ou=People,dc=example,dc=com";
        assert_eq!(search(&backend, base, SearchScope::BaseObject, "(objectClass=*)"), vec![base]);
        assert_eq!(search(&backend, base, SearchScope::SingleLevel, "(objectClass=*)").len(), 2);
        assert_eq!(search(&backend, "dc=example,dc=com", SearchScope::WholeSubtree, "(objectClass=*)").len(), 4);
        assert_eq!(search(&backend, "dc=example,dc=com", SearchScope::Subordinates, "(objectClass=*)").len(), 3);
        assert_eq!(
            search(&backend, "dc=example,dc=com", SearchScope::WholeSubtree, "(uid=asmith)"),
            vec!["uid=asmith,ou=People,dc=example,dc=com"]
        );
        // Parents come first.
        assert_eq!(
            search(&backend, "dc=example,dc=com", SearchScope::WholeSubtree, "(objectClass=*)")[0],
            "dc=example,dc=com"
        );
    }

    #[test]
    fn test_search_missing_base() {
        let backend = populated();
        let base = dn("ou=Nowhere,dc=example,dc=com");
        let filter = SearchFilter::parse("(objectClass=*)").unwrap();
        let err = backend
            .search(SearchParams {
                base: &base,
                scope: SearchScope::WholeSubtree,
                filter: &filter,
                size_limit: 0,
                types_only: false,
                attributes: &[],
            })
            .unwrap_err();
        assert_eq!(err.result_code, ResultCode::NO_SUCH_OBJECT);
    }

    #[test]
    fn test_search_size_limit() {
        let backend = populated();
        let base = dn("dc=example,dc=com");
        let filter = SearchFilter::parse("(objectClass=*)").unwrap();
        let results = backend
            .search(SearchParams {
                base: &base,
                scope: SearchScope::WholeSubtree,
                filter: &filter,
                size_limit: 2,
                types_only: false,
                attributes: &[],
            })
            .unwrap();
        assert_eq!(results.entries.len(), 2);
        assert!(results.size_limit_exceeded);
    }

    #[test]
    fn test_attribute_selection() {
        let mut e = entry("uid=jdoe,dc=example", &["person"], &[("cn", "John"), ("sn", "Doe")]);
        e.add_value("entryUUID", &[], b"1234".to_vec(), true);

        let all = select_attributes(&e, &[], false);
        let names: Vec<&str> = all.attributes.iter().map(|a| a.attr_type.as_str()).collect();
        assert_eq!(names, vec!["objectClass", "cn", "sn"]);

        let selected = select_attributes(&e, &["SN".to_string(), "+".to_string()], true);
        let names: Vec<&str> = selected.attributes.iter().map(|a| a.attr_type.as_str()).collect();
        assert_eq!(names, vec!["sn", "entryUUID"]);
        assert!(selected.attributes.iter().all(|a| a.values.is_empty()));

        let none = select_attributes(&e, &[NO_ATTRIBUTES.to_string()], false);
        assert!(none.attributes.is_empty());
    }

    #[test]
    fn test_root_dse() {
        let backend = populated();
        let root = Dn::root();
        let filter = SearchFilter::parse("(objectClass=*)").unwrap();
        let results = backend
            .search(SearchParams {
                base: &root,
                scope: SearchScope::BaseObject,
                filter: &filter,
                size_limit: 0,
                types_only: false,
                attributes: &[],
            })
            .unwrap();
        assert_eq!(results.entries.len(), 1);
        let naming = results.entries[0]
            .attributes
            .iter()
            .find(|a| a.attr_type == "namingContexts")
            .unwrap();
        assert_eq!(naming.values, vec![b"dc=example,dc=com".to_vec()]);
    }

    #[test]
    fn test_modify_is_atomic() {
        let backend = populated();
        let target = dn("uid=jdoe,ou=People,dc=example,dc=com");
        let mods = vec![
            Modification::new(
                ModificationType::Replace,
                Attribute::from_values("mail", vec![b"jdoe@example.com".to_vec()]),
            ),
            Modification::new(
                ModificationType::Delete,
                Attribute::from_values("description", vec![b"missing".to_vec()]),
            ),
        ];
        let err = backend.modify(&target, &mods).unwrap_err();
        assert_eq!(err.result_code, ResultCode::NO_SUCH_ATTRIBUTE);
        assert!(!backend.get(&target).unwrap().has_attribute("mail"));

        backend.modify(&target, &mods[..1]).unwrap();
        assert!(backend.get(&target).unwrap().has_value("mail", b"jdoe@example.com"));
    }

    #[test]
    fn test_modify_cannot_remove_rdn_value() {
        let backend = populated();
        let target = dn("uid=jdoe,ou=People,dc=example,dc=com");
        let mods = vec![Modification::new(ModificationType::Delete, Attribute::new("uid"))];
        let err = backend.modify(&target, &mods).unwrap_err();
        assert_eq!(err.result_code, ResultCode::NOT_ALLOWED_ON_RDN);
    }

    #[test]
    fn test_modify_dn_moves_subtree() {
        let backend = populated();
        backend
            .add(entry("ou=Staff,dc=example,dc=com", &["organizationalUnit"], &[("ou", "Staff")]))
            .unwrap();
        let new_dn = backend
            .modify_dn(
                &dn("ou=People,dc=example,dc=com"),
                Rdn::parse("ou=Users").unwrap(),
                true,
                Some(&dn("ou=Staff,dc=example,dc=com")),
            )
            .unwrap();
        assert_eq!(new_dn.to_string(), "ou=Users,ou=Staff,dc=example,dc=com");
        let moved = backend.get(&new_dn).unwrap();
        assert!(moved.has_value("ou", b"Users"));
        assert!(!moved.has_value("ou", b"People"));
        assert!(backend.contains(&dn("uid=jdoe,ou=Users,ou=Staff,dc=example,dc=com")));
        assert!(!backend.contains(&dn("uid=jdoe,ou=People,dc=example,dc=com")));
        assert_eq!(backend.len(), 5);
    }

    #[test]
    fn test_modify_dn_conflicts() {
        let backend = populated();
        let err = backend
            .modify_dn(
                &dn("uid=jdoe,ou=People,dc=example,dc=com"),
                Rdn::parse("uid=asmith").unwrap(),
                false,
                None,
            )
            .unwrap_err();
        assert_eq!(err.result_code, ResultCode::ENTRY_ALREADY_EXISTS);
        let err = backend
            .modify_dn(
                &dn("ou=People,dc=example,dc=com"),
                Rdn::parse("ou=Inner").unwrap(),
                false,
                Some(&dn("uid=jdoe,ou=People,dc=example,dc=com")),
            )
            .unwrap_err();
        assert_eq!(err.result_code, ResultCode::UNWILLING_TO_PERFORM);
    }

    #[test]
    fn test_compare() {
        let backend = populated();
        let target = dn("uid=jdoe,ou=People,dc=example,dc=com");
        assert!(backend.compare(&target, "sn", b"Doe").unwrap());
        assert!(backend.compare(&target, "SN", b"doe").unwrap());
        assert!(!backend.compare(&target, "sn", b"Smith").unwrap());
        assert_eq!(
            backend.compare(&target, "mail", b"x").unwrap_err().result_code,
            ResultCode::NO_SUCH_ATTRIBUTE
        );
    }
}
