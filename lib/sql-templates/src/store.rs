//! The template store: loads template documents, indexes them by full and
//! short key, and resolves names to cleaned SQL plus metadata.
//!
//! Lifecycle is explicit: [`TemplateStore::new`] → [`TemplateStore::load`] →
//! ready. After loading, the store is only read through `&self`, so a loaded
//! store can be shared across threads (e.g. in an `Arc`) without locking.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use crate::config::StoreConfig;
use crate::error::QueryError;
use crate::safety::validate_template_syntax;
use crate::sql::clean;
use crate::template::{QueryTemplate, TemplateDocument};

/// A resolved template: the key it was registered under, its cleaned SQL,
/// and its metadata.
#[derive(Debug, Clone)]
pub struct ResolvedTemplate {
    pub key: String,
    pub sql: Arc<str>,
    pub template: Arc<QueryTemplate>,
}

/// Counts exposed for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    pub templates: usize,
    pub namespaces: usize,
    pub parameters: usize,
}

/// Outcome of a startup validation pass.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub valid: usize,
    pub failures: Vec<String>,
}

#[derive(Debug)]
pub struct TemplateStore {
    config: StoreConfig,
    entries: HashMap<String, ResolvedTemplate>,
    /// Full keys in registration order.
    order: Vec<String>,
    /// Short key → full key of the first template registered under it.
    short_keys: HashMap<String, String>,
    loaded: bool,
}

/// Last two dot-segments of a key (`a.b.Mapper.id` → `Mapper.id`).
pub fn short_key(full_key: &str) -> &str {
    let mut dots = full_key.rmatch_indices('.');
    match (dots.next(), dots.next()) {
        (Some(_), Some((second_last, _))) if second_last > 0 => &full_key[second_last + 1..],
        _ => full_key,
    }
}

fn preview(sql: &str) -> &str {
    match sql.char_indices().nth(50) {
        Some((idx, _)) => &sql[..idx],
        None => sql,
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    )
}

fn namespace_from_path(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string()
}

impl TemplateStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            order: Vec::new(),
            short_keys: HashMap::new(),
            loaded: false,
        }
    }

    /// Build a ready store from in-memory documents. Each document is paired
    /// with the source name its namespace defaults to.
    pub fn from_documents<I, S>(config: StoreConfig, documents: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = (S, TemplateDocument)>,
        S: AsRef<str>,
    {
        let mut store = Self::new(config);
        for (source_name, document) in documents {
            let source_name = source_name.as_ref();
            let default_namespace = namespace_from_path(Path::new(source_name));
            store.load_document(document, source_name, &default_namespace);
        }
        store.finish_loading()?;
        Ok(store)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn is_ready(&self) -> bool {
        self.loaded
    }

    /// Load every configured source. With preloading disabled this only marks
    /// the store ready; lookups then read documents on demand.
    pub fn load(&mut self) -> Result<(), QueryError> {
        if !self.config.preload {
            info!(
                base_path = %self.config.base_path.display(),
                "Template preloading disabled, documents will be read on lookup"
            );
            self.loaded = true;
            return Ok(());
        }

        let mut seen = BTreeSet::new();
        let mut files = 0usize;
        let mut loaded = 0usize;

        for source in self.config.sources.clone() {
            let paths = glob::glob(&source)
                .map_err(|e| QueryError::Pattern(format!("{}: {}", source, e)))?;
            let mut matched = 0usize;

            for entry in paths {
                let path = match entry {
                    Ok(path) => path,
                    Err(e) => {
                        warn!(pattern = %source, error = %e, "Skipping unreadable template path");
                        continue;
                    }
                };
                if !path.is_file() || !is_yaml(&path) || !seen.insert(path.clone()) {
                    continue;
                }
                matched += 1;
                loaded += self.load_file(&path)?;
                files += 1;
            }

            debug!(pattern = %source, matched, "Scanned template source");
        }

        info!(files, templates = loaded, "Processed template documents");
        if loaded == 0 {
            warn!(
                sources = ?self.config.sources,
                "No SQL templates were loaded, check the configured sources"
            );
        }

        self.finish_loading()
    }

    fn finish_loading(&mut self) -> Result<(), QueryError> {
        let stats = self.stats();
        info!(
            templates = stats.templates,
            namespaces = stats.namespaces,
            "Template store loaded"
        );
        if self.config.validation.validate_at_startup {
            self.validate_all()?;
        }
        self.loaded = true;
        Ok(())
    }

    fn load_file(&mut self, path: &Path) -> Result<usize, QueryError> {
        let text = fs::read_to_string(path).map_err(|source| QueryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let source_name = path.display().to_string();
        let document = TemplateDocument::from_yaml(&source_name, &text)?;
        let count = self.load_document(document, &source_name, &namespace_from_path(path));
        debug!(source = %source_name, templates = count, "Loaded template document");
        Ok(count)
    }

    fn load_document(
        &mut self,
        document: TemplateDocument,
        source_name: &str,
        default_namespace: &str,
    ) -> usize {
        if document.queries.is_empty() {
            warn!(source = %source_name, "No queries found in template document");
            return 0;
        }

        let namespace = match &document.namespace {
            Some(ns) if !ns.trim().is_empty() => ns.trim().to_string(),
            _ => default_namespace.to_string(),
        };

        let templates = document.into_templates(&namespace, source_name);
        let count = templates.len();
        for template in templates {
            self.register(template);
        }
        count
    }

    /// Index a template under its full key and short key. A duplicate full
    /// key replaces the earlier definition.
    pub fn register(&mut self, template: QueryTemplate) {
        let full_key = template.full_key();
        let sql: Arc<str> = Arc::from(clean(&template.sql));

        trace!(key = %full_key, sql = %preview(&sql), "Registering template");

        let resolved = ResolvedTemplate {
            key: full_key.clone(),
            sql,
            template: Arc::new(template),
        };

        if self.entries.insert(full_key.clone(), resolved).is_some() {
            warn!(key = %full_key, "Duplicate template key, previous definition overwritten");
        } else {
            self.order.push(full_key.clone());
        }

        let short = short_key(&full_key);
        if short != full_key {
            match self.short_keys.get(short) {
                Some(existing) if *existing != full_key => {
                    warn!(
                        short_key = %short,
                        kept = %existing,
                        ignored = %full_key,
                        "Short key collision, first registered template wins"
                    );
                }
                Some(_) => {}
                None => {
                    self.short_keys.insert(short.to_string(), full_key.clone());
                }
            }
        }
    }

    /// Resolve `name` to a template: exact full key, then short key, then
    /// (for names without a namespace) a unique `.name` suffix match.
    pub fn resolve(&self, name: &str) -> Result<ResolvedTemplate, QueryError> {
        if !self.config.preload {
            return self.load_on_demand(name);
        }

        if let Some(found) = self.lookup(name) {
            return Ok(found.clone());
        }

        Err(QueryError::NotFound {
            name: name.to_string(),
            available: self.keys(),
        })
    }

    fn lookup(&self, name: &str) -> Option<&ResolvedTemplate> {
        if let Some(found) = self.entries.get(name) {
            debug!(name, "Template resolved by full key");
            return Some(found);
        }

        for candidate in [name, short_key(name)] {
            if let Some(found) = self
                .short_keys
                .get(candidate)
                .and_then(|full| self.entries.get(full))
            {
                debug!(name, short_key = candidate, "Template resolved by short key");
                return Some(found);
            }
        }

        if name.contains('.') {
            return None;
        }

        let suffix = format!(".{}", name);
        let mut matches = self
            .order
            .iter()
            .filter(|key| key.ends_with(&suffix))
            .filter_map(|key| self.entries.get(key));
        let first = matches.next()?;
        if matches.next().is_some() {
            warn!(
                name,
                using = %first.key,
                "Multiple templates match id, using first registered; consider namespace.id"
            );
        }
        debug!(name, key = %first.key, "Template resolved by id suffix");
        Some(first)
    }

    /// Uncached lookup used when preloading is disabled: reads
    /// `<base_path>/<last namespace segment>.<extension>`.
    fn load_on_demand(&self, name: &str) -> Result<ResolvedTemplate, QueryError> {
        let (namespace, id) = name.rsplit_once('.').ok_or_else(|| {
            QueryError::UsageMisuse(format!(
                "On-demand template loading requires a 'namespace.id' name, got '{}'",
                name
            ))
        })?;
        let file_stem = namespace.rsplit('.').next().unwrap_or(namespace);
        let path: PathBuf = self
            .config
            .base_path
            .join(format!("{}.{}", file_stem, self.config.extension));

        debug!(name, path = %path.display(), "Loading template on demand");

        let not_found = || QueryError::NotFound {
            name: name.to_string(),
            available: Vec::new(),
        };
        if !path.is_file() {
            debug!(path = %path.display(), "Template document does not exist");
            return Err(not_found());
        }

        let text = fs::read_to_string(&path).map_err(|source| QueryError::Io {
            path: path.clone(),
            source,
        })?;
        let source_name = path.display().to_string();
        let document = TemplateDocument::from_yaml(&source_name, &text)?;
        let document_namespace = match &document.namespace {
            Some(ns) if !ns.trim().is_empty() => ns.trim().to_string(),
            _ => namespace_from_path(&path),
        };

        let template = document
            .into_templates(&document_namespace, &source_name)
            .into_iter()
            .find(|t| t.id == id)
            .ok_or_else(not_found)?;

        Ok(ResolvedTemplate {
            key: template.full_key(),
            sql: Arc::from(clean(&template.sql)),
            template: Arc::new(template),
        })
    }

    /// Cleaned SQL of the named template.
    pub fn get(&self, name: &str) -> Result<String, QueryError> {
        let resolved = self.resolve(name)?;
        trace!(name, sql = %preview(&resolved.sql), "Retrieved template");
        Ok(resolved.sql.to_string())
    }

    pub fn get_metadata(&self, name: &str) -> Option<Arc<QueryTemplate>> {
        self.resolve(name).ok().map(|r| r.template)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.resolve(name).is_ok()
    }

    /// Every key a template can currently be fetched by, sorted.
    pub fn keys(&self) -> Vec<String> {
        let keys: Vec<String> = self
            .entries
            .keys()
            .chain(self.short_keys.keys())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        keys
    }

    /// Template ids grouped by namespace.
    pub fn templates_by_namespace(&self) -> BTreeMap<String, Vec<String>> {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for key in &self.order {
            if let Some(entry) = self.entries.get(key) {
                grouped
                    .entry(entry.template.namespace.clone())
                    .or_default()
                    .push(entry.template.id.clone());
            }
        }
        grouped
    }

    /// Ids in `namespace`, also matching namespaces that end in `.namespace`.
    pub fn queries_for_namespace(&self, namespace: &str) -> BTreeSet<String> {
        let suffix = format!(".{}", namespace);
        self.entries
            .values()
            .filter(|e| e.template.namespace == namespace || e.template.namespace.ends_with(&suffix))
            .map(|e| e.template.id.clone())
            .collect()
    }

    pub fn stats(&self) -> StoreStats {
        let namespaces: BTreeSet<&str> = self
            .entries
            .values()
            .map(|e| e.template.namespace.as_str())
            .collect();
        StoreStats {
            templates: self.entries.len(),
            namespaces: namespaces.len(),
            parameters: self
                .entries
                .values()
                .map(|e| e.template.parameters.len())
                .sum(),
        }
    }

    /// Check every template against the configured startup rules.
    ///
    /// Failures are logged. In strict mode any failure fails the whole pass
    /// with all failures aggregated.
    pub fn validate_all(&self) -> Result<ValidationReport, QueryError> {
        let rules = &self.config.validation;
        info!(templates = self.entries.len(), "Validating templates");

        let mut report = ValidationReport::default();
        for key in &self.order {
            let Some(entry) = self.entries.get(key) else {
                continue;
            };
            match self.validate_template(key, &entry.sql, &entry.template) {
                Ok(()) => report.valid += 1,
                Err(e) => {
                    error!(key = %key, error = %e, "Template validation failed");
                    report.failures.push(e.to_string());
                }
            }
        }

        info!(
            valid = report.valid,
            invalid = report.failures.len(),
            "Template validation completed"
        );

        if rules.strict && !report.failures.is_empty() {
            return Err(QueryError::StrictValidation {
                failures: report.failures,
            });
        }
        Ok(report)
    }

    fn validate_template(
        &self,
        key: &str,
        sql: &str,
        template: &QueryTemplate,
    ) -> Result<(), QueryError> {
        let rules = &self.config.validation;
        if rules.validate_sql_syntax {
            validate_template_syntax(key, sql)?;
        }
        if rules.validate_required_parameters && template.has_parameters() {
            template.validate_required_parameters()?;
        }
        if rules.validate_result_descriptor {
            template.validate_result_descriptor()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::ParameterDecl;

    fn document(namespace: Option<&str>, queries: &[(&str, &str)]) -> TemplateDocument {
        let yaml = format!(
            "{}queries:\n{}",
            namespace.map(|ns| format!("namespace: {}\n", ns)).unwrap_or_default(),
            queries
                .iter()
                .map(|(id, sql)| format!("  - id: {}\n    sql: \"{}\"\n", id, sql))
                .collect::<String>()
        );
        TemplateDocument::from_yaml("test.yml", &yaml).unwrap()
    }

    fn lenient() -> StoreConfig {
        let mut config = StoreConfig::default();
        config.validation.validate_result_descriptor = false;
        config
    }

    #[test]
    fn short_keys_take_last_two_segments() {
        assert_eq!(short_key("com.acme.UserMapper.find"), "UserMapper.find");
        assert_eq!(short_key("UserMapper.find"), "UserMapper.find");
        assert_eq!(short_key("find"), "find");
    }

    #[test]
    fn resolves_full_short_and_bare_names() {
        let store = TemplateStore::from_documents(
            lenient(),
            [(
                "ignored.yml",
                document(
                    Some("com.acme.UserMapper"),
                    &[("findActiveUsers", "SELECT *\\n FROM users WHERE active = true")],
                ),
            )],
        )
        .unwrap();

        let expected = "SELECT * FROM users WHERE active = true";
        assert_eq!(store.get("com.acme.UserMapper.findActiveUsers").unwrap(), expected);
        assert_eq!(store.get("UserMapper.findActiveUsers").unwrap(), expected);
        assert_eq!(store.get("other.pkg.UserMapper.findActiveUsers").unwrap(), expected);
        assert_eq!(store.get("findActiveUsers").unwrap(), expected);
        assert!(!store.exists("Other.findActiveUsers"));
        assert!(store.is_ready());
    }

    #[test]
    fn namespace_defaults_to_source_base_name() {
        let store = TemplateStore::from_documents(
            lenient(),
            [("sql/OrderMapper.yml", document(None, &[("all", "SELECT * FROM orders")]))],
        )
        .unwrap();
        assert!(store.exists("OrderMapper.all"));
    }

    #[test]
    fn not_found_lists_known_keys() {
        let store = TemplateStore::from_documents(
            lenient(),
            [("A.yml", document(Some("A"), &[("one", "SELECT 1")]))],
        )
        .unwrap();
        match store.get("B.two") {
            Err(QueryError::NotFound { name, available }) => {
                assert_eq!(name, "B.two");
                assert_eq!(available, vec!["A.one".to_string()]);
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_full_key_overwrites() {
        let mut store = TemplateStore::new(lenient());
        store.register(QueryTemplate::new("A", "q", "SELECT 1"));
        store.register(QueryTemplate::new("A", "q", "SELECT 2"));
        assert_eq!(store.get("A.q").unwrap(), "SELECT 2");
        assert_eq!(store.stats().templates, 1);
    }

    #[test]
    fn ambiguous_bare_id_uses_first_registered() {
        let mut store = TemplateStore::new(lenient());
        store.register(QueryTemplate::new("First", "find", "SELECT 1"));
        store.register(QueryTemplate::new("Second", "find", "SELECT 2"));
        assert_eq!(store.get("find").unwrap(), "SELECT 1");
        assert_eq!(store.get("Second.find").unwrap(), "SELECT 2");
    }

    #[test]
    fn short_key_collision_keeps_first() {
        let mut store = TemplateStore::new(lenient());
        store.register(QueryTemplate::new("a.Mapper", "q", "SELECT 1"));
        store.register(QueryTemplate::new("b.Mapper", "q", "SELECT 2"));
        assert_eq!(store.get("Mapper.q").unwrap(), "SELECT 1");
        assert_eq!(store.get("b.Mapper.q").unwrap(), "SELECT 2");
    }

    #[test]
    fn stats_and_grouping() {
        let mut store = TemplateStore::new(lenient());
        let mut with_params = QueryTemplate::new("Users", "byId", "SELECT * FROM u WHERE id = :id");
        with_params.parameters.push(ParameterDecl {
            name: "id".into(),
            required: true,
            ..Default::default()
        });
        store.register(with_params);
        store.register(QueryTemplate::new("Users", "all", "SELECT * FROM u"));
        store.register(QueryTemplate::new("app.Orders", "all", "SELECT * FROM o"));

        assert_eq!(
            store.stats(),
            StoreStats {
                templates: 3,
                namespaces: 2,
                parameters: 1
            }
        );
        assert_eq!(
            store.templates_by_namespace().get("Users"),
            Some(&vec!["byId".to_string(), "all".to_string()])
        );
        assert!(store.queries_for_namespace("Orders").contains("all"));
    }

    #[test]
    fn lenient_validation_reports_but_keeps_store() {
        let store = TemplateStore::from_documents(
            lenient(),
            [(
                "Bad.yml",
                document(Some("Bad"), &[("broken", "SELECT (1"), ("fine", "SELECT 1")]),
            )],
        )
        .unwrap();
        let report = store.validate_all().unwrap();
        assert_eq!(report.valid, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(store.exists("Bad.broken"));
    }

    #[test]
    fn strict_validation_aborts_loading() {
        let mut config = lenient();
        config.validation.strict = true;
        let result = TemplateStore::from_documents(
            config,
            [("Bad.yml", document(Some("Bad"), &[("broken", "SELECT (1")]))],
        );
        assert!(matches!(result, Err(QueryError::StrictValidation { .. })));
    }

    #[test]
    fn missing_required_parameter_fails_validation() {
        let mut config = lenient();
        config.validation.strict = true;
        let mut store = TemplateStore::new(config);
        let mut template = QueryTemplate::new("Users", "byId", "SELECT * FROM u WHERE id = :id");
        template.parameters.push(ParameterDecl {
            name: "tenant".into(),
            required: true,
            ..Default::default()
        });
        store.register(template);
        let err = store.validate_all().unwrap_err();
        assert!(err.to_string().contains("tenant"));
    }
}
