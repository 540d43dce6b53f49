//! Kometa-style YAML rule files
//!
//! ```yaml
//! # config.yml
//! libraries:
//!   Films:
//!     collection_files:
//!       - file: Films.yml
//!     radarr:
//!       root_folder_path: /movies
//!       tag: jfc-films
//!
//! # Films.yml
//! templates:
//!   film_template:
//!     sync_mode: sync
//!     schedule: daily
//! collections:
//!   "Trending Movies":
//!     template: {name: film_template}
//!     tmdb_trending_weekly: 20
//! ```
//!
//! Mappings are walked as `serde_yaml::Mapping` so builders keep their
//! declaration order.

use super::{
    AcquisitionOverrides, BuilderSpec, CollectionRule, ItemFilters, RuleSource, Schedule, SyncMode,
};
use crate::error::{LibraryError, Result};
use async_trait::async_trait;
use serde_yaml::{Mapping, Value};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Presentation keys accepted for compatibility and ignored
const IGNORED_KEYS: &[&str] = &[
    "sort_title",
    "collection_order",
    "poster",
    "url_poster",
    "visible_home",
    "visible_library",
    "visible_shared",
];

/// Loads rules from one or more `config.yml` files
#[derive(Debug, Clone)]
pub struct YamlRuleSource {
    paths: Vec<PathBuf>,
}

impl YamlRuleSource {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    async fn load_config(&self, path: &Path) -> Result<Vec<CollectionRule>> {
        let origin = path.display().to_string();
        let root = read_yaml(path).await?;

        let libraries = root
            .get("libraries")
            .and_then(Value::as_mapping)
            .ok_or_else(|| LibraryError::Yaml {
                path: origin.clone(),
                message: "missing 'libraries' mapping".to_string(),
            })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let shared_templates = root
            .get("templates")
            .and_then(Value::as_mapping)
            .cloned()
            .unwrap_or_default();

        let mut rules = Vec::new();
        for (name, library) in libraries {
            let library_name = key_str(name, &origin)?;
            let Some(library) = library.as_mapping() else {
                warn!(library = %library_name, "Library entry is not a mapping, skipping");
                continue;
            };

            let defaults = LibraryDefaults {
                radarr: arr_overrides(library.get("radarr"), &library_name)?,
                sonarr: arr_overrides(library.get("sonarr"), &library_name)?,
            };

            for file in collection_files(library, &library_name)? {
                let file_path = base_dir.join(&file);
                let document = read_yaml(&file_path).await?;
                rules.extend(parse_document(
                    &library_name,
                    &document,
                    &file_path.display().to_string(),
                    &shared_templates,
                    &defaults,
                )?);
            }

            if library.get("collections").is_some() {
                rules.extend(parse_document(
                    &library_name,
                    &Value::Mapping(library.clone()),
                    &origin,
                    &shared_templates,
                    &defaults,
                )?);
            }
        }

        Ok(rules)
    }
}

#[async_trait]
impl RuleSource for YamlRuleSource {
    #[instrument(skip(self), fields(files = self.paths.len()))]
    async fn load_rules(&self) -> Result<Vec<CollectionRule>> {
        let mut rules = Vec::new();
        let mut seen = HashSet::new();

        for path in &self.paths {
            for rule in self.load_config(path).await? {
                if !seen.insert(rule.key()) {
                    return Err(LibraryError::invalid_rule(
                        rule.key(),
                        "collection is defined more than once",
                    ));
                }
                rules.push(rule);
            }
        }

        info!(rules = rules.len(), "Loaded collection rules");
        Ok(rules)
    }

    fn describe(&self) -> String {
        let names: Vec<String> = self.paths.iter().map(|p| p.display().to_string()).collect();
        names.join(", ")
    }
}

/// Parse a single collection file for `library`, without library defaults
pub fn parse_collections(library: &str, text: &str, origin: &str) -> Result<Vec<CollectionRule>> {
    let document: Value = serde_yaml::from_str(text).map_err(|e| LibraryError::Yaml {
        path: origin.to_string(),
        message: e.to_string(),
    })?;
    parse_document(
        library,
        &document,
        origin,
        &Mapping::new(),
        &LibraryDefaults::default(),
    )
}

#[derive(Debug, Default)]
struct LibraryDefaults {
    radarr: AcquisitionOverrides,
    sonarr: AcquisitionOverrides,
}

async fn read_yaml(path: &Path) -> Result<Value> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| LibraryError::Io {
            path: path.display().to_string(),
            source,
        })?;
    serde_yaml::from_str(&text).map_err(|e| LibraryError::Yaml {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

fn key_str(key: &Value, origin: &str) -> Result<String> {
    match key {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(LibraryError::Yaml {
            path: origin.to_string(),
            message: format!("unsupported mapping key {:?}", other),
        }),
    }
}

/// `collection_files` (or the older `metadata_path`) entries: a path or
/// `{file: path}`
fn collection_files(library: &Mapping, library_name: &str) -> Result<Vec<String>> {
    let entries = library
        .get("collection_files")
        .or_else(|| library.get("metadata_path"));
    let Some(entries) = entries else {
        return Ok(Vec::new());
    };

    let entries = entries.as_sequence().ok_or_else(|| {
        LibraryError::invalid_rule(library_name, "collection_files must be a list")
    })?;

    entries
        .iter()
        .map(|entry| match entry {
            Value::String(path) => Ok(path.clone()),
            Value::Mapping(map) => map
                .get("file")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    LibraryError::invalid_rule(library_name, "collection file entry needs 'file'")
                }),
            _ => Err(LibraryError::invalid_rule(
                library_name,
                "unsupported collection file entry",
            )),
        })
        .collect()
}

fn arr_overrides(value: Option<&Value>, library_name: &str) -> Result<AcquisitionOverrides> {
    let Some(value) = value else {
        return Ok(AcquisitionOverrides::default());
    };
    let map = value.as_mapping().ok_or_else(|| {
        LibraryError::invalid_rule(library_name, "radarr/sonarr settings must be a mapping")
    })?;

    let text = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| map.get(*k))
            .and_then(scalar_string)
    };
    Ok(AcquisitionOverrides {
        root_folder: text(&["root_folder_path", "root_folder"]),
        quality_profile: text(&["quality_profile"]),
        tag: text(&["tag"]),
    })
}

fn parse_document(
    library: &str,
    document: &Value,
    origin: &str,
    shared_templates: &Mapping,
    defaults: &LibraryDefaults,
) -> Result<Vec<CollectionRule>> {
    let mut templates = shared_templates.clone();
    if let Some(local) = document.get("templates").and_then(Value::as_mapping) {
        for (name, body) in local {
            templates.insert(name.clone(), body.clone());
        }
    }

    let Some(collections) = document.get("collections") else {
        warn!(file = %origin, "No 'collections' in rule file");
        return Ok(Vec::new());
    };
    let collections = collections.as_mapping().ok_or_else(|| LibraryError::Yaml {
        path: origin.to_string(),
        message: "'collections' must be a mapping".to_string(),
    })?;

    let mut rules = Vec::with_capacity(collections.len());
    for (name, body) in collections {
        let name = key_str(name, origin)?;
        let body = body
            .as_mapping()
            .ok_or_else(|| LibraryError::invalid_rule(&name, "collection must be a mapping"))?;
        let expanded = expand_templates(&name, body, &templates)?;
        rules.push(build_rule(library, &name, &expanded, defaults)?);
    }

    debug!(file = %origin, library, rules = rules.len(), "Parsed rule file");
    Ok(rules)
}

/// Merge referenced templates under the collection's own keys
fn expand_templates(name: &str, body: &Mapping, templates: &Mapping) -> Result<Mapping> {
    let Some(reference) = body.get("template") else {
        return Ok(body.clone());
    };

    let references: Vec<Mapping> = match reference {
        Value::Mapping(map) => vec![map.clone()],
        Value::String(template) => {
            let mut map = Mapping::new();
            map.insert(Value::from("name"), Value::from(template.as_str()));
            vec![map]
        }
        Value::Sequence(items) => items
            .iter()
            .map(|item| {
                item.as_mapping().cloned().ok_or_else(|| {
                    LibraryError::invalid_rule(name, "template list entries must be mappings")
                })
            })
            .collect::<Result<_>>()?,
        _ => return Err(LibraryError::invalid_rule(name, "invalid template reference")),
    };

    let mut merged = Mapping::new();
    for reference in &references {
        let template_name = reference
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| LibraryError::invalid_rule(name, "template reference needs 'name'"))?;
        let template = templates
            .get(template_name)
            .and_then(Value::as_mapping)
            .ok_or_else(|| {
                LibraryError::invalid_rule(name, format!("unknown template '{}'", template_name))
            })?;

        let mut args: HashMap<String, Value> = HashMap::new();
        args.insert("collection_name".to_string(), Value::from(name));
        if let Some(defaults) = template.get("default").and_then(Value::as_mapping) {
            for (k, v) in defaults {
                if let Some(k) = k.as_str() {
                    args.insert(k.to_string(), v.clone());
                }
            }
        }
        for (k, v) in reference {
            if let Some(k) = k.as_str().filter(|k| *k != "name") {
                args.insert(k.to_string(), v.clone());
            }
        }

        for (key, value) in template {
            if key.as_str() == Some("default") || merged.contains_key(key) {
                continue;
            }
            merged.insert(key.clone(), substitute(value, &args));
        }
    }

    for (key, value) in body {
        if key.as_str() != Some("template") {
            merged.insert(key.clone(), value.clone());
        }
    }
    Ok(merged)
}

/// Replace `<<arg>>` placeholders; a value that is exactly one placeholder
/// takes the argument's own type
fn substitute(value: &Value, args: &HashMap<String, Value>) -> Value {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if let Some(arg) = trimmed
                .strip_prefix("<<")
                .and_then(|rest| rest.strip_suffix(">>"))
                .and_then(|name| args.get(name))
            {
                return arg.clone();
            }

            let mut out = s.clone();
            for (name, arg) in args {
                let placeholder = format!("<<{}>>", name);
                if out.contains(&placeholder) {
                    out = out.replace(&placeholder, &scalar_string(arg).unwrap_or_default());
                }
            }
            Value::String(out)
        }
        Value::Sequence(items) => {
            Value::Sequence(items.iter().map(|v| substitute(v, args)).collect())
        }
        Value::Mapping(map) => Value::Mapping(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, args)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn build_rule(
    library: &str,
    name: &str,
    body: &Mapping,
    defaults: &LibraryDefaults,
) -> Result<CollectionRule> {
    let mut rule = CollectionRule::new(library, name);
    rule.radarr = defaults.radarr.clone();
    rule.sonarr = defaults.sonarr.clone();

    let invalid = |message: String| LibraryError::invalid_rule(format!("{}/{}", library, name), message);

    for (key, value) in body {
        let key = key
            .as_str()
            .ok_or_else(|| invalid("collection keys must be strings".to_string()))?;

        match key {
            "sync_mode" => {
                let mode = value
                    .as_str()
                    .ok_or_else(|| invalid("sync_mode must be a string".to_string()))?;
                rule.sync_mode = mode.parse::<SyncMode>().map_err(invalid)?;
            }
            "schedule" => {
                if !value.is_null() {
                    let text = scalar_string(value)
                        .ok_or_else(|| invalid("schedule must be a string".to_string()))?;
                    rule.schedule = Some(text.parse::<Schedule>().map_err(invalid)?);
                }
            }
            "limit" => {
                let limit = value
                    .as_u64()
                    .ok_or_else(|| invalid("limit must be a positive integer".to_string()))?;
                rule.limit = Some(limit as usize);
            }
            "summary" => rule.summary = scalar_string(value),
            "acquire_missing" => {
                rule.acquire_missing = value
                    .as_bool()
                    .ok_or_else(|| invalid("acquire_missing must be a boolean".to_string()))?;
            }
            "filters" => {
                let map = value
                    .as_mapping()
                    .ok_or_else(|| invalid("filters must be a mapping".to_string()))?;
                rule.filters = parse_filters(map).map_err(invalid)?;
            }
            "item_radarr_tag" => rule.radarr.tag = scalar_string(value),
            "item_sonarr_tag" => rule.sonarr.tag = scalar_string(value),
            "template" => {}
            ignored if IGNORED_KEYS.contains(&ignored) => {
                debug!(collection = %name, key = ignored, "Ignoring presentation key");
            }
            builder => {
                let params = serde_json::to_value(value)
                    .map_err(|e| invalid(format!("builder '{}': {}", builder, e)))?;
                rule.builders
                    .push(BuilderSpec::parse(builder, params).map_err(invalid)?);
            }
        }
    }

    if rule.builders.is_empty() {
        return Err(invalid("collection has no builders".to_string()));
    }
    Ok(rule)
}

fn parse_filters(map: &Mapping) -> std::result::Result<ItemFilters, String> {
    let mut filters = ItemFilters::default();

    for (key, value) in map {
        let key = key.as_str().unwrap_or_default();
        match key {
            "year.gte" => filters.year_gte = Some(as_i32(key, value)?),
            "year.lte" => filters.year_lte = Some(as_i32(key, value)?),
            "vote_average.gte" | "critic_rating.gte" => {
                filters.vote_average_gte = Some(
                    value
                        .as_f64()
                        .ok_or_else(|| format!("{} must be a number", key))?,
                )
            }
            "vote_count.gte" | "tmdb_vote_count.gte" => {
                filters.vote_count_gte = Some(
                    value
                        .as_u64()
                        .ok_or_else(|| format!("{} must be a positive integer", key))?,
                )
            }
            "original_language.not" => filters.original_language_not = string_list(value),
            "with_genres" => filters.with_genres = id_list(key, value)?,
            "without_genres" => filters.without_genres = id_list(key, value)?,
            other => warn!(filter = other, "Unsupported filter ignored"),
        }
    }

    Ok(filters)
}

fn as_i32(key: &str, value: &Value) -> std::result::Result<i32, String> {
    value
        .as_i64()
        .and_then(|n| i32::try_from(n).ok())
        .ok_or_else(|| format!("{} must be an integer", key))
}

/// A list, or a single value that may be comma separated
fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Sequence(items) => items.iter().filter_map(scalar_string).collect(),
        other => scalar_string(other)
            .map(|s| {
                s.split([',', '|'])
                    .map(|part| part.trim().to_string())
                    .filter(|part| !part.is_empty())
                    .collect()
            })
            .unwrap_or_default(),
    }
}

fn id_list(key: &str, value: &Value) -> std::result::Result<Vec<u32>, String> {
    string_list(value)
        .iter()
        .map(|part| {
            part.parse::<u32>()
                .map_err(|_| format!("{} expects genre ids, got '{}'", key, part))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::SchedulePreset;
    use chrono::Weekday;

    const FILMS: &str = r#"
templates:
  film_template:
    sync_mode: sync
    schedule: daily
    filters:
      year.gte: 2015

collections:
  "Trending Movies":
    template: {name: film_template}
    tmdb_trending_weekly: 20
    summary: "Top trending movies this week"

  "Popular Action":
    template: {name: film_template}
    tmdb_discover:
      sort_by: popularity.desc
      with_genres: 28
      limit: 30
    collection_order: release

  "Netflix Originals":
    sync_mode: append
    schedule: weekly(sunday)
    tmdb_discover:
      with_watch_providers: 8
      watch_region: FR
      limit: 50
    trakt_trending: 10
    filters:
      vote_average.gte: 6.0
      original_language.not: ja
"#;

    #[test]
    fn test_parse_collection_file() {
        let rules = parse_collections("Films", FILMS, "Films.yml").unwrap();
        assert_eq!(rules.len(), 3);

        let trending = &rules[0];
        assert_eq!(trending.name, "Trending Movies");
        assert_eq!(trending.schedule, Some(Schedule::daily()));
        assert_eq!(trending.filters.year_gte, Some(2015));
        assert_eq!(trending.builders.len(), 1);
        assert_eq!(trending.builders[0].key(), "tmdb_trending_weekly");
        assert_eq!(trending.builders[0].limit(), Some(20));
        assert_eq!(
            trending.summary.as_deref(),
            Some("Top trending movies this week")
        );

        let action = &rules[1];
        assert_eq!(action.builders[0].param_u64("with_genres"), Some(28));

        let netflix = &rules[2];
        assert_eq!(netflix.sync_mode, SyncMode::Append);
        assert_eq!(
            netflix.schedule,
            Some(Schedule::Preset(SchedulePreset::Weekly(Weekday::Sun)))
        );
        let keys: Vec<String> = netflix.builders.iter().map(|b| b.key()).collect();
        assert_eq!(keys, vec!["tmdb_discover", "trakt_trending"]);
        assert_eq!(netflix.filters.original_language_not, vec!["ja"]);
        assert_eq!(netflix.filters.vote_average_gte, Some(6.0));
    }

    #[test]
    fn test_template_arguments_are_substituted() {
        let text = r#"
templates:
  genre:
    default:
      count: 25
    tmdb_discover:
      with_genres: <<genre_id>>
      limit: <<count>>
    summary: "Best of <<collection_name>>"
collections:
  Horror:
    template: {name: genre, genre_id: 27}
"#;
        let rules = parse_collections("Films", text, "inline").unwrap();
        let builder = &rules[0].builders[0];
        assert_eq!(builder.param_u64("with_genres"), Some(27));
        assert_eq!(builder.limit(), Some(25));
        assert_eq!(rules[0].summary.as_deref(), Some("Best of Horror"));
    }

    #[test]
    fn test_collection_keys_override_template() {
        let text = r#"
templates:
  base:
    sync_mode: append
    tmdb_popular: 10
collections:
  Mine:
    template: {name: base}
    sync_mode: sync
"#;
        let rules = parse_collections("Films", text, "inline").unwrap();
        assert_eq!(rules[0].sync_mode, SyncMode::Sync);
        assert_eq!(rules[0].builders[0].limit(), Some(10));
    }

    #[test]
    fn test_invalid_rules_are_config_errors() {
        let unknown_template = "collections:\n  X:\n    template: {name: nope}\n    tmdb_popular: 5\n";
        let bad_schedule = "collections:\n  X:\n    schedule: sometimes\n    tmdb_popular: 5\n";
        let no_builders = "collections:\n  X:\n    sync_mode: sync\n";
        let bad_mode = "collections:\n  X:\n    sync_mode: mirror\n    tmdb_popular: 5\n";

        for text in [unknown_template, bad_schedule, no_builders, bad_mode] {
            let err = parse_collections("Films", text, "inline").unwrap_err();
            assert!(err.is_config_error(), "{}", err);
        }
    }

    #[tokio::test]
    async fn test_load_config_with_collection_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.yml"),
            r#"
libraries:
  Films:
    collection_files:
      - file: Films.yml
    radarr:
      root_folder_path: /movies
      tag: jfc-films
  Séries:
    collections:
      "Trending Series":
        tmdb_trending_weekly: 20
        item_sonarr_tag: trending
"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("Films.yml"), FILMS).unwrap();

        let source = YamlRuleSource::new([dir.path().join("config.yml")]);
        let rules = source.load_rules().await.unwrap();

        assert_eq!(rules.len(), 4);
        let films: Vec<_> = rules.iter().filter(|r| r.library == "Films").collect();
        assert_eq!(films.len(), 3);
        assert_eq!(films[0].radarr.root_folder.as_deref(), Some("/movies"));
        assert_eq!(films[0].radarr.tag.as_deref(), Some("jfc-films"));

        let series = rules.iter().find(|r| r.library == "Séries").unwrap();
        assert_eq!(series.sonarr.tag.as_deref(), Some("trending"));
    }

    #[tokio::test]
    async fn test_missing_collection_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.yml"),
            "libraries:\n  Films:\n    collection_files:\n      - Missing.yml\n",
        )
        .unwrap();

        let source = YamlRuleSource::new([dir.path().join("config.yml")]);
        assert!(matches!(
            source.load_rules().await,
            Err(LibraryError::Io { .. })
        ));
    }
}
