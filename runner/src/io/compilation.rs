//! Compiled delivery package access.
//!
//! Item refs in a compiled test are `itemUri|publicDir|privateDir`. Item data
//! files live in the private directory under a language folder
//! (`{lang}/item.json`); lookups try the candidate language first, then the
//! configured default language.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::debug;

use crate::definition::AssessmentTest;
use crate::error::{Result, RunnerError};
use crate::io::definition_store::parse_definition;

pub const ITEM_DATA_FILE: &str = "item.json";
pub const VARIABLE_ELEMENTS_FILE: &str = "variableElements.json";
pub const METADATA_ELEMENTS_FILE: &str = "metadataElements.json";
pub const PORTABLE_ELEMENTS_FILE: &str = "portableElements.json";

/// Split form of an item ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemHref {
    pub item_uri: String,
    pub public_dir: String,
    pub private_dir: String,
}

impl ItemHref {
    pub fn parse(href: &str) -> Result<Self> {
        let mut parts = href.split('|');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(item_uri), Some(public_dir), Some(private_dir)) => Ok(Self {
                item_uri: item_uri.to_string(),
                public_dir: public_dir.to_string(),
                private_dir: private_dir.to_string(),
            }),
            _ => Err(RunnerError::inconsistent(format!(
                "the itemRef '{href}' is malformed"
            ))),
        }
    }
}

pub trait CompilationStore: Send + Sync {
    fn test_definition(
        &self,
        definition_uri: &str,
        compilation_uri: &str,
    ) -> Result<AssessmentTest>;

    /// Raw contents of `path` inside compiled `directory`; `None` when missing.
    fn read_file(&self, directory: &str, path: &str) -> Result<Option<String>>;
}

/// Read `file` from the private directory of `href`, with language fallback.
///
/// Fails with `FileNotFound` when no language variant exists.
pub fn read_item_file(
    store: &dyn CompilationStore,
    href: &ItemHref,
    file: &str,
    languages: &[&str],
) -> Result<String> {
    for language in languages {
        let path = format!("{language}/{file}");
        if let Some(contents) = store.read_file(&href.private_dir, &path)? {
            debug!(directory = %href.private_dir, path = %path, "compiled item file read");
            return Ok(contents);
        }
    }
    Err(RunnerError::FileNotFound {
        path: format!("{}/{{{}}}/{file}", href.private_dir, languages.join(",")),
    })
}

/// Definitions and files held in memory.
#[derive(Debug, Default)]
pub struct MemoryCompilation {
    tests: Mutex<BTreeMap<String, AssessmentTest>>,
    files: Mutex<BTreeMap<(String, String), String>>,
}

impl MemoryCompilation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_test(&self, definition_uri: &str, test: AssessmentTest) {
        self.tests.lock().insert(definition_uri.to_string(), test);
    }

    pub fn add_file(&self, directory: &str, path: &str, contents: &str) {
        self.files
            .lock()
            .insert((directory.to_string(), path.to_string()), contents.to_string());
    }
}

impl CompilationStore for MemoryCompilation {
    fn test_definition(
        &self,
        definition_uri: &str,
        _compilation_uri: &str,
    ) -> Result<AssessmentTest> {
        self.tests
            .lock()
            .get(definition_uri)
            .cloned()
            .ok_or_else(|| RunnerError::FileNotFound {
                path: definition_uri.to_string(),
            })
    }

    fn read_file(&self, directory: &str, path: &str) -> Result<Option<String>> {
        Ok(self
            .files
            .lock()
            .get(&(directory.to_string(), path.to_string()))
            .cloned())
    }
}

/// Compiled package laid out on disk below `root`.
///
/// Definitions are `{root}/{definition_uri}` JSON files validated against the
/// bundled schema; item files are `{root}/{directory}/{path}`.
#[derive(Debug, Clone)]
pub struct DirectoryCompilation {
    root: PathBuf,
}

impl DirectoryCompilation {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl CompilationStore for DirectoryCompilation {
    fn test_definition(
        &self,
        definition_uri: &str,
        _compilation_uri: &str,
    ) -> Result<AssessmentTest> {
        let path = self.root.join(definition_uri);
        if !path.exists() {
            return Err(RunnerError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let raw = fs::read_to_string(&path)?;
        parse_definition(&raw, crate::io::definition_store::V1_SCHEMA).map_err(|err| {
            RunnerError::inconsistent(format!("definition {}: {err:#}", path.display()))
        })
    }

    fn read_file(&self, directory: &str, path: &str) -> Result<Option<String>> {
        let full = self.root.join(directory).join(path);
        if !full.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(full)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn href_needs_three_segments() {
        let href = ItemHref::parse("uri|pub|priv").expect("parse");
        assert_eq!(href.private_dir, "priv");
        let err = ItemHref::parse("uri|pub").expect_err("malformed");
        assert!(matches!(err, RunnerError::InconsistentData(_)));
    }

    #[test]
    fn item_file_falls_back_to_default_language() {
        let compilation = MemoryCompilation::new();
        compilation.add_file("priv", "en-US/item.json", "{\"lang\":\"en\"}");
        let href = ItemHref::parse("uri|pub|priv").expect("parse");

        let contents =
            read_item_file(&compilation, &href, ITEM_DATA_FILE, &["fr-FR", "en-US"]).expect("read");
        assert_eq!(contents, "{\"lang\":\"en\"}");

        let err = read_item_file(&compilation, &href, METADATA_ELEMENTS_FILE, &["fr-FR", "en-US"])
            .expect_err("missing");
        assert!(matches!(err, RunnerError::FileNotFound { .. }));
    }

    #[test]
    fn directory_compilation_reads_files_below_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("priv/en-US")).expect("mkdir");
        fs::write(temp.path().join("priv/en-US/item.json"), "{}").expect("write");
        let compilation = DirectoryCompilation::new(temp.path());

        assert_eq!(
            compilation
                .read_file("priv", "en-US/item.json")
                .expect("read")
                .as_deref(),
            Some("{}")
        );
        assert_eq!(compilation.read_file("priv", "fr-FR/item.json").expect("read"), None);
        assert!(matches!(
            compilation.test_definition("missing.json", "compiled"),
            Err(RunnerError::FileNotFound { .. })
        ));
    }
}
