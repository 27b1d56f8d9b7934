//! Recipe model: one package's name, version, revision, and requirement
//! set, backed by the format-preserving [`document::RecipeDocument`].
//!
//! A recipe is loaded from `packages/<dir>/conanfile.py` (or
//! `variants/<dir>/conanfile.py`, which only needs a `name`). The struct
//! keeps both the semantic fields and the editable document; mutations go
//! through [`Recipe::set_revision`] and [`Recipe::rewrite_requirement_ref`]
//! so the document stays in sync, and [`Recipe::save`] writes back only
//! when the rendered bytes differ from what was loaded.

pub mod document;

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::core::DepforgeError;
use document::{REVISION_KEYS, RecipeDocument, VERSION_KEYS, is_valid_version_token};

/// Name of the recipe file inside each package/variant directory.
pub const RECIPE_FILE: &str = "conanfile.py";
/// Subdirectory holding a package's test recipe.
pub const TEST_PACKAGE_DIR: &str = "test_package";

/// A requirement as seen from one recipe: either resolved to a package in
/// the loaded graph, or a placeholder for a name that only ever appeared as
/// a reference (an external/private dependency).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// Requirement name not (yet) present in the loaded graph.
    Unresolved { name: String },
    /// Requirement resolved to the graph package with this name.
    Loaded { name: String },
}

impl Requirement {
    pub fn name(&self) -> &str {
        match self {
            Self::Unresolved { name } | Self::Loaded { name } => name,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded { .. })
    }
}

/// Where a recipe stores its revision number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RevisionSlot {
    /// A dedicated integer assignment (`plex_revision = 3`).
    Assignment,
    /// Folded into the version string (`version = "1.3-6"`).
    Embedded,
    /// No revision anywhere yet; a bump appends one to the version string.
    Absent,
}

/// One parsed recipe.
#[derive(Debug, Clone)]
pub struct Recipe {
    path: PathBuf,
    source: String,
    doc: RecipeDocument,
    test_path: Option<PathBuf>,
    test_source: Option<String>,
    test_doc: Option<RecipeDocument>,
    revision_slot: RevisionSlot,

    /// Package name, unique within a graph.
    pub name: String,
    /// Version token as on disk (revision suffix stripped).
    pub version: String,
    /// Revision, `None` meaning "no revision suffix".
    pub revision: Option<u32>,
    /// Version in the reference commit (same as `version` when unchanged).
    pub head_version: String,
    /// Revision in the reference commit.
    pub head_revision: Option<u32>,
    /// Requirement name to reference, insertion order irrelevant.
    pub requirements: BTreeMap<String, Requirement>,
    /// Names of packages that require this one. Traversal only.
    pub required_by: BTreeSet<String>,
    /// Set when change detection or resolution touched this recipe.
    pub changed: bool,
}

impl Recipe {
    /// Load a package recipe. `name` and a version are required; a missing
    /// revision is the "no suffix" sentinel.
    pub fn load(path: impl Into<PathBuf>, base_class: &str) -> Result<Self> {
        let path = path.into();
        let source = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_source(path, source, base_class, false)
    }

    /// Load a variant recipe: only `name` is required, version and revision
    /// stay empty. Variants aggregate requirements and are never depended
    /// upon.
    pub fn load_variant(path: impl Into<PathBuf>, base_class: &str) -> Result<Self> {
        let path = path.into();
        let source = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_source(path, source, base_class, true)
    }

    fn from_source(
        path: PathBuf,
        source: String,
        base_class: &str,
        variant: bool,
    ) -> Result<Self> {
        let doc = RecipeDocument::parse(&source, base_class);
        if !doc.has_declaring_class() {
            return Err(DepforgeError::ManifestStructure {
                path: path.display().to_string(),
                reason: format!("no class deriving from {base_class}"),
            }
            .into());
        }

        let name = doc.string_assignment(&["name"]).ok_or_else(|| DepforgeError::MissingField {
            path: path.display().to_string(),
            field: "name".to_string(),
        })?;

        let (version, revision, revision_slot) = if variant {
            (String::new(), None, RevisionSlot::Absent)
        } else {
            extract_version_slot(&doc, &path)?
        };

        let mut requirements = BTreeMap::new();
        for reference in doc.requirement_refs() {
            let req_name = reference.split('/').next().unwrap_or(&reference).to_string();
            requirements
                .insert(req_name.clone(), Requirement::Unresolved { name: req_name });
        }

        let (test_path, test_source, test_doc) = match path.parent() {
            Some(dir) => {
                let candidate = dir.join(TEST_PACKAGE_DIR).join(RECIPE_FILE);
                if candidate.is_file() {
                    let test_source = std::fs::read_to_string(&candidate)
                        .with_context(|| format!("failed to read {}", candidate.display()))?;
                    // test recipes derive from plain conan bases, so the
                    // whole file is treated as rewritable body
                    let test_doc = RecipeDocument::parse_loose(&test_source);
                    (Some(candidate), Some(test_source), Some(test_doc))
                } else {
                    (None, None, None)
                }
            }
            None => (None, None, None),
        };

        Ok(Self {
            path,
            source,
            doc,
            test_path,
            test_source,
            test_doc,
            revision_slot,
            head_version: version.clone(),
            head_revision: revision,
            name,
            version,
            revision,
            requirements,
            required_by: BTreeSet::new(),
            changed: false,
        })
    }

    /// Path of the recipe file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `version[-revision]`, the canonical external text form.
    pub fn full_version(&self) -> String {
        render_version(&self.version, self.revision)
    }

    /// `name/version[-revision]`.
    pub fn package_ref(&self) -> String {
        format!("{}/{}", self.name, self.full_version())
    }

    /// A leaf in the dependents-first sense: requires nothing.
    pub fn is_toplevel(&self) -> bool {
        self.requirements.is_empty()
    }

    /// The next revision this recipe should get when its content or its
    /// requirement references change: one past the reference commit's
    /// revision while the version is unchanged, zero after a version bump.
    pub fn new_revision(&self) -> u32 {
        if self.version == self.head_version {
            self.head_revision.map_or(0, |rev| rev + 1)
        } else {
            0
        }
    }

    /// Record head (reference commit) version/revision, as parsed from the
    /// reference's copy of this recipe.
    pub fn set_head(&mut self, version: String, revision: Option<u32>) {
        self.head_version = version;
        self.head_revision = revision;
    }

    /// Set the revision, editing wherever the recipe stores it.
    pub fn set_revision(&mut self, revision: u32) -> Result<()> {
        match self.revision_slot {
            RevisionSlot::Assignment => {
                if !self.doc.set_int_assignment(REVISION_KEYS, i64::from(revision)) {
                    return Err(DepforgeError::MissingField {
                        path: self.path.display().to_string(),
                        field: "revision".to_string(),
                    }
                    .into());
                }
            }
            RevisionSlot::Embedded | RevisionSlot::Absent => {
                let token = render_version(&self.version, Some(revision));
                if !self.doc.set_string_assignment(VERSION_KEYS, &token) {
                    return Err(DepforgeError::MissingField {
                        path: self.path.display().to_string(),
                        field: "version".to_string(),
                    }
                    .into());
                }
                self.revision_slot = RevisionSlot::Embedded;
            }
        }
        self.revision = Some(revision);
        Ok(())
    }

    /// Rewrite every pinned reference to `dep_name` (in the recipe and its
    /// `test_package` recipe) to `new_ref`. Returns the `(old, new)` pairs
    /// changed.
    pub fn rewrite_requirement_ref(
        &mut self,
        dep_name: &str,
        new_ref: &str,
    ) -> Vec<(String, String)> {
        let mut rewrites = self.doc.rewrite_refs(dep_name, new_ref);
        if let Some(test_doc) = self.test_doc.as_mut() {
            rewrites.extend(test_doc.rewrite_refs(dep_name, new_ref));
        }
        rewrites
    }

    /// Whether a save would write anything.
    pub fn is_dirty(&self) -> bool {
        self.doc.render() != self.source
            || match (&self.test_doc, &self.test_source) {
                (Some(doc), Some(source)) => doc.render() != *source,
                _ => false,
            }
    }

    /// Persist the recipe (and its test recipe) when their rendered form
    /// differs from what was loaded. Returns whether anything was written.
    pub fn save(&mut self) -> Result<bool> {
        let mut wrote = false;

        let rendered = self.doc.render();
        if rendered != self.source {
            std::fs::write(&self.path, &rendered)
                .with_context(|| format!("failed to write {}", self.path.display()))?;
            self.source = rendered;
            wrote = true;
        }

        if let (Some(test_doc), Some(test_source), Some(test_path)) =
            (&self.test_doc, self.test_source.as_mut(), &self.test_path)
        {
            let rendered = test_doc.render();
            if rendered != *test_source {
                std::fs::write(test_path, &rendered)
                    .with_context(|| format!("failed to write {}", test_path.display()))?;
                *test_source = rendered;
                wrote = true;
            }
        }

        Ok(wrote)
    }
}

/// Render `version[-revision]`.
pub fn render_version(version: &str, revision: Option<u32>) -> String {
    match revision {
        Some(rev) => format!("{version}-{rev}"),
        None => version.to_string(),
    }
}

/// Extract `(version, revision)` from a recipe document.
///
/// `plex_version`/`plex_revision` take precedence; a bare `version` may
/// carry the revision embedded as a trailing `-<digits>` segment.
pub fn extract_version(doc: &RecipeDocument, path: &Path) -> Result<(String, Option<u32>)> {
    extract_version_slot(doc, path).map(|(version, revision, _)| (version, revision))
}

fn extract_version_slot(
    doc: &RecipeDocument,
    path: &Path,
) -> Result<(String, Option<u32>, RevisionSlot)> {
    let raw = doc.string_assignment(VERSION_KEYS).ok_or_else(|| DepforgeError::MissingField {
        path: path.display().to_string(),
        field: "version".to_string(),
    })?;

    // without a dedicated revision assignment, a trailing `-<digits>`
    // segment of the version token is the revision (that is also where
    // set_revision puts it, so load and save stay symmetric)
    let (version, revision, slot) = match doc.int_assignment(REVISION_KEYS) {
        Some(rev) => (raw, Some(rev as u32), RevisionSlot::Assignment),
        None => match split_embedded_revision(&raw) {
            Some((version, revision)) => {
                (version.to_string(), Some(revision), RevisionSlot::Embedded)
            }
            None => (raw, None, RevisionSlot::Absent),
        },
    };

    if !is_valid_version_token(&render_version(&version, revision)) {
        return Err(DepforgeError::ManifestStructure {
            path: path.display().to_string(),
            reason: format!("'{}' is not a valid version token", render_version(&version, revision)),
        }
        .into());
    }

    Ok((version, revision, slot))
}

/// Split a trailing `-<digits>` revision suffix off a version token.
pub fn split_embedded_revision(token: &str) -> Option<(&str, u32)> {
    let (version, suffix) = token.rsplit_once('-')?;
    let revision = suffix.parse().ok()?;
    Some((version, revision))
}
