//! Architecture validator: layer dependency rules, import cycles, blocking
//! I/O in async code and dependency injection in API routes.
//!
//! Layers and the edges allowed between them come entirely from settings. A
//! file belongs to the layer named by a `layer: <name>` comment near its top,
//! or else to the first layer whose globs match its path. Imports are mapped
//! to layers by matching their module path against the same globs.

use super::{build_globset, parse_source, SourceFile, SourceLanguage, Validator, ValidatorKind};
use crate::changes::ChangeSet;
use crate::error::{GateError, Result};
use crate::finding::{Category, Finding, Severity};
use globset::GlobSet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const LAYER_VIOLATION: &str = "layer-violation";
pub const CIRCULAR_DEPENDENCY: &str = "circular-dependency";
pub const BLOCKING_IO_IN_ASYNC: &str = "blocking-io-in-async";
pub const MISSING_DEPENDENCY_INJECTION: &str = "missing-dependency-injection";

/// Synchronous calls that stall an event loop: pattern, what it is, what to
/// use instead.
const BLOCKING_CALLS: &[(&str, &str, &str)] = &[
    (r"\brequests\.(?:get|post|put|delete|patch|head|options|request)\s*\(", "requests", "httpx.AsyncClient or aiohttp"),
    (r"\btime\.sleep\s*\(", "time.sleep", "asyncio.sleep"),
    (r"\burllib\.request\.urlopen\s*\(", "urllib.request.urlopen", "httpx.AsyncClient or aiohttp"),
    (r"\bpsycopg2\.connect\s*\(", "psycopg2", "asyncpg"),
    (r"\bpymongo\.MongoClient\s*\(", "pymongo", "motor"),
    (r"\bredis\.(?:Strict)?Redis\s*\(", "redis", "redis.asyncio"),
    (r"\b(?:readFileSync|writeFileSync|appendFileSync|existsSync|readdirSync|execSync|spawnSync)\s*\(", "synchronous Node I/O", "the fs/promises or child_process async APIs"),
    (r"\b(?:std::)?thread::sleep\s*\(", "thread::sleep", "tokio::time::sleep"),
    (r"\bstd::fs::\w+\s*\(", "std::fs", "tokio::fs"),
];

/// A named layer and the paths that belong to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayerSpec {
    pub name: String,
    pub paths: Vec<String>,
}

/// Parameters accepted under `validators.architecture.parameters`.
///
/// Layers are listed outermost first; a dependency on an earlier layer points
/// outward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArchitectureSettings {
    pub layers: Vec<LayerSpec>,
    /// Layer name to the layers it may depend on.
    pub allowed: BTreeMap<String, Vec<String>>,
    pub detect_cycles: bool,
    /// Report blocking calls inside async functions.
    pub check_async_io: bool,
    /// Require FastAPI `Depends()` in route modules under `api/` or
    /// `controllers/`.
    pub require_dependency_injection: bool,
    pub exclude: Vec<String>,
}

impl Default for ArchitectureSettings {
    fn default() -> Self {
        Self {
            layers: Vec::new(),
            allowed: BTreeMap::new(),
            detect_cycles: true,
            check_async_io: true,
            require_dependency_injection: true,
            exclude: Vec::new(),
        }
    }
}

struct Layer {
    name: String,
    globs: GlobSet,
    allowed: BTreeSet<String>,
}

/// Checks imports against the configured layering and for cycles.
pub struct ArchitectureValidator {
    layers: Vec<Layer>,
    detect_cycles: bool,
    check_async_io: bool,
    require_dependency_injection: bool,
    exclude: GlobSet,
    blocking_calls: Vec<(Regex, &'static str, &'static str)>,
    async_header: Regex,
    route_decorator: Regex,
    depends: Regex,
}

impl ArchitectureValidator {
    /// # Errors
    ///
    /// Returns a configuration error for duplicate layer names, `allowed`
    /// entries naming unknown layers, or invalid globs.
    pub fn new(settings: ArchitectureSettings) -> Result<Self> {
        let field = "validators.architecture.parameters";
        let names: BTreeSet<&str> = settings.layers.iter().map(|l| l.name.as_str()).collect();
        if names.len() != settings.layers.len() {
            return Err(GateError::invalid_config(
                format!("{}.layers", field),
                "layer names must be unique",
            ));
        }
        for (from, targets) in &settings.allowed {
            for name in std::iter::once(from).chain(targets) {
                if !names.contains(name.as_str()) {
                    return Err(GateError::invalid_config(
                        format!("{}.allowed", field),
                        format!("unknown layer '{}'", name),
                    ));
                }
            }
        }

        let layers = settings
            .layers
            .iter()
            .map(|spec| {
                Ok(Layer {
                    name: spec.name.clone(),
                    globs: build_globset(&format!("{}.layers.{}", field, spec.name), &spec.paths)?,
                    allowed: settings
                        .allowed
                        .get(&spec.name)
                        .map(|v| v.iter().cloned().collect())
                        .unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let regex = |pattern: &str| Regex::new(pattern).map_err(|e| GateError::Other(e.into()));
        let blocking_calls = BLOCKING_CALLS
            .iter()
            .map(|&(pattern, label, alternative)| Ok((regex(pattern)?, label, alternative)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            layers,
            detect_cycles: settings.detect_cycles,
            check_async_io: settings.check_async_io,
            require_dependency_injection: settings.require_dependency_injection,
            exclude: build_globset(&format!("{}.exclude", field), &settings.exclude)?,
            blocking_calls,
            async_header: regex(r"(?:^|[^\w.])async\s+(?:def|fn|function\b|[\w$#]+\s*\(|\()")?,
            route_decorator: regex(r"^\s*@(?:app|router)\.(?:get|post|put|delete|patch)\b")?,
            depends: regex(r"\bDepends\s*\(")?,
        })
    }

    fn layer_index_of_path(&self, path: &str) -> Option<usize> {
        self.layers.iter().position(|l| l.globs.is_match(path))
    }

    fn layer_of_file(&self, file: &SourceFile<'_>) -> Option<usize> {
        file.annotation("layer")
            .and_then(|name| self.layers.iter().position(|l| l.name == name))
            .or_else(|| self.layer_index_of_path(file.path()))
    }

    fn layer_of_module(&self, candidates: &[String]) -> Option<usize> {
        candidates
            .iter()
            .find_map(|c| self.layer_index_of_path(c))
    }

    fn check_layers(&self, file: &SourceFile<'_>, findings: &mut Vec<Finding>) {
        let Some(own) = self.layer_of_file(file) else {
            return;
        };
        let own_layer = &self.layers[own];

        for import in file.imports() {
            let candidates = module_candidates(file.path(), &import.module);
            let Some(target) = self.layer_of_module(&candidates) else {
                continue;
            };
            let target_layer = &self.layers[target];
            if target == own || own_layer.allowed.contains(&target_layer.name) {
                continue;
            }

            let severity = if target < own {
                Severity::High
            } else {
                Severity::Medium
            };
            let allowed: Vec<&str> = own_layer.allowed.iter().map(String::as_str).collect();
            let fix = if allowed.is_empty() {
                format!(
                    "Layer '{}' may not depend on other layers; invert the dependency behind an interface",
                    own_layer.name
                )
            } else {
                format!(
                    "Invert the dependency behind an interface or route it through: {}",
                    allowed.join(", ")
                )
            };
            findings.push(
                Finding::new(
                    Category::Architecture,
                    severity,
                    LAYER_VIOLATION,
                    format!(
                        "Layer '{}' must not depend on layer '{}' (import of '{}')",
                        own_layer.name, target_layer.name, import.module
                    ),
                )
                .with_location(file.path(), import.line)
                .with_suggested_fix(fix),
            );
        }
    }

    /// Blocking calls anywhere in the body of an async function or method.
    fn check_async_io(&self, file: &SourceFile<'_>, findings: &mut Vec<Finding>) {
        let lines = file.lines();
        for def in file.definitions().iter().filter(|d| d.is_callable()) {
            let start = (def.line as usize).saturating_sub(1);
            let is_async = lines
                .get(start)
                .is_some_and(|header| self.async_header.is_match(&file.code_of(header)));
            if !is_async {
                continue;
            }

            for idx in start..=def.end_index.min(lines.len().saturating_sub(1)) {
                let line = lines[idx];
                if file.is_comment(line) {
                    continue;
                }
                let code = file.code_of(line);
                let Some((_, label, alternative)) =
                    self.blocking_calls.iter().find(|(re, _, _)| re.is_match(&code))
                else {
                    continue;
                };
                findings.push(
                    Finding::new(
                        Category::Architecture,
                        Severity::Medium,
                        BLOCKING_IO_IN_ASYNC,
                        format!("Blocking {} call inside async function '{}'", label, def.qualified),
                    )
                    .with_location(file.path(), line_number(idx))
                    .with_suggested_fix(format!("Use {} so the event loop is not blocked", alternative)),
                );
            }
        }
    }

    /// Route handlers in API modules that never use `Depends()`. Reported
    /// once per file, at the first route.
    fn check_dependency_injection(&self, file: &SourceFile<'_>, findings: &mut Vec<Finding>) {
        if file.language() != Some(SourceLanguage::Python) || !is_route_module(file.path()) {
            return;
        }
        let lines = file.lines();
        if lines.iter().any(|l| self.depends.is_match(l)) {
            return;
        }
        let Some(idx) = lines.iter().position(|l| self.route_decorator.is_match(l)) else {
            return;
        };
        findings.push(
            Finding::new(
                Category::Architecture,
                Severity::Medium,
                MISSING_DEPENDENCY_INJECTION,
                "API routes construct their dependencies instead of injecting them with Depends()",
            )
            .with_location(file.path(), line_number(idx))
            .with_suggested_fix(
                "Provide services through a dependency function, e.g. `service: UserService = Depends(get_user_service)`",
            ),
        );
    }

    fn check_cycles(&self, files: &[SourceFile<'_>], findings: &mut Vec<Finding>) {
        let stems: Vec<(String, &str)> = files
            .iter()
            .map(|f| (module_stem(f.path()), f.path()))
            .collect();

        // path -> (imported path -> line of first import)
        let mut graph: BTreeMap<&str, BTreeMap<&str, u32>> = BTreeMap::new();
        for file in files {
            let edges = graph.entry(file.path()).or_default();
            for import in file.imports() {
                let candidates = module_candidates(file.path(), &import.module);
                let target = stems.iter().find(|(stem, path)| {
                    *path != file.path()
                        && candidates.iter().any(|c| stem == c || stem.ends_with(&format!("/{}", c)))
                });
                if let Some((_, target)) = target {
                    edges.entry(*target).or_insert(import.line);
                }
            }
        }

        let mut reported: BTreeSet<Vec<&str>> = BTreeSet::new();
        for start in graph.keys().copied() {
            let mut stack = vec![start];
            find_cycles(&graph, &mut stack, &mut reported);
        }

        for cycle in reported {
            let first = cycle[0];
            let next = cycle.get(1).copied().unwrap_or(first);
            let line = graph
                .get(first)
                .and_then(|edges| edges.get(next))
                .copied()
                .unwrap_or(0);
            let mut chain: Vec<&str> = cycle.clone();
            chain.push(first);
            findings.push(
                Finding::new(
                    Category::Architecture,
                    Severity::High,
                    CIRCULAR_DEPENDENCY,
                    format!("Import cycle: {}", chain.join(" -> ")),
                )
                .with_location(first, line)
                .with_suggested_fix("Extract the shared code into a module both sides can depend on"),
            );
        }
    }
}

impl Validator for ArchitectureValidator {
    fn kind(&self) -> ValidatorKind {
        ValidatorKind::Architecture
    }

    fn inspect(&self, changes: &ChangeSet) -> Vec<Finding> {
        let mut findings = Vec::new();
        let mut parsed = Vec::new();

        for (path, content) in changes.changed_files() {
            if self.exclude.is_match(path) || super::SourceLanguage::from_path(path).is_none() {
                continue;
            }
            match parse_source(Category::Architecture, path, content) {
                Ok(file) => {
                    if !self.layers.is_empty() {
                        self.check_layers(&file, &mut findings);
                    }
                    if self.check_async_io {
                        self.check_async_io(&file, &mut findings);
                    }
                    if self.require_dependency_injection {
                        self.check_dependency_injection(&file, &mut findings);
                    }
                    parsed.push(file);
                }
                Err(finding) => findings.push(finding),
            }
        }

        if self.detect_cycles {
            self.check_cycles(&parsed, &mut findings);
        }
        findings
    }
}

/// Depth-first search recording each elementary cycle once, rotated to start
/// at its smallest path.
fn find_cycles<'a>(
    graph: &BTreeMap<&'a str, BTreeMap<&'a str, u32>>,
    stack: &mut Vec<&'a str>,
    reported: &mut BTreeSet<Vec<&'a str>>,
) {
    let Some(&current) = stack.last() else {
        return;
    };
    let Some(edges) = graph.get(current) else {
        return;
    };
    for &next in edges.keys() {
        if let Some(pos) = stack.iter().position(|p| *p == next) {
            let mut cycle = stack[pos..].to_vec();
            let min = cycle
                .iter()
                .enumerate()
                .min_by_key(|(_, p)| **p)
                .map_or(0, |(i, _)| i);
            cycle.rotate_left(min);
            reported.insert(cycle);
        } else if next > stack[0] {
            // Cycles through smaller nodes were found from those nodes.
            stack.push(next);
            find_cycles(graph, stack, reported);
            stack.pop();
        }
    }
}

fn is_route_module(path: &str) -> bool {
    path.split('/')
        .rev()
        .skip(1)
        .any(|dir| matches!(dir, "api" | "controllers"))
}

fn line_number(index: usize) -> u32 {
    u32::try_from(index + 1).unwrap_or(u32::MAX)
}

/// Path without extension, with `index`/`__init__`/`mod` collapsed to the
/// directory.
fn module_stem(path: &str) -> String {
    let stem = path.rsplit_once('.').map_or(path, |(s, _)| s);
    for suffix in ["/__init__", "/index", "/mod"] {
        if let Some(dir) = stem.strip_suffix(suffix) {
            return dir.to_string();
        }
    }
    stem.to_string()
}

/// Slash-separated paths an import may refer to.
///
/// A module path names a package directory as well as a file, so a child
/// path is included for directory globs such as `**/services/**`.
fn module_candidates(importer: &str, module: &str) -> Vec<String> {
    let dir = importer.rsplit_once('/').map_or("", |(d, _)| d);

    let resolved = if module.starts_with("./") || module.starts_with("../") {
        normalize_segments(&format!("{}/{}", dir, module))
    } else if module.starts_with('.') {
        // Python relative import: one dot per package level.
        let dots = module.chars().take_while(|c| *c == '.').count();
        let rest = module[dots..].replace('.', "/");
        let mut base = dir.to_string();
        for _ in 1..dots {
            base = base.rsplit_once('/').map_or(String::new(), |(d, _)| d.to_string());
        }
        normalize_segments(&format!("{}/{}", base, rest))
    } else if module.contains("::") {
        let path = module.replace("::", "/");
        path.trim_start_matches("crate/")
            .trim_start_matches("self/")
            .trim_start_matches("super/")
            .to_string()
    } else if module.contains('/') {
        module.trim_start_matches('@').to_string()
    } else {
        module.replace('.', "/")
    };

    let resolved = resolved.trim_matches('/').to_string();
    if resolved.is_empty() {
        return Vec::new();
    }
    vec![format!("{}/_", resolved), resolved]
}

fn normalize_segments(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}
