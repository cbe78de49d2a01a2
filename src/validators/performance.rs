//! Performance validator: N+1 queries, nested loops, unindexed foreign keys
//! and unbounded caches.

use super::test_coverage::is_test_file;
use super::{build_globset, parse_source, source::compile, SourceFile, Validator, ValidatorKind};
use crate::changes::ChangeSet;
use crate::error::{GateError, Result};
use crate::finding::{Category, Finding, Severity};
use globset::GlobSet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const N_PLUS_ONE_QUERY: &str = "n-plus-one-query";
pub const UNBOUNDED_CACHE: &str = "unbounded-cache";
pub const NESTED_LOOP: &str = "nested-loop";
pub const INEFFICIENT_ITERATION: &str = "inefficient-iteration";
pub const MISSING_INDEX: &str = "missing-index";

/// Parameters accepted under `validators.performance.parameters`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PerformanceSettings {
    /// Additional function names treated as database or network queries.
    pub extra_query_calls: Vec<String>,
    /// Loop bodies are scanned for at most this many lines.
    pub max_block_lines: usize,
    pub exclude: Vec<String>,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            extra_query_calls: Vec::new(),
            max_block_lines: 200,
            exclude: Vec::new(),
        }
    }
}

/// A loop header and the extent of its body.
struct LoopBlock {
    index: usize,
    end: usize,
    /// The iterated expression, when the loop iterates a collection.
    iter: Option<String>,
    /// Code following the header on the same line.
    tail: String,
}

/// Heuristic detector for per-item queries and caches that only grow.
///
/// Queries are recognised by call names, not by tracing data flow, so an
/// in-memory `.find(` inside a loop over query results is reported too.
pub struct PerformanceValidator {
    max_block_lines: usize,
    exclude: GlobSet,
    query_calls: Vec<Regex>,
    iter_loops: Vec<Regex>,
    other_loops: Vec<Regex>,
    assignment: Regex,
    map_declaration: Regex,
    bound_markers: Regex,
    index_by_position: Regex,
    foreign_key: Regex,
    index_marker: Regex,
    index_disabled: Regex,
}

impl PerformanceValidator {
    /// # Errors
    ///
    /// Returns a configuration error for invalid globs, a zero block limit,
    /// or a query call name that does not form a valid pattern.
    pub fn new(settings: PerformanceSettings) -> Result<Self> {
        let field = "validators.performance.parameters";
        if settings.max_block_lines == 0 {
            return Err(GateError::invalid_config(
                format!("{}.max_block_lines", field),
                "must be at least 1",
            ));
        }

        let mut query_calls = compile(&[
            r"\.(?:query|execute|executemany|fetch\w*|find\w*|select|filter|filter_by|aggregate|raw|get_object_or_404|QueryRow\w*|Query\w*|Exec\w*)\s*\(",
            r"(?:^|[^\w.])(?:fetch|get_object_or_404)\s*\(",
            r"\.objects\.",
        ]);
        for name in &settings.extra_query_calls {
            let re = Regex::new(&format!(r"\b{}\s*\(", regex::escape(name))).map_err(|e| {
                GateError::invalid_config(format!("{}.extra_query_calls", field), e.to_string())
            })?;
            query_calls.push(re);
        }

        let regex = |pattern: &str| {
            Regex::new(pattern).map_err(|e| GateError::Other(e.into()))
        };

        Ok(Self {
            max_block_lines: settings.max_block_lines,
            exclude: build_globset(&format!("{}.exclude", field), &settings.exclude)?,
            query_calls,
            iter_loops: compile(&[
                r"^\s*(?:async\s+)?for\s+.+?\s+in\s+(?P<iter>.+?)\s*:\s*(?:#.*)?$",
                r"^\s*for\s*\(\s*(?:const|let|var)\s+[\w\[\]{}, ]+?\s+(?:of|in)\s+(?P<iter>[^)]+)\)",
                r"^\s*for\s*\(\s*[\w<>\[\], .]+\s+\w+\s*:\s*(?P<iter>[^)]+)\)",
                r"^\s*for\s+(?:mut\s+)?[\w(), ]+?\s+in\s+(?P<iter>.+?)\s*\{",
                r"^\s*for\s+.*?range\s+(?P<iter>[^{]+?)\s*\{",
                r"(?P<iter>[\w.]+(?:\([^)]*\))?)\.(?:forEach|map|each)\s*\(",
            ]),
            other_loops: compile(&[r"^\s*while\b", r"^\s*loop\s*\{", r"^\s*do\s*\{"]),
            assignment: regex(
                r"^\s*(?:(?:const|let|var|val|final)\s+)?(?:mut\s+)?(?:[\w<>\[\], ]+?\s+)?(?P<var>\w+)(?:\s*,\s*\w+)*\s*(?::[^=]*)?(?::=|=)\s*(?P<rhs>[^=].*)$",
            )?,
            map_declaration: regex(
                r"^(?P<indent>\s*)(?:(?:pub(?:\([^)]*\))?|static|const|let|var|val|private|public|protected|final)\s+)*(?:mut\s+)?(?:[\w<>\[\], .]+?\s+)?(?P<name>\w+)\s*(?::[^=]+)?(?::=|=)\s*.*?(?:\{\s*\}|dict\s*\(\s*\)|defaultdict\s*\(|OrderedDict\s*\(\s*\)|new\s+(?:Map|WeakMap|HashMap|LinkedHashMap|TreeMap|ConcurrentHashMap)\b|(?:Hash|BTree)Map::(?:new|with_capacity)\s*\(|make\s*\(\s*map\[|map\[[^\]]+\][\w.*]+\s*\{\s*\}|Object\.create\(null\))",
            )?,
            bound_markers: regex(
                r"(?i)\b(?:lru_cache|lrucache|lru|maxsize|max_size|max_entries|ttlcache|ttl_cache|expire\w*|evict\w*)\b",
            )?,
            index_by_position: regex(r"\bin\s+range\s*\(\s*len\s*\(\s*(?P<seq>[\w.]+)\s*\)\s*\)")?,
            foreign_key: regex(r"(?P<prefix>\bmodels\.)?\bForeignKey\s*\(")?,
            index_marker: regex(r"\b(?:db_)?index\s*=\s*True\b")?,
            index_disabled: regex(r"\bdb_index\s*=\s*False\b")?,
        })
    }

    fn is_query(&self, code: &str) -> bool {
        self.query_calls.iter().any(|re| re.is_match(code))
    }

    fn loops(&self, file: &SourceFile<'_>) -> Vec<LoopBlock> {
        let mut blocks = Vec::new();
        for (idx, line) in file.lines().iter().enumerate() {
            if file.is_comment(line) {
                continue;
            }
            let code = file.code_of(line);
            let header = self
                .iter_loops
                .iter()
                .find_map(|re| re.captures(&code))
                .map(|caps| {
                    let end = caps.get(0).map_or(code.len(), |m| m.end());
                    (Some(caps["iter"].trim().to_string()), code[end..].to_string())
                })
                .or_else(|| {
                    self.other_loops
                        .iter()
                        .any(|re| re.is_match(&code))
                        .then(|| (None, String::new()))
                });
            if let Some((iter, tail)) = header {
                let end = file
                    .block_end(idx)
                    .min(idx + self.max_block_lines);
                blocks.push(LoopBlock {
                    index: idx,
                    end,
                    iter,
                    tail,
                });
            }
        }
        blocks
    }

    fn check_n_plus_one(
        &self,
        file: &SourceFile<'_>,
        loops: &[LoopBlock],
        findings: &mut Vec<Finding>,
    ) {
        // Variables assigned from a query, by the line they were assigned on.
        let mut query_vars: BTreeMap<String, usize> = BTreeMap::new();
        for (idx, line) in file.lines().iter().enumerate() {
            if file.is_comment(line) {
                continue;
            }
            let code = file.code_of(line);
            if let Some(caps) = self.assignment.captures(&code) {
                if self.is_query(&caps["rhs"]) {
                    query_vars.insert(caps["var"].to_string(), idx);
                }
            }
        }

        for block in loops {
            let Some(iter) = &block.iter else {
                continue;
            };
            let from_query = self.is_query(iter)
                || iter
                    .split(|c: char| !(c.is_alphanumeric() || c == '_'))
                    .any(|token| query_vars.get(token).is_some_and(|at| *at < block.index));
            if !from_query {
                continue;
            }

            let inner = std::iter::once((block.index, block.tail.clone())).chain(
                file.lines()
                    .iter()
                    .enumerate()
                    .skip(block.index + 1)
                    .take(block.end.saturating_sub(block.index))
                    .filter(|(_, l)| !file.is_comment(l))
                    .map(|(idx, l)| (idx, file.code_of(l))),
            );
            let Some((query_idx, _)) = inner.into_iter().find(|(_, code)| self.is_query(code))
            else {
                continue;
            };

            findings.push(
                Finding::new(
                    Category::Performance,
                    Severity::Medium,
                    N_PLUS_ONE_QUERY,
                    format!(
                        "Query on line {} runs once per item of '{}'",
                        query_idx + 1,
                        iter
                    ),
                )
                .with_location(file.path(), line_number(block.index))
                .with_suggested_fix(
                    "Load the related rows in one query before the loop (eager loading, an IN clause or a batch lookup)",
                ),
            );
        }
    }

    /// A collection loop inside another collection loop. Reported once per
    /// inner loop.
    fn check_nested_loops(
        &self,
        file: &SourceFile<'_>,
        loops: &[LoopBlock],
        findings: &mut Vec<Finding>,
    ) {
        for inner in loops.iter().filter(|b| b.iter.is_some()) {
            let outer = loops.iter().find(|outer| {
                outer.iter.is_some() && outer.index < inner.index && inner.index <= outer.end
            });
            let (Some(outer), Some(iter)) = (outer, &inner.iter) else {
                continue;
            };
            findings.push(
                Finding::new(
                    Category::Performance,
                    Severity::Medium,
                    NESTED_LOOP,
                    format!(
                        "Loop over '{}' nested in the loop on line {}: quadratic in the input size",
                        iter,
                        outer.index + 1
                    ),
                )
                .with_location(file.path(), line_number(inner.index))
                .with_suggested_fix("Index one side in a dict or set and look items up instead of scanning"),
            );
        }

        for (idx, line) in file.lines().iter().enumerate() {
            if file.is_comment(line) {
                continue;
            }
            if let Some(caps) = self.index_by_position.captures(line) {
                findings.push(
                    Finding::new(
                        Category::Performance,
                        Severity::Low,
                        INEFFICIENT_ITERATION,
                        format!("Iterating '{}' by index with range(len(...))", &caps["seq"]),
                    )
                    .with_location(file.path(), line_number(idx))
                    .with_suggested_fix("Iterate directly, or use enumerate() when the index is needed"),
                );
            }
        }
    }

    /// Foreign keys in model files declared without an index. Django's
    /// `models.ForeignKey` is indexed unless `db_index=False`.
    fn check_missing_indexes(&self, file: &SourceFile<'_>, findings: &mut Vec<Finding>) {
        if !is_model_file(file.path()) {
            return;
        }
        let lines = file.lines();
        for (idx, line) in lines.iter().enumerate() {
            if file.is_comment(line) {
                continue;
            }
            let Some(caps) = self.foreign_key.captures(line) else {
                continue;
            };
            let unindexed = if caps.name("prefix").is_some() {
                self.index_disabled.is_match(line)
            } else {
                let context = lines[idx.saturating_sub(1)..(idx + 2).min(lines.len())].join("\n");
                !self.index_marker.is_match(&context)
            };
            if !unindexed {
                continue;
            }
            findings.push(
                Finding::new(
                    Category::Performance,
                    Severity::Medium,
                    MISSING_INDEX,
                    "Foreign key column without a database index",
                )
                .with_location(file.path(), line_number(idx))
                .with_suggested_fix("Add index=True (or db_index=True) so joins and lookups on this column use an index"),
            );
        }
    }

    fn check_unbounded_caches(
        &self,
        file: &SourceFile<'_>,
        loops: &[LoopBlock],
        findings: &mut Vec<Finding>,
    ) {
        let lines = file.lines();
        let bounded_file = lines
            .iter()
            .any(|l| self.bound_markers.is_match(l));
        if bounded_file {
            return;
        }

        for (idx, line) in lines.iter().enumerate() {
            if file.is_comment(line) {
                continue;
            }
            let Some(caps) = self.map_declaration.captures(line) else {
                continue;
            };
            let name = &caps["name"];
            let lower = name.to_lowercase();
            let module_level = caps["indent"].is_empty();
            if !(module_level || lower.contains("cache") || lower.contains("memo")) {
                continue;
            }

            let Some((insert, evict)) = name_patterns(name) else {
                continue;
            };
            let populated_in_loop = loops.iter().any(|block| {
                (block.index..=block.end).any(|i| {
                    i != idx && lines.get(i).is_some_and(|l| insert.is_match(&file.code_of(l)))
                })
            });
            if !populated_in_loop {
                continue;
            }
            if lines.iter().any(|l| evict.iter().any(|re| re.is_match(l))) {
                continue;
            }

            findings.push(
                Finding::new(
                    Category::Performance,
                    Severity::Medium,
                    UNBOUNDED_CACHE,
                    format!("'{}' grows inside a loop and is never evicted or bounded", name),
                )
                .with_location(file.path(), line_number(idx))
                .with_suggested_fix("Use an LRU/TTL cache or cap the size and evict old entries"),
            );
        }
    }
}

impl Validator for PerformanceValidator {
    fn kind(&self) -> ValidatorKind {
        ValidatorKind::Performance
    }

    fn inspect(&self, changes: &ChangeSet) -> Vec<Finding> {
        let mut findings = Vec::new();
        for (path, content) in changes.changed_files() {
            if self.exclude.is_match(path) || super::SourceLanguage::from_path(path).is_none() {
                continue;
            }
            match parse_source(Category::Performance, path, content) {
                Ok(file) => {
                    let loops = self.loops(&file);
                    self.check_n_plus_one(&file, &loops, &mut findings);
                    if !is_test_file(path) {
                        self.check_nested_loops(&file, &loops, &mut findings);
                    }
                    self.check_missing_indexes(&file, &mut findings);
                    self.check_unbounded_caches(&file, &loops, &mut findings);
                }
                Err(finding) => findings.push(finding),
            }
        }
        findings
    }
}

/// Insertion pattern and eviction/size-check patterns for a named map.
fn name_patterns(name: &str) -> Option<(Regex, Vec<Regex>)> {
    let n = regex::escape(name);
    let insert = Regex::new(&format!(
        r"\b{n}\s*\[[^\]]*\]\s*(?:=[^=]|\|\|=|\?\?=)|\b{n}(?:\.\w+\(\))*\.(?:set|insert|put|setdefault|update|add|entry|putIfAbsent|computeIfAbsent)\s*\("
    ))
    .ok()?;
    let evict: Vec<String> = vec![
        format!(r"\b{n}(?:\.\w+\(\))*\.(?:clear|pop|popitem|remove|delete|evict|truncate|retain|shift)\s*\("),
        format!(r"\bdel\s+{n}\s*\["),
        format!(r"\bdelete\s*\(\s*{n}\s*,"),
        format!(r"\blen\(\s*{n}\s*\)"),
        format!(r"\b{n}(?:\.\w+\(\))*\.(?:size|length|len\(\))"),
    ];
    let evict = compile(&evict.iter().map(String::as_str).collect::<Vec<_>>());
    Some((insert, evict))
}

fn is_model_file(path: &str) -> bool {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    path.split('/').any(|segment| segment == "models")
        || matches!(file_name, "model.py" | "models.py")
}

fn line_number(index: usize) -> u32 {
    u32::try_from(index + 1).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inspect(path: &str, content: &str) -> Vec<Finding> {
        let validator = PerformanceValidator::new(PerformanceSettings::default()).unwrap();
        validator.inspect(&ChangeSet::new("t", "").with_changed(path, content))
    }

    fn rules(findings: &[Finding]) -> Vec<&str> {
        findings.iter().map(Finding::rule_id).collect()
    }

    #[test]
    fn test_python_n_plus_one() {
        let content = "\
def report(session):
    users = session.query(User).all()
    for user in users:
        orders = session.query(Order).filter_by(user_id=user.id).all()
        print(len(orders))
";
        let findings = inspect("report.py", content);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule_id(), N_PLUS_ONE_QUERY);
        assert_eq!(findings[0].severity(), Severity::Medium);
        assert_eq!(findings[0].line_number(), Some(3));
        assert!(findings[0].message().contains("line 4"));
    }

    #[test]
    fn test_loop_over_plain_collection_passes() {
        let content = "\
def seed(session):
    for name in ['a', 'b']:
        session.query(User).filter_by(name=name).first()
";
        assert!(inspect("seed.py", content).is_empty());
    }

    #[test]
    fn test_loop_without_query_passes() {
        let content = "\
users = session.query(User).all()
for user in users:
    print(user.name)
";
        assert!(inspect("list.py", content).is_empty());
    }

    #[test]
    fn test_javascript_for_of() {
        let content = "\
async function load(db) {
  const users = await db.findAll();
  for (const u of users) {
    const orders = await db.query('SELECT * FROM orders WHERE user_id = ?', [u.id]);
  }
}
";
        let findings = inspect("load.js", content);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].line_number(), Some(3));
    }

    #[test]
    fn test_inline_query_with_callback() {
        let content = "db.findAll().forEach(u => db.findById(u.managerId));\n";
        let findings = inspect("mgr.js", content);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].line_number(), Some(1));
    }

    #[test]
    fn test_go_range_over_rows() {
        let content = "\
func Load(db *sql.DB) {
    rows, err := db.Query(\"SELECT id FROM users\")
    for _, r := range rows {
        db.QueryRow(\"SELECT * FROM orders WHERE id = ?\", r)
    }
}
";
        let findings = inspect("load.go", content);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].line_number(), Some(3));
    }

    #[test]
    fn test_unbounded_cache() {
        let content = "\
_cache = {}

def warm(ids):
    for i in ids:
        _cache[i] = compute(i)
";
        let findings = inspect("warm.py", content);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule_id(), UNBOUNDED_CACHE);
        assert_eq!(findings[0].line_number(), Some(1));
    }

    #[test]
    fn test_cache_with_eviction_passes() {
        let content = "\
_cache = {}

def warm(ids):
    for i in ids:
        if len(_cache) > 1000:
            _cache.clear()
        _cache[i] = compute(i)
";
        assert!(inspect("warm.py", content).is_empty());
    }

    #[test]
    fn test_lru_marker_passes() {
        let content = "\
from functools import lru_cache
memo = {}
for k in keys:
    memo[k] = 1
";
        assert!(inspect("m.py", content).is_empty());
    }

    #[test]
    fn test_local_result_map_passes() {
        let content = "\
def index(items):
    result = {}
    for item in items:
        result[item.id] = item
    return result
";
        assert!(inspect("idx.py", content).is_empty());
    }

    #[test]
    fn test_javascript_map_cache() {
        let content = "\
const cache = new Map();
export function prime(keys) {
  for (const k of keys) {
    cache.set(k, build(k));
  }
}
";
        let findings = inspect("prime.js", content);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule_id(), UNBOUNDED_CACHE);
    }

    #[test]
    fn test_nested_loops() {
        let content = "\
def pairs(users, groups):
    for user in users:
        for group in groups:
            if user.group_id == group.id:
                yield user, group
";
        let findings = inspect("pairs.py", content);
        assert_eq!(rules(&findings), vec![NESTED_LOOP]);
        assert_eq!(findings[0].line_number(), Some(3));
        assert!(findings[0].message().contains("line 2"));
    }

    #[test]
    fn test_sequential_loops_pass() {
        let content = "\
def index(users, groups):
    by_id = {}
    for group in groups:
        by_id[group.id] = group
    for user in users:
        print(by_id.get(user.group_id))
";
        assert!(inspect("index.py", content).is_empty());
    }

    #[test]
    fn test_nested_loops_in_tests_pass() {
        let content = "\
def test_pairs():
    for a in [1, 2]:
        for b in [3, 4]:
            assert a < b
";
        assert!(inspect("tests/test_pairs.py", content).is_empty());
    }

    #[test]
    fn test_range_len_iteration() {
        let content = "for i in range(len(items)):\n    print(items[i])\n";
        let findings = inspect("walk.py", content);
        assert_eq!(rules(&findings), vec![INEFFICIENT_ITERATION]);
        assert_eq!(findings[0].severity(), Severity::Low);
    }

    #[test]
    fn test_foreign_key_without_index() {
        let content = "\
class Order(Base):
    id = Column(Integer, primary_key=True)
    user_id = Column(Integer, ForeignKey('users.id'))

    store_id = Column(Integer, ForeignKey('stores.id'), index=True)
";
        let findings = inspect("app/models/order.py", content);
        assert_eq!(rules(&findings), vec![MISSING_INDEX]);
        assert_eq!(findings[0].line_number(), Some(3));
    }

    #[test]
    fn test_foreign_key_outside_models_passes() {
        let content = "user_id = Column(Integer, ForeignKey('users.id'))\n";
        assert!(inspect("app/schema.py", content).is_empty());
    }

    #[test]
    fn test_django_foreign_key_indexed_by_default() {
        let content = "\
class Order(models.Model):
    user = models.ForeignKey(User, on_delete=models.CASCADE)
    store = models.ForeignKey(Store, on_delete=models.CASCADE, db_index=False)
";
        let findings = inspect("shop/models.py", content);
        assert_eq!(rules(&findings), vec![MISSING_INDEX]);
        assert_eq!(findings[0].line_number(), Some(3));
    }

    #[test]
    fn test_extra_query_calls() {
        let settings = PerformanceSettings {
            extra_query_calls: vec!["load_user".into()],
            ..Default::default()
        };
        let validator = PerformanceValidator::new(settings).unwrap();
        let content = "ids = load_user(all=True)\nfor i in ids:\n    load_user(i)\n";
        let findings = validator.inspect(&ChangeSet::new("t", "").with_changed("u.py", content));
        assert_eq!(findings.len(), 1);
    }

    #[test]
    fn test_zero_block_lines_rejected() {
        let settings = PerformanceSettings {
            max_block_lines: 0,
            ..Default::default()
        };
        let err = PerformanceValidator::new(settings).err().unwrap();
        assert!(err.is_configuration());
    }
}
