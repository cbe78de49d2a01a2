//! Line-oriented source heuristics shared by the validators.
//!
//! This is deliberately not a parser. A [`SourceFile`] recognises definitions,
//! imports and block extents with per-language regular expressions, which is
//! enough to compare public signatures between two versions of a file and to
//! reason about loop bodies. Content that defeats even these heuristics is
//! reported as a [`ParseError`].

use regex::{Captures, Regex};
use std::sync::OnceLock;
use thiserror::Error;

/// Parameter lists left open for this many lines make a file unparseable.
const MAX_HEADER_LINES: usize = 50;

/// Annotations such as `layer:` are only honoured this close to the top.
const ANNOTATION_SCAN_LINES: usize = 10;

/// A file the heuristics could not make sense of.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ParseError {
    pub reason: String,
}

impl ParseError {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Languages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceLanguage {
    Python,
    JavaScript,
    TypeScript,
    Rust,
    Go,
    Java,
}

impl SourceLanguage {
    /// Detect the language from a path's extension.
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        let ext = path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())?;
        match ext.as_str() {
            "py" | "pyi" => Some(Self::Python),
            "js" | "jsx" | "mjs" | "cjs" => Some(Self::JavaScript),
            "ts" | "tsx" | "mts" | "cts" => Some(Self::TypeScript),
            "rs" => Some(Self::Rust),
            "go" => Some(Self::Go),
            "java" => Some(Self::Java),
            _ => None,
        }
    }

    /// Whether blocks are delimited by indentation rather than braces.
    #[must_use]
    pub fn is_indented(&self) -> bool {
        matches!(self, Self::Python)
    }

    fn line_comment(&self) -> &'static str {
        match self {
            Self::Python => "#",
            _ => "//",
        }
    }

    fn string_delimiters(&self) -> &'static [char] {
        match self {
            Self::Python => &['"', '\''],
            Self::JavaScript | Self::TypeScript => &['"', '\'', '`'],
            Self::Rust => &['"'],
            Self::Go => &['"', '`'],
            Self::Java => &['"', '\''],
        }
    }

    fn grammar(&self) -> &'static Grammar {
        static PYTHON: OnceLock<Grammar> = OnceLock::new();
        static SCRIPT: OnceLock<Grammar> = OnceLock::new();
        static RUST: OnceLock<Grammar> = OnceLock::new();
        static GO: OnceLock<Grammar> = OnceLock::new();
        static JAVA: OnceLock<Grammar> = OnceLock::new();

        match self {
            Self::Python => PYTHON.get_or_init(Grammar::python),
            Self::JavaScript | Self::TypeScript => SCRIPT.get_or_init(Grammar::script),
            Self::Rust => RUST.get_or_init(Grammar::rust),
            Self::Go => GO.get_or_init(Grammar::go),
            Self::Java => JAVA.get_or_init(Grammar::java),
        }
    }
}

/// Compile a pattern list, silently dropping any pattern that fails.
pub(crate) fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
}

fn first_captures<'t>(regexes: &[Regex], text: &'t str) -> Option<Captures<'t>> {
    regexes.iter().find_map(|re| re.captures(text))
}

/// Per-language definition and import patterns.
///
/// Function and class patterns expose `indent` and `name` groups, plus
/// optional `vis`, `ret` and `recv` groups. Function patterns end at the
/// opening parenthesis of the parameter list.
struct Grammar {
    functions: Vec<Regex>,
    classes: Vec<Regex>,
    containers: Vec<Regex>,
    imports: Vec<Regex>,
}

impl Grammar {
    fn python() -> Self {
        Self {
            functions: compile(&[r"^(?P<indent>\s*)(?:async\s+)?def\s+(?P<name>\w+)\s*\("]),
            classes: compile(&[r"^(?P<indent>\s*)class\s+(?P<name>\w+)\s*[:(]"]),
            containers: Vec::new(),
            imports: compile(&[
                r"^\s*from\s+(?P<module>\.*[\w.]*)\s+import\b",
                r"^\s*import\s+(?P<module>[\w.]+(?:\s*,\s*[\w.]+)*)",
            ]),
        }
    }

    fn script() -> Self {
        Self {
            functions: compile(&[
                r"^(?P<indent>\s*)(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(?P<name>[\w$]+)\s*(?:<[^(]*>)?\s*\(",
                r"^(?P<indent>\s*)(?:export\s+)?(?:const|let|var)\s+(?P<name>[\w$]+)\s*(?::[^=]+)?=\s*(?:async\s+)?(?:function\s*)?\(",
                r"^(?P<indent>\s+)(?P<vis>(?:(?:public|private|protected|static|async|readonly|override|get|set)\s+)*)(?P<name>#?[\w$]+)\s*(?:<[^(]*>)?\s*\(",
            ]),
            classes: compile(&[
                r"^(?P<indent>\s*)(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+(?P<name>[\w$]+)",
                r"^(?P<indent>\s*)(?:export\s+)?interface\s+(?P<name>[\w$]+)",
            ]),
            containers: Vec::new(),
            imports: compile(&[
                r#"^\s*import\s+(?:.+?\s+from\s+)?['"](?P<module>[^'"]+)['"]"#,
                r#"^\s*export\s+.+?\s+from\s+['"](?P<module>[^'"]+)['"]"#,
                r#"require\(\s*['"](?P<module>[^'"]+)['"]\s*\)"#,
            ]),
        }
    }

    fn rust() -> Self {
        Self {
            functions: compile(&[
                r#"^(?P<indent>\s*)(?P<vis>pub(?:\([^)]*\))?\s+)?(?:default\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?(?:extern\s+"[^"]*"\s+)?fn\s+(?P<name>\w+)\s*(?:<[^(]*>)?\s*\("#,
            ]),
            classes: compile(&[
                r"^(?P<indent>\s*)(?P<vis>pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait|union)\s+(?P<name>\w+)",
            ]),
            containers: compile(&[
                r"^(?P<indent>\s*)impl(?:<[^{]*?>)?\s+(?:[\w:<>, ]+?\s+for\s+)?(?P<name>\w+)",
            ]),
            imports: compile(&[r"^\s*(?:pub(?:\([^)]*\))?\s+)?use\s+(?P<module>[\w:]+)"]),
        }
    }

    fn go() -> Self {
        Self {
            functions: compile(&[
                r"^(?P<indent>)func\s+(?:\((?P<recv>[^)]*)\)\s*)?(?P<name>\w+)\s*(?:\[[^\]]*\])?\s*\(",
            ]),
            classes: compile(&[r"^(?P<indent>)type\s+(?P<name>\w+)\s+(?:struct|interface)\b"]),
            containers: Vec::new(),
            imports: compile(&[
                r#"^\s*import\s+(?:[\w.]+\s+)?"(?P<module>[^"]+)""#,
            ]),
        }
    }

    fn java() -> Self {
        Self {
            functions: compile(&[
                r"^(?P<indent>\s*)(?P<vis>(?:(?:public|protected|private|static|final|abstract|synchronized|native|default)\s+)*)(?:<[^>]+>\s+)?(?P<ret>[\w$.<>\[\],?]+(?:\s*<[^(]*>)?)\s+(?P<name>[\w$]+)\s*\(",
            ]),
            classes: compile(&[
                r"^(?P<indent>\s*)(?P<vis>(?:(?:public|protected|private|static|final|abstract|sealed)\s+)*)(?:class|interface|enum|record)\s+(?P<name>\w+)",
            ]),
            containers: Vec::new(),
            imports: compile(&[r"^\s*import\s+(?:static\s+)?(?P<module>[\w.]+)"]),
        }
    }
}

const CONTROL_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "function", "new", "else", "throw",
    "match", "loop", "typeof", "await", "yield", "super", "do", "try", "case", "with",
    "elif", "except", "assert", "print", "import", "from", "delete", "void", "sizeof",
];

// ============================================================================
// Definitions and imports
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionKind {
    Function,
    Method,
    Class,
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    /// Has a default value, is marked optional, or is variadic.
    pub optional: bool,
}

/// A function, method or type declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    pub name: String,
    /// `Container.name` for methods, `name` otherwise.
    pub qualified: String,
    pub kind: DefinitionKind,
    pub params: Vec<Param>,
    pub return_type: Option<String>,
    /// 1-based line of the declaration.
    pub line: u32,
    pub is_public: bool,
    /// 0-based index of the last line of the body.
    pub end_index: usize,
}

impl Definition {
    /// Whether this is a callable (function or method).
    #[must_use]
    pub fn is_callable(&self) -> bool {
        !matches!(self.kind, DefinitionKind::Class)
    }

    /// `name(a, b?, ...)` style rendering for messages.
    #[must_use]
    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| {
                if p.optional {
                    format!("{}?", p.name)
                } else {
                    p.name.clone()
                }
            })
            .collect();
        match &self.return_type {
            Some(ret) => format!("{}({}) -> {}", self.qualified, params.join(", "), ret),
            None => format!("{}({})", self.qualified, params.join(", ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    /// Module path as written (`app.services.user`, `../repo`, `crate::db`).
    pub module: String,
    pub line: u32,
}

// ============================================================================
// SourceFile
// ============================================================================

/// A file's content with its recognised definitions and imports.
#[derive(Debug, Clone)]
pub struct SourceFile<'a> {
    path: &'a str,
    language: Option<SourceLanguage>,
    lines: Vec<&'a str>,
    definitions: Vec<Definition>,
    imports: Vec<Import>,
}

impl<'a> SourceFile<'a> {
    /// Analyse `content`.
    ///
    /// Files in unrecognised languages parse successfully with no definitions
    /// or imports, so line-based rules still apply to them.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] for binary content or a parameter list that is
    /// never closed.
    pub fn parse(path: &'a str, content: &'a str) -> Result<Self, ParseError> {
        if content.contains('\0') {
            return Err(ParseError::new("binary content"));
        }

        let mut file = Self {
            path,
            language: SourceLanguage::from_path(path),
            lines: content.lines().collect(),
            definitions: Vec::new(),
            imports: Vec::new(),
        };

        if let Some(language) = file.language {
            file.definitions = file.extract_definitions(language)?;
            file.imports = file.extract_imports(language);
        }

        Ok(file)
    }

    /// The file's lines without any definitions or imports, for line-based
    /// rules on content whose structure could not be extracted. `None` for
    /// binary content.
    #[must_use]
    pub fn lines_only(path: &'a str, content: &'a str) -> Option<Self> {
        (!content.contains('\0')).then(|| Self {
            path,
            language: SourceLanguage::from_path(path),
            lines: content.lines().collect(),
            definitions: Vec::new(),
            imports: Vec::new(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.path
    }

    #[must_use]
    pub fn language(&self) -> Option<SourceLanguage> {
        self.language
    }

    #[must_use]
    pub fn lines(&self) -> &[&'a str] {
        &self.lines
    }

    #[must_use]
    pub fn definitions(&self) -> &[Definition] {
        &self.definitions
    }

    /// Public functions and methods.
    pub fn public_callables(&self) -> impl Iterator<Item = &Definition> {
        self.definitions
            .iter()
            .filter(|d| d.is_public && d.is_callable())
    }

    /// Public functions, methods and types.
    pub fn public_symbols(&self) -> impl Iterator<Item = &Definition> {
        self.definitions.iter().filter(|d| d.is_public)
    }

    #[must_use]
    pub fn imports(&self) -> &[Import] {
        &self.imports
    }

    /// Whether a line is a comment in this file's language.
    #[must_use]
    pub fn is_comment(&self, line: &str) -> bool {
        let trimmed = line.trim_start();
        match self.language {
            Some(SourceLanguage::Python) => trimmed.starts_with('#'),
            Some(_) => {
                trimmed.starts_with("//") || trimmed.starts_with("/*") || trimmed.starts_with('*')
            }
            None => trimmed.starts_with('#') || trimmed.starts_with("//"),
        }
    }

    /// Value of a `key: value` annotation in a comment near the top of the
    /// file, e.g. `# layer: service`.
    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<String> {
        let pattern = format!(r"(?i)\b{}\s*:\s*([\w-]+)", regex::escape(key));
        let re = Regex::new(&pattern).ok()?;
        self.lines
            .iter()
            .take(ANNOTATION_SCAN_LINES)
            .filter(|l| self.is_comment(l))
            .find_map(|l| re.captures(l).map(|c| c[1].to_string()))
    }

    /// Line with string literal contents removed.
    #[must_use]
    pub fn code_of(&self, line: &str) -> String {
        let delimiters = self.language.map_or(&['"', '\''][..], |l| l.string_delimiters());
        strip_strings(line, delimiters)
    }

    /// 0-based index of the last line of the block opened at `index`.
    ///
    /// Indentation decides for Python and unknown languages; braces decide
    /// otherwise. A line that opens no block is its own extent.
    #[must_use]
    pub fn block_end(&self, index: usize) -> usize {
        self.block_end_from(index, index)
    }

    fn block_end_from(&self, start: usize, header_end: usize) -> usize {
        if start >= self.lines.len() {
            return start;
        }
        match self.language {
            Some(lang) if !lang.is_indented() => self.brace_block_end(start, header_end, lang),
            _ => self.indent_block_end(start, header_end),
        }
    }

    fn indent_block_end(&self, start: usize, header_end: usize) -> usize {
        let base = indent_of(self.lines[start]);
        let mut end = header_end;
        for (idx, line) in self.lines.iter().enumerate().skip(header_end + 1) {
            if line.trim().is_empty() {
                continue;
            }
            if indent_of(line) <= base {
                break;
            }
            end = idx;
        }
        end
    }

    fn brace_block_end(&self, start: usize, header_end: usize, lang: SourceLanguage) -> usize {
        let mut depth: i64 = 0;
        let mut parens: i64 = 0;
        let mut opened = false;
        for (idx, line) in self.lines.iter().enumerate().skip(start) {
            let code = strip_strings(line, lang.string_delimiters());
            let code = code.split(lang.line_comment()).next().unwrap_or("");
            for ch in code.chars() {
                match ch {
                    '(' => parens += 1,
                    ')' => parens -= 1,
                    '{' if parens <= 0 => {
                        depth += 1;
                        opened = true;
                    }
                    '}' if parens <= 0 => depth -= 1,
                    ';' if parens <= 0 && !opened && idx >= header_end => return idx,
                    _ => {}
                }
                if opened && depth <= 0 {
                    return idx;
                }
            }
            if !opened && idx >= header_end + 2 {
                return header_end;
            }
        }
        if opened {
            self.lines.len().saturating_sub(1)
        } else {
            header_end
        }
    }

    // =========================================================================
    // Extraction
    // =========================================================================

    fn extract_definitions(&self, lang: SourceLanguage) -> Result<Vec<Definition>, ParseError> {
        let grammar = lang.grammar();

        // Types and impl blocks first, so functions can be attributed to them.
        let mut containers: Vec<(usize, usize, String, bool)> = Vec::new();
        let mut definitions = Vec::new();

        for (idx, line) in self.lines.iter().enumerate() {
            if self.is_comment(line) {
                continue;
            }
            if let Some(caps) = first_captures(&grammar.classes, line) {
                let name = caps["name"].to_string();
                let is_public = is_public(lang, &name, caps.name("vis").map(|m| m.as_str()));
                let end = self.block_end(idx);
                containers.push((idx, end, name.clone(), is_public));
                definitions.push(Definition {
                    qualified: name.clone(),
                    name,
                    kind: DefinitionKind::Class,
                    params: Vec::new(),
                    return_type: None,
                    line: line_number(idx),
                    is_public,
                    end_index: end,
                });
            } else if let Some(caps) = first_captures(&grammar.containers, line) {
                let end = self.block_end(idx);
                containers.push((idx, end, caps["name"].to_string(), true));
            }
        }

        let mut functions: Vec<(usize, usize)> = Vec::new();
        for (idx, line) in self.lines.iter().enumerate() {
            if self.is_comment(line) {
                continue;
            }
            let Some(caps) = first_captures(&grammar.functions, line) else {
                continue;
            };
            let name = caps["name"].to_string();
            if CONTROL_KEYWORDS.contains(&name.as_str()) {
                continue;
            }
            if let Some(ret) = caps.name("ret") {
                if ret.as_str() != "void" && CONTROL_KEYWORDS.contains(&ret.as_str()) {
                    continue;
                }
            }

            let indent = caps.name("indent").map_or(0, |m| m.as_str().len());
            let container = containers
                .iter()
                .filter(|(start, end, _, _)| *start < idx && idx <= *end)
                .max_by_key(|(start, _, _, _)| *start);

            // Method-shaped matches must sit in a type and open a body,
            // otherwise they are calls.
            let method_shaped = match lang {
                SourceLanguage::JavaScript | SourceLanguage::TypeScript => caps.name("vis").is_some(),
                SourceLanguage::Java => true,
                _ => false,
            };
            let is_script = matches!(lang, SourceLanguage::JavaScript | SourceLanguage::TypeScript);
            if is_script && method_shaped && container.is_none() {
                continue;
            }

            let open = caps.get(0).map_or(0, |m| m.end()).saturating_sub(1);
            let (params_text, header_end, rest) = match self.collect_params(idx, open) {
                Ok(header) => header,
                // A call with a long argument list, not a definition.
                Err(_) if method_shaped => continue,
                Err(e) => return Err(e),
            };

            match lang {
                SourceLanguage::JavaScript | SourceLanguage::TypeScript
                    if method_shaped && !opens_body(&rest) =>
                {
                    continue
                }
                SourceLanguage::Java if !is_java_declaration(&rest) => continue,
                _ => {}
            }

            // Functions nested in other functions are not part of the API.
            if functions.iter().any(|(s, e)| *s < idx && idx <= *e) {
                continue;
            }

            let receiver = caps
                .name("recv")
                .and_then(|r| r.as_str().split_whitespace().last())
                .map(|t| t.trim_start_matches('*').to_string());

            let (kind, qualified, container_public) = match (&receiver, container) {
                (Some(recv), _) => (DefinitionKind::Method, format!("{}.{}", recv, name), true),
                (None, Some((_, _, cname, cpub))) => {
                    (DefinitionKind::Method, format!("{}.{}", cname, name), *cpub)
                }
                (None, None) if indent > 0 && lang.is_indented() => continue,
                (None, None) => (DefinitionKind::Function, name.clone(), true),
            };

            let vis = caps.name("vis").map(|m| m.as_str());
            let is_public = container_public && is_public(lang, &name, vis);
            let params = parse_params(lang, &params_text);
            let return_type = return_type(lang, &rest, caps.name("ret").map(|m| m.as_str()));
            let end = self.block_end_from(idx, header_end);

            functions.push((idx, end));
            definitions.push(Definition {
                name,
                qualified,
                kind,
                params,
                return_type,
                line: line_number(idx),
                is_public,
                end_index: end,
            });
        }

        definitions.sort_by_key(|d| d.line);
        Ok(definitions)
    }

    /// Text between the parentheses opened at `open` on line `start`, the
    /// index of the closing line, and the text following the `)`.
    fn collect_params(&self, start: usize, open: usize) -> Result<(String, usize, String), ParseError> {
        let delimiters = self
            .language
            .map_or(&['"', '\''][..], |l| l.string_delimiters());
        let mut depth = 0usize;
        let mut params = String::new();
        let mut quote: Option<char> = None;
        let mut escaped = false;

        for (idx, line) in self.lines.iter().enumerate().skip(start).take(MAX_HEADER_LINES) {
            let text = if idx == start { line.get(open..).unwrap_or("") } else { line };
            for (pos, ch) in text.char_indices() {
                if let Some(q) = quote {
                    params.push(ch);
                    if escaped {
                        escaped = false;
                    } else if ch == '\\' {
                        escaped = true;
                    } else if ch == q {
                        quote = None;
                    }
                    continue;
                }
                match ch {
                    c if delimiters.contains(&c) => {
                        quote = Some(c);
                        params.push(c);
                    }
                    '(' | '[' | '{' => {
                        depth += 1;
                        if depth > 1 {
                            params.push(ch);
                        }
                    }
                    ')' | ']' | '}' => {
                        depth = depth.saturating_sub(1);
                        if depth == 0 {
                            let rest = text.get(pos + 1..).unwrap_or("").to_string();
                            return Ok((params, idx, rest));
                        }
                        params.push(ch);
                    }
                    _ => params.push(ch),
                }
            }
            params.push(' ');
        }

        Err(ParseError::new(format!(
            "unterminated parameter list at line {}",
            start + 1
        )))
    }

    fn extract_imports(&self, lang: SourceLanguage) -> Vec<Import> {
        let grammar = lang.grammar();
        let mut imports = Vec::new();
        let mut in_go_block = false;

        for (idx, line) in self.lines.iter().enumerate() {
            if self.is_comment(line) {
                continue;
            }
            if lang == SourceLanguage::Go {
                let trimmed = line.trim();
                if trimmed.starts_with("import (") {
                    in_go_block = true;
                    continue;
                }
                if in_go_block {
                    if trimmed.starts_with(')') {
                        in_go_block = false;
                    } else if let Some(module) = trimmed.split('"').nth(1) {
                        imports.push(Import {
                            module: module.to_string(),
                            line: line_number(idx),
                        });
                    }
                    continue;
                }
            }
            for re in &grammar.imports {
                for caps in re.captures_iter(line) {
                    for module in caps["module"].split(',') {
                        let module = module.trim();
                        if !module.is_empty() {
                            imports.push(Import {
                                module: module.to_string(),
                                line: line_number(idx),
                            });
                        }
                    }
                }
            }
        }

        imports
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn line_number(index: usize) -> u32 {
    u32::try_from(index + 1).unwrap_or(u32::MAX)
}

/// Leading whitespace width, counting tabs as four columns.
#[must_use]
pub fn indent_of(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

/// Remove the contents of string literals, keeping the quotes.
#[must_use]
pub fn strip_strings(line: &str, delimiters: &[char]) -> String {
    let mut out = String::with_capacity(line.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for ch in line.chars() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == q {
                    quote = None;
                    out.push(ch);
                }
            }
            None => {
                if delimiters.contains(&ch) {
                    quote = Some(ch);
                }
                out.push(ch);
            }
        }
    }
    out
}

fn is_public(lang: SourceLanguage, name: &str, vis: Option<&str>) -> bool {
    let vis = vis.unwrap_or("").trim();
    match lang {
        SourceLanguage::Python => !name.starts_with('_'),
        SourceLanguage::JavaScript | SourceLanguage::TypeScript => {
            !name.starts_with('_')
                && !name.starts_with('#')
                && !vis.contains("private")
                && !vis.contains("protected")
        }
        SourceLanguage::Rust => vis == "pub",
        SourceLanguage::Go => name.chars().next().is_some_and(char::is_uppercase),
        SourceLanguage::Java => vis.split_whitespace().any(|m| m == "public"),
    }
}

fn opens_body(rest: &str) -> bool {
    let rest = rest.trim();
    rest.starts_with('{') || (rest.starts_with(':') && rest.ends_with('{'))
}

fn is_java_declaration(rest: &str) -> bool {
    let rest = rest.trim();
    rest.is_empty() || rest.starts_with('{') || rest.starts_with("throws") || rest == ";"
}

fn parse_params(lang: SourceLanguage, text: &str) -> Vec<Param> {
    split_top_level(text)
        .into_iter()
        .filter_map(|raw| parse_param(lang, raw.trim()))
        .collect()
}

fn parse_param(lang: SourceLanguage, raw: &str) -> Option<Param> {
    if raw.is_empty() {
        return None;
    }
    match lang {
        SourceLanguage::Python => {
            if raw == "*" || raw == "/" {
                return None;
            }
            let variadic = raw.starts_with('*');
            let name = raw
                .trim_start_matches('*')
                .split([':', '='])
                .next()
                .unwrap_or("")
                .trim();
            if name == "self" || name == "cls" {
                return None;
            }
            Some(Param {
                name: name.to_string(),
                optional: variadic || raw.contains('='),
            })
        }
        SourceLanguage::JavaScript | SourceLanguage::TypeScript => {
            let variadic = raw.starts_with("...");
            let body = raw.trim_start_matches("...");
            let head = body.split([':', '=']).next().unwrap_or("").trim();
            let marked = head.ends_with('?');
            let name = head
                .trim_end_matches('?')
                .split_whitespace()
                .last()
                .unwrap_or(head);
            Some(Param {
                name: name.to_string(),
                optional: variadic || marked || body.contains('='),
            })
        }
        SourceLanguage::Rust => {
            let head = raw.split(':').next().unwrap_or("").trim();
            let head = head.trim_start_matches("mut ").trim();
            if head.ends_with("self") {
                return None;
            }
            Some(Param {
                name: head.to_string(),
                optional: false,
            })
        }
        SourceLanguage::Go => {
            let name = raw.split_whitespace().next()?;
            Some(Param {
                name: name.to_string(),
                optional: raw.contains("..."),
            })
        }
        SourceLanguage::Java => {
            let cleaned: Vec<&str> = raw
                .split_whitespace()
                .filter(|t| !t.starts_with('@') && *t != "final")
                .collect();
            let name = cleaned.last()?;
            Some(Param {
                name: name.to_string(),
                optional: raw.contains("..."),
            })
        }
    }
}

fn return_type(lang: SourceLanguage, rest: &str, prefix: Option<&str>) -> Option<String> {
    static PYTHON: OnceLock<Vec<Regex>> = OnceLock::new();
    static RUST: OnceLock<Vec<Regex>> = OnceLock::new();
    static TYPESCRIPT: OnceLock<Vec<Regex>> = OnceLock::new();
    static GO: OnceLock<Vec<Regex>> = OnceLock::new();

    let regexes = match lang {
        SourceLanguage::Python => PYTHON.get_or_init(|| compile(&[r"^\s*->\s*(?P<ret>.+?)\s*:"])),
        SourceLanguage::Rust => {
            RUST.get_or_init(|| compile(&[r"^\s*->\s*(?P<ret>.+?)\s*(?:\{|\bwhere\b|;|$)"]))
        }
        SourceLanguage::TypeScript => {
            TYPESCRIPT.get_or_init(|| compile(&[r"^\s*:\s*(?P<ret>[^{=;]+?)\s*(?:\{|=>|;|$)"]))
        }
        SourceLanguage::Go => GO.get_or_init(|| compile(&[r"^\s*(?P<ret>[^{]+?)\s*(?:\{|$)"])),
        SourceLanguage::Java => {
            return prefix.map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "));
        }
        SourceLanguage::JavaScript => return None,
    };

    first_captures(regexes, rest)
        .map(|c| c["ret"].split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|r| !r.is_empty())
}

/// Split on commas not nested in brackets or string literals.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (pos, ch) in text.char_indices() {
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' | '`' => quote = Some(ch),
            '(' | '[' | '{' | '<' => depth += 1,
            ')' | ']' | '}' | '>' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&text[start..pos]);
                start = pos + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}
