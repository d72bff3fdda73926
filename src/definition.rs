//! Definition model: one parsed symbol plus the usages recorded next to it.
//!
//! A [`Definition`] carries the fields every symbol has (name, file, span,
//! scope) and a [`DefinitionDetail`] variant with the kind-specific metadata.
//! Identity is `(file, name, line_start)`; the same name in two files is two
//! definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Kind of an indexed symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionKind {
    Function,
    Class,
    Variable,
    Import,
}

impl DefinitionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DefinitionKind::Function => "function",
            DefinitionKind::Class => "class",
            DefinitionKind::Variable => "variable",
            DefinitionKind::Import => "import",
        }
    }
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filter applied by definition searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeFilter {
    #[default]
    Any,
    Function,
    Class,
    Variable,
    Import,
}

impl TypeFilter {
    pub fn accepts(self, kind: DefinitionKind) -> bool {
        match self {
            TypeFilter::Any => true,
            TypeFilter::Function => kind == DefinitionKind::Function,
            TypeFilter::Class => kind == DefinitionKind::Class,
            TypeFilter::Variable => kind == DefinitionKind::Variable,
            TypeFilter::Import => kind == DefinitionKind::Import,
        }
    }
}

impl FromStr for TypeFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "any" => Ok(TypeFilter::Any),
            "function" => Ok(TypeFilter::Function),
            "class" => Ok(TypeFilter::Class),
            "variable" => Ok(TypeFilter::Variable),
            "import" => Ok(TypeFilter::Import),
            other => Err(format!(
                "unknown definition type '{other}' (expected any, function, class, variable or import)"
            )),
        }
    }
}

/// One parsed symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    pub name: String,
    /// Path relative to the project (or library) root.
    pub file: PathBuf,
    /// 1-indexed first line, decorators included.
    pub line_start: usize,
    /// 1-indexed last line (inclusive).
    pub line_end: usize,
    /// Dotted name of the enclosing class/function, `None` at module level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(flatten)]
    pub detail: DefinitionDetail,
}

/// Kind-specific metadata, serialized with a `type` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DefinitionDetail {
    Function(FunctionInfo),
    Class(ClassInfo),
    Variable(VariableInfo),
    Import(ImportInfo),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub signature: String,
    /// Parameter names in declaration order (`*args`/`**kwargs` keep their stars).
    pub args: Vec<String>,
    pub is_async: bool,
    pub docstring: Option<String>,
    pub decorators: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClassInfo {
    pub methods: Vec<String>,
    pub inheritance: Vec<String>,
    pub docstring: Option<String>,
    pub decorators: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VariableInfo {
    pub value_type: String,
    pub is_constant: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStyle {
    /// `import a.b [as c]`
    Import,
    /// `from m import x [as y]`
    From,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportInfo {
    pub module: String,
    pub from_name: Option<String>,
    pub alias: Option<String>,
    pub import_type: ImportStyle,
}

impl Definition {
    pub fn kind(&self) -> DefinitionKind {
        match &self.detail {
            DefinitionDetail::Function(_) => DefinitionKind::Function,
            DefinitionDetail::Class(_) => DefinitionKind::Class,
            DefinitionDetail::Variable(_) => DefinitionKind::Variable,
            DefinitionDetail::Import(_) => DefinitionKind::Import,
        }
    }

    /// Single-line anchor for variables and imports.
    pub fn line(&self) -> usize {
        self.line_start
    }

    pub fn is_in(&self, file: &Path) -> bool {
        self.file == file
    }

    /// Whether the definition's span intersects `[start, end]` (1-indexed, inclusive).
    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        self.line_start <= end && start <= self.line_end
    }

    pub fn as_function(&self) -> Option<&FunctionInfo> {
        match &self.detail {
            DefinitionDetail::Function(info) => Some(info),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&ClassInfo> {
        match &self.detail {
            DefinitionDetail::Class(info) => Some(info),
            _ => None,
        }
    }

    /// Dotted name including the enclosing scope.
    pub fn qualified_name(&self) -> String {
        match &self.scope {
            Some(scope) => format!("{scope}.{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Short `kind name (file:line)` label used in warnings and logs.
    pub fn label(&self) -> String {
        format!(
            "{} '{}' ({}:{})",
            self.kind(),
            self.qualified_name(),
            self.file.display(),
            self.line_start
        )
    }
}

/// How a name is used at a call or reference site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageKind {
    Call,
    Reference,
}

/// One indexed call or reference to a name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub name: String,
    pub file: PathBuf,
    pub line: usize,
    pub kind: UsageKind,
    /// Argument count for calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arg_count: Option<usize>,
}

/// Everything the indexer extracts from one file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileSymbols {
    pub definitions: Vec<Definition>,
    pub usages: Vec<Usage>,
}

/// Python naming convention for constants: letters present, none lowercase.
pub fn is_constant_name(name: &str) -> bool {
    name.chars().any(|c| c.is_alphabetic()) && !name.chars().any(|c| c.is_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function(name: &str, line_start: usize, line_end: usize) -> Definition {
        Definition {
            name: name.to_string(),
            file: PathBuf::from("pkg/mod.py"),
            line_start,
            line_end,
            scope: None,
            detail: DefinitionDetail::Function(FunctionInfo {
                signature: format!("def {name}()"),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn constant_naming_convention() {
        assert!(is_constant_name("MAX_SIZE"));
        assert!(is_constant_name("V2"));
        assert!(!is_constant_name("max_size"));
        assert!(!is_constant_name("MaxSize"));
        assert!(!is_constant_name("_"));
        assert!(!is_constant_name("__"));
    }

    #[test]
    fn overlap_is_inclusive() {
        let def = function("f", 3, 5);
        assert!(def.overlaps(5, 9));
        assert!(def.overlaps(1, 3));
        assert!(def.overlaps(4, 4));
        assert!(!def.overlaps(6, 8));
        assert!(!def.overlaps(1, 2));
    }

    #[test]
    fn serializes_with_type_tag() {
        let def = function("f", 1, 2);
        let value = serde_json::to_value(&def).unwrap();
        assert_eq!(value["type"], "function");
        assert_eq!(value["name"], "f");
        assert_eq!(value["signature"], "def f()");
        assert!(value.get("scope").is_none());

        let back: Definition = serde_json::from_value(value).unwrap();
        assert_eq!(back, def);
    }

    #[test]
    fn type_filter_parsing() {
        assert_eq!("any".parse::<TypeFilter>().unwrap(), TypeFilter::Any);
        assert_eq!("".parse::<TypeFilter>().unwrap(), TypeFilter::Any);
        assert_eq!("Function".parse::<TypeFilter>().unwrap(), TypeFilter::Function);
        assert!("method".parse::<TypeFilter>().is_err());
        assert!(TypeFilter::Class.accepts(DefinitionKind::Class));
        assert!(!TypeFilter::Class.accepts(DefinitionKind::Function));
    }

    #[test]
    fn qualified_name_includes_scope() {
        let mut def = function("run", 1, 1);
        def.scope = Some("Worker".to_string());
        assert_eq!(def.qualified_name(), "Worker.run");
        assert_eq!(def.label(), "function 'Worker.run' (pkg/mod.py:1)");
    }
}
