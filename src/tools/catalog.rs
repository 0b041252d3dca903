//! Tool catalog loading from TOML configuration
//!
//! Operators declare bindings in a TOML file; the catalog turns each entry
//! into a `ToolBinding` backed by one of the built-in tool kinds.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use super::binding::{DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT, ToolBinding};
use super::command::CommandTool;
use super::http::HttpFetchTool;
use super::registry::{RegisterOutcome, ToolRegistry};
use super::Tool;
use crate::error::{DoeError, Result};
use crate::schema::Schema;

/// Limits applied to catalog entries that do not set their own
#[derive(Debug, Clone, Copy)]
pub struct CatalogDefaults {
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for CatalogDefaults {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Which built-in tool backs an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ToolKind {
    Command,
    HttpFetch,
}

/// TOML representation of a tool binding
#[derive(Debug, Deserialize)]
struct TomlTool {
    task_id: String,
    kind: ToolKind,
    revision: Option<String>,
    timeout_ms: Option<u64>,
    max_retries: Option<u32>,
    #[serde(default)]
    inputs: Schema,
    #[serde(default)]
    outputs: Schema,

    // command
    #[serde(default)]
    command: Vec<String>,
    cwd: Option<PathBuf>,
    #[serde(default)]
    env: BTreeMap<String, String>,

    // http-fetch
    url_param: Option<String>,
    max_chars: Option<usize>,
}

/// TOML file structure
#[derive(Debug, Deserialize)]
struct TomlCatalog {
    #[serde(rename = "tool", default)]
    tools: Vec<TomlTool>,
}

/// Bindings declared in a catalog file
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    bindings: Vec<ToolBinding>,
}

impl ToolCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Load catalog from a TOML file
    pub fn from_file(path: impl AsRef<Path>, defaults: CatalogDefaults) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| DoeError::Catalog(format!("Failed to read catalog file: {}", e)))?;
        Self::from_toml(&content, defaults)
    }

    /// Load catalog from TOML string
    pub fn from_toml(content: &str, defaults: CatalogDefaults) -> Result<Self> {
        let catalog: TomlCatalog =
            toml::from_str(content).map_err(|e| DoeError::Catalog(format!("Failed to parse TOML: {}", e)))?;

        let mut bindings: Vec<ToolBinding> = Vec::with_capacity(catalog.tools.len());
        for toml_tool in catalog.tools {
            if bindings.iter().any(|b| b.task_id == toml_tool.task_id) {
                return Err(DoeError::Catalog(format!("Duplicate task_id '{}'", toml_tool.task_id)));
            }
            bindings.push(Self::convert_toml_tool(toml_tool, defaults)?);
        }
        Ok(Self { bindings })
    }

    /// Convert a TOML entry into a binding
    fn convert_toml_tool(toml_tool: TomlTool, defaults: CatalogDefaults) -> Result<ToolBinding> {
        let (tool, reference): (Arc<dyn Tool>, String) = match toml_tool.kind {
            ToolKind::Command => {
                let (program, args) = toml_tool.command.split_first().ok_or_else(|| {
                    DoeError::Catalog(format!("Tool '{}' needs a non-empty `command`", toml_tool.task_id))
                })?;
                let mut tool = CommandTool::new(program.clone()).with_args(args.to_vec());
                if let Some(cwd) = &toml_tool.cwd {
                    tool = tool.with_cwd(cwd.clone());
                }
                for (key, value) in &toml_tool.env {
                    tool = tool.with_env(key.clone(), value.clone());
                }
                (Arc::new(tool), format!("command:{}", toml_tool.command.join(" ")))
            }
            ToolKind::HttpFetch => {
                let mut tool = HttpFetchTool::new()?;
                if let Some(param) = &toml_tool.url_param {
                    tool = tool.with_url_param(param.clone());
                }
                if let Some(max_chars) = toml_tool.max_chars {
                    tool = tool.with_max_chars(max_chars);
                }
                (Arc::new(tool), "http-fetch".to_string())
            }
        };

        let mut binding = ToolBinding::new(toml_tool.task_id, tool)
            .with_reference(reference)
            .with_input_schema(toml_tool.inputs)
            .with_output_schema(toml_tool.outputs)
            .with_timeout(toml_tool.timeout_ms.map(Duration::from_millis).unwrap_or(defaults.timeout))
            .with_max_retries(toml_tool.max_retries.unwrap_or(defaults.max_retries));
        if let Some(revision) = toml_tool.revision {
            binding = binding.with_revision(revision);
        }
        Ok(binding)
    }

    /// Get a binding by task identifier
    pub fn get(&self, task_id: &str) -> Option<&ToolBinding> {
        self.bindings.iter().find(|b| b.task_id == task_id)
    }

    /// All bindings in file order
    pub fn bindings(&self) -> &[ToolBinding] {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Register every binding, stopping at the first failure
    pub fn register_all(&self, registry: &ToolRegistry) -> Result<Vec<(String, RegisterOutcome)>> {
        self.bindings
            .iter()
            .map(|b| Ok((b.task_id.clone(), registry.register(b.clone())?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::{DirectiveConfig, DirectiveStore};
    use crate::schema::ParamType;
    use tempfile::TempDir;

    const SAMPLE_TOML: &str = r#"
[[tool]]
task_id = "fetch-page"
kind = "http-fetch"
revision = "1"
timeout_ms = 15000
max_chars = 32000
inputs = [{ name = "url", type = "string", description = "Page to fetch" }]
outputs = [
    { name = "content", type = "string" },
    { name = "status", type = "integer" },
]

[[tool]]
task_id = "summarize-url"
kind = "command"
command = ["python3", "execution/summarize_url.py"]
max_retries = 1
inputs = [{ name = "url", type = "string" }]

[tool.env]
PYTHONUNBUFFERED = "1"
"#;

    #[test]
    fn test_load_from_toml() {
        let catalog = ToolCatalog::from_toml(SAMPLE_TOML, CatalogDefaults::default()).unwrap();
        assert_eq!(catalog.len(), 2);

        let fetch = catalog.get("fetch-page").unwrap();
        assert_eq!(fetch.reference, "http-fetch");
        assert_eq!(fetch.timeout, Duration::from_millis(15000));
        assert_eq!(fetch.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(fetch.revision.as_deref(), Some("1"));
        assert_eq!(fetch.output_schema.params()[1].param_type, ParamType::Integer);

        let summarize = catalog.get("summarize-url").unwrap();
        assert_eq!(summarize.reference, "command:python3 execution/summarize_url.py");
        assert_eq!(summarize.max_retries, 1);
        assert_eq!(summarize.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_defaults_apply() {
        let defaults = CatalogDefaults {
            timeout: Duration::from_secs(5),
            max_retries: 9,
        };
        let catalog = ToolCatalog::from_toml(SAMPLE_TOML, defaults).unwrap();
        let summarize = catalog.get("summarize-url").unwrap();
        assert_eq!(summarize.timeout, Duration::from_secs(5));
        assert_eq!(summarize.max_retries, 1);
    }

    #[test]
    fn test_empty_command_rejected() {
        let toml = "[[tool]]\ntask_id = \"x\"\nkind = \"command\"\n";
        let err = ToolCatalog::from_toml(toml, CatalogDefaults::default()).unwrap_err();
        assert!(err.to_string().contains("non-empty"));
    }

    #[test]
    fn test_duplicate_task_rejected() {
        let toml = "[[tool]]\ntask_id = \"x\"\nkind = \"http-fetch\"\n[[tool]]\ntask_id = \"x\"\nkind = \"http-fetch\"\n";
        assert!(ToolCatalog::from_toml(toml, CatalogDefaults::default()).is_err());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let toml = "[[tool]]\ntask_id = \"x\"\nkind = \"telepathy\"\n";
        assert!(matches!(
            ToolCatalog::from_toml(toml, CatalogDefaults::default()),
            Err(DoeError::Catalog(_))
        ));
    }

    #[test]
    fn test_empty_file_is_empty_catalog() {
        assert!(ToolCatalog::from_toml("", CatalogDefaults::default()).unwrap().is_empty());
    }

    #[test]
    fn test_register_all() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(DirectiveStore::open(temp.path(), DirectiveConfig::default()).unwrap());
        let registry = ToolRegistry::new(store);

        let catalog = ToolCatalog::from_toml(SAMPLE_TOML, CatalogDefaults::default()).unwrap();
        let outcomes = catalog.register_all(&registry).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|(_, o)| *o == RegisterOutcome::Added));
        assert_eq!(registry.list().unwrap().len(), 2);

        let again = catalog.register_all(&registry).unwrap();
        assert!(again.iter().all(|(_, o)| *o == RegisterOutcome::Unchanged));
    }
}
