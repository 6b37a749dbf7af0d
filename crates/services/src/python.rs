//! Python sandbox service.
//!
//! Exposes file CRUD over a per-session scripts directory and code
//! execution inside a separate `python3 -I` process with a whitelisted
//! builtin set, a wall-clock cap, and captured stdio. Named sandboxes
//! retain state across calls by replaying their accepted cell history
//! before each new cell.

use crate::ServiceContext;
use agentd_core::error::ServiceError;
use agentd_core::service::{text_result, McpService};
use agentd_core::tool::ToolDescriptor;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Output beyond this many bytes is truncated.
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// The harness run by `python3 -I -c`: reads the cell source from
/// stdin and executes it against a whitelisted builtin set.
const HARNESS: &str = r#"
import builtins, sys
SAFE = (
    'abs','all','any','bool','bytes','chr','dict','divmod','enumerate','filter',
    'float','format','frozenset','hash','hex','int','isinstance','issubclass',
    'iter','len','list','map','max','min','next','oct','ord','pow','print',
    'range','repr','reversed','round','set','slice','sorted','str','sum',
    'tuple','zip','Exception','ValueError','TypeError','KeyError','IndexError',
    'ZeroDivisionError','StopIteration','ArithmeticError','RuntimeError',
    'AttributeError','NameError',
)
g = {'__builtins__': {n: getattr(builtins, n) for n in SAFE}}
src = sys.stdin.read()
exec(compile(src, '<sandbox>', 'exec'), g, g)
"#;

pub struct PythonSandboxService {
    files_dir: PathBuf,
    timeout: Duration,
    /// sandbox id -> accepted cell history
    sandboxes: RwLock<HashMap<String, Vec<String>>>,
}

impl PythonSandboxService {
    pub fn new(ctx: &ServiceContext, config: Value) -> Result<Self, ServiceError> {
        let base_dir = config
            .get("base_dir")
            .and_then(Value::as_str)
            .unwrap_or("python_scripts");
        let files_dir = ctx.data_dir.join(base_dir);
        std::fs::create_dir_all(&files_dir)
            .map_err(|e| ServiceError::Storage(format!("cannot create {base_dir}: {e}")))?;

        Ok(Self {
            files_dir,
            timeout: ctx.sandbox_timeout,
            sandboxes: RwLock::new(HashMap::new()),
        })
    }

    fn file_path(&self, filename: &str) -> Result<PathBuf, ServiceError> {
        if filename.is_empty()
            || filename.contains('/')
            || filename.contains('\\')
            || filename.contains("..")
        {
            return Err(ServiceError::InvalidArguments(format!(
                "invalid filename '{filename}'"
            )));
        }
        let filename = if filename.ends_with(".py") {
            filename.to_string()
        } else {
            format!("{filename}.py")
        };
        Ok(self.files_dir.join(filename))
    }

    async fn create_file(&self, arguments: &Value) -> Result<Value, ServiceError> {
        let path = self.file_path(required_str(arguments, "filename")?)?;
        let content = required_str(arguments, "content")?;
        if path.exists() {
            return Err(ServiceError::InvalidArguments(format!(
                "file '{}' already exists",
                path.file_name().unwrap_or_default().to_string_lossy()
            )));
        }
        std::fs::write(&path, content).map_err(|e| ServiceError::Storage(e.to_string()))?;
        Ok(text_result(format!(
            "Created {}",
            path.file_name().unwrap_or_default().to_string_lossy()
        )))
    }

    async fn read_file(&self, arguments: &Value) -> Result<Value, ServiceError> {
        let path = self.file_path(required_str(arguments, "filename")?)?;
        let content = std::fs::read_to_string(&path)
            .map_err(|_| ServiceError::ExecutionFailed(format!("file not found: {}", path.display())))?;
        Ok(text_result(content))
    }

    async fn update_file(&self, arguments: &Value) -> Result<Value, ServiceError> {
        let path = self.file_path(required_str(arguments, "filename")?)?;
        if !path.exists() {
            return Err(ServiceError::ExecutionFailed(format!(
                "file not found: {}",
                path.display()
            )));
        }
        let content = required_str(arguments, "content")?;
        std::fs::write(&path, content).map_err(|e| ServiceError::Storage(e.to_string()))?;
        Ok(text_result(format!(
            "Updated {}",
            path.file_name().unwrap_or_default().to_string_lossy()
        )))
    }

    async fn delete_file(&self, arguments: &Value) -> Result<Value, ServiceError> {
        let path = self.file_path(required_str(arguments, "filename")?)?;
        std::fs::remove_file(&path)
            .map_err(|_| ServiceError::ExecutionFailed(format!("file not found: {}", path.display())))?;
        Ok(text_result(format!(
            "Deleted {}",
            path.file_name().unwrap_or_default().to_string_lossy()
        )))
    }

    async fn list_files(&self) -> Result<Value, ServiceError> {
        let mut names: Vec<String> = std::fs::read_dir(&self.files_dir)
            .map_err(|e| ServiceError::Storage(e.to_string()))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.ends_with(".py"))
            .collect();
        names.sort();
        if names.is_empty() {
            Ok(text_result("(no files)"))
        } else {
            Ok(text_result(names.join("\n")))
        }
    }

    async fn execute(&self, arguments: &Value) -> Result<Value, ServiceError> {
        // Either inline code or a stored file.
        let code = match arguments.get("code").and_then(Value::as_str) {
            Some(code) if !code.is_empty() => code.to_string(),
            _ => {
                let filename = arguments
                    .get("filename")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        ServiceError::InvalidArguments("'code' or 'filename' is required".into())
                    })?;
                let path = self.file_path(filename)?;
                std::fs::read_to_string(&path).map_err(|_| {
                    ServiceError::ExecutionFailed(format!("file not found: {}", path.display()))
                })?
            }
        };

        let timeout = arguments
            .get("timeout_secs")
            .and_then(Value::as_u64)
            .map(Duration::from_secs)
            .unwrap_or(self.timeout);

        let sandbox_id = arguments
            .get("sandbox_id")
            .and_then(Value::as_str)
            .map(String::from);

        // Replay a sandbox's accepted history before the new cell so
        // variables persist across calls.
        let source = match &sandbox_id {
            Some(id) => {
                let sandboxes = self.sandboxes.read().await;
                let history = sandboxes.get(id).ok_or_else(|| {
                    ServiceError::ExecutionFailed(format!("sandbox '{id}' not found"))
                })?;
                let mut combined = history.join("\n");
                if !combined.is_empty() {
                    combined.push('\n');
                }
                combined.push_str(&code);
                combined
            }
            None => code.clone(),
        };

        let outcome = run_sandboxed(&source, timeout).await?;

        if let (Some(id), true) = (&sandbox_id, outcome.success) {
            if let Some(history) = self.sandboxes.write().await.get_mut(id) {
                history.push(code);
            }
        }

        let mut output = outcome.output;
        if output.is_empty() {
            output = if outcome.success {
                "(no output)".into()
            } else {
                "(no output, non-zero exit)".into()
            };
        }
        if outcome.success {
            Ok(text_result(output))
        } else {
            Err(ServiceError::ExecutionFailed(output))
        }
    }

    async fn sandbox_create(&self, arguments: &Value) -> Result<Value, ServiceError> {
        let id = required_str(arguments, "sandbox_id")?;
        let mut sandboxes = self.sandboxes.write().await;
        if sandboxes.contains_key(id) {
            return Err(ServiceError::InstanceExists(id.to_string()));
        }
        sandboxes.insert(id.to_string(), Vec::new());
        debug!(sandbox = id, "sandbox created");
        Ok(text_result(format!("Sandbox '{id}' created")))
    }

    async fn sandbox_list(&self) -> Result<Value, ServiceError> {
        let sandboxes = self.sandboxes.read().await;
        if sandboxes.is_empty() {
            return Ok(text_result("(no sandboxes)"));
        }
        let mut lines: Vec<String> = sandboxes
            .iter()
            .map(|(id, history)| format!("{id} ({} cells)", history.len()))
            .collect();
        lines.sort();
        Ok(text_result(lines.join("\n")))
    }

    async fn sandbox_delete(&self, arguments: &Value) -> Result<Value, ServiceError> {
        let id = required_str(arguments, "sandbox_id")?;
        if self.sandboxes.write().await.remove(id).is_none() {
            return Err(ServiceError::ExecutionFailed(format!(
                "sandbox '{id}' not found"
            )));
        }
        Ok(text_result(format!("Sandbox '{id}' deleted")))
    }
}

struct ExecOutcome {
    success: bool,
    output: String,
}

async fn run_sandboxed(source: &str, timeout: Duration) -> Result<ExecOutcome, ServiceError> {
    let mut child = tokio::process::Command::new("python3")
        .args(["-I", "-c", HARNESS])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ServiceError::ExecutionFailed(format!("cannot start python3: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(source.as_bytes())
            .await
            .map_err(|e| ServiceError::ExecutionFailed(format!("cannot write source: {e}")))?;
        drop(stdin);
    }

    let result = tokio::time::timeout(timeout, child.wait_with_output()).await;
    let output = match result {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(ServiceError::ExecutionFailed(e.to_string())),
        Err(_) => {
            warn!(timeout_secs = timeout.as_secs(), "sandbox execution timed out");
            return Err(ServiceError::ExecutionFailed(format!(
                "execution timed out after {}s",
                timeout.as_secs()
            )));
        }
    };

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        if !combined.is_empty() {
            combined.push('\n');
        }
        combined.push_str(stderr.trim_end());
    }
    if combined.len() > MAX_OUTPUT_BYTES {
        combined.truncate(MAX_OUTPUT_BYTES);
        combined.push_str("\n... (output truncated)");
    }

    Ok(ExecOutcome {
        success: output.status.success(),
        output: combined.trim_end().to_string(),
    })
}

#[async_trait]
impl McpService for PythonSandboxService {
    fn name(&self) -> &str {
        "python"
    }

    async fn list_tools(&self) -> Vec<ToolDescriptor> {
        let filename = serde_json::json!({ "type": "string", "description": "Script filename" });
        vec![
            ToolDescriptor {
                name: "python_create_file".into(),
                description: "Create a Python script".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "filename": filename,
                        "content": { "type": "string", "description": "Script source" }
                    },
                    "required": ["filename", "content"]
                }),
            },
            ToolDescriptor {
                name: "python_read_file".into(),
                description: "Read a Python script".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": { "filename": filename },
                    "required": ["filename"]
                }),
            },
            ToolDescriptor {
                name: "python_update_file".into(),
                description: "Overwrite a Python script".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "filename": filename,
                        "content": { "type": "string" }
                    },
                    "required": ["filename", "content"]
                }),
            },
            ToolDescriptor {
                name: "python_delete_file".into(),
                description: "Delete a Python script".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": { "filename": filename },
                    "required": ["filename"]
                }),
            },
            ToolDescriptor {
                name: "python_list_files".into(),
                description: "List stored Python scripts".into(),
                input_schema: serde_json::json!({ "type": "object", "properties": {} }),
            },
            ToolDescriptor {
                name: "python_execute".into(),
                description: "Execute Python code in an isolated sandbox".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "code": { "type": "string", "description": "Inline source to run" },
                        "filename": { "type": "string", "description": "Stored script to run instead" },
                        "sandbox_id": { "type": "string", "description": "Persistent sandbox to run in" },
                        "timeout_secs": { "type": "integer", "description": "Wall-clock cap override" }
                    }
                }),
            },
            ToolDescriptor {
                name: "sandbox_create".into(),
                description: "Create a persistent sandbox that retains variables across calls".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": { "sandbox_id": { "type": "string" } },
                    "required": ["sandbox_id"]
                }),
            },
            ToolDescriptor {
                name: "sandbox_list".into(),
                description: "List persistent sandboxes".into(),
                input_schema: serde_json::json!({ "type": "object", "properties": {} }),
            },
            ToolDescriptor {
                name: "sandbox_delete".into(),
                description: "Delete a persistent sandbox".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": { "sandbox_id": { "type": "string" } },
                    "required": ["sandbox_id"]
                }),
            },
        ]
    }

    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value, ServiceError> {
        match tool {
            "python_create_file" => self.create_file(&arguments).await,
            "python_read_file" => self.read_file(&arguments).await,
            "python_update_file" => self.update_file(&arguments).await,
            "python_delete_file" => self.delete_file(&arguments).await,
            "python_list_files" => self.list_files().await,
            "python_execute" => self.execute(&arguments).await,
            "sandbox_create" => self.sandbox_create(&arguments).await,
            "sandbox_list" => self.sandbox_list().await,
            "sandbox_delete" => self.sandbox_delete(&arguments).await,
            other => Err(ServiceError::UnknownTool(other.to_string())),
        }
    }
}

fn required_str<'a>(arguments: &'a Value, field: &str) -> Result<&'a str, ServiceError> {
    arguments
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ServiceError::InvalidArguments(format!("'{field}' is required")))
}
