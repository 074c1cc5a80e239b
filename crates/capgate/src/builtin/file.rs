//! `file` adapter: text, JSON and directory operations under a base directory.
//!
//! Every path argument is declared with `"format": "path"`, so the server
//! checks it against the session's roots before this adapter runs.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;

use crate::adapter::{str_arg, validate_args, CapabilityAdapter};
use crate::descriptor::{
    Prompt, PromptVariable, ProtocolDescriptor, Resource, ResourceContents, Root,
    SamplingPolicy, ToolDefinition,
};
use crate::error::{AdapterError, AdapterResult};
use crate::version::{CompatibilityRange, Version};

/// Protocol name served by [`FileAdapter`].
pub const FILE_PROTOCOL: &str = "file";

/// Filesystem adapter rooted at a base directory.
pub struct FileAdapter {
    base: PathBuf,
    descriptor: ProtocolDescriptor,
}

fn path_prop(description: &str) -> Value {
    json!({ "type": "string", "format": "path", "minLength": 1, "description": description })
}

fn path_only(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": { "path": path_prop(description) },
        "required": ["path"]
    })
}

fn path_and_content() -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": path_prop("File to write"),
            "content": { "type": "string", "description": "Text to write" }
        },
        "required": ["path", "content"]
    })
}

impl FileAdapter {
    /// Serve files under `base`. Relative path arguments resolve against it.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        let root = Root {
            uri: format!("file://{}", base.display()),
            name: Some("workspace".to_string()),
        };

        let descriptor = ProtocolDescriptor::new(
            FILE_PROTOCOL,
            Version::new(1, 0, 0),
            CompatibilityRange::half_open(Version::new(1, 0, 0), Version::new(2, 0, 0)),
        )
        .describe("Read, write and list files inside the workspace roots")
        .serialized()
        .root(root)
        .tool(
            ToolDefinition::new("read_text", "Read a UTF-8 text file", path_only("File to read"))
                .returning(json!({
                    "type": "object",
                    "properties": { "content": { "type": "string" }, "bytes": { "type": "integer" } }
                })),
        )
        .tool(ToolDefinition::new("write_text", "Create or replace a text file", path_and_content()))
        .tool(ToolDefinition::new("append_text", "Append text to a file", path_and_content()))
        .tool(ToolDefinition::new("read_json", "Read and parse a JSON file", path_only("File to read")))
        .tool(ToolDefinition::new(
            "write_json",
            "Write a value as JSON",
            json!({
                "type": "object",
                "properties": {
                    "path": path_prop("File to write"),
                    "data": { "description": "Value to serialize" },
                    "pretty": { "type": "boolean", "default": true }
                },
                "required": ["path", "data"]
            }),
        ))
        .tool(ToolDefinition::new(
            "list_directory",
            "List the entries of a directory",
            json!({
                "type": "object",
                "properties": {
                    "path": path_prop("Directory to list"),
                    "extension": { "type": "string", "description": "Only entries with this extension" }
                },
                "required": ["path"]
            }),
        ))
        .tool(ToolDefinition::new("file_info", "Size, kind and modification time", path_only("Path to inspect")))
        .tool(ToolDefinition::new("file_exists", "Whether a path exists", path_only("Path to test")))
        .tool(ToolDefinition::new("create_directory", "Create a directory and its parents", path_only("Directory to create")))
        .tool(ToolDefinition::new("delete_file", "Delete a single file", path_only("File to delete")))
        .resource(Resource {
            uri: "file:///{path}".to_string(),
            name: "Workspace file".to_string(),
            mime_type: Some("text/plain".to_string()),
            metadata: Default::default(),
        })
        .prompt(Prompt {
            name: "summarize_file".to_string(),
            description: Some("Ask for a summary of one workspace file".to_string()),
            template: "Read {path} with the read_text tool and summarize it. Focus: {focus}".to_string(),
            variables: vec![
                PromptVariable {
                    name: "path".to_string(),
                    description: Some("File to summarize".to_string()),
                    required: true,
                },
                PromptVariable {
                    name: "focus".to_string(),
                    description: Some("What the summary should emphasise".to_string()),
                    required: false,
                },
            ],
        });

        Self { base, descriptor }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.base.join(candidate)
        }
    }

    async fn read_text(&self, args: &Value) -> AdapterResult<Value> {
        let path = self.resolve(str_arg(args, "path")?);
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(json!({ "path": path.display().to_string(), "bytes": content.len(), "content": content }))
    }

    async fn write_text(&self, args: &Value) -> AdapterResult<Value> {
        let path = self.resolve(str_arg(args, "path")?);
        let content = str_arg(args, "content")?;
        tokio::fs::write(&path, content).await?;
        log::debug!("wrote {} bytes to {}", content.len(), path.display());
        Ok(json!({ "path": path.display().to_string(), "bytes_written": content.len() }))
    }

    async fn append_text(&self, args: &Value) -> AdapterResult<Value> {
        let path = self.resolve(str_arg(args, "path")?);
        let content = str_arg(args, "content")?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(json!({ "path": path.display().to_string(), "bytes_appended": content.len() }))
    }

    async fn read_json(&self, args: &Value) -> AdapterResult<Value> {
        let path = self.resolve(str_arg(args, "path")?);
        let raw = tokio::fs::read(&path).await?;
        let data: Value = serde_json::from_slice(&raw)?;
        Ok(json!({ "path": path.display().to_string(), "data": data }))
    }

    async fn write_json(&self, args: &Value) -> AdapterResult<Value> {
        let path = self.resolve(str_arg(args, "path")?);
        let data = args.get("data").cloned().unwrap_or(Value::Null);
        let pretty = args.get("pretty").and_then(Value::as_bool).unwrap_or(true);
        let text = if pretty {
            serde_json::to_string_pretty(&data)?
        } else {
            serde_json::to_string(&data)?
        };
        tokio::fs::write(&path, &text).await?;
        Ok(json!({ "path": path.display().to_string(), "bytes_written": text.len() }))
    }

    async fn list_directory(&self, args: &Value) -> AdapterResult<Value> {
        let path = self.resolve(str_arg(args, "path")?);
        let extension = args.get("extension").and_then(Value::as_str);

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&path).await?;
        while let Some(entry) = dir.next_entry().await? {
            let entry_path = entry.path();
            if let Some(ext) = extension {
                let matches = entry_path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case(ext.trim_start_matches('.')));
                if !matches {
                    continue;
                }
            }
            let file_type = entry.file_type().await?;
            entries.push(json!({
                "name": entry.file_name().to_string_lossy(),
                "is_dir": file_type.is_dir(),
            }));
        }
        entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

        Ok(json!({ "path": path.display().to_string(), "count": entries.len(), "entries": entries }))
    }

    async fn file_info(&self, args: &Value) -> AdapterResult<Value> {
        let path = self.resolve(str_arg(args, "path")?);
        let meta = tokio::fs::metadata(&path).await?;
        let modified = meta
            .modified()
            .ok()
            .map(|t| DateTime::<Utc>::from(t).to_rfc3339());
        Ok(json!({
            "path": path.display().to_string(),
            "size": meta.len(),
            "is_file": meta.is_file(),
            "is_dir": meta.is_dir(),
            "readonly": meta.permissions().readonly(),
            "modified": modified,
        }))
    }

    async fn file_exists(&self, args: &Value) -> AdapterResult<Value> {
        let path = self.resolve(str_arg(args, "path")?);
        let exists = tokio::fs::try_exists(&path).await?;
        Ok(json!({ "path": path.display().to_string(), "exists": exists }))
    }

    async fn create_directory(&self, args: &Value) -> AdapterResult<Value> {
        let path = self.resolve(str_arg(args, "path")?);
        tokio::fs::create_dir_all(&path).await?;
        Ok(json!({ "path": path.display().to_string(), "created": true }))
    }

    async fn delete_file(&self, args: &Value) -> AdapterResult<Value> {
        let path = self.resolve(str_arg(args, "path")?);
        tokio::fs::remove_file(&path).await?;
        log::info!("deleted {}", path.display());
        Ok(json!({ "path": path.display().to_string(), "deleted": true }))
    }
}

#[async_trait]
impl CapabilityAdapter for FileAdapter {
    fn describe(&self) -> &ProtocolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, method: &str, args: Value, _sampling: &SamplingPolicy) -> AdapterResult<Value> {
        validate_args(&self.descriptor, method, &args)?;

        match method {
            "read_text" => self.read_text(&args).await,
            "write_text" => self.write_text(&args).await,
            "append_text" => self.append_text(&args).await,
            "read_json" => self.read_json(&args).await,
            "write_json" => self.write_json(&args).await,
            "list_directory" => self.list_directory(&args).await,
            "file_info" => self.file_info(&args).await,
            "file_exists" => self.file_exists(&args).await,
            "create_directory" => self.create_directory(&args).await,
            "delete_file" => self.delete_file(&args).await,
            other => Err(AdapterError::UnknownMethod(other.to_string())),
        }
    }

    async fn read_resource(&self, uri: &str) -> AdapterResult<ResourceContents> {
        let Some(raw) = uri.strip_prefix("file://") else {
            return Err(AdapterError::ResourceNotFound(uri.to_string()));
        };
        let path = self.resolve(raw);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AdapterError::ResourceNotFound(uri.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(ResourceContents {
            uri: uri.to_string(),
            mime_type: Some("text/plain".to_string()),
            text: Some(text),
            blob: None,
        })
    }
}
