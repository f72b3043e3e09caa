//! The application under validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;

/// An HTTP endpoint the application declares.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoint {
    pub method: String,
    pub path: String,
}

impl Endpoint {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into().to_uppercase(),
            path: path.into(),
        }
    }

    /// Parse `"METHOD /path"`.
    pub fn parse(spec: &str) -> Option<Self> {
        let mut parts = spec.split_whitespace();
        let method = parts.next()?;
        let path = parts.next()?;
        if parts.next().is_some() || !path.starts_with('/') {
            return None;
        }
        Some(Self::new(method, path))
    }

    /// The path with `{id}` and `:id` parameters replaced by `1`.
    pub fn concrete_path(&self) -> String {
        self.path
            .split('/')
            .map(|seg| {
                let is_param = (seg.starts_with('{') && seg.ends_with('}')) || seg.starts_with(':');
                if is_param && seg.len() > 1 {
                    "1"
                } else {
                    seg
                }
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Whether requests to this endpoint carry a JSON body.
    pub fn takes_body(&self) -> bool {
        matches!(self.method.as_str(), "POST" | "PUT" | "PATCH")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entity {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<Field>,
}

impl Entity {
    /// A plausible JSON object for create/update requests.
    pub fn sample_payload(&self) -> Value {
        let mut data = Map::new();
        for field in &self.fields {
            if field.name == "id" || field.name == "created_at" {
                continue;
            }
            let value = match field.field_type.to_lowercase().as_str() {
                "string" | "text" => Value::from(format!("test_{}", field.name)),
                "email" => Value::from("test@example.com"),
                "int" | "integer" => Value::from(1),
                "float" | "number" => Value::from(1.0),
                "bool" | "boolean" => Value::from(true),
                _ => Value::from("test_value"),
            };
            data.insert(field.name.clone(), value);
        }
        Value::Object(data)
    }
}

fn default_app_type() -> String {
    "api".to_string()
}

/// A directory plus what is known about the application inside it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppTarget {
    pub name: String,

    #[serde(default)]
    pub path: PathBuf,

    /// Declared language; skips ecosystem detection when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// `api`, `web`, `cli`, ...
    #[serde(default = "default_app_type", rename = "type", alias = "app_type")]
    pub app_type: String,

    #[serde(default)]
    pub endpoints: Vec<Endpoint>,

    #[serde(default)]
    pub entities: Vec<Entity>,
}

impl AppTarget {
    /// Target named after the directory, typed `api`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "application".to_string());
        Self {
            name,
            path,
            language: None,
            app_type: default_app_type(),
            endpoints: Vec::new(),
            entities: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_app_type(mut self, app_type: impl Into<String>) -> Self {
        self.app_type = app_type.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.entities.push(entity);
        self
    }

    /// Load a requirement document and point it at `path`.
    pub fn from_requirements_file(file: &Path, path: &Path) -> Result<Self, ValidationError> {
        let content = std::fs::read_to_string(file).map_err(|source| ValidationError::Requirements {
            path: file.to_path_buf(),
            reason: source.to_string(),
        })?;
        let mut target: AppTarget =
            serde_json::from_str(&content).map_err(|e| ValidationError::Requirements {
                path: file.to_path_buf(),
                reason: e.to_string(),
            })?;
        target.path = path.to_path_buf();
        Ok(target)
    }

    /// Only `api` and `web` applications are probed over HTTP.
    pub fn serves_http(&self) -> bool {
        matches!(self.app_type.to_lowercase().as_str(), "api" | "web")
    }

    /// Body for POST/PUT probes, built from the first declared entity.
    pub fn sample_payload(&self) -> Option<Value> {
        self.entities.first().map(Entity::sample_payload)
    }
}
