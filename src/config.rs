//! Service settings and import templates.
//!
//! Settings come from the environment (optionally a `.env` file). Templates
//! describe a spreadsheet layout and are loaded from `TEMPLATE_DIR`, falling
//! back to the built-in ones when the directory is missing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use tracing::{info, warn};

use crate::cleansers::NameStrategy;

/// Process settings read from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub admin_username: String,
    /// Hex SHA-256 of the admin password.
    pub admin_password_sha256: String,
    pub token_ttl_hours: i64,
    pub template_dir: String,
    pub max_upload_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let jwt_secret = std::env::var("JWT_SECRET").context("JWT_SECRET not set")?;
        let admin_password_sha256 = std::env::var("ADMIN_PASSWORD_SHA256")
            .context("ADMIN_PASSWORD_SHA256 not set")?
            .trim()
            .to_lowercase();

        let token_ttl_hours = env_or("TOKEN_TTL_HOURS", "12")
            .parse()
            .context("TOKEN_TTL_HOURS must be an integer")?;
        let max_upload_mb: usize = env_or("MAX_UPLOAD_MB", "20")
            .parse()
            .context("MAX_UPLOAD_MB must be an integer")?;

        Ok(Self {
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:3000"),
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            jwt_secret,
            admin_username: env_or("ADMIN_USERNAME", "admin"),
            admin_password_sha256,
            token_ttl_hours,
            template_dir: env_or("TEMPLATE_DIR", "configs"),
            max_upload_bytes: max_upload_mb * 1024 * 1024,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Layout of one kind of beneficiary spreadsheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportTemplate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// 1-based file row of the first data row; the header row sits right above it.
    pub header_offset: usize,
    /// Column aliases, tried in order.
    pub name_columns: Vec<String>,
    pub purok_columns: Vec<String>,
    #[serde(default = "default_first_name_columns")]
    pub first_name_columns: Vec<String>,
    #[serde(default = "default_middle_name_columns")]
    pub middle_name_columns: Vec<String>,
    #[serde(default = "default_last_name_columns")]
    pub last_name_columns: Vec<String>,
    #[serde(default = "default_status_columns")]
    pub status_columns: Vec<String>,
    #[serde(default = "default_summary_keywords")]
    pub summary_keywords: Vec<String>,
    #[serde(default)]
    pub name_strategy: NameStrategy,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_first_name_columns() -> Vec<String> {
    strings(&["First Name", "firstName", "first_name"])
}

fn default_middle_name_columns() -> Vec<String> {
    strings(&["Middle Name", "middleName", "middle_name"])
}

fn default_last_name_columns() -> Vec<String> {
    strings(&["Last Name", "lastName", "last_name", "Surname"])
}

fn default_status_columns() -> Vec<String> {
    strings(&["Status", "Validation Status", "Remarks"])
}

fn default_summary_keywords() -> Vec<String> {
    strings(&["total", "seedling", "less"])
}

/// The municipal masterlist layout: two title rows, header on row 3.
pub fn masterlist_template() -> ImportTemplate {
    ImportTemplate {
        name: "masterlist".to_string(),
        description: "Municipal coffee beneficiary masterlist".to_string(),
        header_offset: 4,
        name_columns: strings(&[
            "Name of Beneficiary",
            "Name of Farmer",
            "Beneficiary",
            "Farmer Name",
            "Full Name",
            "Name",
        ]),
        purok_columns: strings(&["Purok", "Purok/Sitio", "Sitio", "Zone", "__EMPTY_0"]),
        first_name_columns: default_first_name_columns(),
        middle_name_columns: default_middle_name_columns(),
        last_name_columns: default_last_name_columns(),
        status_columns: default_status_columns(),
        summary_keywords: default_summary_keywords(),
        name_strategy: NameStrategy::TwoGivenNames,
    }
}

/// A previously exported draft: header on row 1, names already split.
pub fn draft_template() -> ImportTemplate {
    ImportTemplate {
        name: "draft".to_string(),
        description: "Re-import of an exported preview draft".to_string(),
        header_offset: 2,
        name_columns: strings(&["Full Name", "Name"]),
        purok_columns: strings(&["Purok", "purok"]),
        ..masterlist_template()
    }
}

/// In-memory store for loaded templates.
#[derive(Debug)]
pub struct TemplateStore {
    templates: RwLock<HashMap<String, ImportTemplate>>,
    default_template: String,
}

impl TemplateStore {
    /// Load every `*.json` template from `dir`; built-ins when the directory is absent.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        if !dir.exists() {
            warn!("Template directory {:?} not found, using built-in templates", dir);
            return Ok(Self::builtin());
        }

        let mut templates = HashMap::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();

            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read template: {:?}", path))?;

                let template: ImportTemplate = serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse template: {:?}", path))?;

                if template.header_offset < 2 {
                    anyhow::bail!(
                        "Template {} has header_offset {}; it must be at least 2",
                        template.name,
                        template.header_offset
                    );
                }

                info!("Loaded template: {} from {:?}", template.name, path);
                templates.insert(template.name.clone(), template);
            }
        }

        if templates.is_empty() {
            anyhow::bail!("No templates found in {:?}", dir);
        }

        Ok(Self::from_map(templates))
    }

    pub fn builtin() -> Self {
        Self::from_map(
            [masterlist_template(), draft_template()]
                .into_iter()
                .map(|t| (t.name.clone(), t))
                .collect(),
        )
    }

    fn from_map(templates: HashMap<String, ImportTemplate>) -> Self {
        let default_template = if templates.contains_key("masterlist") {
            "masterlist".to_string()
        } else {
            let mut names: Vec<&String> = templates.keys().collect();
            names.sort();
            names.first().map(|s| s.to_string()).unwrap_or_default()
        };

        Self {
            templates: RwLock::new(templates),
            default_template,
        }
    }

    /// Look up a template by name, or the default one for `None`.
    pub fn get(&self, name: Option<&str>) -> Option<ImportTemplate> {
        let name = name.unwrap_or(&self.default_template);
        self.templates.read().ok()?.get(name).cloned()
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .templates
            .read()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Name strategy of the default template (used when confirming edited rows).
    pub fn default_name_strategy(&self) -> NameStrategy {
        self.get(None).map(|t| t.name_strategy).unwrap_or_default()
    }
}
