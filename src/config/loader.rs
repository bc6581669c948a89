//! Configuration loading and management.

use crate::enumerator::{DEFAULT_MAX_HUB_DEPTH, WalkOptions};
use crate::logging::DEFAULT_LOG_LEVEL;
use crate::model::{DeviceRecord, RootHub, Snapshot};
use crate::sysfs::SysfsLocator;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Inheritance error: {0}")]
    Inheritance(String),
}

/// Application configuration.
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Global settings.
    #[serde(default)]
    pub settings: Settings,

    /// Host backend settings.
    #[serde(default)]
    pub host: HostSettings,

    /// Root hub labels by node name (e.g., "usb1").
    #[serde(default)]
    pub hubs: HashMap<String, String>,

    /// Product labels by VID:PID (e.g., "046d:c52b").
    #[serde(default)]
    pub products: HashMap<String, String>,
}

/// Global settings.
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// TUI refresh interval in milliseconds.
    #[serde(default = "default_refresh_ms")]
    pub refresh_ms: u64,

    /// Log filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            refresh_ms: default_refresh_ms(),
            log_level: default_log_level(),
        }
    }
}

fn default_refresh_ms() -> u64 {
    2000
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

/// Where and how deep to walk.
#[derive(Debug, Deserialize)]
pub struct HostSettings {
    /// Candidate sysfs device directories, searched in order.
    #[serde(default = "default_sysfs_roots")]
    pub sysfs_roots: Vec<PathBuf>,

    /// Hub tiers below a root hub that are descended.
    #[serde(default = "default_max_hub_depth")]
    pub max_hub_depth: usize,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            sysfs_roots: default_sysfs_roots(),
            max_hub_depth: default_max_hub_depth(),
        }
    }
}

fn default_sysfs_roots() -> Vec<PathBuf> {
    SysfsLocator::default().candidates().to_vec()
}

fn default_max_hub_depth() -> usize {
    DEFAULT_MAX_HUB_DEPTH
}

impl Config {
    /// Load configuration from default locations.
    /// Search order:
    /// 1. ./usbtopo.toml
    /// 2. ~/.config/usbtopo/config.toml
    /// 3. /etc/usbtopo.toml
    pub fn load() -> Result<Self, ConfigError> {
        for path in Self::config_paths().into_iter().flatten() {
            if path.exists() {
                return Self::load_from_path(&path);
            }
        }

        // No config file found - use defaults
        Ok(Config::default())
    }

    /// Load configuration from a specific path, supporting inheritance.
    ///
    /// An `inherit` key (string or array of strings) names files that are
    /// loaded first; this file's values win over theirs.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let merged = read_and_flatten_toml(path, &mut seen)?;
        let config: Config = merged.try_into()?;
        Ok(config)
    }

    /// Get list of possible config paths.
    pub fn config_paths() -> Vec<Option<PathBuf>> {
        vec![
            std::env::current_dir()
                .ok()
                .map(|p| p.join("usbtopo.toml")),
            dirs::config_dir().map(|p| p.join("usbtopo").join("config.toml")),
            Some(PathBuf::from("/etc/usbtopo.toml")),
        ]
    }

    /// Label for a root hub.
    pub fn hub_label(&self, root: &RootHub) -> Option<&str> {
        self.hubs.get(&root.node.0).map(String::as_str)
    }

    /// Label for a product (VID:PID).
    pub fn product_label(&self, vendor_id: u16, product_id: u16) -> Option<&str> {
        let key = format!("{:04x}:{:04x}", vendor_id, product_id);
        self.products.get(&key).map(String::as_str)
    }

    /// Label for a record, if its product is configured.
    pub fn device_label(&self, record: &DeviceRecord) -> Option<&str> {
        self.product_label(record.vendor_id, record.product_id)
    }

    /// Configured label, else the reported description, else VID:PID.
    pub fn display_name(&self, record: &DeviceRecord) -> String {
        self.device_label(record)
            .map(str::to_string)
            .unwrap_or_else(|| record.display_name())
    }

    pub fn walk_options(&self) -> WalkOptions {
        WalkOptions {
            max_hub_depth: self.host.max_hub_depth,
        }
    }

    pub fn locator(&self) -> SysfsLocator {
        SysfsLocator::new(self.host.sysfs_roots.clone())
    }
}

// =============================================================================
// TOML Inheritance Support
// =============================================================================

/// Read a TOML file and resolve its `inherit` chain into one value.
///
/// `inherit` may be a single path or an array applied in order. Paths are
/// relative to the directory of the file naming them.
fn read_and_flatten_toml(
    path: &Path,
    seen: &mut HashSet<PathBuf>,
) -> Result<toml::Value, ConfigError> {
    let canonical = path.canonicalize().map_err(|e| {
        ConfigError::Inheritance(format!("cannot resolve {}: {}", path.display(), e))
    })?;

    if !seen.insert(canonical) {
        return Err(ConfigError::Inheritance(format!(
            "{} is inherited more than once; circular dependencies are not allowed",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path)?;
    let mut doc: toml::Value = toml::from_str(&content)?;

    let inherit = doc.as_table_mut().and_then(|table| table.remove("inherit"));
    let Some(inherit) = inherit else {
        return Ok(doc);
    };

    let base_dir = path.parent().unwrap_or(Path::new("."));
    let inherited_paths: Vec<PathBuf> = match inherit {
        toml::Value::String(s) => vec![base_dir.join(s)],
        toml::Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                toml::Value::String(s) => Ok(base_dir.join(s)),
                _ => Err(ConfigError::Inheritance(
                    "inherit array must contain only strings".to_string(),
                )),
            })
            .collect::<Result<_, _>>()?,
        _ => {
            return Err(ConfigError::Inheritance(
                "inherit must be a string or array of strings".to_string(),
            ));
        }
    };

    let mut merged: Option<toml::Value> = None;
    for inherited_path in inherited_paths {
        let inherited = read_and_flatten_toml(&inherited_path, seen)?;
        merged = Some(match merged {
            Some(base) => merge_toml_values(base, inherited),
            None => inherited,
        });
    }

    Ok(match merged {
        Some(base) => merge_toml_values(base, doc),
        None => doc,
    })
}

/// Deep-merge two TOML values: tables recursively, arrays concatenated,
/// anything else replaced by `overlay`.
fn merge_toml_values(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_value) in overlay_table {
                let merged_value = match base_table.remove(&key) {
                    Some(base_value) => merge_toml_values(base_value, overlay_value),
                    None => overlay_value,
                };
                base_table.insert(key, merged_value);
            }
            toml::Value::Table(base_table)
        }
        (toml::Value::Array(mut base_arr), toml::Value::Array(overlay_arr)) => {
            base_arr.extend(overlay_arr);
            toml::Value::Array(base_arr)
        }
        (_, overlay) => overlay,
    }
}

/// Generate example configuration content.
pub fn example_config() -> &'static str {
    r#"# usbtopo configuration file
# Place in ./usbtopo.toml, ~/.config/usbtopo/config.toml, or /etc/usbtopo.toml

# Settings from other files can be pulled in first and overridden here.
# inherit = "base.toml"

[settings]
# Refresh interval in milliseconds (for TUI mode)
refresh_ms = 2000
# Log filter when RUST_LOG is unset: "error", "warn", "info", "debug", "trace"
log_level = "warn"

[host]
# Candidate sysfs USB device directories, first existing one is used
sysfs_roots = ["/sys/bus/usb/devices"]
# Hub tiers below a root hub to descend into
max_hub_depth = 7

# Root hub labels (by node name)
[hubs]
# "usb1" = "Rear panel USB 2.0"
# "usb2" = "Rear panel USB 3.x"

# Product labels (by VID:PID)
# Format: "vendor_id:product_id" = "label"
[products]
# "046d:c52b" = "Logitech Unifying Receiver"
"#
}

/// Generate a configuration file pre-populated from a snapshot: one label
/// per root hub and one per distinct non-hub product.
pub fn generate_config(snapshot: &Snapshot) -> String {
    let mut output = String::new();

    output.push_str("# usbtopo configuration file - auto-generated\n");
    output.push_str("# Generated from the current USB topology\n");
    output.push_str("#\n");
    output.push_str(
        "# Place in ./usbtopo.toml, ~/.config/usbtopo/config.toml, or /etc/usbtopo.toml\n",
    );
    output.push_str("# Edit labels below to customize names in the output\n\n");

    output.push_str("[settings]\n");
    output.push_str(&format!("refresh_ms = {}\n", default_refresh_ms()));
    output.push_str(&format!("log_level = \"{}\"\n\n", DEFAULT_LOG_LEVEL));

    output.push_str("[host]\n");
    let roots = default_sysfs_roots()
        .iter()
        .map(|p| format!("\"{}\"", sanitize_toml_string(&p.display().to_string())))
        .collect::<Vec<_>>()
        .join(", ");
    output.push_str(&format!("sysfs_roots = [{}]\n", roots));
    output.push_str(&format!("max_hub_depth = {}\n\n", DEFAULT_MAX_HUB_DEPTH));

    output.push_str(section_rule());
    output.push_str("# Root Hub Labels (by node name)\n");
    output.push_str(section_rule());
    output.push('\n');
    output.push_str("[hubs]\n");
    for root in snapshot.roots() {
        output.push_str(&format!(
            "\"{}\" = \"Root hub {}\"  # {}\n",
            root.node,
            root.index,
            sanitize_comment(&root.description)
        ));
    }
    output.push('\n');

    output.push_str(section_rule());
    output.push_str("# Product Labels (by VID:PID)\n");
    output.push_str(section_rule());
    output.push_str("# These apply to any device matching the vendor:product ID\n\n");
    output.push_str("[products]\n");

    // Hubs are rarely worth a label.
    let mut products: BTreeMap<(u16, u16), String> = BTreeMap::new();
    for record in snapshot.records().iter().filter(|r| !r.is_hub) {
        products
            .entry((record.vendor_id, record.product_id))
            .or_insert_with(|| {
                if record.description.is_empty() {
                    "Unknown Device".to_string()
                } else {
                    record.description.clone()
                }
            });
    }
    for ((vid, pid), name) in &products {
        output.push_str(&format!(
            "\"{:04x}:{:04x}\" = \"{}\"\n",
            vid,
            pid,
            sanitize_toml_string(name)
        ));
    }
    output.push('\n');

    output.push_str(section_rule());
    output.push_str("# Detected Topology (reference only)\n");
    output.push_str(section_rule());
    output.push('\n');
    for (depth, record) in snapshot.tree_order() {
        let kind = if record.is_hub { "Hub" } else { "Dev" };
        output.push_str(&format!(
            "# {}{} {} {} ({})\n",
            "  ".repeat(depth),
            kind,
            record.vid_pid(),
            record.node,
            record.speed.short_name()
        ));
    }

    output
}

fn section_rule() -> &'static str {
    "# =============================================================================\n"
}

/// Sanitize a string for use as a TOML value (escape special chars).
fn sanitize_toml_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
}

/// Keep free text on a single comment line.
fn sanitize_comment(s: &str) -> String {
    s.replace(['\n', '\r'], " ")
}
