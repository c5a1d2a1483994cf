//! Extension to language-plugin routing

use super::languages::{LanguagePlugin, PLUGINS};

/// Static registry over the built-in plugin table
///
/// Plugins are values; the registry only routes extensions and hands out
/// grammar factories.
pub struct LanguageRegistry;

impl LanguageRegistry {
    /// Find the plugin claiming an extension (case-insensitive)
    pub fn plugin_for_extension(extension: &str) -> Option<&'static LanguagePlugin> {
        let ext = extension.to_lowercase();
        PLUGINS
            .iter()
            .find(|plugin| plugin.extensions.contains(&ext.as_str()))
    }

    /// Lowercase language tag for an extension, AST-parsed or not
    pub fn language_tag(extension: &str) -> Option<&'static str> {
        if let Some(plugin) = Self::plugin_for_extension(extension) {
            return Some(plugin.name);
        }
        let tag = match extension.to_lowercase().as_str() {
            "json" => "json",
            "yaml" | "yml" => "yaml",
            "xml" => "xml",
            "html" | "htm" => "html",
            "css" | "scss" | "sass" => "css",
            "md" | "markdown" => "markdown",
            "txt" => "text",
            "sh" | "bash" => "shell",
            "sql" => "sql",
            "toml" => "toml",
            "ini" | "conf" | "cfg" => "config",
            _ => return None,
        };
        Some(tag)
    }

    /// Whether files with this extension go straight to the line chunker
    pub fn routes_to_line_chunker(extension: &str) -> bool {
        Self::plugin_for_extension(extension).is_none()
    }
}

/// See [`LanguageRegistry::plugin_for_extension`]
pub fn plugin_for_extension(extension: &str) -> Option<&'static LanguagePlugin> {
    LanguageRegistry::plugin_for_extension(extension)
}

/// See [`LanguageRegistry::language_tag`]
pub fn language_tag(extension: &str) -> Option<&'static str> {
    LanguageRegistry::language_tag(extension)
}

/// See [`LanguageRegistry::routes_to_line_chunker`]
pub fn routes_to_line_chunker(extension: &str) -> bool {
    LanguageRegistry::routes_to_line_chunker(extension)
}
