//! Built-in language plugins
//!
//! Each plugin is a value: a language tag, the extensions it claims, a
//! grammar loader, and the bucket table mapping concrete grammar node kinds
//! to chunk categories. The tables inherit the node-type names of each
//! tree-sitter grammar.

use crate::types::ChunkType;
use tree_sitter::Language;

/// Node kinds that can carry a declaration's name, probed in left-most DFS
/// order when extracting the `name` field of a chunk.
pub const NAME_KINDS: &[&str] = &[
    "identifier",
    "type_identifier",
    "field_identifier",
    "property_identifier",
    "package_identifier",
    "namespace_identifier",
    "name",
];

/// A language plugin: grammar plus node-kind buckets
pub struct LanguagePlugin {
    /// Lowercase language tag, e.g. "python"
    pub name: &'static str,
    /// Producer name stamped on chunks, e.g. "python_parser"
    pub parser_name: &'static str,
    /// Extensions claimed by this plugin (lowercase, no dot)
    pub extensions: &'static [&'static str],
    /// node kind -> chunk category
    buckets: &'static [(&'static str, ChunkType)],
    grammar: fn() -> Language,
}

impl LanguagePlugin {
    /// Load a fresh grammar instance
    ///
    /// Parsers built from it are not shared across threads; every worker
    /// constructs its own.
    pub fn language(&self) -> Language {
        (self.grammar)()
    }

    /// Category for a grammar node kind, if this plugin chunks it
    pub fn category_for(&self, kind: &str) -> Option<ChunkType> {
        self.buckets
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, ty)| *ty)
    }
}

impl std::fmt::Debug for LanguagePlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanguagePlugin")
            .field("name", &self.name)
            .field("extensions", &self.extensions)
            .finish()
    }
}

fn python_language() -> Language {
    tree_sitter_python::LANGUAGE.into()
}

fn java_language() -> Language {
    tree_sitter_java::LANGUAGE.into()
}

fn javascript_language() -> Language {
    tree_sitter_javascript::LANGUAGE.into()
}

fn typescript_language() -> Language {
    tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
}

fn tsx_language() -> Language {
    tree_sitter_typescript::LANGUAGE_TSX.into()
}

fn c_language() -> Language {
    tree_sitter_c::LANGUAGE.into()
}

fn cpp_language() -> Language {
    tree_sitter_cpp::LANGUAGE.into()
}

fn csharp_language() -> Language {
    tree_sitter_c_sharp::LANGUAGE.into()
}

fn go_language() -> Language {
    tree_sitter_go::LANGUAGE.into()
}

fn rust_language() -> Language {
    tree_sitter_rust::LANGUAGE.into()
}

fn php_language() -> Language {
    tree_sitter_php::LANGUAGE_PHP.into()
}

/// The built-in plugin table
///
/// Order matters only for extension lookup: the first plugin claiming an
/// extension wins.
pub static PLUGINS: &[LanguagePlugin] = &[
    LanguagePlugin {
        name: "python",
        parser_name: "python_parser",
        extensions: &["py"],
        grammar: python_language,
        buckets: &[
            ("function_definition", ChunkType::Function),
            ("decorated_definition", ChunkType::Function),
            ("class_definition", ChunkType::Class),
            ("import_statement", ChunkType::Import),
            ("import_from_statement", ChunkType::Import),
            ("future_import_statement", ChunkType::Import),
            ("comment", ChunkType::Comment),
        ],
    },
    LanguagePlugin {
        name: "java",
        parser_name: "java_parser",
        extensions: &["java"],
        grammar: java_language,
        buckets: &[
            ("class_declaration", ChunkType::Class),
            ("record_declaration", ChunkType::Class),
            ("interface_declaration", ChunkType::Interface),
            ("annotation_type_declaration", ChunkType::Interface),
            ("enum_declaration", ChunkType::Type),
            ("method_declaration", ChunkType::Method),
            ("constructor_declaration", ChunkType::Method),
            ("field_declaration", ChunkType::Field),
            ("import_declaration", ChunkType::Import),
            ("package_declaration", ChunkType::Namespace),
            ("line_comment", ChunkType::Comment),
            ("block_comment", ChunkType::Comment),
        ],
    },
    LanguagePlugin {
        name: "javascript",
        parser_name: "javascript_parser",
        extensions: &["js", "mjs", "cjs", "jsx"],
        grammar: javascript_language,
        buckets: &[
            ("function_declaration", ChunkType::Function),
            ("generator_function_declaration", ChunkType::Function),
            ("class_declaration", ChunkType::Class),
            ("method_definition", ChunkType::Method),
            ("lexical_declaration", ChunkType::Variable),
            ("variable_declaration", ChunkType::Variable),
            ("import_statement", ChunkType::Import),
            ("export_statement", ChunkType::Export),
            ("comment", ChunkType::Comment),
        ],
    },
    LanguagePlugin {
        name: "typescript",
        parser_name: "typescript_parser",
        extensions: &["ts"],
        grammar: typescript_language,
        buckets: TYPESCRIPT_BUCKETS,
    },
    LanguagePlugin {
        name: "typescript",
        parser_name: "typescript_parser",
        extensions: &["tsx"],
        grammar: tsx_language,
        buckets: TYPESCRIPT_BUCKETS,
    },
    LanguagePlugin {
        name: "c",
        parser_name: "c_parser",
        extensions: &["c", "h"],
        grammar: c_language,
        buckets: &[
            ("function_definition", ChunkType::Function),
            ("struct_specifier", ChunkType::Type),
            ("enum_specifier", ChunkType::Type),
            ("union_specifier", ChunkType::Type),
            ("type_definition", ChunkType::Type),
            ("declaration", ChunkType::Variable),
            ("preproc_include", ChunkType::Include),
            ("preproc_def", ChunkType::Macro),
            ("preproc_function_def", ChunkType::Macro),
            ("preproc_ifdef", ChunkType::Preprocessor),
            ("preproc_if", ChunkType::Preprocessor),
            ("comment", ChunkType::Comment),
        ],
    },
    LanguagePlugin {
        name: "cpp",
        parser_name: "cpp_parser",
        extensions: &["cpp", "cc", "cxx", "hpp", "hxx", "hh"],
        grammar: cpp_language,
        buckets: &[
            ("function_definition", ChunkType::Function),
            ("class_specifier", ChunkType::Class),
            ("struct_specifier", ChunkType::Type),
            ("enum_specifier", ChunkType::Type),
            ("union_specifier", ChunkType::Type),
            ("type_definition", ChunkType::Type),
            ("alias_declaration", ChunkType::Type),
            ("template_declaration", ChunkType::Type),
            ("namespace_definition", ChunkType::Namespace),
            ("using_declaration", ChunkType::Using),
            ("field_declaration", ChunkType::Field),
            ("preproc_include", ChunkType::Include),
            ("preproc_def", ChunkType::Macro),
            ("preproc_function_def", ChunkType::Macro),
            ("preproc_ifdef", ChunkType::Preprocessor),
            ("preproc_if", ChunkType::Preprocessor),
            ("comment", ChunkType::Comment),
        ],
    },
    LanguagePlugin {
        name: "csharp",
        parser_name: "csharp_parser",
        extensions: &["cs"],
        grammar: csharp_language,
        buckets: &[
            ("class_declaration", ChunkType::Class),
            ("record_declaration", ChunkType::Class),
            ("struct_declaration", ChunkType::Type),
            ("interface_declaration", ChunkType::Interface),
            ("enum_declaration", ChunkType::Type),
            ("delegate_declaration", ChunkType::Type),
            ("method_declaration", ChunkType::Method),
            ("constructor_declaration", ChunkType::Method),
            ("property_declaration", ChunkType::Field),
            ("field_declaration", ChunkType::Field),
            ("namespace_declaration", ChunkType::Namespace),
            ("file_scoped_namespace_declaration", ChunkType::Namespace),
            ("using_directive", ChunkType::Using),
            ("comment", ChunkType::Comment),
        ],
    },
    LanguagePlugin {
        name: "go",
        parser_name: "go_parser",
        extensions: &["go"],
        grammar: go_language,
        buckets: &[
            ("function_declaration", ChunkType::Function),
            ("method_declaration", ChunkType::Method),
            ("type_declaration", ChunkType::Type),
            ("const_declaration", ChunkType::Constant),
            ("var_declaration", ChunkType::Variable),
            ("import_declaration", ChunkType::Import),
            ("package_clause", ChunkType::Module),
            ("comment", ChunkType::Comment),
        ],
    },
    LanguagePlugin {
        name: "rust",
        parser_name: "rust_parser",
        extensions: &["rs"],
        grammar: rust_language,
        buckets: &[
            ("function_item", ChunkType::Function),
            ("impl_item", ChunkType::Class),
            ("struct_item", ChunkType::Class),
            ("enum_item", ChunkType::Type),
            ("trait_item", ChunkType::Interface),
            ("mod_item", ChunkType::Module),
            ("const_item", ChunkType::Constant),
            ("static_item", ChunkType::Constant),
            ("type_item", ChunkType::Type),
            ("macro_definition", ChunkType::Macro),
            ("use_declaration", ChunkType::Import),
            ("line_comment", ChunkType::Comment),
            ("block_comment", ChunkType::Comment),
        ],
    },
    LanguagePlugin {
        name: "php",
        parser_name: "php_parser",
        extensions: &["php"],
        grammar: php_language,
        buckets: &[
            ("function_definition", ChunkType::Function),
            ("method_declaration", ChunkType::Method),
            ("class_declaration", ChunkType::Class),
            ("trait_declaration", ChunkType::Class),
            ("interface_declaration", ChunkType::Interface),
            ("enum_declaration", ChunkType::Type),
            ("namespace_definition", ChunkType::Namespace),
            ("namespace_use_declaration", ChunkType::Using),
            ("const_declaration", ChunkType::Constant),
            ("property_declaration", ChunkType::Field),
            ("comment", ChunkType::Comment),
        ],
    },
];

const TYPESCRIPT_BUCKETS: &[(&str, ChunkType)] = &[
    ("function_declaration", ChunkType::Function),
    ("generator_function_declaration", ChunkType::Function),
    ("class_declaration", ChunkType::Class),
    ("abstract_class_declaration", ChunkType::Class),
    ("method_definition", ChunkType::Method),
    ("interface_declaration", ChunkType::Interface),
    ("type_alias_declaration", ChunkType::Type),
    ("enum_declaration", ChunkType::Type),
    ("internal_module", ChunkType::Namespace),
    ("lexical_declaration", ChunkType::Variable),
    ("variable_declaration", ChunkType::Variable),
    ("import_statement", ChunkType::Import),
    ("export_statement", ChunkType::Export),
    ("comment", ChunkType::Comment),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_plugin_loads_its_grammar() {
        for plugin in PLUGINS {
            let language = plugin.language();
            assert!(
                language.node_kind_count() > 0,
                "grammar for {} failed to load",
                plugin.name
            );
        }
    }

    #[test]
    fn test_bucket_lookup() {
        let python = PLUGINS.iter().find(|p| p.name == "python").unwrap();
        assert_eq!(
            python.category_for("function_definition"),
            Some(ChunkType::Function)
        );
        assert_eq!(python.category_for("comment"), Some(ChunkType::Comment));
        assert_eq!(python.category_for("call_expression"), None);
    }

    #[test]
    fn test_builtin_language_set_is_covered() {
        let names: std::collections::HashSet<_> = PLUGINS.iter().map(|p| p.name).collect();
        for expected in [
            "python",
            "java",
            "javascript",
            "typescript",
            "c",
            "cpp",
            "csharp",
            "go",
            "rust",
            "php",
        ] {
            assert!(names.contains(expected), "missing plugin {}", expected);
        }
    }

    #[test]
    fn test_no_extension_claimed_twice() {
        let mut seen = std::collections::HashSet::new();
        for plugin in PLUGINS {
            for ext in plugin.extensions {
                assert!(seen.insert(*ext), "extension {} claimed twice", ext);
            }
        }
    }

    #[test]
    fn test_go_consts_map_to_constant() {
        let go = PLUGINS.iter().find(|p| p.name == "go").unwrap();
        assert_eq!(
            go.category_for("const_declaration"),
            Some(ChunkType::Constant)
        );
    }
}
