//! # Control Plane
//!
//! Text commands accepted on the control connection. Every command
//! returns its output as a string; failures are rendered into that text
//! and never abort the connection.
//!
//! ```text
//! add reporter|storage <class name> <arguments>
//! add filter|transformer <class name> position=<number> <arguments>
//! add sketch <class name>
//! remove reporter|storage|sketch <class name>
//! remove filter|transformer <position number>
//! list reporters|storages|filters|sketches|transformers|all
//! config load|save <filename>
//! ```
//!
//! `config save` writes the live pipeline as a replayable script of `add`
//! lines; `config load` replays one.

use crate::KernelError;
use crate::kernel::Kernel;
use crate::registry::Kind;
use regex::Regex;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::LazyLock;

const ADD_REPORTER_STORAGE: &str = "add reporter|storage <class name> <arguments>";
const ADD_FILTER_TRANSFORMER: &str =
    "add filter|transformer <class name> position=<number> <arguments>";
const ADD_SKETCH: &str = "add sketch <class name>";
const REMOVE_REPORTER_STORAGE_SKETCH: &str = "remove reporter|storage|sketch <class name>";
const REMOVE_FILTER_TRANSFORMER: &str = "remove filter|transformer <position number>";
const LIST: &str = "list reporters|storages|filters|sketches|transformers|all";
const CONFIG: &str = "config load|save <filename>";
const EXIT: &str = "exit";

/// Matches a `position=<n>` token anywhere in an argument string, with or
/// without whitespace around the `=`.
static POSITION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)position\s*=\s*(\S*)").ok());

/// Listing of every control command.
pub fn control_help() -> String {
    format!(
        "Available commands:\n\t{}\n\t{}\n\t{}\n\t{}\n\t{}\n\t{}\n\t{}\n\t{}",
        ADD_REPORTER_STORAGE,
        ADD_FILTER_TRANSFORMER,
        ADD_SKETCH,
        REMOVE_REPORTER_STORAGE_SKETCH,
        REMOVE_FILTER_TRANSFORMER,
        LIST,
        CONFIG,
        EXIT
    )
}

fn usage(lines: &[&str]) -> String {
    let mut out = String::from("Usage:");
    for line in lines {
        out.push_str("\n\t");
        out.push_str(line);
    }
    out
}

/// Split on whitespace into at most `limit` tokens; the last keeps the rest.
fn split_tokens(line: &str, limit: usize) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut rest = line.trim();
    while !rest.is_empty() {
        if tokens.len() + 1 == limit {
            tokens.push(rest);
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(end) => {
                tokens.push(&rest[..end]);
                rest = rest[end..].trim_start();
            }
            None => {
                tokens.push(rest);
                break;
            }
        }
    }
    tokens
}

/// Pull the `position=<n>` token out of `input`.
///
/// Returns the raw position value (if any) and the remaining arguments
/// with exactly that token removed.
pub fn extract_position(input: &str) -> (Option<String>, String) {
    let Some(re) = POSITION.as_ref() else {
        return (None, input.trim().to_string());
    };
    let Some(captures) = re.captures(input) else {
        return (None, input.trim().to_string());
    };
    let (Some(whole), Some(value)) = (captures.get(0), captures.get(1)) else {
        return (None, input.trim().to_string());
    };

    let before = input[..whole.start()].trim();
    let after = input[whole.end()..].trim();
    let arguments = match (before.is_empty(), after.is_empty()) {
        (true, _) => after.to_string(),
        (false, true) => before.to_string(),
        (false, false) => format!("{} {}", before, after),
    };
    let value = value.as_str();
    ((!value.is_empty()).then(|| value.to_string()), arguments)
}

fn describe(position: usize, name: &str, arguments: &str) -> String {
    if arguments.is_empty() {
        format!("\t{}. {}", position, name)
    } else {
        format!("\t{}. {} ({})", position, name, arguments)
    }
}

fn add_failure(error: &KernelError) -> String {
    match error {
        KernelError::UnknownComponent { .. } => "error: Unable to find/load class".to_string(),
        KernelError::InvalidPosition(_) => "error: Invalid position".to_string(),
        other => format!("failed ({})", other),
    }
}

impl Kernel {
    /// Execute one control command line and return its output.
    pub fn execute(&self, line: &str) -> String {
        let tokens = split_tokens(line, 4);
        match tokens.first().map(|t| t.to_ascii_lowercase()).as_deref() {
            Some("add") => self.add_command(&tokens),
            Some("remove") => self.remove_command(&tokens),
            Some("list") => self.list_command(&tokens),
            Some("config") => self.config_command(&tokens),
            _ => control_help(),
        }
    }

    // =========================================================================
    // ADD
    // =========================================================================

    fn add_command(&self, tokens: &[&str]) -> String {
        let all = [ADD_REPORTER_STORAGE, ADD_FILTER_TRANSFORMER, ADD_SKETCH];
        let Some(kind) = tokens
            .get(1)
            .and_then(|k| Kind::parse(&k.to_ascii_lowercase()))
        else {
            return usage(&all);
        };
        let class = tokens.get(2).copied();
        let rest = tokens.get(3).copied().unwrap_or_default();

        match (kind, class) {
            (Kind::Reporter, Some(class)) => {
                tracing::info!(reporter = class, "adding reporter");
                let outcome = self.add_reporter(class, rest);
                finish(format!("Adding reporter {}... ", class), outcome)
            }
            (Kind::Storage, Some(class)) => {
                tracing::info!(storage = class, "adding storage");
                let outcome = self.add_storage(class, rest);
                finish(format!("Adding storage {}... ", class), outcome)
            }
            (Kind::Filter | Kind::Transformer, Some(class)) if tokens.len() == 4 => {
                let header = format!("Adding {} {}... ", kind.as_str(), class);
                let (position, arguments) = extract_position(rest);
                let Some(position) = position.and_then(|p| p.parse::<usize>().ok()) else {
                    return header + "error: Position must be specified and must be a number";
                };
                let outcome = if kind == Kind::Filter {
                    self.add_filter(class, position, &arguments)
                } else {
                    self.add_transformer(class, position, &arguments)
                };
                finish(header, outcome)
            }
            (Kind::Filter | Kind::Transformer, _) => usage(&[ADD_FILTER_TRANSFORMER]),
            (Kind::Sketch, Some(class)) => {
                let outcome = self.add_sketch(class);
                finish(format!("Adding sketch {}... ", class), outcome)
            }
            (Kind::Reporter | Kind::Storage, None) => usage(&[ADD_REPORTER_STORAGE]),
            (Kind::Sketch, None) => usage(&[ADD_SKETCH]),
        }
    }

    // =========================================================================
    // REMOVE
    // =========================================================================

    fn remove_command(&self, tokens: &[&str]) -> String {
        let all = [REMOVE_REPORTER_STORAGE_SKETCH, REMOVE_FILTER_TRANSFORMER];
        let (Some(kind), Some(target)) = (tokens.get(1), tokens.get(2)) else {
            return usage(&all);
        };
        let Some(kind) = Kind::parse(&kind.to_ascii_lowercase()) else {
            return usage(&all);
        };

        match kind {
            Kind::Reporter => match self.remove_reporter(target) {
                Ok(()) => format!("Shutting down reporter {}... done", target),
                Err(KernelError::NotFound { .. }) => format!("Reporter {} not found", target),
                Err(e) => format!("Shutting down reporter {}... error: {}", target, e),
            },
            Kind::Storage => match self.remove_storage(target) {
                Ok(counts) => format!(
                    "Shutting down storage {}... done ({} vertices and {} edges added)",
                    target, counts.vertices, counts.edges
                ),
                Err(KernelError::NotFound { .. }) => format!("Storage {} not found", target),
                Err(e) => format!("Shutting down storage {}... error: {}", target, e),
            },
            Kind::Sketch => match self.remove_sketch(target) {
                Ok(()) => format!("Removing sketch: {}... done", target),
                Err(_) => format!("Sketch {} not found", target),
            },
            Kind::Filter | Kind::Transformer => {
                let Ok(index) = target.parse::<usize>() else {
                    tracing::warn!(index = %target, "invalid index");
                    return "Error: Invalid index (Not a number)".to_string();
                };
                let removed = if kind == Kind::Filter {
                    self.remove_filter(index)
                } else {
                    self.remove_transformer(index)
                };
                match removed {
                    Ok(name) => format!("Removing {} {}... done", kind.as_str(), name),
                    Err(_) => {
                        tracing::warn!(kind = kind.as_str(), index, "remove with bad index");
                        format!("Error: Unable to remove {} - bad index", kind.as_str())
                    }
                }
            }
        }
    }

    // =========================================================================
    // LIST
    // =========================================================================

    fn list_command(&self, tokens: &[&str]) -> String {
        let Some(kind) = tokens.get(1).map(|k| k.to_ascii_lowercase()) else {
            return usage(&[LIST]);
        };
        match kind.as_str() {
            "reporters" => listing("reporter(s)", "No reporters added", self.reporters()),
            "storages" => listing(
                "storage(s)",
                "No storages added",
                self.storages()
                    .into_iter()
                    .map(|s| (s.name, s.arguments))
                    .collect(),
            ),
            "filters" => listing("filter(s)", "No filters added", self.filters()),
            "transformers" => listing("transformer(s)", "No transformers added", self.transformers()),
            "sketches" => listing(
                "sketch(es)",
                "No sketches added",
                self.sketches().into_iter().map(|s| (s, String::new())).collect(),
            ),
            "all" => ["reporters", "storages", "filters", "transformers", "sketches"]
                .iter()
                .map(|k| self.list_command(&["list", k]))
                .collect::<Vec<_>>()
                .join("\n"),
            _ => usage(&[LIST]),
        }
    }

    // =========================================================================
    // CONFIG
    // =========================================================================

    fn config_command(&self, tokens: &[&str]) -> String {
        let (Some(action), Some(_)) = (tokens.get(1), tokens.get(2)) else {
            return usage(&[CONFIG]);
        };
        // A path containing spaces arrives split across the last tokens.
        let path = tokens[2..].join(" ");
        match action.to_ascii_lowercase().as_str() {
            "load" => match self.load_config(Path::new(&path)) {
                Ok(output) if output.is_empty() => "Loading configuration... done".to_string(),
                Ok(output) => format!("Loading configuration...\n{}\ndone", output),
                Err(e) => {
                    tracing::error!(path = %path, error = %e, "configuration load failed");
                    "Loading configuration... error! Unable to open configuration file for reading"
                        .to_string()
                }
            },
            "save" => match self.save_config(Path::new(&path)) {
                Ok(()) => "Saving configuration... done".to_string(),
                Err(e) => {
                    tracing::error!(path = %path, error = %e, "configuration save failed");
                    "Saving configuration... error! Unable to open configuration file for writing"
                        .to_string()
                }
            },
            _ => usage(&[CONFIG]),
        }
    }

    /// The live pipeline as a script of `add` commands.
    ///
    /// Order: filters, transformers, storages, sketches, reporters, so that
    /// replaying it wires the pipeline before any producer starts.
    pub fn config_script(&self) -> String {
        let mut script = String::new();
        let with_args = |command: String, arguments: &str| {
            if arguments.is_empty() {
                command
            } else {
                format!("{} {}", command, arguments)
            }
        };

        for (i, (name, arguments)) in self.filters().into_iter().enumerate() {
            let line = with_args(format!("add filter {} position={}", name, i + 1), &arguments);
            let _ = writeln!(script, "{}", line);
        }
        for (i, (name, arguments)) in self.transformers().into_iter().enumerate() {
            let line = with_args(format!("add transformer {} position={}", name, i + 1), &arguments);
            let _ = writeln!(script, "{}", line);
        }
        for storage in self.storages() {
            let line = with_args(format!("add storage {}", storage.name), &storage.arguments);
            let _ = writeln!(script, "{}", line);
        }
        for name in self.sketches() {
            let _ = writeln!(script, "add sketch {}", name);
        }
        for (name, arguments) in self.reporters() {
            let line = with_args(format!("add reporter {}", name), &arguments);
            let _ = writeln!(script, "{}", line);
        }
        script
    }

    /// Write [`config_script`](Self::config_script) to `path`.
    pub fn save_config(&self, path: &Path) -> Result<(), KernelError> {
        std::fs::write(path, self.config_script())
            .map_err(|e| KernelError::Io(format!("{}: {}", path.display(), e)))
    }

    /// Replay a configuration script, returning the combined output of every
    /// command. Blank lines, `#` comments and nested `config` commands are
    /// skipped.
    pub fn load_config(&self, path: &Path) -> Result<String, KernelError> {
        let script = std::fs::read_to_string(path)
            .map_err(|e| KernelError::Io(format!("{}: {}", path.display(), e)))?;

        let mut outputs = Vec::new();
        for line in script.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.split_whitespace().next() == Some("config") {
                tracing::warn!(line, "nested config command skipped");
                continue;
            }
            outputs.push(self.execute(line));
        }
        Ok(outputs.join("\n"))
    }
}

fn finish(header: String, outcome: Result<(), KernelError>) -> String {
    match outcome {
        Ok(()) => header + "done",
        Err(e) => {
            tracing::warn!(error = %e, "{}failed", header);
            header + &add_failure(&e)
        }
    }
}

fn listing(noun: &str, empty: &str, items: Vec<(String, String)>) -> String {
    if items.is_empty() {
        return empty.to_string();
    }
    let mut out = format!("{} {} added:", items.len(), noun);
    for (i, (name, arguments)) in items.iter().enumerate() {
        out.push('\n');
        out.push_str(&describe(i + 1, name, arguments));
    }
    out
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::KernelSettings;

    fn kernel() -> Kernel {
        Kernel::with_builtins(KernelSettings::default())
    }

    #[test]
    fn test_split_tokens_keeps_rest() {
        assert_eq!(
            split_tokens("  add filter  ProcessFilter position=1 key=name  ", 4),
            vec!["add", "filter", "ProcessFilter", "position=1 key=name"]
        );
        assert_eq!(split_tokens("list", 4), vec!["list"]);
        assert!(split_tokens("   ", 4).is_empty());
    }

    #[test]
    fn test_extract_position_variants() {
        assert_eq!(
            extract_position("position=2 key=a"),
            (Some("2".to_string()), "key=a".to_string())
        );
        assert_eq!(
            extract_position("key=a position = 3 op=="),
            (Some("3".to_string()), "key=a op==".to_string())
        );
        assert_eq!(
            extract_position("key=a position=4"),
            (Some("4".to_string()), "key=a".to_string())
        );
        assert_eq!(extract_position("key=a"), (None, "key=a".to_string()));
        // Only a whole `position` token counts.
        assert_eq!(
            extract_position("preposition=1"),
            (None, "preposition=1".to_string())
        );
    }

    #[test]
    fn test_unknown_verb_prints_help() {
        let kernel = kernel();
        assert!(kernel.execute("frobnicate").starts_with("Available commands:"));
        assert!(kernel.execute("").starts_with("Available commands:"));
    }

    #[test]
    fn test_add_unknown_class() {
        let kernel = kernel();
        assert_eq!(
            kernel.execute("add storage Neo4j"),
            "Adding storage Neo4j... error: Unable to find/load class"
        );
    }

    #[test]
    fn test_component_kind_is_case_insensitive() {
        let kernel = kernel();
        assert_eq!(
            kernel.execute("add STORAGE Memory"),
            "Adding storage Memory... done"
        );
        assert!(kernel.execute("add widget Memory").starts_with("Usage:"));
        assert!(kernel.execute("remove widget Memory").starts_with("Usage:"));
        kernel.execute("add Sketch Counter");
        assert_eq!(
            kernel.execute("remove SKETCH Counter"),
            "Removing sketch: Counter... done"
        );
    }

    #[test]
    fn test_add_filter_requires_numeric_position() {
        let kernel = kernel();
        assert_eq!(
            kernel.execute("add filter ProcessFilter key=name op== value=bash"),
            "Adding filter ProcessFilter... error: Position must be specified and must be a number"
        );
        assert_eq!(
            kernel.execute("add filter ProcessFilter position=x key=name op== value=bash"),
            "Adding filter ProcessFilter... error: Position must be specified and must be a number"
        );
        assert_eq!(
            kernel.execute("add filter ProcessFilter position=3 key=name op== value=bash"),
            "Adding filter ProcessFilter... error: Invalid position"
        );
        assert_eq!(kernel.execute("list filters"), "No filters added");
    }

    #[test]
    fn test_remove_filter_index_errors() {
        let kernel = kernel();
        assert_eq!(
            kernel.execute("remove filter abc"),
            "Error: Invalid index (Not a number)"
        );
        assert_eq!(
            kernel.execute("remove filter 1"),
            "Error: Unable to remove filter - bad index"
        );
        assert_eq!(
            kernel.execute("remove transformer 0"),
            "Error: Unable to remove transformer - bad index"
        );
    }

    #[test]
    fn test_list_formats_arguments() {
        let kernel = kernel();
        assert_eq!(
            kernel.execute("add transformer MaxDepth position=1 depth=2"),
            "Adding transformer MaxDepth... done"
        );
        assert_eq!(kernel.execute("add sketch Counter"), "Adding sketch Counter... done");
        assert_eq!(
            kernel.execute("list transformers"),
            "1 transformer(s) added:\n\t1. MaxDepth (depth=2)"
        );
        assert_eq!(
            kernel.execute("list sketches"),
            "1 sketch(es) added:\n\t1. Counter"
        );
        let all = kernel.execute("list all");
        assert!(all.contains("No reporters added"));
        assert!(all.contains("No storages added"));
    }

    #[test]
    fn test_config_script_order() {
        let kernel = kernel();
        kernel.execute("add storage Memory");
        kernel.execute("add sketch Counter");
        kernel.execute("add transformer StripAnnotations position=1 keys=uid");
        kernel.execute("add filter ProcessFilter position=1 key=name op== value=bash");
        assert_eq!(
            kernel.config_script(),
            "add filter ProcessFilter position=1 key=name op== value=bash\n\
             add transformer StripAnnotations position=1 keys=uid\n\
             add storage Memory\n\
             add sketch Counter\n"
        );
    }

    #[test]
    fn test_config_load_missing_file() {
        let kernel = kernel();
        assert_eq!(
            kernel.execute("config load /nonexistent/provkernel.config"),
            "Loading configuration... error! Unable to open configuration file for reading"
        );
        assert!(kernel.execute("config").starts_with("Usage:"));
    }
}
