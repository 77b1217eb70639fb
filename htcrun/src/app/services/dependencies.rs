// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::{BTreeMap, BTreeSet};

/// Top-level modules shipped with CPython (including compiled-in built-ins).
/// Never pinned, even when a registry entry with the same name exists.
const PYTHON_STDLIB: &[&str] = &[
    "__future__", "_thread", "abc", "argparse", "array", "ast", "asyncio", "atexit", "base64",
    "bisect", "builtins", "bz2", "calendar", "cmath", "codecs", "collections", "concurrent",
    "configparser", "contextlib", "contextvars", "copy", "csv", "ctypes", "dataclasses",
    "datetime", "decimal", "difflib", "dis", "email", "enum", "errno", "faulthandler", "fcntl",
    "filecmp", "fnmatch", "fractions", "functools", "gc", "getpass", "gettext", "glob", "graphlib",
    "gzip", "hashlib", "heapq", "hmac", "html", "http", "importlib", "inspect", "io", "ipaddress",
    "itertools", "json", "keyword", "linecache", "locale", "logging", "lzma", "marshal", "math",
    "mimetypes", "multiprocessing", "numbers", "operator", "os", "pathlib", "pickle", "platform",
    "pprint", "queue", "random", "re", "resource", "sched", "secrets", "select", "shlex",
    "shutil", "signal", "socket", "sqlite3", "ssl", "stat", "statistics", "string", "struct",
    "subprocess", "sys", "sysconfig", "tarfile", "tempfile", "textwrap", "threading", "time",
    "timeit", "tomllib", "traceback", "types", "typing", "unicodedata", "unittest", "urllib",
    "uuid", "warnings", "weakref", "xml", "zipfile", "zlib", "zoneinfo",
];

/// Pinned third-party package.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Dependency {
    pub name: String,
    pub version: String,
}

impl Dependency {
    pub fn requirement(&self) -> String {
        format!("{}=={}", self.name, self.version)
    }
}

/// Curated module name → version table the scan resolves against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageRegistry {
    versions: BTreeMap<String, String>,
}

impl PackageRegistry {
    pub fn new(versions: BTreeMap<String, String>) -> Self {
        Self { versions }
    }

    pub fn version_of(&self, module: &str) -> Option<&str> {
        self.versions.get(module).map(String::as_str)
    }
}

impl FromIterator<(String, String)> for PackageRegistry {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            versions: iter.into_iter().collect(),
        }
    }
}

pub fn is_stdlib(module: &str) -> bool {
    PYTHON_STDLIB.contains(&module)
}

/// Root module names named by `import` / `from ... import` statements, in source order.
/// Relative imports are skipped. This is a line scan, not a parser: imports built with
/// `importlib` or spread over continuation lines are not seen.
pub fn imported_modules(source: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    let mut push = |name: &str| {
        let root = name.split('.').next().unwrap_or_default().trim();
        if is_identifier(root) && seen.insert(root.to_string()) {
            out.push(root.to_string());
        }
    };

    for raw in source.lines() {
        let line = raw.split('#').next().unwrap_or_default();
        for statement in line.split(';').map(str::trim) {
            if let Some(rest) = statement.strip_prefix("import ") {
                for item in rest.split(',') {
                    let module = item.split_whitespace().next().unwrap_or_default();
                    push(module);
                }
            } else if let Some(rest) = statement.strip_prefix("from ") {
                let mut parts = rest.split_whitespace();
                let (Some(module), Some("import")) = (parts.next(), parts.next()) else {
                    continue;
                };
                if module.starts_with('.') {
                    continue;
                }
                push(module);
            }
        }
    }
    out
}

/// Third-party packages imported by `source` that the registry can pin, ordered by name.
pub fn discover_dependencies(source: &str, registry: &PackageRegistry) -> Vec<Dependency> {
    let mut deps = Vec::new();
    for module in imported_modules(source) {
        if is_stdlib(&module) {
            continue;
        }
        match registry.version_of(&module) {
            Some(version) => deps.push(Dependency {
                name: module,
                version: version.to_string(),
            }),
            None => tracing::debug!("no pinned version for imported module '{module}'; skipping"),
        }
    }
    deps.sort();
    deps
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}
