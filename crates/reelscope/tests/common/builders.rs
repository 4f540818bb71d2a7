//! Builder patterns for creating test configs and URL lists.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};

/// Builder for config JSON documents, so tests can tweak one section
/// without spelling out the rest.
pub struct ConfigBuilder {
    root: Map<String, Value>,
}

impl ConfigBuilder {
    /// Minimal valid config: version, input file and output directory.
    pub fn new() -> Self {
        let mut root = Map::new();
        root.insert("version".to_string(), json!("1.0"));
        root.insert("input_file".to_string(), json!("links.txt"));
        root.insert("output_directory".to_string(), json!("out"));
        Self { root }
    }

    pub fn version(self, version: &str) -> Self {
        self.set("version", json!(version))
    }

    pub fn input_file(self, path: &str) -> Self {
        self.set("input_file", json!(path))
    }

    pub fn output_directory(self, path: &str) -> Self {
        self.set("output_directory", json!(path))
    }

    pub fn worker_count(self, count: usize) -> Self {
        self.set("worker_count", json!(count))
    }

    pub fn retry(self, retry: Value) -> Self {
        self.set("retry", retry)
    }

    pub fn provider(self, provider: Value) -> Self {
        self.set("provider", provider)
    }

    pub fn frames(self, frames: Value) -> Self {
        self.set("frames", frames)
    }

    pub fn report(self, report: Value) -> Self {
        self.set("report", report)
    }

    /// Sets any top-level key, including ones the schema does not know.
    pub fn set(mut self, key: &str, value: Value) -> Self {
        self.root.insert(key.to_string(), value);
        self
    }

    pub fn without(mut self, key: &str) -> Self {
        self.root.remove(key);
        self
    }

    pub fn build(self) -> String {
        Value::Object(self.root).to_string()
    }

    /// Writes the config to `dir/reelscope.json` and returns the path.
    pub fn write_to(self, dir: &Path) -> PathBuf {
        let path = dir.join("reelscope.json");
        std::fs::write(&path, self.build()).expect("Failed to write config");
        path
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes a URL list file, one entry per line.
pub fn write_url_list(dir: &Path, urls: &[&str]) -> PathBuf {
    let path = dir.join("links.txt");
    std::fs::write(&path, urls.join("\n")).expect("Failed to write URL list");
    path
}
