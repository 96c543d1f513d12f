use anyhow::Context;
use serde::{Deserialize, Serialize};

/// How a block maps its input port values to its output ports. This is data
/// handed to the editor widget along with the palette; nothing here ever
/// evaluates it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComputeRule {
    /// Emits a fixed value on the single output.
    Emit { value: f64 },
    /// Halves the input onto every output.
    Split,
    /// Sums all inputs onto the single output.
    Sum,
    /// Consumes its input.
    Sink,
}

/// A node type the editor offers on its palette: a name, a fixed number of
/// input and output ports, and a compute rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockTemplate {
    pub name: String,
    pub inputs: u8,
    pub outputs: u8,
    pub rule: ComputeRule,
}

#[derive(Debug, Deserialize)]
struct BlockManifest {
    blocks: Vec<BlockTemplate>,
}

/// The palette of block templates offered to the editor widget.
#[derive(Debug, Clone)]
pub struct BlockLibrary {
    blocks: Vec<BlockTemplate>,
}

impl BlockLibrary {
    /// The stock palette: a constant feed, a splitter, a mixer and a result
    /// sink.
    pub fn builtin() -> Self {
        let blocks = vec![
            BlockTemplate {
                name: "Feed".to_string(),
                inputs: 0,
                outputs: 1,
                rule: ComputeRule::Emit { value: 4.0 },
            },
            BlockTemplate {
                name: "Splitter".to_string(),
                inputs: 1,
                outputs: 2,
                rule: ComputeRule::Split,
            },
            BlockTemplate {
                name: "Mixer".to_string(),
                inputs: 2,
                outputs: 1,
                rule: ComputeRule::Sum,
            },
            BlockTemplate {
                name: "Result".to_string(),
                inputs: 1,
                outputs: 0,
                rule: ComputeRule::Sink,
            },
        ];
        Self { blocks }
    }

    /// Loads a palette from a YAML manifest, replacing the built-ins.
    pub fn from_manifest(raw: &str) -> anyhow::Result<Self> {
        let manifest: BlockManifest =
            serde_yaml::from_str(raw).context("Failed to parse block manifest YAML")?;
        anyhow::ensure!(!manifest.blocks.is_empty(), "Block manifest defines no blocks");
        Ok(Self {
            blocks: manifest.blocks,
        })
    }

    pub fn templates(&self) -> &[BlockTemplate] {
        &self.blocks
    }
}
