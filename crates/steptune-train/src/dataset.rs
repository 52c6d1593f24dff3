//! Dataset loading for supervised fine-tuning.
//!
//! Accepts a single UTF-8 file that is either a JSON array of objects or
//! newline-delimited JSON objects. Each object carries one of two schemas:
//!
//! ```json
//! {"instruction": "What is 2+2?", "output": "4"}
//! {"query": "What is 2+2?", "response": "4"}
//! ```
//!
//! `query`/`response` records are renamed into the `instruction`/`output`
//! shape at load time. After parsing, records are shuffled with an explicit
//! seed and optionally truncated to a maximum count, then rendered into
//! `(source, target)` examples through the prompt template.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;
use tracing::info;

use steptune_core::PromptTemplate;

/// One raw training item, normalized to the canonical schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub instruction: String,
    pub output: String,
}

/// A rendered training example: the prompt string the model reads and the
/// completion string it must learn to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Example {
    /// Rendered prompt; empty when the record's instruction is empty.
    pub source: String,
    /// Expected completion plus the end-of-sequence marker.
    pub target: String,
}

/// On-disk layout of the dataset file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetFormat {
    /// A single JSON array of record objects.
    Array,
    /// One JSON record object per line.
    LineDelimited,
    /// Neither: the file cannot be a dataset.
    Invalid,
}

/// Decide the file layout from its first non-whitespace byte.
///
/// This replaces parse-then-fallback control flow: the decision is made once,
/// and a file that fails to parse under its detected layout is an error
/// rather than a trigger for re-parsing under the other one.
pub fn detect_format(text: &str) -> DatasetFormat {
    match text.trim_start().as_bytes().first() {
        Some(b'[') => DatasetFormat::Array,
        Some(b'{') => DatasetFormat::LineDelimited,
        _ => DatasetFormat::Invalid,
    }
}

// ── Deserialization helpers ───────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRecord {
    Instruction { instruction: String, output: String },
    Query { query: String, response: String },
}

impl From<RawRecord> for Record {
    fn from(raw: RawRecord) -> Self {
        match raw {
            RawRecord::Instruction { instruction, output } => Record { instruction, output },
            RawRecord::Query { query, response } => {
                Record { instruction: query, output: response }
            }
        }
    }
}

/// Parse a dataset file into records in file order.
pub fn load_records(path: &Path) -> Result<Vec<Record>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Cannot read {}", path.display()))?;

    let records: Vec<Record> = match detect_format(&text) {
        DatasetFormat::Array => {
            let raw: Vec<RawRecord> = serde_json::from_str(&text).with_context(|| {
                format!("JSON array parse error in {}", path.display())
            })?;
            raw.into_iter().map(Record::from).collect()
        }
        DatasetFormat::LineDelimited => {
            let mut out = Vec::new();
            for (line_no, line) in text.lines().enumerate() {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let raw: RawRecord = serde_json::from_str(trimmed).with_context(|| {
                    format!(
                        "JSON parse error at {}:{}: expected {{\"instruction\":…,\"output\":…}} or {{\"query\":…,\"response\":…}}",
                        path.display(),
                        line_no + 1
                    )
                })?;
                out.push(Record::from(raw));
            }
            out
        }
        DatasetFormat::Invalid => anyhow::bail!(
            "{} is neither a JSON array nor line-delimited JSON objects",
            path.display()
        ),
    };

    anyhow::ensure!(!records.is_empty(), "No records found in {}", path.display());
    Ok(records)
}

// ── SupervisedDataset ─────────────────────────────────────────────────────────

/// The immutable, shuffled, rendered dataset a training run iterates over.
pub struct SupervisedDataset {
    examples: Vec<Example>,
}

impl SupervisedDataset {
    /// Load, normalize, shuffle and cap a dataset file, then render every
    /// record into an example.
    ///
    /// `seed` drives the shuffle; the same seed over the same file yields the
    /// same order. `max_examples` truncates after shuffling, matching a
    /// "random sample of N" semantics rather than "first N of the file".
    pub fn load(
        path: &Path,
        template: &PromptTemplate,
        eos_token: &str,
        seed: u64,
        max_examples: Option<usize>,
    ) -> Result<Self> {
        let mut records = load_records(path)?;
        let total = records.len();

        let mut rng = StdRng::seed_from_u64(seed);
        records.shuffle(&mut rng);
        if let Some(cap) = max_examples {
            records.truncate(cap);
        }

        info!(
            path = %path.display(),
            total,
            used = records.len(),
            seed,
            "Dataset loaded"
        );

        Ok(Self::from_records(&records, template, eos_token))
    }

    /// Render already-loaded records. Exposed for tests and for callers that
    /// assemble records programmatically.
    pub fn from_records(records: &[Record], template: &PromptTemplate, eos_token: &str) -> Self {
        let examples = records
            .iter()
            .map(|r| Example {
                source: template.render(&r.instruction),
                target: format!("{}{}", r.output, eos_token),
            })
            .collect();
        Self { examples }
    }

    /// Number of examples after capping.
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    /// Returns `true` when the dataset is empty.
    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// All examples in shuffled order.
    pub fn examples(&self) -> &[Example] {
        &self.examples
    }

    /// Iterate over example slices of `batch_size` (last one may be short).
    pub fn iter_batches(&self, batch_size: usize) -> impl Iterator<Item = &[Example]> {
        self.examples.chunks(batch_size)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_dataset(contents: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, "{contents}").unwrap();
        f
    }

    #[test]
    fn detects_array_and_lines() {
        assert_eq!(detect_format("  [ {\"a\":1} ]"), DatasetFormat::Array);
        assert_eq!(detect_format("{\"a\":1}\n{\"a\":2}"), DatasetFormat::LineDelimited);
        assert_eq!(detect_format("not json"), DatasetFormat::Invalid);
        assert_eq!(detect_format(""), DatasetFormat::Invalid);
    }

    #[test]
    fn loads_json_array() {
        let f = write_dataset(
            r#"[{"instruction": "a", "output": "b"}, {"instruction": "c", "output": "d"}]"#,
        );
        let records = load_records(f.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].instruction, "a");
        assert_eq!(records[1].output, "d");
    }

    #[test]
    fn loads_jsonl_skipping_blank_lines() {
        let f = write_dataset(
            "{\"instruction\": \"a\", \"output\": \"b\"}\n\n{\"instruction\": \"c\", \"output\": \"d\"}\n",
        );
        let records = load_records(f.path()).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn normalizes_query_response_schema() {
        let f = write_dataset(r#"[{"query": "q1", "response": "r1"}]"#);
        let records = load_records(f.path()).unwrap();
        assert_eq!(records[0], Record { instruction: "q1".into(), output: "r1".into() });
    }

    #[test]
    fn malformed_line_reports_line_number() {
        let f = write_dataset("{\"instruction\": \"a\", \"output\": \"b\"}\n{\"instruction\": \"a\"}\n");
        let err = load_records(f.path()).unwrap_err();
        assert!(format!("{err:#}").contains(":2"), "error should name line 2: {err:#}");
    }

    #[test]
    fn invalid_file_errors() {
        let f = write_dataset("instruction,output\na,b\n");
        assert!(load_records(f.path()).is_err());
    }

    #[test]
    fn empty_file_errors() {
        let f = write_dataset("");
        assert!(load_records(f.path()).is_err());
    }

    #[test]
    fn same_seed_same_order_different_seed_differs() {
        let body: String = (0..50)
            .map(|i| format!("{{\"instruction\": \"q{i}\", \"output\": \"a{i}\"}}\n"))
            .collect();
        let f = write_dataset(&body);
        let tpl = PromptTemplate::default();

        let a = SupervisedDataset::load(f.path(), &tpl, "</s>", 42, None).unwrap();
        let b = SupervisedDataset::load(f.path(), &tpl, "</s>", 42, None).unwrap();
        let c = SupervisedDataset::load(f.path(), &tpl, "</s>", 7, None).unwrap();
        assert_eq!(a.examples(), b.examples());
        assert_ne!(a.examples(), c.examples());
    }

    #[test]
    fn cap_truncates_after_shuffle() {
        let body: String = (0..20)
            .map(|i| format!("{{\"instruction\": \"q{i}\", \"output\": \"a{i}\"}}\n"))
            .collect();
        let f = write_dataset(&body);
        let tpl = PromptTemplate::default();
        let ds = SupervisedDataset::load(f.path(), &tpl, "</s>", 42, Some(5)).unwrap();
        assert_eq!(ds.len(), 5);
    }

    #[test]
    fn empty_instruction_renders_empty_source() {
        let records = [Record { instruction: String::new(), output: "out".into() }];
        let ds = SupervisedDataset::from_records(&records, &PromptTemplate::default(), "</s>");
        assert_eq!(ds.examples()[0].source, "");
        assert_eq!(ds.examples()[0].target, "out</s>");
    }

    #[test]
    fn target_ends_with_eos_marker() {
        let records = [Record { instruction: "Add 1 and 2.".into(), output: "3".into() }];
        let ds = SupervisedDataset::from_records(&records, &PromptTemplate::default(), "</s>");
        assert!(ds.examples()[0].target.ends_with("</s>"));
        assert!(ds.examples()[0].source.contains("Add 1 and 2."));
    }

    #[test]
    fn iter_batches_chunking() {
        let records: Vec<Record> = (0..5)
            .map(|i| Record { instruction: format!("q{i}"), output: format!("a{i}") })
            .collect();
        let ds = SupervisedDataset::from_records(&records, &PromptTemplate::default(), "</s>");
        let batches: Vec<_> = ds.iter_batches(2).collect();
        assert_eq!(batches.len(), 3); // [2, 2, 1]
        assert_eq!(batches[2].len(), 1);
    }
}
