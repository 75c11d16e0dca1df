//! Output file naming
//!
//! Entry and chunk file names come from templates with `[name]`, `[id]` and
//! `[hash]` / `[hash:N]` tokens. Hashes are content addressed (SHA-256), so an
//! unchanged chunk keeps its file name across builds.

use std::{fmt, path::PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::PipelineError;

/// Hash length used by a bare `[hash]` token
pub const DEFAULT_HASH_LENGTH: usize = 20;
const MAX_HASH_LENGTH: usize = 64;

static TEMPLATE_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[([a-z]+)(?::(\d+))?\]").expect("template token pattern is valid")
});

/// Lowercase hex SHA-256 of `content`
pub fn content_hash(content: &[u8]) -> String {
    format!("{:x}", Sha256::digest(content))
}

/// Stable identifier of a split chunk, assigned in discovery order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(u32);

impl ChunkId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out chunk ids in the order chunks are discovered
#[derive(Debug, Default)]
pub struct ChunkIdAllocator {
    next: u32,
}

impl ChunkIdAllocator {
    pub fn allocate(&mut self) -> ChunkId {
        let id = ChunkId(self.next);
        self.next += 1;
        id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Name,
    Id,
    Hash(usize),
}

/// A parsed filename template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl FilenameTemplate {
    pub fn parse(template: &str) -> Result<Self, PipelineError> {
        let invalid = |reason: String| PipelineError::InvalidTemplate {
            template: template.to_owned(),
            reason,
        };

        let mut segments = Vec::new();
        let mut last = 0;
        for caps in TEMPLATE_TOKEN.captures_iter(template) {
            let whole = caps.get(0).expect("group 0 always participates");
            if whole.start() > last {
                segments.push(Segment::Literal(template[last..whole.start()].to_owned()));
            }
            last = whole.end();

            let length = caps
                .get(2)
                .map(|digits| digits.as_str().parse::<usize>())
                .transpose()
                .map_err(|err| invalid(format!("bad hash length: {err}")))?;

            let segment = match (&caps[1], length) {
                ("name", None) => Segment::Name,
                ("id", None) => Segment::Id,
                ("hash" | "contenthash", None) => Segment::Hash(DEFAULT_HASH_LENGTH),
                ("hash" | "contenthash", Some(length)) => {
                    if length == 0 || length > MAX_HASH_LENGTH {
                        return Err(invalid(format!(
                            "hash length must be between 1 and {MAX_HASH_LENGTH}"
                        )));
                    }
                    Segment::Hash(length)
                }
                _ => return Err(invalid(format!("unknown token `{}`", &caps[0]))),
            };
            segments.push(segment);
        }
        if last < template.len() {
            segments.push(Segment::Literal(template[last..].to_owned()));
        }

        if segments.is_empty() {
            return Err(invalid("template is empty".to_owned()));
        }

        Ok(Self {
            source: template.to_owned(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn has_name(&self) -> bool {
        self.segments.contains(&Segment::Name)
    }

    pub fn has_id(&self) -> bool {
        self.segments.contains(&Segment::Id)
    }

    pub fn has_hash(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Hash(_)))
    }

    fn render(&self, name: &str, id: Option<ChunkId>, content: &[u8]) -> String {
        let hash = self.has_hash().then(|| content_hash(content));
        let mut out = String::with_capacity(self.source.len() + 16);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Name => out.push_str(name),
                Segment::Id => {
                    if let Some(id) = id {
                        out.push_str(&id.to_string());
                    }
                }
                Segment::Hash(length) => {
                    if let Some(hash) = &hash {
                        out.push_str(&hash[..*length]);
                    }
                }
            }
        }
        out
    }
}

impl fmt::Display for FilenameTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Output directory, filename templates and public URL prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    path: PathBuf,
    filename: FilenameTemplate,
    chunk_filename: FilenameTemplate,
    public_path: String,
}

impl OutputSpec {
    pub fn new(
        path: impl Into<PathBuf>,
        filename: &str,
        chunk_filename: &str,
        public_path: impl Into<String>,
    ) -> Result<Self, PipelineError> {
        let filename = FilenameTemplate::parse(filename)?;
        if !filename.has_name() {
            return Err(PipelineError::InvalidTemplate {
                template: filename.source,
                reason: "entry filenames need a `[name]` token".to_owned(),
            });
        }
        if filename.has_id() {
            return Err(PipelineError::InvalidTemplate {
                template: filename.source,
                reason: "`[id]` is only available for chunk filenames".to_owned(),
            });
        }

        let chunk_filename = FilenameTemplate::parse(chunk_filename)?;
        if !chunk_filename.has_id() && !chunk_filename.has_hash() {
            return Err(PipelineError::InvalidTemplate {
                template: chunk_filename.source,
                reason: "chunk filenames need an `[id]` or `[hash]` token".to_owned(),
            });
        }

        Ok(Self {
            path: path.into(),
            filename,
            chunk_filename,
            public_path: public_path.into(),
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn filename(&self) -> &FilenameTemplate {
        &self.filename
    }

    pub fn chunk_filename(&self) -> &FilenameTemplate {
        &self.chunk_filename
    }

    pub fn public_path(&self) -> &str {
        &self.public_path
    }
}

/// Computes file names and public URLs for emitted bundles
#[derive(Debug, Clone, Copy)]
pub struct OutputNamer<'a> {
    spec: &'a OutputSpec,
}

impl<'a> OutputNamer<'a> {
    pub fn new(spec: &'a OutputSpec) -> Self {
        Self { spec }
    }

    /// File name of an entry bundle; `[hash]` (if used) covers `content`
    pub fn entry_filename(&self, name: &str, content: &[u8]) -> String {
        self.spec.filename.render(name, None, content)
    }

    /// File name of a chunk; `[name]` renders as the chunk id
    pub fn chunk_filename(&self, id: ChunkId, content: &[u8]) -> String {
        self.spec
            .chunk_filename
            .render(&id.to_string(), Some(id), content)
    }

    /// URL the host page loads `filename` from
    pub fn public_url(&self, filename: &str) -> String {
        format!("{}{}", self.spec.public_path, filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> OutputSpec {
        OutputSpec::new("dist", "[name].js", "[hash:5].[id].js", "/assets/").unwrap()
    }

    #[test]
    fn test_entry_filename() {
        let spec = spec();
        let namer = OutputNamer::new(&spec);
        assert_eq!(namer.entry_filename("app", b"whatever"), "app.js");
        assert_eq!(namer.public_url("app.js"), "/assets/app.js");
    }

    #[test]
    fn test_chunk_filename_is_content_addressed() {
        let spec = spec();
        let namer = OutputNamer::new(&spec);
        let id = ChunkId::new(3);

        let first = namer.chunk_filename(id, b"export default 1;");
        let second = namer.chunk_filename(id, b"export default 1;");
        let changed = namer.chunk_filename(id, b"export default 2;");

        assert_eq!(first, second);
        assert_ne!(first, changed);
        assert!(first.ends_with(".3.js"));
        assert_eq!(first.len(), "abcde.3.js".len());
        assert_eq!(&first[..5], &content_hash(b"export default 1;")[..5]);
    }

    #[test]
    fn test_default_hash_length() {
        let spec = OutputSpec::new("dist", "[name].[hash].js", "[id].[contenthash].js", "").unwrap();
        let namer = OutputNamer::new(&spec);
        let name = namer.entry_filename("app", b"x");
        assert_eq!(name.len(), "app.".len() + DEFAULT_HASH_LENGTH + ".js".len());
        assert_eq!(
            namer.chunk_filename(ChunkId::new(0), b"x"),
            format!("0.{}.js", &content_hash(b"x")[..DEFAULT_HASH_LENGTH])
        );
    }

    #[test]
    fn test_content_hash_is_sha256_hex() {
        assert_eq!(
            content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_template_validation() {
        assert!(matches!(
            OutputSpec::new("dist", "bundle.js", "[id].js", "/"),
            Err(PipelineError::InvalidTemplate { .. })
        ));
        assert!(OutputSpec::new("dist", "[name].[id].js", "[id].js", "/").is_err());
        assert!(OutputSpec::new("dist", "[name].js", "chunk.js", "/").is_err());
        assert!(OutputSpec::new("dist", "[name].js", "[chunkhash].js", "/").is_err());
        assert!(OutputSpec::new("dist", "[name].js", "[hash:0].js", "/").is_err());
        assert!(OutputSpec::new("dist", "[name].js", "[hash:65].js", "/").is_err());
        assert!(FilenameTemplate::parse("").is_err());
    }

    #[test]
    fn test_chunk_ids_follow_discovery_order() {
        let mut ids = ChunkIdAllocator::default();
        assert_eq!(ids.allocate(), ChunkId::new(0));
        assert_eq!(ids.allocate(), ChunkId::new(1));
    }
}
