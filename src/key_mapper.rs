use crate::error::{PipelineError, Result};
use crate::size_spec::{SizeSpecMatch, SizeToken};

/// Destination key with a hole where the size run used to be.
///
/// Built once per invocation from the source key, then rendered once per
/// token. Rendering only swaps the size run; every other segment is copied
/// through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTemplate {
    head: String,
    tail: String,
}

impl KeyTemplate {
    /// # Errors
    /// `SourceFolderMismatch` when `key` does not contain `source_folder`, or
    /// the size run starts before the end of it.
    pub fn new(
        key: &str,
        spec: &SizeSpecMatch,
        source_folder: &str,
        destination_folder: &str,
    ) -> Result<Self> {
        let mismatch = || PipelineError::SourceFolderMismatch {
            key: key.to_string(),
            folder: source_folder.to_string(),
        };

        let rest_start = key
            .find(source_folder)
            .map(|idx| idx + source_folder.len())
            .ok_or_else(mismatch)?;
        if spec.start < rest_start || spec.end() > key.len() {
            return Err(mismatch());
        }

        Ok(Self {
            head: format!("{}{}", destination_folder, &key[rest_start..spec.start]),
            tail: key[spec.end()..].to_string(),
        })
    }

    pub fn render(&self, token: &SizeToken) -> String {
        self.render_literal(&token.literal)
    }

    pub fn render_literal(&self, literal: &str) -> String {
        format!("{}{}{}", self.head, literal, self.tail)
    }
}

/// Computes the destination key for one token literal.
///
/// # Example
/// ```
/// use img_fanout::key_mapper::map_destination_key;
/// use img_fanout::size_spec::parse_size_spec;
///
/// let key = "originals/foo/700x700/img.png";
/// let spec = parse_size_spec(key).unwrap();
/// let dest = map_destination_key(key, &spec, "1800x1800", "originals/", "processed/").unwrap();
/// assert_eq!(dest, "processed/foo/1800x1800/img.png");
/// ```
pub fn map_destination_key(
    key: &str,
    spec: &SizeSpecMatch,
    literal: &str,
    source_folder: &str,
    destination_folder: &str,
) -> Result<String> {
    KeyTemplate::new(key, spec, source_folder, destination_folder)
        .map(|template| template.render_literal(literal))
}
