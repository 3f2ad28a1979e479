//! Batch descriptor codec.
//!
//! A descriptor is an XML document with a `jobs` root holding `job` elements:
//!
//! ```xml
//! <jobs>
//! <job name="0001-train">accelerate launch train.py cfg/0001.yaml</job>
//! <job name="0002-eval">python eval.py</job>
//! </jobs>
//! ```
//!
//! Only the first `job` element is eligible to run. Consuming it splices that
//! element out of the source text and leaves every other byte untouched, so
//! producer formatting and comments survive repeated drains.

use std::fmt::Display;
use std::ops::Range;

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use thiserror::Error;

/// Document written by producers when no descriptor exists yet.
pub const EMPTY_DOCUMENT: &str = "<jobs>\n</jobs>\n";

const ROOT_TAG: &[u8] = b"jobs";
const JOB_TAG: &[u8] = b"job";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("malformed descriptor at byte {position}: {message}")]
    Malformed { position: usize, message: String },
    #[error("descriptor root must be <jobs>, found <{0}>")]
    UnexpectedRoot(String),
    #[error("descriptor has no <jobs> root element")]
    MissingRoot,
}

/// One pending job body inside a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorJob {
    /// Value of the `name` attribute, if the producer supplied one.
    pub name: Option<String>,
    /// Shell command text, trimmed.
    pub body: String,
    span: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum InsertPoint {
    /// Byte offset of the root's closing tag.
    BeforeClose(usize),
    /// Byte range of a self-closing `<jobs/>` root.
    SelfClosing(Range<usize>),
}

/// Parsed descriptor, keeping the original text for in-place edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    source: String,
    jobs: Vec<DescriptorJob>,
    insert_at: InsertPoint,
}

struct PendingJob {
    name: Option<String>,
    body: String,
    start: usize,
}

impl Descriptor {
    /// Parse a descriptor. The whole document must be well formed even though
    /// only the first job is ever consumed.
    pub fn parse(source: impl Into<String>) -> Result<Self, DescriptorError> {
        let source = source.into();
        let (jobs, insert_at) = scan(&source)?;
        Ok(Self {
            source,
            jobs,
            insert_at,
        })
    }

    /// Pending jobs in document order.
    pub fn jobs(&self) -> &[DescriptorJob] {
        &self.jobs
    }

    pub fn first(&self) -> Option<&DescriptorJob> {
        self.jobs.first()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Source text with the first job element removed.
    ///
    /// Returns `None` when there is nothing to remove.
    pub fn without_first(&self) -> Option<String> {
        let job = self.jobs.first()?;
        let mut end = job.span.end;
        if self.source[end..].starts_with('\n') {
            end += 1;
        }
        let mut out = String::with_capacity(self.source.len());
        out.push_str(&self.source[..job.span.start]);
        out.push_str(&self.source[end..]);
        Some(out)
    }

    /// Source text with a new job element appended after the existing ones.
    pub fn with_appended(&self, name: &str, body: &str) -> String {
        let element = format!("<job name=\"{}\">{}</job>\n", escape(name), escape(body));
        match &self.insert_at {
            InsertPoint::BeforeClose(at) => {
                let mut out = String::with_capacity(self.source.len() + element.len() + 1);
                out.push_str(&self.source[..*at]);
                if !out.ends_with('\n') {
                    out.push('\n');
                }
                out.push_str(&element);
                out.push_str(&self.source[*at..]);
                out
            }
            InsertPoint::SelfClosing(range) => {
                let mut out = String::with_capacity(self.source.len() + element.len() + 16);
                out.push_str(&self.source[..range.start]);
                out.push_str("<jobs>\n");
                out.push_str(&element);
                out.push_str("</jobs>");
                out.push_str(&self.source[range.end..]);
                out
            }
        }
    }
}

fn scan(source: &str) -> Result<(Vec<DescriptorJob>, InsertPoint), DescriptorError> {
    let mut reader = Reader::from_str(source);
    let mut jobs = Vec::new();
    let mut depth = 0usize;
    let mut seen_root = false;
    let mut insert_at = None;
    let mut current: Option<PendingJob> = None;

    loop {
        let start = reader.buffer_position() as usize;
        let event = reader
            .read_event()
            .map_err(|err| malformed(reader.buffer_position() as usize, err))?;
        let end = reader.buffer_position() as usize;

        match event {
            Event::Start(element) => {
                if depth == 0 {
                    open_root(&element, &mut seen_root, start)?;
                } else if depth == 1 && element.name().as_ref() == JOB_TAG {
                    current = Some(PendingJob {
                        name: job_name(&element, start)?,
                        body: String::new(),
                        start,
                    });
                }
                depth += 1;
            }
            Event::Empty(element) => {
                if depth == 0 {
                    open_root(&element, &mut seen_root, start)?;
                    insert_at = Some(InsertPoint::SelfClosing(start..end));
                } else if depth == 1 && element.name().as_ref() == JOB_TAG {
                    jobs.push(DescriptorJob {
                        name: job_name(&element, start)?,
                        body: String::new(),
                        span: start..end,
                    });
                }
            }
            Event::End(_) => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| malformed(start, "unexpected closing tag"))?;
                if depth == 1 {
                    if let Some(job) = current.take() {
                        jobs.push(DescriptorJob {
                            name: job.name,
                            body: job.body.trim().to_string(),
                            span: job.start..end,
                        });
                    }
                } else if depth == 0 {
                    insert_at = Some(InsertPoint::BeforeClose(start));
                }
            }
            Event::Text(text) => {
                if let Some(job) = current.as_mut() {
                    let text = text.unescape().map_err(|err| malformed(start, err))?;
                    job.body.push_str(&text);
                }
            }
            Event::CData(data) => {
                if let Some(job) = current.as_mut() {
                    job.body.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root {
        return Err(DescriptorError::MissingRoot);
    }
    if depth != 0 {
        return Err(malformed(source.len(), "unclosed <jobs> element"));
    }
    let insert_at = insert_at.ok_or(DescriptorError::MissingRoot)?;
    Ok((jobs, insert_at))
}

fn open_root(
    element: &BytesStart<'_>,
    seen_root: &mut bool,
    position: usize,
) -> Result<(), DescriptorError> {
    if *seen_root {
        return Err(malformed(position, "more than one root element"));
    }
    let name = element.name();
    if name.as_ref() != ROOT_TAG {
        return Err(DescriptorError::UnexpectedRoot(
            String::from_utf8_lossy(name.as_ref()).into_owned(),
        ));
    }
    *seen_root = true;
    Ok(())
}

fn job_name(element: &BytesStart<'_>, position: usize) -> Result<Option<String>, DescriptorError> {
    let Some(attr) = element
        .try_get_attribute("name")
        .map_err(|err| malformed(position, err))?
    else {
        return Ok(None);
    };
    let value = attr
        .unescape_value()
        .map_err(|err| malformed(position, err))?;
    Ok(Some(value.into_owned()))
}

fn malformed(position: usize, message: impl Display) -> DescriptorError {
    DescriptorError::Malformed {
        position,
        message: message.to_string(),
    }
}
