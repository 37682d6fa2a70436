//! Header and footer removal: lines that open or close most pages are page
//! furniture, not content.

use crate::config::CleaningOptions;
use crate::error::DocumentError;
use crate::models::{parse_page_key, StructuredDocument};
use regex::Regex;
use std::collections::BTreeMap;
use tracing::{info, warn};

// Section markers only count at the start of a line.
const ENVELOPE_PATTERN: &str =
    r"(?s)^(?P<before>.*?Text:)?(?P<middle>.*?)(?P<after>\n[ \t]*(?:Key-Value Pairs:|Tables:).*)?$";

// Pages flattened onto one line separate entries with commas.
const COMMA_ENVELOPE_PATTERN: &str =
    r"(?s)^(?P<before>[^\n]*?Text:)?(?P<middle>[^\n]*?)(?P<after>,[ \t]*(?:Key-Value Pairs:|Tables:).*)?$";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleaningReport {
    pub iterations: usize,
    pub headers: Vec<String>,
    pub footers: Vec<String>,
    pub hit_iteration_cap: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct EdgeCandidates {
    header: Option<Vec<String>>,
    footer: Option<Vec<String>>,
}

impl EdgeCandidates {
    fn is_empty(&self) -> bool {
        self.header.is_none() && self.footer.is_none()
    }
}

pub struct NoiseCleaner {
    options: CleaningOptions,
    envelope: Regex,
    comma_envelope: Regex,
}

impl NoiseCleaner {
    pub fn new(options: CleaningOptions) -> Result<Self, DocumentError> {
        Ok(Self {
            options,
            envelope: Regex::new(ENVELOPE_PATTERN)?,
            comma_envelope: Regex::new(COMMA_ENVELOPE_PATTERN)?,
        })
    }

    pub fn clean_document(&self, document: &StructuredDocument) -> (StructuredDocument, CleaningReport) {
        let mut pages: Vec<Vec<String>> = document
            .pages
            .values()
            .map(|page| page.lines.clone())
            .collect();

        let report = self.strip_repeated_edges(&mut pages);

        let mut cleaned = document.clone();
        for (page, lines) in cleaned.pages.values_mut().zip(pages) {
            page.lines = lines;
        }
        (cleaned, report)
    }

    /// Cleans the rendered page-text form. Keys such as `"Page 3"` are
    /// normalized to page numbers. With `keep_key_value_text` the text around
    /// the lines region is kept as is and pages that lose no line are returned
    /// unchanged; without it every page is reduced to its cleaned lines.
    pub fn clean_page_texts(
        &self,
        pages: &BTreeMap<String, String>,
    ) -> Result<(BTreeMap<u32, String>, CleaningReport), DocumentError> {
        let mut normalized = BTreeMap::new();
        for (key, text) in pages {
            normalized.insert(parse_page_key(key)?, text.as_str());
        }

        let envelopes: Vec<Envelope<'_>> = normalized
            .values()
            .map(|text| self.split_envelope(text))
            .collect();
        let mut lines: Vec<Vec<String>> = envelopes.iter().map(|envelope| envelope.lines.clone()).collect();

        let report = self.strip_repeated_edges(&mut lines);

        let cleaned = normalized
            .iter()
            .zip(envelopes.iter().zip(lines))
            .map(|((page, original), (envelope, kept))| {
                let text = if !self.options.keep_key_value_text {
                    kept.join("\n")
                } else if kept.len() == envelope.lines.len() {
                    (*original).to_string()
                } else {
                    envelope.rejoin(&kept)
                };
                (*page, text)
            })
            .collect();

        Ok((cleaned, report))
    }

    fn split_envelope<'a>(&self, text: &'a str) -> Envelope<'a> {
        let captures = self
            .comma_envelope
            .captures(text)
            .or_else(|| self.envelope.captures(text));
        let Some(captures) = captures else {
            return Envelope {
                before: "",
                lines: split_region(text),
                after: "",
            };
        };

        let group = |name: &str| captures.name(name).map(|found| found.as_str()).unwrap_or("");
        Envelope {
            before: group("before"),
            lines: split_region(group("middle")),
            after: group("after"),
        }
    }

    fn strip_repeated_edges(&self, pages: &mut [Vec<String>]) -> CleaningReport {
        let mut report = CleaningReport::default();

        loop {
            let candidates = self.detect(pages);
            if candidates.is_empty() {
                break;
            }
            if report.iterations >= self.options.max_iterations {
                warn!(
                    iterations = report.iterations,
                    "header/footer cleaning stopped at the iteration cap"
                );
                report.hit_iteration_cap = true;
                break;
            }

            if let Some(header) = &candidates.header {
                info!(header = %header.join(" / "), "removing repeated header");
                report.headers.push(header.join("\n"));
            }
            if let Some(footer) = &candidates.footer {
                info!(footer = %footer.join(" / "), "removing repeated footer");
                report.footers.push(footer.join("\n"));
            }

            for lines in pages.iter_mut() {
                if let Some(header) = &candidates.header {
                    if lines.starts_with(header) {
                        lines.drain(..header.len());
                    }
                }
                if let Some(footer) = &candidates.footer {
                    if lines.ends_with(footer) {
                        lines.truncate(lines.len() - footer.len());
                    }
                }
            }

            report.iterations += 1;
        }

        report
    }

    fn detect(&self, pages: &[Vec<String>]) -> EdgeCandidates {
        if pages.len() <= 1 {
            return EdgeCandidates::default();
        }

        let tops = pages.iter().map(|lines| &lines[..self.options.top_n.min(lines.len())]);
        let bottoms = pages
            .iter()
            .map(|lines| &lines[lines.len() - self.options.bottom_n.min(lines.len())..]);

        EdgeCandidates {
            header: self.most_repeated(tops, pages.len()),
            footer: self.most_repeated(bottoms, pages.len()),
        }
    }

    fn most_repeated<'a, I>(&self, slices: I, page_count: usize) -> Option<Vec<String>>
    where
        I: Iterator<Item = &'a [String]>,
    {
        let mut counts: Vec<(&[String], usize)> = Vec::new();
        for slice in slices.filter(|slice| !slice.is_empty()) {
            match counts.iter_mut().find(|(seen, _)| *seen == slice) {
                Some((_, count)) => *count += 1,
                None => counts.push((slice, 1)),
            }
        }

        let mut best: Option<(&[String], usize)> = None;
        for (slice, count) in counts {
            if best.map_or(true, |(_, top)| count > top) {
                best = Some((slice, count));
            }
        }

        best.filter(|(_, count)| *count as f64 / page_count as f64 > self.options.threshold)
            .map(|(slice, _)| slice.to_vec())
    }
}

struct Envelope<'a> {
    before: &'a str,
    lines: Vec<String>,
    after: &'a str,
}

impl Envelope<'_> {
    fn rejoin(&self, lines: &[String]) -> String {
        let body = lines.join("\n");
        if self.before.is_empty() {
            format!("{body}{}", self.after)
        } else {
            format!("{}\n{body}{}", self.before, self.after)
        }
    }
}

fn split_region(region: &str) -> Vec<String> {
    let separator = if region.contains('\n') { '\n' } else { ',' };
    region
        .split(separator)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
