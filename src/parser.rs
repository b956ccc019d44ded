//! Article record extraction from HTML landing pages
//!
//! [`ArticleParser::parse`] is a pure function from document bytes and source
//! URL to a [`PaperRecord`]. It runs a fixed sequence of extractors; each one
//! only fills fields that are still empty, except the Highwire `citation_*`
//! tags, which override Dublin Core values.

use crate::error::{ExtractionError, Result, ValidationError};
use crate::types::extract_task_id;
use chrono::{SecondsFormat, Utc};
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

/// Journals recognised by name in page navigation: (Chinese, English)
const KNOWN_JOURNALS: &[(&str, &str)] = &[("钢铁钒钛", "IRON STEEL VANADIUM TITANIUM")];

const TITLE_SELECTORS: &[&str] = &[
    "h1",
    "h2",
    ".article-title",
    ".title",
    "title",
    ".header-tit",
    "h2.article-title",
];

const TITLE_EN_SELECTORS: &[&str] = &[".article-title-en", ".title-en", ".en-title"];

const AUTHOR_SELECTORS: &[&str] = &[
    ".article-author",
    ".authors",
    ".author-list",
    ".article-authors",
    ".contributors",
];

const JOURNAL_SELECTORS: &[&str] = &[
    ".journal-name",
    ".journal-title",
    ".publication-title",
    "nav a",
    ".breadcrumb a",
];

const ABSTRACT_SELECTORS: &str =
    "[class*='abstract'], [id*='abstract'], .article-abstract, .abstract-text";

const KEYWORD_SELECTORS: &str =
    "[class*='keyword'], [id*='keyword'], .article-keywords, .keywords";

/// One author of an article
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Display name
    pub name: String,
    /// Institution, when the page lists one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliation: Option<String>,
    /// 1-based position in the author list
    pub order: u32,
}

/// Structured metadata of one article
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperRecord {
    /// Identifier derived from the source URL
    pub id: String,
    /// Source URL
    pub url: String,
    /// Primary language of the page
    pub language: String,

    /// Chinese title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_cn: Option<String>,
    /// English title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_en: Option<String>,

    /// Authors in byline order
    #[serde(default)]
    pub authors: Vec<Author>,

    /// Journal name (Chinese)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_cn: Option<String>,
    /// Journal name (English)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_en: Option<String>,
    /// Journal abbreviation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_abbr: Option<String>,
    /// ISSN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issn: Option<String>,

    /// Volume number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    /// Issue number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,
    /// Page range, e.g. `1-5`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<String>,
    /// Publication year
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,

    /// Publication date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Online-first date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online_date: Option<String>,
    /// Manuscript received date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit_date: Option<String>,

    /// Chinese abstract
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abstract_cn: Option<String>,
    /// English abstract
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abstract_en: Option<String>,
    /// Chinese keywords
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords_cn: Vec<String>,
    /// English keywords
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords_en: Vec<String>,

    /// Full-text PDF link
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    /// DOI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    /// Funding acknowledgement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fund_project: Option<String>,
    /// Chinese Library Classification code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clc_code: Option<String>,
    /// License URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    /// Page views
    #[serde(default)]
    pub views: u64,
    /// PDF downloads
    #[serde(default)]
    pub downloads: u64,
    /// Citation count
    #[serde(default)]
    pub citations: u64,

    /// RFC 3339 UTC timestamp of extraction
    pub parsed_at: String,
}

impl PaperRecord {
    /// Empty record for `url`, stamped with the current time
    pub fn new(url: &str) -> Self {
        Self {
            id: extract_task_id(url).to_string(),
            url: url.to_string(),
            language: "zh".to_string(),
            title_cn: None,
            title_en: None,
            authors: Vec::new(),
            journal_cn: None,
            journal_en: None,
            journal_abbr: None,
            issn: None,
            volume: None,
            issue: None,
            pages: None,
            year: None,
            date: None,
            online_date: None,
            submit_date: None,
            abstract_cn: None,
            abstract_en: None,
            keywords_cn: Vec::new(),
            keywords_en: Vec::new(),
            pdf_url: None,
            doi: None,
            fund_project: None,
            clc_code: None,
            license: None,
            views: 0,
            downloads: 0,
            citations: 0,
            parsed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    /// Check the fields a record cannot be persisted without
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] listing every missing field among id,
    /// title_cn, authors and journal_cn.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        let mut missing = Vec::new();
        if self.id.is_empty() {
            missing.push("id");
        }
        if is_blank(&self.title_cn) {
            missing.push("title_cn");
        }
        if self.authors.is_empty() {
            missing.push("authors");
        }
        if is_blank(&self.journal_cn) {
            missing.push("journal_cn");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                url: self.url.clone(),
                missing,
            })
        }
    }
}

/// Compiled patterns shared by every parse
struct Patterns {
    source_volume: Regex,
    source_issue: Regex,
    source_pages: Regex,
    volume_issue_pages: Regex,
    year: Regex,
    author_index: Regex,
    views: Regex,
    downloads: Regex,
    citations: Regex,
    dates: Regex,
    clc_code: Regex,
    license: Regex,
}

impl Patterns {
    fn compile() -> Result<Self> {
        Ok(Self {
            source_volume: Regex::new(r"Vol\.\s*(\d+)")?,
            source_issue: Regex::new(r"Issue\s*(\d+)")?,
            source_pages: Regex::new(r"Pages:\s*(\d+-\d+)")?,
            volume_issue_pages: Regex::new(r"(\d+)\((\d+)\):\s*(\d+-\d+)")?,
            year: Regex::new(r"(?:^|[^0-9])((?:19|20)\d{2})(?:[^0-9]|$)")?,
            author_index: Regex::new(r"^\d+[.,]?\s*")?,
            views: Regex::new(r"(?:文章访问数|访问数)\D{0,8}?(\d+)")?,
            downloads: Regex::new(r"(?:PDF下载量|下载量|下载)\D{0,8}?(\d+)")?,
            citations: Regex::new(r"(?:被引次数|引用)\D{0,8}?(\d+)")?,
            dates: Regex::new(r"(收稿日期|网络出版日期|刊出日期|出版日期)\D{0,8}?(\d{4}-\d{2}-\d{2})")?,
            clc_code: Regex::new(r"中图分类号\s*[:：]?\s*([A-Z]+\d+(?:\.\d+)?)")?,
            license: Regex::new(r#"https?://creativecommons\.org/[^\s"'<>]+"#)?,
        })
    }
}

/// Extracts [`PaperRecord`]s from article landing pages
pub struct ArticleParser {
    patterns: Patterns,
}

impl ArticleParser {
    /// Build a parser, compiling its patterns once
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Pattern`] if a built-in pattern fails to compile.
    pub fn new() -> Result<Self> {
        Ok(Self {
            patterns: Patterns::compile()?,
        })
    }

    /// Extract a record from a retrieved document
    ///
    /// Bodies that are not valid UTF-8 are decoded lossily. Missing fields are
    /// left empty; use [`PaperRecord::validate`] to decide whether the record
    /// is worth keeping.
    ///
    /// # Errors
    ///
    /// [`ExtractionError::EmptyDocument`] for a blank body and
    /// [`ExtractionError::UnexpectedShape`] when the body is not markup.
    pub fn parse(&self, body: &[u8], url: &str) -> std::result::Result<PaperRecord, ExtractionError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(ExtractionError::EmptyDocument {
                url: url.to_string(),
            });
        }

        let html = String::from_utf8_lossy(body);
        if !html.contains('<') {
            return Err(ExtractionError::UnexpectedShape {
                url: url.to_string(),
                reason: "body is not an HTML document".to_string(),
            });
        }

        let document = Html::parse_document(&html);
        let blocks = texts(&document, "div, span, p");
        let mut record = PaperRecord::new(url);

        self.extract_meta_tags(&document, &mut record);
        extract_titles(&document, &mut record);
        self.extract_authors(&document, &mut record);
        extract_journal(&document, &mut record);
        self.extract_publication_details(&blocks, &mut record);
        extract_abstract(&document, &mut record);
        extract_keywords(&document, &mut record);
        self.extract_metrics(&blocks, &mut record);
        self.extract_dates(&blocks, &mut record);
        self.extract_additional_info(&document, &blocks, &mut record);

        if record.doi.is_none() && url.contains("/article/doi/") {
            record.doi = Some(record.id.clone());
        }

        tracing::debug!(
            id = %record.id,
            authors = record.authors.len(),
            has_title = record.title_cn.is_some(),
            "Extracted record"
        );
        Ok(record)
    }

    /// Dublin Core first, then Highwire tags which take precedence
    fn extract_meta_tags(&self, document: &Html, record: &mut PaperRecord) {
        let Some(selector) = selector("meta[name]") else {
            return;
        };
        let metas: Vec<(String, String)> = document
            .select(&selector)
            .filter_map(|meta| {
                let name = meta.value().attr("name")?.trim().to_ascii_lowercase();
                let content = meta.value().attr("content")?.trim().to_string();
                (!content.is_empty()).then_some((name, content))
            })
            .collect();

        for (name, content) in metas.iter().filter(|(name, _)| name.starts_with("dc.")) {
            match name.as_str() {
                "dc.title" => record.title_cn = Some(content.clone()),
                "dc.date" => record.date = Some(content.clone()),
                "dc.keywords" => record.keywords_cn = split_keywords(content),
                "dc.description" => record.abstract_cn = Some(content.clone()),
                "dc.source" => self.parse_journal_source(content, record),
                "dc.publisher" => record.journal_cn = Some(content.clone()),
                _ => {}
            }
        }

        let mut first_page = None;
        let mut last_page = None;
        for (name, content) in metas.iter().filter(|(name, _)| name.starts_with("citation_")) {
            match name.as_str() {
                "citation_title" => record.title_cn = Some(content.clone()),
                "citation_authors" => {
                    for name in content.split([',', ';']).map(str::trim).filter(|n| !n.is_empty()) {
                        push_author(record, name);
                    }
                }
                "citation_author" => push_author(record, content),
                "citation_author_institution" => {
                    if let Some(author) = record.authors.last_mut()
                        && author.affiliation.is_none()
                    {
                        author.affiliation = Some(content.clone());
                    }
                }
                "citation_journal_title" => record.journal_cn = Some(content.clone()),
                "citation_journal_abbrev" => record.journal_abbr = Some(content.clone()),
                "citation_issn" => record.issn = Some(content.clone()),
                "citation_date" | "citation_online_date" | "citation_publication_date" => {
                    record.date = Some(content.clone())
                }
                "citation_year" => record.year = Some(content.clone()),
                "citation_volume" => record.volume = Some(content.clone()),
                "citation_issue" => record.issue = Some(content.clone()),
                "citation_firstpage" => first_page = Some(content.clone()),
                "citation_lastpage" => last_page = Some(content.clone()),
                "citation_doi" => record.doi = Some(content.clone()),
                "citation_keywords" => record.keywords_cn = split_keywords(content),
                "citation_pdf_url" => record.pdf_url = Some(content.clone()),
                _ => {}
            }
        }

        match (first_page, last_page) {
            (Some(first), Some(last)) => record.pages = Some(format!("{first}-{last}")),
            (Some(page), None) | (None, Some(page)) => record.pages = Some(page),
            (None, None) => {}
        }
    }

    /// `"钢铁钒钛, 2003, Vol. 24, Issue 4, Pages: 1-5"`
    fn parse_journal_source(&self, source: &str, record: &mut PaperRecord) {
        let mut parts = source.split(", ");
        if let Some(journal) = parts.next().map(str::trim).filter(|s| !s.is_empty()) {
            record.journal_cn = Some(journal.to_string());
        }
        if let Some(year) = parts.next().map(str::trim).filter(|s| !s.is_empty()) {
            record.year = Some(year.to_string());
        }

        let p = &self.patterns;
        if let Some(volume) = first_group(&p.source_volume, source) {
            record.volume = Some(volume);
        }
        if let Some(issue) = first_group(&p.source_issue, source) {
            record.issue = Some(issue);
        }
        if let Some(pages) = first_group(&p.source_pages, source) {
            record.pages = Some(pages);
        }
    }

    fn extract_authors(&self, document: &Html, record: &mut PaperRecord) {
        if !record.authors.is_empty() {
            return;
        }
        let Some(entries) = selector("li, span, a") else {
            return;
        };

        for css in AUTHOR_SELECTORS {
            let Some(container) = selector(css) else {
                continue;
            };
            for block in document.select(&container) {
                for entry in block.select(&entries) {
                    let raw = normalize(&entry.text().collect::<String>());
                    if raw.is_empty() || raw.contains('@') {
                        continue;
                    }
                    let name = self.clean_author_name(&raw);
                    if !name.is_empty() && !record.authors.iter().any(|a| a.name == name) {
                        push_author(record, &name);
                    }
                }
            }
            if !record.authors.is_empty() {
                break;
            }
        }
    }

    /// Strip trailing punctuation and leading affiliation markers ("1,", "2.")
    fn clean_author_name(&self, raw: &str) -> String {
        let trimmed = raw.trim().trim_end_matches([',', '.', '&', ' ', '，']);
        self.patterns
            .author_index
            .replace(trimmed, "")
            .trim()
            .to_string()
    }

    fn extract_publication_details(&self, blocks: &[String], record: &mut PaperRecord) {
        let p = &self.patterns;
        for text in blocks {
            if let Some(caps) = p.volume_issue_pages.captures(text) {
                fill(&mut record.volume, &caps[1]);
                fill(&mut record.issue, &caps[2]);
                fill(&mut record.pages, &caps[3]);
            }
            if record.year.is_none()
                && let Some(year) = first_group(&p.year, text)
            {
                record.year = Some(year);
            }
        }
    }

    fn extract_metrics(&self, blocks: &[String], record: &mut PaperRecord) {
        let p = &self.patterns;
        let count = |pattern: &Regex| {
            blocks
                .iter()
                .find_map(|text| first_group(pattern, text)?.parse::<u64>().ok())
        };

        if let Some(views) = count(&p.views) {
            record.views = views;
        }
        if let Some(downloads) = count(&p.downloads) {
            record.downloads = downloads;
        }
        if let Some(citations) = count(&p.citations) {
            record.citations = citations;
        }
    }

    fn extract_dates(&self, blocks: &[String], record: &mut PaperRecord) {
        for text in blocks {
            for caps in self.patterns.dates.captures_iter(text) {
                let slot = match &caps[1] {
                    "收稿日期" => &mut record.submit_date,
                    "网络出版日期" => &mut record.online_date,
                    _ => &mut record.date,
                };
                fill(slot, &caps[2]);
            }
        }
    }

    fn extract_additional_info(&self, document: &Html, blocks: &[String], record: &mut PaperRecord) {
        for text in blocks {
            if record.fund_project.is_none() {
                record.fund_project = strip_label(text, &["基金项目"]);
            }
            if record.clc_code.is_none() {
                record.clc_code = first_group(&self.patterns.clc_code, text);
            }
        }

        if let Some(links) = selector("a[href*='creativecommons.org']")
            && let Some(href) = document
                .select(&links)
                .find_map(|a| a.value().attr("href"))
        {
            record.license = Some(href.trim().to_string());
        }
        if record.license.is_none() {
            record.license = blocks
                .iter()
                .find_map(|text| self.patterns.license.find(text))
                .map(|m| m.as_str().to_string());
        }
    }
}

fn extract_titles(document: &Html, record: &mut PaperRecord) {
    if record.title_cn.is_none() {
        record.title_cn = TITLE_SELECTORS
            .iter()
            .find_map(|css| texts(document, css).into_iter().next().filter(|t| !t.is_empty()));
    }
    if record.title_en.is_none() {
        record.title_en = TITLE_EN_SELECTORS
            .iter()
            .find_map(|css| texts(document, css).into_iter().find(|t| !t.is_empty()));
    }
}

fn extract_journal(document: &Html, record: &mut PaperRecord) {
    if record.journal_cn.is_none() {
        'search: for css in JOURNAL_SELECTORS {
            for text in texts(document, css) {
                if let Some((cn, en)) = KNOWN_JOURNALS
                    .iter()
                    .find(|(cn, en)| text.contains(cn) || text.to_uppercase().contains(en))
                {
                    record.journal_cn = Some((*cn).to_string());
                    record.journal_en = Some((*en).to_string());
                    break 'search;
                }
            }
        }
    }

    if record.journal_en.is_none()
        && let Some(journal) = &record.journal_cn
        && let Some((_, en)) = KNOWN_JOURNALS.iter().find(|(cn, _)| journal.as_str() == *cn)
    {
        record.journal_en = Some((*en).to_string());
    }
}

fn extract_abstract(document: &Html, record: &mut PaperRecord) {
    for text in texts(document, ABSTRACT_SELECTORS) {
        if let Some(body) = strip_label(&text, &["摘要"]) {
            fill(&mut record.abstract_cn, &body);
        } else if let Some(body) = strip_label(&text, &["Abstract", "ABSTRACT"]) {
            fill(&mut record.abstract_en, &body);
        } else if contains_cjk(&text) {
            fill(&mut record.abstract_cn, &text);
        } else {
            fill(&mut record.abstract_en, &text);
        }
    }

    for text in texts(document, "p, div") {
        if let Some(body) = strip_label(&text, &["摘要"]) {
            fill(&mut record.abstract_cn, &body);
        } else if let Some(body) = strip_label(&text, &["Abstract", "ABSTRACT"]) {
            fill(&mut record.abstract_en, &body);
        }
    }
}

fn extract_keywords(document: &Html, record: &mut PaperRecord) {
    let mut assign = |text: &str, labelled_only: bool| {
        if let Some(list) = strip_label(text, &["关键词", "关键字"]) {
            if record.keywords_cn.is_empty() {
                record.keywords_cn = split_keywords(&list);
            }
        } else if let Some(list) = strip_label(text, &["Key words", "Keywords", "KEY WORDS"]) {
            if record.keywords_en.is_empty() {
                record.keywords_en = split_keywords(&list);
            }
        } else if !labelled_only {
            let slot = if contains_cjk(text) {
                &mut record.keywords_cn
            } else {
                &mut record.keywords_en
            };
            if slot.is_empty() {
                *slot = split_keywords(text);
            }
        }
    };

    for text in texts(document, KEYWORD_SELECTORS) {
        assign(&text, false);
    }
    for text in texts(document, "p, div, span") {
        assign(&text, true);
    }
}

fn push_author(record: &mut PaperRecord, name: &str) {
    let order = record.authors.len() as u32 + 1;
    record.authors.push(Author {
        name: name.trim().to_string(),
        affiliation: None,
        order,
    });
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

/// Whitespace-normalized text of every element matching `css`, in document order
fn texts(document: &Html, css: &str) -> Vec<String> {
    let Some(selector) = selector(css) else {
        return Vec::new();
    };
    document
        .select(&selector)
        .map(|element| normalize(&element.text().collect::<String>()))
        .collect()
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text following a leading label and an optional colon, if non-empty
fn strip_label(text: &str, labels: &[&str]) -> Option<String> {
    let text = text.trim_start();
    labels.iter().find_map(|label| {
        let rest = text
            .strip_prefix(label)?
            .trim_start_matches([':', '：', ' '])
            .trim();
        (!rest.is_empty()).then(|| rest.to_string())
    })
}

fn split_keywords(list: &str) -> Vec<String> {
    list.split([',', '，', '/', '、', ';', '；'])
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

fn first_group(pattern: &Regex, text: &str) -> Option<String> {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn fill(slot: &mut Option<String>, value: &str) {
    let value = value.trim();
    if slot.is_none() && !value.is_empty() {
        *slot = Some(value.to_string());
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

fn contains_cjk(text: &str) -> bool {
    text.chars().any(|c| ('\u{4e00}'..='\u{9fff}').contains(&c))
}
