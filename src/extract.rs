use chrono::Utc;
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Node, Selector};
use std::sync::LazyLock;
use tracing::{debug, info};

use crate::error::{MatchaError, Result};
use crate::models::{JobLevel, PageContent};

pub const MAX_TEXT_CHARS: usize = 20_000;
pub const TRUNCATION_MARKER: &str = "\n\n[Content truncated to fit context limits]";

const MIN_CONTENT_CHARS: usize = 200;
const MAX_COMPANY_CHARS: usize = 100;
const LEVEL_SCAN_CHARS: usize = 500;

const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "main",
    "[role=\"main\"]",
    ".job-description",
    ".job-details",
    ".description",
    ".content",
    "#content",
    "#main-content",
    ".post-content",
    ".entry-content",
];

const NOISE_SELECTORS: &[&str] = &[
    "script",
    "style",
    "noscript",
    "nav",
    "header",
    "footer",
    ".navigation",
    ".menu",
    ".sidebar",
    ".advertisement",
    ".ads",
    "[role=\"navigation\"]",
    "[role=\"banner\"]",
    "[role=\"contentinfo\"]",
];

static NOISE: LazyLock<Vec<Selector>> = LazyLock::new(|| parse_selectors(NOISE_SELECTORS));

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));
static EXCESS_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n\s*\n").expect("valid newline regex"));

/// A parsed page together with the URL it was loaded from.
pub struct PageDocument {
    html: Html,
    url: Url,
}

impl PageDocument {
    /// Parse `html` loaded from `url`.
    ///
    /// Fails for pages the extractor may not read: browser-internal schemes,
    /// unparseable URLs and empty documents.
    pub fn parse(html: &str, url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| MatchaError::extraction(format!("invalid page URL '{}': {}", url, e)))?;

        if !matches!(url.scheme(), "http" | "https" | "file") {
            return Err(MatchaError::extraction(format!(
                "{}:// pages cannot be read",
                url.scheme()
            )));
        }

        if html.trim().is_empty() {
            return Err(MatchaError::extraction("the document is empty"));
        }

        Ok(Self {
            html: Html::parse_document(html),
            url,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn title(&self) -> String {
        select_first(&self.html, "title")
            .map(|el| clean_text(&el.text().collect::<String>()))
            .unwrap_or_default()
    }

    fn body(&self) -> ElementRef<'_> {
        select_first(&self.html, "body").unwrap_or_else(|| self.html.root_element())
    }
}

/// Parse and extract in one step.
pub fn extract_from_html(html: &str, url: &str) -> Result<PageContent> {
    let document = PageDocument::parse(html, url)?;
    Ok(extract_page_content(&document))
}

pub fn extract_page_content(document: &PageDocument) -> PageContent {
    let page_title = document.title();
    let main_text = cap_text(select_main_text(document));
    let company = extract_company(document);
    let job_level = extract_job_level(&page_title, &main_text);

    info!(
        url = %document.url(),
        company = if company.is_empty() { "-" } else { company.as_str() },
        level = ?job_level,
        chars = main_text.chars().count(),
        "extracted page content"
    );

    PageContent {
        page_title,
        page_url: document.url().to_string(),
        main_text,
        company,
        job_level,
        extracted_at: Utc::now(),
    }
}

// --- Main text ---

fn select_main_text(document: &PageDocument) -> String {
    for selector_str in CONTENT_SELECTORS {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        if let Some(element) = document.html.select(&selector).next() {
            let text = clean_text(&visible_text(element));
            if text.chars().count() > MIN_CONTENT_CHARS {
                debug!(selector = selector_str, "main content container found");
                return text;
            }
        }
    }

    debug!("no content container qualified, using page body");
    clean_text(&visible_text(document.body()))
}

// Elements whose boundaries separate words, as a browser lays them out.
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "fieldset",
    "figcaption", "figure", "form", "h1", "h2", "h3", "h4", "h5", "h6", "hr", "li", "main",
    "ol", "p", "pre", "section", "table", "td", "th", "tr", "ul",
];

/// Text of `element`, skipping script, navigation, ad and similar subtrees.
/// Inline markup is joined without a separator, so `Post<em>gre</em>SQL`
/// stays one word.
fn visible_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    collect_text(element, &NOISE, &mut out);
    out
}

fn collect_text(element: ElementRef<'_>, noise: &[Selector], out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let Some(child_el) = ElementRef::wrap(child) else {
                    continue;
                };
                if noise.iter().any(|sel| sel.matches(&child_el)) {
                    continue;
                }
                let block = BLOCK_TAGS.contains(&el.name());
                if block {
                    out.push('\n');
                }
                collect_text(child_el, noise, out);
                if block {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

pub fn clean_text(text: &str) -> String {
    let collapsed = WHITESPACE_RUN.replace_all(text, " ");
    EXCESS_NEWLINES
        .replace_all(&collapsed, "\n\n")
        .trim()
        .to_string()
}

/// Truncate to `MAX_TEXT_CHARS` including the marker.
fn cap_text(text: String) -> String {
    if text.chars().count() <= MAX_TEXT_CHARS {
        return text;
    }
    let keep = MAX_TEXT_CHARS - TRUNCATION_MARKER.chars().count();
    let mut capped: String = text.chars().take(keep).collect();
    capped.push_str(TRUNCATION_MARKER);
    capped
}

// --- Company ---

const KNOWN_EMPLOYERS: &[(&str, &str)] = &[
    (r"(^|\.)microsoft\.com$", "Microsoft"),
    (r"(^|\.)linkedin\.com$", "LinkedIn"),
    (r"(^|\.)google\.com$|^careers\.google\.", "Google"),
    (r"(^|\.)amazon\.jobs$", "Amazon"),
    (r"(^|\.)apple\.com$", "Apple"),
    (r"(^|\.)(meta|metacareers)\.com$", "Meta"),
    (r"(^|\.)netflix\.(jobs|com)$", "Netflix"),
    (r"(^|\.)tesla\.com$", "Tesla"),
    (r"(^|\.)uber\.com$", "Uber"),
    (r"(^|\.)airbnb\.com$", "Airbnb"),
    (r"(^|\.)stripe\.com$", "Stripe"),
    (r"(^|\.)spotify\.com$", "Spotify"),
    (r"(^|\.)salesforce\.com$", "Salesforce"),
    (r"(^|\.)oracle\.com$", "Oracle"),
    (r"(^|\.)ibm\.com$", "IBM"),
    (r"(^|\.)adobe\.com$", "Adobe"),
    (r"(^|\.)intel\.com$", "Intel"),
    (r"(^|\.)nvidia\.com$", "NVIDIA"),
];

// Hosted job boards where the tenant is named in the subdomain.
const MULTI_TENANT_BOARDS: &[&str] = &[
    r"^(?:boards\.|job-boards\.)?([^.]+)\.greenhouse\.io$",
    r"^(?:jobs\.)?([^.]+)\.lever\.co$",
];

// Subdomains that belong to the board itself rather than a tenant.
const GENERIC_BOARD_HOSTS: &[&str] = &["boards", "job-boards", "jobs", "www", "careers", "api"];

static EMPLOYER_TABLE: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    KNOWN_EMPLOYERS
        .iter()
        .filter_map(|(pattern, name)| Regex::new(pattern).ok().map(|re| (re, *name)))
        .collect()
});

static BOARD_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    MULTI_TENANT_BOARDS
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
});

static TITLE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\|\s*(.+?)\s*(?:Careers|Jobs|Employment)?$",
        r"(?i)\s-\s+(.+?)\s*(?:Careers|Jobs|Employment)?$",
        r"(?i)\bat\s+([^-|]+)",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Where to look in the page for a company name.
enum CompanyHint {
    Text(&'static str),
    Attr(&'static str, &'static str),
    FirstLine(&'static str),
    OgTitleSuffix,
}

const COMPANY_HINTS: &[CompanyHint] = &[
    // Meta tags
    CompanyHint::Attr("meta[property=\"og:site_name\"]", "content"),
    CompanyHint::Attr("meta[name=\"author\"]", "content"),
    CompanyHint::OgTitleSuffix,
    // Common class/id conventions
    CompanyHint::Text(".company-name"),
    CompanyHint::Text(".employer-name"),
    CompanyHint::Text("[class*=\"company\"]"),
    CompanyHint::Text("#company"),
    CompanyHint::Attr("[data-company]", "data-company"),
    // LinkedIn
    CompanyHint::Text(".topcard__org-name-link"),
    CompanyHint::Text(".topcard__flavor--black-link"),
    CompanyHint::Text(".jobs-unified-top-card__company-name"),
    // Indeed
    CompanyHint::Attr("[data-company-name]", "data-company-name"),
    CompanyHint::Text(".icl-u-lg-mr--sm"),
    CompanyHint::Text("[data-testid=\"inlineHeader-companyName\"]"),
    // Greenhouse
    CompanyHint::FirstLine("#header"),
];

/// Best-effort company name; empty when nothing plausible is found.
pub fn extract_company(document: &PageDocument) -> String {
    if let Some(name) = company_from_url(document.url()) {
        return name;
    }

    for hint in COMPANY_HINTS {
        if let Some(name) = resolve_hint(&document.html, hint).and_then(|s| accept_company(&s)) {
            return name;
        }
    }

    company_from_title(&document.title()).unwrap_or_default()
}

fn company_from_url(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();

    if let Some((_, name)) = EMPLOYER_TABLE.iter().find(|(re, _)| re.is_match(&host)) {
        return Some(name.to_string());
    }

    for board in BOARD_PATTERNS.iter() {
        let Some(caps) = board.captures(&host) else {
            continue;
        };
        let slug = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        if !GENERIC_BOARD_HOSTS.contains(&slug) {
            return Some(capitalize(slug));
        }
        // boards.greenhouse.io/<tenant>/jobs/..., jobs.lever.co/<tenant>/...
        return url
            .path_segments()
            .and_then(|mut segments| segments.next())
            .filter(|segment| !segment.is_empty())
            .and_then(|segment| accept_company(&capitalize(&percent_decode(segment))));
    }

    None
}

fn resolve_hint(html: &Html, hint: &CompanyHint) -> Option<String> {
    match hint {
        CompanyHint::Text(selector) => {
            select_first(html, selector).map(|el| el.text().collect::<String>())
        }
        CompanyHint::Attr(selector, attr) => {
            select_first(html, selector).and_then(|el| el.value().attr(attr).map(str::to_string))
        }
        CompanyHint::FirstLine(selector) => select_first(html, selector).and_then(|el| {
            el.text()
                .collect::<String>()
                .split('\n')
                .next()
                .map(str::to_string)
        }),
        CompanyHint::OgTitleSuffix => select_first(html, "meta[property=\"og:title\"]")
            .and_then(|el| el.value().attr("content"))
            .and_then(|content| content.split('|').nth(1))
            .map(str::to_string),
    }
}

fn company_from_title(title: &str) -> Option<String> {
    TITLE_PATTERNS.iter().find_map(|re| {
        re.captures(title)
            .and_then(|caps| caps.get(1))
            .and_then(|m| accept_company(m.as_str()))
    })
}

fn accept_company(candidate: &str) -> Option<String> {
    let trimmed = candidate.trim();
    let len = trimmed.chars().count();
    if len > 0 && len < MAX_COMPANY_CHARS {
        Some(clean_text(trimmed))
    } else {
        None
    }
}

fn percent_decode(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let escaped = bytes
            .get(i + 1..i + 3)
            .filter(|_| bytes[i] == b'%')
            .and_then(|hex| std::str::from_utf8(hex).ok())
            .and_then(|hex| u8::from_str_radix(hex, 16).ok());
        match escaped {
            Some(byte) => {
                decoded.push(byte);
                i += 3;
            }
            None => {
                decoded.push(bytes[i]);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

fn capitalize(slug: &str) -> String {
    let mut chars = slug.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// --- Seniority ---

// Checked in order; the first bucket with any hit wins. Plain substring
// matches, so "intern" also fires on "internal".
const LEVEL_KEYWORDS: &[(JobLevel, &[&str])] = &[
    (JobLevel::Internship, &["intern", "internship", "co-op", "trainee"]),
    (JobLevel::Junior, &["entry level", "junior", "associate", "jr.", "graduate"]),
    (JobLevel::MidLevel, &["mid-level", "intermediate", "ii", " 2 "]),
    (JobLevel::Senior, &["senior", "sr.", "lead", "principal", "staff", "iii", " 3 "]),
    (JobLevel::Leadership, &["director", "head of", "vp", "vice president", "chief"]),
];

pub fn extract_job_level(page_title: &str, main_text: &str) -> Option<JobLevel> {
    let head: String = main_text.chars().take(LEVEL_SCAN_CHARS).collect();
    let text = format!("{} {}", page_title, head).to_lowercase();

    LEVEL_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| text.contains(kw)))
        .map(|(level, _)| *level)
}

// --- Role title ---

static ROLE_TITLE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"^([^|]+)\|", r"^([^-]+)-", r"(?i)^(.+?)\s+at\s+"]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
});

/// Role part of a page title such as "Engineer | Acme" or "Engineer at Acme".
pub fn role_title_from_page_title(page_title: &str) -> String {
    ROLE_TITLE_PATTERNS
        .iter()
        .find_map(|re| re.captures(page_title).and_then(|c| c.get(1)))
        .map(|m| m.as_str().trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| page_title.trim().to_string())
}

// --- Helpers ---

fn select_first<'a>(html: &'a Html, selector: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(selector).ok()?;
    html.select(&selector).next()
}

fn parse_selectors(selectors: &[&str]) -> Vec<Selector> {
    selectors
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .collect()
}
