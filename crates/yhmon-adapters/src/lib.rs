//! Listing extraction + document source adapters (fixture or network).

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;
use yhmon_core::{normalize_text, Category, ListingRecord};
use yhmon_storage::{HttpError, HttpFetcher};

pub const CRATE_NAME: &str = "yhmon-adapters";

pub const DEFAULT_BASE_URL: &str = "https://www.yrkeshogskolan.se";

const CONTAINER_SELECTOR: &str = "#search-list";
const CARD_SELECTOR: &str = "article";
const TITLE_SELECTOR: &str = "h1.h-byline";
const TITLE_FALLBACK_SELECTOR: &str = "h1, h2, h3";
const LINK_SELECTOR: &str = "a[href]";
const DETAILS_SELECTOR: &str = "dl";
const DETAIL_LABEL_SELECTOR: &str = "dt";
const DETAIL_VALUE_SELECTOR: &str = "dd";
const STATUS_SELECTOR: &str = ".status";
const PROGRAM_CODE_PARAM: &str = "id";

const PROVIDER_LABELS: &[&str] = &["Utbildningsanordnare"];
const START_LABELS: &[&str] = &["Nästa utbildningsstart", "Utbildningsstart"];
const SCOPE_LABELS: &[&str] = &["Omfattning"];
const PACE_LABELS: &[&str] = &["Studietakt"];
const LOCATION_LABELS: &[&str] = &["Studieort", "Ort"];
const STATUS_LABELS: &[&str] = &["Sen anmälan", "Lediga platser", "Status"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    Fixture,
    Network,
}

/// Where one category's listing document comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingTarget {
    pub category: Category,
    pub url: String,
    pub fixture_path: PathBuf,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("reading fixture {}: {source}", path.display())]
    Fixture {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("listing container `{selector}` not found; upstream markup may have changed")]
    MissingContainer { selector: &'static str },
    #[error("{cards} listing card(s) found but none had a recognizable title; upstream markup may have changed")]
    NoRecognizableListings { cards: usize },
    #[error("invalid selector `{selector}`: {message}")]
    Selector { selector: &'static str, message: String },
    #[error("invalid base url `{url}`: {source}")]
    BaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Supplies the raw listing document for a category. Implementations make at
/// most one read or request per call.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn fetch(&self, target: &ListingTarget) -> Result<String, FetchError>;
}

/// Reads the category's local fixture file instead of touching the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixtureSource;

#[async_trait]
impl DocumentSource for FixtureSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Fixture
    }

    async fn fetch(&self, target: &ListingTarget) -> Result<String, FetchError> {
        tokio::fs::read_to_string(&target.fixture_path)
            .await
            .map_err(|source| FetchError::Fixture {
                path: target.fixture_path.clone(),
                source,
            })
    }
}

/// Performs one GET against the category's search URL.
#[derive(Debug, Clone)]
pub struct HttpSource {
    http: HttpFetcher,
}

impl HttpSource {
    pub fn new(http: HttpFetcher) -> Self {
        Self { http }
    }
}

#[async_trait]
impl DocumentSource for HttpSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Network
    }

    async fn fetch(&self, target: &ListingTarget) -> Result<String, FetchError> {
        Ok(self
            .http
            .fetch_text(target.category.slug(), &target.url)
            .await?)
    }
}

#[derive(Debug, Clone)]
struct ListingSelectors {
    container: Selector,
    card: Selector,
    title: Selector,
    title_fallback: Selector,
    link: Selector,
    details: Selector,
    detail_label: Selector,
    detail_value: Selector,
    status: Selector,
}

fn compile(selector: &'static str) -> Result<Selector, ExtractionError> {
    Selector::parse(selector).map_err(|e| ExtractionError::Selector {
        selector,
        message: e.to_string(),
    })
}

impl ListingSelectors {
    fn compile() -> Result<Self, ExtractionError> {
        Ok(Self {
            container: compile(CONTAINER_SELECTOR)?,
            card: compile(CARD_SELECTOR)?,
            title: compile(TITLE_SELECTOR)?,
            title_fallback: compile(TITLE_FALLBACK_SELECTOR)?,
            link: compile(LINK_SELECTOR)?,
            details: compile(DETAILS_SELECTOR)?,
            detail_label: compile(DETAIL_LABEL_SELECTOR)?,
            detail_value: compile(DETAIL_VALUE_SELECTOR)?,
            status: compile(STATUS_SELECTOR)?,
        })
    }
}

/// Turns a search result page into listing records.
#[derive(Debug, Clone)]
pub struct Extractor {
    base_url: Url,
    selectors: ListingSelectors,
}

impl Extractor {
    pub fn new(base_url: &str) -> Result<Self, ExtractionError> {
        let base_url = Url::parse(base_url).map_err(|source| ExtractionError::BaseUrl {
            url: base_url.to_string(),
            source,
        })?;
        Ok(Self {
            base_url,
            selectors: ListingSelectors::compile()?,
        })
    }

    /// Extract records in document order, keeping the first of any repeated identifier.
    ///
    /// A document without the result container is an error, and so is a container
    /// whose cards all lack a title. A container with no cards is a valid empty result.
    pub fn extract(&self, document: &str) -> Result<Vec<ListingRecord>, ExtractionError> {
        let html = Html::parse_document(document);
        let Some(container) = html.select(&self.selectors.container).next() else {
            return Err(ExtractionError::MissingContainer {
                selector: CONTAINER_SELECTOR,
            });
        };

        let mut seen = HashSet::new();
        let mut records = Vec::new();
        let mut cards = 0;
        for (position, card) in container.select(&self.selectors.card).enumerate() {
            cards += 1;
            let Some(record) = self.extract_card(card) else {
                debug!(position, "skipping listing card without a title");
                continue;
            };
            if !seen.insert(record.identifier.clone()) {
                debug!(position, identifier = %record.identifier, "dropping repeated listing");
                continue;
            }
            records.push(record);
        }

        if cards > 0 && records.is_empty() {
            return Err(ExtractionError::NoRecognizableListings { cards });
        }
        Ok(records)
    }

    fn extract_card(&self, card: ElementRef<'_>) -> Option<ListingRecord> {
        let title = first_text(card, &self.selectors.title)
            .or_else(|| first_text(card, &self.selectors.title_fallback))?;
        let href = card
            .select(&self.selectors.link)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(str::trim);
        let link = href.and_then(|href| self.base_url.join(href).ok());
        let url = match (&link, href) {
            (Some(link), _) => link.to_string(),
            (None, Some(raw)) => raw.to_string(),
            (None, None) => String::new(),
        };
        let code = link.as_ref().and_then(program_code);

        let details = self.detail_pairs(card);
        let provider = detail_value(&details, PROVIDER_LABELS);
        let location = detail_value(&details, LOCATION_LABELS);
        let status = if let Some(status) = lookup_detail(&details, STATUS_LABELS) {
            status.to_string()
        } else {
            first_text(card, &self.selectors.status).unwrap_or_default()
        };

        Some(ListingRecord {
            identifier: ListingRecord::derive_identifier(code.as_deref(), &title, &provider, &location),
            start: detail_value(&details, START_LABELS),
            scope: detail_value(&details, SCOPE_LABELS),
            pace: detail_value(&details, PACE_LABELS),
            title,
            provider,
            location,
            status,
            url,
        })
    }

    fn detail_pairs(&self, card: ElementRef<'_>) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for dl in card.select(&self.selectors.details) {
            let labels = dl.select(&self.selectors.detail_label);
            let values = dl.select(&self.selectors.detail_value);
            for (dt, dd) in labels.zip(values) {
                pairs.push((element_text(dt), element_text(dd)));
            }
        }
        pairs
    }
}

/// The `?id=` program code of a listing link, if any.
fn program_code(link: &Url) -> Option<String> {
    link.query_pairs()
        .find(|(key, _)| key == PROGRAM_CODE_PARAM)
        .map(|(_, value)| value.into_owned())
}

fn element_text(element: ElementRef<'_>) -> String {
    normalize_text(&element.text().collect::<String>())
}

fn first_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope
        .select(selector)
        .map(element_text)
        .find(|text| !text.is_empty())
}

fn label_matches(label: &str, wanted: &str) -> bool {
    label.trim_end_matches(':').trim().to_lowercase() == wanted.to_lowercase()
}

fn lookup_detail<'a>(details: &'a [(String, String)], labels: &[&str]) -> Option<&'a str> {
    labels.iter().find_map(|wanted| {
        details
            .iter()
            .find(|(label, _)| label_matches(label, wanted))
            .map(|(_, value)| value.as_str())
    })
}

fn detail_value(details: &[(String, String)], labels: &[&str]) -> String {
    lookup_detail(details, labels).unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn extractor() -> Extractor {
        Extractor::new(DEFAULT_BASE_URL).expect("selectors compile")
    }

    fn card(title: &str, provider: &str, location: &str, href: &str) -> String {
        format!(
            r#"<article class="search-item">
                 <a href="{href}"><h1 class="h-byline">{title}</h1></a>
                 <dl>
                   <dt>Utbildningsanordnare</dt><dd>{provider}</dd>
                   <dt>Nästa utbildningsstart</dt><dd>2025-08-25</dd>
                   <dt>Omfattning</dt><dd>400 YH-poäng</dd>
                   <dt>Studietakt</dt><dd>100%</dd>
                   <dt>Studieort</dt><dd>{location}</dd>
                 </dl>
               </article>"#
        )
    }

    fn page(cards: &[String]) -> String {
        format!(
            "<html><body><main><section id=\"search-list\">{}</section></main></body></html>",
            cards.join("\n")
        )
    }

    #[test]
    fn extracts_one_record_per_card_in_document_order() {
        let html = page(&[
            card("Systemutvecklare Java", "Nackademin", "Göteborg", "/utbildning/1"),
            card("Molnutvecklare", "Lexicon", "Distans", "/utbildning/2"),
            card("Data Engineer", "EC Utbildning", "Göteborg", "/utbildning/3"),
        ]);
        let records = extractor().extract(&html).unwrap();
        let titles: Vec<_> = records.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Systemutvecklare Java", "Molnutvecklare", "Data Engineer"]);

        let first = &records[0];
        assert_eq!(first.identifier, "systemutvecklare-java:nackademin:göteborg");
        assert_eq!(first.provider, "Nackademin");
        assert_eq!(first.start, "2025-08-25");
        assert_eq!(first.scope, "400 YH-poäng");
        assert_eq!(first.pace, "100%");
        assert_eq!(first.location, "Göteborg");
        assert_eq!(first.url, "https://www.yrkeshogskolan.se/utbildning/1");
        assert_eq!(first.status, "");
    }

    #[test]
    fn repeated_listings_keep_first_occurrence() {
        let html = page(&[
            card("Devops", "Nackademin", "Göteborg", "/first"),
            card("Testare", "Lexicon", "Göteborg", "/other"),
            card("DEVOPS", "Nackademin", "Göteborg", "/second"),
        ]);
        let records = extractor().extract(&html).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].url, "https://www.yrkeshogskolan.se/first");
        assert_eq!(records[1].title, "Testare");
    }

    #[test]
    fn extraction_is_deterministic() {
        let html = page(&[
            card("A", "X", "Göteborg", "/a"),
            card("B", "Y", "Distans", "/b"),
        ]);
        let ex = extractor();
        assert_eq!(ex.extract(&html).unwrap(), ex.extract(&html).unwrap());
    }

    #[test]
    fn missing_optional_fields_become_empty() {
        let html = page(&["<article><h2>Bare listing</h2></article>".to_string()]);
        let records = extractor().extract(&html).unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.title, "Bare listing");
        assert_eq!(r.identifier, "bare-listing::");
        assert!(r.provider.is_empty() && r.location.is_empty() && r.url.is_empty());
    }

    #[test]
    fn cards_without_title_are_skipped() {
        let html = page(&[
            "<article><a href=\"/x\">no heading</a></article>".to_string(),
            card("Kept", "X", "Y", "/kept"),
        ]);
        let records = extractor().extract(&html).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Kept");
    }

    #[test]
    fn empty_container_is_valid_and_yields_nothing() {
        let html = page(&[]);
        assert!(extractor().extract(&html).unwrap().is_empty());
    }

    #[test]
    fn program_code_separates_listings_with_matching_names() {
        let pace_card = |code: &str, pace: &str| {
            format!(
                r#"<article><a href="/hitta-utbildning/sok/utbildning/?id={code}">
                     <h1 class="h-byline">Frontendutvecklare</h1></a>
                     <dl><dt>Utbildningsanordnare</dt><dd>Medieinstitutet</dd>
                         <dt>Studietakt</dt><dd>{pace}</dd>
                         <dt>Studieort</dt><dd>Distans</dd></dl></article>"#
            )
        };
        let html = page(&[
            pace_card("1", "100%"),
            pace_card("2", "50%"),
            card("Systemutvecklare C#", "Nackademin", "Göteborg", "/utbildning/c-sharp"),
            card("Systemutvecklare C++", "Nackademin", "Göteborg", "/utbildning/c-plus-plus"),
        ]);
        let records = extractor().extract(&html).unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "1",
                "2",
                "systemutvecklare-c#:nackademin:göteborg",
                "systemutvecklare-c++:nackademin:göteborg",
            ]
        );
        assert_eq!(records[1].pace, "50%");
        assert_eq!(
            records[0].url,
            "https://www.yrkeshogskolan.se/hitta-utbildning/sok/utbildning/?id=1"
        );
    }

    #[test]
    fn repeated_program_code_keeps_first_card() {
        let html = page(&[
            card("Devops", "Nackademin", "Göteborg", "/utbildning/?id=7"),
            card("Devops (kväll)", "Nackademin", "Göteborg", "/utbildning/?id=7&ref=list"),
        ]);
        let records = extractor().extract(&html).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Devops");
    }

    #[test]
    fn cards_with_no_recognizable_title_are_an_extraction_error() {
        let html = page(&[
            "<article><h4>Systemutvecklare Java</h4></article>".to_string(),
            "<article><h4>Data Engineer</h4></article>".to_string(),
        ]);
        let err = extractor().extract(&html).unwrap_err();
        assert!(matches!(err, ExtractionError::NoRecognizableListings { cards: 2 }));
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let err = Extractor::new("not a url").unwrap_err();
        assert!(matches!(err, ExtractionError::BaseUrl { .. }));
    }

    #[test]
    fn missing_container_is_an_extraction_error() {
        let html = "<html><body><p>Sidan kunde inte hittas</p></body></html>";
        let err = extractor().extract(html).unwrap_err();
        assert!(matches!(err, ExtractionError::MissingContainer { .. }));
        assert!(extractor().extract("").is_err());
    }

    #[test]
    fn status_prefers_detail_label_then_status_element() {
        let html = page(&[
            r#"<article><h1 class="h-byline">With label</h1>
                 <dl><dt>Sen anmälan:</dt><dd> Öppen  för ansökan </dd></dl>
                 <span class="status">ignored</span></article>"#
                .to_string(),
            r#"<article><h1 class="h-byline">With badge</h1>
                 <span class="status">Få platser kvar</span></article>"#
                .to_string(),
        ]);
        let records = extractor().extract(&html).unwrap();
        assert_eq!(records[0].status, "Öppen för ansökan");
        assert_eq!(records[1].status, "Få platser kvar");
    }

    #[test]
    fn absolute_and_protocol_relative_links_are_kept() {
        let html = page(&[
            card("A", "X", "Y", "https://example.org/a"),
            card("B", "X", "Y", "//cdn.example.org/b"),
        ]);
        let records = extractor().extract(&html).unwrap();
        assert_eq!(records[0].url, "https://example.org/a");
        assert_eq!(records[1].url, "https://cdn.example.org/b");
    }

    fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .canonicalize()
            .expect("workspace root")
    }

    #[tokio::test]
    async fn fixture_source_reads_on_site_fixture() {
        let target = ListingTarget {
            category: Category::OnSite,
            url: String::new(),
            fixture_path: workspace_root().join("fixtures").join("on-site.html"),
        };
        let text = FixtureSource.fetch(&target).await.expect("fixture readable");
        let records = extractor().extract(&text).expect("fixture parses");
        let ids: Vec<_> = records.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(ids, vec!["10001", "10002", "10003"]);
        assert_eq!(records[0].title, "Mjukvaruutvecklare inom inbyggda system");
        assert_eq!(records[2].status, "Sen anmälan öppen");
    }

    #[tokio::test]
    async fn fixture_source_reports_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = ListingTarget {
            category: Category::Remote,
            url: String::new(),
            fixture_path: dir.path().join("missing.html"),
        };
        let err = FixtureSource.fetch(&target).await.unwrap_err();
        assert!(matches!(err, FetchError::Fixture { .. }));
        assert_eq!(FixtureSource.kind(), SourceKind::Fixture);
    }
}
