//! Article page fixtures and mock server helpers

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Landing page carrying a full set of Highwire citation tags
pub fn article_page(title: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html><head>
<meta name="citation_title" content="{title}">
<meta name="citation_authors" content="张三, 李四">
<meta name="citation_journal_title" content="钢铁钒钛">
<meta name="citation_year" content="2003">
<meta name="citation_volume" content="24">
<meta name="citation_issue" content="4">
<meta name="citation_firstpage" content="1">
<meta name="citation_lastpage" content="5">
</head><body>
<div class="article-abstract"><p>摘要：本文研究了钒钛磁铁矿的高炉冶炼。</p></div>
<p>关键词：钒钛磁铁矿，高炉</p>
</body></html>"#
    )
}

/// Landing page without title, authors or journal
pub const INCOMPLETE_PAGE: &str = r#"<html><head></head><body><p>页面不存在</p></body></html>"#;

/// Serve `body` with status 200 at `route`
pub async fn mount_page(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// Serve `status` at `route`, expecting exactly `requests` hits
pub async fn mount_status(server: &MockServer, route: &str, status: u16, requests: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status))
        .expect(requests)
        .mount(server)
        .await;
}
