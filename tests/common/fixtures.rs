//! Search responses and image hosting on a mock server

use serde_json::{Value, json};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path of the search resource on the mock server
pub const SEARCH_PATH: &str = "/resource/BaseSearchResource/get/";

/// URLs of `count` images hosted on `server`, named `0.jpg`, `1.jpg`, ...
pub fn image_urls(server: &MockServer, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("{}/originals/{i}.jpg", server.uri()))
        .collect()
}

/// Search response listing `urls`, alternating the direct and nested result shapes
pub fn search_body(urls: &[String]) -> Value {
    let results: Vec<Value> = urls
        .iter()
        .enumerate()
        .map(|(i, url)| {
            if i % 2 == 0 {
                json!({ "id": i, "images": { "orig": { "url": url } } })
            } else {
                json!({
                    "id": i,
                    "story_pin_data": {
                        "pages": [{ "blocks": [{ "image": { "orig": { "url": url } } }] }]
                    }
                })
            }
        })
        .collect();
    json!({ "resource_response": { "data": { "results": results } } })
}

/// Answer searches for `keywords` with `urls`
pub async fn mount_search(server: &MockServer, keywords: &str, urls: &[String]) {
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(query_param(
            "source_url",
            format!("/search/pins/?q={}", urlencoding::encode(keywords)).as_str(),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_body(urls)))
        .mount(server)
        .await;
}

/// Serve `count` images, each expected to be fetched exactly `fetches` times
pub async fn mount_images(server: &MockServer, count: usize, fetches: u64) {
    for i in 0..count {
        Mock::given(method("GET"))
            .and(path(format!("/originals/{i}.jpg")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(image_bytes(i)))
            .expect(fetches)
            .mount(server)
            .await;
    }
}

/// Bytes served for image `i`
pub fn image_bytes(i: usize) -> Vec<u8> {
    format!("jpeg data {i}").into_bytes()
}
