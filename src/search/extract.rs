//! Image URL extraction from search responses
//!
//! Result objects come in several shapes. Most carry the original-size image
//! at `images.orig.url`; the rest bury an `orig` object somewhere deeper (in
//! story pins, carousels, etc.). For those we walk the element depth-first and
//! take the first `orig.url` we meet.
//!
//! Traversal order decides which URL wins when an element holds several, so
//! it is fixed: object entries in document order (serde_json is built with
//! `preserve_order`), array elements by index.

use serde_json::Value;

/// Pull one image URL out of every result element, in result order
///
/// A missing or mistyped `resource_response.data.results` yields an empty
/// list. Elements without any usable URL are skipped. Duplicates are kept;
/// deduplication happens in the state store.
pub fn extract_image_urls(response: &Value) -> Vec<String> {
    let Some(results) = response
        .pointer("/resource_response/data/results")
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    results
        .iter()
        .filter_map(|element| {
            direct_orig_url(element)
                .or_else(|| find_orig_url(element))
                .map(str::to_string)
        })
        .collect()
}

/// `images.orig.url` when it is present and a string
fn direct_orig_url(element: &Value) -> Option<&str> {
    element.pointer("/images/orig/url").and_then(Value::as_str)
}

/// Depth-first search for the first `orig` object carrying a string `url`
///
/// An `orig` key whose value lacks a usable `url` is searched like any other
/// nested object.
pub fn find_orig_url(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) => map.iter().find_map(|(key, child)| {
            if key == "orig" {
                if let Some(url) = child.get("url").and_then(Value::as_str) {
                    return Some(url);
                }
            }
            find_orig_url(child)
        }),
        Value::Array(items) => items.iter().find_map(find_orig_url),
        _ => None,
    }
}
