//! Test fixtures for integration tests

/// A well-known video ID
pub const VIDEO: &str = "dQw4w9WgXcQ";

/// A well-known channel ID
pub const CHANNEL: &str = "UCuAXFkgsw1L7xaCfnd5JJOw";

/// `n` distinct, well-formed video IDs
pub fn video_ids(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("vid{i:08}")).collect()
}

/// `n` distinct, well-formed channel IDs
pub fn channel_ids(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("UC{i:022}")).collect()
}

/// A channel video page linking two videos and a continuation
pub fn channel_page(videos: &[&str], continuation: Option<&str>) -> String {
    let mut html = String::from("<html><body><ul>");
    for video in videos {
        html.push_str(&format!(r#"<li><a href="/watch?v={video}">video</a></li>"#));
    }
    html.push_str("</ul>");
    if let Some(path) = continuation {
        html.push_str(&format!(r#"<button data-uix-load-more-href="{path}">more</button>"#));
    }
    html.push_str("</body></html>");
    html
}

#[test]
fn test_fixture_ids_are_well_formed() {
    use hivecrawl::models::EntityKind;

    assert!(video_ids(20).iter().all(|id| EntityKind::Video.is_valid(id)));
    assert!(channel_ids(20).iter().all(|id| EntityKind::Channel.is_valid(id)));
}
