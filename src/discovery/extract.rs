//! ID extraction from raw page bodies
//!
//! The patterns mirror the ID shapes accepted by the identifier store. The
//! `regex` crate has no look-ahead, so each pattern ends in a non-capturing
//! group matching a non-word character or the end of input; only the first
//! capture group is kept.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use super::Discovery;

fn video_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:\bv=|youtu\.be/)([A-Za-z0-9_-]{11})(?:[^A-Za-z0-9_]|$)")
            .expect("Invalid regex pattern")
    })
}

fn channel_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(UC[A-Za-z0-9_-]{22})(?:[^A-Za-z0-9_]|$)").expect("Invalid regex pattern")
    })
}

fn playlist_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b(PL(?:[0-9A-F]{16}|[A-Za-z0-9_-]{32})|(?:LL|FL|UU)[A-Za-z0-9_-]{22})(?:[^A-Za-z0-9_]|$)",
        )
        .expect("Invalid regex pattern")
    })
}

fn continuation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""(/browse_ajax\?[^"]*)""#).expect("Invalid regex pattern"))
}

fn collect(re: &Regex, body: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    re.captures_iter(body)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|id| seen.insert(*id))
        .map(str::to_string)
        .collect()
}

/// Pull every video, channel and playlist ID out of a page body, plus the
/// first continuation path if there is one
pub fn extract_ids(body: &str) -> Discovery {
    let next_seed = continuation_re()
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| html_escape::decode_html_entities(m.as_str()).into_owned());

    Discovery {
        videos: collect(video_re(), body),
        channels: collect(channel_re(), body),
        playlists: collect(playlist_re(), body),
        next_seed,
    }
}
