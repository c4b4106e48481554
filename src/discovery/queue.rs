//! Work queue of the discovery crawler
//!
//! A double-ended queue with a per-kind quota. Channels and playlists fan
//! out into many videos, so they are pushed to the front; videos queue at
//! the back.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

const SITE: &str = "https://www.youtube.com";

/// Kind of page a unit points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Video,
    Channel,
    Playlist,
    /// A site-relative path, e.g. a "load more" link
    Continuation,
}

impl UnitKind {
    pub const ALL: [UnitKind; 4] = [
        Self::Video,
        Self::Channel,
        Self::Playlist,
        Self::Continuation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Channel => "channel",
            Self::Playlist => "playlist",
            Self::Continuation => "continuation",
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One page to scan
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkUnit {
    pub kind: UnitKind,
    pub id: String,
}

impl WorkUnit {
    pub fn new(kind: UnitKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    /// Page URL scanned for this unit
    pub fn url(&self) -> String {
        let id = &self.id;
        match self.kind {
            UnitKind::Video => format!("{SITE}/watch?v={id}&list=RD{id}&disable_polymer=1"),
            UnitKind::Channel => format!("{SITE}/channel/{id}/playlists?disable_polymer=1"),
            UnitKind::Playlist => format!("{SITE}/playlist?list={id}&disable_polymer=1"),
            UnitKind::Continuation => format!("{SITE}{id}"),
        }
    }

    /// Units a channel fans out into besides its own page: the uploads
    /// playlist and the channel home page (which lists related channels)
    pub fn channel_followups(&self) -> Vec<WorkUnit> {
        if self.kind != UnitKind::Channel {
            return Vec::new();
        }
        let suffix = self.id.strip_prefix("UC").unwrap_or(&self.id);
        vec![
            WorkUnit::new(UnitKind::Playlist, format!("UU{suffix}")),
            WorkUnit::new(UnitKind::Continuation, format!("/channel/{}", self.id)),
        ]
    }
}

/// Per-kind queue capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quotas {
    pub video: usize,
    pub channel: usize,
    pub playlist: usize,
    pub continuation: usize,
}

impl Quotas {
    /// Split `crawl_limit` 50/30/20 between videos, channels and playlists;
    /// continuations are bounded only by the whole limit
    pub fn from_crawl_limit(crawl_limit: usize) -> Self {
        Self {
            video: crawl_limit / 2,
            channel: crawl_limit * 3 / 10,
            playlist: crawl_limit / 5,
            continuation: crawl_limit,
        }
    }

    fn get(&self, kind: UnitKind) -> usize {
        match kind {
            UnitKind::Video => self.video,
            UnitKind::Channel => self.channel,
            UnitKind::Playlist => self.playlist,
            UnitKind::Continuation => self.continuation,
        }
    }
}

/// Deque of units with quota accounting
#[derive(Debug)]
pub struct WorkQueue {
    units: VecDeque<WorkUnit>,
    counts: HashMap<UnitKind, usize>,
    quotas: Quotas,
}

impl WorkQueue {
    pub fn new(quotas: Quotas) -> Self {
        Self {
            units: VecDeque::new(),
            counts: HashMap::new(),
            quotas,
        }
    }

    /// Queue a unit; returns `false` when its kind is at quota
    pub fn enqueue(&mut self, unit: WorkUnit, front: bool) -> bool {
        let count = self.counts.entry(unit.kind).or_insert(0);
        if *count >= self.quotas.get(unit.kind) {
            return false;
        }
        *count += 1;

        if front {
            self.units.push_front(unit);
        } else {
            self.units.push_back(unit);
        }
        true
    }

    /// Queue a unit at the position its kind belongs
    pub fn push(&mut self, unit: WorkUnit) -> bool {
        let front = matches!(
            unit.kind,
            UnitKind::Channel | UnitKind::Playlist | UnitKind::Continuation
        );
        self.enqueue(unit, front)
    }

    pub fn dequeue(&mut self) -> Option<WorkUnit> {
        let unit = self.units.pop_front()?;
        if let Some(count) = self.counts.get_mut(&unit.kind) {
            *count = count.saturating_sub(1);
        }
        Some(unit)
    }

    /// Units of a kind currently queued
    pub fn count(&self, kind: UnitKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
